pub mod election;
pub mod etcd_kv;
pub mod kv;
pub mod member;
pub mod mock_kv;

pub use election::{Coordinator, CoordinatorCallbacks, SessionId};
pub use kv::KvStore;
pub use member::ClusterMember;
