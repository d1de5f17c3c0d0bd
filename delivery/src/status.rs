/// Node and cache state as an explicit struct of booleans rather than the
/// source's XOR-toggled bitmask: `online`,
/// `cache_ready` (the replay cache has something to drain), `cache_full`.
/// Guarded by a per-node mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStatus {
    pub online: bool,
    pub cache_ready: bool,
    pub cache_full: bool,
}

impl NodeStatus {
    pub fn new_online() -> Self {
        Self {
            online: true,
            cache_ready: false,
            cache_full: false,
        }
    }
}
