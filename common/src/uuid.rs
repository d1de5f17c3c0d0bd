use fnv::FnvHasher;
use rand::Rng;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates a short, probably-unique id seeded from the current timestamp.
/// Used for cluster member/session ids where a full UUID would be overkill.
pub fn uuid_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis();

    let mut hasher = FnvHasher::default();
    now.hash(&mut hasher);
    let hash_value = hasher.finish();
    let hash_str = format!(
        "{:08x}",
        u32::from_le_bytes(hash_value.to_le_bytes()[..4].try_into().unwrap())
    );

    let random_num: u32 = rand::thread_rng().gen_range(0..0x1000_0000);
    let random_str = format!("{:04x}", random_num & 0xFFFF);

    hash_str + &random_str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_nonempty_distinct_ids() {
        let a = uuid_timestamp();
        let b = uuid_timestamp();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
