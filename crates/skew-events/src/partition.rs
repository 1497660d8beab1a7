//! Key-to-partition mapping.
//!
//! Mirrors librdkafka's `fnv1a` partitioner: the 32-bit FNV-1a hash of the
//! key bytes, read as a signed 32-bit value and made positive, modulo the
//! partition count. The producer configures librdkafka
//! with the same partitioner, so placement predicted here matches the broker.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Partition a key lands on. `partitions` must be non-zero.
pub fn partition_for(key: &[u8], partitions: u32) -> u32 {
    // librdkafka takes the absolute value of the hash as an int32.
    (fnv1a(key) as i32).unsigned_abs() % partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_policy::RoutingKey;
    use std::collections::HashMap;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_negative_hash_made_positive() {
        // Top bit set: |-365261730| % 6 == 0, the raw unsigned hash would give 4.
        let key = b"player-000001#shard=0";
        assert_eq!(fnv1a(key), 0xea3a_8c5e);
        assert_eq!(partition_for(key, 6), 0);
    }

    #[test]
    fn test_vip_shard_placement_matches_librdkafka() {
        let expected = [0, 1, 4, 5, 4, 5, 2, 3, 4, 5, 5, 0, 3, 4, 1, 2];
        for (shard, partition) in expected.into_iter().enumerate() {
            let key = RoutingKey::for_shard("player-000001", shard as u32);
            assert_eq!(partition_for(key.as_bytes(), 6), partition, "{key}");
        }
    }

    #[test]
    fn test_same_key_same_partition() {
        let key = RoutingKey::for_player("player-000001");
        let first = partition_for(key.as_bytes(), 6);
        assert!((0..10).all(|_| partition_for(key.as_bytes(), 6) == first));
    }

    #[test]
    fn test_vip_shards_spread_over_every_partition() {
        let mut per_partition: HashMap<u32, u32> = HashMap::new();
        for shard in 0..16 {
            let key = RoutingKey::for_shard("player-000001", shard);
            *per_partition.entry(partition_for(key.as_bytes(), 6)).or_default() += 1;
        }
        assert_eq!(per_partition.len(), 6);
        assert!(per_partition.values().all(|n| *n <= 4));
    }
}
