// ==============================================
// END-TO-END CACHE OPERATION TESTS
// ==============================================
//
// Exercises the untyped surface through complete put/get/remove lifecycles,
// including structural accounting invariants observable from the outside.

use blockcache::builder::CacheBuilder;
use blockcache::bytes::VecSink;
use blockcache::{BlockCache, PutOutcome};

fn cache_512() -> BlockCache {
    CacheBuilder::new()
        .block_size(512)
        .capacity(8 * 1024 * 1024)
        .hash_table_size(32)
        .build()
        .unwrap()
}

#[test]
fn put_then_get_returns_value() {
    let cache = cache_512();
    assert_eq!(
        cache.put(0x1, b"a".as_slice(), b"A".as_slice(), None).unwrap(),
        PutOutcome::Added
    );

    let mut sink = VecSink::new();
    assert!(cache.get(0x1, b"a".as_slice(), &mut sink).unwrap());
    assert_eq!(sink.as_slice(), b"A");
}

#[test]
fn replace_returns_old_value_and_outcome() {
    let cache = cache_512();
    cache.put(0x1, b"a".as_slice(), b"A".as_slice(), None).unwrap();

    let mut old = VecSink::new();
    assert_eq!(
        cache
            .put(0x1, b"a".as_slice(), b"BB".as_slice(), Some(&mut old))
            .unwrap(),
        PutOutcome::Replaced
    );
    assert_eq!(old.as_slice(), b"A");

    let mut sink = VecSink::new();
    assert!(cache.get(0x1, b"a".as_slice(), &mut sink).unwrap());
    assert_eq!(sink.as_slice(), b"BB");
}

#[test]
fn remove_is_idempotent() {
    let cache = cache_512();
    cache.put(5, b"x".as_slice(), b"X".as_slice(), None).unwrap();

    assert!(cache.remove(5, b"x".as_slice()).unwrap());
    assert!(!cache.remove(5, b"x".as_slice()).unwrap());

    let mut sink = VecSink::new();
    assert!(!cache.get(5, b"x".as_slice(), &mut sink).unwrap());
    assert_eq!(cache.mem_used(), 0);
}

#[test]
fn invalidate_all_returns_every_block() {
    let cache = cache_512();
    cache.put(5, b"x".as_slice(), b"X".as_slice(), None).unwrap();
    cache.put(6, b"y".as_slice(), b"Y".as_slice(), None).unwrap();

    cache.invalidate_all();
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.mem_used(), 0);
    assert!((cache.free_space_fraction() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn lru_promotion_moves_entry_headward() {
    let cache = cache_512();
    // Same hash, same partition: list order is observable through hot keys.
    cache.put(9, b"k1".as_slice(), b"1".as_slice(), None).unwrap();
    cache.put(9, b"k2".as_slice(), b"2".as_slice(), None).unwrap();

    let mut sink = VecSink::new();
    cache.get(9, b"k1".as_slice(), &mut sink).unwrap();

    // One key per partition: the partition's head must now be k1.
    let hot = cache.hot_keys(1);
    assert_eq!(hot, vec![b"k1".to_vec()]);
}

#[test]
fn accounting_invariants_hold_through_churn() {
    let cache = cache_512();
    let block = cache.block_size() as u64;

    for i in 0u32..500 {
        let key = format!("key-{i}").into_bytes();
        let value = vec![i as u8; (i as usize * 13) % 2000];
        cache.put(i, &key, &value, None).unwrap();
    }
    for i in (0u32..500).step_by(3) {
        let key = format!("key-{i}").into_bytes();
        cache.remove(i, &key).unwrap();
    }

    let ext = cache.extended_stats();
    // Sum of partition list lengths equals size.
    assert_eq!(ext.lru_list_lengths.iter().sum::<u64>(), ext.size);
    assert_eq!(ext.size, cache.size());
    // Used plus free covers the whole pool.
    assert_eq!(cache.mem_used() + ext.free_block_counts[0] * block, cache.capacity());
}

#[test]
fn capacity_is_never_exceeded() {
    let cache = CacheBuilder::new()
        .block_size(512)
        .capacity(8 * 1024 * 1024)
        .build()
        .unwrap();

    let value = vec![0xabu8; 16 * 1024];
    let mut added = 0u32;
    loop {
        let key = format!("fill-{added}").into_bytes();
        match cache.put(added, &key, &value, None).unwrap() {
            PutOutcome::Added => added += 1,
            PutOutcome::NoSpace => break,
            PutOutcome::Replaced => unreachable!("keys are distinct"),
        }
        assert!(cache.mem_used() <= cache.capacity());
    }
    assert!(added > 0);
    assert!(cache.mem_used() <= cache.capacity());
}

#[test]
fn full_cache_accepts_put_after_remove() {
    let cache = CacheBuilder::new()
        .block_size(512)
        .capacity(8 * 1024 * 1024)
        .build()
        .unwrap();

    let value = vec![7u8; 8 * 1024];
    let mut filled = 0u32;
    loop {
        let key = format!("fill-{filled}").into_bytes();
        if cache.put(filled, &key, &value, None).unwrap() == PutOutcome::NoSpace {
            break;
        }
        filled += 1;
    }

    // Free one entry; the same-sized put must fit again.
    assert!(cache.remove(0, b"fill-0".as_slice()).unwrap());
    assert_eq!(
        cache
            .put(0xffff, b"after-remove".as_slice(), &value, None)
            .unwrap(),
        PutOutcome::Added
    );
}

#[test]
fn empty_value_round_trips() {
    let cache = cache_512();
    cache.put(2, b"empty".as_slice(), b"".as_slice(), None).unwrap();

    let mut sink = VecSink::new();
    assert!(cache.get(2, b"empty".as_slice(), &mut sink).unwrap());
    assert!(sink.as_slice().is_empty());
}

// ==============================================
// PROPERTY TESTS
// ==============================================

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Values of any size, straddling block boundaries or not, come
        /// back byte-identical.
        #[test]
        fn prop_put_get_round_trip(
            key in proptest::collection::vec(any::<u8>(), 1..600),
            value in proptest::collection::vec(any::<u8>(), 0..4000),
            hash in any::<u32>(),
        ) {
            let cache = cache_512();
            prop_assert_eq!(
                cache.put(hash, &key, &value, None).unwrap(),
                PutOutcome::Added
            );

            let mut sink = VecSink::new();
            prop_assert!(cache.get(hash, &key, &mut sink).unwrap());
            prop_assert_eq!(sink.as_slice(), value.as_slice());
        }

        /// Normalized block sizes are powers of two that fit the request.
        #[test]
        fn prop_block_size_normalization(requested in 512usize..=262_144) {
            let cache = CacheBuilder::new()
                .block_size(requested)
                .capacity(16 * 1024 * 1024)
                .build()
                .unwrap();
            let effective = cache.block_size();
            prop_assert!(effective.is_power_of_two());
            prop_assert!(effective >= requested);
            prop_assert!(effective <= 262_144);
        }

        /// Capacity is rounded down to a whole number of blocks.
        #[test]
        fn prop_capacity_normalization(extra in 0u64..4096) {
            let cache = CacheBuilder::new()
                .block_size(1024)
                .capacity(8 * 1024 * 1024 + extra)
                .build()
                .unwrap();
            prop_assert_eq!(cache.capacity() % cache.block_size() as u64, 0);
            prop_assert!(cache.capacity() <= 8 * 1024 * 1024 + extra);
        }
    }
}
