//! Victim pipeline and eviction policies

use rustpmemkv::storage::{VictimSelector, entries, victims};
use rustpmemkv::{
    Direction, EvictionPolicy, Handle, PmemError, PmemPool, PolicyKind, PoolOptions,
};

fn insert(pool: &mut PmemPool, key: &str, value: &str) -> Handle {
    pool.transaction(|tx| {
        let key = tx.alloc_bytes(key.as_bytes())?;
        let value = tx.alloc_bytes(value.as_bytes())?;
        entries::insert_front(tx, key, value)
    })
    .unwrap()
}

fn key_of(pool: &PmemPool, node: Handle) -> String {
    let (key, _) = entries::read_pair(pool, node).unwrap();
    String::from_utf8(key.to_vec()).unwrap()
}

#[test]
fn test_lru_scenario_evict_and_flush() {
    let mut pool = PmemPool::in_memory(PoolOptions::default());
    let a = insert(&mut pool, "a", "1");
    let b = insert(&mut pool, "b", "2");
    assert_eq!(pool.root().entry_first, Some(b));
    assert_eq!(pool.root().entry_last, Some(a));
    assert_eq!(pool.root().entry_count, 2);

    let mut policy = EvictionPolicy::new(PolicyKind::Lru, None);
    let victim = policy.select_victim(&pool).unwrap().unwrap();
    assert_eq!(key_of(&pool, victim), "a");

    pool.transaction(|tx| victims::evict_one(tx, victim)).unwrap();
    assert_eq!(pool.root().entry_count, 1);
    assert_eq!(pool.root().entry_first, Some(b));
    assert_eq!(pool.root().entry_last, Some(b));
    assert_eq!(pool.root().victim_first, Some(a));
    assert_eq!(pool.root().victim_count, 1);

    let flushed = pool
        .transaction(|tx| victims::flush_victim_chain(tx, a))
        .unwrap();
    assert_eq!(flushed, 1);
    assert_eq!(pool.root().victim_count, 0);
    assert_eq!(pool.root().victim_first, None);
    assert!(pool.entry(a).is_err());

    // Nothing else was touched.
    let (key, value) = entries::read_pair(&pool, b).unwrap();
    assert_eq!((key, value), (&b"b"[..], &b"2"[..]));
    assert_eq!(pool.stats().live_objects, 3);
}

#[test]
fn test_lru_batch_takes_oldest_first() {
    let mut pool = PmemPool::in_memory(PoolOptions::default());
    for key in ["a", "b", "c", "d"] {
        insert(&mut pool, key, "v");
    }
    let mut policy = EvictionPolicy::new(PolicyKind::Lru, None);
    let batch = policy.select_victims(&pool, 3).unwrap();
    let names: Vec<_> = batch.iter().map(|&node| key_of(&pool, node)).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    pool.transaction(|tx| victims::evict_batch(tx, &batch))
        .unwrap();
    assert_eq!(pool.root().entry_count, 1);
    assert_eq!(pool.root().victim_count, 3);
    let pipeline: Vec<_> = victims::iterate(&pool)
        .map(|node| key_of(&pool, node))
        .collect();
    assert_eq!(pipeline, vec!["c", "b", "a"]);
}

#[test]
fn test_random_policy_is_reproducible_with_seed() {
    let mut pool = PmemPool::in_memory(PoolOptions::default());
    for i in 0..16 {
        insert(&mut pool, &format!("k{}", i), "v");
    }
    let mut first = EvictionPolicy::new(PolicyKind::Random, Some(42));
    let mut second = EvictionPolicy::new(PolicyKind::Random, Some(42));

    let picks: Vec<_> = (0..5)
        .map(|_| first.select_victim(&pool).unwrap().unwrap())
        .collect();
    let again: Vec<_> = (0..5)
        .map(|_| second.select_victim(&pool).unwrap().unwrap())
        .collect();
    assert_eq!(picks, again);

    let live: Vec<_> = entries::iterate(&pool, Direction::Forward).collect();
    assert!(picks.iter().all(|pick| live.contains(pick)));
}

#[test]
fn test_random_batch_is_unsupported() {
    let mut pool = PmemPool::in_memory(PoolOptions::default());
    insert(&mut pool, "a", "1");
    let mut policy = EvictionPolicy::new(PolicyKind::Random, Some(1));
    assert!(!policy.supports_batches());
    assert!(matches!(
        policy.select_victims(&pool, 2),
        Err(PmemError::PolicyUnsupported(_))
    ));
}

#[test]
fn test_empty_store_has_no_victim() {
    let pool = PmemPool::in_memory(PoolOptions::default());
    for kind in [PolicyKind::Lru, PolicyKind::Random] {
        let mut policy = EvictionPolicy::new(kind, Some(3));
        assert_eq!(policy.select_victim(&pool).unwrap(), None);
    }
}

#[test]
fn test_policy_names_parse() {
    assert_eq!("allkeys-lru".parse::<PolicyKind>().unwrap(), PolicyKind::Lru);
    assert_eq!("random".parse::<PolicyKind>().unwrap(), PolicyKind::Random);
    assert!("volatile-ttl".parse::<PolicyKind>().is_err());
}
