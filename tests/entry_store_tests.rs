//! Entry store linkage through the public pool and transaction API

use rustpmemkv::storage::entries;
use rustpmemkv::{ChainKind, Direction, Handle, PmemError, PmemPool, PoolOptions};

fn insert(pool: &mut PmemPool, key: &str, value: &str) -> Handle {
    pool.transaction(|tx| {
        let key = tx.alloc_bytes(key.as_bytes())?;
        let value = tx.alloc_bytes(value.as_bytes())?;
        entries::insert_front(tx, key, value)
    })
    .unwrap()
}

fn keys(pool: &PmemPool, direction: Direction) -> Vec<String> {
    entries::iterate(pool, direction)
        .map(|node| {
            let (key, _) = entries::read_pair(pool, node).unwrap();
            String::from_utf8(key.to_vec()).unwrap()
        })
        .collect()
}

fn populate(keys: &[&str]) -> (PmemPool, Vec<Handle>) {
    let mut pool = PmemPool::in_memory(PoolOptions::default());
    let handles = keys.iter().map(|key| insert(&mut pool, key, "v")).collect();
    (pool, handles)
}

#[test]
fn test_insert_links_newest_first() {
    let (pool, handles) = populate(&["a", "b", "c"]);

    assert_eq!(keys(&pool, Direction::Forward), vec!["c", "b", "a"]);
    assert_eq!(keys(&pool, Direction::Backward), vec!["a", "b", "c"]);
    assert_eq!(pool.root().entry_count, 3);
    assert_eq!(pool.root().entry_first, Some(handles[2]));
    assert_eq!(pool.root().entry_last, Some(handles[0]));

    let head = pool.entry(handles[2]).unwrap();
    assert_eq!(head.prev, None);
    assert_eq!(head.chain, ChainKind::Entries);
}

#[test]
fn test_unlink_sole_node() {
    let (mut pool, handles) = populate(&["a"]);
    pool.transaction(|tx| entries::unlink_and_free(tx, handles[0]))
        .unwrap();

    assert_eq!(pool.root().entry_first, None);
    assert_eq!(pool.root().entry_last, None);
    assert_eq!(pool.root().entry_count, 0);
    assert_eq!(pool.stats().live_objects, 0);
}

#[test]
fn test_unlink_head_tail_and_interior() {
    let (mut pool, handles) = populate(&["a", "b", "c", "d", "e"]);
    // Chain: e d c b a

    pool.transaction(|tx| entries::unlink_and_free(tx, handles[4]))
        .unwrap();
    assert_eq!(keys(&pool, Direction::Forward), vec!["d", "c", "b", "a"]);
    assert_eq!(pool.entry(handles[3]).unwrap().prev, None);

    pool.transaction(|tx| entries::unlink_and_free(tx, handles[0]))
        .unwrap();
    assert_eq!(keys(&pool, Direction::Forward), vec!["d", "c", "b"]);
    assert_eq!(pool.root().entry_last, Some(handles[1]));
    assert_eq!(pool.entry(handles[1]).unwrap().next, None);

    pool.transaction(|tx| entries::unlink_and_free(tx, handles[2]))
        .unwrap();
    assert_eq!(keys(&pool, Direction::Forward), vec!["d", "b"]);
    assert_eq!(keys(&pool, Direction::Backward), vec!["b", "d"]);
    assert_eq!(pool.root().entry_count, 2);
    assert!(matches!(
        pool.entry(handles[2]),
        Err(PmemError::InvalidHandle(_))
    ));
}

#[test]
fn test_update_value_keeps_position() {
    let (mut pool, handles) = populate(&["a", "b"]);
    let old = pool
        .transaction(|tx| {
            let new_value = tx.alloc_bytes(b"fresh")?;
            let old = entries::update_value(tx, handles[0], new_value)?;
            tx.free(old)?;
            Ok(old)
        })
        .unwrap();

    assert!(pool.bytes(old).is_err());
    assert_eq!(keys(&pool, Direction::Forward), vec!["b", "a"]);
    let (_, value) = entries::read_pair(&pool, handles[0]).unwrap();
    assert_eq!(value, b"fresh");
}

#[test]
fn test_promote_moves_tail_to_head() {
    let (mut pool, handles) = populate(&["a", "b", "c"]);
    pool.transaction(|tx| entries::promote(tx, handles[0]))
        .unwrap();

    assert_eq!(keys(&pool, Direction::Forward), vec!["a", "c", "b"]);
    assert_eq!(pool.root().entry_last, Some(handles[1]));
    assert_eq!(pool.root().entry_count, 3);
}

#[test]
fn test_iteration_is_restartable() {
    let (pool, _) = populate(&["a", "b"]);
    let first: Vec<_> = entries::iterate(&pool, Direction::Forward).collect();
    let second: Vec<_> = entries::iterate(&pool, Direction::Forward).collect();
    assert_eq!(first, second);

    let empty = PmemPool::in_memory(PoolOptions::default());
    assert_eq!(entries::iterate(&empty, Direction::Backward).count(), 0);
}

#[test]
fn test_unlink_of_foreign_handle_aborts() {
    let (mut pool, _) = populate(&["a"]);
    let (_, foreign) = populate(&["x"]);

    let err = pool
        .transaction(|tx| entries::unlink_and_free(tx, foreign[0]))
        .unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(pool.root().entry_count, 1);
}
