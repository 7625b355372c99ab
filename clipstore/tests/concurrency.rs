#[macro_use]
extern crate hamcrest;

use clipstore::{Identity, LockDiscipline, OpenOptions, Store, StoreConfig};
use futures::future::join_all;
use hamcrest::prelude::*;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn store(discipline: LockDiscipline) -> Arc<Store> {
    Store::new(StoreConfig {
        shard_bits: 1,
        initial_capacity: 16,
        lock_discipline: discipline,
        ..StoreConfig::default()
    })
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_writers_share_one_entry() {
    init_logging();
    let store = store(LockDiscipline::ReadWrite);
    let id = Identity::new(42);

    let tasks = (0..16u8).map(|n| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut session = store
                .open(id, OpenOptions::new().write(true).append(true))
                .await
                .unwrap();
            session.write(&[n; 4]).await.unwrap();
            session.close().await;
        })
    });
    for res in join_all(tasks).await {
        res.unwrap();
    }

    let contents = store.inspect(id, |e| e.contents().to_vec()).await.unwrap();
    assert_that!(contents.len(), is(equal_to(64)));
    // Appends never interleave: every 4-byte record is one writer's
    for record in contents.chunks(4) {
        assert!(record.iter().all(|&b| b == record[0]));
    }
    let mut seen: Vec<u8> = contents.chunks(4).map(|r| r[0]).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..16u8).collect::<Vec<_>>());
    assert_that!(store.stats(id).await.unwrap().writes, is(equal_to(16)));
}

async fn hammer(store: Arc<Store>) {
    let tasks = (0..8u32).map(|uid| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let id = Identity::new(uid);
            let mut session = store
                .open(id, OpenOptions::new().read(true).write(true))
                .await
                .unwrap();
            let payload = vec![u8::try_from(uid).unwrap(); 100 + uid as usize];
            for _ in 0..10 {
                session.write(&payload).await.unwrap();
            }
            session.seek(std::io::SeekFrom::Start(0)).unwrap();
            let mut buf = vec![0u8; 2000];
            let n = session.read(&mut buf).await.unwrap();
            session.close().await;
            (uid, buf[..n].to_vec())
        })
    });

    for res in join_all(tasks).await {
        let (uid, data) = res.unwrap();
        assert_that!(data.len(), is(equal_to(10 * (100 + uid as usize))));
        assert!(data.iter().all(|&b| u32::from(b) == uid));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identities_in_shared_shards_read_write() {
    init_logging();
    hammer(store(LockDiscipline::ReadWrite)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identities_in_shared_shards_exclusive() {
    init_logging();
    hammer(store(LockDiscipline::Exclusive)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_blocking_readers_see_one_write() {
    init_logging();
    let store = store(LockDiscipline::ReadWrite);
    let id = Identity::new(7);

    let mut readers = Vec::new();
    for _ in 0..5 {
        let mut session = store.open(id, OpenOptions::new().read(true)).await.unwrap();
        readers.push(tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = session.read_blocking(&mut buf).await.unwrap();
            buf[..n].to_vec()
        }));
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut writer = store.open(id, OpenOptions::new().write(true)).await.unwrap();
    writer.write(b"broadcast").await.unwrap();

    let results = tokio::time::timeout(std::time::Duration::from_secs(2), join_all(readers))
        .await
        .expect("every reader should wake");
    for res in results {
        assert_eq!(res.unwrap(), b"broadcast");
    }
}
