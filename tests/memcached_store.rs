//! Memcached store and driver over a scripted fake server
//!
//! Each accepted connection plays one script of (request, reply) exchanges.
//! The server asserts the exact bytes it receives, so these tests pin down the
//! wire format. An empty reply makes the server go silent until the client
//! hangs up.

use mcdriver::config::{DriverConfig, StoreConfig};
use mcdriver::storage::{CasOutcome, Expiry, ManualClock, MemcachedStore, RawItem, Store};
use mcdriver::{CacheDriver, DriverError, Lookup, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const NOW: u64 = 1_700_000_000;

type Exchange = (&'static str, &'static str);

const HELLO: Exchange = ("version\r\n", "VERSION 1.6.21\r\n");

async fn fake_server(scripts: Vec<Vec<Exchange>>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let handle = tokio::spawn(async move {
        for script in scripts {
            let (mut socket, _) = listener.accept().await.unwrap();
            for (request, reply) in script {
                let mut got = vec![0u8; request.len()];
                socket.read_exact(&mut got).await.unwrap();
                assert_eq!(String::from_utf8_lossy(&got), request);
                if reply.is_empty() {
                    break;
                }
                socket.write_all(reply.as_bytes()).await.unwrap();
            }

            // Nothing else may arrive before the client hangs up
            let mut rest = Vec::new();
            socket.read_to_end(&mut rest).await.unwrap_or_default();
            assert!(
                rest.is_empty(),
                "unexpected trailing request: {:?}",
                String::from_utf8_lossy(&rest)
            );
        }
    });

    (addr, handle)
}

fn store_config(addr: String) -> StoreConfig {
    StoreConfig {
        addr,
        connect_timeout_ms: 500,
        operation_timeout_ms: 200,
        ..StoreConfig::default()
    }
}

async fn driver(addr: String) -> CacheDriver<MemcachedStore> {
    let store = MemcachedStore::connect(store_config(addr)).await.unwrap();
    let config = DriverConfig {
        instance_id: "app".to_string(),
        ..DriverConfig::default()
    };
    CacheDriver::new(Arc::new(store), config).with_clock(Arc::new(ManualClock::new(NOW)))
}

#[tokio::test]
async fn test_connect_probes_version() {
    let (addr, server) = fake_server(vec![vec![HELLO, HELLO]]).await;

    let store = MemcachedStore::connect(store_config(addr)).await.unwrap();
    assert_eq!(store.version().await.unwrap(), "1.6.21");

    drop(store);
    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = MemcachedStore::connect(store_config(addr.clone()))
        .await
        .unwrap_err();
    match err {
        DriverError::Connect { addr: failed, .. } => assert_eq!(failed, addr),
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_rejects_non_memcached_server() {
    let (addr, server) = fake_server(vec![vec![(
        "version\r\n",
        "HTTP/1.1 400 Bad Request\r\n",
    )]])
    .await;

    let err = MemcachedStore::connect(store_config(addr)).await.unwrap_err();
    assert!(matches!(err, DriverError::Connect { .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn test_set_and_get_wire_format() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("set app:flag 4 0 5\r\nfalse\r\n", "STORED\r\n"),
        ("get app:flag\r\n", "VALUE app:flag 4 5\r\nfalse\r\nEND\r\n"),
        ("get app:missing\r\n", "END\r\n"),
        ("set app:session 4 1700000060 2\r\n{}\r\n", "STORED\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    assert!(cache.set("flag", &false, 0).await);
    assert_eq!(cache.get::<bool>("flag").await, Lookup::Found(false));
    assert_eq!(cache.get::<bool>("missing").await, Lookup::NotFound);
    assert!(cache.set("session", &serde_json::json!({}), 60).await);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_scalar_flags_read_as_miss() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("get app:counter\r\n", "VALUE app:counter 1 2\r\n42\r\nEND\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    assert_eq!(cache.get::<i64>("counter").await, Lookup::NotFound);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_add_delete_and_clear_replies() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("add app:lock 4 0 1\r\n1\r\n", "NOT_STORED\r\n"),
        ("delete app:lock\r\n", "NOT_FOUND\r\n"),
        ("delete app:lock\r\n", "DELETED\r\n"),
        ("flush_all\r\n", "OK\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    assert!(!cache.add("lock", &1, 0).await);
    assert!(cache.delete("lock").await);
    assert!(cache.delete("lock").await);
    assert!(cache.clear().await);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_compare_set_uses_cas_token() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("gets app:k\r\n", "VALUE app:k 4 1 42\r\n1\r\nEND\r\n"),
        ("cas app:k 4 0 1 42\r\n2\r\n", "EXISTS\r\n"),
        ("gets app:k\r\n", "VALUE app:k 4 1 43\r\n3\r\nEND\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    // Someone else wrote between gets and cas
    assert!(!cache.compare_set("k", Some(&1), &2, 0).await);
    assert_eq!(cache.metrics().cas_conflicts.get(), 1);

    // Value no longer matches: no write is attempted
    assert!(!cache.compare_set("k", Some(&1), &2, 0).await);
    assert_eq!(cache.metrics().compare_mismatches.get(), 1);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_compare_delete_expires_with_cas() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("gets app:k\r\n", "VALUE app:k 4 1 7\r\n5\r\nEND\r\n"),
        ("cas app:k 4 -1 1 7\r\n5\r\n", "STORED\r\n"),
        ("gets app:k\r\n", "END\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    assert!(cache.compare_delete("k", &5).await);
    assert!(!cache.compare_delete("k", &5).await);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_compare_set_absent_uses_add() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("add app:k 4 0 6\r\n\"init\"\r\n", "STORED\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    assert!(cache.compare_set("k", None, &"init".to_string(), 0).await);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_timeout_reads_as_miss_and_reconnects() {
    let (addr, server) = fake_server(vec![
        vec![HELLO, ("get app:slow\r\n", "")],
        vec![("get app:k\r\n", "VALUE app:k 4 4\r\ntrue\r\nEND\r\n")],
    ])
    .await;
    let cache = driver(addr).await;

    assert_eq!(cache.get::<bool>("slow").await, Lookup::NotFound);
    assert_eq!(cache.metrics().store_errors.get(), 1);

    assert_eq!(cache.get::<bool>("k").await, Lookup::Found(true));

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_error_keeps_connection() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        (
            "set app:big 4 0 4\r\nnull\r\n",
            "SERVER_ERROR object too large for cache\r\n",
        ),
        ("set app:big 4 0 4\r\nnull\r\n", "STORED\r\n"),
    ]])
    .await;
    let cache = driver(addr).await;

    assert!(!cache.set("big", &(), 0).await);
    assert!(cache.set("big", &(), 0).await);

    drop(cache);
    server.await.unwrap();
}

#[tokio::test]
async fn test_store_trait_replies() {
    let (addr, server) = fake_server(vec![vec![
        HELLO,
        ("cas app:k 0 0 1 9\r\nx\r\n", "NOT_FOUND\r\n"),
        ("get app:k\r\n", "ERROR\r\n"),
    ]])
    .await;
    let store = MemcachedStore::connect(store_config(addr)).await.unwrap();

    let outcome = store
        .cas(b"app:k", RawItem::new(0, "x"), Expiry::Never, 9)
        .await
        .unwrap();
    assert_eq!(outcome, CasOutcome::NotFound);
    assert!(matches!(
        store.get(b"app:k").await,
        Err(StoreError::Client(_))
    ));

    drop(store);
    server.await.unwrap();
}

#[tokio::test]
async fn test_invalid_key_never_reaches_the_wire() {
    let (addr, server) = fake_server(vec![vec![HELLO]]).await;
    let cache = driver(addr).await;

    assert!(!cache.set("has space", &1, 0).await);
    assert_eq!(cache.get::<i32>("has space").await, Lookup::NotFound);
    assert_eq!(cache.metrics().store_errors.get(), 2);

    drop(cache);
    server.await.unwrap();
}

/// Answers `set` late and `add` with NOT_STORED, on every connection
async fn slow_set_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let reply: &[u8] = if line.starts_with("version") {
                        b"VERSION 1.6.21\r\n"
                    } else if line.starts_with("set ") {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        b"STORED\r\n"
                    } else if line.starts_with("add ") {
                        b"NOT_STORED\r\n"
                    } else {
                        // data block
                        continue;
                    };
                    if write.write_all(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_cancelled_request_does_not_leak_its_reply() {
    let addr = slow_set_server().await;
    let store = MemcachedStore::connect(store_config(addr)).await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        store.set(b"k", RawItem::new(0, "x"), Expiry::Never),
    )
    .await;
    assert!(abandoned.is_err());

    // The late STORED for the abandoned set must not answer this add
    let added = store
        .add(b"k", RawItem::new(0, "x"), Expiry::Never)
        .await
        .unwrap();
    assert!(!added);

    let added_again = store
        .add(b"k", RawItem::new(0, "x"), Expiry::Never)
        .await
        .unwrap();
    assert!(!added_again);
}
