//! Driver behaviour over the in-memory store with a virtual clock

use mcdriver::config::{ClearScope, DriverConfig};
use mcdriver::storage::{
    Expiry, ManualClock, MemoryStore, RawItem, Store, TYPE_BOOLEAN, TYPE_BYTES, TYPE_FLOAT,
    TYPE_INTEGER, TYPE_SERIALIZED,
};
use mcdriver::{CacheDriver, Lookup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const START: u64 = 1_700_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user_id: u64,
    roles: Vec<String>,
    remember: bool,
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        Self { clock, store }
    }

    fn driver(&self, instance: &str) -> CacheDriver<MemoryStore> {
        self.driver_with(DriverConfig {
            instance_id: instance.to_string(),
            ..DriverConfig::default()
        })
    }

    fn driver_with(&self, config: DriverConfig) -> CacheDriver<MemoryStore> {
        CacheDriver::new(self.store.clone(), config).with_clock(self.clock.clone())
    }
}

#[tokio::test]
async fn test_round_trip_falsy_and_structured_values() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.set("false", &false, 60).await);
    assert!(cache.set("zero", &0, 60).await);
    assert!(cache.set("empty-string", "", 60).await);
    assert!(cache.set("empty-list", &Vec::<String>::new(), 60).await);
    assert!(cache.set("nil", &None::<u32>, 60).await);

    assert_eq!(cache.get::<bool>("false").await, Lookup::Found(false));
    assert_eq!(cache.get::<i64>("zero").await, Lookup::Found(0));
    assert_eq!(cache.get::<String>("empty-string").await, Lookup::Found(String::new()));
    assert_eq!(cache.get::<Vec<String>>("empty-list").await, Lookup::Found(vec![]));
    assert_eq!(cache.get::<Option<u32>>("nil").await, Lookup::Found(None));

    let session = Session {
        user_id: 7,
        roles: vec!["admin".to_string()],
        remember: false,
    };
    assert!(cache.set("session", &session, 60).await);
    assert_eq!(cache.get::<Session>("session").await, Lookup::Found(session));
}

#[tokio::test]
async fn test_absent_and_false_are_distinct() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert_eq!(cache.get::<bool>("flag").await, Lookup::NotFound);

    assert!(cache.set("flag", &false, 60).await);
    assert_eq!(cache.get::<bool>("flag").await, Lookup::Found(false));

    assert_eq!(cache.metrics().get_misses.get(), 1);
    assert_eq!(cache.metrics().get_hits.get(), 1);
}

#[tokio::test]
async fn test_ttl_expiry() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.set("k", "v", 1).await);
    assert!(cache.get::<String>("k").await.is_found());

    h.clock.advance(1);
    assert_eq!(cache.get::<String>("k").await, Lookup::NotFound);
}

#[tokio::test]
async fn test_zero_and_negative_ttl_never_expire() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.set("zero", "v", 0).await);
    assert!(cache.set("negative", "v", -10).await);

    h.clock.advance(10 * 365 * 24 * 3600);
    assert!(cache.get::<String>("zero").await.is_found());
    assert!(cache.get::<String>("negative").await.is_found());
}

#[tokio::test]
async fn test_set_refreshes_value_and_ttl() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.set("k", &1, 10).await);
    h.clock.advance(8);
    assert!(cache.set("k", &2, 10).await);
    h.clock.advance(8);

    assert_eq!(cache.get::<i32>("k").await, Lookup::Found(2));

    // Rewriting with no TTL makes the entry permanent
    assert!(cache.set("k", &3, 0).await);
    h.clock.advance(1000);
    assert_eq!(cache.get::<i32>("k").await, Lookup::Found(3));
}

#[tokio::test]
async fn test_add_keeps_first_value() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.add("k", "v1", 60).await);
    assert!(!cache.add("k", "v2", 60).await);
    assert_eq!(cache.get::<String>("k").await, Lookup::Found("v1".to_string()));
}

#[tokio::test]
async fn test_add_after_expiry() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.add("lock", &1, 5).await);
    h.clock.advance(5);
    assert!(cache.add("lock", &2, 5).await);
    assert_eq!(cache.get::<i32>("lock").await, Lookup::Found(2));
}

#[tokio::test]
async fn test_add_is_encoded_like_set() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.add("added", &false, 0).await);
    assert!(cache.set("stored", &false, 0).await);

    let added = h.store.get(b"app:added").await.unwrap().unwrap();
    let stored = h.store.get(b"app:stored").await.unwrap().unwrap();
    assert_eq!(added, stored);
    assert_eq!(cache.get::<bool>("added").await, Lookup::Found(false));
}

#[tokio::test]
async fn test_delete() {
    let h = Harness::new();
    let cache = h.driver("app");

    assert!(cache.set("k", "v", 0).await);
    assert!(cache.delete("k").await);
    assert_eq!(cache.get::<String>("k").await, Lookup::NotFound);

    // Deleting again is a no-op success
    assert!(cache.delete("k").await);
}

#[tokio::test]
async fn test_namespace_isolation() {
    let h = Harness::new();
    let a = h.driver("app-a");
    let b = h.driver("app-b");

    assert!(a.set("config", "from-a", 0).await);
    assert_eq!(b.get::<String>("config").await, Lookup::NotFound);

    assert!(b.set("config", "from-b", 0).await);
    assert_eq!(a.get::<String>("config").await, Lookup::Found("from-a".to_string()));
    assert_eq!(b.get::<String>("config").await, Lookup::Found("from-b".to_string()));

    assert!(b.delete("config").await);
    assert_eq!(a.get::<String>("config").await, Lookup::Found("from-a".to_string()));

    // add under one namespace is not blocked by the other
    assert!(b.add("config", "again", 0).await);
}

#[tokio::test]
async fn test_global_clear_wipes_every_namespace() {
    let h = Harness::new();
    let a = h.driver("app-a");
    let b = h.driver("app-b");

    assert!(a.set("k", &1, 0).await);
    assert!(b.set("k", &2, 0).await);
    h.store
        .set(b"foreign-key", RawItem::new(TYPE_BYTES, "x"), Expiry::Never)
        .await
        .unwrap();

    assert!(a.clear().await);

    assert_eq!(a.get::<i32>("k").await, Lookup::NotFound);
    assert_eq!(b.get::<i32>("k").await, Lookup::NotFound);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_namespace_clear_is_contained() {
    let h = Harness::new();
    let scoped = |instance: &str| {
        h.driver_with(DriverConfig {
            instance_id: instance.to_string(),
            clear_scope: ClearScope::Namespace,
            ..DriverConfig::default()
        })
    };
    let a = scoped("app-a");
    let b = scoped("app-b");

    assert!(a.set("k", &1, 0).await);
    assert!(b.set("k", &2, 0).await);

    assert!(a.clear().await);

    assert_eq!(a.get::<i32>("k").await, Lookup::NotFound);
    assert_eq!(b.get::<i32>("k").await, Lookup::Found(2));

    // The cleared namespace is usable again right away
    assert!(a.add("k", &3, 0).await);
    assert_eq!(a.get::<i32>("k").await, Lookup::Found(3));
}

#[tokio::test]
async fn test_namespace_clear_seen_by_other_handles() {
    let h = Harness::new();
    let config = DriverConfig {
        instance_id: "app".to_string(),
        clear_scope: ClearScope::Namespace,
        ..DriverConfig::default()
    };
    let worker_1 = h.driver_with(config.clone());
    let worker_2 = h.driver_with(config);

    assert!(worker_1.set("k", "v", 0).await);
    assert!(worker_2.get::<String>("k").await.is_found());

    assert!(worker_2.clear().await);
    assert_eq!(worker_1.get::<String>("k").await, Lookup::NotFound);
}

#[tokio::test]
async fn test_raw_scalars_read_as_miss() {
    let h = Harness::new();
    let cache = h.driver("app");

    for (key, flags, data) in [
        ("bool", TYPE_BOOLEAN, "1"),
        ("int", TYPE_INTEGER, "42"),
        ("float", TYPE_FLOAT, "1.5"),
    ] {
        let nkey = format!("app:{key}");
        h.store
            .set(nkey.as_bytes(), RawItem::new(flags, data), Expiry::Never)
            .await
            .unwrap();
        assert_eq!(cache.get::<serde_json::Value>(key).await, Lookup::NotFound);
    }
}

#[tokio::test]
async fn test_corrupt_and_foreign_payloads_read_as_miss() {
    let h = Harness::new();
    let cache = h.driver("app");

    h.store
        .set(b"app:corrupt", RawItem::new(TYPE_SERIALIZED, "{\"user_id\":"), Expiry::Never)
        .await
        .unwrap();
    h.store
        .set(b"app:plain", RawItem::new(TYPE_BYTES, "\"text\""), Expiry::Never)
        .await
        .unwrap();

    assert_eq!(cache.get::<Session>("corrupt").await, Lookup::NotFound);
    assert_eq!(cache.get::<String>("plain").await, Lookup::NotFound);
    assert_eq!(cache.metrics().decode_errors.get(), 2);

    // Wrong type for the stored value is also a miss
    assert!(cache.set("number", &5, 0).await);
    assert_eq!(cache.get::<Session>("number").await, Lookup::NotFound);
}

#[tokio::test]
async fn test_compressed_values() {
    let h = Harness::new();
    let cache = h.driver_with(DriverConfig {
        instance_id: "app".to_string(),
        compress_threshold: 128,
        ..DriverConfig::default()
    });

    let big: Vec<String> = (0..100).map(|i| format!("item-{i}")).collect();
    assert!(cache.set("big", &big, 0).await);

    let raw = h.store.get(b"app:big").await.unwrap().unwrap();
    assert!(raw.is_compressed());
    assert_eq!(cache.get::<Vec<String>>("big").await, Lookup::Found(big));

    // Small values stay uncompressed
    assert!(cache.set("small", &false, 0).await);
    assert!(!h.store.get(b"app:small").await.unwrap().unwrap().is_compressed());
}

#[tokio::test]
async fn test_oversized_inflated_entry_reads_as_miss() {
    let h = Harness::new();
    let writer = h.driver_with(DriverConfig {
        instance_id: "app".to_string(),
        compress_threshold: 64,
        ..DriverConfig::default()
    });
    let reader = h.driver_with(DriverConfig {
        instance_id: "app".to_string(),
        max_decoded_size: 4096,
        ..DriverConfig::default()
    });

    let bomb = "z".repeat(100_000);
    assert!(writer.set("bomb", &bomb, 0).await);
    assert!(h.store.get(b"app:bomb").await.unwrap().unwrap().data.len() < 4096);

    assert_eq!(reader.get::<String>("bomb").await, Lookup::NotFound);
    assert_eq!(reader.metrics().decode_errors.get(), 1);
    assert_eq!(writer.get::<String>("bomb").await, Lookup::Found(bomb));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_store() {
    let h = Harness::new();
    let cache = Arc::new(h.driver("app"));

    let mut handles = Vec::new();
    for worker in 0..8u32 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            for i in 0..25u32 {
                let key = format!("w{worker}:{i}");
                assert!(cache.set(&key, &(worker * 100 + i), 0).await);
                assert_eq!(cache.get::<u32>(&key).await, Lookup::Found(worker * 100 + i));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.store.len(), 200);
    assert_eq!(cache.metrics().cmd_set.get(), 200);
}
