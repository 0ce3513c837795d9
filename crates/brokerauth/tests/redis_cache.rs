//! Redis cache store against a real server.
//!
//! Tests use testcontainers to spin up a Redis instance and need Docker:
//! `cargo test -p brokerauth --test redis_cache -- --ignored`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use brokerauth::{
    AccessLevel, AuthEngine, Backend, BackendSet, CacheSettings, CacheStore, DecisionCache,
    RedisStore,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

async fn redis_settings(db: i64) -> CacheSettings {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, port)
        })
        .await;

    CacheSettings {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port: *port,
        db,
        ..CacheSettings::default()
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn redis_store_set_get_expire() {
    let store = RedisStore::from_settings(&redis_settings(1).await).unwrap();
    store.ping().await.unwrap();

    store.set("k", "true", Duration::from_secs(2)).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("true"));

    store.expire("k", Duration::from_secs(10)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("true"));

    store.flush_all().await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn redis_entries_expire() {
    let store = RedisStore::from_settings(&redis_settings(2).await).unwrap();

    store.set("short", "false", Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.get("short").await.unwrap(), None);
}

struct Counting(AtomicUsize);

#[async_trait]
impl Backend for Counting {
    fn name(&self) -> &str {
        "counting"
    }
    async fn check_credential(&self, _: &str, _: &str) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
    async fn check_superuser(&self, _: &str) -> bool {
        false
    }
    async fn check_acl(&self, _: &str, _: &str, _: &str, _: AccessLevel) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
    async fn shutdown(&self) {}
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn engines_share_decisions_through_redis() {
    let settings = redis_settings(3).await;
    let first = Arc::new(Counting(AtomicUsize::new(0)));
    let second = Arc::new(Counting(AtomicUsize::new(0)));

    let engine_for = |backend: &Arc<Counting>| {
        let mut set = BackendSet::new();
        set.push("counting", Arc::clone(backend) as Arc<dyn Backend>);
        let store: Arc<dyn CacheStore> = Arc::new(RedisStore::from_settings(&settings).unwrap());
        AuthEngine::builder(set)
            .cache(Some(DecisionCache::new(
                store,
                Duration::from_secs(30),
                Duration::from_secs(30),
            )))
            .build()
    };

    let a = engine_for(&first);
    let b = engine_for(&second);

    assert!(a.authorize("c1", "alice", "a/b", AccessLevel::Read).await);
    assert!(b.authorize("c1", "alice", "a/b", AccessLevel::Read).await);

    assert_eq!(first.0.load(Ordering::SeqCst), 1);
    assert_eq!(second.0.load(Ordering::SeqCst), 0);

    a.shutdown().await;
    b.shutdown().await;
}
