//! End-to-end decision scenarios against the public engine API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use brokerauth::{
    AccessLevel, AuthEngine, Backend, BackendSet, DecisionCache, ExtensionSlot, GraceWindow,
    ManualClock, MemoryStore, PrefixRouter, StaticLoader, Symbol, SymbolTable,
};

// =============================================================================
// Fixtures
// =============================================================================

struct Switchable {
    name: &'static str,
    grant: AtomicBool,
    calls: AtomicUsize,
}

impl Switchable {
    fn new(name: &'static str, grant: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            grant: AtomicBool::new(grant),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.grant.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for Switchable {
    fn name(&self) -> &str {
        self.name
    }

    async fn check_credential(&self, _username: &str, _password: &str) -> bool {
        self.answer()
    }

    async fn check_superuser(&self, _username: &str) -> bool {
        false
    }

    async fn check_acl(&self, _: &str, _: &str, _: &str, _: AccessLevel) -> bool {
        self.answer()
    }

    async fn shutdown(&self) {}
}

fn backends(list: &[&Arc<Switchable>]) -> BackendSet {
    let mut set = BackendSet::new();
    for backend in list {
        set.push(backend.name, Arc::clone(*backend) as Arc<dyn Backend>);
    }
    set
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn memory_cache(ttl_secs: u64) -> Option<DecisionCache> {
    Some(DecisionCache::new(
        Arc::new(MemoryStore::new()),
        Duration::from_secs(ttl_secs),
        Duration::from_secs(ttl_secs),
    ))
}

fn granting_extension() -> ExtensionSlot {
    let unit = SymbolTable::new()
        .with("Init", Symbol::init(|_, _| Ok(())))
        .with("GetName", Symbol::get_name(|| "custom".to_string()))
        .with("GetUser", Symbol::get_user(|_, _| true))
        .with("GetSuperuser", Symbol::get_superuser(|_| false))
        .with("CheckAcl", Symbol::check_acl(|_, _, _, _| true))
        .with("Halt", Symbol::halt(|| {}));
    let loader = StaticLoader::new().with("custom", Arc::new(unit));
    ExtensionSlot::load(&loader, Some("custom"), &Default::default(), Default::default())
}

// =============================================================================
// Grace Window
// =============================================================================

#[tokio::test]
async fn grace_window_grants_everything_until_deadline() {
    let deny = Switchable::new("files", false);
    let clock = Arc::new(ManualClock::default());
    let engine = AuthEngine::builder(backends(&[&deny]))
        .grace(GraceWindow::new(Duration::from_secs(60)))
        .clock(clock.clone())
        .build();

    assert!(engine.authenticate("anyone", "anything").await);
    clock.advance(time::Duration::seconds(30));
    assert!(engine.authorize("c1", "anyone", "a/b", AccessLevel::Write).await);
    assert_eq!(deny.calls(), 0);

    clock.advance(time::Duration::seconds(31));
    assert!(!engine.authenticate("anyone", "anything").await);
    assert!(!engine.authorize("c1", "anyone", "a/b", AccessLevel::Write).await);
    assert_eq!(deny.calls(), 2);
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn repeated_requests_are_answered_from_cache() {
    let grant = Switchable::new("files", true);
    let engine = AuthEngine::builder(backends(&[&grant]))
        .cache(memory_cache(30))
        .build();

    assert!(engine.authenticate("alice", "secret").await);
    assert!(engine.authenticate("alice", "secret").await);
    assert!(engine.authorize("c1", "alice", "a/b", AccessLevel::Read).await);
    assert!(engine.authorize("c1", "alice", "a/b", AccessLevel::Read).await);

    assert_eq!(grant.calls(), 2);
}

#[tokio::test]
async fn cached_grant_survives_backend_change_within_ttl() {
    let backend = Switchable::new("files", true);
    let engine = AuthEngine::builder(backends(&[&backend]))
        .cache(memory_cache(30))
        .build();

    assert!(engine.authenticate("alice", "secret").await);
    backend.grant.store(false, Ordering::SeqCst);
    assert!(engine.authenticate("alice", "secret").await);

    // A different password is a different fingerprint.
    assert!(!engine.authenticate("alice", "other").await);
}

#[tokio::test(start_paused = true)]
async fn cache_expiry_slides_on_reads() {
    let backend = Switchable::new("files", true);
    let engine = AuthEngine::builder(backends(&[&backend]))
        .cache(memory_cache(30))
        .build();

    assert!(engine.authenticate("alice", "secret").await);
    backend.grant.store(false, Ordering::SeqCst);

    tokio::time::advance(Duration::from_secs(25)).await;
    assert!(engine.authenticate("alice", "secret").await);
    tokio::time::advance(Duration::from_secs(25)).await;
    assert!(engine.authenticate("alice", "secret").await);
    assert_eq!(backend.calls(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!engine.authenticate("alice", "secret").await);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn denials_are_cached_too() {
    let backend = Switchable::new("files", false);
    let engine = AuthEngine::builder(backends(&[&backend]))
        .cache(memory_cache(30))
        .build();

    assert!(!engine.authorize("c1", "bob", "x", AccessLevel::Subscribe).await);
    backend.grant.store(true, Ordering::SeqCst);
    assert!(!engine.authorize("c1", "bob", "x", AccessLevel::Subscribe).await);
    assert!(engine.authorize("c1", "bob", "x", AccessLevel::Read).await);
}

// =============================================================================
// Ordered Iteration
// =============================================================================

#[tokio::test]
async fn later_backend_grants_after_earlier_denies() {
    let a = Switchable::new("a", false);
    let b = Switchable::new("b", true);
    let engine = AuthEngine::builder(backends(&[&a, &b])).build();

    assert!(engine.authenticate("alice", "pw").await);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn all_backends_deny() {
    let a = Switchable::new("a", false);
    let b = Switchable::new("b", false);
    let engine = AuthEngine::builder(backends(&[&a, &b])).build();

    assert!(!engine.authorize("c1", "alice", "t", AccessLevel::Read).await);
    assert_eq!(a.calls() + b.calls(), 2);
}

// =============================================================================
// Prefix Routing
// =============================================================================

#[tokio::test]
async fn prefix_routes_to_single_backend() {
    let a = Switchable::new("a", true);
    let b = Switchable::new("b", true);
    let router = PrefixRouter::from_lists(&names(&["a", "b"]), &names(&["web", "svc"]));
    let engine = AuthEngine::builder(backends(&[&a, &b]))
        .router(router)
        .build();

    assert!(engine.authenticate("svc_alice", "pw").await);
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn routed_denial_is_final() {
    let a = Switchable::new("a", true);
    let b = Switchable::new("b", false);
    let router = PrefixRouter::from_lists(&names(&["a", "b"]), &names(&["web", "svc"]));
    let engine = AuthEngine::builder(backends(&[&a, &b]))
        .router(router)
        .extension(granting_extension())
        .build();

    assert!(!engine.authenticate("svc_alice", "pw").await);
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn unmatched_prefix_walks_every_backend() {
    let a = Switchable::new("a", false);
    let b = Switchable::new("b", true);
    let router = PrefixRouter::from_lists(&names(&["a", "b"]), &names(&["web", "svc"]));
    let engine = AuthEngine::builder(backends(&[&a, &b]))
        .router(router)
        .build();

    assert!(engine.authenticate("iot_device", "pw").await);
    assert!(engine.authenticate("_svc", "pw").await);
    assert!(engine.authenticate("plain", "pw").await);
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 3);
}

#[tokio::test]
async fn mismatched_prefix_lists_disable_routing() {
    let a = Switchable::new("a", true);
    let b = Switchable::new("b", true);
    let router = PrefixRouter::from_lists(&names(&["a", "b"]), &names(&["web", "svc", "iot"]));
    assert!(router.is_none());

    let engine = AuthEngine::builder(backends(&[&a, &b]))
        .router(router)
        .build();
    assert!(!engine.routing_enabled());

    assert!(engine.authenticate("svc_alice", "pw").await);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn prefix_routed_to_absent_extension_denies() {
    let a = Switchable::new("a", true);
    let router = PrefixRouter::from_lists(&names(&["a", "plugin"]), &names(&["web", "ext"]));
    let engine = AuthEngine::builder(backends(&[&a]))
        .router(router)
        .build();

    assert!(!engine.authenticate("ext_alice", "pw").await);
    assert!(!engine.authorize("c1", "ext_alice", "t", AccessLevel::Read).await);
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn prefix_routed_to_extension() {
    let a = Switchable::new("a", false);
    let router = PrefixRouter::from_lists(&names(&["a", "plugin"]), &names(&["web", "ext"]));
    let engine = AuthEngine::builder(backends(&[&a]))
        .router(router)
        .extension(granting_extension())
        .build();

    assert!(engine.authenticate("ext_alice", "pw").await);
    assert!(engine.authorize("c1", "ext_alice", "t", AccessLevel::Write).await);
    assert_eq!(a.calls(), 0);
}

// =============================================================================
// Extension Fallback
// =============================================================================

#[tokio::test]
async fn extension_is_the_last_resort() {
    let a = Switchable::new("a", false);
    let engine = AuthEngine::builder(backends(&[&a]))
        .extension(granting_extension())
        .build();

    assert!(engine.authenticate("alice", "pw").await);
    assert!(engine.authorize("c1", "alice", "t", AccessLevel::Read).await);
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn no_extension_means_deny() {
    let a = Switchable::new("a", false);
    let engine = AuthEngine::builder(backends(&[&a])).build();

    assert!(!engine.extension().is_present());
    assert!(!engine.authenticate("alice", "pw").await);
}

#[tokio::test]
async fn concurrent_decisions_share_one_engine() {
    let a = Switchable::new("a", true);
    let engine = Arc::new(
        AuthEngine::builder(backends(&[&a]))
            .cache(memory_cache(30))
            .build(),
    );

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let user = format!("user{}", i % 4);
                engine.authenticate(&user, "pw").await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert!(a.calls() >= 4);
    assert!(a.calls() <= 16);
}
