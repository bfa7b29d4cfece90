//! Session pool caching and idle expiry

mod common;

use common::Fixture;
use dsvn_client::{pool, ClientOptions, SessionPool};
use dsvn_ra::{Canceller, DebugSink, RepoUrl, Result, Session, SessionFactory, SvnError};
use parking_lot::Mutex;
use dsvn_repos::LocalSessionFactory;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CountingFactory {
    inner: LocalSessionFactory,
    opened: AtomicUsize,
}

impl SessionFactory for CountingFactory {
    fn open(&self, url: &RepoUrl) -> Result<Box<dyn Session>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open(url)
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<String>>);

impl DebugSink for RecordingSink {
    fn record(&self, _session: &str, message: &str) {
        self.0.lock().push(message.to_string());
    }
}

struct AlwaysCancelled;

impl Canceller for AlwaysCancelled {
    fn check_cancelled(&self) -> Result<()> {
        Err(SvnError::cancelled())
    }
}

fn log_all(session: &mut dyn Session) -> Result<()> {
    session.log(&[], 7, 1, false, &mut |_| Ok(()))
}

fn pool_with(options: &ClientOptions) -> (SessionPool, Arc<CountingFactory>) {
    let factory = Arc::new(CountingFactory::default());
    (SessionPool::new(factory.clone(), options), factory)
}

#[test]
fn test_released_session_is_reused() {
    let fx = Fixture::new();
    let (pool, factory) = pool_with(&ClientOptions::default());

    {
        let mut lease = pool.acquire(&fx.url("trunk"), true).unwrap();
        assert!(lease.is_pooled());
        assert_eq!(lease.latest_revision().unwrap(), 7);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.cached_count(), 1);
    }
    assert_eq!(pool.idle_count(), 1);

    let lease = pool.acquire(&fx.url("branches/b"), true).unwrap();
    assert_eq!(lease.url(), &fx.url("branches/b"));
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
}

#[test]
fn test_one_cached_session_per_scheme() {
    let fx = Fixture::new();
    let (pool, factory) = pool_with(&ClientOptions::default());

    let first = pool.acquire(&fx.url("trunk"), true).unwrap();
    let second = pool.acquire(&fx.url("trunk"), true).unwrap();
    assert!(first.is_pooled());
    assert!(!second.is_pooled());
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);

    drop(second);
    assert_eq!(pool.idle_count(), 0);
    drop(first);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.cached_count(), 1);
}

#[test]
fn test_fresh_session_when_reuse_not_allowed() {
    let fx = Fixture::new();
    let (pool, factory) = pool_with(&ClientOptions::default());
    drop(pool.acquire(&fx.url("trunk"), true).unwrap());

    let lease = pool.acquire(&fx.url("trunk"), false).unwrap();
    assert!(!lease.is_pooled());
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_idle_session_expires_after_timeout() {
    let fx = Fixture::new();
    let options = ClientOptions {
        idle_timeout_secs: 5,
        ..ClientOptions::default()
    };
    let (pool, _factory) = pool_with(&options);
    drop(pool.acquire(&fx.url("trunk"), true).unwrap());
    let released = Instant::now();

    assert_eq!(pool.sweep_idle_at(released), 0);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.sweep_idle_at(released + Duration::from_secs(7)), 1);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.cached_count(), 0);
}

#[test]
fn test_leased_sessions_are_not_swept() {
    let fx = Fixture::new();
    let (pool, _factory) = pool_with(&ClientOptions::default());
    let _lease = pool.acquire(&fx.url("trunk"), true).unwrap();
    assert_eq!(pool.sweep_idle_at(Instant::now() + Duration::from_secs(3600)), 0);
    assert_eq!(pool.cached_count(), 1);
}

#[test]
fn test_reacquire_returns_idle_session() {
    let fx = Fixture::new();
    let (pool, factory) = pool_with(&ClientOptions::default());
    assert!(pool.reacquire(&fx.url("trunk")).is_none());

    drop(pool.acquire(&fx.url("trunk"), true).unwrap());
    let lease = pool.reacquire(&fx.url("trunk/lib")).unwrap();
    assert_eq!(lease.url(), &fx.url("trunk/lib"));
    assert!(pool.reacquire(&fx.url("trunk")).is_none());
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispose_closes_everything() {
    let fx = Fixture::new();
    let (pool, factory) = pool_with(&ClientOptions::default());
    drop(pool.acquire(&fx.url("trunk"), true).unwrap());
    assert!(pool::sweep_running());
    assert!(pool::live_pools() >= 1);

    pool.dispose();
    assert!(pool.is_disposed());
    assert_eq!(pool.cached_count(), 0);
    pool.dispose();

    // still usable, just uncached
    let lease = pool.acquire(&fx.url("trunk"), true).unwrap();
    assert!(!lease.is_pooled());
    drop(lease);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
}

#[test]
fn test_pooling_disabled() {
    let fx = Fixture::new();
    let options = ClientOptions {
        pool_sessions: false,
        ..ClientOptions::default()
    };
    let (pool, factory) = pool_with(&options);
    drop(pool.acquire(&fx.url("trunk"), true).unwrap());
    drop(pool.acquire(&fx.url("trunk"), true).unwrap());
    assert_eq!(pool.cached_count(), 0);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_open_leaves_no_slot() {
    let fx = Fixture::new();
    let (pool, _factory) = pool_with(&ClientOptions::default());
    let missing = common::file_url(&fx.path("no-repo"));
    assert!(pool.acquire(&missing, true).is_err());
    assert_eq!(pool.cached_count(), 0);
}

#[test]
fn test_setters_reach_leased_sessions() {
    let fx = Fixture::new();
    let (pool, _factory) = pool_with(&ClientOptions::default());
    let mut lease = pool.acquire(&fx.url("trunk"), true).unwrap();

    let sink = Arc::new(RecordingSink::default());
    pool.set_debug_sink(Some(sink.clone()));
    lease.reparent(&fx.url("trunk/lib")).unwrap();
    assert!(sink.0.lock().iter().any(|m| m.starts_with("reparent")));

    pool.set_canceller(Some(Arc::new(AlwaysCancelled)));
    assert!(log_all(&mut *lease).unwrap_err().is_cancelled());
    pool.set_canceller(None);
    assert!(log_all(&mut *lease).is_ok());
}

#[test]
fn test_setters_reach_idle_sessions() {
    let fx = Fixture::new();
    let (pool, factory) = pool_with(&ClientOptions::default());
    drop(pool.acquire(&fx.url("trunk"), true).unwrap());

    pool.set_canceller(Some(Arc::new(AlwaysCancelled)));
    let mut lease = pool.acquire(&fx.url("trunk"), true).unwrap();
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    assert!(log_all(&mut *lease).unwrap_err().is_cancelled());
}
