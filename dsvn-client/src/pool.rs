//! Repository session pool
//!
//! At most one session per URL scheme is cached. A leased session is marked
//! active; a second request for the same scheme while it is out gets a fresh
//! session that is closed when released. Released sessions go idle and are
//! closed by a shared background sweep once they have been idle strictly
//! longer than the pool's timeout.
//!
//! Sessions get forwarding collaborators that read the pool's current
//! authenticator, canceller and debug sink, so a setter reaches leased and
//! idle sessions alike.
//!
//! All live pools of a process share one sweep thread. The thread is started
//! by the first pool and stopped when the last pool is disposed.

use crate::options::ClientOptions;
use dsvn_ra::{
    Authenticator, Canceller, Credentials, DebugSink, RepoUrl, Result, Session, SessionFactory,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

enum Slot {
    /// Leased out
    Active,
    Idle {
        session: Box<dyn Session>,
        since: Instant,
    },
}

#[derive(Default)]
struct PoolState {
    cache: HashMap<String, Slot>,
    disposed: bool,
}

/// Current collaborators of a pool
#[derive(Default)]
struct Collaborators {
    authenticator: RwLock<Option<Arc<dyn Authenticator>>>,
    canceller: RwLock<Option<Arc<dyn Canceller>>>,
    debug: RwLock<Option<Arc<dyn DebugSink>>>,
}

impl Collaborators {
    fn attach(self: &Arc<Self>, session: &mut dyn Session) {
        session.set_authenticator(Some(Arc::new(SharedAuthenticator(self.clone()))));
        session.set_canceller(Some(Arc::new(SharedCanceller(self.clone()))));
        session.set_debug_sink(Some(Arc::new(SharedDebugSink(self.clone()))));
    }
}

struct SharedAuthenticator(Arc<Collaborators>);

impl Authenticator for SharedAuthenticator {
    fn credentials(&self, realm: &str) -> Option<Credentials> {
        let current = self.0.authenticator.read().clone();
        current.and_then(|a| a.credentials(realm))
    }
}

struct SharedCanceller(Arc<Collaborators>);

impl Canceller for SharedCanceller {
    fn check_cancelled(&self) -> Result<()> {
        let current = self.0.canceller.read().clone();
        match current {
            Some(canceller) => canceller.check_cancelled(),
            None => Ok(()),
        }
    }
}

struct SharedDebugSink(Arc<Collaborators>);

impl DebugSink for SharedDebugSink {
    fn record(&self, session: &str, message: &str) {
        let current = self.0.debug.read().clone();
        if let Some(sink) = current {
            sink.record(session, message);
        }
    }
}

struct PoolInner {
    factory: Arc<dyn SessionFactory>,
    idle_timeout: Duration,
    pooling: bool,
    state: Mutex<PoolState>,
    collaborators: Arc<Collaborators>,
}

/// Pool of repository sessions keyed by URL scheme
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, options: &ClientOptions) -> Self {
        let inner = Arc::new(PoolInner {
            factory,
            idle_timeout: options.idle_timeout(),
            pooling: options.pool_sessions,
            state: Mutex::new(PoolState::default()),
            collaborators: Arc::new(Collaborators::default()),
        });
        if inner.pooling {
            register(&inner, options.sweep_interval());
        }
        Self { inner }
    }

    /// Lease a session bound to `url`. With `may_reuse`, an idle cached
    /// session of the same scheme is reparented and handed out.
    pub fn acquire(&self, url: &RepoUrl, may_reuse: bool) -> Result<SessionLease> {
        let scheme = url.scheme().to_string();
        let inner = &self.inner;
        let (reused, cached) = {
            let mut state = inner.state.lock();
            if !inner.pooling || !may_reuse || state.disposed {
                (None, false)
            } else {
                match state.cache.remove(&scheme) {
                    Some(Slot::Idle { session, .. }) => {
                        state.cache.insert(scheme.clone(), Slot::Active);
                        (Some(session), true)
                    }
                    Some(Slot::Active) => {
                        state.cache.insert(scheme.clone(), Slot::Active);
                        (None, false)
                    }
                    None => {
                        state.cache.insert(scheme.clone(), Slot::Active);
                        (None, true)
                    }
                }
            }
        };

        if let Some(mut session) = reused {
            match session.reparent(url) {
                Ok(()) => {
                    metrics::counter!("dsvn_pool_sessions_reused_total").increment(1);
                    tracing::debug!("Reusing pooled {} session for {}", scheme, url);
                    return Ok(self.lease(session, scheme, true));
                }
                Err(e) => {
                    tracing::debug!("Pooled session cannot reach {}: {}", url, e);
                    close_quietly(session);
                }
            }
        }

        match self.open(url) {
            Ok(session) => Ok(self.lease(session, scheme, cached)),
            Err(e) => {
                if cached {
                    let mut state = inner.state.lock();
                    if matches!(state.cache.get(&scheme), Some(Slot::Active)) {
                        state.cache.remove(&scheme);
                    }
                }
                Err(e)
            }
        }
    }

    /// Idle session for `url`'s scheme, if one can be rebound to `url`
    pub fn reacquire(&self, url: &RepoUrl) -> Option<SessionLease> {
        let scheme = url.scheme().to_string();
        let mut session = {
            let mut state = self.inner.state.lock();
            match state.cache.remove(&scheme) {
                Some(Slot::Idle { session, .. }) => {
                    state.cache.insert(scheme.clone(), Slot::Active);
                    session
                }
                Some(other) => {
                    state.cache.insert(scheme, other);
                    return None;
                }
                None => return None,
            }
        };
        match session.reparent(url) {
            Ok(()) => Some(self.lease(session, scheme, true)),
            Err(e) => {
                tracing::debug!("Idle session cannot reach {}: {}", url, e);
                self.inner.state.lock().cache.remove(&scheme);
                close_quietly(session);
                None
            }
        }
    }

    fn open(&self, url: &RepoUrl) -> Result<Box<dyn Session>> {
        let mut session = self.inner.factory.open(url)?;
        self.inner.collaborators.attach(session.as_mut());
        metrics::counter!("dsvn_pool_sessions_opened_total").increment(1);
        tracing::debug!("Opened session for {}", url);
        Ok(session)
    }

    fn lease(&self, session: Box<dyn Session>, scheme: String, cached: bool) -> SessionLease {
        SessionLease {
            session: Some(session),
            pool: cached.then(|| Arc::downgrade(&self.inner)),
            scheme,
        }
    }

    /// Close cached sessions idle strictly longer than the timeout at `now`
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        self.inner.sweep_idle_at(now)
    }

    /// Applies to every session this pool has handed out, leased or idle
    pub fn set_authenticator(&self, authenticator: Option<Arc<dyn Authenticator>>) {
        *self.inner.collaborators.authenticator.write() = authenticator;
    }

    pub fn set_canceller(&self, canceller: Option<Arc<dyn Canceller>>) {
        *self.inner.collaborators.canceller.write() = canceller;
    }

    pub fn set_debug_sink(&self, sink: Option<Arc<dyn DebugSink>>) {
        *self.inner.collaborators.debug.write() = sink;
    }

    /// Sessions held by the cache, leased or idle
    pub fn cached_count(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .cache
            .values()
            .filter(|s| matches!(s, Slot::Idle { .. }))
            .count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Close every idle session and stop caching. Leases still out are closed
    /// when released. Idempotent.
    pub fn dispose(&self) {
        let idle: Vec<Box<dyn Session>> = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state
                .cache
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Idle { session, .. } => Some(session),
                    Slot::Active => None,
                })
                .collect()
        };
        for session in idle {
            close_quietly(session);
        }
        if self.inner.pooling {
            unregister(&self.inner);
        }
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl PoolInner {
    fn release(&self, scheme: String, session: Box<dyn Session>) {
        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            close_quietly(session);
            return;
        }
        state.cache.insert(
            scheme,
            Slot::Idle {
                session,
                since: Instant::now(),
            },
        );
    }

    fn sweep_idle_at(&self, now: Instant) -> usize {
        let expired: Vec<Box<dyn Session>> = {
            let mut state = self.state.lock();
            let schemes: Vec<String> = state
                .cache
                .iter()
                .filter_map(|(scheme, slot)| match slot {
                    Slot::Idle { since, .. }
                        if now.saturating_duration_since(*since) > self.idle_timeout =>
                    {
                        Some(scheme.clone())
                    }
                    _ => None,
                })
                .collect();
            schemes
                .into_iter()
                .filter_map(|scheme| match state.cache.remove(&scheme) {
                    Some(Slot::Idle { session, .. }) => Some(session),
                    _ => None,
                })
                .collect()
        };
        let count = expired.len();
        for session in expired {
            metrics::counter!("dsvn_pool_sessions_expired_total").increment(1);
            close_quietly(session);
        }
        count
    }
}

fn close_quietly(mut session: Box<dyn Session>) {
    if let Err(e) = session.close() {
        tracing::warn!("Failed to close session to {}: {} (ignored)", session.url(), e);
    }
}

/// A leased session; returns to the pool (or is closed) on drop
pub struct SessionLease {
    session: Option<Box<dyn Session>>,
    /// Set when the session belongs to the pool's cache
    pool: Option<Weak<PoolInner>>,
    scheme: String,
}

impl SessionLease {
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for SessionLease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        match &self.session {
            Some(session) => session.as_ref(),
            None => unreachable!("session lease used after release"),
        }
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.session {
            Some(session) => session.as_mut(),
            None => unreachable!("session lease used after release"),
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match self.pool.as_ref().and_then(Weak::upgrade) {
            Some(inner) => inner.release(std::mem::take(&mut self.scheme), session),
            None => close_quietly(session),
        }
    }
}

// ---- process-wide sweep ----

struct Registry {
    pools: Vec<Weak<PoolInner>>,
    sweep: Option<SweepHandle>,
}

static REGISTRY: Mutex<Registry> = parking_lot::const_mutex(Registry {
    pools: Vec::new(),
    sweep: None,
});

/// Background thread running the idle sweep
struct SweepHandle {
    shutdown: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl SweepHandle {
    fn start(interval: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("dsvn-pool-sweep".to_string())
            .spawn(move || run_sweep(interval, signal))?;
        tracing::debug!("Started session sweep every {:?}", interval);
        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Session sweep thread panicked (ignored)");
            }
        }
        tracing::debug!("Stopped session sweep");
    }
}

fn run_sweep(interval: Duration, shutdown: Arc<Notify>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::warn!("Cannot start session sweep: {} (ignored)", e);
            return;
        }
    };
    runtime.block_on(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_all(),
                _ = shutdown.notified() => break,
            }
        }
    });
}

fn sweep_all() {
    let pools: Vec<Arc<PoolInner>> = REGISTRY
        .lock()
        .pools
        .iter()
        .filter_map(Weak::upgrade)
        .collect();
    let now = Instant::now();
    for pool in pools {
        let closed = pool.sweep_idle_at(now);
        if closed > 0 {
            tracing::debug!("Closed {} idle session(s)", closed);
        }
    }
}

fn register(inner: &Arc<PoolInner>, interval: Duration) {
    let mut registry = REGISTRY.lock();
    registry.pools.retain(|p| p.strong_count() > 0);
    registry.pools.push(Arc::downgrade(inner));
    if registry.sweep.is_none() {
        match SweepHandle::start(interval) {
            Ok(handle) => registry.sweep = Some(handle),
            Err(e) => tracing::warn!("Cannot spawn session sweep: {} (ignored)", e),
        }
    }
}

fn unregister(inner: &Arc<PoolInner>) {
    let handle = {
        let mut registry = REGISTRY.lock();
        let me = Arc::as_ptr(inner);
        registry
            .pools
            .retain(|p| p.strong_count() > 0 && !std::ptr::eq(p.as_ptr(), me));
        if registry.pools.is_empty() {
            registry.sweep.take()
        } else {
            None
        }
    };
    if let Some(handle) = handle {
        handle.stop();
    }
}

/// Number of pools currently sharing the sweep
pub fn live_pools() -> usize {
    REGISTRY
        .lock()
        .pools
        .iter()
        .filter(|p| p.strong_count() > 0)
        .count()
}

/// True while the shared sweep thread runs
pub fn sweep_running() -> bool {
    REGISTRY.lock().sweep.is_some()
}
