//! Progress notifications and cancellation
//!
//! Events are delivered synchronously and in order on the operation's thread.
//! A handler signals cancellation by returning an error from `check_cancelled`;
//! the engine polls it before every event and before long-running steps.

use dsvn_ra::{Canceller, NodeKind, Result, Revnum, SvnError, INVALID_REVISION};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    UpdateAdd,
    UpdateDelete,
    UpdateUpdate,
    /// Path examined, nothing changed
    UpdateNone,
    /// An external is being fetched into `path`
    UpdateExternal,
    UpdateCompleted,
    FailedExternal,
    /// A removed external kept local modifications and was moved aside
    ExternalLeftLocalMods,
    Skip,
    /// Existing unversioned item kept in place
    Exists,
    Conflicted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub path: PathBuf,
    pub kind: NodeKind,
    pub action: EventAction,
    pub revision: Revnum,
    pub error: Option<String>,
    /// Files reported to the repository (UpdateCompleted only)
    pub reported_files: usize,
    /// Files examined while reporting (UpdateCompleted only)
    pub total_files: usize,
}

impl Event {
    pub fn new(path: impl Into<PathBuf>, kind: NodeKind, action: EventAction) -> Self {
        Self {
            path: path.into(),
            kind,
            action,
            revision: INVALID_REVISION,
            error: None,
            reported_files: 0,
            total_files: 0,
        }
    }

    pub fn with_revision(mut self, revision: Revnum) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_error(mut self, error: &SvnError) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_file_counts(mut self, reported: usize, total: usize) -> Self {
        self.reported_files = reported;
        self.total_files = total;
        self
    }
}

/// Receives events from client operations
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event) -> Result<()>;

    fn check_cancelled(&self) -> Result<()> {
        Ok(())
    }
}

/// Dispatch point used by the operations; a missing handler drops events
#[derive(Clone, Default)]
pub struct Notifier {
    handler: Option<Arc<dyn EventHandler>>,
}

impl Notifier {
    pub fn new(handler: Option<Arc<dyn EventHandler>>) -> Self {
        Self { handler }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        match &self.handler {
            Some(h) => h.check_cancelled(),
            None => Ok(()),
        }
    }

    pub fn dispatch(&self, event: Event) -> Result<()> {
        if let Some(h) = &self.handler {
            h.check_cancelled()?;
            tracing::trace!("{:?} {}", event.action, event.path.display());
            h.handle_event(&event)?;
        }
        Ok(())
    }

    /// Shorthand for the common path/kind/action event
    pub fn notify(&self, path: &Path, kind: NodeKind, action: EventAction) -> Result<()> {
        self.dispatch(Event::new(path, kind, action))
    }

    /// Cancellation hook for sessions
    pub fn canceller(&self) -> Option<Arc<dyn Canceller>> {
        self.handler
            .as_ref()
            .map(|h| Arc::new(HandlerCanceller(h.clone())) as Arc<dyn Canceller>)
    }
}

struct HandlerCanceller(Arc<dyn EventHandler>);

impl Canceller for HandlerCanceller {
    fn check_cancelled(&self) -> Result<()> {
        self.0.check_cancelled()
    }
}

/// Handler that keeps every event; handy for front ends that print at the end
#[derive(Default)]
pub struct CollectingHandler {
    events: Mutex<Vec<Event>>,
    cancel_after: Mutex<Option<usize>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report cancellation once `count` events were received
    pub fn cancel_after(count: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(Some(count)),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<EventAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }
}

impl EventHandler for CollectingHandler {
    fn handle_event(&self, event: &Event) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        match *self.cancel_after.lock() {
            Some(limit) if self.events.lock().len() >= limit => Err(SvnError::cancelled()),
            _ => Ok(()),
        }
    }
}
