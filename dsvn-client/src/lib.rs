//! DSvn working-copy client
//!
//! Keeps local working copies in sync with repositories:
//! - Checkout, update, switch and export driven by report/editor exchanges
//! - Peg-revision resolution and history tracing
//! - Pooled, idle-expiring repository sessions
//! - Externals reconciliation and sticky depth handling
//! - Relocation of working copies to moved repositories

pub mod crop;
pub mod depth_filter;
pub mod events;
mod export;
mod export_editor;
pub mod externals;
pub mod locations;
pub mod options;
pub mod pool;
pub mod reconcile;
mod relocate;
pub mod reporter;
pub mod resolver;
pub mod revision;
pub mod translate;
pub mod update;
mod update_editor;
pub mod wc;

pub use events::{CollectingHandler, Event, EventAction, EventHandler, Notifier};
pub use externals::{parse_externals, ExternalChange, ExternalDefinition, ExternalsStore};
pub use locations::{resolve_locations, resolve_revisions, url_of};
pub use options::ClientOptions;
pub use pool::{SessionLease, SessionPool};
pub use reconcile::{DefaultExternalsHandler, ExternalsHandler};
pub use resolver::RevisionResolver;
pub use revision::{LocalRevision, Location, RemoteRevision, RevisionSpec, Target};
pub use update::{TargetOutcome, UpdateClient};
pub use wc::{Entry, FileExternal, Schedule, WorkingCopy, ADMIN_DIR};
