//! DSvn repository access layer
//!
//! Shared vocabulary between the repository side and the working-copy client:
//! - Repository URLs and relative paths
//! - Depth rules
//! - Session, editor and report abstractions
//! - Versioned properties and content checksums
//! - The error type used across the sync engine

pub mod depth;
pub mod editor;
pub mod error;
pub mod object;
pub mod properties;
pub mod report;
pub mod session;
pub mod url;

pub use depth::{Depth, LockLevels};
pub use editor::{replay, EditOp, Editor, RecordingEditor};
pub use error::{ErrorCode, Result, SvnError};
pub use object::{checksum, ObjectId};
pub use properties::{apply_changes, diff_props, svn_props, PropChange, PropertyMap};
pub use report::{ReportClaim, ReportState};
pub use session::{
    is_valid_revision, Authenticator, Canceller, Capability, ChangeAction, ChangedPath,
    Credentials, DebugSink, DirEntry, LogEntry, NodeKind, Revnum, Session, SessionFactory,
    TracingDebugSink, INVALID_REVISION,
};
pub use url::{relpath, RepoUrl};
