//! Repository access session
//!
//! A `Session` is bound to one repository and a current URL inside it. Only the
//! current URL changes over its life (`reparent`); credentials, cancellation and
//! debug output are collaborators installed through the setters.

use crate::depth::Depth;
use crate::editor::Editor;
use crate::error::Result;
use crate::properties::PropertyMap;
use crate::report::ReportState;
use crate::svn_err;
use crate::url::RepoUrl;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Revision number
pub type Revnum = i64;

/// Sentinel for "no revision"
pub const INVALID_REVISION: Revnum = -1;

pub fn is_valid_revision(rev: Revnum) -> bool {
    rev >= 0
}

/// Node kind in the repository or the working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    None,
    File,
    Dir,
    Unknown,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::None => "none",
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
            NodeKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Optional server features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Non-recursive depth reporting
    Depth,
    MergeInfo,
    LogRevProps,
    PartialReplay,
    CommitRevProps,
}

/// What happened to a path in a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Added,
    Deleted,
    Modified,
    Replaced,
}

impl ChangeAction {
    pub fn as_char(self) -> char {
        match self {
            ChangeAction::Added => 'A',
            ChangeAction::Deleted => 'D',
            ChangeAction::Modified => 'M',
            ChangeAction::Replaced => 'R',
        }
    }
}

/// Changed-path record of a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPath {
    pub action: ChangeAction,
    /// Absolute repository path the node was copied from
    pub copy_from_path: Option<String>,
    pub copy_from_rev: Revnum,
    pub kind: NodeKind,
}

impl ChangedPath {
    pub fn new(action: ChangeAction, kind: NodeKind) -> Self {
        Self {
            action,
            copy_from_path: None,
            copy_from_rev: INVALID_REVISION,
            kind,
        }
    }

    pub fn copied(kind: NodeKind, action: ChangeAction, from_path: &str, from_rev: Revnum) -> Self {
        Self {
            action,
            copy_from_path: Some(from_path.to_string()),
            copy_from_rev: from_rev,
            kind,
        }
    }
}

/// One revision of history; changed paths are keyed by absolute repository path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub revision: Revnum,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub changed_paths: BTreeMap<String, ChangedPath>,
}

/// Entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    /// Revision the entry was last changed in
    pub created_rev: Revnum,
}

/// Opaque credentials handed out by an [`Authenticator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Credential provider
pub trait Authenticator: Send + Sync {
    fn credentials(&self, realm: &str) -> Option<Credentials>;
}

/// Cancellation probe polled by long-running operations
pub trait Canceller: Send + Sync {
    fn check_cancelled(&self) -> Result<()>;
}

/// Receiver of protocol-level debug output
pub trait DebugSink: Send + Sync {
    fn record(&self, session: &str, message: &str);
}

/// Debug sink that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
    fn record(&self, session: &str, message: &str) {
        tracing::debug!(target: "dsvn::ra", session = session, "{}", message);
    }
}

/// Repository access session
///
/// Paths taken by these methods are relative to the session URL; `""` is the
/// session URL itself.
pub trait Session: Send {
    /// Current URL
    fn url(&self) -> &RepoUrl;

    /// Re-point the session at another URL in the same repository
    fn reparent(&mut self, url: &RepoUrl) -> Result<()>;

    fn repository_root(&mut self) -> Result<RepoUrl>;

    fn repository_uuid(&mut self) -> Result<String>;

    /// Youngest revision
    fn latest_revision(&mut self) -> Result<Revnum>;

    /// Youngest revision committed at or before `date`
    fn dated_revision(&mut self, date: DateTime<Utc>) -> Result<Revnum>;

    fn check_path(&mut self, path: &str, revision: Revnum) -> Result<NodeKind>;

    /// File text and regular properties; `revision` may be invalid for HEAD
    fn get_file(&mut self, path: &str, revision: Revnum) -> Result<(Bytes, PropertyMap)>;

    /// Directory entries and regular properties
    fn get_dir(&mut self, path: &str, revision: Revnum) -> Result<(Vec<DirEntry>, PropertyMap)>;

    /// History of `paths` from `start` to `end` (either order), with changed paths
    fn log(
        &mut self,
        paths: &[String],
        start: Revnum,
        end: Revnum,
        discover_changed_paths: bool,
        handler: &mut dyn FnMut(LogEntry) -> Result<()>,
    ) -> Result<()>;

    /// Native location lookup; absolute repository path per requested revision
    fn get_locations(
        &mut self,
        _path: &str,
        _peg_revision: Revnum,
        _revisions: &[Revnum],
    ) -> Result<BTreeMap<Revnum, String>> {
        Err(svn_err!(RaNotImplemented, "'{0}' is not implemented by this session", "get-locations"))
    }

    /// Drive `editor` with the delta from the reported state to `revision`
    /// (invalid revision means HEAD) of the session URL, restricted to `target`.
    fn update(
        &mut self,
        revision: Revnum,
        target: Option<&str>,
        depth: Depth,
        send_copy_from: bool,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()>;

    /// Like `update`, but the destination tree is `url`
    fn switch(
        &mut self,
        url: &RepoUrl,
        revision: Revnum,
        target: Option<&str>,
        depth: Depth,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()>;

    /// Like `update`, but never sends file texts
    fn status(
        &mut self,
        revision: Revnum,
        target: Option<&str>,
        depth: Depth,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()>;

    fn has_capability(&mut self, capability: Capability) -> Result<bool>;

    fn set_authenticator(&mut self, authenticator: Option<Arc<dyn Authenticator>>);

    fn set_canceller(&mut self, canceller: Option<Arc<dyn Canceller>>);

    fn set_debug_sink(&mut self, sink: Option<Arc<dyn DebugSink>>);

    /// Release the underlying connection
    fn close(&mut self) -> Result<()>;
}

/// Opens sessions for URLs
pub trait SessionFactory: Send + Sync {
    fn open(&self, url: &RepoUrl) -> Result<Box<dyn Session>>;
}
