//! Client-side report of what the local tree already has
//!
//! Built once per sync operation and handed by value to the session, which
//! consumes it exactly once. The first claim always describes the anchor (`""`).

use crate::depth::Depth;
use crate::error::Result;
use crate::session::Revnum;
use crate::svn_err;
use crate::url::RepoUrl;
use std::collections::HashSet;

/// One statement about the local tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportClaim {
    /// `path` is present at `revision` with the given depth
    SetPath {
        path: String,
        revision: Revnum,
        depth: Depth,
        start_empty: bool,
        lock_token: Option<String>,
    },
    /// `path` is missing locally
    DeletePath { path: String },
    /// `path` is present but bound to a different URL (switched)
    LinkPath {
        path: String,
        url: RepoUrl,
        revision: Revnum,
        depth: Depth,
        start_empty: bool,
        lock_token: Option<String>,
    },
}

impl ReportClaim {
    pub fn path(&self) -> &str {
        match self {
            ReportClaim::SetPath { path, .. }
            | ReportClaim::DeletePath { path }
            | ReportClaim::LinkPath { path, .. } => path,
        }
    }
}

/// Ordered set of claims; a path may be claimed at most once
#[derive(Debug, Default, Clone)]
pub struct ReportState {
    claims: Vec<ReportClaim>,
    seen: HashSet<String>,
}

impl ReportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_path(
        &mut self,
        path: &str,
        revision: Revnum,
        depth: Depth,
        start_empty: bool,
        lock_token: Option<String>,
    ) -> Result<()> {
        self.claim(path)?;
        self.claims.push(ReportClaim::SetPath {
            path: path.to_string(),
            revision,
            depth,
            start_empty,
            lock_token,
        });
        Ok(())
    }

    pub fn delete_path(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(svn_err!(EditorDrive, "The report anchor cannot be reported as deleted"));
        }
        self.claim(path)?;
        self.claims.push(ReportClaim::DeletePath {
            path: path.to_string(),
        });
        Ok(())
    }

    pub fn link_path(
        &mut self,
        path: &str,
        url: &RepoUrl,
        revision: Revnum,
        depth: Depth,
        start_empty: bool,
        lock_token: Option<String>,
    ) -> Result<()> {
        self.claim(path)?;
        self.claims.push(ReportClaim::LinkPath {
            path: path.to_string(),
            url: url.clone(),
            revision,
            depth,
            start_empty,
            lock_token,
        });
        Ok(())
    }

    fn claim(&mut self, path: &str) -> Result<()> {
        if self.claims.is_empty() && !path.is_empty() {
            return Err(svn_err!(
                EditorDrive,
                "First reported path must be the anchor, got '{0}'",
                path
            ));
        }
        if !self.seen.insert(path.to_string()) {
            return Err(svn_err!(
                ReportDuplicatePath,
                "Path '{0}' reported more than once",
                path
            ));
        }
        Ok(())
    }

    pub fn claims(&self) -> &[ReportClaim] {
        &self.claims
    }

    pub fn into_claims(self) -> Vec<ReportClaim> {
        self.claims
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Claim for exactly `path`
    pub fn find(&self, path: &str) -> Option<&ReportClaim> {
        self.claims.iter().find(|c| c.path() == path)
    }
}
