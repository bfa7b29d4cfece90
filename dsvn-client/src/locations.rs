//! Peg-revision location resolution
//!
//! A target names a node at its peg revision. Asking for it at another
//! revision means following the node's history (copies and renames) back to
//! the path it had then. Sessions with a native location lookup answer that
//! directly; otherwise the history is traced from the log.

use crate::pool::SessionPool;
use crate::resolver::RevisionResolver;
use crate::revision::{Location, RevisionSpec, Target};
use crate::wc::WorkingCopy;
use dsvn_ra::{
    svn_err, ChangeAction, ErrorCode, LogEntry, NodeKind, RepoUrl, Result, Revnum, Session,
};
use std::path::Path;

/// Fill in unspecified peg and operative revisions.
///
/// The peg defaults to HEAD for URLs and to the working (or, when local
/// modifications must not be considered, base) revision for paths. The
/// operative revision defaults to the peg.
pub fn resolve_revisions(
    peg: RevisionSpec,
    revision: RevisionSpec,
    is_url: bool,
    notice_local_mods: bool,
) -> (RevisionSpec, RevisionSpec) {
    let peg = if peg.is_valid() {
        peg
    } else if is_url {
        RevisionSpec::HEAD
    } else if notice_local_mods {
        RevisionSpec::WORKING
    } else {
        RevisionSpec::BASE
    };
    (peg, revision.or(peg))
}

/// Path a node had just before `entry`'s revision.
///
/// `Ok(None)` means the node did not exist before (added without history).
/// When several changed paths are ancestors of `path`, the first copied one in
/// reverse lexicographic order wins, which is the deepest.
pub fn previous_log_path(path: &str, entry: &LogEntry, kind: NodeKind) -> Result<Option<String>> {
    if let Some(change) = entry.changed_paths.get(path) {
        if !matches!(change.action, ChangeAction::Added | ChangeAction::Replaced) {
            return Ok(Some(path.to_string()));
        }
        return Ok(change.copy_from_path.clone());
    }
    for (changed, change) in entry.changed_paths.iter().rev() {
        let Some(rest) = path.strip_prefix(changed.as_str()) else {
            continue;
        };
        if !rest.starts_with('/') {
            continue;
        }
        if let Some(from) = &change.copy_from_path {
            if matches!(change.action, ChangeAction::Added | ChangeAction::Replaced) {
                return Ok(Some(format!("{}{}", from, rest)));
            }
        }
    }
    if kind == NodeKind::Dir {
        return Ok(Some(path.to_string()));
    }
    Err(svn_err!(
        UnrelatedResources,
        "Missing changed-path information for '{0}' in revision {1}",
        path,
        entry.revision
    ))
}

/// Paths traced for the start and end revisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedPaths {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Walk `entries` (newest first) from `path`, recording the path the node had
/// at `start`, `end` and `peg`. The peg path has to be `path` itself.
pub fn trace_locations(
    path: &str,
    kind: NodeKind,
    peg: Revnum,
    start: Revnum,
    end: Revnum,
    entries: &[LogEntry],
) -> Result<TracedPaths> {
    let youngest = peg.max(start).max(end);
    let mut current = Some(path.to_string());
    let mut start_path = None;
    let mut end_path = None;
    let mut peg_path = None;
    for entry in entries {
        let Some(now) = current.clone() else {
            break;
        };
        if start_path.is_none() && entry.revision <= start {
            start_path = Some(now.clone());
        }
        if end_path.is_none() && entry.revision <= end {
            end_path = Some(now.clone());
        }
        if peg_path.is_none() && entry.revision <= peg {
            peg_path = Some(now.clone());
        }
        current = previous_log_path(&now, entry, kind)?;
    }
    let start_path = start_path.or_else(|| current.clone());
    let end_path = end_path.or_else(|| current.clone());
    let peg_path = peg_path.or(current);
    match peg_path {
        None => Err(svn_err!(
            FsNotFound,
            "path '{0}' in revision {1} is an unrelated object",
            path,
            youngest
        )),
        Some(p) if p != path => Err(svn_err!(
            FsNotFound,
            "path '{0}' in revision {1} is an unrelated object",
            path,
            peg
        )),
        Some(_) => Ok(TracedPaths {
            start: start_path,
            end: end_path,
        }),
    }
}

/// Where `target@peg` lived at `start` (and at `end` when given)
pub fn resolve_locations(
    pool: &SessionPool,
    target: &Target,
    peg: RevisionSpec,
    start: RevisionSpec,
    end: RevisionSpec,
) -> Result<(Location, Option<Location>)> {
    let (peg, start) = resolve_revisions(peg, start, target.is_url(), true);
    let wc_path: Option<&Path> = match target {
        Target::Path(p) => Some(p.as_path()),
        Target::Url(_) => None,
    };

    let (url, pinned_peg) = match target {
        Target::Url(url) => (url.clone(), None),
        Target::Path(path) => {
            let (wc, rel) = WorkingCopy::open_containing(path)?;
            let entry = wc.require(&rel)?;
            if peg == RevisionSpec::WORKING && entry.copied {
                match &entry.copy_from_url {
                    Some(from) => (from.clone(), Some(entry.copy_from_rev)),
                    None => return Err(svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", path.display())),
                }
            } else {
                match &entry.url {
                    Some(url) => (url.clone(), None),
                    None => return Err(svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", path.display())),
                }
            }
        }
    };

    let mut session = pool.acquire(&url, true)?;
    let mut resolver = RevisionResolver::new();
    let peg_rev = match pinned_peg {
        Some(rev) => rev,
        None => resolver.resolve(&peg, wc_path, Some(&mut *session))?,
    };
    let start_rev = resolver.resolve(&start, wc_path, Some(&mut *session))?;
    let end_rev = if end.is_valid() {
        Some(resolver.resolve(&end, wc_path, Some(&mut *session))?)
    } else {
        None
    };

    if peg_rev == start_rev && end_rev.is_none_or(|e| e == start_rev) {
        let start_loc = Location::new(url.clone(), start_rev);
        return Ok((start_loc.clone(), end_rev.map(|_| start_loc)));
    }

    let root = session.repository_root()?;
    let abs = format!(
        "/{}",
        root.relative_path(&url).ok_or_else(|| svn_err!(
            UnrelatedResources,
            "'{0}' is not in repository '{1}'",
            url,
            root
        ))?
    );
    let end_for_trace = end_rev.unwrap_or(start_rev);
    let (start_path, end_path) = trace(&mut *session, &abs, peg_rev, start_rev, end_for_trace)?;

    let start_path = start_path.ok_or_else(|| {
        svn_err!(
            UnrelatedResources,
            "Unable to find repository location for '{0}' in revision {1}",
            target,
            start_rev
        )
    })?;
    let start_loc = Location::new(root.append_path(&start_path), start_rev);
    let end_loc = match end_rev {
        None => None,
        Some(rev) => {
            let path = end_path.ok_or_else(|| {
                svn_err!(
                    UnrelatedResources,
                    "The location for '{0}' for revision {1} does not exist in the repository or refers to an unrelated object",
                    target,
                    rev
                )
            })?;
            Some(Location::new(root.append_path(&path), rev))
        }
    };
    tracing::debug!("Resolved {}@{} to {}", target, peg_rev, start_loc);
    Ok((start_loc, end_loc))
}

/// Absolute paths of `abs@peg` at `start` and `end`
fn trace(
    session: &mut dyn Session,
    abs: &str,
    peg: Revnum,
    start: Revnum,
    end: Revnum,
) -> Result<(Option<String>, Option<String>)> {
    let kind = session.check_path("", peg)?;
    if kind == NodeKind::None {
        return Err(svn_err!(FsNotFound, "path '{0}' doesn't exist at revision {1}", abs, peg));
    }
    match session.get_locations("", peg, &[start, end]) {
        Ok(found) => Ok((found.get(&start).cloned(), found.get(&end).cloned())),
        Err(e) if e.is(ErrorCode::RaNotImplemented) => {
            tracing::debug!("No native location lookup, tracing '{}' through the log", abs);
            let youngest = peg.max(start).max(end);
            let oldest = peg.min(start).min(end);
            let mut entries = Vec::new();
            session.log(&[], youngest, oldest, true, &mut |entry| {
                entries.push(entry);
                Ok(())
            })?;
            let traced = trace_locations(abs, kind, peg, start, end, &entries)?;
            Ok((traced.start, traced.end))
        }
        Err(e) => Err(e),
    }
}

/// URL of `path` at its working revision, for callers that only need the URL
pub fn url_of(path: &Path) -> Result<RepoUrl> {
    let (wc, rel) = WorkingCopy::open_containing(path)?;
    wc.require(&rel)?
        .url
        .clone()
        .ok_or_else(|| svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", path.display()))
}
