//! Describe the local tree to the repository
//!
//! Report paths are relative to the edit anchor. Only what the repository
//! cannot infer from the parent claim is reported: revision or depth
//! differences, missing items, switched subtrees and excluded paths.

use crate::externals::ExternalsStore;
use crate::wc::{Entry, Schedule, WorkingCopy};
use dsvn_ra::{relpath, svn_props, Depth, NodeKind, ReportState, Result};

/// A finished report with the file counts gathered while building it
#[derive(Debug)]
pub struct Report {
    pub state: ReportState,
    /// Files that needed an explicit claim
    pub reported_files: usize,
    /// Files examined
    pub total_files: usize,
}

struct Reporter<'a> {
    wc: &'a WorkingCopy,
    state: ReportState,
    externals: &'a mut ExternalsStore,
    honor_depth_exclude: bool,
    reported_files: usize,
    total_files: usize,
}

/// Build the report for an update or switch rooted at `anchor` (optionally
/// restricted to its child `target`) with the requested `depth`.
///
/// With `honor_depth_exclude`, excluded paths are reported as such so the
/// repository leaves them out; otherwise they are reported missing and come
/// back. Externals definitions of every visited directory are recorded in
/// `externals` as both old and (provisionally) new values.
pub fn build_report(
    wc: &WorkingCopy,
    anchor: &str,
    target: Option<&str>,
    depth: Depth,
    honor_depth_exclude: bool,
    externals: &mut ExternalsStore,
) -> Result<Report> {
    let mut reporter = Reporter {
        wc,
        state: ReportState::new(),
        externals,
        honor_depth_exclude,
        reported_files: 0,
        total_files: 0,
    };
    reporter.report(anchor, target, depth)?;
    Ok(Report {
        state: reporter.state,
        reported_files: reporter.reported_files,
        total_files: reporter.total_files,
    })
}

/// Depth the repository assumes for an unclaimed child directory
fn implicit_child_depth(parent: Depth) -> Option<Depth> {
    match parent {
        Depth::Infinity | Depth::Unknown => Some(Depth::Infinity),
        Depth::Immediates => Some(Depth::Empty),
        _ => None,
    }
}

/// Whether an unclaimed child file is assumed present
fn implicit_file(parent: Depth) -> bool {
    matches!(parent, Depth::Unknown) || parent.allows_files()
}

impl Reporter<'_> {
    fn report(&mut self, anchor: &str, target: Option<&str>, depth: Depth) -> Result<()> {
        let anchor_entry = self.wc.require(anchor)?.clone();
        let Some(name) = target else {
            self.state.set_path(
                "",
                anchor_entry.revision,
                anchor_entry.depth,
                anchor_entry.incomplete,
                None,
            )?;
            self.record_externals(anchor, &anchor_entry);
            if depth != Depth::Empty {
                self.report_dir(anchor, "", &anchor_entry, depth)?;
            }
            return Ok(());
        };

        self.state
            .set_path("", anchor_entry.revision, anchor_entry.depth, false, None)?;
        let target_rel = relpath::join(anchor, name);
        let entry = match self.wc.entry(&target_rel) {
            Some(e) if e.is_in_repository() || e.is_excluded() => e.clone(),
            _ => {
                self.state.delete_path(name)?;
                return Ok(());
            }
        };
        if entry.is_excluded() {
            if self.honor_depth_exclude {
                self.state
                    .set_path(name, anchor_entry.revision, Depth::Exclude, false, None)?;
            } else {
                self.state.delete_path(name)?;
            }
            return Ok(());
        }

        let path = self.wc.abs_path(&target_rel);
        match entry.kind {
            NodeKind::File => {
                self.total_files += 1;
                self.reported_files += 1;
                if !path.exists() && entry.schedule != Schedule::Delete {
                    self.state.delete_path(name)?;
                } else if let (Some(url), true) = (&entry.url, self.wc.is_switched(&target_rel) || entry.is_file_external()) {
                    self.state
                        .link_path(name, url, entry.revision, Depth::Infinity, false, None)?;
                } else {
                    self.state
                        .set_path(name, entry.revision, Depth::Infinity, false, None)?;
                }
            }
            NodeKind::Dir => {
                if !path.is_dir() {
                    self.state.delete_path(name)?;
                    return Ok(());
                }
                match (&entry.url, self.wc.is_switched(&target_rel)) {
                    (Some(url), true) => self.state.link_path(
                        name,
                        url,
                        entry.revision,
                        entry.depth,
                        entry.incomplete,
                        None,
                    )?,
                    _ => self.state.set_path(
                        name,
                        entry.revision,
                        entry.depth,
                        entry.incomplete,
                        None,
                    )?,
                }
                self.record_externals(&target_rel, &entry);
                if depth != Depth::Empty {
                    self.report_dir(&target_rel, name, &entry, depth)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn record_externals(&mut self, rel: &str, entry: &Entry) {
        if let Some(value) = entry.base_props.get(svn_props::EXTERNALS) {
            self.externals.add_old(rel, value, entry.depth);
        }
    }

    fn report_dir(&mut self, dir_rel: &str, report_path: &str, dir: &Entry, requested: Depth) -> Result<()> {
        for child_rel in self.wc.children(dir_rel) {
            let Some(entry) = self.wc.entry(&child_rel).cloned() else {
                continue;
            };
            let path = relpath::join(report_path, relpath::basename(&child_rel));
            if entry.schedule == Schedule::Add && !entry.copied {
                continue;
            }
            if entry.is_file_external() {
                continue;
            }
            if entry.is_excluded() {
                if self.honor_depth_exclude {
                    self.state
                        .set_path(&path, dir.revision, Depth::Exclude, false, None)?;
                } else {
                    self.state.delete_path(&path)?;
                }
                continue;
            }
            let disk = self.wc.abs_path(&child_rel);
            match entry.kind {
                NodeKind::File => {
                    if requested == Depth::Empty {
                        continue;
                    }
                    self.total_files += 1;
                    if !disk.exists() && entry.schedule != Schedule::Delete {
                        self.state.delete_path(&path)?;
                        self.reported_files += 1;
                    } else if self.wc.is_switched(&child_rel) {
                        if let Some(url) = &entry.url {
                            self.state
                                .link_path(&path, url, entry.revision, Depth::Infinity, false, None)?;
                            self.reported_files += 1;
                        }
                    } else if entry.revision != dir.revision || !implicit_file(dir.depth) {
                        self.state
                            .set_path(&path, entry.revision, Depth::Infinity, false, None)?;
                        self.reported_files += 1;
                    }
                }
                NodeKind::Dir => {
                    if !(requested == Depth::Unknown || requested.allows_dirs()) {
                        continue;
                    }
                    if !disk.is_dir() {
                        self.state.delete_path(&path)?;
                        continue;
                    }
                    if self.wc.is_switched(&child_rel) {
                        if let Some(url) = &entry.url {
                            self.state.link_path(
                                &path,
                                url,
                                entry.revision,
                                entry.depth,
                                entry.incomplete,
                                None,
                            )?;
                        }
                    } else if entry.revision != dir.revision
                        || entry.incomplete
                        || implicit_child_depth(dir.depth) != Some(entry.depth)
                    {
                        self.state.set_path(
                            &path,
                            entry.revision,
                            entry.depth,
                            entry.incomplete,
                            None,
                        )?;
                    }
                    self.record_externals(&child_rel, &entry);
                    if matches!(requested, Depth::Infinity | Depth::Unknown) {
                        self.report_dir(&child_rel, &path, &entry, requested)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsvn_ra::{ReportClaim, RepoUrl};
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, WorkingCopy) {
        let dir = TempDir::new().unwrap();
        let root = RepoUrl::parse("file:///repo").unwrap();
        let trunk = root.append_path("trunk");
        let mut wc = WorkingCopy::create(
            &dir.path().join("wc"),
            Entry::dir(trunk.clone(), root.clone(), "u", 5, Depth::Infinity),
        )
        .unwrap();
        for (rel, rev) in [("a.txt", 5), ("b.txt", 3)] {
            fs::write(wc.abs_path(rel), b"x").unwrap();
            wc.set_entry(rel, Entry::file(trunk.append_path(rel), root.clone(), "u", rev));
        }
        fs::create_dir(wc.abs_path("lib")).unwrap();
        let mut lib = Entry::dir(trunk.append_path("lib"), root.clone(), "u", 5, Depth::Infinity);
        lib.base_props
            .insert("svn:externals".into(), "ext http://h/ext".into());
        wc.set_entry("lib", lib);
        wc.set_entry("gone.txt", Entry::file(trunk.append_path("gone.txt"), root, "u", 5));
        (dir, wc)
    }

    #[test]
    fn test_reports_only_differences() {
        let (_dir, wc) = fixture();
        let mut externals = ExternalsStore::new();
        let report = build_report(&wc, "", None, Depth::Unknown, true, &mut externals).unwrap();
        let paths: Vec<&str> = report.state.claims().iter().map(|c| c.path()).collect();
        assert_eq!(paths, vec!["", "b.txt", "gone.txt"]);
        assert!(matches!(report.state.find("gone.txt"), Some(ReportClaim::DeletePath { .. })));
        assert_eq!(report.total_files, 3);
        assert_eq!(report.reported_files, 2);
        assert_eq!(externals.old.get("lib").map(String::as_str), Some("ext http://h/ext"));
    }

    #[test]
    fn test_excluded_entries() {
        let (_dir, mut wc) = fixture();
        wc.entry_mut("lib").unwrap().depth = Depth::Exclude;
        let mut externals = ExternalsStore::new();
        let report = build_report(&wc, "", None, Depth::Unknown, true, &mut externals).unwrap();
        assert!(matches!(
            report.state.find("lib"),
            Some(ReportClaim::SetPath { depth: Depth::Exclude, .. })
        ));
        let report = build_report(&wc, "", None, Depth::Infinity, false, &mut externals).unwrap();
        assert!(matches!(report.state.find("lib"), Some(ReportClaim::DeletePath { .. })));
    }

    #[test]
    fn test_switched_child_is_linked() {
        let (_dir, mut wc) = fixture();
        let branch = RepoUrl::parse("file:///repo/branches/lib").unwrap();
        wc.entry_mut("lib").unwrap().url = Some(branch.clone());
        let mut externals = ExternalsStore::new();
        let report = build_report(&wc, "", None, Depth::Unknown, true, &mut externals).unwrap();
        assert!(matches!(
            report.state.find("lib"),
            Some(ReportClaim::LinkPath { url, .. }) if *url == branch
        ));
    }

    #[test]
    fn test_single_file_target() {
        let (_dir, wc) = fixture();
        let mut externals = ExternalsStore::new();
        let report = build_report(&wc, "", Some("b.txt"), Depth::Infinity, true, &mut externals).unwrap();
        assert_eq!(report.state.len(), 2);
        assert!(matches!(
            report.state.find("b.txt"),
            Some(ReportClaim::SetPath { revision: 3, .. })
        ));
        assert!(externals.is_empty());

        let report = build_report(&wc, "", Some("new.txt"), Depth::Infinity, true, &mut externals).unwrap();
        assert!(matches!(report.state.find("new.txt"), Some(ReportClaim::DeletePath { .. })));
    }

    #[test]
    fn test_files_depth_skips_directories() {
        let (_dir, wc) = fixture();
        let mut externals = ExternalsStore::new();
        build_report(&wc, "", None, Depth::Files, true, &mut externals).unwrap();
        assert!(externals.is_empty());
    }
}
