//! Unversioned copies of repository trees and working copies

use crate::events::{Event, EventAction};
use crate::export_editor::ExportEditor;
use crate::externals::{parse_externals, ExternalsStore};
use crate::locations::{resolve_locations, resolve_revisions};
use crate::resolver::local_revision;
use crate::revision::{LocalRevision, RevisionSpec, Target};
use crate::translate;
use crate::update::UpdateClient;
use crate::wc::{self, Schedule, WorkingCopy};
use dsvn_ra::{relpath, svn_err, svn_props, Depth, NodeKind, RepoUrl, ReportState, Result, Revnum};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Line ending for `svn:eol-style=native`, from an explicit style name or the options
fn native_eol(eol: Option<&str>, default: &str) -> Result<String> {
    match eol {
        None => Ok(default.to_string()),
        Some(style) => match style.to_ascii_uppercase().as_str() {
            "LF" => Ok("\n".to_string()),
            "CR" => Ok("\r".to_string()),
            "CRLF" => Ok("\r\n".to_string()),
            _ => Err(svn_err!(Io, "Unrecognized line ending style '{0}'", style)),
        },
    }
}

/// Destination for a single file exported into `dst`
fn file_destination(dst: &Path, name: &str) -> PathBuf {
    if dst.is_dir() {
        dst.join(name)
    } else {
        dst.to_path_buf()
    }
}

fn already_exists(path: &Path) -> dsvn_ra::SvnError {
    svn_err!(
        WcObstructedUpdate,
        "'{0}' already exists and will not be overwritten unless forced",
        path.display()
    )
}

/// Which text and properties a local export copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalSource {
    Working,
    Base,
}

struct LocalExport<'a> {
    native_eol: &'a str,
    overwrite: bool,
    source: LocalSource,
}

impl UpdateClient {
    /// Write an unversioned copy of `source@peg` at `revision` to `dst`.
    ///
    /// URLs, and paths with a repository revision, are fetched from the
    /// repository. Paths with a working, base or committed revision are
    /// copied out of the working copy. `eol` names the line ending (`LF`,
    /// `CR`, `CRLF`) used for `svn:eol-style=native`. Files already at the
    /// destination are kept unless `overwrite` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn export(
        &self,
        source: &Target,
        dst: &Path,
        peg: RevisionSpec,
        revision: RevisionSpec,
        eol: Option<&str>,
        overwrite: bool,
        depth: Depth,
    ) -> Result<Revnum> {
        self.notifier.check_cancelled()?;
        let dst = wc::absolute(dst)?;
        let eol = native_eol(eol, &self.options.native_eol)?;
        let depth = match depth {
            Depth::Unknown => Depth::Infinity,
            d => d,
        };
        let (peg, revision) = resolve_revisions(peg, revision, source.is_url(), true);

        let rev = match (source, revision) {
            (Target::Path(path), RevisionSpec::Local(local)) if local != LocalRevision::Previous => {
                self.export_local(path, &dst, local, &eol, overwrite, depth)?
            }
            _ => self.export_remote(source, &dst, peg, revision, &eol, overwrite, depth)?,
        };
        self.notifier.dispatch(
            Event::new(&dst, NodeKind::None, EventAction::UpdateCompleted).with_revision(rev),
        )?;
        tracing::info!("Exported {} to {} at r{}", source, dst.display(), rev);
        Ok(rev)
    }

    #[allow(clippy::too_many_arguments)]
    fn export_remote(
        &self,
        source: &Target,
        dst: &Path,
        peg: RevisionSpec,
        revision: RevisionSpec,
        eol: &str,
        overwrite: bool,
        depth: Depth,
    ) -> Result<Revnum> {
        let (location, _) =
            resolve_locations(&self.pool, source, peg, revision, RevisionSpec::Undefined)?;
        let mut session = self.pool.acquire(&location.url, true)?;
        let rev = location.revision;
        match session.check_path("", rev)? {
            NodeKind::File => {
                let dst = file_destination(dst, location.url.tail());
                if dst.exists() && !overwrite {
                    return Err(already_exists(&dst));
                }
                let (text, props) = session.get_file("", rev)?;
                translate::write_working(&dst, &text, &props, eol)?;
                self.notifier.notify(&dst, NodeKind::File, EventAction::UpdateAdd)?;
                Ok(rev)
            }
            NodeKind::Dir => {
                match fs::symlink_metadata(dst) {
                    Ok(meta) if !meta.is_dir() => {
                        return Err(svn_err!(
                            WcNodeKindChange,
                            "'{0}' exists and is not a directory",
                            dst.display()
                        ));
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                let repos_root = session.repository_root()?;
                let mut report = ReportState::new();
                report.set_path("", rev, depth, true, None)?;
                let mut externals = ExternalsStore::new();
                {
                    let mut editor = ExportEditor::new(
                        dst.to_path_buf(),
                        overwrite,
                        eol,
                        self.options.use_commit_times,
                        depth,
                        &self.notifier,
                        &mut externals,
                    );
                    session.update(rev, None, depth, false, report, &mut editor)?;
                }
                drop(session);

                if !self.options.ignore_externals && !externals.is_empty() {
                    let owner_urls: BTreeMap<String, RepoUrl> = externals
                        .owners()
                        .into_iter()
                        .map(|owner| {
                            let url = location.url.append_path(&owner);
                            (owner, url)
                        })
                        .collect();
                    self.handle_externals(dst, &externals, &owner_urls, &repos_root, depth, true, true)?;
                }
                Ok(rev)
            }
            _ => Err(svn_err!(IllegalUrl, "URL '{0}' doesn't exist", location.url)),
        }
    }

    fn export_local(
        &self,
        path: &Path,
        dst: &Path,
        local: LocalRevision,
        eol: &str,
        overwrite: bool,
        depth: Depth,
    ) -> Result<Revnum> {
        let path = wc::absolute(path)?;
        let (wc, rel) = WorkingCopy::open_containing(&path)?;
        let entry = wc.require(&rel)?;
        let rev = local_revision(&local, &path, entry)?;
        let job = LocalExport {
            native_eol: eol,
            overwrite,
            source: match local {
                LocalRevision::Working => LocalSource::Working,
                _ => LocalSource::Base,
            },
        };
        if entry.is_dir() {
            self.copy_dir(&wc, &rel, dst, depth, &job)?;
        } else {
            let dst = file_destination(dst, relpath::basename(&rel));
            if dst.exists() && !overwrite {
                return Err(already_exists(&dst));
            }
            self.copy_file(&wc, &rel, &dst, &job)?;
        }
        Ok(rev)
    }

    fn copy_dir(&self, wc: &WorkingCopy, rel: &str, dst: &Path, depth: Depth, job: &LocalExport<'_>) -> Result<()> {
        self.notifier.check_cancelled()?;
        match fs::symlink_metadata(dst) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) if job.overwrite => {
                fs::remove_file(dst)?;
                fs::create_dir(dst)?;
            }
            Ok(_) => {
                return Err(svn_err!(
                    WcObstructedUpdate,
                    "'{0}' exists and is not a directory",
                    dst.display()
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(dst)?,
            Err(e) => return Err(e.into()),
        }
        self.notifier.notify(dst, NodeKind::Dir, EventAction::UpdateAdd)?;

        for child in wc.children(rel) {
            let Some(entry) = wc.entry(&child) else {
                continue;
            };
            if entry.is_excluded() || !job.includes(entry.schedule) {
                continue;
            }
            let child_dst = dst.join(relpath::basename(&child));
            match entry.kind {
                NodeKind::Dir if depth.is_recursive() => {
                    let child_depth = if depth == Depth::Immediates { Depth::Empty } else { depth };
                    self.copy_dir(wc, &child, &child_dst, child_depth, job)?;
                }
                NodeKind::File if depth.allows_files() => {
                    if child_dst.exists() && !job.overwrite {
                        tracing::debug!("Keeping existing {:?}", child_dst);
                        self.notifier.notify(&child_dst, NodeKind::File, EventAction::Exists)?;
                        continue;
                    }
                    self.copy_file(wc, &child, &child_dst, job)?;
                }
                _ => {}
            }
        }

        if depth == Depth::Infinity && !self.options.ignore_externals {
            self.copy_externals(wc, rel, dst, job)?;
        }
        Ok(())
    }

    /// Directory externals checked out below `rel` are exported along with it
    fn copy_externals(&self, wc: &WorkingCopy, rel: &str, dst: &Path, job: &LocalExport<'_>) -> Result<()> {
        let entry = wc.require(rel)?;
        let props = match job.source {
            LocalSource::Working => &entry.props,
            LocalSource::Base => &entry.base_props,
        };
        let Some(value) = props.get(svn_props::EXTERNALS) else {
            return Ok(());
        };
        for definition in parse_externals(rel, value)? {
            let external_path = wc.abs_path(rel).join(&definition.target);
            if !WorkingCopy::is_working_copy(&external_path) {
                continue;
            }
            let external = WorkingCopy::open(&external_path)?;
            self.notifier
                .notify(&dst.join(&definition.target), NodeKind::Dir, EventAction::UpdateExternal)?;
            self.copy_dir(&external, "", &dst.join(&definition.target), Depth::Infinity, job)?;
        }
        Ok(())
    }

    fn copy_file(&self, wc: &WorkingCopy, rel: &str, dst: &Path, job: &LocalExport<'_>) -> Result<()> {
        let entry = wc.require(rel)?;
        let (text, props) = match job.source {
            LocalSource::Working => {
                let data = match fs::read(wc.abs_path(rel)) {
                    Ok(data) => data,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        tracing::debug!("Working file {:?} is missing", wc.abs_path(rel));
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                (translate::to_normal(&data, &entry.props), &entry.props)
            }
            LocalSource::Base => (wc.base_text(rel)?, &entry.base_props),
        };
        translate::write_working(dst, &text, props, job.native_eol)?;
        self.notifier.notify(dst, NodeKind::File, EventAction::UpdateAdd)
    }
}

impl LocalExport<'_> {
    /// Scheduled deletions exist only in the base tree, additions only in the working tree
    fn includes(&self, schedule: Schedule) -> bool {
        match (self.source, schedule) {
            (LocalSource::Working, Schedule::Delete) => false,
            (LocalSource::Base, Schedule::Add) => false,
            _ => true,
        }
    }
}
