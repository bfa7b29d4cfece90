//! Checkout, update and switch
//!
//! Every operation walks the same phases: resolve the repository location,
//! describe the local tree in a report, let the session drive an editor over
//! the working copy, then reconcile externals found along the way.

use crate::crop::crop_tree;
use crate::depth_filter::{AmbientDepthFilter, AmbientDepths};
use crate::events::{Event, EventAction, EventHandler, Notifier};
use crate::externals::ExternalsStore;
use crate::locations::{resolve_locations, resolve_revisions};
use crate::options::ClientOptions;
use crate::pool::SessionPool;
use crate::reconcile::{DefaultExternalsHandler, ExternalsHandler};
use crate::reporter::build_report;
use crate::resolver::RevisionResolver;
use crate::revision::{RevisionSpec, Target};
use crate::update_editor::{EditScope, UpdateEditor};
use crate::wc::{self, Entry, WorkingCopy};
use dsvn_ra::{
    relpath, svn_err, Depth, Editor, NodeKind, RepoUrl, ReportState, Result, Revnum, Session,
    SvnError, INVALID_REVISION,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one path of a multi-path update
#[derive(Debug)]
pub enum TargetOutcome {
    Updated(Revnum),
    /// The path failed and was skipped; the batch went on
    Skipped(SvnError),
}

/// Working-copy synchronization against repositories reached through a pool
pub struct UpdateClient {
    pub(crate) pool: Arc<SessionPool>,
    pub(crate) options: ClientOptions,
    pub(crate) notifier: Notifier,
    pub(crate) externals_handler: Arc<dyn ExternalsHandler>,
}

/// Anchor directory and optional child target for an operation on `rel`
fn split_target(wc: &WorkingCopy, rel: &str) -> (String, Option<String>) {
    match wc.entry(rel) {
        Some(entry) if rel.is_empty() || (entry.is_dir() && !entry.is_excluded()) => (rel.to_string(), None),
        _ => (
            relpath::dirname(rel).to_string(),
            Some(relpath::basename(rel).to_string()),
        ),
    }
}

fn missing_url(path: &Path) -> SvnError {
    svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", path.display())
}

impl UpdateClient {
    pub fn new(pool: Arc<SessionPool>, options: ClientOptions) -> Self {
        Self {
            pool,
            options,
            notifier: Notifier::default(),
            externals_handler: Arc::new(DefaultExternalsHandler),
        }
    }

    /// Receive events; the handler's cancellation probe is also handed to sessions
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.notifier = Notifier::new(Some(handler));
        self.pool.set_canceller(self.notifier.canceller());
        self
    }

    pub fn with_externals_handler(mut self, handler: Arc<dyn ExternalsHandler>) -> Self {
        self.externals_handler = handler;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Materialize `url@peg` at `revision` into `dst`
    pub fn checkout(
        &self,
        url: &RepoUrl,
        dst: &Path,
        peg: RevisionSpec,
        revision: RevisionSpec,
        depth: Depth,
        allow_obstructions: bool,
    ) -> Result<Revnum> {
        self.notifier.check_cancelled()?;
        let dst = wc::absolute(dst)?;
        let (peg, revision) = resolve_revisions(peg, revision, true, false);
        let (location, _) = resolve_locations(
            &self.pool,
            &Target::Url(url.clone()),
            peg,
            revision,
            RevisionSpec::Undefined,
        )?;
        let mut session = self.pool.acquire(&location.url, true)?;
        let rev = location.revision;
        match session.check_path("", rev)? {
            NodeKind::Dir => {}
            NodeKind::File => {
                return Err(svn_err!(
                    UnsupportedFeature,
                    "URL '{0}' refers to a file, not a directory",
                    url
                ));
            }
            _ => return Err(svn_err!(IllegalUrl, "URL '{0}' doesn't exist", url)),
        }
        let repos_root = session.repository_root()?;
        let uuid = session.repository_uuid()?;
        let depth = match depth {
            Depth::Unknown => Depth::Infinity,
            d => d,
        };

        let existing = match fs::symlink_metadata(&dst) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&dst)?;
                None
            }
            Err(e) => return Err(e.into()),
            Ok(meta) if !meta.is_dir() => {
                return Err(svn_err!(
                    WcNodeKindChange,
                    "'{0}' already exists and is not a directory",
                    dst.display()
                ));
            }
            Ok(_) if WorkingCopy::is_working_copy(&dst) => {
                let wc = WorkingCopy::open(&dst)?;
                let root = wc.root_entry()?;
                if root.url.as_ref() != Some(&location.url) {
                    return Err(if root.incomplete {
                        svn_err!(
                            WcObstructedUpdate,
                            "'{0}' is already a working copy for a different URL; perform update to complete it",
                            dst.display()
                        )
                    } else {
                        svn_err!(
                            WcObstructedUpdate,
                            "'{0}' is already a working copy for a different URL",
                            dst.display()
                        )
                    });
                }
                Some(wc)
            }
            Ok(_) => None,
        };

        let fresh = existing.is_none();
        let mut wc = match existing {
            Some(wc) => wc,
            None => {
                let mut root = Entry::dir(location.url.clone(), repos_root.clone(), &uuid, rev, depth);
                root.incomplete = true;
                WorkingCopy::create(&dst, root)?
            }
        };
        let lock = wc.lock(depth)?;
        let mut externals = ExternalsStore::new();
        let (state, reported, total) = if fresh {
            let mut state = ReportState::new();
            state.set_path("", rev, depth, true, None)?;
            (state, 0, 0)
        } else {
            let report = build_report(&wc, "", None, depth, true, &mut externals)?;
            (report.state, report.reported_files, report.total_files)
        };
        tracing::debug!("Checking out {} into {:?}", location, dst);
        self.exchange(
            &mut *session,
            &mut wc,
            EditScope {
                anchor: "",
                target: None,
                switch_url: None,
                depth,
                depth_is_sticky: true,
                allow_obstructions,
            },
            rev,
            state,
            &mut externals,
        )?;
        drop(lock);
        drop(session);

        self.reconcile_after_edit(&wc, &externals, &repos_root, depth)?;
        self.notifier.dispatch(
            Event::new(&dst, NodeKind::Dir, EventAction::UpdateCompleted)
                .with_revision(rev)
                .with_file_counts(reported, total),
        )?;
        tracing::info!("Checked out {} at r{}", dst.display(), rev);
        Ok(rev)
    }

    /// Bring `path` to `revision`. With `depth_is_sticky` the depth is
    /// recorded on the target (cropping first when it shrinks); otherwise it
    /// limits this operation only.
    pub fn update(
        &self,
        path: &Path,
        revision: RevisionSpec,
        depth: Depth,
        allow_obstructions: bool,
        depth_is_sticky: bool,
    ) -> Result<Revnum> {
        self.notifier.check_cancelled()?;
        let path = wc::absolute(path)?;
        let (mut wc, rel) = WorkingCopy::open_containing(&path)?;
        let kind = wc.require(&rel)?.kind;
        let (anchor, target) = split_target(&wc, &rel);
        let anchor_url = wc
            .url_of(&anchor)
            .ok_or_else(|| missing_url(&wc.abs_path(&anchor)))?;
        let lock = wc.lock(depth)?;

        if depth_is_sticky && depth == Depth::Exclude {
            crop_tree(&mut wc, &rel, Depth::Exclude, &self.notifier)?;
            wc.save()?;
            tracing::info!("Excluded {}", path.display());
            return Ok(INVALID_REVISION);
        }
        self.crop_for_sticky_depth(&mut wc, &rel, depth, depth_is_sticky)?;

        let mut session = self.pool.acquire(&anchor_url, true)?;
        let rev = RevisionResolver::new().resolve(
            &revision.or(RevisionSpec::HEAD),
            Some(&path),
            Some(&mut *session),
        )?;
        let repos_root = session.repository_root()?;
        let mut externals = ExternalsStore::new();
        let honor_depth_exclude = !(depth_is_sticky && depth == Depth::Infinity);
        let report = build_report(
            &wc,
            &anchor,
            target.as_deref(),
            depth,
            honor_depth_exclude,
            &mut externals,
        )?;
        tracing::debug!(
            "Updating {} to r{} ({} of {} files reported)",
            path.display(),
            rev,
            report.reported_files,
            report.total_files
        );
        self.exchange(
            &mut *session,
            &mut wc,
            EditScope {
                anchor: &anchor,
                target: target.as_deref(),
                switch_url: None,
                depth,
                depth_is_sticky,
                allow_obstructions,
            },
            rev,
            report.state,
            &mut externals,
        )?;
        drop(lock);
        drop(session);

        self.reconcile_after_edit(&wc, &externals, &repos_root, depth)?;
        self.notifier.dispatch(
            Event::new(&path, kind, EventAction::UpdateCompleted)
                .with_revision(rev)
                .with_file_counts(report.reported_files, report.total_files),
        )?;
        tracing::info!("Updated {} to r{}", path.display(), rev);
        Ok(rev)
    }

    /// Rebind `path` to `url@peg` at `revision` within the same repository
    #[allow(clippy::too_many_arguments)]
    pub fn switch(
        &self,
        path: &Path,
        url: &RepoUrl,
        peg: RevisionSpec,
        revision: RevisionSpec,
        depth: Depth,
        allow_obstructions: bool,
        depth_is_sticky: bool,
    ) -> Result<Revnum> {
        if depth_is_sticky && depth == Depth::Exclude {
            return Err(svn_err!(UnsupportedFeature, "Cannot both exclude and switch a path"));
        }
        self.notifier.check_cancelled()?;
        let path = wc::absolute(path)?;
        let (mut wc, rel) = WorkingCopy::open_containing(&path)?;
        let kind = wc.require(&rel)?.kind;
        let (anchor, target) = split_target(&wc, &rel);
        let anchor_url = wc
            .url_of(&anchor)
            .ok_or_else(|| missing_url(&wc.abs_path(&anchor)))?;

        let (peg, revision) = resolve_revisions(peg, revision, true, false);
        let (location, _) = resolve_locations(
            &self.pool,
            &Target::Url(url.clone()),
            peg,
            revision,
            RevisionSpec::Undefined,
        )?;
        let destination_root = self.pool.acquire(&location.url, true)?.repository_root()?;
        if !destination_root.is_ancestor_of(&anchor_url) {
            return Err(svn_err!(
                InvalidSwitch,
                "'{0}'\nis not the same repository as\n'{1}'",
                url,
                anchor_url
            ));
        }

        let lock = wc.lock(depth)?;
        self.crop_for_sticky_depth(&mut wc, &rel, depth, depth_is_sticky)?;
        let mut session = self.pool.acquire(&anchor_url, true)?;
        let rev = location.revision;
        let mut externals = ExternalsStore::new();
        let report = build_report(&wc, &anchor, target.as_deref(), depth, true, &mut externals)?;
        tracing::debug!("Switching {} to {}", path.display(), location);
        self.exchange(
            &mut *session,
            &mut wc,
            EditScope {
                anchor: &anchor,
                target: target.as_deref(),
                switch_url: Some(location.url.clone()),
                depth,
                depth_is_sticky,
                allow_obstructions,
            },
            rev,
            report.state,
            &mut externals,
        )?;
        drop(lock);
        drop(session);

        self.reconcile_after_edit(&wc, &externals, &destination_root, depth)?;
        self.notifier.dispatch(
            Event::new(&path, kind, EventAction::UpdateCompleted)
                .with_revision(rev)
                .with_file_counts(report.reported_files, report.total_files),
        )?;
        tracing::info!("Switched {} to {}", path.display(), location);
        Ok(rev)
    }

    /// Update several paths. A failing path is reported with a `Skip` event
    /// and the rest still run; only cancellation stops the batch.
    pub fn update_paths(
        &self,
        paths: &[PathBuf],
        revision: RevisionSpec,
        depth: Depth,
        allow_obstructions: bool,
        depth_is_sticky: bool,
    ) -> Result<Vec<TargetOutcome>> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            self.notifier.check_cancelled()?;
            match self.update(path, revision, depth, allow_obstructions, depth_is_sticky) {
                Ok(rev) => outcomes.push(TargetOutcome::Updated(rev)),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    self.notifier
                        .dispatch(Event::new(path, NodeKind::None, EventAction::Skip).with_error(&e))?;
                    outcomes.push(TargetOutcome::Skipped(e));
                }
            }
        }
        Ok(outcomes)
    }

    fn crop_for_sticky_depth(
        &self,
        wc: &mut WorkingCopy,
        rel: &str,
        depth: Depth,
        depth_is_sticky: bool,
    ) -> Result<()> {
        if !depth_is_sticky || !matches!(depth, Depth::Empty | Depth::Files | Depth::Immediates) {
            return Ok(());
        }
        let entry = wc.require(rel)?;
        if !entry.is_dir() || !depth.is_shallower_than(entry.depth) {
            return Ok(());
        }
        crop_tree(wc, rel, depth, &self.notifier)?;
        wc.save()
    }

    /// Drive the working-copy editor with the delta the session computes
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn exchange(
        &self,
        session: &mut dyn Session,
        wc: &mut WorkingCopy,
        scope: EditScope<'_>,
        revision: Revnum,
        report: ReportState,
        externals: &mut ExternalsStore,
    ) -> Result<()> {
        let ambient = (!scope.depth_is_sticky).then(|| AmbientDepths::snapshot(wc, scope.anchor));
        let target = scope.target.map(str::to_string);
        let depth = scope.depth;
        let switch_url = scope.switch_url.clone();

        let editor = UpdateEditor::new(wc, scope, &self.options, &self.notifier, externals)?;
        let mut filtered;
        let mut plain;
        let editor: &mut dyn Editor = match ambient {
            Some(ambient) => {
                filtered = AmbientDepthFilter::new(editor, ambient, target.as_deref());
                &mut filtered
            }
            None => {
                plain = editor;
                &mut plain
            }
        };
        match &switch_url {
            Some(url) => session.switch(url, revision, target.as_deref(), depth, report, editor),
            None => session.update(revision, target.as_deref(), depth, false, report, editor),
        }
    }

    fn reconcile_after_edit(
        &self,
        wc: &WorkingCopy,
        externals: &ExternalsStore,
        repos_root: &RepoUrl,
        depth: Depth,
    ) -> Result<()> {
        if self.options.ignore_externals || externals.is_empty() {
            return Ok(());
        }
        let owner_urls: BTreeMap<String, RepoUrl> = externals
            .owners()
            .into_iter()
            .filter_map(|owner| wc.url_of(&owner).map(|url| (owner, url)))
            .collect();
        self.handle_externals(wc.root(), externals, &owner_urls, repos_root, depth, false, true)
    }
}
