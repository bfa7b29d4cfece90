//! Bringing externals in line with their definitions
//!
//! After a tree operation, every directory whose `svn:externals` changed (or,
//! for updates, every directory carrying one) is revisited: removed targets
//! are taken out, new ones created and changed ones updated, switched or
//! checked out afresh. A failure in one target is reported as an event and
//! the others still run.

use crate::events::{Event, EventAction};
use crate::externals::{
    diff_externals, parse_externals, resolve_external_url, ExternalChange, ExternalDefinition,
    ExternalsStore,
};
use crate::locations::resolve_locations;
use crate::reporter::build_report;
use crate::resolver::RevisionResolver;
use crate::revision::{RevisionSpec, Target};
use crate::update::UpdateClient;
use crate::update_editor::EditScope;
use crate::wc::{Entry, FileExternal, WorkingCopy};
use dsvn_ra::{
    relpath, svn_err, Depth, ErrorCode, NodeKind, RepoUrl, Result, INVALID_REVISION,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Hook consulted before each external is fetched
pub trait ExternalsHandler: Send + Sync {
    /// Operative and peg revision to fetch `url` into `path` at, or `None`
    /// to leave this external alone. `url` is `None` when the external is
    /// being removed.
    fn handle_external(
        &self,
        path: &Path,
        url: Option<&RepoUrl>,
        revision: RevisionSpec,
        peg: RevisionSpec,
        definition: &str,
    ) -> Option<(RevisionSpec, RevisionSpec)>;
}

/// Fetches every external at the revisions its definition names
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExternalsHandler;

impl ExternalsHandler for DefaultExternalsHandler {
    fn handle_external(
        &self,
        _path: &Path,
        _url: Option<&RepoUrl>,
        revision: RevisionSpec,
        peg: RevisionSpec,
        _definition: &str,
    ) -> Option<(RevisionSpec, RevisionSpec)> {
        Some((revision, peg))
    }
}

fn recursive(depth: Depth) -> bool {
    depth == Depth::Unknown || depth.is_recursive()
}

fn owner_path(root: &Path, owner: &str) -> PathBuf {
    if owner.is_empty() {
        root.to_path_buf()
    } else {
        root.join(owner)
    }
}

/// First free `<name>.OLD`, `<name>.1.OLD`, ... next to `path`
fn unique_old_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = path.with_file_name(format!("{}.OLD", name));
    let mut i = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}.{}.OLD", name, i));
        i += 1;
    }
    candidate
}

impl UpdateClient {
    /// Reconcile externals below `root`. `store` keys owners by path relative
    /// to `root`; `owner_urls` gives each owner's repository URL.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn handle_externals(
        &self,
        root: &Path,
        store: &ExternalsStore,
        owner_urls: &BTreeMap<String, RepoUrl>,
        repos_root: &RepoUrl,
        requested_depth: Depth,
        is_export: bool,
        update_unchanged: bool,
    ) -> Result<()> {
        for owner in store.owners() {
            let ambient = if store.depths.is_empty() {
                Depth::Infinity
            } else {
                store.depths.get(&owner).copied().ok_or_else(|| {
                    svn_err!(
                        WcCorrupt,
                        "Traversal of '{0}' found no ambient depth",
                        owner_path(root, &owner).display()
                    )
                })?
            };
            if !recursive(ambient) || !recursive(requested_depth) {
                continue;
            }

            let old = match store.old.get(&owner) {
                Some(value) => parse_externals(&owner, value)?,
                None => Vec::new(),
            };
            let new = match store.new.get(&owner) {
                Some(value) => parse_externals(&owner, value)?,
                None => Vec::new(),
            };
            let owner_url = owner_urls.get(&owner);
            let resolve = |url: &str| {
                owner_url.and_then(|o| resolve_external_url(url, o, repos_root).ok())
            };
            let owner_dir = owner_path(root, &owner);
            for change in diff_externals(&old, &new, update_unchanged, &resolve) {
                self.notifier.check_cancelled()?;
                let target = owner_dir.join(change.target());
                match self.apply_external_change(&target, &change, owner_url, repos_root, is_export) {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        tracing::warn!("External {} failed: {}", target.display(), e);
                        self.notifier.dispatch(
                            Event::new(&target, NodeKind::Unknown, EventAction::FailedExternal)
                                .with_error(&e),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_external_change(
        &self,
        target: &Path,
        change: &ExternalChange,
        owner_url: Option<&RepoUrl>,
        repos_root: &RepoUrl,
        is_export: bool,
    ) -> Result<()> {
        let (old, new) = match change {
            ExternalChange::Create(n) => (None, Some(n)),
            ExternalChange::Remove(o) => (Some(o), None),
            ExternalChange::Reconcile { old, new } => (Some(old), Some(new)),
        };
        let resolve = |def: &ExternalDefinition| -> Result<RepoUrl> {
            let owner = owner_url.ok_or_else(|| {
                svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", def.owner)
            })?;
            def.resolve_url(owner, repos_root)
        };
        let old_url = match old {
            Some(def) if !is_export => Some(resolve(def)?),
            _ => None,
        };
        let new_url = new.map(resolve).transpose()?;
        let definition = new.or(old).map(|d| d.raw.as_str()).unwrap_or_default();
        let (revision, peg) = new
            .map(|d| (d.revision, d.peg))
            .unwrap_or((RevisionSpec::Undefined, RevisionSpec::Undefined));

        let decision =
            self.externals_handler
                .handle_external(target, new_url.as_ref(), revision, peg, definition);
        let Some((revision, peg)) = decision else {
            return self
                .notifier
                .dispatch(Event::new(target, NodeKind::Dir, EventAction::Skip));
        };

        let Some(new_url) = new_url else {
            if old_url.is_some() {
                self.delete_external(target)?;
            }
            return Ok(());
        };

        let (location, _) = resolve_locations(
            &self.pool,
            &Target::Url(new_url.clone()),
            peg,
            revision,
            RevisionSpec::Undefined,
        )?;
        let (kind, url_root) = {
            let mut session = self.pool.acquire(&location.url, true)?;
            (session.check_path("", location.revision)?, session.repository_root()?)
        };
        match kind {
            NodeKind::Dir | NodeKind::File => {}
            NodeKind::None => {
                return Err(svn_err!(
                    IllegalUrl,
                    "URL '{0}' at revision {1} doesn't exist",
                    location.url,
                    location.revision
                ));
            }
            _ => {
                return Err(svn_err!(
                    IllegalUrl,
                    "URL '{0}' at revision {1} is not a file or a directory",
                    location.url,
                    location.revision
                ));
            }
        }

        if old_url.is_none() {
            if kind == NodeKind::Dir {
                fs::create_dir_all(target)?;
            }
            self.notifier
                .dispatch(Event::new(target, kind, EventAction::UpdateExternal))?;
            if is_export {
                self.export(&Target::Url(new_url), target, peg, revision, None, true, Depth::Infinity)?;
            } else if kind == NodeKind::Dir {
                self.checkout(&new_url, target, peg, revision, Depth::Infinity, false)?;
            } else {
                self.switch_file_external(target, &new_url, peg, revision, &url_root)?;
            }
            return Ok(());
        }

        self.notifier
            .dispatch(Event::new(target, kind, EventAction::UpdateExternal))?;
        if kind == NodeKind::File {
            return self.switch_file_external(target, &new_url, peg, revision, &url_root);
        }
        let occupied = target.is_dir() && fs::read_dir(target)?.next().is_some();
        if !occupied {
            fs::create_dir_all(target)?;
            self.checkout(&new_url, target, peg, revision, Depth::Infinity, true)?;
            return Ok(());
        }

        let existing = match WorkingCopy::open(target) {
            Ok(wc) => wc.root_entry().ok().cloned(),
            Err(_) => None,
        };
        if let Some(Entry { url: Some(url), repos_root: entry_root, .. }) = existing {
            if url == new_url {
                self.update(target, revision, Depth::Unknown, true, false)?;
                return Ok(());
            }
            if let Some(entry_root) = entry_root {
                if !entry_root.is_ancestor_of(&new_url) {
                    match self.relocate(target, &entry_root, &url_root, true) {
                        Ok(()) => {}
                        Err(e) if e.is(ErrorCode::InvalidRelocation) => {
                            tracing::debug!("Cannot relocate {}: {}", target.display(), e);
                            self.delete_external(target)?;
                            fs::create_dir_all(target)?;
                            self.checkout(&new_url, target, peg, revision, Depth::Infinity, false)?;
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
                self.switch(target, &new_url, peg, revision, Depth::Infinity, false, true)?;
                return Ok(());
            }
        }

        self.delete_external(target)?;
        fs::create_dir_all(target)?;
        self.checkout(&new_url, target, peg, revision, Depth::Infinity, false)?;
        Ok(())
    }

    /// Take an external out of version control. Whatever stays behind
    /// because of local modifications is moved aside.
    fn delete_external(&self, target: &Path) -> Result<()> {
        let left = if WorkingCopy::is_working_copy(target) {
            let mut wc = WorkingCopy::open(target)?;
            let _lock = wc.lock(Depth::Infinity)?;
            wc.remove_from_version_control("", true)?
        } else {
            match self.remove_file_external(target)? {
                Some(left) => left,
                None => return Ok(()),
            }
        };
        if left && target.exists() {
            let aside = unique_old_path(target);
            fs::rename(target, &aside)?;
            tracing::info!("Moved {} aside to {}", target.display(), aside.display());
            self.notifier.dispatch(Event::new(
                &aside,
                NodeKind::Dir,
                EventAction::ExternalLeftLocalMods,
            ))?;
        } else {
            self.notifier
                .dispatch(Event::new(target, NodeKind::Dir, EventAction::UpdateDelete))?;
        }
        Ok(())
    }

    /// Remove a file-external entry from its owner; `None` when `target` is not one
    fn remove_file_external(&self, target: &Path) -> Result<Option<bool>> {
        let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
            return Ok(None);
        };
        let Ok((mut wc, owner_rel)) = WorkingCopy::open_containing(parent) else {
            return Ok(None);
        };
        let rel = relpath::join(&owner_rel, &name.to_string_lossy());
        if !wc.entry(&rel).is_some_and(Entry::is_file_external) {
            return Ok(None);
        }
        let _lock = wc.lock(Depth::Empty)?;
        let left = wc.remove_from_version_control(&rel, true)?;
        wc.save()?;
        Ok(Some(left))
    }

    /// Put `url` into `target` as a file external of the working copy
    /// holding `target`'s parent
    fn switch_file_external(
        &self,
        target: &Path,
        url: &RepoUrl,
        peg: RevisionSpec,
        revision: RevisionSpec,
        url_root: &RepoUrl,
    ) -> Result<()> {
        let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
            return Err(svn_err!(WcNotDirectory, "'{0}' has no parent directory", target.display()));
        };
        let name = name.to_string_lossy().into_owned();
        let (mut wc, owner_rel) = WorkingCopy::open_containing(parent)?;
        let owner = wc.require(&owner_rel)?.clone();
        let wc_root = owner
            .repos_root
            .clone()
            .ok_or_else(|| svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", parent.display()))?;
        if wc_root != *url_root {
            return Err(svn_err!(
                ReposRootMismatch,
                "Cannot insert a file external from '{0}' into a working copy from a different repository rooted at '{1}'",
                url,
                wc_root
            ));
        }
        let owner_url = owner
            .url
            .clone()
            .ok_or_else(|| svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", parent.display()))?;

        let (location, _) = resolve_locations(
            &self.pool,
            &Target::Url(url.clone()),
            peg,
            revision,
            RevisionSpec::Undefined,
        )?;
        let rel = relpath::join(&owner_rel, &name);
        let lock = wc.lock(Depth::Empty)?;
        let mut session = self.pool.acquire(&owner_url, true)?;
        let peg_rev = RevisionResolver::new().resolve(&peg.or(RevisionSpec::HEAD), None, Some(&mut *session))?;
        let external = FileExternal {
            url: location.url.clone(),
            peg: peg_rev,
            revision: location.revision,
        };
        match wc.entry(&rel) {
            Some(entry) if !entry.is_file_external() => {
                return Err(svn_err!(
                    FileExternalOverwriteVersioned,
                    "The file external from '{0}' cannot overwrite the existing versioned item at '{1}'",
                    url,
                    target.display()
                ));
            }
            Some(_) => {}
            None => {
                let uuid = owner.uuid.as_deref().unwrap_or_default();
                let placeholder = Entry {
                    file_external: Some(external.clone()),
                    ..Entry::file(location.url.clone(), wc_root.clone(), uuid, INVALID_REVISION)
                };
                wc.set_entry(&rel, placeholder);
            }
        }

        let mut scratch = ExternalsStore::new();
        let report = build_report(&wc, &owner_rel, Some(&name), Depth::Infinity, true, &mut scratch)?;
        self.exchange(
            &mut *session,
            &mut wc,
            EditScope {
                anchor: &owner_rel,
                target: Some(&name),
                switch_url: Some(location.url.clone()),
                depth: Depth::Infinity,
                depth_is_sticky: true,
                allow_obstructions: false,
            },
            location.revision,
            report.state,
            &mut scratch,
        )?;
        if let Some(entry) = wc.entry_mut(&rel) {
            entry.url = Some(location.url.clone());
            entry.revision = location.revision;
            entry.file_external = Some(external);
        }
        wc.save()?;
        drop(lock);
        tracing::debug!("File external {} at {}", target.display(), location);
        Ok(())
    }
}
