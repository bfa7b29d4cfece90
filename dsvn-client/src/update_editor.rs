//! Editor that applies a repository delta to a working copy
//!
//! Editor paths are relative to the anchor; the working copy is addressed by
//! relpaths from its root. Edits are applied as they arrive, so an interrupted
//! drive leaves everything received so far in place; metadata is saved on
//! both `close_edit` and `abort_edit`.

use crate::events::{EventAction, Notifier};
use crate::externals::ExternalsStore;
use crate::options::ClientOptions;
use crate::translate;
use crate::wc::{Entry, Schedule, WorkingCopy};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dsvn_ra::{
    apply_changes, checksum, relpath, svn_err, svn_props, Depth, Editor, NodeKind, PropChange,
    RepoUrl, Result, Revnum, INVALID_REVISION,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

#[derive(Default)]
struct DirBaton {
    added: bool,
    props: Vec<PropChange>,
}

#[derive(Default)]
struct FileBaton {
    added: bool,
    /// Unversioned file of the same name kept in place
    obstructed: bool,
    text: Option<Bytes>,
    props: Vec<PropChange>,
    entry_props: Vec<PropChange>,
}

/// How an update editor should treat the tree it edits
pub(crate) struct EditScope<'a> {
    pub anchor: &'a str,
    pub target: Option<&'a str>,
    /// New URL of the edit target, for switches
    pub switch_url: Option<RepoUrl>,
    pub depth: Depth,
    pub depth_is_sticky: bool,
    pub allow_obstructions: bool,
}

pub(crate) struct UpdateEditor<'a> {
    wc: &'a mut WorkingCopy,
    anchor: String,
    target: Option<String>,
    switch_url: Option<RepoUrl>,
    depth: Depth,
    depth_is_sticky: bool,
    allow_obstructions: bool,
    options: &'a ClientOptions,
    notifier: &'a Notifier,
    externals: &'a mut ExternalsStore,
    target_revision: Revnum,
    repos_root: Option<RepoUrl>,
    uuid: String,
    /// Entries that were switched before the edit started
    switched: HashSet<String>,
    /// Entries written by this edit
    touched: HashSet<String>,
    dirs: HashMap<String, DirBaton>,
    files: HashMap<String, FileBaton>,
}

impl<'a> UpdateEditor<'a> {
    pub fn new(
        wc: &'a mut WorkingCopy,
        scope: EditScope<'_>,
        options: &'a ClientOptions,
        notifier: &'a Notifier,
        externals: &'a mut ExternalsStore,
    ) -> Result<Self> {
        let anchor_entry = wc.require(scope.anchor)?.clone();
        let switched = wc
            .entries()
            .map(|(rel, _)| rel.clone())
            .filter(|rel| wc.is_switched(rel))
            .collect();
        Ok(Self {
            wc,
            anchor: scope.anchor.to_string(),
            target: scope.target.map(str::to_string),
            switch_url: scope.switch_url,
            depth: scope.depth,
            depth_is_sticky: scope.depth_is_sticky,
            allow_obstructions: scope.allow_obstructions,
            options,
            notifier,
            externals,
            target_revision: INVALID_REVISION,
            repos_root: anchor_entry.repos_root.clone(),
            uuid: anchor_entry.uuid.clone().unwrap_or_default(),
            switched,
            touched: HashSet::new(),
            dirs: HashMap::new(),
            files: HashMap::new(),
        })
    }

    fn rel(&self, path: &str) -> String {
        relpath::join(&self.anchor, path)
    }

    fn target_path(&self) -> &str {
        self.target.as_deref().unwrap_or("")
    }

    /// URL `path` is bound to once the edit completes
    fn url_for(&self, path: &str) -> Option<RepoUrl> {
        if path == self.target_path() {
            if let Some(url) = &self.switch_url {
                return Some(url.clone());
            }
        }
        if path.is_empty() {
            return self.wc.url_of(&self.anchor);
        }
        let rel = self.rel(path);
        if self.switched.contains(&rel) {
            return self.wc.url_of(&rel);
        }
        self.url_for(relpath::dirname(path))
            .map(|u| u.append_path(relpath::basename(path)))
    }

    fn require_url(&self, path: &str) -> Result<RepoUrl> {
        self.url_for(path).ok_or_else(|| {
            svn_err!(
                EntryMissingUrl,
                "Entry '{0}' has no URL",
                self.wc.abs_path(&self.rel(path)).display()
            )
        })
    }

    fn repos_root(&self) -> Result<RepoUrl> {
        self.repos_root.clone().ok_or_else(|| {
            svn_err!(
                EntryMissingUrl,
                "Entry '{0}' has no URL",
                self.wc.abs_path(&self.anchor).display()
            )
        })
    }

    /// Depth recorded for a directory added below `parent`
    fn added_dir_depth(&self, path: &str) -> Depth {
        if path == self.target_path() {
            return match self.depth {
                Depth::Unknown | Depth::Exclude => Depth::Infinity,
                d => d,
            };
        }
        let parent = relpath::dirname(path);
        let parent_depth = if parent == self.target_path() && self.depth != Depth::Unknown {
            self.depth
        } else {
            self.wc
                .entry(&self.rel(parent))
                .map(|e| e.depth)
                .unwrap_or(Depth::Infinity)
        };
        match parent_depth {
            Depth::Immediates => Depth::Empty,
            _ => Depth::Infinity,
        }
    }

    fn notify(&self, rel: &str, kind: NodeKind, action: EventAction) -> Result<()> {
        self.notifier.notify(&self.wc.abs_path(rel), kind, action)
    }

    fn conflict_name(&self, name: &str) -> String {
        let rev = self.target_revision;
        match name.rsplit_once('.') {
            Some((stem, ext)) if self.options.preserves_extension(name) => {
                format!("{}.r{}.{}", stem, rev, ext)
            }
            _ => format!("{}.r{}", name, rev),
        }
    }

    /// Record new revisions, URLs and depth below the edit target
    fn bump(&mut self, rel: &str, url: RepoUrl, depth: Depth) {
        let (kind, children) = {
            let Some(entry) = self.wc.entry_mut(rel) else {
                return;
            };
            if entry.is_excluded()
                || entry.is_file_external()
                || (entry.schedule == Schedule::Add && !entry.copied)
            {
                return;
            }
            entry.revision = self.target_revision;
            entry.url = Some(url.clone());
            entry.incomplete = false;
            (entry.kind, entry.kind == NodeKind::Dir)
        };
        if kind != NodeKind::Dir || !children {
            return;
        }
        for child in self.wc.children(rel) {
            let Some(entry) = self.wc.entry(&child) else {
                continue;
            };
            if entry.is_excluded() || entry.is_file_external() {
                continue;
            }
            let missing = !self.wc.abs_path(&child).exists();
            if missing && entry.schedule == Schedule::Normal && !self.touched.contains(&child) {
                // reported missing and not sent back: gone from the repository
                self.wc.remove_entry(&child);
                continue;
            }
            let child_url = if self.switched.contains(&child) {
                match &entry.url {
                    Some(u) => u.clone(),
                    None => continue,
                }
            } else {
                url.append_path(relpath::basename(&child))
            };
            match entry.kind {
                NodeKind::File if depth == Depth::Unknown || depth.allows_files() => {
                    self.bump(&child, child_url, Depth::Empty);
                }
                NodeKind::Dir => match depth {
                    Depth::Infinity | Depth::Unknown => self.bump(&child, child_url, depth),
                    Depth::Immediates => self.bump(&child, child_url, Depth::Empty),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

fn apply_entry_prop(entry: &mut Entry, name: &str, value: Option<&str>) {
    match name {
        svn_props::ENTRY_COMMITTED_REV => {
            entry.committed_rev = value
                .and_then(|v| v.parse().ok())
                .unwrap_or(INVALID_REVISION);
        }
        svn_props::ENTRY_COMMITTED_DATE => {
            entry.committed_date = value
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|d| d.with_timezone(&Utc));
        }
        svn_props::ENTRY_LAST_AUTHOR => entry.last_author = value.map(str::to_string),
        svn_props::ENTRY_UUID => {
            if let Some(v) = value {
                entry.uuid = Some(v.to_string());
            }
        }
        _ => {}
    }
}

fn translation_changed(changes: &[PropChange]) -> bool {
    changes.iter().any(|c| {
        matches!(
            c.name.as_str(),
            svn_props::EOL_STYLE | svn_props::EXECUTABLE | svn_props::MIME_TYPE
        )
    })
}

fn set_commit_time(path: &Path, date: Option<DateTime<Utc>>) -> Result<()> {
    if let Some(date) = date {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(SystemTime::from(date))?;
    }
    Ok(())
}

impl Editor for UpdateEditor<'_> {
    fn target_revision(&mut self, revision: Revnum) -> Result<()> {
        self.target_revision = revision;
        Ok(())
    }

    fn open_root(&mut self, _base_revision: Revnum) -> Result<()> {
        self.notifier.check_cancelled()?;
        self.dirs.insert(String::new(), DirBaton::default());
        Ok(())
    }

    fn delete_entry(&mut self, path: &str, _revision: Revnum) -> Result<()> {
        let rel = self.rel(path);
        let Some(kind) = self.wc.entry(&rel).map(|e| e.kind) else {
            return Ok(());
        };
        let owners: Vec<String> = self
            .externals
            .new
            .keys()
            .filter(|owner| relpath::is_ancestor(&rel, owner))
            .cloned()
            .collect();
        for owner in owners {
            self.externals.remove_owner(&owner);
        }
        let left = self.wc.remove_from_version_control(&rel, true)?;
        if left {
            tracing::debug!("Left local modifications in '{}'", rel);
        }
        self.notify(&rel, kind, EventAction::UpdateDelete)
    }

    fn add_dir(&mut self, path: &str, _copy_from: Option<(&str, Revnum)>) -> Result<()> {
        let rel = self.rel(path);
        let abs = self.wc.abs_path(&rel);
        if let Some(existing) = self.wc.entry(&rel) {
            if !existing.is_excluded() && abs.exists() {
                return Err(svn_err!(
                    WcObstructedUpdate,
                    "Failed to add directory '{0}': object of the same name already exists",
                    abs.display()
                ));
            }
            self.wc.remove_entry(&rel);
        }
        let mut action = EventAction::UpdateAdd;
        match fs::symlink_metadata(&abs) {
            Ok(meta) if !meta.is_dir() => {
                return Err(svn_err!(
                    WcObstructedUpdate,
                    "Failed to add directory '{0}': a non-directory object of the same name already exists",
                    abs.display()
                ));
            }
            Ok(_) => {
                if !self.allow_obstructions {
                    return Err(svn_err!(
                        WcObstructedUpdate,
                        "Failed to add directory '{0}': an unversioned directory of the same name already exists",
                        abs.display()
                    ));
                }
                action = EventAction::Exists;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(&abs)?,
            Err(e) => return Err(e.into()),
        }

        let mut entry = Entry::dir(
            self.require_url(path)?,
            self.repos_root()?,
            &self.uuid,
            self.target_revision,
            self.added_dir_depth(path),
        );
        entry.incomplete = true;
        self.wc.set_entry(&rel, entry);
        self.touched.insert(rel.clone());
        self.dirs.insert(
            path.to_string(),
            DirBaton {
                added: true,
                ..Default::default()
            },
        );
        self.notify(&rel, NodeKind::Dir, action)
    }

    fn open_dir(&mut self, path: &str, _base_revision: Revnum) -> Result<()> {
        let rel = self.rel(path);
        self.wc.require(&rel)?;
        self.dirs.insert(path.to_string(), DirBaton::default());
        Ok(())
    }

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        let rel = self.rel(path);
        if svn_props::is_entry_property(name) {
            if let Some(entry) = self.wc.entry_mut(&rel) {
                apply_entry_prop(entry, name, value);
            }
            return Ok(());
        }
        if name == svn_props::EXTERNALS {
            let depth = self.wc.entry(&rel).map(|e| e.depth).unwrap_or(Depth::Infinity);
            self.externals.set_new(&rel, value, depth);
        }
        let baton = self.dirs.entry(path.to_string()).or_default();
        baton.props.push(PropChange {
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        Ok(())
    }

    fn close_dir(&mut self, path: &str) -> Result<()> {
        let baton = self.dirs.remove(path).unwrap_or_default();
        let rel = self.rel(path);
        let Some(entry) = self.wc.entry_mut(&rel) else {
            return Ok(());
        };
        let props_changed = !baton.props.is_empty();
        if props_changed {
            let pristine_props = entry.props == entry.base_props;
            apply_changes(&mut entry.base_props, &baton.props);
            if pristine_props {
                entry.props = entry.base_props.clone();
            } else {
                apply_changes(&mut entry.props, &baton.props);
            }
        }
        if baton.added {
            entry.incomplete = false;
        } else if props_changed {
            self.notify(&rel, NodeKind::Dir, EventAction::UpdateUpdate)?;
        }
        Ok(())
    }

    fn add_file(&mut self, path: &str, _copy_from: Option<(&str, Revnum)>) -> Result<()> {
        let rel = self.rel(path);
        let abs = self.wc.abs_path(&rel);
        let mut obstructed = false;
        match self.wc.entry(&rel) {
            Some(existing) if existing.is_file_external() && path == self.target_path() => {}
            Some(existing) if !existing.is_excluded() && abs.exists() => {
                return Err(svn_err!(
                    WcObstructedUpdate,
                    "Failed to add file '{0}': object of the same name already exists",
                    abs.display()
                ));
            }
            Some(_) => {}
            None => match fs::symlink_metadata(&abs) {
                Ok(meta) if !meta.is_file() => {
                    return Err(svn_err!(
                        WcObstructedUpdate,
                        "Failed to add file '{0}': a non-file object of the same name already exists",
                        abs.display()
                    ));
                }
                Ok(_) => {
                    if !self.allow_obstructions {
                        return Err(svn_err!(
                            WcObstructedUpdate,
                            "Failed to add file '{0}': an unversioned file of the same name already exists",
                            abs.display()
                        ));
                    }
                    obstructed = true;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        self.files.insert(
            path.to_string(),
            FileBaton {
                added: true,
                obstructed,
                ..Default::default()
            },
        );
        Ok(())
    }

    fn open_file(&mut self, path: &str, _base_revision: Revnum) -> Result<()> {
        self.wc.require(&self.rel(path))?;
        self.files.insert(path.to_string(), FileBaton::default());
        Ok(())
    }

    fn apply_text(&mut self, path: &str, base_checksum: Option<&str>, text: Bytes) -> Result<()> {
        let rel = self.rel(path);
        let baton = self.files.get_mut(path).ok_or_else(|| {
            svn_err!(EditorDrive, "Text delta for '{0}' outside of an open file", path)
        })?;
        if !baton.added {
            if let (Some(expected), Some(Some(actual))) =
                (base_checksum, self.wc.entry(&rel).map(|e| e.checksum.as_deref()))
            {
                if expected != actual {
                    return Err(svn_err!(
                        ChecksumMismatch,
                        "Checksum mismatch for '{0}': expected '{1}', actual '{2}'",
                        self.wc.abs_path(&rel).display(),
                        expected,
                        actual
                    ));
                }
            }
        }
        baton.text = Some(text);
        Ok(())
    }

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        let baton = self.files.get_mut(path).ok_or_else(|| {
            svn_err!(EditorDrive, "Property change for '{0}' outside of an open file", path)
        })?;
        let change = PropChange {
            name: name.to_string(),
            value: value.map(str::to_string),
        };
        if svn_props::is_entry_property(name) {
            baton.entry_props.push(change);
        } else {
            baton.props.push(change);
        }
        Ok(())
    }

    fn close_file(&mut self, path: &str, text_checksum: Option<&str>) -> Result<()> {
        let baton = self.files.remove(path).ok_or_else(|| {
            svn_err!(EditorDrive, "Closing '{0}' which is not open", path)
        })?;
        let rel = self.rel(path);
        let abs = self.wc.abs_path(&rel);
        if let (Some(text), Some(expected)) = (&baton.text, text_checksum) {
            let actual = checksum(text);
            if actual != expected {
                return Err(svn_err!(
                    ChecksumMismatch,
                    "Checksum mismatch for '{0}': expected '{1}', actual '{2}'",
                    abs.display(),
                    expected,
                    actual
                ));
            }
        }

        let previous = self.wc.entry(&rel).cloned();
        let locally_modified = match &previous {
            Some(e) if !baton.added || e.is_file_external() => self.wc.is_text_modified(&rel)?,
            _ => false,
        };
        let mut entry = match previous.clone() {
            Some(e) if !baton.added => e,
            other => {
                let mut fresh = Entry::file(
                    self.require_url(path)?,
                    self.repos_root()?,
                    &self.uuid,
                    self.target_revision,
                );
                fresh.file_external = other.and_then(|e| e.file_external);
                fresh
            }
        };

        let had_local_props = entry.props != entry.base_props;
        apply_changes(&mut entry.base_props, &baton.props);
        if had_local_props {
            apply_changes(&mut entry.props, &baton.props);
        } else {
            entry.props = entry.base_props.clone();
        }
        for change in &baton.entry_props {
            apply_entry_prop(&mut entry, &change.name, change.value.as_deref());
        }

        let mut action = if baton.added {
            EventAction::UpdateAdd
        } else if baton.text.is_some() || !baton.props.is_empty() {
            EventAction::UpdateUpdate
        } else {
            EventAction::UpdateNone
        };
        let mut wrote_working = false;
        let native = self.options.native_eol.clone();
        let new_text = match (&baton.text, baton.added) {
            (Some(text), _) => Some(text.clone()),
            (None, true) => Some(Bytes::new()),
            (None, false) => None,
        };

        match new_text {
            Some(text) => {
                entry.checksum = Some(self.wc.write_pristine(&text)?);
                if baton.obstructed {
                    action = EventAction::Exists;
                } else if locally_modified {
                    let conflict = abs.with_file_name(self.conflict_name(relpath::basename(&rel)));
                    translate::write_working(&conflict, &text, &entry.props, &native)?;
                    entry.conflicted = true;
                    action = EventAction::Conflicted;
                    tracing::info!("Conflict on {:?}, incoming text in {:?}", abs, conflict);
                } else {
                    translate::write_working(&abs, &text, &entry.props, &native)?;
                    translate::set_executable(&abs, translate::is_executable(&entry.props))?;
                    wrote_working = true;
                }
            }
            None if translation_changed(&baton.props) && !locally_modified => {
                let base = self.wc.base_text(&rel)?;
                translate::write_working(&abs, &base, &entry.props, &native)?;
                translate::set_executable(&abs, translate::is_executable(&entry.props))?;
                wrote_working = true;
            }
            None => {}
        }
        if wrote_working && self.options.use_commit_times {
            set_commit_time(&abs, entry.committed_date)?;
        }

        entry.revision = self.target_revision;
        self.wc.set_entry(&rel, entry);
        self.touched.insert(rel.clone());
        if action != EventAction::UpdateNone {
            self.notify(&rel, NodeKind::File, action)?;
        }
        Ok(())
    }

    fn close_edit(&mut self) -> Result<()> {
        let target_path = self.target_path().to_string();
        let target_rel = self.rel(&target_path);
        if self.wc.entry(&target_rel).is_some() {
            if let Some(url) = self.url_for(&target_path) {
                self.bump(&target_rel, url, self.depth);
            }
            if self.depth_is_sticky && self.depth != Depth::Unknown {
                if let Some(entry) = self.wc.entry_mut(&target_rel) {
                    if entry.is_dir() {
                        entry.depth = self.depth;
                    }
                }
            }
        }
        self.wc.save()?;
        tracing::debug!("Edit of {:?} complete at r{}", self.wc.abs_path(&target_rel), self.target_revision);
        Ok(())
    }

    fn abort_edit(&mut self) -> Result<()> {
        self.wc.save()
    }
}
