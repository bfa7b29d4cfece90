//! Working-copy metadata store
//!
//! Every working-copy root owns an administrative directory:
//!
//! ```text
//! <root>/.dsvn/
//!   entries.json        relpath -> Entry, "" is the root directory
//!   pristine/aa/rest    text bases addressed by SHA-256
//!   lock                present while an operation mutates the tree
//! ```
//!
//! Entries are kept in memory and written back atomically by `save`.

use crate::translate;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dsvn_ra::{
    checksum, relpath, svn_err, Depth, LockLevels, NodeKind, ObjectId, PropertyMap, RepoUrl, Result,
    Revnum, INVALID_REVISION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const ADMIN_DIR: &str = ".dsvn";
const ENTRIES_FILE: &str = "entries.json";
const PRISTINE_DIR: &str = "pristine";
const LOCK_FILE: &str = "lock";
const FORMAT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    #[default]
    Normal,
    Add,
    Delete,
}

/// Repository location a file external is pinned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExternal {
    pub url: RepoUrl,
    pub peg: Revnum,
    pub revision: Revnum,
}

/// Per-path metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub kind: NodeKind,
    pub revision: Revnum,
    pub url: Option<RepoUrl>,
    pub repos_root: Option<RepoUrl>,
    pub uuid: Option<String>,
    pub schedule: Schedule,
    pub copied: bool,
    pub copy_from_url: Option<RepoUrl>,
    pub copy_from_rev: Revnum,
    pub committed_rev: Revnum,
    pub committed_date: Option<DateTime<Utc>>,
    pub last_author: Option<String>,
    /// Ambient depth; only meaningful for directories and excluded paths
    pub depth: Depth,
    /// Directory whose children were not all received yet
    pub incomplete: bool,
    /// Checksum of the text base (repository form)
    pub checksum: Option<String>,
    pub base_props: PropertyMap,
    pub props: PropertyMap,
    pub conflicted: bool,
    pub file_external: Option<FileExternal>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            kind: NodeKind::None,
            revision: INVALID_REVISION,
            url: None,
            repos_root: None,
            uuid: None,
            schedule: Schedule::Normal,
            copied: false,
            copy_from_url: None,
            copy_from_rev: INVALID_REVISION,
            committed_rev: INVALID_REVISION,
            committed_date: None,
            last_author: None,
            depth: Depth::Infinity,
            incomplete: false,
            checksum: None,
            base_props: PropertyMap::new(),
            props: PropertyMap::new(),
            conflicted: false,
            file_external: None,
        }
    }
}

impl Entry {
    pub fn dir(url: RepoUrl, repos_root: RepoUrl, uuid: &str, revision: Revnum, depth: Depth) -> Self {
        Self {
            kind: NodeKind::Dir,
            revision,
            url: Some(url),
            repos_root: Some(repos_root),
            uuid: Some(uuid.to_string()),
            depth,
            ..Default::default()
        }
    }

    pub fn file(url: RepoUrl, repos_root: RepoUrl, uuid: &str, revision: Revnum) -> Self {
        Self {
            kind: NodeKind::File,
            revision,
            url: Some(url),
            repos_root: Some(repos_root),
            uuid: Some(uuid.to_string()),
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_excluded(&self) -> bool {
        self.depth == Depth::Exclude
    }

    pub fn is_file_external(&self) -> bool {
        self.file_external.is_some()
    }

    /// Present in the repository at `revision`
    pub fn is_in_repository(&self) -> bool {
        !(self.schedule == Schedule::Add && !self.copied) && dsvn_ra::is_valid_revision(self.revision)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntriesFile {
    format: u32,
    entries: BTreeMap<String, Entry>,
}

/// An opened working copy
#[derive(Debug)]
pub struct WorkingCopy {
    root: PathBuf,
    entries: BTreeMap<String, Entry>,
    /// Set once the administrative area itself was removed
    detached: bool,
}

impl WorkingCopy {
    pub fn is_working_copy(path: &Path) -> bool {
        path.join(ADMIN_DIR).join(ENTRIES_FILE).is_file()
    }

    /// Initialize a working copy rooted at `root` (created if needed)
    pub fn create(root: &Path, root_entry: Entry) -> Result<Self> {
        let root = absolute(root)?;
        if Self::is_working_copy(&root) {
            return Err(svn_err!(
                WcObstructedUpdate,
                "'{0}' is already a working copy",
                root.display()
            ));
        }
        fs::create_dir_all(root.join(ADMIN_DIR).join(PRISTINE_DIR))?;
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), root_entry);
        let wc = Self {
            root,
            entries,
            detached: false,
        };
        wc.save()?;
        tracing::debug!("Created working copy at {:?}", wc.root);
        Ok(wc)
    }

    pub fn open(root: &Path) -> Result<Self> {
        let root = absolute(root)?;
        let entries_path = root.join(ADMIN_DIR).join(ENTRIES_FILE);
        let data = match fs::read(&entries_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(svn_err!(WcNotWorkingCopy, "'{0}' is not a working copy", root.display()));
            }
            Err(e) => return Err(e.into()),
        };
        let file: EntriesFile = serde_json::from_slice(&data)?;
        if file.format != FORMAT {
            return Err(svn_err!(
                WcCorrupt,
                "Unsupported working copy format {0} at '{1}'",
                file.format,
                root.display()
            ));
        }
        if !file.entries.contains_key("") {
            return Err(svn_err!(WcCorrupt, "Working copy '{0}' has no root entry", root.display()));
        }
        Ok(Self {
            root,
            entries: file.entries,
            detached: false,
        })
    }

    /// Open the nearest working copy containing `path`; returns it with the
    /// path relative to its root
    pub fn open_containing(path: &Path) -> Result<(Self, String)> {
        let path = absolute(path)?;
        let mut candidate = Some(path.as_path());
        while let Some(dir) = candidate {
            if Self::is_working_copy(dir) {
                let wc = Self::open(dir)?;
                let rel = rel_path(dir, &path).ok_or_else(|| {
                    svn_err!(WcNotWorkingCopy, "'{0}' is not a working copy", path.display())
                })?;
                return Ok((wc, rel));
            }
            candidate = dir.parent();
        }
        Err(svn_err!(WcNotWorkingCopy, "'{0}' is not a working copy", path.display()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn abs_path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            return self.root.clone();
        }
        rel.split('/').fold(self.root.clone(), |p, s| p.join(s))
    }

    pub fn root_entry(&self) -> Result<&Entry> {
        self.entries
            .get("")
            .ok_or_else(|| svn_err!(WcCorrupt, "Working copy '{0}' has no root entry", self.root.display()))
    }

    pub fn entry(&self, rel: &str) -> Option<&Entry> {
        self.entries.get(rel)
    }

    pub fn entry_mut(&mut self, rel: &str) -> Option<&mut Entry> {
        self.entries.get_mut(rel)
    }

    /// Entry that must exist
    pub fn require(&self, rel: &str) -> Result<&Entry> {
        self.entries.get(rel).ok_or_else(|| {
            svn_err!(EntryNotFound, "'{0}' is not under version control", self.abs_path(rel).display())
        })
    }

    pub fn set_entry(&mut self, rel: &str, entry: Entry) {
        self.entries.insert(rel.to_string(), entry);
    }

    /// Remove `rel` and everything below it from the metadata
    pub fn remove_entry(&mut self, rel: &str) {
        for key in self.subtree(rel) {
            self.entries.remove(&key);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    /// Relpaths of the direct children of `rel`
    pub fn children(&self, rel: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|k| !k.is_empty() && k.as_str() != rel && relpath::dirname(k) == rel)
            .cloned()
            .collect()
    }

    /// `rel` and all entries below it, parents before children
    pub fn subtree(&self, rel: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|k| relpath::is_ancestor(rel, k))
            .cloned()
            .collect()
    }

    /// `rel` and the entries at most `levels` directories below it
    pub fn subtree_within(&self, rel: &str, levels: LockLevels) -> Vec<String> {
        self.subtree(rel)
            .into_iter()
            .filter(|key| match levels {
                LockLevels::Unbounded => true,
                LockLevels::Levels(n) => relpath::skip_ancestor(rel, key)
                    .is_some_and(|rest| relpath::depth_of(rest) <= n as usize + 1),
            })
            .collect()
    }

    /// URL an entry is bound to
    pub fn url_of(&self, rel: &str) -> Option<RepoUrl> {
        self.entries.get(rel).and_then(|e| e.url.clone())
    }

    /// URL differs from the one derived from the parent
    pub fn is_switched(&self, rel: &str) -> bool {
        if rel.is_empty() {
            return false;
        }
        let Some(entry) = self.entries.get(rel) else {
            return false;
        };
        if entry.is_file_external() {
            return false;
        }
        let (parent, name) = relpath::split(rel);
        match (self.url_of(parent), &entry.url) {
            (Some(parent_url), Some(url)) => parent_url.append_path(name) != *url,
            _ => false,
        }
    }

    pub fn save(&self) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        let path = self.root.join(ADMIN_DIR).join(ENTRIES_FILE);
        let tmp_path = path.with_extension("tmp");
        let file = EntriesFile {
            format: FORMAT,
            entries: self.entries.clone(),
        };
        fs::write(&tmp_path, serde_json::to_vec_pretty(&file)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Take the exclusive lock; released when the guard drops
    pub fn lock(&self, depth: Depth) -> Result<WcLock> {
        let path = self.root.join(ADMIN_DIR).join(LOCK_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                let levels = depth.levels_to_lock();
                tracing::debug!("Locked {:?} ({:?})", self.root, levels);
                Ok(WcLock { path, levels })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(svn_err!(
                WcLocked,
                "Working copy '{0}' locked",
                self.root.display()
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn pristine_path(&self, sum: &str) -> Result<PathBuf> {
        let id = ObjectId::from_hex(sum)
            .map_err(|_| svn_err!(WcCorrupt, "Malformed text base checksum '{0}'", sum))?;
        Ok(id.shard_path(&self.root.join(ADMIN_DIR).join(PRISTINE_DIR)))
    }

    /// Store a text base, returning its checksum
    pub fn write_pristine(&self, text: &[u8]) -> Result<String> {
        let sum = checksum(text);
        let path = self.pristine_path(&sum)?;
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, text)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(sum)
    }

    pub fn read_pristine(&self, sum: &str) -> Result<Bytes> {
        let path = self.pristine_path(sum)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(svn_err!(
                WcCorrupt,
                "Text base '{0}' is missing from '{1}'",
                sum,
                self.root.display()
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Text base of a file entry
    pub fn base_text(&self, rel: &str) -> Result<Bytes> {
        let entry = self.require(rel)?;
        match &entry.checksum {
            Some(sum) => self.read_pristine(sum),
            None => Ok(Bytes::new()),
        }
    }

    /// Working file differs from its text base
    pub fn is_text_modified(&self, rel: &str) -> Result<bool> {
        let entry = self.require(rel)?;
        if !entry.is_file() {
            return Ok(false);
        }
        let path = self.abs_path(rel);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(match &entry.checksum {
            Some(sum) => checksum(&translate::to_normal(&data, &entry.props)) != *sum,
            None => !data.is_empty(),
        })
    }

    /// Text, property or scheduling change on `rel` itself
    pub fn is_locally_modified(&self, rel: &str) -> Result<bool> {
        let entry = self.require(rel)?;
        Ok(entry.schedule != Schedule::Normal
            || entry.props != entry.base_props
            || self.is_text_modified(rel)?)
    }

    /// Any local modification at or below `rel`
    pub fn has_local_mods(&self, rel: &str) -> Result<bool> {
        for key in self.subtree(rel) {
            if self.is_locally_modified(&key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Schedule an unversioned item for addition
    pub fn schedule_add(&mut self, rel: &str) -> Result<()> {
        let path = self.abs_path(rel);
        let kind = if path.is_dir() {
            NodeKind::Dir
        } else if path.is_file() {
            NodeKind::File
        } else {
            return Err(svn_err!(EntryNotFound, "'{0}' not found", path.display()));
        };
        if self.entries.get(rel).is_some_and(|e| !e.is_excluded()) {
            return Err(svn_err!(
                WcObstructedUpdate,
                "'{0}' is already under version control",
                path.display()
            ));
        }
        let parent = self.require(relpath::dirname(rel))?.clone();
        let url = parent.url.as_ref().map(|u| u.append_path(relpath::basename(rel)));
        self.entries.insert(
            rel.to_string(),
            Entry {
                kind,
                revision: 0,
                url,
                repos_root: parent.repos_root,
                uuid: parent.uuid,
                schedule: Schedule::Add,
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Schedule a versioned item (and its subtree) for deletion
    pub fn schedule_delete(&mut self, rel: &str) -> Result<()> {
        if rel.is_empty() {
            return Err(svn_err!(
                UnsupportedFeature,
                "Cannot delete the root of working copy '{0}'",
                self.root.display()
            ));
        }
        self.require(rel)?;
        for key in self.subtree(rel) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.schedule = Schedule::Delete;
            }
        }
        Ok(())
    }

    /// Drop `rel` from version control. With `destroy`, unmodified working
    /// files are deleted and emptied directories removed; modified files and
    /// unversioned items stay behind. Returns true when something was left.
    pub fn remove_from_version_control(&mut self, rel: &str, destroy: bool) -> Result<bool> {
        let mut left_local_mods = false;
        let mut keys = self.subtree(rel);
        keys.reverse();
        for key in &keys {
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            if !destroy || entry.is_excluded() {
                continue;
            }
            let path = self.abs_path(key);
            match entry.kind {
                NodeKind::File => {
                    if self.is_locally_modified(key)? {
                        left_local_mods |= path.exists();
                    } else {
                        remove_file_if_exists(&path)?;
                    }
                }
                NodeKind::Dir if !key.is_empty() => {
                    if path.is_dir() && fs::remove_dir(&path).is_err() {
                        left_local_mods = true;
                    }
                }
                _ => {}
            }
        }
        for key in &keys {
            self.entries.remove(key);
        }
        if rel.is_empty() {
            fs::remove_dir_all(self.root.join(ADMIN_DIR))?;
            self.detached = true;
            if destroy && self.root.is_dir() && fs::remove_dir(&self.root).is_err() {
                left_local_mods = true;
            }
        }
        Ok(left_local_mods)
    }
}

/// Exclusive working-copy lock
#[derive(Debug)]
pub struct WcLock {
    path: PathBuf,
    levels: LockLevels,
}

impl WcLock {
    /// Directory levels below the locked path this lock covers
    pub fn levels(&self) -> LockLevels {
        self.levels
    }
}

impl Drop for WcLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to release lock {:?}: {} (ignored)", self.path, e),
        }
    }
}

pub(crate) fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// `path` relative to `root` as a `/`-separated relpath
pub(crate) fn rel_path(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(s: &str) -> RepoUrl {
        RepoUrl::parse(s).unwrap()
    }

    fn fixture() -> (TempDir, WorkingCopy) {
        let dir = TempDir::new().unwrap();
        let root = url("file:///repo");
        let mut wc = WorkingCopy::create(
            &dir.path().join("wc"),
            Entry::dir(root.append_path("trunk"), root.clone(), "uuid-1", 3, Depth::Infinity),
        )
        .unwrap();
        let sum = wc.write_pristine(b"hello\n").unwrap();
        let mut file = Entry::file(root.append_path("trunk/a.txt"), root.clone(), "uuid-1", 3);
        file.checksum = Some(sum);
        wc.set_entry("a.txt", file);
        fs::write(wc.abs_path("a.txt"), b"hello\n").unwrap();
        fs::create_dir(wc.abs_path("sub")).unwrap();
        wc.set_entry(
            "sub",
            Entry::dir(root.append_path("trunk/sub"), root, "uuid-1", 3, Depth::Infinity),
        );
        wc.save().unwrap();
        (dir, wc)
    }

    #[test]
    fn test_open_round_trips_entries() {
        let (_dir, wc) = fixture();
        let reopened = WorkingCopy::open(wc.root()).unwrap();
        assert_eq!(reopened.entry("a.txt"), wc.entry("a.txt"));
        assert_eq!(reopened.children(""), vec!["a.txt".to_string(), "sub".to_string()]);
    }

    #[test]
    fn test_open_containing_walks_up() {
        let (_dir, wc) = fixture();
        let (found, rel) = WorkingCopy::open_containing(&wc.abs_path("sub").join("missing.txt")).unwrap();
        assert_eq!(found.root(), wc.root());
        assert_eq!(rel, "sub/missing.txt");
    }

    #[test]
    fn test_not_a_working_copy() {
        let dir = TempDir::new().unwrap();
        let err = WorkingCopy::open(dir.path()).unwrap_err();
        assert!(err.is(dsvn_ra::ErrorCode::WcNotWorkingCopy));
    }

    #[test]
    fn test_text_modification_detection() {
        let (_dir, wc) = fixture();
        assert!(!wc.is_text_modified("a.txt").unwrap());
        fs::write(wc.abs_path("a.txt"), b"changed\n").unwrap();
        assert!(wc.is_text_modified("a.txt").unwrap());
        assert!(wc.has_local_mods("").unwrap());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let (_dir, wc) = fixture();
        let guard = wc.lock(Depth::Infinity).unwrap();
        let err = wc.lock(Depth::Empty).unwrap_err();
        assert!(err.is(dsvn_ra::ErrorCode::WcLocked));
        drop(guard);
        assert!(wc.lock(Depth::Empty).is_ok());
    }

    #[test]
    fn test_lock_levels_bound_the_subtree() {
        let (_dir, mut wc) = fixture();
        let root = url("file:///repo");
        wc.set_entry("sub/b.txt", Entry::file(root.append_path("trunk/sub/b.txt"), root, "uuid-1", 3));

        let guard = wc.lock(Depth::Files).unwrap();
        assert_eq!(guard.levels(), LockLevels::Levels(0));
        assert_eq!(wc.subtree_within("", guard.levels()), vec!["", "a.txt", "sub"]);
        drop(guard);

        let guard = wc.lock(Depth::Infinity).unwrap();
        assert_eq!(wc.subtree_within("", guard.levels()).len(), 4);
        assert_eq!(wc.subtree_within("sub", LockLevels::Levels(0)), vec!["sub", "sub/b.txt"]);
    }

    #[test]
    fn test_switched_detection() {
        let (_dir, mut wc) = fixture();
        assert!(!wc.is_switched("sub"));
        wc.entry_mut("sub").unwrap().url = Some(url("file:///repo/branches/x"));
        assert!(wc.is_switched("sub"));
    }

    #[test]
    fn test_schedule_add_and_delete() {
        let (_dir, mut wc) = fixture();
        fs::write(wc.abs_path("sub/new.txt"), b"x").unwrap();
        wc.schedule_add("sub/new.txt").unwrap();
        let entry = wc.entry("sub/new.txt").unwrap();
        assert_eq!(entry.schedule, Schedule::Add);
        assert_eq!(entry.url, Some(url("file:///repo/trunk/sub/new.txt")));
        assert!(!entry.is_in_repository());

        wc.schedule_delete("sub").unwrap();
        assert_eq!(wc.entry("sub").unwrap().schedule, Schedule::Delete);
        assert_eq!(wc.entry("sub/new.txt").unwrap().schedule, Schedule::Delete);
    }

    #[test]
    fn test_remove_keeps_modified_files() {
        let (_dir, mut wc) = fixture();
        fs::write(wc.abs_path("a.txt"), b"local edit\n").unwrap();
        let left = wc.remove_from_version_control("", true).unwrap();
        assert!(left);
        assert!(wc.root().join("a.txt").exists());
        assert!(!wc.root().join("sub").exists());
        assert!(!WorkingCopy::is_working_copy(wc.root()));
    }

    #[test]
    fn test_remove_unmodified_tree_cleans_up() {
        let (_dir, mut wc) = fixture();
        let left = wc.remove_from_version_control("", true).unwrap();
        assert!(!left);
        assert!(!wc.root().exists());
    }
}
