//! Disk-persistent revisioned repository
//!
//! Every revision is stored as a full tree snapshot; file texts live in a
//! content-addressed object store and are shared between revisions.
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   format                  — format marker
//!   uuid                    — repository UUID
//!   refs/head               — youngest revision number (text)
//!   revs/{rev}.bin          — revision records (bincode)
//!   objects/{hash[0..2]}/{hash[2..]}  — zstd-compressed file texts
//! ```

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dsvn_ra::{
    relpath, ChangeAction, ChangedPath, LogEntry, NodeKind, ObjectId, PropertyMap, Revnum,
};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content of the `format` file
pub const FORMAT_MARKER: &str = "dsvn-repos 1";

const REVISION_CACHE_SIZE: usize = 64;

/// A node in a revision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Text of a file
    pub content: Option<ObjectId>,
    pub props: PropertyMap,
    /// Last revision in which this node or anything below it changed
    pub created_rev: Revnum,
}

impl Node {
    fn dir(rev: Revnum) -> Self {
        Self {
            kind: NodeKind::Dir,
            content: None,
            props: PropertyMap::new(),
            created_rev: rev,
        }
    }

    fn file(content: ObjectId, rev: Revnum) -> Self {
        Self {
            kind: NodeKind::File,
            content: Some(content),
            props: PropertyMap::new(),
            created_rev: rev,
        }
    }
}

/// One committed revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision: Revnum,
    pub author: Option<String>,
    pub date: DateTime<Utc>,
    pub message: Option<String>,
    /// Repository-relative path (`""` is the root) -> node
    pub tree: BTreeMap<String, Node>,
    /// Absolute path (`/trunk/a`) -> change
    pub changes: BTreeMap<String, ChangedPath>,
}

impl RevisionRecord {
    pub fn node(&self, path: &str) -> Option<&Node> {
        self.tree.get(path)
    }

    /// Direct children of a directory, by name
    pub fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a str, &'a Node)> + 'a {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let len = prefix.len();
        self.tree
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter_map(move |(k, node)| {
                let rest = &k[len..];
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some((rest, node))
                }
            })
    }

    pub fn log_entry(&self) -> LogEntry {
        LogEntry {
            revision: self.revision,
            author: self.author.clone(),
            date: Some(self.date),
            message: self.message.clone(),
            changed_paths: self.changes.clone(),
        }
    }

    /// True if this revision changed `path`, something below it, or created one
    /// of its ancestors
    fn touches(&self, path: &str) -> bool {
        let abs = to_abs(path);
        self.changes.iter().any(|(key, change)| {
            key == &abs
                || is_abs_descendant(&abs, key)
                || (is_abs_descendant(key, &abs)
                    && matches!(change.action, ChangeAction::Added | ChangeAction::Replaced))
        })
    }

    /// Where `path` lived in the previous revision; `None` if it was created here
    fn previous_path(&self, path: &str) -> Option<String> {
        let abs = to_abs(path);
        if let Some(change) = self.changes.get(&abs) {
            return match change.action {
                ChangeAction::Added | ChangeAction::Replaced => {
                    change.copy_from_path.as_deref().map(from_abs)
                }
                _ => Some(path.to_string()),
            };
        }
        for (key, change) in self.changes.iter().rev() {
            if !is_abs_descendant(key, &abs) {
                continue;
            }
            if let Some(from) = &change.copy_from_path {
                let suffix = &abs[key.len()..];
                return Some(from_abs(&format!("{}{}", from.trim_end_matches('/'), suffix)));
            }
            if matches!(change.action, ChangeAction::Added | ChangeAction::Replaced) {
                return None;
            }
        }
        Some(path.to_string())
    }
}

pub(crate) fn to_abs(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

pub(crate) fn from_abs(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// `candidate` lies strictly below `ancestor` (both absolute)
fn is_abs_descendant(ancestor: &str, candidate: &str) -> bool {
    if ancestor == "/" {
        return candidate != "/";
    }
    candidate
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Disk-persistent repository
pub struct FsRepository {
    root: PathBuf,
    uuid: String,
    cache: Mutex<LruCache<Revnum, Arc<RevisionRecord>>>,
    commit_lock: Mutex<()>,
}

impl FsRepository {
    /// Create a new repository with an empty revision 0
    pub fn create(path: &Path) -> Result<Self> {
        if Self::is_repository(path) {
            bail!("Repository already exists at {:?}", path);
        }
        fs::create_dir_all(path.join("revs"))
            .with_context(|| format!("Failed to create repository at {:?}", path))?;
        fs::create_dir_all(path.join("objects"))?;
        fs::create_dir_all(path.join("refs"))?;
        fs::write(path.join("uuid"), uuid::Uuid::new_v4().to_string())?;

        let mut tree = BTreeMap::new();
        tree.insert(String::new(), Node::dir(0));
        let record = RevisionRecord {
            revision: 0,
            author: None,
            date: Utc::now(),
            message: None,
            tree,
            changes: BTreeMap::new(),
        };
        write_record(path, &record)?;
        fs::write(path.join("refs").join("head"), "0")?;
        fs::write(path.join("format"), FORMAT_MARKER)?;

        tracing::info!("Created repository at {:?}", path);
        Self::open(path)
    }

    /// Open an existing repository
    pub fn open(path: &Path) -> Result<Self> {
        if !Self::is_repository(path) {
            bail!("{:?} is not a dsvn repository", path);
        }
        let uuid = fs::read_to_string(path.join("uuid"))
            .with_context(|| format!("Failed to read uuid of {:?}", path))?
            .trim()
            .to_string();
        let capacity = NonZeroUsize::new(REVISION_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            root: path.to_path_buf(),
            uuid,
            cache: Mutex::new(LruCache::new(capacity)),
            commit_lock: Mutex::new(()),
        })
    }

    /// Check for the format marker
    pub fn is_repository(path: &Path) -> bool {
        fs::read_to_string(path.join("format"))
            .map(|s| s.trim() == FORMAT_MARKER)
            .unwrap_or(false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Youngest revision, read from the head ref so other handles' commits are seen
    pub fn youngest(&self) -> Result<Revnum> {
        let head_path = self.root.join("refs").join("head");
        fs::read_to_string(&head_path)
            .with_context(|| format!("Failed to read {:?}", head_path))?
            .trim()
            .parse::<Revnum>()
            .with_context(|| format!("Corrupt head ref in {:?}", self.root))
    }

    /// Load a revision record (cached)
    pub fn revision(&self, rev: Revnum) -> Result<Arc<RevisionRecord>> {
        if rev < 0 || rev > self.youngest()? {
            bail!("No such revision {}", rev);
        }
        if let Some(record) = self.cache.lock().get(&rev) {
            return Ok(record.clone());
        }
        let path = record_path(&self.root, rev);
        let data = fs::read(&path).with_context(|| format!("Revision r{} not found", rev))?;
        let record: RevisionRecord = bincode::deserialize(&data)
            .with_context(|| format!("Corrupt revision record r{}", rev))?;
        let record = Arc::new(record);
        self.cache.lock().put(rev, record.clone());
        Ok(record)
    }

    /// Node at `path` in `rev`
    pub fn node(&self, rev: Revnum, path: &str) -> Result<Option<Node>> {
        Ok(self.revision(rev)?.node(&normalize(path)).cloned())
    }

    /// Read a file text
    pub fn read_text(&self, id: &ObjectId) -> Result<Bytes> {
        let path = id.shard_path(&self.root.join("objects"));
        let compressed =
            fs::read(&path).with_context(|| format!("Object {} not found at {:?}", id, path))?;
        let data = zstd::decode_all(&compressed[..])
            .map_err(|e| anyhow!("Failed to decompress object {}: {}", id, e))?;
        Ok(Bytes::from(data))
    }

    fn write_text(&self, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::from_data(data);
        let path = id.shard_path(&self.root.join("objects"));
        if path.exists() {
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let compressed = zstd::encode_all(data, 3)
            .map_err(|e| anyhow!("Failed to compress object {}: {}", id, e))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &compressed)?;
        fs::rename(&tmp_path, &path)?;
        Ok(id)
    }

    /// Start a transaction against the youngest revision
    pub fn begin(&self, author: &str, message: &str) -> Result<Transaction<'_>> {
        let base_rev = self.youngest()?;
        let base = self.revision(base_rev)?;
        Ok(Transaction {
            repo: self,
            base_rev,
            tree: base.tree.clone(),
            changes: BTreeMap::new(),
            author: Some(author.to_string()),
            message: Some(message.to_string()),
            date: None,
        })
    }

    /// Youngest revision committed at or before `date`
    pub fn dated_revision(&self, date: DateTime<Utc>) -> Result<Revnum> {
        let (mut lo, mut hi) = (0, self.youngest()?);
        if self.revision(0)?.date > date {
            return Ok(0);
        }
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.revision(mid)?.date <= date {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(lo)
    }

    /// Revisions that touched `path`, following copies back to its creation.
    /// Entries are returned in the order `start` → `end`.
    pub fn history(&self, path: &str, start: Revnum, end: Revnum) -> Result<Vec<LogEntry>> {
        let (hi, lo) = (start.max(end), start.min(end));
        let mut current = Some(normalize(path));
        let mut entries = Vec::new();
        for rev in (lo..=hi).rev() {
            let Some(path) = current.as_deref() else {
                break;
            };
            let record = self.revision(rev)?;
            if record.revision > 0 && record.touches(path) {
                entries.push(record.log_entry());
            }
            current = record.previous_path(path);
        }
        if start < end {
            entries.reverse();
        }
        Ok(entries)
    }

    /// Absolute path `path@peg` had in each of `revisions` at or before `peg`.
    /// Revisions where the node did not exist are left out.
    pub fn locations(&self, path: &str, peg: Revnum, revisions: &[Revnum]) -> Result<BTreeMap<Revnum, String>> {
        let path = normalize(path);
        if self.node(peg, &path)?.is_none() {
            bail!("Path '{}' not found in revision {}", to_abs(&path), peg);
        }
        let mut wanted: Vec<Revnum> = revisions.iter().copied().filter(|r| *r <= peg && *r >= 0).collect();
        wanted.sort_unstable_by(|a, b| b.cmp(a));
        wanted.dedup();

        let mut found = BTreeMap::new();
        let mut current = Some(path);
        let mut wanted = wanted.into_iter().peekable();
        for rev in (0..=peg).rev() {
            let Some(path) = current.clone() else {
                break;
            };
            if wanted.peek() == Some(&rev) {
                wanted.next();
                found.insert(rev, to_abs(&path));
            }
            if wanted.peek().is_none() {
                break;
            }
            current = self.revision(rev)?.previous_path(&path);
        }
        Ok(found)
    }
}

fn record_path(root: &Path, rev: Revnum) -> PathBuf {
    root.join("revs").join(format!("{}.bin", rev))
}

fn write_record(root: &Path, record: &RevisionRecord) -> Result<()> {
    let path = record_path(root, record.revision);
    let data = bincode::serialize(record)
        .with_context(|| format!("Failed to serialize revision r{}", record.revision))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, &data)?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Pending changes on top of the youngest revision
pub struct Transaction<'a> {
    repo: &'a FsRepository,
    base_rev: Revnum,
    tree: BTreeMap<String, Node>,
    changes: BTreeMap<String, ChangedPath>,
    author: Option<String>,
    message: Option<String>,
    date: Option<DateTime<Utc>>,
}

impl<'a> Transaction<'a> {
    fn require_dir(&self, path: &str) -> Result<()> {
        match self.tree.get(path) {
            Some(node) if node.kind == NodeKind::Dir => Ok(()),
            Some(_) => bail!("'{}' is not a directory", path),
            None => bail!("Directory '{}' does not exist", path),
        }
    }

    fn record(&mut self, path: &str, change: ChangedPath) {
        let key = to_abs(path);
        let previous = self.changes.get(&key).map(|c| c.action);
        let merged = match (previous, change.action) {
            (Some(ChangeAction::Deleted), ChangeAction::Added) => {
                Some(ChangedPath { action: ChangeAction::Replaced, ..change })
            }
            (Some(ChangeAction::Added | ChangeAction::Replaced), ChangeAction::Modified) => None,
            (Some(ChangeAction::Added), ChangeAction::Deleted) => {
                self.changes.remove(&key);
                None
            }
            (Some(ChangeAction::Replaced), ChangeAction::Deleted) => {
                Some(ChangedPath::new(ChangeAction::Deleted, change.kind))
            }
            _ => Some(change),
        };
        if let Some(change) = merged {
            self.changes.insert(key, change);
        }
    }

    /// Create a directory
    pub fn mkdir(&mut self, path: &str) -> Result<&mut Self> {
        let path = normalize(path);
        if self.tree.contains_key(&path) {
            bail!("Path '{}' already exists", path);
        }
        self.require_dir(relpath::dirname(&path))?;
        self.tree.insert(path.clone(), Node::dir(self.base_rev));
        self.record(&path, ChangedPath::new(ChangeAction::Added, NodeKind::Dir));
        Ok(self)
    }

    /// Add or replace the text of a file
    pub fn put_file(&mut self, path: &str, data: impl AsRef<[u8]>) -> Result<&mut Self> {
        let path = normalize(path);
        self.require_dir(relpath::dirname(&path))?;
        let id = self.repo.write_text(data.as_ref())?;
        match self.tree.get_mut(&path) {
            Some(node) if node.kind == NodeKind::Dir => bail!("'{}' is a directory", path),
            Some(node) => {
                node.content = Some(id);
                self.record(&path, ChangedPath::new(ChangeAction::Modified, NodeKind::File));
            }
            None => {
                self.tree.insert(path.clone(), Node::file(id, self.base_rev));
                self.record(&path, ChangedPath::new(ChangeAction::Added, NodeKind::File));
            }
        }
        Ok(self)
    }

    /// Delete a node and everything below it
    pub fn delete(&mut self, path: &str) -> Result<&mut Self> {
        let path = normalize(path);
        if path.is_empty() {
            bail!("Cannot delete the repository root");
        }
        let kind = match self.tree.get(&path) {
            Some(node) => node.kind,
            None => bail!("Path '{}' does not exist", path),
        };
        self.tree
            .retain(|key, _| !relpath::is_ancestor(&path, key));
        let abs = to_abs(&path);
        self.changes.retain(|key, _| !is_abs_descendant(&abs, key));
        self.record(&path, ChangedPath::new(ChangeAction::Deleted, kind));
        Ok(self)
    }

    /// Copy `from_path@from_rev` to `to_path`
    pub fn copy(&mut self, from_path: &str, from_rev: Revnum, to_path: &str) -> Result<&mut Self> {
        let from_path = normalize(from_path);
        let to_path = normalize(to_path);
        if self.tree.contains_key(&to_path) {
            bail!("Path '{}' already exists", to_path);
        }
        self.require_dir(relpath::dirname(&to_path))?;
        let source = self.repo.revision(from_rev)?;
        let kind = match source.node(&from_path) {
            Some(node) => node.kind,
            None => bail!("Path '{}' does not exist in revision {}", from_path, from_rev),
        };
        for (key, node) in source.tree.iter() {
            if let Some(rest) = relpath::skip_ancestor(&from_path, key) {
                self.tree.insert(relpath::join(&to_path, rest), node.clone());
            }
        }
        self.record(
            &to_path,
            ChangedPath::copied(kind, ChangeAction::Added, &to_abs(&from_path), from_rev),
        );
        Ok(self)
    }

    /// Set (`Some`) or delete (`None`) a property
    pub fn set_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<&mut Self> {
        let path = normalize(path);
        let node = self
            .tree
            .get_mut(&path)
            .ok_or_else(|| anyhow!("Path '{}' does not exist", path))?;
        match value {
            Some(v) => {
                node.props.insert(name.to_string(), v.to_string());
            }
            None => {
                node.props.remove(name);
            }
        }
        let kind = node.kind;
        self.record(&path, ChangedPath::new(ChangeAction::Modified, kind));
        Ok(self)
    }

    /// Override the commit date
    pub fn set_date(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.date = Some(date);
        self
    }

    /// Commit and return the new revision number
    pub fn commit(self) -> Result<Revnum> {
        let repo = self.repo;
        let _guard = repo.commit_lock.lock();
        let head = repo.youngest()?;
        if head != self.base_rev {
            bail!("Transaction is out of date: base r{}, youngest r{}", self.base_rev, head);
        }
        let new_rev = head + 1;
        let mut tree = self.tree;

        for (abs, change) in &self.changes {
            let path = from_abs(abs);
            if change.action != ChangeAction::Deleted {
                if let Some(node) = tree.get_mut(&path) {
                    node.created_rev = new_rev;
                }
            }
            let mut parent = path.as_str();
            while !parent.is_empty() {
                parent = relpath::dirname(parent);
                if let Some(node) = tree.get_mut(parent) {
                    node.created_rev = new_rev;
                }
            }
        }

        let record = RevisionRecord {
            revision: new_rev,
            author: self.author,
            date: self.date.unwrap_or_else(Utc::now),
            message: self.message,
            tree,
            changes: self.changes,
        };
        write_record(&repo.root, &record)?;
        fs::write(repo.root.join("refs").join("head"), new_rev.to_string())?;
        repo.cache.lock().put(new_rev, Arc::new(record));

        tracing::info!("Committed revision {}", new_rev);
        Ok(new_rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, FsRepository) {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::create(&dir.path().join("repo")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_create_and_reopen() {
        let (dir, repo) = repo();
        assert_eq!(repo.youngest().unwrap(), 0);
        assert_eq!(repo.uuid().len(), 36);
        let uuid = repo.uuid().to_string();
        drop(repo);

        let reopened = FsRepository::open(&dir.path().join("repo")).unwrap();
        assert_eq!(reopened.uuid(), uuid);
        assert!(FsRepository::create(&dir.path().join("repo")).is_err());
    }

    #[test]
    fn test_commit_tree_and_texts() {
        let (_dir, repo) = repo();
        let mut txn = repo.begin("alice", "import").unwrap();
        txn.mkdir("trunk").unwrap().put_file("trunk/a.txt", b"hello").unwrap();
        let rev = txn.commit().unwrap();
        assert_eq!(rev, 1);

        let node = repo.node(1, "trunk/a.txt").unwrap().unwrap();
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.created_rev, 1);
        let text = repo.read_text(&node.content.unwrap()).unwrap();
        assert_eq!(&text[..], b"hello");

        let record = repo.revision(1).unwrap();
        let names: Vec<&str> = record.children("trunk").map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.txt"]);
        assert_eq!(record.changes["/trunk"].action, ChangeAction::Added);
    }

    #[test]
    fn test_created_rev_bubbles_to_ancestors_only() {
        let (_dir, repo) = repo();
        let mut txn = repo.begin("a", "1").unwrap();
        txn.mkdir("trunk").unwrap()
            .mkdir("trunk/lib").unwrap()
            .put_file("trunk/lib/x.c", b"x").unwrap()
            .put_file("trunk/readme", b"r").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("a", "2").unwrap();
        txn.put_file("trunk/lib/x.c", b"y").unwrap();
        txn.commit().unwrap();

        let r2 = repo.revision(2).unwrap();
        assert_eq!(r2.node("trunk/lib/x.c").unwrap().created_rev, 2);
        assert_eq!(r2.node("trunk/lib").unwrap().created_rev, 2);
        assert_eq!(r2.node("trunk").unwrap().created_rev, 2);
        assert_eq!(r2.node("trunk/readme").unwrap().created_rev, 1);
        assert_eq!(r2.changes.len(), 1);
    }

    #[test]
    fn test_delete_then_add_is_replace() {
        let (_dir, repo) = repo();
        let mut txn = repo.begin("a", "1").unwrap();
        txn.put_file("f", b"1").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("a", "2").unwrap();
        txn.delete("f").unwrap().mkdir("f").unwrap();
        txn.commit().unwrap();
        let r2 = repo.revision(2).unwrap();
        assert_eq!(r2.changes["/f"].action, ChangeAction::Replaced);
        assert_eq!(r2.node("f").unwrap().kind, NodeKind::Dir);
    }

    #[test]
    fn test_history_follows_copies() {
        let (_dir, repo) = repo();
        let mut txn = repo.begin("a", "1").unwrap();
        txn.mkdir("trunk").unwrap().put_file("trunk/f", b"1").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("a", "2").unwrap();
        txn.mkdir("branches").unwrap().copy("trunk", 1, "branches/b").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("a", "3").unwrap();
        txn.put_file("branches/b/f", b"2").unwrap();
        txn.commit().unwrap();

        let revs: Vec<Revnum> = repo
            .history("branches/b/f", 3, 0)
            .unwrap()
            .iter()
            .map(|e| e.revision)
            .collect();
        assert_eq!(revs, vec![3, 2, 1]);

        let forward: Vec<Revnum> = repo
            .history("branches/b/f", 0, 3)
            .unwrap()
            .iter()
            .map(|e| e.revision)
            .collect();
        assert_eq!(forward, vec![1, 2, 3]);
    }

    #[test]
    fn test_locations_before_peg() {
        let (_dir, repo) = repo();
        let mut txn = repo.begin("a", "1").unwrap();
        txn.mkdir("trunk").unwrap().put_file("trunk/f", b"1").unwrap();
        txn.commit().unwrap();
        let mut txn = repo.begin("a", "2").unwrap();
        txn.copy("trunk/f", 1, "g").unwrap().delete("trunk/f").unwrap();
        txn.commit().unwrap();

        let found = repo.locations("g", 2, &[0, 1, 2, 5]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&2], "/g");
        assert_eq!(found[&1], "/trunk/f");
        assert!(repo.locations("nope", 2, &[1]).is_err());
    }

    #[test]
    fn test_dated_revision() {
        let (_dir, repo) = repo();
        let base = Utc::now() + chrono::Duration::days(1);
        for i in 1..=3 {
            let mut txn = repo.begin("a", "m").unwrap();
            txn.put_file(&format!("f{}", i), b"x").unwrap();
            txn.set_date(base + chrono::Duration::hours(i));
            txn.commit().unwrap();
        }
        let probe = base + chrono::Duration::minutes(150);
        assert_eq!(repo.dated_revision(probe).unwrap(), 2);
        assert_eq!(repo.dated_revision(base + chrono::Duration::days(5)).unwrap(), 3);
    }

    #[test]
    fn test_stale_transaction_is_rejected() {
        let (_dir, repo) = repo();
        let mut first = repo.begin("a", "1").unwrap();
        first.put_file("a", b"1").unwrap();
        let mut second = repo.begin("b", "2").unwrap();
        second.put_file("b", b"2").unwrap();
        first.commit().unwrap();
        assert!(second.commit().is_err());
    }
}
