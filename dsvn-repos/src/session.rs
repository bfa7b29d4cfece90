//! `file://` sessions over an on-disk repository

use crate::delta::DeltaDriver;
use crate::fs_repository::FsRepository;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dsvn_ra::{
    is_valid_revision, relpath, svn_err, Authenticator, Canceller, Capability, DebugSink, Depth,
    DirEntry, Editor, LogEntry, NodeKind, PropertyMap, RepoUrl, ReportState, Result, Revnum, Session,
    SessionFactory,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Session bound to a local repository
pub struct LocalSession {
    repo: Arc<FsRepository>,
    root_url: RepoUrl,
    url: RepoUrl,
    authenticator: Option<Arc<dyn Authenticator>>,
    canceller: Option<Arc<dyn Canceller>>,
    debug: Option<Arc<dyn DebugSink>>,
    open: bool,
}

impl LocalSession {
    /// Open a session on `url`, locating the repository along its path
    pub fn open(url: &RepoUrl) -> Result<Self> {
        let root = find_repository(url)?;
        let repo = FsRepository::open(&root)?;
        Self::with_repository(Arc::new(repo), url)
    }

    /// Open a session on an already opened repository
    pub fn with_repository(repo: Arc<FsRepository>, url: &RepoUrl) -> Result<Self> {
        let root_path = repo.root().to_string_lossy().replace('\\', "/");
        let root_url = url.with_path(&root_path)?;
        if !root_url.is_ancestor_of(url) {
            return Err(svn_err!(
                IllegalUrl,
                "'{0}' is not in the repository at '{1}'",
                url,
                root_url
            ));
        }
        tracing::debug!("Opened session on {}", url);
        Ok(Self {
            repo,
            root_url,
            url: url.clone(),
            authenticator: None,
            canceller: None,
            debug: None,
            open: true,
        })
    }

    pub fn repository(&self) -> &Arc<FsRepository> {
        &self.repo
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    /// Repository path of the session URL
    fn anchor(&self) -> String {
        self.root_url.relative_path(&self.url).unwrap_or_default()
    }

    fn resolve(&self, path: &str) -> String {
        relpath::join(&self.anchor(), path.trim_matches('/'))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(svn_err!(Io, "Session to '{0}' is closed", self.url))
        }
    }

    fn trace(&self, message: &str) {
        if let Some(sink) = &self.debug {
            sink.record(&self.url.to_string(), message);
        }
    }

    fn head_or(&self, revision: Revnum) -> Result<Revnum> {
        if is_valid_revision(revision) {
            Ok(revision)
        } else {
            Ok(self.repo.youngest()?)
        }
    }

    fn check_revision(&self, revision: Revnum) -> Result<Revnum> {
        let revision = self.head_or(revision)?;
        let youngest = self.repo.youngest()?;
        if revision > youngest {
            return Err(svn_err!(FsNotFound, "No such revision {0}", revision));
        }
        Ok(revision)
    }

    #[allow(clippy::too_many_arguments)]
    fn drive(
        &mut self,
        revision: Revnum,
        target: Option<&str>,
        dest: &str,
        depth: Depth,
        send_text: bool,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()> {
        self.ensure_open()?;
        let revision = self.check_revision(revision)?;
        let anchor = self.anchor();
        self.trace(&format!(
            "drive anchor='{}' target={:?} dest='{}' r{} depth={}",
            anchor, target, dest, revision, depth
        ));
        let mut driver = DeltaDriver::new(
            &self.repo,
            &self.root_url,
            &anchor,
            report.into_claims(),
            revision,
            depth,
            send_text,
            self.canceller.clone(),
        )?;
        driver.run(editor, target, dest)
    }
}

impl Session for LocalSession {
    fn url(&self) -> &RepoUrl {
        &self.url
    }

    fn reparent(&mut self, url: &RepoUrl) -> Result<()> {
        self.ensure_open()?;
        if !self.root_url.is_ancestor_of(url) {
            return Err(svn_err!(
                IllegalUrl,
                "'{0}' is not in the same repository as '{1}'",
                url,
                self.url
            ));
        }
        self.trace(&format!("reparent {} -> {}", self.url, url));
        self.url = url.clone();
        Ok(())
    }

    fn repository_root(&mut self) -> Result<RepoUrl> {
        self.ensure_open()?;
        Ok(self.root_url.clone())
    }

    fn repository_uuid(&mut self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.repo.uuid().to_string())
    }

    fn latest_revision(&mut self) -> Result<Revnum> {
        self.ensure_open()?;
        Ok(self.repo.youngest()?)
    }

    fn dated_revision(&mut self, date: DateTime<Utc>) -> Result<Revnum> {
        self.ensure_open()?;
        Ok(self.repo.dated_revision(date)?)
    }

    fn check_path(&mut self, path: &str, revision: Revnum) -> Result<NodeKind> {
        self.ensure_open()?;
        let revision = self.check_revision(revision)?;
        Ok(self
            .repo
            .node(revision, &self.resolve(path))?
            .map(|n| n.kind)
            .unwrap_or(NodeKind::None))
    }

    fn get_file(&mut self, path: &str, revision: Revnum) -> Result<(Bytes, PropertyMap)> {
        self.ensure_open()?;
        let revision = self.check_revision(revision)?;
        let full = self.resolve(path);
        match self.repo.node(revision, &full)? {
            Some(node) if node.kind == NodeKind::File => {
                let text = match &node.content {
                    Some(id) => self.repo.read_text(id)?,
                    None => Bytes::new(),
                };
                Ok((text, node.props))
            }
            Some(_) => Err(svn_err!(
                FsNotFound,
                "Attempted to get textual contents of a *non*-file node '/{0}'",
                full
            )),
            None => Err(svn_err!(
                FsNotFound,
                "File not found: revision {0}, path '/{1}'",
                revision,
                full
            )),
        }
    }

    fn get_dir(&mut self, path: &str, revision: Revnum) -> Result<(Vec<DirEntry>, PropertyMap)> {
        self.ensure_open()?;
        let revision = self.check_revision(revision)?;
        let full = self.resolve(path);
        let record = self.repo.revision(revision)?;
        match record.node(&full) {
            Some(node) if node.kind == NodeKind::Dir => {
                let entries = record
                    .children(&full)
                    .map(|(name, child)| DirEntry {
                        name: name.to_string(),
                        kind: child.kind,
                        created_rev: child.created_rev,
                    })
                    .collect();
                Ok((entries, node.props.clone()))
            }
            _ => Err(svn_err!(
                FsNotFound,
                "Path '/{0}' is not a directory in revision {1}",
                full,
                revision
            )),
        }
    }

    fn log(
        &mut self,
        paths: &[String],
        start: Revnum,
        end: Revnum,
        discover_changed_paths: bool,
        handler: &mut dyn FnMut(LogEntry) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;
        let start = self.check_revision(start)?;
        let end = self.check_revision(end)?;
        let newest = start.max(end);

        let targets: Vec<String> = if paths.is_empty() {
            vec![self.anchor()]
        } else {
            paths.iter().map(|p| self.resolve(p)).collect()
        };
        let mut merged: BTreeMap<Revnum, LogEntry> = BTreeMap::new();
        for target in &targets {
            if self.repo.node(newest, target)?.is_none() {
                return Err(svn_err!(
                    FsNotFound,
                    "File not found: revision {0}, path '/{1}'",
                    newest,
                    target
                ));
            }
            for entry in self.repo.history(target, start, end)? {
                merged.entry(entry.revision).or_insert(entry);
            }
        }

        let mut entries: Vec<LogEntry> = merged.into_values().collect();
        if start > end {
            entries.reverse();
        }
        for mut entry in entries {
            if let Some(c) = &self.canceller {
                c.check_cancelled()?;
            }
            if !discover_changed_paths {
                entry.changed_paths.clear();
            }
            handler(entry)?;
        }
        Ok(())
    }

    fn get_locations(
        &mut self,
        path: &str,
        peg_revision: Revnum,
        revisions: &[Revnum],
    ) -> Result<BTreeMap<Revnum, String>> {
        self.ensure_open()?;
        let peg = self.check_revision(peg_revision)?;
        let found = self.repo.locations(&self.resolve(path), peg, revisions)?;
        self.trace(&format!(
            "get-locations '{}'@{} -> {} of {}",
            path,
            peg,
            found.len(),
            revisions.len()
        ));
        Ok(found)
    }

    fn update(
        &mut self,
        revision: Revnum,
        target: Option<&str>,
        depth: Depth,
        _send_copy_from: bool,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()> {
        let dest = self.resolve(target.unwrap_or(""));
        self.drive(revision, target, &dest, depth, true, report, editor)
    }

    fn switch(
        &mut self,
        url: &RepoUrl,
        revision: Revnum,
        target: Option<&str>,
        depth: Depth,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()> {
        let dest = self.root_url.relative_path(url).ok_or_else(|| {
            svn_err!(
                InvalidSwitch,
                "'{0}' is not the same repository as '{1}'",
                url,
                self.root_url
            )
        })?;
        self.drive(revision, target, &dest, depth, true, report, editor)
    }

    fn status(
        &mut self,
        revision: Revnum,
        target: Option<&str>,
        depth: Depth,
        report: ReportState,
        editor: &mut dyn Editor,
    ) -> Result<()> {
        let dest = self.resolve(target.unwrap_or(""));
        self.drive(revision, target, &dest, depth, false, report, editor)
    }

    fn has_capability(&mut self, capability: Capability) -> Result<bool> {
        self.ensure_open()?;
        Ok(matches!(capability, Capability::Depth | Capability::LogRevProps))
    }

    fn set_authenticator(&mut self, authenticator: Option<Arc<dyn Authenticator>>) {
        self.authenticator = authenticator;
    }

    fn set_canceller(&mut self, canceller: Option<Arc<dyn Canceller>>) {
        self.canceller = canceller;
    }

    fn set_debug_sink(&mut self, sink: Option<Arc<dyn DebugSink>>) {
        self.debug = sink;
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            tracing::debug!("Closed session on {}", self.url);
        }
        self.open = false;
        Ok(())
    }
}

/// Walk up the URL's filesystem path to the directory holding the format marker
fn find_repository(url: &RepoUrl) -> Result<PathBuf> {
    if url.scheme() != "file" {
        return Err(svn_err!(IllegalUrl, "Unrecognized URL scheme for '{0}'", url));
    }
    if !url.host().is_empty() && url.host() != "localhost" {
        return Err(svn_err!(IllegalUrl, "Local URL '{0}' contains unsupported hostname", url));
    }
    let full = PathBuf::from(if url.path().is_empty() { "/" } else { url.path() });
    let mut probe: Option<&Path> = Some(full.as_path());
    while let Some(dir) = probe {
        if FsRepository::is_repository(dir) {
            return Ok(dir.to_path_buf());
        }
        probe = dir.parent();
    }
    Err(svn_err!(
        RaAccessRequired,
        "Unable to open repository '{0}'",
        url
    ))
}

/// Opens [`LocalSession`]s, sharing one repository handle per repository root
#[derive(Default)]
pub struct LocalSessionFactory {
    repos: Mutex<HashMap<PathBuf, Arc<FsRepository>>>,
}

impl LocalSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionFactory for LocalSessionFactory {
    fn open(&self, url: &RepoUrl) -> Result<Box<dyn Session>> {
        let root = find_repository(url)?;
        let repo = {
            let mut repos = self.repos.lock();
            match repos.get(&root) {
                Some(repo) => repo.clone(),
                None => {
                    let repo = Arc::new(FsRepository::open(&root)?);
                    repos.insert(root, repo.clone());
                    repo
                }
            }
        };
        Ok(Box::new(LocalSession::with_repository(repo, url)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RepoUrl) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo");
        let repo = FsRepository::create(&path).unwrap();
        let mut txn = repo.begin("alice", "import").unwrap();
        txn.mkdir("trunk").unwrap().put_file("trunk/a.txt", b"hello").unwrap();
        txn.set_prop("trunk/a.txt", "svn:eol-style", Some("native")).unwrap();
        txn.commit().unwrap();
        let url = RepoUrl::parse(&format!("file://{}", path.to_string_lossy())).unwrap();
        (dir, url)
    }

    #[test]
    fn test_open_below_root() {
        let (_dir, root) = setup();
        let mut session = LocalSession::open(&root.append_path("trunk")).unwrap();
        assert_eq!(session.repository_root().unwrap(), root);
        assert_eq!(session.latest_revision().unwrap(), 1);
        assert_eq!(session.check_path("a.txt", -1).unwrap(), NodeKind::File);
        assert_eq!(session.check_path("missing", 1).unwrap(), NodeKind::None);
    }

    #[test]
    fn test_get_file() {
        let (_dir, root) = setup();
        let mut session = LocalSession::open(&root).unwrap();
        let (text, props) = session.get_file("trunk/a.txt", 1).unwrap();
        assert_eq!(&text[..], b"hello");
        assert_eq!(props.get("svn:eol-style").map(String::as_str), Some("native"));
        assert!(session.get_file("trunk", 1).is_err());
    }

    #[test]
    fn test_get_dir() {
        let (_dir, root) = setup();
        let mut session = LocalSession::open(&root).unwrap();
        let (entries, _) = session.get_dir("trunk", 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].kind, NodeKind::File);
        assert!(session.get_dir("trunk/a.txt", 1).is_err());
    }

    #[test]
    fn test_reparent_outside_repository_fails() {
        let (_dir, root) = setup();
        let mut session = LocalSession::open(&root).unwrap();
        let other = RepoUrl::parse("file:///elsewhere").unwrap();
        assert!(session.reparent(&other).is_err());
        session.reparent(&root.append_path("trunk")).unwrap();
        assert_eq!(session.url(), &root.append_path("trunk"));
    }

    #[test]
    fn test_closed_session_rejects_calls() {
        let (_dir, root) = setup();
        let mut session = LocalSession::open(&root).unwrap();
        session.close().unwrap();
        assert!(session.latest_revision().is_err());
    }

    #[test]
    fn test_factory_rejects_foreign_scheme() {
        let factory = LocalSessionFactory::new();
        let url = RepoUrl::parse("http://example.com/repo").unwrap();
        let err = factory.open(&url).err().unwrap();
        assert!(err.is(dsvn_ra::ErrorCode::IllegalUrl));
    }
}
