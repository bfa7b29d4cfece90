//! Shared repository fixture for client integration tests

#![allow(dead_code)]

use dsvn_client::{ClientOptions, CollectingHandler, SessionPool, UpdateClient};
use dsvn_ra::RepoUrl;
use dsvn_repos::{FsRepository, LocalSessionFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub repo_path: PathBuf,
    pub root: RepoUrl,
}

impl Fixture {
    /// r1: trunk/{a.txt, lib/x.c}
    /// r2: trunk/a.txt modified
    /// r3: trunk/new.txt added, trunk/lib/x.c deleted
    /// r4: branches/b copied from trunk@3
    /// r5: branches/b/new.txt modified
    /// r6: trunk/lib/y.c added
    /// r7: trunk/a.txt modified
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("repo");
        let repo = FsRepository::create(&repo_path).unwrap();

        let mut txn = repo.begin("alice", "import").unwrap();
        txn.mkdir("trunk").unwrap()
            .put_file("trunk/a.txt", b"one\n").unwrap()
            .mkdir("trunk/lib").unwrap()
            .put_file("trunk/lib/x.c", b"int x;\n").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("alice", "edit").unwrap();
        txn.put_file("trunk/a.txt", b"two\n").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("bob", "add and remove").unwrap();
        txn.put_file("trunk/new.txt", b"fresh\n").unwrap()
            .delete("trunk/lib/x.c").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("bob", "branch").unwrap();
        txn.mkdir("branches").unwrap().copy("trunk", 3, "branches/b").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("bob", "branch edit").unwrap();
        txn.put_file("branches/b/new.txt", b"branched\n").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("alice", "library").unwrap();
        txn.put_file("trunk/lib/y.c", b"int y;\n").unwrap();
        txn.commit().unwrap();

        let mut txn = repo.begin("alice", "edit again").unwrap();
        txn.put_file("trunk/a.txt", b"three\n").unwrap();
        txn.commit().unwrap();

        let root = file_url(&repo_path);
        Self { dir, repo_path, root }
    }

    pub fn url(&self, path: &str) -> RepoUrl {
        self.root.append_path(path)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn repo(&self) -> FsRepository {
        FsRepository::open(&self.repo_path).unwrap()
    }

    pub fn client(&self) -> (UpdateClient, Arc<CollectingHandler>) {
        self.client_with(ClientOptions::default())
    }

    pub fn client_with(&self, options: ClientOptions) -> (UpdateClient, Arc<CollectingHandler>) {
        let pool = Arc::new(SessionPool::new(Arc::new(LocalSessionFactory::new()), &options));
        let handler = Arc::new(CollectingHandler::new());
        let client = UpdateClient::new(pool, options).with_event_handler(handler.clone());
        (client, handler)
    }
}

pub fn file_url(path: &Path) -> RepoUrl {
    RepoUrl::parse(&format!("file://{}", path.to_string_lossy())).unwrap()
}

pub fn read(path: &Path) -> String {
    String::from_utf8(std::fs::read(path).unwrap()).unwrap()
}
