//! Relocating a working copy after its repository moved

mod common;

use common::{file_url, read, Fixture};
use dsvn_client::{RevisionSpec, WorkingCopy};
use dsvn_ra::{Depth, ErrorCode};
use dsvn_repos::FsRepository;
use std::fs;
use std::path::Path;

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let dst = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &dst);
        } else {
            fs::copy(entry.path(), &dst).unwrap();
        }
    }
}

#[test]
fn test_relocate_to_moved_repository() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let moved = fx.path("moved");
    copy_tree(&fx.repo_path, &moved);
    let new_root = file_url(&moved);
    client.relocate(&wc_path, &fx.root, &new_root, true).unwrap();

    let wc = WorkingCopy::open(&wc_path).unwrap();
    for (rel, entry) in wc.entries() {
        assert_eq!(entry.repos_root.as_ref(), Some(&new_root), "entry '{}'", rel);
    }
    assert_eq!(wc.url_of("lib/y.c"), Some(new_root.append_path("trunk/lib/y.c")));

    let repo = FsRepository::open(&moved).unwrap();
    let mut txn = repo.begin("dave", "after the move").unwrap();
    txn.put_file("trunk/a.txt", b"four\n").unwrap();
    txn.commit().unwrap();

    let rev = client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(rev, 8);
    assert_eq!(read(&wc_path.join("a.txt")), "four\n");
}

#[test]
fn test_relocate_with_full_urls_narrows_to_root() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let moved = fx.path("moved");
    copy_tree(&fx.repo_path, &moved);
    let new_root = file_url(&moved);
    client
        .relocate(&wc_path, &fx.url("trunk"), &new_root.append_path("trunk"), true)
        .unwrap();
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().url.as_ref(), Some(&new_root.append_path("trunk")));
}

#[test]
fn test_relocate_rejects_other_repository() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let other = fx.path("other");
    FsRepository::create(&other).unwrap();
    let err = client
        .relocate(&wc_path, &fx.root, &file_url(&other), true)
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidRelocation));

    let moved = fx.path("moved");
    copy_tree(&fx.repo_path, &moved);
    let err = client
        .relocate(&wc_path, &fx.root, &file_url(&moved).append_path("trunk"), true)
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidRelocation));

    // nothing was rewritten
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().url.as_ref(), Some(&fx.url("trunk")));
}

#[test]
fn test_relocate_requires_overlapping_prefix() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();
    let err = client
        .relocate(&wc_path, &fx.url("branches"), &fx.url("tags"), true)
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidRelocation));
}
