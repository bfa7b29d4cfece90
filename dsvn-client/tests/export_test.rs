//! Exports from the repository and from working copies

mod common;

use common::{read, Fixture};
use dsvn_client::{EventAction, RevisionSpec, Target, WorkingCopy, ADMIN_DIR};
use dsvn_ra::{Depth, ErrorCode};
use std::fs;

#[test]
fn test_export_directory_from_repository() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let out = fx.path("out");

    let rev = client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::number(5), None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(rev, 5);
    assert_eq!(read(&out.join("a.txt")), "two\n");
    assert_eq!(read(&out.join("new.txt")), "fresh\n");
    assert!(out.join("lib").is_dir());
    assert!(!out.join(ADMIN_DIR).exists());
    assert!(!WorkingCopy::is_working_copy(&out));
    assert_eq!(handler.actions().last(), Some(&EventAction::UpdateCompleted));
}

#[test]
fn test_export_honours_depth() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let out = fx.path("out");
    client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, false, Depth::Files)
        .unwrap();
    assert!(out.join("a.txt").exists());
    assert!(!out.join("lib").exists());
}

#[test]
fn test_export_single_file() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let out = fx.path("out");
    fs::create_dir(&out).unwrap();

    client
        .export(&Target::Url(fx.url("trunk/a.txt")), &out, RevisionSpec::Undefined, RevisionSpec::number(1), None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&out.join("a.txt")), "one\n");

    let err = client
        .export(&Target::Url(fx.url("trunk/a.txt")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, false, Depth::Infinity)
        .unwrap_err();
    assert!(err.is(ErrorCode::WcObstructedUpdate));

    client
        .export(&Target::Url(fx.url("trunk/a.txt")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, true, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&out.join("a.txt")), "three\n");
}

#[test]
fn test_existing_files_kept_unless_overwriting() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let out = fx.path("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("a.txt"), b"local\n").unwrap();

    client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&out.join("a.txt")), "local\n");
    assert_eq!(read(&out.join("new.txt")), "fresh\n");
    assert!(handler.actions().contains(&EventAction::Exists));

    client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, true, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&out.join("a.txt")), "three\n");
}

#[test]
fn test_export_into_file_fails() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let out = fx.path("out");
    fs::write(&out, b"x").unwrap();
    let err = client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, false, Depth::Infinity)
        .unwrap_err();
    assert!(err.is(ErrorCode::WcNodeKindChange));

    let err = client
        .export(&Target::Url(fx.url("nope")), &fx.path("none"), RevisionSpec::Undefined, RevisionSpec::HEAD, None, false, Depth::Infinity)
        .unwrap_err();
    assert!(!err.is(ErrorCode::Cancelled));
}

#[test]
fn test_export_translates_native_eol() {
    let fx = Fixture::new();
    let repo = fx.repo();
    let mut txn = repo.begin("carol", "eol").unwrap();
    txn.put_file("trunk/lines.txt", b"x\ny\n").unwrap()
        .set_prop("trunk/lines.txt", "svn:eol-style", Some("native")).unwrap();
    txn.commit().unwrap();

    let (client, _handler) = fx.client();
    let out = fx.path("out");
    client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, Some("CRLF"), false, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&out.join("lines.txt")), "x\r\ny\r\n");
    assert_eq!(read(&out.join("a.txt")), "three\n");

    let err = client
        .export(&Target::Url(fx.url("trunk")), &fx.path("other"), RevisionSpec::Undefined, RevisionSpec::HEAD, Some("EBCDIC"), false, Depth::Infinity)
        .unwrap_err();
    assert!(err.is(ErrorCode::Io));
}

#[test]
fn test_export_includes_externals() {
    let fx = Fixture::new();
    let repo = fx.repo();
    let mut txn = repo.begin("carol", "externals").unwrap();
    txn.set_prop("trunk", "svn:externals", Some("^/branches/b ext")).unwrap();
    txn.commit().unwrap();

    let (client, _handler) = fx.client();
    let out = fx.path("out");
    client
        .export(&Target::Url(fx.url("trunk")), &out, RevisionSpec::Undefined, RevisionSpec::HEAD, None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&out.join("ext/new.txt")), "branched\n");
    assert!(!out.join("ext").join(ADMIN_DIR).exists());
}

#[test]
fn test_export_working_copy_working_and_base() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    fs::write(wc_path.join("a.txt"), b"mine\n").unwrap();
    fs::write(wc_path.join("added.txt"), b"added\n").unwrap();
    let mut wc = WorkingCopy::open(&wc_path).unwrap();
    wc.schedule_add("added.txt").unwrap();
    wc.schedule_delete("new.txt").unwrap();
    wc.save().unwrap();

    let working = fx.path("working");
    let rev = client
        .export(&Target::Path(wc_path.clone()), &working, RevisionSpec::Undefined, RevisionSpec::WORKING, None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(rev, 7);
    assert_eq!(read(&working.join("a.txt")), "mine\n");
    assert_eq!(read(&working.join("added.txt")), "added\n");
    assert!(!working.join("new.txt").exists());
    assert_eq!(read(&working.join("lib/y.c")), "int y;\n");
    assert!(!working.join(ADMIN_DIR).exists());

    let base = fx.path("base");
    client
        .export(&Target::Path(wc_path.clone()), &base, RevisionSpec::Undefined, RevisionSpec::BASE, None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(read(&base.join("a.txt")), "three\n");
    assert_eq!(read(&base.join("new.txt")), "fresh\n");
    assert!(!base.join("added.txt").exists());
}

#[test]
fn test_export_working_copy_at_repository_revision() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let out = fx.path("out");
    let rev = client
        .export(&Target::Path(wc_path), &out, RevisionSpec::Undefined, RevisionSpec::number(2), None, false, Depth::Infinity)
        .unwrap();
    assert_eq!(rev, 2);
    assert_eq!(read(&out.join("a.txt")), "two\n");
    assert!(!out.join("new.txt").exists());
}

#[test]
fn test_export_of_path_missing_at_peg_names_the_peg() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let out = fx.path("out");

    // trunk/new.txt only appears in r3
    let err = client
        .export(&Target::Url(fx.url("trunk/new.txt")), &out, RevisionSpec::number(2), RevisionSpec::number(1), None, false, Depth::Infinity)
        .unwrap_err();
    assert!(err.is(ErrorCode::FsNotFound));
    assert!(err.to_string().contains("doesn't exist at revision 2"));
    assert!(!out.exists());
}
