//! Checkout, update and switch against a local repository

mod common;

use common::{read, Fixture};
use dsvn_client::{
    ClientOptions, CollectingHandler, EventAction, RevisionSpec, SessionPool, TargetOutcome,
    UpdateClient, WorkingCopy,
};
use dsvn_ra::{Depth, ErrorCode, INVALID_REVISION};
use dsvn_repos::{FsRepository, LocalSessionFactory};
use std::fs;
use std::sync::Arc;

fn changes(actions: &[EventAction]) -> usize {
    actions
        .iter()
        .filter(|a| {
            matches!(
                a,
                EventAction::UpdateAdd | EventAction::UpdateUpdate | EventAction::UpdateDelete
            )
        })
        .count()
}

#[test]
fn test_checkout_then_update_to_head() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let wc_path = fx.path("wc");

    let rev = client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::number(5), Depth::Infinity, false)
        .unwrap();
    assert_eq!(rev, 5);
    assert_eq!(read(&wc_path.join("a.txt")), "two\n");
    assert_eq!(read(&wc_path.join("new.txt")), "fresh\n");
    assert!(wc_path.join("lib").is_dir());
    assert!(!wc_path.join("lib/x.c").exists());
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().revision, 5);
    assert!(!wc.root_entry().unwrap().incomplete);

    let rev = client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(rev, 7);
    assert_eq!(read(&wc_path.join("a.txt")), "three\n");
    assert_eq!(read(&wc_path.join("lib/y.c")), "int y;\n");
    let wc = WorkingCopy::open(&wc_path).unwrap();
    for (rel, entry) in wc.entries() {
        assert_eq!(entry.revision, 7, "entry '{}'", rel);
    }
    assert_eq!(wc.entry("a.txt").unwrap().last_author.as_deref(), Some("alice"));

    let seen = handler.actions().len();
    let rev = client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(rev, 7);
    let again = handler.actions()[seen..].to_vec();
    assert_eq!(changes(&again), 0);
    assert_eq!(again.last(), Some(&EventAction::UpdateCompleted));
}

#[test]
fn test_update_backwards_removes_later_additions() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let rev = client
        .update(&wc_path, RevisionSpec::number(5), Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(rev, 5);
    assert!(!wc_path.join("lib/y.c").exists());
    assert_eq!(read(&wc_path.join("a.txt")), "two\n");
    assert!(WorkingCopy::open(&wc_path).unwrap().entry("lib/y.c").is_none());
}

#[test]
fn test_single_file_update() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    client
        .update(&wc_path.join("a.txt"), RevisionSpec::number(2), Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(read(&wc_path.join("a.txt")), "two\n");
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.entry("a.txt").unwrap().revision, 2);
    assert_eq!(wc.root_entry().unwrap().revision, 7);
}

#[test]
fn test_sticky_depth_crops_and_restores() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Files, false, true)
        .unwrap();
    assert!(!wc_path.join("lib").exists());
    assert!(wc_path.join("a.txt").exists());
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().depth, Depth::Files);
    assert!(wc.entry("lib").is_none());

    // a non-sticky update keeps the recorded depth
    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert!(!wc_path.join("lib").exists());

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Infinity, false, true)
        .unwrap();
    assert_eq!(read(&wc_path.join("lib/y.c")), "int y;\n");
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().depth, Depth::Infinity);
}

#[test]
fn test_sticky_depth_deepens_empty_to_files() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Empty, false)
        .unwrap();
    assert!(!wc_path.join("a.txt").exists());

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Files, false, true)
        .unwrap();
    assert_eq!(read(&wc_path.join("a.txt")), "three\n");
    assert_eq!(read(&wc_path.join("new.txt")), "fresh\n");
    assert!(!wc_path.join("lib").exists());
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().depth, Depth::Files);
    assert!(wc.entry("a.txt").is_some());

    // nothing left to fetch on a second run
    let (client, handler) = fx.client();
    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(changes(&handler.actions()), 0);
}

#[test]
fn test_sticky_depth_deepens_files_to_immediates() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Files, false)
        .unwrap();
    assert!(!wc_path.join("lib").exists());

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Immediates, false, true)
        .unwrap();
    assert!(wc_path.join("lib").is_dir());
    assert!(!wc_path.join("lib/y.c").exists());
    assert!(wc_path.join("a.txt").exists());
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().depth, Depth::Immediates);
    assert_eq!(wc.entry("lib").unwrap().depth, Depth::Empty);

    client
        .update(&wc_path.join("lib"), RevisionSpec::HEAD, Depth::Infinity, false, true)
        .unwrap();
    assert_eq!(read(&wc_path.join("lib/y.c")), "int y;\n");
}

#[test]
fn test_exclude_and_bring_back() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let rev = client
        .update(&wc_path.join("lib"), RevisionSpec::HEAD, Depth::Exclude, false, true)
        .unwrap();
    assert_eq!(rev, INVALID_REVISION);
    assert!(!wc_path.join("lib").exists());
    assert!(WorkingCopy::open(&wc_path).unwrap().entry("lib").unwrap().is_excluded());

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert!(!wc_path.join("lib").exists());

    client
        .update(&wc_path.join("lib"), RevisionSpec::HEAD, Depth::Infinity, false, true)
        .unwrap();
    assert_eq!(read(&wc_path.join("lib/y.c")), "int y;\n");
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert!(!wc.entry("lib").unwrap().is_excluded());
    assert_eq!(wc.entry("lib").unwrap().depth, Depth::Infinity);
}

#[test]
fn test_excluding_the_root_fails() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();
    let err = client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Exclude, false, true)
        .unwrap_err();
    assert!(err.is(ErrorCode::UnsupportedFeature));
}

#[test]
fn test_switch_to_branch() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    let rev = client
        .switch(&wc_path, &fx.url("branches/b"), RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false, false)
        .unwrap();
    assert_eq!(rev, 7);
    assert_eq!(read(&wc_path.join("new.txt")), "branched\n");
    assert_eq!(read(&wc_path.join("a.txt")), "two\n");
    assert!(!wc_path.join("lib/y.c").exists());
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert_eq!(wc.root_entry().unwrap().url.as_ref(), Some(&fx.url("branches/b")));
    assert_eq!(wc.url_of("new.txt"), Some(fx.url("branches/b/new.txt")));
}

#[test]
fn test_switch_subdirectory_is_recorded_as_switched() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();

    client
        .switch(&wc_path.join("lib"), &fx.url("branches/b/lib"), RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false, false)
        .unwrap();
    assert!(!wc_path.join("lib/y.c").exists());
    let wc = WorkingCopy::open(&wc_path).unwrap();
    assert!(wc.is_switched("lib"));

    // updating the parent keeps the switched child where it is
    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert!(!wc_path.join("lib/y.c").exists());
    assert_eq!(WorkingCopy::open(&wc_path).unwrap().url_of("lib"), Some(fx.url("branches/b/lib")));
}

#[test]
fn test_switch_rejects_foreign_repository() {
    let fx = Fixture::new();
    let other_path = fx.path("other");
    let other = FsRepository::create(&other_path).unwrap();
    let mut txn = other.begin("carol", "init").unwrap();
    txn.mkdir("trunk").unwrap();
    txn.commit().unwrap();

    let (client, _handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::HEAD, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();
    let foreign = common::file_url(&other_path).append_path("trunk");
    let err = client
        .switch(&wc_path, &foreign, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false, false)
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidSwitch));

    let err = client
        .switch(&wc_path, &fx.url("branches/b"), RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Exclude, false, true)
        .unwrap_err();
    assert!(err.is(ErrorCode::UnsupportedFeature));
}

#[test]
fn test_checkout_errors() {
    let fx = Fixture::new();
    let (client, _handler) = fx.client();

    let err = client
        .checkout(&fx.url("trunk/a.txt"), &fx.path("f"), RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap_err();
    assert!(err.is(ErrorCode::UnsupportedFeature));

    let err = client
        .checkout(&fx.url("trunk/nope"), &fx.path("n"), RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap_err();
    assert!(err.is(ErrorCode::IllegalUrl));

    fs::write(fx.path("plain"), b"x").unwrap();
    let err = client
        .checkout(&fx.url("trunk"), &fx.path("plain"), RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap_err();
    assert!(err.is(ErrorCode::WcNodeKindChange));

    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();
    let err = client
        .checkout(&fx.url("branches/b"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap_err();
    assert!(err.is(ErrorCode::WcObstructedUpdate));
}

#[test]
fn test_unversioned_obstruction() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::number(5), Depth::Infinity, false)
        .unwrap();
    fs::write(wc_path.join("lib/y.c"), b"mine\n").unwrap();

    let err = client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap_err();
    assert!(err.is(ErrorCode::WcObstructedUpdate));
    assert!(err.to_string().contains("an unversioned file of the same name already exists"));

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, true, false)
        .unwrap();
    assert_eq!(read(&wc_path.join("lib/y.c")), "mine\n");
    assert!(handler.actions().contains(&EventAction::Exists));
    assert!(WorkingCopy::open(&wc_path).unwrap().entry("lib/y.c").is_some());
}

#[test]
fn test_local_modification_becomes_conflict() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::number(5), Depth::Infinity, false)
        .unwrap();
    fs::write(wc_path.join("a.txt"), b"mine\n").unwrap();

    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(read(&wc_path.join("a.txt")), "mine\n");
    assert_eq!(read(&wc_path.join("a.txt.r7")), "three\n");
    assert!(WorkingCopy::open(&wc_path).unwrap().entry("a.txt").unwrap().conflicted);
    assert!(handler.actions().contains(&EventAction::Conflicted));
}

#[test]
fn test_conflict_file_keeps_configured_extension() {
    let fx = Fixture::new();
    let options = ClientOptions {
        preserved_conflict_extensions: vec!["txt".to_string()],
        ..ClientOptions::default()
    };
    let (client, _handler) = fx.client_with(options);
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::number(5), Depth::Infinity, false)
        .unwrap();
    fs::write(wc_path.join("a.txt"), b"mine\n").unwrap();
    client
        .update(&wc_path, RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap();
    assert_eq!(read(&wc_path.join("a.r7.txt")), "three\n");
}

#[test]
fn test_batch_skips_failing_targets() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::number(5), Depth::Infinity, false)
        .unwrap();

    let outcomes = client
        .update_paths(
            &[fx.path("nowhere"), wc_path.clone()],
            RevisionSpec::HEAD,
            Depth::Unknown,
            false,
            false,
        )
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    match &outcomes[0] {
        TargetOutcome::Skipped(e) => assert!(e.is(ErrorCode::WcNotWorkingCopy)),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(outcomes[1], TargetOutcome::Updated(7)));
    assert!(handler.actions().contains(&EventAction::Skip));
}

#[test]
fn test_cancellation_stops_the_batch() {
    let fx = Fixture::new();
    let options = ClientOptions::default();
    let pool = Arc::new(SessionPool::new(Arc::new(LocalSessionFactory::new()), &options));
    let handler = Arc::new(CollectingHandler::cancel_after(0));
    let client = UpdateClient::new(pool, options).with_event_handler(handler);

    let err = client
        .update_paths(&[fx.path("wc")], RevisionSpec::HEAD, Depth::Unknown, false, false)
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_completion_event_carries_revision() {
    let fx = Fixture::new();
    let (client, handler) = fx.client();
    let wc_path = fx.path("wc");
    client
        .checkout(&fx.url("trunk"), &wc_path, RevisionSpec::Undefined, RevisionSpec::HEAD, Depth::Infinity, false)
        .unwrap();
    let events = handler.events();
    let done = events.last().unwrap();
    assert_eq!(done.action, EventAction::UpdateCompleted);
    assert_eq!(done.revision, 7);
    assert!(events
        .iter()
        .any(|e| e.action == EventAction::UpdateAdd && e.path.ends_with("lib/y.c")));
}
