//! Shrinking the recorded depth of a working-copy directory

use crate::events::{EventAction, Notifier};
use crate::wc::{Entry, Schedule, WorkingCopy};
use dsvn_ra::{svn_err, Depth, NodeKind, Result};

/// Remove everything below `rel` that `depth` no longer covers and record
/// the new depth. A depth that is not shallower than the recorded one leaves
/// the tree untouched. `Depth::Exclude` removes `rel` itself, leaving an
/// excluded marker behind. Locally modified files are left on disk unversioned.
///
/// Metadata is not saved; the caller does that.
pub fn crop_tree(wc: &mut WorkingCopy, rel: &str, depth: Depth, notifier: &Notifier) -> Result<()> {
    if matches!(depth, Depth::Infinity | Depth::Unknown) {
        return Ok(());
    }
    let entry = wc.require(rel)?.clone();
    let path = wc.abs_path(rel);
    match entry.schedule {
        Schedule::Add => {
            return Err(svn_err!(
                UnsupportedFeature,
                "Cannot crop '{0}': it is going to be added to the repository. Try commit instead",
                path.display()
            ));
        }
        Schedule::Delete => {
            return Err(svn_err!(
                UnsupportedFeature,
                "Cannot crop '{0}': it is going to be removed from the repository. Try commit instead",
                path.display()
            ));
        }
        Schedule::Normal => {}
    }

    if depth == Depth::Exclude {
        if rel.is_empty() {
            return Err(svn_err!(
                UnsupportedFeature,
                "Cannot exclude '{0}': it is a working copy root",
                path.display()
            ));
        }
        if wc.is_switched(rel) {
            return Err(svn_err!(
                UnsupportedFeature,
                "Cannot exclude '{0}': it is a switched path",
                path.display()
            ));
        }
        wc.remove_from_version_control(rel, true)?;
        wc.set_entry(rel, excluded_marker(entry.clone()));
        notifier.notify(&path, entry.kind, EventAction::UpdateDelete)?;
        tracing::debug!("Excluded {:?}", path);
        return Ok(());
    }

    if !entry.is_dir() || !depth.is_shallower_than(entry.depth) {
        return Ok(());
    }
    for child in wc.children(rel) {
        let Some(child_entry) = wc.entry(&child).cloned() else {
            continue;
        };
        let remove = match (depth, child_entry.kind) {
            (Depth::Empty, _) => true,
            (Depth::Files, NodeKind::Dir) => true,
            _ => false,
        };
        if remove {
            crop_child(wc, &child, &child_entry, notifier)?;
        } else if depth == Depth::Immediates && child_entry.is_dir() && !child_entry.is_excluded() {
            for grandchild in wc.children(&child) {
                if let Some(e) = wc.entry(&grandchild).cloned() {
                    crop_child(wc, &grandchild, &e, notifier)?;
                }
            }
            if let Some(e) = wc.entry_mut(&child) {
                if Depth::Empty.is_shallower_than(e.depth) {
                    e.depth = Depth::Empty;
                }
            }
        }
    }
    if let Some(e) = wc.entry_mut(rel) {
        e.depth = depth;
    }
    Ok(())
}

fn crop_child(wc: &mut WorkingCopy, rel: &str, entry: &Entry, notifier: &Notifier) -> Result<()> {
    if entry.is_excluded() {
        wc.remove_entry(rel);
        return Ok(());
    }
    if wc.remove_from_version_control(rel, true)? {
        tracing::debug!("Left local modifications below '{}'", rel);
    }
    notifier.notify(&wc.abs_path(rel), entry.kind, EventAction::UpdateDelete)
}

/// Placeholder left where an excluded subtree used to be
fn excluded_marker(entry: Entry) -> Entry {
    Entry {
        depth: Depth::Exclude,
        checksum: None,
        base_props: Default::default(),
        props: Default::default(),
        incomplete: false,
        conflicted: false,
        ..entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsvn_ra::RepoUrl;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, WorkingCopy) {
        let dir = TempDir::new().unwrap();
        let root = RepoUrl::parse("file:///repo").unwrap();
        let mut wc = WorkingCopy::create(
            &dir.path().join("wc"),
            Entry::dir(root.clone(), root.clone(), "u", 3, Depth::Infinity),
        )
        .unwrap();
        for dir_rel in ["a", "a/b"] {
            fs::create_dir_all(wc.abs_path(dir_rel)).unwrap();
            wc.set_entry(dir_rel, Entry::dir(root.append_path(dir_rel), root.clone(), "u", 3, Depth::Infinity));
        }
        for file in ["top.txt", "a/f.txt", "a/b/g.txt"] {
            let text = b"text\n";
            fs::write(wc.abs_path(file), text).unwrap();
            let mut entry = Entry::file(root.append_path(file), root.clone(), "u", 3);
            entry.checksum = Some(wc.write_pristine(text).unwrap());
            wc.set_entry(file, entry);
        }
        (dir, wc)
    }

    #[test]
    fn test_crop_to_files() {
        let (_dir, mut wc) = fixture();
        crop_tree(&mut wc, "", Depth::Files, &Notifier::default()).unwrap();
        assert!(wc.entry("a").is_none());
        assert!(!wc.abs_path("a").exists());
        assert!(wc.entry("top.txt").is_some());
        assert_eq!(wc.root_entry().unwrap().depth, Depth::Files);
    }

    #[test]
    fn test_crop_to_immediates() {
        let (_dir, mut wc) = fixture();
        crop_tree(&mut wc, "", Depth::Immediates, &Notifier::default()).unwrap();
        assert_eq!(wc.entry("a").unwrap().depth, Depth::Empty);
        assert!(wc.entry("a/f.txt").is_none());
        assert!(wc.entry("a/b/g.txt").is_none());
        assert!(!wc.abs_path("a/b").exists());
        assert!(wc.abs_path("a").is_dir());
    }

    #[test]
    fn test_deeper_depth_is_not_recorded() {
        let (_dir, mut wc) = fixture();
        crop_tree(&mut wc, "", Depth::Files, &Notifier::default()).unwrap();
        crop_tree(&mut wc, "", Depth::Immediates, &Notifier::default()).unwrap();
        assert_eq!(wc.root_entry().unwrap().depth, Depth::Files);
        assert!(wc.entry("top.txt").is_some());
    }

    #[test]
    fn test_exclude_keeps_marker() {
        let (_dir, mut wc) = fixture();
        crop_tree(&mut wc, "a", Depth::Exclude, &Notifier::default()).unwrap();
        assert!(wc.entry("a").unwrap().is_excluded());
        assert!(wc.entry("a/f.txt").is_none());
        assert!(!wc.abs_path("a").exists());
    }

    #[test]
    fn test_exclude_root_rejected() {
        let (_dir, mut wc) = fixture();
        let err = crop_tree(&mut wc, "", Depth::Exclude, &Notifier::default()).unwrap_err();
        assert!(err.is(dsvn_ra::ErrorCode::UnsupportedFeature));
    }

    #[test]
    fn test_modified_file_survives_crop() {
        let (_dir, mut wc) = fixture();
        fs::write(wc.abs_path("a/f.txt"), b"local\n").unwrap();
        crop_tree(&mut wc, "", Depth::Files, &Notifier::default()).unwrap();
        assert!(wc.entry("a/f.txt").is_none());
        assert_eq!(fs::read(wc.abs_path("a/f.txt")).unwrap(), b"local\n");
    }
}
