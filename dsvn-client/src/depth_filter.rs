//! Client-side ambient depth enforcement
//!
//! When an update does not change the recorded depth, the repository may
//! still send items the working copy never asked for (for instance when it
//! does not understand depth). This wrapper drops edits below each
//! directory's recorded depth and never lets an excluded path come back.

use crate::wc::WorkingCopy;
use bytes::Bytes;
use dsvn_ra::{relpath, Depth, Editor, NodeKind, Result, Revnum};
use std::collections::{HashMap, HashSet};

/// Kind and recorded depth of every entry below an anchor, keyed by editor path
#[derive(Debug, Default)]
pub struct AmbientDepths(HashMap<String, (NodeKind, Depth)>);

impl AmbientDepths {
    pub fn snapshot(wc: &WorkingCopy, anchor: &str) -> Self {
        Self(
            wc.subtree(anchor)
                .into_iter()
                .filter_map(|rel| {
                    let entry = wc.entry(&rel)?;
                    let path = relpath::skip_ancestor(anchor, &rel)?.to_string();
                    Some((path, (entry.kind, entry.depth)))
                })
                .collect(),
        )
    }
}

pub struct AmbientDepthFilter<E> {
    inner: E,
    ambient: AmbientDepths,
    target: Option<String>,
    filtered: HashSet<String>,
    dir_depths: HashMap<String, Depth>,
}

impl<E: Editor> AmbientDepthFilter<E> {
    pub fn new(inner: E, ambient: AmbientDepths, target: Option<&str>) -> Self {
        Self {
            inner,
            ambient,
            target: target.map(str::to_string),
            filtered: HashSet::new(),
            dir_depths: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Ambient depth for a passing item, `None` to filter it
    fn decide(&self, path: &str, is_dir: bool) -> Option<Depth> {
        let parent = relpath::dirname(path);
        if self.filtered.contains(parent) {
            return None;
        }
        if let Some((kind, depth)) = self.ambient.0.get(path) {
            if *depth == Depth::Exclude {
                return None;
            }
            return Some(if is_dir && *kind == NodeKind::Dir { *depth } else { Depth::Infinity });
        }
        if self.target.as_deref() == Some(path) {
            return Some(Depth::Infinity);
        }
        match self.dir_depths.get(parent).copied().unwrap_or(Depth::Infinity) {
            Depth::Empty | Depth::Exclude => None,
            Depth::Files if is_dir => None,
            Depth::Files => Some(Depth::Infinity),
            Depth::Immediates => Some(Depth::Empty),
            Depth::Infinity | Depth::Unknown => Some(Depth::Infinity),
        }
    }

    fn enter_dir(&mut self, path: &str) -> bool {
        match self.decide(path, true) {
            Some(depth) => {
                self.dir_depths.insert(path.to_string(), depth);
                true
            }
            None => {
                tracing::trace!("Filtered directory '{}' below ambient depth", path);
                self.filtered.insert(path.to_string());
                false
            }
        }
    }

    fn enter_file(&mut self, path: &str) -> bool {
        if self.decide(path, false).is_some() {
            true
        } else {
            self.filtered.insert(path.to_string());
            false
        }
    }
}

impl<E: Editor> Editor for AmbientDepthFilter<E> {
    fn target_revision(&mut self, revision: Revnum) -> Result<()> {
        self.inner.target_revision(revision)
    }

    fn open_root(&mut self, base_revision: Revnum) -> Result<()> {
        let depth = self
            .ambient
            .0
            .get("")
            .map(|(_, d)| *d)
            .unwrap_or(Depth::Infinity);
        self.dir_depths.insert(String::new(), depth);
        self.inner.open_root(base_revision)
    }

    fn delete_entry(&mut self, path: &str, revision: Revnum) -> Result<()> {
        if self.filtered.contains(relpath::dirname(path)) {
            return Ok(());
        }
        self.inner.delete_entry(path, revision)
    }

    fn add_dir(&mut self, path: &str, copy_from: Option<(&str, Revnum)>) -> Result<()> {
        if self.enter_dir(path) {
            self.inner.add_dir(path, copy_from)
        } else {
            Ok(())
        }
    }

    fn open_dir(&mut self, path: &str, base_revision: Revnum) -> Result<()> {
        if self.enter_dir(path) {
            self.inner.open_dir(path, base_revision)
        } else {
            Ok(())
        }
    }

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        if self.filtered.contains(path) {
            return Ok(());
        }
        self.inner.change_dir_prop(path, name, value)
    }

    fn close_dir(&mut self, path: &str) -> Result<()> {
        if self.filtered.contains(path) {
            return Ok(());
        }
        self.inner.close_dir(path)
    }

    fn add_file(&mut self, path: &str, copy_from: Option<(&str, Revnum)>) -> Result<()> {
        if self.enter_file(path) {
            self.inner.add_file(path, copy_from)
        } else {
            Ok(())
        }
    }

    fn open_file(&mut self, path: &str, base_revision: Revnum) -> Result<()> {
        if self.enter_file(path) {
            self.inner.open_file(path, base_revision)
        } else {
            Ok(())
        }
    }

    fn apply_text(&mut self, path: &str, base_checksum: Option<&str>, text: Bytes) -> Result<()> {
        if self.filtered.contains(path) {
            return Ok(());
        }
        self.inner.apply_text(path, base_checksum, text)
    }

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        if self.filtered.contains(path) {
            return Ok(());
        }
        self.inner.change_file_prop(path, name, value)
    }

    fn close_file(&mut self, path: &str, text_checksum: Option<&str>) -> Result<()> {
        if self.filtered.contains(path) {
            return Ok(());
        }
        self.inner.close_file(path, text_checksum)
    }

    fn close_edit(&mut self) -> Result<()> {
        self.inner.close_edit()
    }

    fn abort_edit(&mut self) -> Result<()> {
        self.inner.abort_edit()
    }
}
