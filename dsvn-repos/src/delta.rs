//! Repository side of the report/editor exchange
//!
//! Compares what the client reported it has against the destination tree and
//! drives an editor with the difference. Directories without changes below them
//! are never opened.

use crate::fs_repository::{FsRepository, Node, RevisionRecord};
use dsvn_ra::{
    diff_props, relpath, svn_err, svn_props, Canceller, Depth, Editor, NodeKind, PropertyMap,
    RepoUrl, ReportClaim, Result, Revnum, INVALID_REVISION,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What the client has at a working-copy path
#[derive(Debug, Clone, PartialEq)]
enum Source {
    Absent,
    Excluded,
    Present {
        path: String,
        revision: Revnum,
        depth: Depth,
        start_empty: bool,
    },
}

/// Claims indexed by path
struct ReportView {
    claims: BTreeMap<String, ReportClaim>,
    /// Repository path of the edit anchor
    anchor: String,
    root_url: RepoUrl,
}

impl ReportView {
    fn new(claims: Vec<ReportClaim>, anchor: &str, root_url: &RepoUrl) -> Result<Self> {
        let claims: BTreeMap<String, ReportClaim> = claims
            .into_iter()
            .map(|c| (c.path().to_string(), c))
            .collect();
        match claims.get("") {
            Some(ReportClaim::SetPath { .. }) | Some(ReportClaim::LinkPath { .. }) => {}
            _ => return Err(svn_err!(EditorDrive, "Report is missing the anchor path")),
        }
        Ok(Self {
            claims,
            anchor: anchor.to_string(),
            root_url: root_url.clone(),
        })
    }

    fn root_revision(&self) -> Revnum {
        match self.claims.get("") {
            Some(ReportClaim::SetPath { revision, .. })
            | Some(ReportClaim::LinkPath { revision, .. }) => *revision,
            _ => INVALID_REVISION,
        }
    }

    /// Repository path the client's copy of `wc` came from
    fn base_path(&self, wc: &str) -> Result<String> {
        let mut probe = wc;
        loop {
            if let Some(ReportClaim::LinkPath { url, .. }) = self.claims.get(probe) {
                let linked = self.root_url.relative_path(url).ok_or_else(|| {
                    svn_err!(IllegalUrl, "'{0}' is not in the repository at '{1}'", url, self.root_url)
                })?;
                let rest = relpath::skip_ancestor(probe, wc).unwrap_or("");
                return Ok(relpath::join(&linked, rest));
            }
            if probe.is_empty() {
                return Ok(relpath::join(&self.anchor, wc));
            }
            probe = relpath::dirname(probe);
        }
    }

    fn source_of(&self, wc: &str, repo: &FsRepository) -> Result<Source> {
        let mut probe = wc;
        let (owner, claim) = loop {
            if let Some(claim) = self.claims.get(probe) {
                break (probe, claim);
            }
            if probe.is_empty() {
                return Ok(Source::Absent);
            }
            probe = relpath::dirname(probe);
        };
        let rest = relpath::skip_ancestor(owner, wc).unwrap_or("");
        let (revision, depth, start_empty) = match claim {
            ReportClaim::DeletePath { .. } => return Ok(Source::Absent),
            ReportClaim::SetPath { depth: Depth::Exclude, .. } => {
                return Ok(if rest.is_empty() { Source::Excluded } else { Source::Absent });
            }
            ReportClaim::SetPath { revision, depth, start_empty, .. }
            | ReportClaim::LinkPath { revision, depth, start_empty, .. } => {
                (*revision, *depth, *start_empty)
            }
        };
        let path = self.base_path(wc)?;
        if rest.is_empty() {
            return Ok(Source::Present { path, revision, depth, start_empty });
        }
        if start_empty {
            return Ok(Source::Absent);
        }
        let single = relpath::depth_of(rest) == 1;
        let (visible, depth) = match depth {
            Depth::Empty | Depth::Exclude => (false, Depth::Empty),
            Depth::Files => {
                let is_file = repo
                    .node(revision, &path)?
                    .is_some_and(|n| n.kind == NodeKind::File);
                (single && is_file, Depth::Empty)
            }
            Depth::Immediates => (single, Depth::Empty),
            Depth::Infinity | Depth::Unknown => (true, Depth::Infinity),
        };
        if !visible {
            return Ok(Source::Absent);
        }
        Ok(Source::Present { path, revision, depth, start_empty: false })
    }
}

struct PendingDir {
    path: String,
    base_revision: Revnum,
    opened: bool,
}

/// One delta computation
pub(crate) struct DeltaDriver<'a> {
    repo: &'a FsRepository,
    view: ReportView,
    target: Arc<RevisionRecord>,
    requested: Depth,
    send_text: bool,
    canceller: Option<Arc<dyn Canceller>>,
    pending: Vec<PendingDir>,
}

impl<'a> DeltaDriver<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        repo: &'a FsRepository,
        root_url: &RepoUrl,
        anchor: &str,
        claims: Vec<ReportClaim>,
        revision: Revnum,
        requested: Depth,
        send_text: bool,
        canceller: Option<Arc<dyn Canceller>>,
    ) -> Result<Self> {
        Ok(Self {
            repo,
            view: ReportView::new(claims, anchor, root_url)?,
            target: repo.revision(revision)?,
            requested,
            send_text,
            canceller,
            pending: Vec::new(),
        })
    }

    /// Drive `editor`; `dest` is the repository path the anchor (or the
    /// target, when one is given) is brought to.
    pub(crate) fn run(&mut self, editor: &mut dyn Editor, target: Option<&str>, dest: &str) -> Result<()> {
        match self.drive(editor, target, dest) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort) = editor.abort_edit() {
                    tracing::warn!("abort_edit failed (ignored): {}", abort);
                }
                Err(e)
            }
        }
    }

    fn drive(&mut self, editor: &mut dyn Editor, target: Option<&str>, dest: &str) -> Result<()> {
        editor.target_revision(self.target.revision)?;
        let base = self.view.root_revision();
        editor.open_root(base)?;
        self.pending.push(PendingDir {
            path: String::new(),
            base_revision: base,
            opened: true,
        });

        match target {
            None => {
                let source = self.view.source_of("", self.repo)?;
                let source_node = self.source_node(&source)?;
                let target_node = self.target.node(dest).cloned();
                match (source_node, target_node) {
                    (Some(s), Some(t)) if s.kind == NodeKind::Dir && t.kind == NodeKind::Dir => {
                        let depth = self.dir_depth(&source, self.requested);
                        self.delta_dir(editor, "", &source, &s, dest, &t, depth)?;
                    }
                    (_, Some(t)) if t.kind == NodeKind::Dir => {
                        let depth = self.dir_depth(&source, self.requested);
                        self.add_children(editor, "", dest, depth)?;
                    }
                    _ => {
                        return Err(svn_err!(
                            FsNotFound,
                            "Target path '{0}' does not exist as a directory in revision {1}",
                            format!("/{}", dest),
                            self.target.revision
                        ));
                    }
                }
            }
            Some(name) => {
                self.delta_entry(editor, name, dest, self.requested)?;
            }
        }

        self.pending.pop();
        editor.close_dir("")?;
        editor.close_edit()
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.canceller {
            Some(c) => c.check_cancelled(),
            None => Ok(()),
        }
    }

    fn flush(&mut self, editor: &mut dyn Editor) -> Result<()> {
        for dir in self.pending.iter_mut().filter(|d| !d.opened) {
            editor.open_dir(&dir.path, dir.base_revision)?;
            dir.opened = true;
        }
        Ok(())
    }

    fn source_node(&self, source: &Source) -> Result<Option<Node>> {
        match source {
            Source::Present { path, revision, .. } => Ok(self.repo.node(*revision, path)?),
            _ => Ok(None),
        }
    }

    /// Depth a directory is processed at
    fn dir_depth(&self, source: &Source, given: Depth) -> Depth {
        match (given, source) {
            (Depth::Unknown, Source::Present { depth: Depth::Unknown, .. }) => Depth::Infinity,
            (Depth::Unknown, Source::Present { depth, .. }) => *depth,
            (Depth::Unknown, _) => Depth::Infinity,
            (d, _) => d,
        }
    }

    fn delta_entry(&mut self, editor: &mut dyn Editor, wc: &str, dest: &str, depth: Depth) -> Result<()> {
        self.check_cancelled()?;
        let mut source = self.view.source_of(wc, self.repo)?;
        if source == Source::Excluded {
            if self.requested == Depth::Unknown {
                return Ok(());
            }
            source = Source::Absent;
        }
        let source_rev = match &source {
            Source::Present { revision, .. } => *revision,
            _ => INVALID_REVISION,
        };
        let source_node = self.source_node(&source)?;
        let target_node = self.target.node(dest).cloned();

        match (source_node, target_node) {
            (None, None) => Ok(()),
            (Some(_), None) => {
                self.flush(editor)?;
                editor.delete_entry(wc, source_rev)
            }
            (None, Some(t)) => self.add_node(editor, wc, dest, &t, depth),
            (Some(s), Some(t)) if s.kind != t.kind => {
                self.flush(editor)?;
                editor.delete_entry(wc, source_rev)?;
                self.add_node(editor, wc, dest, &t, depth)
            }
            (Some(s), Some(t)) if t.kind == NodeKind::Dir => {
                self.pending.push(PendingDir {
                    path: wc.to_string(),
                    base_revision: source_rev,
                    opened: false,
                });
                let depth = self.dir_depth(&source, depth);
                self.delta_dir(editor, wc, &source, &s, dest, &t, depth)?;
                if let Some(dir) = self.pending.pop() {
                    if dir.opened {
                        editor.close_dir(wc)?;
                    }
                }
                Ok(())
            }
            (Some(s), Some(t)) => self.delta_file(editor, wc, source_rev, &s, &t),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn delta_dir(
        &mut self,
        editor: &mut dyn Editor,
        wc: &str,
        source: &Source,
        source_node: &Node,
        dest: &str,
        target_node: &Node,
        depth: Depth,
    ) -> Result<()> {
        let start_empty = matches!(source, Source::Present { start_empty: true, .. });
        let empty = PropertyMap::new();
        let base_props = if start_empty { &empty } else { &source_node.props };
        let changes = diff_props(base_props, &target_node.props);
        if start_empty || !changes.is_empty() || source_node.created_rev != target_node.created_rev {
            self.flush(editor)?;
            for change in &changes {
                editor.change_dir_prop(wc, &change.name, change.value.as_deref())?;
            }
            for (name, value) in self.entry_props(target_node)? {
                editor.change_dir_prop(wc, &name, Some(&value))?;
            }
        }
        if depth == Depth::Empty {
            return Ok(());
        }

        let mut names: BTreeSet<String> = self
            .target
            .children(dest)
            .map(|(name, _)| name.to_string())
            .collect();
        let source_kinds: BTreeMap<String, NodeKind> = match source {
            Source::Present { path, revision, .. } => self
                .repo
                .revision(*revision)?
                .children(path)
                .map(|(name, node)| (name.to_string(), node.kind))
                .collect(),
            _ => BTreeMap::new(),
        };
        names.extend(source_kinds.keys().cloned());

        for name in names {
            let child_dest = relpath::join(dest, &name);
            let kind = self
                .target
                .node(&child_dest)
                .map(|n| n.kind)
                .or_else(|| source_kinds.get(&name).copied())
                .unwrap_or(NodeKind::None);
            let allowed = match kind {
                NodeKind::File => depth.allows_files(),
                NodeKind::Dir => depth.allows_dirs(),
                _ => false,
            };
            if !allowed {
                continue;
            }
            // Ambient updates let each child's reported depth decide
            let child_depth = if self.requested == Depth::Unknown && depth == Depth::Infinity {
                Depth::Unknown
            } else {
                depth.for_subdir().unwrap_or(Depth::Empty)
            };
            self.delta_entry(editor, &relpath::join(wc, &name), &child_dest, child_depth)?;
        }
        Ok(())
    }

    fn delta_file(
        &mut self,
        editor: &mut dyn Editor,
        wc: &str,
        source_rev: Revnum,
        source_node: &Node,
        target_node: &Node,
    ) -> Result<()> {
        let text_changed = source_node.content != target_node.content;
        let changes = diff_props(&source_node.props, &target_node.props);
        if !text_changed && changes.is_empty() && source_node.created_rev == target_node.created_rev {
            return Ok(());
        }
        self.flush(editor)?;
        editor.open_file(wc, source_rev)?;
        if text_changed && self.send_text {
            let base = source_node.content.map(|id| id.to_hex());
            let text = self.text_of(target_node)?;
            editor.apply_text(wc, base.as_deref(), text)?;
        }
        for change in &changes {
            editor.change_file_prop(wc, &change.name, change.value.as_deref())?;
        }
        for (name, value) in self.entry_props(target_node)? {
            editor.change_file_prop(wc, &name, Some(&value))?;
        }
        let checksum = target_node.content.map(|id| id.to_hex());
        editor.close_file(wc, checksum.as_deref())
    }

    fn add_node(&mut self, editor: &mut dyn Editor, wc: &str, dest: &str, node: &Node, depth: Depth) -> Result<()> {
        self.check_cancelled()?;
        self.flush(editor)?;
        match node.kind {
            NodeKind::Dir => {
                editor.add_dir(wc, None)?;
                self.send_props(editor, wc, node, true)?;
                self.pending.push(PendingDir {
                    path: wc.to_string(),
                    base_revision: INVALID_REVISION,
                    opened: true,
                });
                let depth = if depth == Depth::Unknown { Depth::Infinity } else { depth };
                self.add_children(editor, wc, dest, depth)?;
                self.pending.pop();
                editor.close_dir(wc)
            }
            _ => {
                editor.add_file(wc, None)?;
                if self.send_text {
                    let text = self.text_of(node)?;
                    editor.apply_text(wc, None, text)?;
                }
                self.send_props(editor, wc, node, false)?;
                let checksum = node.content.map(|id| id.to_hex());
                editor.close_file(wc, checksum.as_deref())
            }
        }
    }

    fn add_children(&mut self, editor: &mut dyn Editor, wc: &str, dest: &str, depth: Depth) -> Result<()> {
        if depth == Depth::Empty {
            return Ok(());
        }
        let target = self.target.clone();
        for (name, child) in target.children(dest) {
            let allowed = match child.kind {
                NodeKind::File => depth.allows_files(),
                NodeKind::Dir => depth.allows_dirs(),
                _ => false,
            };
            if !allowed {
                continue;
            }
            let child_wc = relpath::join(wc, name);
            let child_dest = relpath::join(dest, name);
            let child_depth = depth.for_subdir().unwrap_or(Depth::Empty);
            self.add_node(editor, &child_wc, &child_dest, child, child_depth)?;
        }
        Ok(())
    }

    fn send_props(&self, editor: &mut dyn Editor, wc: &str, node: &Node, is_dir: bool) -> Result<()> {
        let mut all: PropertyMap = node.props.clone();
        all.extend(self.entry_props(node)?);
        for (name, value) in &all {
            if is_dir {
                editor.change_dir_prop(wc, name, Some(value))?;
            } else {
                editor.change_file_prop(wc, name, Some(value))?;
            }
        }
        Ok(())
    }

    fn entry_props(&self, node: &Node) -> Result<Vec<(String, String)>> {
        let created = self.repo.revision(node.created_rev)?;
        let mut props = vec![
            (svn_props::ENTRY_COMMITTED_REV.to_string(), node.created_rev.to_string()),
            (svn_props::ENTRY_COMMITTED_DATE.to_string(), created.date.to_rfc3339()),
            (svn_props::ENTRY_UUID.to_string(), self.repo.uuid().to_string()),
        ];
        if let Some(author) = &created.author {
            props.push((svn_props::ENTRY_LAST_AUTHOR.to_string(), author.clone()));
        }
        Ok(props)
    }

    fn text_of(&self, node: &Node) -> Result<bytes::Bytes> {
        match &node.content {
            Some(id) => Ok(self.repo.read_text(id)?),
            None => Ok(bytes::Bytes::new()),
        }
    }
}
