//! Tree-delta editor driven by a session
//!
//! Paths are relative to the edit anchor (`""` is the anchor). A directory's
//! children are fully processed between its `add_dir`/`open_dir` and its
//! `close_dir`; file texts are delivered whole.

use crate::error::Result;
use crate::session::Revnum;
use bytes::Bytes;

/// Receiver of a tree delta
pub trait Editor {
    fn target_revision(&mut self, revision: Revnum) -> Result<()>;

    fn open_root(&mut self, base_revision: Revnum) -> Result<()>;

    fn delete_entry(&mut self, path: &str, revision: Revnum) -> Result<()>;

    fn add_dir(&mut self, path: &str, copy_from: Option<(&str, Revnum)>) -> Result<()>;

    fn open_dir(&mut self, path: &str, base_revision: Revnum) -> Result<()>;

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()>;

    fn close_dir(&mut self, path: &str) -> Result<()>;

    fn add_file(&mut self, path: &str, copy_from: Option<(&str, Revnum)>) -> Result<()>;

    fn open_file(&mut self, path: &str, base_revision: Revnum) -> Result<()>;

    /// Full new text of the open file
    fn apply_text(&mut self, path: &str, base_checksum: Option<&str>, text: Bytes) -> Result<()>;

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()>;

    fn close_file(&mut self, path: &str, text_checksum: Option<&str>) -> Result<()>;

    fn close_edit(&mut self) -> Result<()>;

    fn abort_edit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One editor call as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    TargetRevision(Revnum),
    OpenRoot(Revnum),
    DeleteEntry { path: String, revision: Revnum },
    AddDir { path: String, copy_from: Option<(String, Revnum)> },
    OpenDir { path: String, base_revision: Revnum },
    ChangeDirProp { path: String, name: String, value: Option<String> },
    CloseDir { path: String },
    AddFile { path: String, copy_from: Option<(String, Revnum)> },
    OpenFile { path: String, base_revision: Revnum },
    ApplyText { path: String, base_checksum: Option<String>, text: Bytes },
    ChangeFileProp { path: String, name: String, value: Option<String> },
    CloseFile { path: String, text_checksum: Option<String> },
    CloseEdit,
    AbortEdit,
}

impl EditOp {
    /// True for calls that change tree content
    pub fn is_modification(&self) -> bool {
        matches!(
            self,
            EditOp::DeleteEntry { .. }
                | EditOp::AddDir { .. }
                | EditOp::AddFile { .. }
                | EditOp::ApplyText { .. }
                | EditOp::ChangeDirProp { .. }
                | EditOp::ChangeFileProp { .. }
        )
    }

    /// Replay this call against an editor
    pub fn apply(&self, editor: &mut dyn Editor) -> Result<()> {
        match self {
            EditOp::TargetRevision(rev) => editor.target_revision(*rev),
            EditOp::OpenRoot(rev) => editor.open_root(*rev),
            EditOp::DeleteEntry { path, revision } => editor.delete_entry(path, *revision),
            EditOp::AddDir { path, copy_from } => {
                editor.add_dir(path, copy_from.as_ref().map(|(p, r)| (p.as_str(), *r)))
            }
            EditOp::OpenDir { path, base_revision } => editor.open_dir(path, *base_revision),
            EditOp::ChangeDirProp { path, name, value } => {
                editor.change_dir_prop(path, name, value.as_deref())
            }
            EditOp::CloseDir { path } => editor.close_dir(path),
            EditOp::AddFile { path, copy_from } => {
                editor.add_file(path, copy_from.as_ref().map(|(p, r)| (p.as_str(), *r)))
            }
            EditOp::OpenFile { path, base_revision } => editor.open_file(path, *base_revision),
            EditOp::ApplyText { path, base_checksum, text } => {
                editor.apply_text(path, base_checksum.as_deref(), text.clone())
            }
            EditOp::ChangeFileProp { path, name, value } => {
                editor.change_file_prop(path, name, value.as_deref())
            }
            EditOp::CloseFile { path, text_checksum } => {
                editor.close_file(path, text_checksum.as_deref())
            }
            EditOp::CloseEdit => editor.close_edit(),
            EditOp::AbortEdit => editor.abort_edit(),
        }
    }
}

/// Replay a recorded stream
pub fn replay(ops: &[EditOp], editor: &mut dyn Editor) -> Result<()> {
    for op in ops {
        op.apply(editor)?;
    }
    Ok(())
}

/// Editor that records every call
#[derive(Debug, Default)]
pub struct RecordingEditor {
    pub ops: Vec<EditOp>,
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls that change tree content
    pub fn modifications(&self) -> Vec<&EditOp> {
        self.ops.iter().filter(|op| op.is_modification()).collect()
    }

    pub fn target(&self) -> Option<Revnum> {
        self.ops.iter().find_map(|op| match op {
            EditOp::TargetRevision(rev) => Some(*rev),
            _ => None,
        })
    }
}

impl Editor for RecordingEditor {
    fn target_revision(&mut self, revision: Revnum) -> Result<()> {
        self.ops.push(EditOp::TargetRevision(revision));
        Ok(())
    }

    fn open_root(&mut self, base_revision: Revnum) -> Result<()> {
        self.ops.push(EditOp::OpenRoot(base_revision));
        Ok(())
    }

    fn delete_entry(&mut self, path: &str, revision: Revnum) -> Result<()> {
        self.ops.push(EditOp::DeleteEntry {
            path: path.to_string(),
            revision,
        });
        Ok(())
    }

    fn add_dir(&mut self, path: &str, copy_from: Option<(&str, Revnum)>) -> Result<()> {
        self.ops.push(EditOp::AddDir {
            path: path.to_string(),
            copy_from: copy_from.map(|(p, r)| (p.to_string(), r)),
        });
        Ok(())
    }

    fn open_dir(&mut self, path: &str, base_revision: Revnum) -> Result<()> {
        self.ops.push(EditOp::OpenDir {
            path: path.to_string(),
            base_revision,
        });
        Ok(())
    }

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        self.ops.push(EditOp::ChangeDirProp {
            path: path.to_string(),
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        Ok(())
    }

    fn close_dir(&mut self, path: &str) -> Result<()> {
        self.ops.push(EditOp::CloseDir {
            path: path.to_string(),
        });
        Ok(())
    }

    fn add_file(&mut self, path: &str, copy_from: Option<(&str, Revnum)>) -> Result<()> {
        self.ops.push(EditOp::AddFile {
            path: path.to_string(),
            copy_from: copy_from.map(|(p, r)| (p.to_string(), r)),
        });
        Ok(())
    }

    fn open_file(&mut self, path: &str, base_revision: Revnum) -> Result<()> {
        self.ops.push(EditOp::OpenFile {
            path: path.to_string(),
            base_revision,
        });
        Ok(())
    }

    fn apply_text(&mut self, path: &str, base_checksum: Option<&str>, text: Bytes) -> Result<()> {
        self.ops.push(EditOp::ApplyText {
            path: path.to_string(),
            base_checksum: base_checksum.map(str::to_string),
            text,
        });
        Ok(())
    }

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        self.ops.push(EditOp::ChangeFileProp {
            path: path.to_string(),
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        Ok(())
    }

    fn close_file(&mut self, path: &str, text_checksum: Option<&str>) -> Result<()> {
        self.ops.push(EditOp::CloseFile {
            path: path.to_string(),
            text_checksum: text_checksum.map(str::to_string),
        });
        Ok(())
    }

    fn close_edit(&mut self) -> Result<()> {
        self.ops.push(EditOp::CloseEdit);
        Ok(())
    }

    fn abort_edit(&mut self) -> Result<()> {
        self.ops.push(EditOp::AbortEdit);
        Ok(())
    }
}
