//! Editor writing a bare (unversioned) tree

use crate::events::{EventAction, Notifier};
use crate::externals::ExternalsStore;
use crate::translate;
use bytes::Bytes;
use chrono::DateTime;
use dsvn_ra::{
    svn_err, svn_props, Depth, Editor, NodeKind, PropertyMap, Result, Revnum, INVALID_REVISION,
};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Default)]
struct ExportFile {
    text: Option<Bytes>,
    props: PropertyMap,
    committed_date: Option<String>,
}

pub(crate) struct ExportEditor<'a> {
    root: PathBuf,
    overwrite: bool,
    native_eol: String,
    use_commit_times: bool,
    notifier: &'a Notifier,
    externals: &'a mut ExternalsStore,
    depth: Depth,
    target_revision: Revnum,
    files: HashMap<String, ExportFile>,
}

impl<'a> ExportEditor<'a> {
    /// `native_eol` is what `svn:eol-style=native` expands to
    pub fn new(
        root: PathBuf,
        overwrite: bool,
        native_eol: &str,
        use_commit_times: bool,
        depth: Depth,
        notifier: &'a Notifier,
        externals: &'a mut ExternalsStore,
    ) -> Self {
        Self {
            root,
            overwrite,
            native_eol: native_eol.to_string(),
            use_commit_times,
            notifier,
            externals,
            depth,
            target_revision: INVALID_REVISION,
            files: HashMap::new(),
        }
    }

    fn path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl Editor for ExportEditor<'_> {
    fn target_revision(&mut self, revision: Revnum) -> Result<()> {
        self.target_revision = revision;
        Ok(())
    }

    fn open_root(&mut self, _base_revision: Revnum) -> Result<()> {
        self.notifier.check_cancelled()?;
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn delete_entry(&mut self, _path: &str, _revision: Revnum) -> Result<()> {
        Ok(())
    }

    fn add_dir(&mut self, path: &str, _copy_from: Option<(&str, Revnum)>) -> Result<()> {
        let abs = self.path(path);
        match fs::symlink_metadata(&abs) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) if self.overwrite => {
                fs::remove_file(&abs)?;
                fs::create_dir(&abs)?;
            }
            Ok(_) => {
                return Err(svn_err!(
                    WcObstructedUpdate,
                    "'{0}' exists and is not a directory",
                    abs.display()
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(&abs)?,
            Err(e) => return Err(e.into()),
        }
        self.notifier.notify(&abs, NodeKind::Dir, EventAction::UpdateAdd)
    }

    fn open_dir(&mut self, _path: &str, _base_revision: Revnum) -> Result<()> {
        Ok(())
    }

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        if name == svn_props::EXTERNALS {
            let depth = if path.is_empty() { self.depth } else { Depth::Infinity };
            self.externals.set_new(path, value, depth);
        }
        Ok(())
    }

    fn close_dir(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    fn add_file(&mut self, path: &str, _copy_from: Option<(&str, Revnum)>) -> Result<()> {
        self.files.insert(path.to_string(), ExportFile::default());
        Ok(())
    }

    fn open_file(&mut self, path: &str, _base_revision: Revnum) -> Result<()> {
        self.files.insert(path.to_string(), ExportFile::default());
        Ok(())
    }

    fn apply_text(&mut self, path: &str, _base_checksum: Option<&str>, text: Bytes) -> Result<()> {
        if let Some(file) = self.files.get_mut(path) {
            file.text = Some(text);
        }
        Ok(())
    }

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        let Some(file) = self.files.get_mut(path) else {
            return Ok(());
        };
        match (name, value) {
            (svn_props::ENTRY_COMMITTED_DATE, v) => file.committed_date = v.map(str::to_string),
            (n, _) if svn_props::is_entry_property(n) => {}
            (n, Some(v)) => {
                file.props.insert(n.to_string(), v.to_string());
            }
            (n, None) => {
                file.props.remove(n);
            }
        }
        Ok(())
    }

    fn close_file(&mut self, path: &str, text_checksum: Option<&str>) -> Result<()> {
        let Some(file) = self.files.remove(path) else {
            return Ok(());
        };
        let abs = self.path(path);
        let text = file.text.unwrap_or_default();
        if let Some(expected) = text_checksum {
            let actual = dsvn_ra::checksum(&text);
            if actual != expected {
                return Err(svn_err!(
                    ChecksumMismatch,
                    "Checksum mismatch for '{0}': expected '{1}', actual '{2}'",
                    abs.display(),
                    expected,
                    actual
                ));
            }
        }
        match fs::symlink_metadata(&abs) {
            Ok(meta) if meta.is_dir() => {
                if !self.overwrite {
                    return Err(svn_err!(
                        WcObstructedUpdate,
                        "'{0}' exists and is not a file",
                        abs.display()
                    ));
                }
                fs::remove_dir_all(&abs)?;
            }
            Ok(_) if !self.overwrite => {
                tracing::debug!("Keeping existing {:?}", abs);
                return self.notifier.notify(&abs, NodeKind::File, EventAction::Exists);
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        translate::write_working(&abs, &text, &file.props, &self.native_eol)?;
        if self.use_commit_times {
            if let Some(date) = file.committed_date.and_then(|d| DateTime::parse_from_rfc3339(&d).ok()) {
                let handle = fs::OpenOptions::new().write(true).open(&abs)?;
                handle.set_modified(SystemTime::from(date))?;
            }
        }
        self.notifier.notify(&abs, NodeKind::File, EventAction::UpdateAdd)
    }

    fn close_edit(&mut self) -> Result<()> {
        tracing::debug!("Exported {:?} at r{}", self.root, self.target_revision);
        Ok(())
    }
}
