//! Pointing a working copy at a moved repository

use crate::update::UpdateClient;
use crate::wc::{self, WorkingCopy};
use dsvn_ra::{svn_err, Depth, RepoUrl, Result};
use std::path::Path;

/// Prefix substitution applied to every URL of the relocated entries
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rewrite {
    from: String,
    to: String,
}

impl Rewrite {
    /// Narrow `from -> to` to a change of the repository root only
    fn new(from: &RepoUrl, to: &RepoUrl, entry_url: &RepoUrl, repos_root: &RepoUrl) -> Result<Self> {
        let (from, to) = (from.to_string(), to.to_string());
        let entry_url = entry_url.to_string();
        if !has_url_prefix(&entry_url, &from) {
            return Err(svn_err!(
                InvalidRelocation,
                "Invalid source URL prefix: '{0}' (does not overlap target's URL '{1}')",
                from,
                entry_url
            ));
        }
        let root = repos_root.to_string();
        if from.len() <= root.len() {
            return Ok(Self { from, to });
        }
        let suffix = &from[root.len()..];
        match to.strip_suffix(suffix) {
            Some(to_root) => Ok(Self {
                from: root,
                to: to_root.to_string(),
            }),
            None => Err(svn_err!(
                InvalidRelocation,
                "Relocate can only change the repository part of an URL"
            )),
        }
    }

    fn apply(&self, url: &RepoUrl) -> Result<RepoUrl> {
        let text = url.to_string();
        if !has_url_prefix(&text, &self.from) {
            return Ok(url.clone());
        }
        RepoUrl::parse(&format!("{}{}", self.to, &text[self.from.len()..]))
    }
}

/// `url` equals `prefix` or continues it at a segment boundary
fn has_url_prefix(url: &str, prefix: &str) -> bool {
    match url.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

impl UpdateClient {
    /// Rewrite the URLs of `path` (and, when `recursive`, everything below
    /// it) from the `from` prefix to `to`. Only the repository root part may
    /// change, and `to` must lead to the same repository.
    pub fn relocate(&self, path: &Path, from: &RepoUrl, to: &RepoUrl, recursive: bool) -> Result<()> {
        self.notifier.check_cancelled()?;
        let path = wc::absolute(path)?;
        let (mut wc, rel) = WorkingCopy::open_containing(&path)?;
        let lock = wc.lock(if recursive { Depth::Infinity } else { Depth::Empty })?;
        let entry = wc.require(&rel)?.clone();
        let (Some(entry_url), Some(repos_root)) = (entry.url.as_ref(), entry.repos_root.as_ref()) else {
            return Err(svn_err!(EntryMissingUrl, "Entry '{0}' has no URL", path.display()));
        };
        let rewrite = Rewrite::new(from, to, entry_url, repos_root)?;
        let new_root = rewrite.apply(repos_root)?;
        if new_root == *repos_root {
            return Ok(());
        }

        let mut session = self.pool.acquire(&new_root, false)?;
        let actual_root = session.repository_root()?;
        if actual_root != new_root {
            return Err(svn_err!(
                InvalidRelocation,
                "'{0}' is not the root of the repository",
                new_root
            ));
        }
        let uuid = session.repository_uuid()?;
        if let Some(wc_uuid) = &entry.uuid {
            if *wc_uuid != uuid {
                return Err(svn_err!(
                    InvalidRelocation,
                    "The repository at '{0}' has uuid '{1}', but the WC has '{2}'",
                    new_root,
                    uuid,
                    wc_uuid
                ));
            }
        }
        drop(session);

        let keys = wc.subtree_within(&rel, lock.levels());
        for key in &keys {
            let Some(entry) = wc.entry_mut(key) else {
                continue;
            };
            if let Some(url) = &entry.url {
                entry.url = Some(rewrite.apply(url)?);
            }
            if let Some(root) = &entry.repos_root {
                entry.repos_root = Some(rewrite.apply(root)?);
            }
            if let Some(url) = &entry.copy_from_url {
                entry.copy_from_url = Some(rewrite.apply(url)?);
            }
            if let Some(external) = entry.file_external.as_mut() {
                external.url = rewrite.apply(&external.url)?;
            }
        }
        wc.save()?;
        drop(lock);
        tracing::info!(
            "Relocated {} from {} to {} ({} entries)",
            path.display(),
            rewrite.from,
            rewrite.to,
            keys.len()
        );
        Ok(())
    }
}
