//! Repository URLs and repository-relative paths
//!
//! URLs are kept in a canonical form: lowercase scheme, no trailing slash, no
//! empty or `.` segments. Paths are not percent-decoded.

use crate::error::Result;
use crate::svn_err;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical repository URL (`scheme://host/path`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoUrl {
    scheme: String,
    host: String,
    /// Either empty or `/`-prefixed without a trailing slash
    path: String,
}

impl RepoUrl {
    /// Parse and canonicalize a URL
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| svn_err!(BadUrl, "Malformed URL '{0}'", input))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(svn_err!(BadUrl, "Malformed URL '{0}'", input));
        }
        let (host, raw_path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let path = canonical_path(raw_path)
            .ok_or_else(|| svn_err!(BadUrl, "URL '{0}' contains a '..' element", input))?;
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            path,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Absolute path component, empty for the server root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, empty for the server root
    pub fn tail(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Append a relative path (`a/b`); empty input returns a clone
    pub fn append_path(&self, relative: &str) -> RepoUrl {
        let mut path = self.path.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty() && *s != ".") {
            path.push('/');
            path.push_str(segment);
        }
        RepoUrl {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            path,
        }
    }

    /// URL with the last path segment removed
    pub fn parent(&self) -> Option<RepoUrl> {
        if self.path.is_empty() {
            return None;
        }
        let idx = self.path.rfind('/').unwrap_or(0);
        Some(RepoUrl {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            path: self.path[..idx].to_string(),
        })
    }

    /// URL of the server root (`scheme://host`)
    pub fn server_root(&self) -> RepoUrl {
        RepoUrl {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            path: String::new(),
        }
    }

    /// Replace the path component with an absolute path
    pub fn with_path(&self, absolute: &str) -> Result<RepoUrl> {
        let path = canonical_path(absolute)
            .ok_or_else(|| svn_err!(BadUrl, "Path '{0}' contains a '..' element", absolute))?;
        Ok(RepoUrl {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            path,
        })
    }

    /// True if `other` equals this URL or lives below it
    pub fn is_ancestor_of(&self, other: &RepoUrl) -> bool {
        self.relative_path(other).is_some()
    }

    /// Path of `descendant` relative to this URL (`""` when equal)
    pub fn relative_path(&self, descendant: &RepoUrl) -> Option<String> {
        if self.scheme != descendant.scheme || self.host != descendant.host {
            return None;
        }
        relpath::skip_ancestor(self.path.trim_start_matches('/'), descendant.path.trim_start_matches('/'))
            .map(str::to_string)
    }

    /// Resolve a `..`-style path against this URL
    pub fn resolve_relative(&self, relative: &str) -> Result<RepoUrl> {
        let mut segments: Vec<&str> = self.path.split('/').filter(|s| !s.is_empty()).collect();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(svn_err!(
                            BadUrl,
                            "Relative path '{0}' escapes the server root of '{1}'",
                            relative,
                            self
                        ));
                    }
                }
                s => segments.push(s),
            }
        }
        let mut path = String::new();
        for s in segments {
            path.push('/');
            path.push_str(s);
        }
        Ok(RepoUrl {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            path,
        })
    }
}

fn canonical_path(raw: &str) -> Option<String> {
    let mut path = String::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => {
                path.push('/');
                path.push_str(s);
            }
        }
    }
    Some(path)
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)
    }
}

impl FromStr for RepoUrl {
    type Err = crate::SvnError;

    fn from_str(s: &str) -> Result<Self> {
        RepoUrl::parse(s)
    }
}

impl TryFrom<String> for RepoUrl {
    type Error = crate::SvnError;

    fn try_from(value: String) -> Result<Self> {
        RepoUrl::parse(&value)
    }
}

impl From<RepoUrl> for String {
    fn from(url: RepoUrl) -> Self {
        url.to_string()
    }
}

/// Helpers for `/`-separated relative paths (`""` is the anchor itself)
pub mod relpath {
    /// Join two relative paths
    pub fn join(base: &str, child: &str) -> String {
        match (base.is_empty(), child.is_empty()) {
            (true, _) => child.to_string(),
            (_, true) => base.to_string(),
            _ => format!("{}/{}", base, child),
        }
    }

    /// Split into (parent, name); the parent of a single segment is `""`
    pub fn split(path: &str) -> (&str, &str) {
        match path.rfind('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        }
    }

    /// Last segment
    pub fn basename(path: &str) -> &str {
        split(path).1
    }

    /// Parent path
    pub fn dirname(path: &str) -> &str {
        split(path).0
    }

    /// Remainder of `path` below `ancestor`, or `None` if unrelated
    pub fn skip_ancestor<'a>(ancestor: &str, path: &'a str) -> Option<&'a str> {
        if ancestor.is_empty() {
            return Some(path);
        }
        if path == ancestor {
            return Some("");
        }
        path.strip_prefix(ancestor)
            .and_then(|rest| rest.strip_prefix('/'))
    }

    /// True if `path` is `ancestor` or lies below it
    pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
        skip_ancestor(ancestor, path).is_some()
    }

    /// Number of segments
    pub fn depth_of(path: &str) -> usize {
        if path.is_empty() {
            0
        } else {
            path.split('/').count()
        }
    }
}
