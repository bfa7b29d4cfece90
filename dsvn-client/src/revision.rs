//! Symbolic revisions and operation targets

use chrono::{DateTime, Utc};
use dsvn_ra::{svn_err, RepoUrl, Result, Revnum, SvnError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Revisions the repository has to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteRevision {
    Number(Revnum),
    Head,
    Date(DateTime<Utc>),
}

/// Revisions answered from working-copy metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalRevision {
    Working,
    Base,
    Committed,
    Previous,
}

/// Revision specifier as given by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RevisionSpec {
    Remote(RemoteRevision),
    Local(LocalRevision),
    #[default]
    Undefined,
}

impl RevisionSpec {
    pub const HEAD: RevisionSpec = RevisionSpec::Remote(RemoteRevision::Head);
    pub const WORKING: RevisionSpec = RevisionSpec::Local(LocalRevision::Working);
    pub const BASE: RevisionSpec = RevisionSpec::Local(LocalRevision::Base);
    pub const COMMITTED: RevisionSpec = RevisionSpec::Local(LocalRevision::Committed);
    pub const PREVIOUS: RevisionSpec = RevisionSpec::Local(LocalRevision::Previous);

    pub fn number(rev: Revnum) -> Self {
        RevisionSpec::Remote(RemoteRevision::Number(rev))
    }

    pub fn date(date: DateTime<Utc>) -> Self {
        RevisionSpec::Remote(RemoteRevision::Date(date))
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, RevisionSpec::Undefined)
    }

    /// Needs a repository session to resolve
    pub fn is_remote(&self) -> bool {
        matches!(self, RevisionSpec::Remote(_))
    }

    /// Needs a versioned path to resolve
    pub fn is_local(&self) -> bool {
        matches!(self, RevisionSpec::Local(_))
    }

    /// `self`, or `fallback` when undefined
    pub fn or(self, fallback: RevisionSpec) -> RevisionSpec {
        if self.is_valid() { self } else { fallback }
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSpec::Remote(RemoteRevision::Number(n)) => write!(f, "{}", n),
            RevisionSpec::Remote(RemoteRevision::Head) => f.write_str("HEAD"),
            RevisionSpec::Remote(RemoteRevision::Date(d)) => write!(f, "{{{}}}", d.to_rfc3339()),
            RevisionSpec::Local(LocalRevision::Working) => f.write_str("WORKING"),
            RevisionSpec::Local(LocalRevision::Base) => f.write_str("BASE"),
            RevisionSpec::Local(LocalRevision::Committed) => f.write_str("COMMITTED"),
            RevisionSpec::Local(LocalRevision::Previous) => f.write_str("PREV"),
            RevisionSpec::Undefined => f.write_str("UNDEFINED"),
        }
    }
}

impl FromStr for RevisionSpec {
    type Err = SvnError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            return DateTime::parse_from_rfc3339(inner)
                .map(|d| RevisionSpec::date(d.with_timezone(&Utc)))
                .map_err(|_| svn_err!(BadRevision, "Syntax error in revision argument '{0}'", s));
        }
        match s.to_ascii_uppercase().as_str() {
            "HEAD" => Ok(RevisionSpec::HEAD),
            "BASE" => Ok(RevisionSpec::BASE),
            "WORKING" => Ok(RevisionSpec::WORKING),
            "COMMITTED" => Ok(RevisionSpec::COMMITTED),
            "PREV" => Ok(RevisionSpec::PREVIOUS),
            _ => s
                .strip_prefix('r')
                .unwrap_or(s)
                .parse::<Revnum>()
                .map(RevisionSpec::number)
                .map_err(|_| svn_err!(BadRevision, "Syntax error in revision argument '{0}'", s)),
        }
    }
}

/// What an operation is pointed at before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Url(RepoUrl),
    Path(PathBuf),
}

impl Target {
    pub fn is_url(&self) -> bool {
        matches!(self, Target::Url(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Url(url) => write!(f, "{}", url),
            Target::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Resolved repository coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub url: RepoUrl,
    pub revision: Revnum,
}

impl Location {
    pub fn new(url: RepoUrl, revision: Revnum) -> Self {
        Self { url, revision }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url, self.revision)
    }
}
