//! Symbolic revision resolution

use crate::revision::{LocalRevision, RemoteRevision, RevisionSpec};
use crate::wc::{Entry, WorkingCopy};
use dsvn_ra::{svn_err, Result, Revnum, Session};
use std::path::Path;

/// Turns revision specifiers into revision numbers.
///
/// The youngest revision is fetched at most once per resolver, so every `Head`
/// within one operation resolves to the same number.
#[derive(Debug, Default)]
pub struct RevisionResolver {
    youngest: Option<Revnum>,
}

impl RevisionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that answers `Head` with an already known revision
    pub fn with_youngest(youngest: Revnum) -> Self {
        Self {
            youngest: Some(youngest),
        }
    }

    pub fn youngest(&self) -> Option<Revnum> {
        self.youngest
    }

    pub fn resolve(
        &mut self,
        spec: &RevisionSpec,
        path: Option<&Path>,
        session: Option<&mut dyn Session>,
    ) -> Result<Revnum> {
        match spec {
            RevisionSpec::Remote(remote) => {
                let session = session.ok_or_else(|| {
                    svn_err!(RaAccessRequired, "Repository access is needed for this operation")
                })?;
                self.resolve_remote(remote, session)
            }
            RevisionSpec::Local(local) => {
                let path = path.ok_or_else(|| {
                    svn_err!(
                        VersionedPathRequired,
                        "A path under version control is needed for this operation"
                    )
                })?;
                let (wc, rel) = WorkingCopy::open_containing(path)?;
                let entry = wc.require(&rel)?;
                local_revision(local, path, entry)
            }
            RevisionSpec::Undefined => Err(svn_err!(
                BadRevision,
                "Unrecognized revision type requested for '{0}'",
                path.map(|p| p.display().to_string()).unwrap_or_default()
            )),
        }
    }

    fn resolve_remote(&mut self, remote: &RemoteRevision, session: &mut dyn Session) -> Result<Revnum> {
        match remote {
            RemoteRevision::Number(n) if *n < 0 => {
                Err(svn_err!(BadRevision, "Invalid revision number {0}", n))
            }
            RemoteRevision::Number(n) => Ok(*n),
            RemoteRevision::Head => match self.youngest {
                Some(rev) => Ok(rev),
                None => {
                    let rev = session.latest_revision()?;
                    self.youngest = Some(rev);
                    Ok(rev)
                }
            },
            RemoteRevision::Date(date) => session.dated_revision(*date),
        }
    }
}

/// Answer a local revision kind from an entry
pub(crate) fn local_revision(local: &LocalRevision, path: &Path, entry: &Entry) -> Result<Revnum> {
    match local {
        LocalRevision::Working | LocalRevision::Base => Ok(entry.revision),
        LocalRevision::Committed | LocalRevision::Previous => {
            if entry.committed_rev < 0 {
                return Err(svn_err!(
                    BadRevision,
                    "Path '{0}' has no committed revision",
                    path.display()
                ));
            }
            Ok(if *local == LocalRevision::Previous {
                entry.committed_rev - 1
            } else {
                entry.committed_rev
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsvn_ra::{Depth, ErrorCode, RepoUrl};

    fn entry(revision: Revnum, committed: Revnum) -> Entry {
        let root = RepoUrl::parse("file:///repo").unwrap();
        let mut entry = Entry::dir(root.clone(), root, "u", revision, Depth::Infinity);
        entry.committed_rev = committed;
        entry
    }

    #[test]
    fn test_local_kinds() {
        let path = Path::new("wc");
        let e = entry(7, 5);
        assert_eq!(local_revision(&LocalRevision::Base, path, &e).unwrap(), 7);
        assert_eq!(local_revision(&LocalRevision::Working, path, &e).unwrap(), 7);
        assert_eq!(local_revision(&LocalRevision::Committed, path, &e).unwrap(), 5);
        assert_eq!(local_revision(&LocalRevision::Previous, path, &e).unwrap(), 4);
    }

    #[test]
    fn test_missing_committed_revision() {
        let err = local_revision(&LocalRevision::Previous, Path::new("wc"), &entry(3, -1)).unwrap_err();
        assert!(err.is(ErrorCode::BadRevision));
        assert_eq!(err.to_string(), "Path 'wc' has no committed revision");
    }

    #[test]
    fn test_requirements() {
        let mut resolver = RevisionResolver::new();
        let err = resolver.resolve(&RevisionSpec::HEAD, None, None).unwrap_err();
        assert!(err.is(ErrorCode::RaAccessRequired));
        let err = resolver.resolve(&RevisionSpec::BASE, None, None).unwrap_err();
        assert!(err.is(ErrorCode::VersionedPathRequired));
        let err = resolver.resolve(&RevisionSpec::Undefined, None, None).unwrap_err();
        assert!(err.is(ErrorCode::BadRevision));
    }

    #[test]
    fn test_numbers_need_a_session_but_not_a_call() {
        let mut resolver = RevisionResolver::with_youngest(9);
        let err = resolver.resolve(&RevisionSpec::number(-2), None, None).unwrap_err();
        assert!(err.is(ErrorCode::RaAccessRequired));
        assert_eq!(resolver.youngest(), Some(9));
    }
}
