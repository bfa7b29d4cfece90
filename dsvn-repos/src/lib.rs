//! DSvn local repository
//!
//! On-disk revisioned repository plus the `file://` session used by the
//! working-copy client:
//! - Full-tree revision snapshots with a shared object store
//! - Copy-following history and location lookup
//! - Report-driven editor driving for update, switch and status

mod delta;
pub mod fs_repository;
pub mod session;

pub use fs_repository::{FsRepository, Node, RevisionRecord, Transaction, FORMAT_MARKER};
pub use session::{LocalSession, LocalSessionFactory};
