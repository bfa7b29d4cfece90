//! Operation depth and the rules derived from it
//!
//! `Empty < Files < Immediates < Infinity`. `Exclude` and `Unknown` sit outside
//! that order and every caller has to special-case them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Inherit the ambient depth already recorded locally
    Unknown,
    /// Path is excluded from the working copy
    Exclude,
    Empty,
    Files,
    Immediates,
    Infinity,
}

/// How much of a tree must be locked before mutating it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockLevels {
    Levels(u32),
    Unbounded,
}

impl Depth {
    fn rank(self) -> Option<u8> {
        match self {
            Depth::Empty => Some(0),
            Depth::Files => Some(1),
            Depth::Immediates => Some(2),
            Depth::Infinity => Some(3),
            Depth::Unknown | Depth::Exclude => None,
        }
    }

    /// Descends into subdirectories
    pub fn is_recursive(self) -> bool {
        matches!(self, Depth::Immediates | Depth::Infinity)
    }

    /// Processes direct file children
    pub fn allows_files(self) -> bool {
        matches!(self, Depth::Files | Depth::Immediates | Depth::Infinity)
    }

    /// Processes direct directory children
    pub fn allows_dirs(self) -> bool {
        self.is_recursive()
    }

    pub fn levels_to_lock(self) -> LockLevels {
        match self {
            Depth::Empty | Depth::Files | Depth::Exclude => LockLevels::Levels(0),
            Depth::Immediates => LockLevels::Levels(1),
            Depth::Infinity | Depth::Unknown => LockLevels::Unbounded,
        }
    }

    /// Order for crop decisions; `None` when either side is Exclude or Unknown
    pub fn compare(self, other: Depth) -> Option<Ordering> {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }

    /// Strictly shallower, both sides comparable
    pub fn is_shallower_than(self, other: Depth) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    /// Depth a subdirectory is processed at when its parent is processed at `self`
    pub fn for_subdir(self) -> Option<Depth> {
        match self {
            Depth::Infinity => Some(Depth::Infinity),
            Depth::Immediates => Some(Depth::Empty),
            Depth::Unknown => Some(Depth::Unknown),
            Depth::Empty | Depth::Files | Depth::Exclude => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Unknown => "unknown",
            Depth::Exclude => "exclude",
            Depth::Empty => "empty",
            Depth::Files => "files",
            Depth::Immediates => "immediates",
            Depth::Infinity => "infinity",
        }
    }
}

impl PartialOrd for Depth {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        self.compare(*other)
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Unknown
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Depth {
    type Err = crate::SvnError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Depth::Unknown),
            "exclude" => Ok(Depth::Exclude),
            "empty" => Ok(Depth::Empty),
            "files" => Ok(Depth::Files),
            "immediates" => Ok(Depth::Immediates),
            "infinity" => Ok(Depth::Infinity),
            other => Err(crate::svn_err!(UnsupportedFeature, "Unknown depth '{0}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_depth() -> impl Strategy<Value = Depth> {
        prop_oneof![
            Just(Depth::Unknown),
            Just(Depth::Exclude),
            Just(Depth::Empty),
            Just(Depth::Files),
            Just(Depth::Immediates),
            Just(Depth::Infinity),
        ]
    }

    #[test]
    fn test_order() {
        assert!(Depth::Empty < Depth::Files);
        assert!(Depth::Files < Depth::Immediates);
        assert!(Depth::Immediates < Depth::Infinity);
        assert_eq!(Depth::Exclude.partial_cmp(&Depth::Empty), None);
        assert_eq!(Depth::Unknown.compare(Depth::Infinity), None);
        assert!(!Depth::Exclude.is_shallower_than(Depth::Infinity));
    }

    #[test]
    fn test_levels_to_lock() {
        assert_eq!(Depth::Empty.levels_to_lock(), LockLevels::Levels(0));
        assert_eq!(Depth::Files.levels_to_lock(), LockLevels::Levels(0));
        assert_eq!(Depth::Immediates.levels_to_lock(), LockLevels::Levels(1));
        assert_eq!(Depth::Infinity.levels_to_lock(), LockLevels::Unbounded);
    }

    #[test]
    fn test_recursion_rules() {
        assert!(!Depth::Files.is_recursive());
        assert!(Depth::Files.allows_files());
        assert!(!Depth::Empty.allows_files());
        assert_eq!(Depth::Immediates.for_subdir(), Some(Depth::Empty));
        assert_eq!(Depth::Files.for_subdir(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Immediates".parse::<Depth>().unwrap(), Depth::Immediates);
        assert!("deep".parse::<Depth>().is_err());
    }

    proptest! {
        #[test]
        fn prop_compare_is_antisymmetric(a in any_depth(), b in any_depth()) {
            match (a.compare(b), b.compare(a)) {
                (Some(x), Some(y)) => prop_assert_eq!(x, y.reverse()),
                (None, None) => {}
                _ => prop_assert!(false, "compare must be symmetric in definedness"),
            }
        }

        #[test]
        fn prop_shallower_never_satisfies_deeper(a in any_depth(), b in any_depth()) {
            if a.is_shallower_than(b) {
                prop_assert!(!b.is_shallower_than(a));
                prop_assert!(a != b);
            }
        }
    }
}
