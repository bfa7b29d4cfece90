//! Versioned properties
//!
//! Regular properties travel with the node; `svn:entry:*` properties are sent by
//! the repository alongside edits and only update bookkeeping in the working copy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property value
pub type PropertyValue = String;

/// Ordered name -> value map
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A single property change; `value: None` deletes the property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropChange {
    pub name: String,
    pub value: Option<PropertyValue>,
}

impl PropChange {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// Changes that turn `from` into `to`, regular and entry properties alike
pub fn diff_props(from: &PropertyMap, to: &PropertyMap) -> Vec<PropChange> {
    let mut changes = Vec::new();
    for (name, value) in to {
        if from.get(name) != Some(value) {
            changes.push(PropChange::set(name.clone(), value.clone()));
        }
    }
    for name in from.keys() {
        if !to.contains_key(name) {
            changes.push(PropChange::delete(name.clone()));
        }
    }
    changes
}

/// Apply changes in order
pub fn apply_changes(props: &mut PropertyMap, changes: &[PropChange]) {
    for change in changes {
        match &change.value {
            Some(v) => {
                props.insert(change.name.clone(), v.clone());
            }
            None => {
                props.remove(&change.name);
            }
        }
    }
}

/// SVN standard properties
pub mod svn_props {
    /// Executable flag
    pub const EXECUTABLE: &str = "svn:executable";

    /// MIME type
    pub const MIME_TYPE: &str = "svn:mime-type";

    /// End-of-line style
    pub const EOL_STYLE: &str = "svn:eol-style";

    /// Keywords
    pub const KEYWORDS: &str = "svn:keywords";

    /// Special file (symlink)
    pub const SPECIAL: &str = "svn:special";

    /// Externals
    pub const EXTERNALS: &str = "svn:externals";

    /// Value for svn:executable
    pub const EXECUTABLE_VALUE: &str = "*";

    /// Prefix of bookkeeping properties sent with edits
    pub const ENTRY_PREFIX: &str = "svn:entry:";

    pub const ENTRY_COMMITTED_REV: &str = "svn:entry:committed-rev";
    pub const ENTRY_COMMITTED_DATE: &str = "svn:entry:committed-date";
    pub const ENTRY_LAST_AUTHOR: &str = "svn:entry:last-author";
    pub const ENTRY_UUID: &str = "svn:entry:uuid";

    /// Check if a property name is an SVN standard property
    pub fn is_svn_property(name: &str) -> bool {
        name.starts_with("svn:")
    }

    pub fn is_entry_property(name: &str) -> bool {
        name.starts_with(ENTRY_PREFIX)
    }

    /// Properties that are stored on the node itself
    pub fn is_regular_property(name: &str) -> bool {
        !is_entry_property(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_props_reports_sets_and_deletes() {
        let from = props(&[("a", "1"), ("b", "2")]);
        let to = props(&[("a", "1"), ("b", "3"), ("c", "4")]);
        let changes = diff_props(&from, &to);
        assert_eq!(
            changes,
            vec![PropChange::set("b", "3"), PropChange::set("c", "4")]
        );

        let back = diff_props(&to, &from);
        assert!(back.contains(&PropChange::delete("c")));
    }

    #[test]
    fn test_apply_changes_reaches_target() {
        let from = props(&[("x", "1"), ("y", "2")]);
        let to = props(&[("y", "5"), ("z", "")]);
        let mut current = from.clone();
        apply_changes(&mut current, &diff_props(&from, &to));
        assert_eq!(current, to);
    }

    #[test]
    fn test_svn_standard_properties() {
        use svn_props::*;

        assert!(is_svn_property("svn:executable"));
        assert!(!is_svn_property("custom:myprop"));
        assert!(is_entry_property(ENTRY_COMMITTED_REV));
        assert!(!is_regular_property(ENTRY_LAST_AUTHOR));
        assert!(is_regular_property(EXTERNALS));
        assert_eq!(EXECUTABLE_VALUE, "*");
    }
}
