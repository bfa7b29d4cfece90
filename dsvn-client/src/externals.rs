//! `svn:externals` definitions
//!
//! One definition per line, in either form:
//!
//! ```text
//! third-party/lib  -r 12  http://host/repos/lib        (old: target first)
//! -r 12 ^/vendor/lib@10  third-party/lib               (new: URL first)
//! ```
//!
//! Tokens may be quoted with `"` or `'` and backslash-escaped. New-style URLs
//! may be relative: `^/` (repository root), `//` (scheme), `/` (server root)
//! or `../` (the owner directory's URL).

use crate::revision::RevisionSpec;
use dsvn_ra::{relpath, svn_err, Depth, RepoUrl, Result, Revnum};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// One parsed definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDefinition {
    /// Owner directory, relative to the reconciliation root
    pub owner: String,
    /// Target path relative to the owner
    pub target: String,
    /// URL as written, possibly relative
    pub url: String,
    pub peg: RevisionSpec,
    pub revision: RevisionSpec,
    /// The definition line
    pub raw: String,
}

impl ExternalDefinition {
    /// Absolute URL given the owner's URL and its repository root
    pub fn resolve_url(&self, owner_url: &RepoUrl, repos_root: &RepoUrl) -> Result<RepoUrl> {
        resolve_external_url(&self.url, owner_url, repos_root)
    }

    /// Path relative to the reconciliation root
    pub fn path(&self) -> String {
        relpath::join(&self.owner, &self.target)
    }
}

fn revision_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-r(\S*)$").expect("revision token pattern"))
}

fn scheme_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("URL scheme pattern"))
}

/// URL token in either absolute or relative form
fn looks_like_url(token: &str) -> bool {
    scheme_prefix().is_match(token)
        || token.starts_with("^/")
        || token.starts_with("../")
        || token.starts_with('/')
}

/// Split a line into tokens honouring quotes and backslash escapes
fn tokenize(line: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(chars.next()?);
                in_token = true;
            }
            '"' | '\'' if quote == Some(c) => quote = None,
            '"' | '\'' if quote.is_none() && !in_token => {
                quote = Some(c);
                in_token = true;
            }
            c if c.is_whitespace() && quote.is_none() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return None;
    }
    if in_token {
        tokens.push(current);
    }
    Some(tokens)
}

fn parse_number(owner: &str, line: &str, value: &str) -> Result<RevisionSpec> {
    value
        .parse::<Revnum>()
        .ok()
        .filter(|n| *n >= 0)
        .map(RevisionSpec::number)
        .ok_or_else(|| parse_error(owner, line))
}

fn parse_error(owner: &str, line: &str) -> dsvn_ra::SvnError {
    svn_err!(
        BadExternalsDefinition,
        "Error parsing svn:externals property on '{0}': '{1}'",
        owner,
        line
    )
}

/// Parse an `svn:externals` value set on `owner`
pub fn parse_externals(owner: &str, value: &str) -> Result<Vec<ExternalDefinition>> {
    let mut defs = Vec::new();
    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = tokenize(line).ok_or_else(|| parse_error(owner, line))?;
        if !(2..=4).contains(&tokens.len()) {
            return Err(parse_error(owner, line));
        }

        let mut revision = RevisionSpec::Undefined;
        let mut rest = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if let Some(caps) = revision_token().captures(token) {
                if revision.is_valid() {
                    return Err(parse_error(owner, line));
                }
                let inline = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                if inline.is_empty() {
                    i += 1;
                    let next = tokens.get(i).ok_or_else(|| parse_error(owner, line))?;
                    revision = parse_number(owner, line, next)?;
                } else {
                    revision = parse_number(owner, line, inline)?;
                }
            } else {
                rest.push(token.clone());
            }
            i += 1;
        }
        if rest.len() != 2 {
            return Err(parse_error(owner, line));
        }

        let (target, url, peg) = if looks_like_url(&rest[0]) && !looks_like_url(&rest[1]) {
            // new format: URL[@peg] target
            let (url, peg) = split_peg(owner, line, &rest[0])?;
            (rest[1].clone(), url, peg)
        } else {
            // old format: target URL, the revision doubles as peg
            if !scheme_prefix().is_match(&rest[1]) {
                return Err(svn_err!(
                    BadExternalsDefinition,
                    "Invalid svn:externals property on '{0}': relative URL '{1}' needs the URL-first format",
                    owner,
                    rest[1]
                ));
            }
            (rest[0].clone(), rest[1].clone(), revision)
        };

        let target = canonical_target(owner, &target)?;
        let (peg, revision) = match (peg.is_valid(), revision.is_valid()) {
            (true, false) => (peg, peg),
            (false, true) => (RevisionSpec::HEAD, revision),
            (false, false) => (RevisionSpec::HEAD, RevisionSpec::HEAD),
            (true, true) => (peg, revision),
        };
        defs.push(ExternalDefinition {
            owner: owner.to_string(),
            target,
            url,
            peg,
            revision,
            raw: line.to_string(),
        });
    }
    Ok(defs)
}

fn split_peg(owner: &str, line: &str, token: &str) -> Result<(String, RevisionSpec)> {
    match token.rsplit_once('@') {
        Some((url, peg)) if !peg.contains('/') => {
            let spec = peg
                .parse::<RevisionSpec>()
                .map_err(|_| parse_error(owner, line))?;
            if spec.is_local() {
                return Err(parse_error(owner, line));
            }
            Ok((url.to_string(), spec))
        }
        _ => Ok((token.to_string(), RevisionSpec::Undefined)),
    }
}

fn canonical_target(owner: &str, target: &str) -> Result<String> {
    let trimmed = target.trim_end_matches('/');
    let invalid = trimmed.is_empty()
        || trimmed.starts_with('/')
        || trimmed.split('/').any(|s| s == ".." || s.is_empty());
    if invalid {
        return Err(svn_err!(
            BadExternalsDefinition,
            "Invalid svn:externals property on '{0}': target '{1}' is an absolute path or involves '..'",
            owner,
            target
        ));
    }
    Ok(trimmed
        .split('/')
        .filter(|s| *s != ".")
        .collect::<Vec<_>>()
        .join("/"))
}

/// Resolve an external's URL
pub fn resolve_external_url(url: &str, owner_url: &RepoUrl, repos_root: &RepoUrl) -> Result<RepoUrl> {
    if let Some(rest) = url.strip_prefix("^/") {
        return repos_root.resolve_relative(rest);
    }
    if let Some(rest) = url.strip_prefix("//") {
        return RepoUrl::parse(&format!("{}://{}", owner_url.scheme(), rest));
    }
    if url.starts_with("../") {
        return owner_url.resolve_relative(url);
    }
    if url.starts_with('/') {
        return owner_url.server_root().with_path(url);
    }
    RepoUrl::parse(url).map_err(|_| {
        svn_err!(
            BadExternalsDefinition,
            "Unrecognized format for the relative external URL '{0}'",
            url
        )
    })
}

/// What the reconciler should do with one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChange {
    Create(ExternalDefinition),
    Remove(ExternalDefinition),
    Reconcile {
        old: ExternalDefinition,
        new: ExternalDefinition,
    },
}

impl ExternalChange {
    pub fn target(&self) -> &str {
        match self {
            ExternalChange::Create(d) | ExternalChange::Remove(d) => &d.target,
            ExternalChange::Reconcile { new, .. } => &new.target,
        }
    }
}

fn same_definition(a: &ExternalDefinition, b: &ExternalDefinition, resolve: &dyn Fn(&str) -> Option<RepoUrl>) -> bool {
    let same_url = match (resolve(&a.url), resolve(&b.url)) {
        (Some(x), Some(y)) => x == y,
        _ => a.url == b.url,
    };
    same_url && a.peg == b.peg && a.revision == b.revision
}

/// Changes between two definition lists of one owner. Unchanged targets are
/// only listed (as `Reconcile`) when `update_unchanged` is set. `resolve`
/// turns a written URL into an absolute one for comparison.
pub fn diff_externals(
    old: &[ExternalDefinition],
    new: &[ExternalDefinition],
    update_unchanged: bool,
    resolve: &dyn Fn(&str) -> Option<RepoUrl>,
) -> Vec<ExternalChange> {
    let new_by_target: BTreeMap<&str, &ExternalDefinition> =
        new.iter().map(|d| (d.target.as_str(), d)).collect();
    let old_targets: BTreeMap<&str, ()> = old.iter().map(|d| (d.target.as_str(), ())).collect();

    let mut changes = Vec::new();
    for o in old {
        match new_by_target.get(o.target.as_str()) {
            None => changes.push(ExternalChange::Remove(o.clone())),
            Some(n) => {
                if update_unchanged || !same_definition(o, n, resolve) {
                    changes.push(ExternalChange::Reconcile {
                        old: o.clone(),
                        new: (*n).clone(),
                    });
                }
            }
        }
    }
    for n in new {
        if !old_targets.contains_key(n.target.as_str()) {
            changes.push(ExternalChange::Create(n.clone()));
        }
    }
    changes
}

/// Externals seen while walking a tree, keyed by owner relpath
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalsStore {
    pub old: BTreeMap<String, String>,
    pub new: BTreeMap<String, String>,
    pub depths: BTreeMap<String, Depth>,
}

impl ExternalsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition present before the operation; assumed unchanged until told otherwise
    pub fn add_old(&mut self, owner: &str, value: &str, depth: Depth) {
        self.old.insert(owner.to_string(), value.to_string());
        self.new.insert(owner.to_string(), value.to_string());
        self.depths.insert(owner.to_string(), depth);
    }

    /// Definition after the operation; `None` when the property was removed
    pub fn set_new(&mut self, owner: &str, value: Option<&str>, depth: Depth) {
        match value {
            Some(v) => {
                self.new.insert(owner.to_string(), v.to_string());
            }
            None => {
                self.new.remove(owner);
            }
        }
        self.depths.insert(owner.to_string(), depth);
    }

    /// Forget an owner that disappeared from the tree
    pub fn remove_owner(&mut self, owner: &str) {
        self.new.remove(owner);
    }

    /// Union of owners on both sides
    pub fn owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self.old.keys().chain(self.new.keys()).cloned().collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_empty() && self.new.is_empty()
    }
}
