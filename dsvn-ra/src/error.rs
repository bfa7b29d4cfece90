//! Error type shared by sessions, the repository store and the client.
//!
//! Every error carries a code, a message template with `{n}` placeholders and the
//! substitution arguments, so front ends can render consistent messages without
//! re-deriving context.

use std::fmt;

/// Result type for repository access and client operations
pub type Result<T> = std::result::Result<T, SvnError>;

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadRevision,
    RaAccessRequired,
    VersionedPathRequired,
    UnrelatedResources,
    InvalidSwitch,
    WcObstructedUpdate,
    WcNodeKindChange,
    UnsupportedFeature,
    IllegalUrl,
    InvalidRelocation,
    ExternalProgramFailure,
    Io,
    Cancelled,

    BadUrl,
    FsNotFound,
    RaNotImplemented,
    RaUuidMismatch,
    ReposRootMismatch,
    EntryMissingUrl,
    EntryNotFound,
    WcNotDirectory,
    WcNotWorkingCopy,
    WcLeftLocalMod,
    WcLocked,
    WcCorrupt,
    ReportDuplicatePath,
    EditorDrive,
    BadExternalsDefinition,
    FileExternalOverwriteVersioned,
    ChecksumMismatch,
}

impl ErrorCode {
    /// Stable name used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRevision => "BAD_REVISION",
            ErrorCode::RaAccessRequired => "RA_ACCESS_REQUIRED",
            ErrorCode::VersionedPathRequired => "VERSIONED_PATH_REQUIRED",
            ErrorCode::UnrelatedResources => "UNRELATED_RESOURCES",
            ErrorCode::InvalidSwitch => "INVALID_SWITCH",
            ErrorCode::WcObstructedUpdate => "WC_OBSTRUCTED_UPDATE",
            ErrorCode::WcNodeKindChange => "WC_NODE_KIND_CHANGE",
            ErrorCode::UnsupportedFeature => "UNSUPPORTED_FEATURE",
            ErrorCode::IllegalUrl => "ILLEGAL_URL",
            ErrorCode::InvalidRelocation => "WC_INVALID_RELOCATION",
            ErrorCode::ExternalProgramFailure => "EXTERNAL_PROGRAM",
            ErrorCode::Io => "IO_ERROR",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::BadUrl => "BAD_URL",
            ErrorCode::FsNotFound => "FS_NOT_FOUND",
            ErrorCode::RaNotImplemented => "RA_NOT_IMPLEMENTED",
            ErrorCode::RaUuidMismatch => "RA_UUID_MISMATCH",
            ErrorCode::ReposRootMismatch => "RA_REPOS_ROOT_URL_MISMATCH",
            ErrorCode::EntryMissingUrl => "ENTRY_MISSING_URL",
            ErrorCode::EntryNotFound => "ENTRY_NOT_FOUND",
            ErrorCode::WcNotDirectory => "WC_NOT_DIRECTORY",
            ErrorCode::WcNotWorkingCopy => "WC_NOT_WORKING_COPY",
            ErrorCode::WcLeftLocalMod => "WC_LEFT_LOCAL_MOD",
            ErrorCode::WcLocked => "WC_LOCKED",
            ErrorCode::WcCorrupt => "WC_CORRUPT",
            ErrorCode::ReportDuplicatePath => "REPORT_DUPLICATE_PATH",
            ErrorCode::EditorDrive => "EDITOR_DRIVE",
            ErrorCode::BadExternalsDefinition => "CLIENT_INVALID_EXTERNALS_DESCRIPTION",
            ErrorCode::FileExternalOverwriteVersioned => "CLIENT_FILE_EXTERNAL_OVERWRITE_VERSIONED",
            ErrorCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by any layer of the engine
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SvnError {
    code: ErrorCode,
    template: String,
    args: Vec<String>,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SvnError {
    /// Create an error from a template and its substitution arguments
    pub fn new(code: ErrorCode, template: impl Into<String>, args: Vec<String>) -> Self {
        let template = template.into();
        let message = render(&template, &args);
        Self {
            code,
            template,
            args,
            message,
            source: None,
        }
    }

    /// The operation was cancelled by the caller
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Operation cancelled", Vec::new())
    }

    /// Attach an underlying cause
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Unrendered message template
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitution arguments for the template
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Rendered message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check the error kind
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

/// Substitute `{0}`, `{1}`, ... in `template`
pub fn render(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match key.parse::<usize>().ok().and_then(|i| args.get(i)) {
                    Some(arg) => out.push_str(arg),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build an [`SvnError`] from a code name, a template and display-able arguments.
///
/// ```
/// use dsvn_ra::{svn_err, ErrorCode};
/// let err = svn_err!(IllegalUrl, "URL '{0}' doesn't exist", "file:///repo/x");
/// assert_eq!(err.code(), ErrorCode::IllegalUrl);
/// assert_eq!(err.to_string(), "URL 'file:///repo/x' doesn't exist");
/// ```
#[macro_export]
macro_rules! svn_err {
    ($code:ident, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::SvnError::new(
            $crate::ErrorCode::$code,
            $template,
            vec![$(format!("{}", $arg)),*],
        )
    };
}

impl From<std::io::Error> for SvnError {
    fn from(e: std::io::Error) -> Self {
        SvnError::new(ErrorCode::Io, "I/O error: {0}", vec![e.to_string()]).with_source(e)
    }
}

impl From<bincode::Error> for SvnError {
    fn from(e: bincode::Error) -> Self {
        SvnError::new(ErrorCode::Io, "Serialization error: {0}", vec![e.to_string()]).with_source(e)
    }
}

impl From<serde_json::Error> for SvnError {
    fn from(e: serde_json::Error) -> Self {
        SvnError::new(ErrorCode::WcCorrupt, "Malformed metadata: {0}", vec![e.to_string()])
            .with_source(e)
    }
}

impl From<anyhow::Error> for SvnError {
    fn from(e: anyhow::Error) -> Self {
        // Keep a typed error if one was wrapped in anyhow on the way up
        match e.downcast::<SvnError>() {
            Ok(inner) => inner,
            Err(e) => SvnError::new(ErrorCode::Io, "{0}", vec![format!("{:#}", e)]).with_source(e),
        }
    }
}
