//! Text translation between repository form and working files

use bytes::Bytes;
use dsvn_ra::{svn_props, PropertyMap, Result};
use std::fs;
use std::path::Path;

/// Line ending selected by `svn:eol-style`, `None` when text is kept verbatim
pub fn eol_for<'a>(props: &PropertyMap, native: &'a str) -> Option<&'a str> {
    if is_binary(props) {
        return None;
    }
    match props.get(svn_props::EOL_STYLE).map(String::as_str) {
        Some("native") => Some(native),
        Some("LF") => Some("\n"),
        Some("CRLF") => Some("\r\n"),
        Some("CR") => Some("\r"),
        _ => None,
    }
}

/// Non-text mime types are never translated
pub fn is_binary(props: &PropertyMap) -> bool {
    props
        .get(svn_props::MIME_TYPE)
        .is_some_and(|m| !m.starts_with("text/"))
}

/// Replace every line ending (LF, CRLF, CR) with `eol`
pub fn translate_eol(text: &[u8], eol: &str) -> Bytes {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'\r' => {
                out.extend_from_slice(eol.as_bytes());
                if text.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => out.extend_from_slice(eol.as_bytes()),
            b => out.push(b),
        }
        i += 1;
    }
    Bytes::from(out)
}

/// Working-file form of a repository text
pub fn to_working(text: &[u8], props: &PropertyMap, native: &str) -> Bytes {
    match eol_for(props, native) {
        Some(eol) => translate_eol(text, eol),
        None => Bytes::copy_from_slice(text),
    }
}

/// Repository form of a working file, used for modification checks
pub fn to_normal(text: &[u8], props: &PropertyMap) -> Bytes {
    match eol_for(props, "\n") {
        Some(_) => translate_eol(text, "\n"),
        None => Bytes::copy_from_slice(text),
    }
}

pub fn is_executable(props: &PropertyMap) -> bool {
    props.contains_key(svn_props::EXECUTABLE)
}

#[cfg(unix)]
pub fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    let mode = if executable {
        mode | ((mode & 0o444) >> 2)
    } else {
        mode & !0o111
    };
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

/// Write a working file from repository text and properties
pub fn write_working(path: &Path, text: &[u8], props: &PropertyMap, native: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_working(text, props, native))?;
    if is_executable(props) {
        set_executable(path, true)?;
    }
    Ok(())
}
