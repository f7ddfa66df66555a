//! Path algebra.
//!
//! Pure string functions parameterized by a separator and a volume-prefix
//! length, so every backend can apply them under its own conventions.
//! Nothing here touches a filesystem.

use wax::{Glob, Pattern};

use crate::error::{FsError, FsResult};

/// Clean a path without a volume prefix.
///
/// Collapses repeated separators, drops `.` segments and resolves `..`
/// lexically. `..` never climbs above the root of a rooted path; a relative
/// path keeps leading `..` segments. An empty path cleans to `"."`.
pub fn clean(path: &str, sep: char) -> String {
    clean_with_volume(path, sep, 0)
}

/// Clean a path whose first `volume_len` bytes are a volume name kept verbatim.
pub fn clean_with_volume(path: &str, sep: char, volume_len: usize) -> String {
    let (volume, rest) = split_volume(path, volume_len);
    if rest.is_empty() {
        return if volume.is_empty() {
            ".".to_string()
        } else {
            volume.to_string()
        };
    }

    let rooted = rest.starts_with(sep);
    let mut out: Vec<&str> = Vec::new();
    for seg in rest.split(sep) {
        match seg {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ if rooted => {}
                _ => out.push(".."),
            },
            seg => out.push(seg),
        }
    }

    let sep_str = sep.to_string();
    let body = out.join(&sep_str);
    let cleaned = match (rooted, body.is_empty()) {
        (true, _) => format!("{sep}{body}"),
        (false, true) => ".".to_string(),
        (false, false) => body,
    };
    format!("{volume}{cleaned}")
}

/// Join path parts with `sep` and clean the result.
///
/// Empty parts are skipped. Returns an empty string when every part is empty.
pub fn join_clean(parts: &[&str], sep: char) -> String {
    let sep_str = sep.to_string();
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(&sep_str);
    if joined.is_empty() {
        return joined;
    }
    clean(&joined, sep)
}

/// Split a path into its non-empty segments.
pub fn split(path: &str, sep: char) -> Vec<&str> {
    path.split(sep).filter(|s| !s.is_empty()).collect()
}

/// Split a path into its parent directory and leaf name.
///
/// - `""` gives `("", "")`.
/// - The root (`sep`, or volume followed by `sep`) gives `(root, "")`.
/// - A leaf with no separator before it gives `(".", leaf)`, or
///   `(volume, leaf)` when a volume prefix is present.
/// - Trailing separators are ignored.
pub fn dir_and_name(path: &str, sep: char, volume_len: usize) -> (String, String) {
    if path.is_empty() {
        return (String::new(), String::new());
    }
    let (volume, mut rest) = split_volume(path, volume_len);
    while rest.len() > sep.len_utf8() && rest.ends_with(sep) {
        rest = &rest[..rest.len() - sep.len_utf8()];
    }
    if rest.len() == sep.len_utf8() && rest.starts_with(sep) {
        return (format!("{volume}{sep}"), String::new());
    }

    match rest.rfind(sep) {
        None => {
            let dir = if volume.is_empty() { "." } else { volume };
            (dir.to_string(), rest.to_string())
        }
        Some(0) => (
            format!("{volume}{sep}"),
            rest[sep.len_utf8()..].to_string(),
        ),
        Some(pos) => (
            format!("{volume}{}", &rest[..pos]),
            rest[pos + sep.len_utf8()..].to_string(),
        ),
    }
}

/// Whether the path is rooted after its volume prefix.
pub fn is_abs(path: &str, sep: char, volume_len: usize) -> bool {
    split_volume(path, volume_len).1.starts_with(sep)
}

/// Extension of a file name including the dot, or `""`.
///
/// A leading dot marks a hidden file, not an extension: `.bashrc` has none.
pub fn ext(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &name[pos..],
    }
}

/// File name without its extension.
pub fn trim_ext(name: &str) -> &str {
    &name[..name.len() - ext(name).len()]
}

/// Dot-file convention for hidden names.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

/// Whether `name` matches any of `patterns`.
///
/// Zero patterns means no filter: every name matches.
pub fn match_any_pattern(name: &str, patterns: &[&str]) -> FsResult<bool> {
    if patterns.is_empty() {
        return Ok(true);
    }
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| FsError::invalid_path(format!("bad pattern {pattern:?}: {e}")))?;
        if glob.is_match(name) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn split_volume(path: &str, volume_len: usize) -> (&str, &str) {
    let len = volume_len.min(path.len());
    if path.is_char_boundary(len) {
        path.split_at(len)
    } else {
        ("", path)
    }
}
