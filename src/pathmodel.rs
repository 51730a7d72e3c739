//! Picking file paths apart and deriving new names from them.
//!
//! Terminology, for "quux/report-2.txt":
//!   dir      "quux/"        (empty, or ends with a separator)
//!   base     "report-2.txt"
//!   stem     "report-2"
//!   ext      ".txt"         (includes the dot)
//!   substem  "report"       (stem less a trailing qualifier)
//!   mod      "-2"           (that qualifier)
//!
//! Nothing here touches the disk.

use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::hash::BuildHasher;

/// Split a path into its directory and file name.
/// Unlike Path::parent(), the directory keeps its trailing separator so the
/// two halves concatenate back to a usable path.
pub fn split_dir_base(path: &str) -> (&str, &str) {
    let sep = match path.rfind('/') {
        None => return ("", path),
        Some(i) => i,
    };
    let head = &path[..=sep];
    let trimmed = head.trim_end_matches('/');
    let dir = if trimmed.is_empty() {
        // Root, or only separators: keep as is.
        head
    } else {
        &path[..trimmed.len() + 1]
    };
    (dir, &path[sep + 1..])
}

/// Split a path into directory, stem and extension.
pub fn split_dir_stem_ext(path: &str) -> (&str, &str, &str) {
    let (dir, base) = split_dir_base(path);
    let (stem, ext) = split_ext(base);
    (dir, stem, ext)
}

fn split_ext(base: &str) -> (&str, &str) {
    match base.rfind('.') {
        // A dot file like ".bashrc" has no extension.
        Some(i) if !base[..i].bytes().all(|c| c == b'.') => (&base[..i], &base[i..]),
        _ => (base, ""),
    }
}

/// Split a stem into a core name and a trailing qualifier introduced by '.'
/// or '-', e.g. "report-2" => ("report", "-2").  The qualifier must not
/// contain whitespace and must be preceded by at least one character.
pub fn split_substem(stem: &str) -> (&str, &str) {
    for (i, c) in stem.char_indices().skip(1) {
        if c != '.' && c != '-' {
            continue;
        }
        let rest = &stem[i + c.len_utf8()..];
        if !rest.is_empty() && !rest.chars().any(char::is_whitespace) {
            return (&stem[..i], &stem[i..]);
        }
    }
    (stem, "")
}

/// Replace every `{name}` in template with its value from vars.
pub fn interpolate<S: BuildHasher>(
    template: &str,
    vars: &HashMap<String, String, S>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if close > 0 => {
                out.push_str(&rest[..open]);
                let name = after[..close].trim();
                match vars.get(name) {
                    Some(val) => out.push_str(val),
                    None => return Err(Error::MissingVariable(name.to_owned())),
                }
                rest = &after[close + 1..];
            }
            Some(_) => {
                // "{}" isn't a placeholder.
                out.push_str(&rest[..open + 1]);
                rest = after;
            }
            None => break,
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// The variables describing a path, as used by derive_name.
pub fn path_vars(path: &str) -> FxHashMap<String, String> {
    let (_, base) = split_dir_base(path);
    let (dir, stem, ext) = split_dir_stem_ext(path);
    let (substem, modifier) = split_substem(stem);
    let now = chrono::Local::now();

    let mut vars = FxHashMap::default();
    for (k, v) in [
        ("ext", ext.to_owned()),
        ("base", base.to_owned()),
        ("stem", stem.to_owned()),
        ("dir", dir.to_owned()),
        ("dirstem", format!("{}{}", dir, stem)),
        ("substem", substem.to_owned()),
        ("mod", modifier.to_owned()),
        ("date", now.format("%Y%m%d").to_string()),
        ("time", now.format("%H%M%S").to_string()),
        ("datetime", now.format("%Y%m%dT%H%M%S").to_string()),
    ] {
        vars.insert(k.to_owned(), v);
    }
    vars
}

/// Derive a new name from a path and a template, e.g.
/// ("data/raw.csv", "{dir}{stem}-clean{ext}") => "data/raw-clean.csv".
/// Values in extra_vars override the path-derived ones.
pub fn derive_name<I, K, V>(path: &str, template: &str, extra_vars: I) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut vars = path_vars(path);
    for (k, v) in extra_vars {
        vars.insert(k.into(), v.into());
    }
    interpolate(template, &vars)
}
