//! BIDS filename entity handling.
//!
//! BIDS file names are composed of `_`-separated `key-value` entities
//! followed by a suffix, e.g. `sub-01_ses-02_task-rest_bold.nii.gz`. The
//! store addresses entries by an "entry path" that factors the subject and
//! session IDs out of the name: `<subdir>/<suffix>` with the remaining
//! entities appended as `key=value` segments (e.g. `func/bold/task=rest`).

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

/// A BIDS file name decomposed into entities, suffix and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// `key-value` entities, sorted by key.
    pub entities: Vec<(String, String)>,
    pub suffix: String,
    /// Full extension without the leading dot, e.g. `nii.gz`. Empty if none.
    pub ext: String,
}

/// Prefix an ID with `sub-` unless it already carries it.
pub fn normalize_subject_id(id: &str) -> String {
    if id.starts_with("sub-") {
        id.to_string()
    } else {
        format!("sub-{id}")
    }
}

/// Prefix an ID with `ses-` unless it already carries it.
pub fn normalize_session_id(id: &str) -> String {
    if id.starts_with("ses-") {
        id.to_string()
    } else {
        format!("ses-{id}")
    }
}

/// Decompose a BIDS file name.
///
/// The stem is everything before the first `.`; the final `_`-separated part
/// is the suffix and the preceding parts are `key-value` entities. A part
/// without a `-` is kept as a key with an empty value.
pub fn parse_file_name(name: &str) -> Result<ParsedName> {
    let (stem, ext) = match name.split_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (name, ""),
    };
    if stem.is_empty() {
        bail!("Cannot parse entities from empty file name '{name}'");
    }
    let mut parts: Vec<&str> = stem.split('_').collect();
    let suffix = parts.pop().unwrap_or_default().to_string();
    let mut entities: Vec<(String, String)> = parts
        .iter()
        .map(|p| match p.split_once('-') {
            Some((key, val)) => (key.to_string(), val.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect();
    entities.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ParsedName {
        entities,
        suffix,
        ext: ext.to_string(),
    })
}

/// Convert a file path relative to a subject/session directory into an
/// entry path and extension.
///
/// Entities other than the subject and session IDs are appended as
/// `key=value` segments: `anat/sub-01_acq-highres_T1w.nii.gz` becomes
/// `("anat/T1w/acq=highres", "nii.gz")`.
pub fn fs_to_entry_path(relpath: &Path) -> Result<(String, String)> {
    let Some(name) = relpath.file_name().and_then(|n| n.to_str()) else {
        bail!("Path '{}' has no file name", relpath.display());
    };
    let parsed = parse_file_name(name)?;
    let mut segments: Vec<String> = relpath
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    segments.push(parsed.suffix);
    for (key, val) in &parsed.entities {
        if key != "sub" && key != "ses" {
            segments.push(format!("{key}={val}"));
        }
    }
    Ok((segments.join("/"), parsed.ext))
}

/// Convert an entry path back into a file path relative to the dataset root.
///
/// Entry paths must contain at least two `/`-delimited parts, the first
/// being the sub-directory (e.g. `anat` or a pipeline name) and the second
/// the file suffix. Later parts are either `key=value` entities, folded into
/// the file name sorted by key, or additional sub-directories.
///
/// With `entry_path` of `None` only the row directory
/// (`sub-<id>[/ses-<id>]`) is returned.
pub fn entry_to_fs_path(
    entry_path: Option<&str>,
    subject_id: &str,
    session_id: Option<&str>,
    ext: &str,
) -> Result<PathBuf> {
    let subject_id = normalize_subject_id(subject_id);
    let session_id = session_id.map(normalize_session_id);

    let mut relpath = PathBuf::from(&subject_id);
    let mut fname_parts = vec![subject_id.clone()];
    if let Some(ses) = &session_id {
        relpath.push(ses);
        fname_parts.push(ses.clone());
    }

    let Some(entry_path) = entry_path else {
        return Ok(relpath);
    };

    let parts: Vec<&str> = entry_path.trim_end_matches('/').split('/').collect();
    if parts.len() < 2 {
        bail!(
            "BIDS paths should contain at least two '/' delimited parts (e.g. \
             anat/T1w or freesurfer/recon-all), given '{entry_path}'"
        );
    }
    relpath.push(parts[0]);
    let suffix = parts[1];

    let mut entities: Vec<(&str, &str)> = Vec::new();
    for part in &parts[2..] {
        match part.split_once('=') {
            Some((key, val)) => entities.push((key, val)),
            None => relpath.push(part),
        }
    }
    entities.sort_by(|a, b| a.0.cmp(b.0));
    for (key, val) in entities {
        fname_parts.push(format!("{key}-{val}"));
    }
    fname_parts.push(suffix.to_string());

    let mut fname = fname_parts.join("_");
    if !ext.is_empty() {
        fname.push('.');
        fname.push_str(ext);
    }
    relpath.push(fname);
    Ok(relpath)
}
