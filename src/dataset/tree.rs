//! The data tree: rows and the entries discovered within them.

use std::path::PathBuf;

use crate::entity;

/// Whether an entry is a set of files or a single keyed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    FileSet,
    Field,
}

/// A single addressable item within a row.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    /// Entry path, e.g. `anat/T1w` or `derivatives/freesurfer/thickness`.
    pub path: String,
    /// Location relative to the dataset root. Field URIs carry a trailing
    /// `@<key>` into the row's fields document.
    pub uri: String,
    pub kind: EntryKind,
}

/// One leaf of the data tree: a subject, or a subject/session pair in
/// multi-session datasets.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub subject_id: String,
    pub session_id: Option<String>,
    /// Group membership carried over from `participants.tsv`.
    pub group: Option<String>,
    pub entries: Vec<DataEntry>,
}

impl DataRow {
    pub fn new(subject_id: &str, session_id: Option<&str>, group: Option<&str>) -> Self {
        DataRow {
            subject_id: entity::normalize_subject_id(subject_id),
            session_id: session_id.map(entity::normalize_session_id),
            group: group.map(str::to_string),
            entries: Vec::new(),
        }
    }

    /// Directory of this row relative to the dataset root.
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.subject_id);
        if let Some(ses) = &self.session_id {
            path.push(ses);
        }
        path
    }

    /// Row label used in log and CLI output.
    pub fn id(&self) -> String {
        match &self.session_id {
            Some(ses) => format!("{}/{}", self.subject_id, ses),
            None => self.subject_id.clone(),
        }
    }

    pub fn entry(&self, path: &str) -> Option<&DataEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// All rows of a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTree {
    pub rows: Vec<DataRow>,
}

impl DataTree {
    pub fn row(&self, subject_id: &str, session_id: Option<&str>) -> Option<&DataRow> {
        let subject_id = entity::normalize_subject_id(subject_id);
        let session_id = session_id.map(entity::normalize_session_id);
        self.rows
            .iter()
            .find(|r| r.subject_id == subject_id && r.session_id == session_id)
    }
}
