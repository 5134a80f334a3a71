//! The `participants.tsv` table.

use anyhow::{Result, bail};
use indexmap::IndexMap;

pub const ID_COLUMN: &str = "participant_id";
pub const GROUP_COLUMN: &str = "group";

/// Tab-separated participants table, one row per subject.
///
/// The first column is always `participant_id`; additional columns (such as
/// `group`) are preserved in their original order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Participants {
    /// Column names excluding the leading `participant_id`.
    pub columns: Vec<String>,
    rows: IndexMap<String, IndexMap<String, String>>,
}

impl Participants {
    pub fn new(columns: Vec<String>) -> Self {
        Participants {
            columns,
            rows: IndexMap::new(),
        }
    }

    /// Parse the contents of a `participants.tsv` file.
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines();
        let Some(header) = lines.next() else {
            bail!("participants.tsv is empty");
        };
        let mut header_cols = header.split('\t');
        if header_cols.next() != Some(ID_COLUMN) {
            bail!("participants.tsv must start with a '{ID_COLUMN}' column, got '{header}'");
        }
        let columns: Vec<String> = header_cols.map(str::to_string).collect();

        let mut rows = IndexMap::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let mut values = line.split('\t');
            let Some(id) = values.next() else {
                continue;
            };
            let fields: IndexMap<String, String> = columns
                .iter()
                .zip(values)
                .map(|(col, val)| (col.clone(), val.to_string()))
                .collect();
            rows.insert(id.to_string(), fields);
        }
        Ok(Participants { columns, rows })
    }

    /// Render back to TSV.
    pub fn render(&self) -> String {
        let mut out = String::from(ID_COLUMN);
        for col in &self.columns {
            out.push('\t');
            out.push_str(col);
        }
        out.push('\n');
        for (id, fields) in &self.rows {
            out.push_str(id);
            for col in &self.columns {
                out.push('\t');
                out.push_str(fields.get(col).map(String::as_str).unwrap_or(""));
            }
            out.push('\n');
        }
        out
    }

    pub fn insert(&mut self, id: &str, fields: IndexMap<String, String>) {
        self.rows.insert(id.to_string(), fields);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&IndexMap<String, String>> {
        self.rows.get(id)
    }

    /// The `group` column value for a participant, if present.
    pub fn group(&self, id: &str) -> Option<&str> {
        self.rows
            .get(id)?
            .get(GROUP_COLUMN)
            .map(String::as_str)
            .filter(|g| !g.is_empty())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
