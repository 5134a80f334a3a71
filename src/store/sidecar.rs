//! JSON side-car editing.
//!
//! Side-cars written by converters such as dcm2niix sometimes need manual
//! correction before the dataset passes validation. Edits select entries by
//! a regular expression over their entry paths and set or remove a value at
//! a JSON pointer. Value templates may reference the file paths of other
//! entries in the same row via `{column}` placeholders (escape literal
//! braces by doubling them).

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

// Task entities appear as "task=<name>" in entry paths and "task-<name>" in
// raw file names, always at the start or after a '/' or '_' boundary.
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[/_])task[=-]([a-zA-Z0-9]+)").expect("task entity pattern"));

/// A single configured side-car edit.
#[derive(Debug, Clone)]
pub struct JsonEdit {
    /// Matches the entry paths of the side-cars to edit.
    path: Regex,
    pointer: String,
    /// JSON value template; `None` removes the value at the pointer.
    value: Option<String>,
}

impl JsonEdit {
    /// An edit that sets `pointer` to the value parsed from `template`.
    pub fn set(path: &str, pointer: &str, template: &str) -> Result<Self> {
        Ok(JsonEdit {
            path: Regex::new(path)
                .with_context(|| format!("Invalid edit path pattern '{path}'"))?,
            pointer: pointer.to_string(),
            value: Some(template.to_string()),
        })
    }

    /// An edit that removes the value at `pointer`.
    pub fn remove(path: &str, pointer: &str) -> Result<Self> {
        Ok(JsonEdit {
            path: Regex::new(path)
                .with_context(|| format!("Invalid edit path pattern '{path}'"))?,
            pointer: pointer.to_string(),
            value: None,
        })
    }

    pub fn matches(&self, entry_path: &str) -> bool {
        self.path.is_match(entry_path)
    }

    /// Apply the edit to a side-car document. Returns whether the document
    /// changed.
    pub fn apply(&self, doc: &mut Value, columns: &IndexMap<String, String>) -> Result<bool> {
        match &self.value {
            Some(template) => {
                let rendered = substitute_columns(template, columns)?;
                let value: Value = serde_json::from_str(&rendered).with_context(|| {
                    format!("Edit value '{rendered}' is not a valid JSON document")
                })?;
                if doc.pointer(&self.pointer) == Some(&value) {
                    return Ok(false);
                }
                set_pointer(doc, &self.pointer, value)?;
                Ok(true)
            }
            None => Ok(remove_pointer(doc, &self.pointer)),
        }
    }
}

/// Substitute `{column}` placeholders with row file paths.
fn substitute_columns(template: &str, columns: &IndexMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => bail!("Unterminated '{{' in edit template '{template}'"),
                    }
                }
                let Some(path) = columns.get(&name) else {
                    bail!("No column '{name}' in row to substitute into edit template");
                };
                out.push_str(path);
            }
            '}' => bail!("Unmatched '}}' in edit template '{template}'"),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Set a value at a JSON pointer, creating intermediate objects.
fn set_pointer(doc: &mut Value, pointer: &str, value: Value) -> Result<()> {
    let mut current = doc;
    let tokens: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect();
    if tokens.is_empty() {
        bail!("Edit pointer '{pointer}' does not name a field");
    }
    for (i, token) in tokens.iter().enumerate() {
        if !current.is_object() {
            bail!("Edit pointer '{pointer}' does not lead through JSON objects");
        }
        let map = current
            .as_object_mut()
            .context("side-car document is not a JSON object")?;
        if i == tokens.len() - 1 {
            map.insert(token.clone(), value);
            return Ok(());
        }
        current = map
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    Ok(())
}

/// Remove the value at a JSON pointer. Returns whether anything was removed.
fn remove_pointer(doc: &mut Value, pointer: &str) -> bool {
    let Some((parent, key)) = pointer.rsplit_once('/') else {
        return false;
    };
    let key = key.replace("~1", "/").replace("~0", "~");
    let target = if parent.is_empty() {
        Some(doc)
    } else {
        doc.pointer_mut(parent)
    };
    match target.and_then(Value::as_object_mut) {
        Some(map) => map.remove(&key).is_some(),
        None => false,
    }
}

/// The task name encoded in an entry path, if any.
pub fn task_entity(entry_path: &str) -> Option<String> {
    TASK_RE
        .captures(entry_path)
        .map(|caps| caps[1].to_string())
}

/// Ensure the side-car carries a TaskName matching the entry path. Returns
/// whether the document changed.
pub fn ensure_task_name(doc: &mut Value, task: &str) -> bool {
    match doc.as_object_mut() {
        Some(map) if !map.contains_key("TaskName") => {
            map.insert("TaskName".to_string(), Value::String(task.to_string()));
            true
        }
        _ => false,
    }
}
