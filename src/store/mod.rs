//! The BIDS file-system store.
//!
//! Reads and writes datasets laid out on disk according to the BIDS
//! convention: `sub-*[/ses-*]` row directories holding modality
//! sub-directories, dataset-level metadata in `participants.tsv` and
//! `dataset_description.json`, and derived data under
//! `derivatives/<pipeline>/`.

mod sidecar;

pub use sidecar::JsonEdit;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::dataset::{
    DERIVATIVES_DIR, DataEntry, DataRow, DataTree, Dataset, DatasetDescription, EntryKind,
    GeneratedBy, Hierarchy, Participants,
};
use crate::entity;
use crate::manifest;
use crate::runtime::Runtime;

pub const FIELDS_FNAME: &str = "__fields__.json";
pub const FIELDS_PROV_FNAME: &str = "__fields_provenance__.json";
pub const PROV_SUFFIX: &str = "provenance";

/// Store for working with data organized on the file-system in BIDS format.
#[derive(Debug, Clone, Default)]
pub struct Bids {
    /// Side-car edits applied as file sets are written to the store, to
    /// correct metadata the converters got wrong.
    pub json_edits: Vec<JsonEdit>,
}

impl Bids {
    pub fn new() -> Self {
        Bids::default()
    }

    pub fn with_edits(json_edits: Vec<JsonEdit>) -> Self {
        Bids { json_edits }
    }

    /// Load the dataset rooted at `root`, detecting whether it is
    /// multi-session from the directory layout.
    #[tracing::instrument(skip(self, runtime, root))]
    pub fn load_dataset<R: Runtime>(&self, runtime: &R, root: &Path) -> Result<Dataset> {
        if !runtime.is_dir(root) {
            bail!("No BIDS dataset found at '{}'", root.display());
        }
        let mut dataset = Dataset::new(root, Hierarchy::Subject);

        let participants_path = dataset.participants_path();
        if runtime.exists(&participants_path) {
            let content = runtime.read_to_string(&participants_path)?;
            dataset.participants = Participants::parse(&content)?;
        }

        let description_path = dataset.description_path();
        if runtime.exists(&description_path) {
            dataset.description = DatasetDescription::load(runtime, &description_path)
                .with_context(|| format!("Failed to parse {}", description_path.display()))?;
        }

        let readme_path = dataset.readme_path();
        if runtime.exists(&readme_path) {
            dataset.readme = Some(runtime.read_to_string(&readme_path)?);
        }

        if self.detect_sessions(runtime, &dataset) {
            dataset.hierarchy = Hierarchy::Session;
        }
        Ok(dataset)
    }

    /// Whether any subject directory contains `ses-*` sub-directories.
    fn detect_sessions<R: Runtime>(&self, runtime: &R, dataset: &Dataset) -> bool {
        for subject_id in dataset.participants.ids() {
            let subject_dir = dataset.root.join(entity::normalize_subject_id(subject_id));
            let Ok(entries) = runtime.read_dir(&subject_dir) else {
                continue;
            };
            for entry in entries {
                if runtime.is_dir(&entry) && file_name(&entry).starts_with("ses-") {
                    return true;
                }
            }
        }
        false
    }

    /// Build the data tree from the participants table.
    ///
    /// A dataset without participants yields an empty tree.
    #[tracing::instrument(skip(self, runtime, dataset))]
    pub fn populate_tree<R: Runtime>(&self, runtime: &R, dataset: &Dataset) -> Result<DataTree> {
        let mut tree = DataTree::default();
        for subject_id in dataset.participants.ids() {
            let group = dataset.participants.group(subject_id);
            if dataset.is_multi_session() {
                let subject_dir = dataset.root.join(entity::normalize_subject_id(subject_id));
                for entry in runtime.read_dir(&subject_dir)? {
                    let name = file_name(&entry);
                    if runtime.is_dir(&entry) && name.starts_with("ses-") {
                        tree.rows
                            .push(DataRow::new(subject_id, Some(name.as_str()), group));
                    }
                }
            } else {
                tree.rows.push(DataRow::new(subject_id, None, group));
            }
        }
        debug!("Populated tree with {} rows", tree.rows.len());
        Ok(tree)
    }

    /// Discover the entries of a row from its modality sub-directories and
    /// any matching derivative directories.
    #[tracing::instrument(skip(self, runtime, dataset, row), fields(row = %row.id()))]
    pub fn populate_row<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        row: &mut DataRow,
    ) -> Result<()> {
        let row_rel = row.relative_path();
        let row_dir = dataset.root.join(&row_rel);
        if !runtime.exists(&row_dir) {
            debug!("Row directory {} does not exist, skipping", row_dir.display());
            return Ok(());
        }

        for modality_dir in runtime.read_dir(&row_dir)? {
            let modality = file_name(&modality_dir);
            if !runtime.is_dir(&modality_dir) || modality.starts_with('.') {
                continue;
            }
            for fspath in runtime.read_dir(&modality_dir)? {
                let fname = file_name(&fspath);
                if fname.starts_with('.') || fname.ends_with(&format!(".{PROV_SUFFIX}")) {
                    continue;
                }
                let rel = Path::new(&modality).join(&fname);
                let (entry_path, ext) = entity::fs_to_entry_path(&rel)?;
                row.entries.push(DataEntry {
                    path: join_ext(&entry_path, &ext),
                    uri: to_uri(&row_rel.join(rel)),
                    kind: EntryKind::FileSet,
                });
            }
        }

        let deriv_dir = dataset.root.join(DERIVATIVES_DIR);
        if runtime.exists(&deriv_dir) {
            for pipeline_dir in runtime.read_dir(&deriv_dir)? {
                let pipeline = file_name(&pipeline_dir);
                if !runtime.is_dir(&pipeline_dir) || pipeline.starts_with('.') {
                    continue;
                }
                let deriv_row_dir = pipeline_dir.join(&row_rel);
                if !runtime.exists(&deriv_row_dir) {
                    continue;
                }
                self.populate_derivatives(runtime, dataset, row, &pipeline, &deriv_row_dir)?;
            }
        }
        Ok(())
    }

    fn populate_derivatives<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        row: &mut DataRow,
        pipeline: &str,
        deriv_row_dir: &Path,
    ) -> Result<()> {
        for fspath in runtime.read_dir(deriv_row_dir)? {
            let fname = file_name(&fspath);
            if fname.starts_with('.')
                || fname == FIELDS_PROV_FNAME
                || fname.ends_with(&format!(".{PROV_SUFFIX}"))
            {
                continue;
            }
            let uri = to_uri(fspath.strip_prefix(&dataset.root).with_context(|| {
                format!("Derivative path {} is outside the dataset", fspath.display())
            })?);
            if fname == FIELDS_FNAME {
                // Each key of the fields document is its own entry
                let doc: Value = serde_json::from_str(&runtime.read_to_string(&fspath)?)
                    .with_context(|| format!("Failed to parse {}", fspath.display()))?;
                if let Some(map) = doc.as_object() {
                    for key in map.keys() {
                        row.entries.push(DataEntry {
                            path: format!("{DERIVATIVES_DIR}/{pipeline}/{key}"),
                            uri: format!("{uri}@{key}"),
                            kind: EntryKind::Field,
                        });
                    }
                }
            } else if runtime.is_dir(&fspath) {
                row.entries.push(DataEntry {
                    path: format!("{DERIVATIVES_DIR}/{pipeline}/{fname}"),
                    uri,
                    kind: EntryKind::FileSet,
                });
            } else {
                let (entry_path, ext) = entity::fs_to_entry_path(Path::new(&fname))?;
                row.entries.push(DataEntry {
                    path: join_ext(
                        &format!("{DERIVATIVES_DIR}/{pipeline}/{entry_path}"),
                        &ext,
                    ),
                    uri,
                    kind: EntryKind::FileSet,
                });
            }
        }
        Ok(())
    }

    /// Dataset-relative URI where a derived file set for `row` is stored.
    ///
    /// The first part of the entry path is the pipeline name, which sits
    /// above the row directory: `derivatives/<pipeline>/sub-XX[/ses-YY]/...`.
    pub fn fileset_uri(&self, entry_path: &str, ext: &str, row: &DataRow) -> Result<String> {
        let rel = entity::entry_to_fs_path(
            Some(entry_path),
            &row.subject_id,
            row.session_id.as_deref(),
            ext,
        )?;
        let mut components: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let row_depth = if row.session_id.is_some() { 2 } else { 1 };
        let pipeline = components.remove(row_depth);
        Ok(format!(
            "{DERIVATIVES_DIR}/{pipeline}/{}",
            components.join("/")
        ))
    }

    /// Dataset-relative URI of a derived field, ending with `@<field-name>`
    /// into the row's fields document.
    pub fn field_uri(&self, path: &str, row: &DataRow) -> Result<String> {
        let Some((pipeline, field_name)) = path.split_once('/') else {
            bail!(
                "Field path '{path}', should contain two sections delimited by '/', \
                 the first is the pipeline name that generated the field, \
                 and the second the field name"
            );
        };
        if field_name.is_empty() || field_name.contains('/') {
            bail!(
                "Field path '{path}', should contain two sections delimited by '/', \
                 the first is the pipeline name that generated the field, \
                 and the second the field name"
            );
        }
        let row_rel = to_uri(&row.relative_path());
        Ok(format!(
            "{DERIVATIVES_DIR}/{pipeline}/{row_rel}/{FIELDS_FNAME}@{field_name}"
        ))
    }

    /// Absolute path of a file-set entry.
    pub fn fileset_path(&self, dataset: &Dataset, entry: &DataEntry) -> PathBuf {
        dataset.root.join(&entry.uri)
    }

    /// Copy source files into the store as a derived file set.
    ///
    /// Each source keeps its own extension against the entry's file stem.
    /// When one of the copied files is a `.json` side-car, side-car edits
    /// (TaskName injection and any configured [`JsonEdit`]s) are applied.
    #[tracing::instrument(skip(self, runtime, dataset, row, sources), fields(row = %row.id()))]
    pub fn put_fileset<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        row: &DataRow,
        entry_path: &str,
        sources: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let stem_uri = self.fileset_uri(entry_path, "", row)?;
        let stem_path = dataset.root.join(&stem_uri);
        if let Some(parent) = stem_path.parent() {
            runtime.create_dir_all(parent)?;
        }

        let mut copied = Vec::with_capacity(sources.len());
        for source in sources {
            let ext = extension_of(source);
            let dest = if ext.is_empty() {
                stem_path.clone()
            } else {
                PathBuf::from(format!("{}.{ext}", stem_path.display()))
            };
            runtime.copy(source, &dest)?;
            copied.push(dest);
        }

        if let Some(side_car) = copied.iter().find(|p| extension_of(p) == "json") {
            self.edit_sidecar(runtime, side_car, entry_path, &self.row_columns(row))?;
        }
        Ok(copied)
    }

    /// File paths of the row's file-set entries keyed by entry path, used
    /// for `{column}` substitution in side-car edits. Paths are relative to
    /// the row directory, as side-car references like IntendedFor expect.
    fn row_columns(&self, row: &DataRow) -> IndexMap<String, String> {
        let prefix = format!("{}/", to_uri(&row.relative_path()));
        row.entries
            .iter()
            .filter(|e| e.kind == EntryKind::FileSet)
            .map(|e| {
                let path = e.uri.strip_prefix(&prefix).unwrap_or(&e.uri);
                (e.path.clone(), path.to_string())
            })
            .collect()
    }

    /// Apply TaskName injection and configured edits to a side-car file.
    /// The document is only loaded and rewritten when an edit applies.
    fn edit_sidecar<R: Runtime>(
        &self,
        runtime: &R,
        side_car: &Path,
        entry_path: &str,
        columns: &IndexMap<String, String>,
    ) -> Result<()> {
        let mut doc: Option<Value> = None;
        let mut changed = false;

        let mut load = |runtime: &R, doc: &mut Option<Value>| -> Result<()> {
            if doc.is_none() {
                let content = runtime.read_to_string(side_car)?;
                *doc = Some(serde_json::from_str(&content).with_context(|| {
                    format!("Failed to parse side-car {}", side_car.display())
                })?);
            }
            Ok(())
        };

        if let Some(task) = sidecar::task_entity(entry_path) {
            load(runtime, &mut doc)?;
            if let Some(doc) = doc.as_mut() {
                changed |= sidecar::ensure_task_name(doc, &task);
            }
        }
        for edit in &self.json_edits {
            if edit.matches(entry_path) {
                load(runtime, &mut doc)?;
                if let Some(doc) = doc.as_mut() {
                    changed |= edit.apply(doc, columns)?;
                }
            }
        }
        if changed {
            if let Some(doc) = doc {
                runtime.write(side_car, serde_json::to_string_pretty(&doc)?.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Read a field value from the row's fields document.
    pub fn get_field<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        entry: &DataEntry,
    ) -> Result<Value> {
        let (fspath, key) = self.fields_path_and_key(dataset, entry)?;
        let doc: Value = serde_json::from_str(&runtime.read_to_string(&fspath)?)
            .with_context(|| format!("Failed to parse {}", fspath.display()))?;
        doc.get(&key)
            .cloned()
            .with_context(|| format!("No field '{key}' in {}", fspath.display()))
    }

    /// Insert or update a field in the row's fields document.
    #[tracing::instrument(skip(self, runtime, dataset, row, value), fields(row = %row.id()))]
    pub fn put_field<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        row: &DataRow,
        path: &str,
        value: Value,
    ) -> Result<()> {
        let uri = self.field_uri(path, row)?;
        let (rel, key) = split_field_uri(&uri)?;
        let fspath = dataset.root.join(rel);
        self.update_json(runtime, &fspath, &key, value)
    }

    pub fn get_fileset_provenance<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        entry: &DataEntry,
    ) -> Result<Value> {
        let fspath = provenance_path(&dataset.root.join(&entry.uri));
        serde_json::from_str(&runtime.read_to_string(&fspath)?)
            .with_context(|| format!("Failed to parse provenance {}", fspath.display()))
    }

    pub fn put_fileset_provenance<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        entry: &DataEntry,
        provenance: &Value,
    ) -> Result<()> {
        let fspath = provenance_path(&dataset.root.join(&entry.uri));
        runtime.write(&fspath, serde_json::to_string_pretty(provenance)?.as_bytes())
    }

    pub fn get_field_provenance<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        entry: &DataEntry,
    ) -> Result<Value> {
        let (fields_path, key) = self.fields_path_and_key(dataset, entry)?;
        let fspath = fields_path
            .parent()
            .map(|p| p.join(FIELDS_PROV_FNAME))
            .context("fields document has no parent directory")?;
        let doc: Value = serde_json::from_str(&runtime.read_to_string(&fspath)?)
            .with_context(|| format!("Failed to parse provenance {}", fspath.display()))?;
        doc.get(&key)
            .cloned()
            .with_context(|| format!("No provenance for field '{key}' in {}", fspath.display()))
    }

    pub fn put_field_provenance<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        entry: &DataEntry,
        provenance: Value,
    ) -> Result<()> {
        let (fields_path, key) = self.fields_path_and_key(dataset, entry)?;
        let fspath = fields_path
            .parent()
            .map(|p| p.join(FIELDS_PROV_FNAME))
            .context("fields document has no parent directory")?;
        self.update_json(runtime, &fspath, &key, provenance)
    }

    fn fields_path_and_key(
        &self,
        dataset: &Dataset,
        entry: &DataEntry,
    ) -> Result<(PathBuf, String)> {
        if entry.kind != EntryKind::Field {
            bail!("Entry '{}' is not a field", entry.path);
        }
        let (rel, key) = split_field_uri(&entry.uri)?;
        Ok((dataset.root.join(rel), key))
    }

    /// Read-modify-write a single key of a JSON document, creating the
    /// document (and its directory) if needed.
    fn update_json<R: Runtime>(
        &self,
        runtime: &R,
        fspath: &Path,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let mut doc: Value = if runtime.exists(fspath) {
            serde_json::from_str(&runtime.read_to_string(fspath)?)
                .with_context(|| format!("Failed to parse {}", fspath.display()))?
        } else {
            if let Some(parent) = fspath.parent() {
                runtime.create_dir_all(parent)?;
            }
            Value::Object(Default::default())
        };
        let map = doc
            .as_object_mut()
            .with_context(|| format!("{} is not a JSON object", fspath.display()))?;
        map.insert(key.to_string(), value);
        runtime.write(fspath, serde_json::to_string_pretty(&doc)?.as_bytes())
    }

    /// Create a new empty dataset with row directories for the cartesian
    /// product of subject and session IDs.
    #[tracing::instrument(skip(self, runtime, root, subject_ids, session_ids, name, authors, groups))]
    pub fn create_empty_dataset<R: Runtime>(
        &self,
        runtime: &R,
        root: &Path,
        subject_ids: &[String],
        session_ids: &[String],
        name: Option<&str>,
        authors: &[String],
        groups: &IndexMap<String, String>,
    ) -> Result<Dataset> {
        if runtime.exists(root) {
            bail!("Dataset directory '{}' already exists", root.display());
        }
        if subject_ids.is_empty() {
            bail!("At least one subject ID is required to create a dataset");
        }
        let hierarchy = if session_ids.is_empty() {
            Hierarchy::Subject
        } else {
            Hierarchy::Session
        };
        let mut dataset = Dataset::new(root, hierarchy);
        dataset.description.name = name.map(str::to_string);
        dataset.description.authors = authors.to_vec();
        dataset.description.generated_by.push(GeneratedBy {
            name: "frametree-bids".to_string(),
            description: Some(format!("frametree-bids {}", manifest::version())),
            code_url: None,
            container: None,
        });

        let columns = if groups.is_empty() {
            vec![]
        } else {
            vec![crate::dataset::GROUP_COLUMN.to_string()]
        };
        dataset.participants = Participants::new(columns);
        for subject_id in subject_ids {
            let normalized = entity::normalize_subject_id(subject_id);
            let mut fields = IndexMap::new();
            if let Some(group) = groups.get(subject_id).or_else(|| groups.get(&normalized)) {
                fields.insert(crate::dataset::GROUP_COLUMN.to_string(), group.clone());
            }
            dataset.participants.insert(&normalized, fields);

            if session_ids.is_empty() {
                let row_dir = entity::entry_to_fs_path(None, subject_id, None, "")?;
                runtime.create_dir_all(&root.join(row_dir))?;
            } else {
                for session_id in session_ids {
                    let row_dir =
                        entity::entry_to_fs_path(None, subject_id, Some(session_id.as_str()), "")?;
                    runtime.create_dir_all(&root.join(row_dir))?;
                }
            }
        }

        self.save_dataset(runtime, &dataset, true)?;
        Ok(dataset)
    }

    /// Write the dataset's metadata files.
    ///
    /// Existing metadata files are left in place (with a warning) unless
    /// `overwrite_metadata` is set.
    #[tracing::instrument(skip(self, runtime, dataset))]
    pub fn save_dataset<R: Runtime>(
        &self,
        runtime: &R,
        dataset: &Dataset,
        overwrite_metadata: bool,
    ) -> Result<()> {
        runtime.create_dir_all(&dataset.root)?;

        let participants_path = dataset.participants_path();
        if runtime.exists(&participants_path) && !overwrite_metadata {
            warn!(
                "Not attempting to overwrite existing participants table at '{}'",
                participants_path.display()
            );
        } else {
            runtime.write(&participants_path, dataset.participants.render().as_bytes())?;
        }

        let description_path = dataset.description_path();
        if runtime.exists(&description_path) && !overwrite_metadata {
            warn!(
                "Not attempting to overwrite existing BIDS dataset description at '{}'",
                description_path.display()
            );
        } else {
            dataset.description.save(runtime, &description_path)?;
        }

        if let Some(readme) = &dataset.readme {
            let readme_path = dataset.readme_path();
            if runtime.exists(&readme_path) && !overwrite_metadata {
                warn!(
                    "Not attempting to overwrite existing README at '{}'",
                    readme_path.display()
                );
            } else {
                runtime.write(&readme_path, readme.as_bytes())?;
            }
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extension after the first dot of the file name (e.g. `nii.gz`).
fn extension_of(path: &Path) -> String {
    file_name(path)
        .split_once('.')
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_default()
}

/// Render a relative path with forward slashes.
fn to_uri(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_ext(entry_path: &str, ext: &str) -> String {
    if ext.is_empty() {
        entry_path.to_string()
    } else {
        format!("{entry_path}/{ext}")
    }
}

/// Provenance side file: the file stem with a `.provenance` extension.
fn provenance_path(fspath: &Path) -> PathBuf {
    let stem = file_name(fspath)
        .split_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| file_name(fspath));
    match fspath.parent() {
        Some(parent) => parent.join(format!("{stem}.{PROV_SUFFIX}")),
        None => PathBuf::from(format!("{stem}.{PROV_SUFFIX}")),
    }
}

fn split_field_uri(uri: &str) -> Result<(&str, String)> {
    let Some((rel, key)) = uri.rsplit_once('@') else {
        bail!("Field URI '{uri}' lacks an '@<field-name>' suffix");
    };
    Ok((rel, key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn session_row() -> DataRow {
        DataRow::new("01", Some("02"), None)
    }

    #[test]
    fn test_fileset_uri() {
        let store = Bids::new();
        let uri = store
            .fileset_uri("freesurfer/recon-all", "zip", &session_row())
            .unwrap();
        assert_eq!(
            uri,
            "derivatives/freesurfer/sub-01/ses-02/sub-01_ses-02_recon-all.zip"
        );
    }

    #[test]
    fn test_fileset_uri_single_part_fails() {
        let store = Bids::new();
        assert!(store.fileset_uri("recon-all", "zip", &session_row()).is_err());
    }

    #[test]
    fn test_field_uri() {
        let store = Bids::new();
        let uri = store.field_uri("qc/snr", &session_row()).unwrap();
        assert_eq!(uri, "derivatives/qc/sub-01/ses-02/__fields__.json@snr");
    }

    #[test]
    fn test_field_uri_requires_two_sections() {
        let store = Bids::new();
        let result = store.field_uri("snr", &session_row());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("two sections delimited by '/'")
        );
        assert!(store.field_uri("qc/sub/snr", &session_row()).is_err());
    }

    #[test]
    fn test_load_dataset_missing_root_fails() {
        let mut runtime = MockRuntime::new();
        let root = PathBuf::from("/data/missing");

        runtime
            .expect_is_dir()
            .with(eq(root.clone()))
            .returning(|_| false);

        let store = Bids::new();
        let result = store.load_dataset(&runtime, &root);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("No BIDS dataset"));
    }

    #[test]
    fn test_populate_tree_empty_participants() {
        // A dataset without participants yields an empty tree
        let runtime = MockRuntime::new();
        let dataset = Dataset::new(Path::new("/data/study"), Hierarchy::Subject);

        let store = Bids::new();
        let tree = store.populate_tree(&runtime, &dataset).unwrap();
        assert!(tree.rows.is_empty());
    }

    #[test]
    fn test_populate_tree_single_session() {
        let runtime = MockRuntime::new();
        let mut dataset = Dataset::new(Path::new("/data/study"), Hierarchy::Subject);
        dataset.participants =
            Participants::parse("participant_id\tgroup\nsub-01\tcontrol\nsub-02\t\n").unwrap();

        let store = Bids::new();
        let tree = store.populate_tree(&runtime, &dataset).unwrap();
        assert_eq!(tree.rows.len(), 2);
        assert_eq!(tree.rows[0].subject_id, "sub-01");
        assert_eq!(tree.rows[0].group.as_deref(), Some("control"));
        // Empty group values are not carried onto the row
        assert_eq!(tree.rows[1].group, None);
    }

    #[test]
    fn test_populate_tree_multi_session() {
        let mut runtime = MockRuntime::new();
        let root = PathBuf::from("/data/study");
        let mut dataset = Dataset::new(&root, Hierarchy::Session);
        dataset.participants = Participants::parse("participant_id\nsub-01\n").unwrap();

        // Scan subject dir: two sessions plus a stray file to be ignored
        runtime
            .expect_read_dir()
            .with(eq(root.join("sub-01")))
            .returning(|p| {
                Ok(vec![
                    p.join("ses-01"),
                    p.join("ses-02"),
                    p.join("notes.txt"),
                ])
            });
        runtime
            .expect_is_dir()
            .returning(|p| !p.ends_with("notes.txt"));

        let store = Bids::new();
        let tree = store.populate_tree(&runtime, &dataset).unwrap();
        assert_eq!(tree.rows.len(), 2);
        assert_eq!(tree.rows[0].id(), "sub-01/ses-01");
        assert_eq!(tree.rows[1].id(), "sub-01/ses-02");
    }

    #[test]
    fn test_populate_row_discovers_entries() {
        // Real file-system round trip through create + scan
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let store = Bids::new();

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &["01".into()],
                Some("A study"),
                &[],
                &IndexMap::new(),
            )
            .unwrap();

        // Plant raw data and derivatives
        let anat = root.join("sub-01/ses-01/anat");
        std::fs::create_dir_all(&anat).unwrap();
        std::fs::write(anat.join("sub-01_ses-01_T1w.nii.gz"), b"nifti").unwrap();
        std::fs::write(anat.join("sub-01_ses-01_T1w.json"), b"{}").unwrap();

        let deriv = root.join("derivatives/qc/sub-01/ses-01");
        std::fs::create_dir_all(&deriv).unwrap();
        std::fs::write(deriv.join("sub-01_ses-01_report.txt"), b"ok").unwrap();
        std::fs::write(deriv.join(FIELDS_FNAME), b"{\"snr\": 42.0}").unwrap();
        std::fs::write(deriv.join("sub-01_ses-01_report.provenance"), b"{}").unwrap();

        let tree = store.populate_tree(&runtime, &dataset).unwrap();
        assert_eq!(tree.rows.len(), 1);
        let mut row = tree.rows[0].clone();
        store.populate_row(&runtime, &dataset, &mut row).unwrap();

        let paths: Vec<&str> = row.entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"anat/T1w/nii.gz"));
        assert!(paths.contains(&"anat/T1w/json"));
        assert!(paths.contains(&"derivatives/qc/report/txt"));
        assert!(paths.contains(&"derivatives/qc/snr"));
        // Provenance files are not entries
        assert_eq!(row.entries.len(), 4);

        let field = row.entry("derivatives/qc/snr").unwrap();
        assert_eq!(field.kind, EntryKind::Field);
        let value = store.get_field(&runtime, &dataset, field).unwrap();
        assert_eq!(value, json!(42.0));

        let scan = row.entry("anat/T1w/nii.gz").unwrap();
        assert_eq!(
            store.fileset_path(&dataset, scan),
            root.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz")
        );
    }

    #[test]
    fn test_put_fileset_applies_task_name() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let store = Bids::new();

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &[],
                None,
                &[],
                &IndexMap::new(),
            )
            .unwrap();
        let row = DataRow::new("01", None, None);

        let src_dir = dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::write(src_dir.join("bold.nii.gz"), b"nifti").unwrap();
        std::fs::write(src_dir.join("bold.json"), b"{\"EchoTime\": 0.03}").unwrap();

        let copied = store
            .put_fileset(
                &runtime,
                &dataset,
                &row,
                "mriqc/bold/task=rest",
                &[src_dir.join("bold.nii.gz"), src_dir.join("bold.json")],
            )
            .unwrap();
        assert_eq!(copied.len(), 2);
        let side_car = root.join("derivatives/mriqc/sub-01/sub-01_task-rest_bold.json");
        assert!(side_car.exists());

        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&side_car).unwrap()).unwrap();
        assert_eq!(doc["TaskName"], json!("rest"));
        assert_eq!(doc["EchoTime"], json!(0.03));
    }

    #[test]
    fn test_put_fileset_applies_configured_edits() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let edit = JsonEdit::set(r"mriqc/bold.*", "/RepetitionTime", "2.5").unwrap();
        let store = Bids::with_edits(vec![edit]);

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &[],
                None,
                &[],
                &IndexMap::new(),
            )
            .unwrap();
        let row = DataRow::new("01", None, None);

        let src = dir.path().join("bold.json");
        std::fs::write(&src, b"{}").unwrap();
        store
            .put_fileset(&runtime, &dataset, &row, "mriqc/bold", &[src])
            .unwrap();

        let side_car = root.join("derivatives/mriqc/sub-01/sub-01_bold.json");
        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&side_car).unwrap()).unwrap();
        assert_eq!(doc["RepetitionTime"], json!(2.5));
    }

    #[test]
    fn test_put_fileset_substitutes_row_relative_paths() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let edit =
            JsonEdit::set(r"fmap/.*", "/IntendedFor", "\"{func/bold/nii.gz}\"").unwrap();
        let store = Bids::with_edits(vec![edit]);

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &[],
                None,
                &[],
                &IndexMap::new(),
            )
            .unwrap();

        // Plant a scan so the row has a column to reference
        let func = root.join("sub-01/func");
        std::fs::create_dir_all(&func).unwrap();
        std::fs::write(func.join("sub-01_bold.nii.gz"), b"nifti").unwrap();

        let tree = store.populate_tree(&runtime, &dataset).unwrap();
        let mut row = tree.rows[0].clone();
        store.populate_row(&runtime, &dataset, &mut row).unwrap();

        let src = dir.path().join("phasediff.json");
        std::fs::write(&src, b"{}").unwrap();
        store
            .put_fileset(&runtime, &dataset, &row, "fmap/phasediff", &[src])
            .unwrap();

        let side_car = root.join("derivatives/fmap/sub-01/sub-01_phasediff.json");
        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&side_car).unwrap()).unwrap();
        // Substituted path is relative to the row directory, not the root
        assert_eq!(doc["IntendedFor"], json!("func/sub-01_bold.nii.gz"));
    }

    #[test]
    fn test_put_and_get_field() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let store = Bids::new();

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &[],
                None,
                &[],
                &IndexMap::new(),
            )
            .unwrap();
        let row = DataRow::new("01", None, None);

        store
            .put_field(&runtime, &dataset, &row, "qc/snr", json!(12.5))
            .unwrap();
        store
            .put_field(&runtime, &dataset, &row, "qc/motion", json!("low"))
            .unwrap();

        let entry = DataEntry {
            path: "derivatives/qc/snr".into(),
            uri: store.field_uri("qc/snr", &row).unwrap(),
            kind: EntryKind::Field,
        };
        assert_eq!(store.get_field(&runtime, &dataset, &entry).unwrap(), json!(12.5));

        // Unknown field errors
        let missing = DataEntry {
            path: "derivatives/qc/missing".into(),
            uri: store.field_uri("qc/missing", &row).unwrap(),
            kind: EntryKind::Field,
        };
        assert!(store.get_field(&runtime, &dataset, &missing).is_err());
    }

    #[test]
    fn test_provenance_round_trip() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let store = Bids::new();

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &[],
                None,
                &[],
                &IndexMap::new(),
            )
            .unwrap();
        let row = DataRow::new("01", None, None);

        // File-set provenance
        let src = dir.path().join("report.txt");
        std::fs::write(&src, b"ok").unwrap();
        let copied = store
            .put_fileset(&runtime, &dataset, &row, "qc/report", &[src])
            .unwrap();
        let entry = DataEntry {
            path: "derivatives/qc/report/txt".into(),
            uri: to_uri(copied[0].strip_prefix(&root).unwrap()),
            kind: EntryKind::FileSet,
        };
        let prov = json!({"task": "qc", "version": "1.0"});
        store
            .put_fileset_provenance(&runtime, &dataset, &entry, &prov)
            .unwrap();
        assert_eq!(
            store.get_fileset_provenance(&runtime, &dataset, &entry).unwrap(),
            prov
        );

        // Field provenance
        store
            .put_field(&runtime, &dataset, &row, "qc/snr", json!(1.0))
            .unwrap();
        let field_entry = DataEntry {
            path: "derivatives/qc/snr".into(),
            uri: store.field_uri("qc/snr", &row).unwrap(),
            kind: EntryKind::Field,
        };
        store
            .put_field_provenance(&runtime, &dataset, &field_entry, prov.clone())
            .unwrap();
        assert_eq!(
            store
                .get_field_provenance(&runtime, &dataset, &field_entry)
                .unwrap(),
            prov
        );
    }

    #[test]
    fn test_create_empty_dataset_layout() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let store = Bids::new();

        let mut groups = IndexMap::new();
        groups.insert("01".to_string(), "control".to_string());
        groups.insert("02".to_string(), "patient".to_string());

        let dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into(), "02".into()],
                &["01".into(), "02".into()],
                Some("A study"),
                &["Some One".into()],
                &groups,
            )
            .unwrap();

        assert!(dataset.is_multi_session());
        for sub in ["sub-01", "sub-02"] {
            for ses in ["ses-01", "ses-02"] {
                assert!(root.join(sub).join(ses).is_dir());
            }
        }
        let participants =
            Participants::parse(&std::fs::read_to_string(root.join("participants.tsv")).unwrap())
                .unwrap();
        assert_eq!(participants.group("sub-01"), Some("control"));
        assert_eq!(participants.group("sub-02"), Some("patient"));

        let description: Value = serde_json::from_str(
            &std::fs::read_to_string(root.join("dataset_description.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(description["Name"], json!("A study"));
        assert_eq!(description["GeneratedBy"][0]["Name"], json!("frametree-bids"));

        // Reloading detects the session hierarchy
        let reloaded = store.load_dataset(&runtime, &root).unwrap();
        assert!(reloaded.is_multi_session());
        assert_eq!(reloaded.description.name.as_deref(), Some("A study"));
    }

    #[test]
    fn test_create_empty_dataset_existing_root_fails() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let store = Bids::new();

        let result = store.create_empty_dataset(
            &runtime,
            dir.path(),
            &["01".into()],
            &[],
            None,
            &[],
            &IndexMap::new(),
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[test]
    fn test_save_dataset_preserves_existing_metadata() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let root = dir.path().join("study");
        let store = Bids::new();

        let mut dataset = store
            .create_empty_dataset(
                &runtime,
                &root,
                &["01".into()],
                &[],
                Some("original"),
                &[],
                &IndexMap::new(),
            )
            .unwrap();

        dataset.description.name = Some("changed".into());
        store.save_dataset(&runtime, &dataset, false).unwrap();
        let description: Value = serde_json::from_str(
            &std::fs::read_to_string(root.join("dataset_description.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(description["Name"], json!("original"));

        store.save_dataset(&runtime, &dataset, true).unwrap();
        let description: Value = serde_json::from_str(
            &std::fs::read_to_string(root.join("dataset_description.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(description["Name"], json!("changed"));
    }

    #[test]
    fn test_provenance_path_replaces_extension() {
        assert_eq!(
            provenance_path(Path::new("derivatives/qc/sub-01/sub-01_bold.nii.gz")),
            PathBuf::from("derivatives/qc/sub-01/sub-01_bold.provenance")
        );
    }
}
