//! The `dataset_description.json` document.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::runtime::Runtime;

pub const DEFAULT_BIDS_VERSION: &str = "1.0.1";

fn default_bids_version() -> String {
    DEFAULT_BIDS_VERSION.to_string()
}

/// Dataset-level metadata as stored in `dataset_description.json`.
///
/// Field names follow the BIDS convention; absent fields are omitted when
/// writing and unknown fields are ignored when reading.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetDescription {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "BIDSVersion", default = "default_bids_version")]
    pub bids_version: String,
    #[serde(rename = "DatasetType", default, skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<String>,
    // "Licence" matches what the store has historically written; accept the
    // conventional spelling on read as well.
    #[serde(
        rename = "Licence",
        alias = "License",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub license: Option<String>,
    #[serde(rename = "Authors", default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(
        rename = "Acknowledgements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub acknowledgements: Option<String>,
    #[serde(
        rename = "HowToAcknowledge",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub how_to_acknowledge: Option<String>,
    #[serde(rename = "Funding", default, skip_serializing_if = "Vec::is_empty")]
    pub funding: Vec<String>,
    #[serde(
        rename = "EthicsApprovals",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ethics_approvals: Vec<String>,
    #[serde(
        rename = "ReferencesAndLinks",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub references: Vec<String>,
    #[serde(rename = "DatasetDOI", default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(rename = "GeneratedBy", default, skip_serializing_if = "Vec::is_empty")]
    pub generated_by: Vec<GeneratedBy>,
    #[serde(
        rename = "SourceDatasets",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sources: Vec<SourceDataset>,
}

impl Default for DatasetDescription {
    fn default() -> Self {
        DatasetDescription {
            name: None,
            bids_version: default_bids_version(),
            dataset_type: None,
            license: None,
            authors: vec![],
            acknowledgements: None,
            how_to_acknowledge: None,
            funding: vec![],
            ethics_approvals: vec![],
            references: vec![],
            doi: None,
            generated_by: vec![],
            sources: vec![],
        }
    }
}

/// Provenance of a pipeline that generated (part of) the dataset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneratedBy {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "CodeURL", default, skip_serializing_if = "Option::is_none")]
    pub code_url: Option<String>,
    #[serde(rename = "Container", default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Container {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<String>,
    #[serde(rename = "Tag", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "URI", default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceDataset {
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "DOI", default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DatasetDescription {
    #[tracing::instrument(skip(runtime, path))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        let content = runtime.read_to_string(path)?;
        let description: DatasetDescription = serde_json::from_str(&content)?;
        Ok(description)
    }

    #[tracing::instrument(skip(self, runtime, path))]
    pub fn save<R: Runtime>(&self, runtime: &R, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        runtime.write(path, content.as_bytes())?;
        Ok(())
    }
}
