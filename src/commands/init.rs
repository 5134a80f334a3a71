use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::debug;
use std::path::Path;

use crate::runtime::Runtime;
use crate::store::Bids;

/// Create an empty BIDS dataset
#[tracing::instrument(skip(runtime, root, subjects, sessions, name, authors, groups))]
pub fn init<R: Runtime>(
    runtime: R,
    root: &Path,
    subjects: &[String],
    sessions: &[String],
    name: Option<&str>,
    authors: &[String],
    groups: &[String],
) -> Result<()> {
    debug!("Creating empty dataset at {}", root.display());
    let groups = parse_groups(groups)?;
    if subjects.is_empty() {
        bail!("At least one --subject is required");
    }

    let store = Bids::new();
    let dataset =
        store.create_empty_dataset(&runtime, root, subjects, sessions, name, authors, &groups)?;

    println!("Created BIDS dataset at {}", root.display());
    println!("Participants: {}", dataset.participants.len());
    if dataset.is_multi_session() {
        println!("Sessions per participant: {}", sessions.len());
    }
    Ok(())
}

/// Parse repeated `<subject>=<group>` assignments.
fn parse_groups(groups: &[String]) -> Result<IndexMap<String, String>> {
    let mut parsed = IndexMap::new();
    for assignment in groups {
        let (subject, group) = assignment.split_once('=').with_context(|| {
            format!("Group assignment '{assignment}' should be of the form <subject>=<group>")
        })?;
        if subject.is_empty() || group.is_empty() {
            bail!("Group assignment '{assignment}' should be of the form <subject>=<group>");
        }
        parsed.insert(subject.to_string(), group.to_string());
    }
    Ok(parsed)
}
