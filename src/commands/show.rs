use anyhow::Result;
use log::debug;
use std::path::Path;

use crate::runtime::Runtime;
use crate::store::Bids;

/// Show dataset metadata and the participants table
#[tracing::instrument(skip(runtime, root))]
pub fn show<R: Runtime>(runtime: R, root: &Path) -> Result<()> {
    let store = Bids::new();
    let dataset = store.load_dataset(&runtime, root)?;
    debug!("Loaded dataset at {}", root.display());

    println!("Dataset: {}", root.display());
    if let Some(name) = &dataset.description.name {
        println!("Name: {name}");
    }
    println!("BIDS version: {}", dataset.description.bids_version);
    if let Some(dataset_type) = &dataset.description.dataset_type {
        println!("Type: {dataset_type}");
    }
    if let Some(license) = &dataset.description.license {
        println!("License: {license}");
    }
    if !dataset.description.authors.is_empty() {
        println!("Authors: {}", dataset.description.authors.join(", "));
    }
    println!(
        "Hierarchy: {}",
        if dataset.is_multi_session() {
            "subject/session"
        } else {
            "subject"
        }
    );

    if !dataset.description.generated_by.is_empty() {
        println!("\nGenerated by:");
        for generator in &dataset.description.generated_by {
            match &generator.description {
                Some(description) => println!("  {} ({})", generator.name, description),
                None => println!("  {}", generator.name),
            }
        }
    }

    println!("\nParticipants ({}):", dataset.participants.len());
    for id in dataset.participants.ids() {
        match dataset.participants.group(id) {
            Some(group) => println!("  {id} (group: {group})"),
            None => println!("  {id}"),
        }
    }
    if dataset.participants.is_empty() {
        println!("  (none)");
    }

    if let Some(readme) = &dataset.readme {
        println!("\nREADME:\n{readme}");
    }
    Ok(())
}
