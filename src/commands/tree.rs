use anyhow::Result;
use log::debug;
use std::path::Path;

use crate::dataset::EntryKind;
use crate::runtime::Runtime;
use crate::store::Bids;

/// Print the data tree of a dataset: its rows and their discovered entries
#[tracing::instrument(skip(runtime, root))]
pub fn tree<R: Runtime>(runtime: R, root: &Path) -> Result<()> {
    let store = Bids::new();
    let dataset = store.load_dataset(&runtime, root)?;
    debug!(
        "Loaded dataset at {} ({} participants)",
        root.display(),
        dataset.participants.len()
    );

    let mut tree = store.populate_tree(&runtime, &dataset)?;
    if tree.rows.is_empty() {
        println!("(no rows)");
        return Ok(());
    }

    for row in &mut tree.rows {
        store.populate_row(&runtime, &dataset, row)?;
        match &row.group {
            Some(group) => println!("{} (group: {})", row.id(), group),
            None => println!("{}", row.id()),
        }
        for entry in &row.entries {
            let kind = match entry.kind {
                EntryKind::FileSet => "fileset",
                EntryKind::Field => "field",
            };
            println!("  {} [{}] -> {}", entry.path, kind, entry.uri);
        }
        if row.entries.is_empty() {
            println!("  (empty)");
        }
    }
    Ok(())
}
