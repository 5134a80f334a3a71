//! Dataset model: metadata documents and the row hierarchy.

mod description;
mod participants;
mod tree;

pub use description::{Container, DatasetDescription, GeneratedBy, SourceDataset};
pub use participants::{GROUP_COLUMN, ID_COLUMN, Participants};
pub use tree::{DataEntry, DataRow, DataTree, EntryKind};

use std::path::{Path, PathBuf};

pub const DESCRIPTION_FNAME: &str = "dataset_description.json";
pub const PARTICIPANTS_FNAME: &str = "participants.tsv";
pub const README_FNAME: &str = "README";
pub const DERIVATIVES_DIR: &str = "derivatives";

/// Row hierarchy of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// One row per subject.
    Subject,
    /// One row per subject/session pair.
    Session,
}

/// A BIDS dataset rooted at a directory on the file system.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub root: PathBuf,
    pub hierarchy: Hierarchy,
    pub description: DatasetDescription,
    pub participants: Participants,
    pub readme: Option<String>,
}

impl Dataset {
    pub fn new(root: &Path, hierarchy: Hierarchy) -> Self {
        Dataset {
            root: root.to_path_buf(),
            hierarchy,
            description: DatasetDescription::default(),
            participants: Participants::default(),
            readme: None,
        }
    }

    pub fn is_multi_session(&self) -> bool {
        self.hierarchy == Hierarchy::Session
    }

    pub fn description_path(&self) -> PathBuf {
        self.root.join(DESCRIPTION_FNAME)
    }

    pub fn participants_path(&self) -> PathBuf {
        self.root.join(PARTICIPANTS_FNAME)
    }

    pub fn readme_path(&self) -> PathBuf {
        self.root.join(README_FNAME)
    }
}
