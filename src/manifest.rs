//! The extension manifest: what this distribution declares to the host
//! framework.
//!
//! The manifest carries the package identity, the range of framework runtimes
//! it supports, its hard dependencies and its optional extras. Installers
//! resolve a requested set of extras against it to obtain the full dependency
//! set.

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use semver::{Comparator, Op, Version, VersionReq};
use serde::{Deserialize, Serialize};

/// The effective package version, derived from the source-control tag at
/// build time.
pub fn version() -> &'static str {
    env!("FRAMETREE_BIDS_VERSION")
}

/// A named dependency with a version constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub constraint: VersionReq,
}

impl Dependency {
    pub fn new(name: &str, constraint: &str) -> Result<Self> {
        Ok(Dependency {
            name: name.to_string(),
            constraint: VersionReq::parse(constraint)
                .with_context(|| format!("Invalid version constraint '{constraint}' for '{name}'"))?,
        })
    }

    pub fn any_version(name: &str) -> Self {
        Dependency {
            name: name.to_string(),
            constraint: VersionReq::STAR,
        }
    }
}

/// Declared contract of an extension distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    /// Range of framework runtime versions the extension supports.
    pub framework_requires: VersionReq,
    /// Dependencies required by every install.
    pub dependencies: Vec<Dependency>,
    /// Optional dependency sets, selectable by name at install time.
    pub extras: IndexMap<String, Vec<Dependency>>,
}

impl ExtensionManifest {
    /// The manifest of this distribution.
    pub fn bundled() -> Result<Self> {
        let mut extras = IndexMap::new();
        extras.insert(
            "dev".to_string(),
            vec![
                Dependency::any_version("black"),
                Dependency::any_version("pre-commit"),
                Dependency::any_version("codespell"),
                Dependency::any_version("flake8"),
            ],
        );
        extras.insert(
            "doc".to_string(),
            vec![
                Dependency::any_version("packaging"),
                Dependency::new("sphinx", ">=2.1.2")?,
                Dependency::any_version("sphinx-argparse"),
                Dependency::any_version("furo"),
                Dependency::any_version("numpydoc"),
            ],
        );
        extras.insert(
            "test".to_string(),
            vec![
                Dependency::any_version("fileformats-medimage-extras"),
                Dependency::any_version("pydra"),
                Dependency::any_version("medimages4tests"),
                Dependency::any_version("pytest"),
                Dependency::any_version("pytest-cov"),
            ],
        );
        Ok(ExtensionManifest {
            name: "frametree-bids".to_string(),
            description: "An extension of the FrameTree framework to interact with \
                          Brain Imaging Data Structure (BIDS) datasets"
                .to_string(),
            license: "CC-BY-4.0".to_string(),
            authors: vec!["Thomas G. Close <tom.g.close@gmail.com>".to_string()],
            framework_requires: VersionReq::parse(">=3.8, <3.12")
                .context("Invalid framework runtime range")?,
            dependencies: vec![
                Dependency::any_version("frametree"),
                Dependency::new("fileformats-extras", ">=0.3.3")?,
                Dependency::new("fileformats-medimage", ">=0.2.1")?,
                Dependency::new("jq", ">=1.4.0")?,
            ],
            extras,
        })
    }

    pub fn extra_names(&self) -> impl Iterator<Item = &str> {
        self.extras.keys().map(String::as_str)
    }

    /// The full dependency set for an install request: hard dependencies plus
    /// the dependencies of each requested extra.
    ///
    /// Errors on an unknown extra name and when two constraints on the same
    /// dependency admit no common version.
    pub fn resolve(&self, extras: &[String]) -> Result<Vec<Dependency>> {
        let mut resolved: Vec<Dependency> = Vec::new();
        for dep in &self.dependencies {
            merge_dependency(&mut resolved, dep)?;
        }
        for extra in extras {
            let Some(deps) = self.extras.get(extra) else {
                bail!(
                    "No extra '{extra}' in '{}' (available: {})",
                    self.name,
                    self.extras.keys().cloned().collect::<Vec<_>>().join(", ")
                );
            };
            for dep in deps {
                merge_dependency(&mut resolved, dep)?;
            }
        }
        Ok(resolved)
    }
}

/// Add a dependency to the resolved set, combining its constraint with any
/// constraint already present for the same name.
fn merge_dependency(resolved: &mut Vec<Dependency>, dep: &Dependency) -> Result<()> {
    let Some(existing) = resolved.iter_mut().find(|d| d.name == dep.name) else {
        resolved.push(dep.clone());
        return Ok(());
    };
    let mut combined = existing.constraint.clone();
    combined
        .comparators
        .extend(dep.constraint.comparators.iter().cloned());
    if !is_satisfiable(&combined) {
        bail!(
            "Conflicting constraints for '{}': '{}' and '{}' admit no common version",
            dep.name,
            existing.constraint,
            dep.constraint
        );
    }
    existing.constraint = combined;
    Ok(())
}

/// Whether some version satisfies all comparators of the requirement.
///
/// Lower-bounded comparators pin the candidate version; a requirement made
/// only of upper bounds is always satisfiable.
fn is_satisfiable(req: &VersionReq) -> bool {
    match floor_version(req) {
        Some(candidate) => req.matches(&candidate),
        None => true,
    }
}

/// The lowest version admitted by the requirement's lower-bounded
/// comparators, if it has any.
fn floor_version(req: &VersionReq) -> Option<Version> {
    req.comparators
        .iter()
        .filter_map(comparator_floor)
        .max()
}

fn comparator_floor(comparator: &Comparator) -> Option<Version> {
    match comparator.op {
        Op::Exact | Op::GreaterEq | Op::Caret | Op::Tilde | Op::Wildcard => Some(Version::new(
            comparator.major,
            comparator.minor.unwrap_or(0),
            comparator.patch.unwrap_or(0),
        )),
        // ">N.M.P" admits N.M.(P+1), ">N.M" admits N.(M+1).0, ">N" admits (N+1).0.0
        Op::Greater => Some(match (comparator.minor, comparator.patch) {
            (Some(minor), Some(patch)) => Version::new(comparator.major, minor, patch + 1),
            (Some(minor), None) => Version::new(comparator.major, minor + 1, 0),
            _ => Version::new(comparator.major + 1, 0, 0),
        }),
        Op::Less | Op::LessEq => None,
        _ => None,
    }
}
