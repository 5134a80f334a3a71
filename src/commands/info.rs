use anyhow::Result;

use crate::manifest::{self, ExtensionManifest};

/// Print the bundled extension manifest
#[tracing::instrument(skip(extras))]
pub fn info(extras: &[String], resolve: bool) -> Result<()> {
    let manifest = ExtensionManifest::bundled()?;

    println!("{} {}", manifest.name, manifest::version());
    println!("{}", manifest.description);
    println!("License: {}", manifest.license);
    println!("Authors: {}", manifest.authors.join(", "));
    println!("Framework runtime: {}", manifest.framework_requires);

    if resolve {
        let resolved = manifest.resolve(extras)?;
        println!("\nResolved dependencies:");
        for dep in &resolved {
            println!("  {} {}", dep.name, dep.constraint);
        }
        return Ok(());
    }

    println!("\nDependencies:");
    for dep in &manifest.dependencies {
        println!("  {} {}", dep.name, dep.constraint);
    }
    for (name, deps) in &manifest.extras {
        if !extras.is_empty() && !extras.contains(name) {
            continue;
        }
        println!("\nExtra '{name}':");
        for dep in deps {
            println!("  {} {}", dep.name, dep.constraint);
        }
    }
    Ok(())
}
