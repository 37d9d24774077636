//! Init-data command implementation.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::info;
use uuid::Uuid;

use ducat_core::backend::{ApiRootData, CollectionData, DataTree};
use ducat_core::{ApiRoot, Collection, DiscoveryInfo, STIX_MEDIA_TYPE, TAXII_MEDIA_TYPE};

const API_ROOT: &str = "trustgroup1";

/// Execute the init-data command.
///
/// Writes a data tree with one API root and one read/write collection,
/// ready to serve via `DUCAT_SEED_FILE`.
pub fn execute(output: &Path, collection_title: &str, force: bool, quiet: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "Refusing to overwrite {}: pass --force to replace it",
            output.display()
        );
    }

    let tree = starter_tree(collection_title);
    let json = serde_json::to_string_pretty(&tree).context("Failed to serialize data tree")?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(path = %output.display(), "Wrote starter data tree");

    if quiet {
        println!("{}", output.display());
        return Ok(());
    }

    let collection = &tree.api_roots[API_ROOT].collections[0].collection;
    println!();
    println!("{}", "Starter data tree written".green().bold());
    println!();
    println!("   {} {}", "File:".dimmed(), output.display());
    println!("   {} {}", "API root:".dimmed(), API_ROOT);
    println!(
        "   {} {} ({})",
        "Collection:".dimmed(),
        collection.id,
        collection.title
    );
    println!();
    println!("Point the server at it:");
    println!(
        "   {}",
        format!("DUCAT_SEED_FILE={} ducat-server", output.display()).dimmed()
    );

    Ok(())
}

/// An empty but fully wired tree: discovery pointing at one API root
/// holding one read/write collection.
fn starter_tree(collection_title: &str) -> DataTree {
    DataTree {
        discovery: DiscoveryInfo {
            title: "Ducat TAXII Server".to_string(),
            description: Some("A TAXII 2.1 threat intelligence sharing server".to_string()),
            contact: Some("admin@example.com".to_string()),
            default: Some(API_ROOT.to_string()),
            api_roots: vec![API_ROOT.to_string()],
        },
        api_roots: [(
            API_ROOT.to_string(),
            ApiRootData {
                info: ApiRoot {
                    title: "Malware Research Group".to_string(),
                    description: Some("A trust group set up for malware researchers".to_string()),
                    versions: vec![TAXII_MEDIA_TYPE.to_string()],
                    max_content_length: 10 * 1024 * 1024,
                },
                collections: vec![CollectionData {
                    collection: Collection {
                        id: Uuid::new_v4().to_string(),
                        title: collection_title.to_string(),
                        description: Some(
                            "Indicators and observations shared by the group".to_string(),
                        ),
                        can_read: true,
                        can_write: true,
                        media_types: vec![STIX_MEDIA_TYPE.to_string()],
                    },
                    objects: Vec::new(),
                }],
            },
        )]
        .into(),
    }
}
