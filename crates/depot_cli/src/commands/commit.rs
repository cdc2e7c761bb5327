//! Directory snapshot command.

use anyhow::{Context, Result};
use console::style;
use depot_core::{CommitObj, ObjectId, ObjectType, PackInserter, Store, TreeEntry, TreeObj, R_HEADS};
use std::path::Path;

/// Snapshot `path` as a commit on `branch`.
pub fn run(path: &Path, message: &str, branch: &str) -> Result<()> {
    let store = Store::open(".")?;
    let ref_name = format!("{}{}", R_HEADS, branch);

    let parent = match store.refs().read_ref(&ref_name) {
        Ok(r) => r.target(),
        Err(depot_core::DepotError::RefNotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let mut ins = store.inserter();
    let tree = snapshot_dir(&mut ins, path)
        .with_context(|| format!("snapshotting {}", path.display()))?;

    let commit = ins.insert_commit(&CommitObj {
        tree,
        parents: parent.into_iter().collect(),
        author_time_ms: chrono::Utc::now().timestamp_millis(),
        message: message.to_string(),
    })?;

    let desc = ins.flush()?;
    store.refs().write_ref(&ref_name, commit)?;

    match desc {
        Some(desc) => println!(
            "{} {} -> {} ({} new objects in {})",
            style("✓").green(),
            branch,
            &commit.as_hex()[..12],
            desc.object_count(),
            desc.name()
        ),
        None => println!(
            "{} {} -> {} (no new objects)",
            style("✓").green(),
            branch,
            &commit.as_hex()[..12]
        ),
    }
    Ok(())
}

/// Recursively inserts a directory as tree and blob objects.
fn snapshot_dir(ins: &mut PackInserter<'_>, dir: &Path) -> Result<ObjectId> {
    let mut entries = Vec::new();

    let mut names: Vec<_> = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    names.sort();

    for path in names {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == depot_core::DEPOT_DIR {
            continue;
        }

        if path.is_dir() {
            let id = snapshot_dir(ins, &path)?;
            entries.push(TreeEntry {
                name: name.to_string(),
                id,
                kind: ObjectType::Tree,
            });
        } else if path.is_file() {
            let data = std::fs::read(&path)?;
            let id = ins.insert(ObjectType::Blob, data)?;
            entries.push(TreeEntry {
                name: name.to_string(),
                id,
                kind: ObjectType::Blob,
            });
        }
    }

    Ok(ins.insert_tree(&TreeObj { entries })?)
}
