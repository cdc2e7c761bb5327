//! Pack catalog listing command.

use anyhow::Result;
use console::style;
use depot_core::{PackExt, Store};

/// List the packs in the catalog.
pub fn run() -> Result<()> {
    let store = Store::open(".")?;
    let packs = store.odb().packs()?;

    if packs.is_empty() {
        println!("No packs.");
        return Ok(());
    }

    println!(
        "{:<42} {:<20} {:>10} {:>12}  {}",
        style("NAME").bold(),
        style("SOURCE").bold(),
        style("OBJECTS").bold(),
        style("BYTES").bold(),
        style("MODIFIED").bold()
    );

    for pack in &packs {
        let modified = chrono::DateTime::from_timestamp_millis(pack.last_modified_ms())
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| pack.last_modified_ms().to_string());

        println!(
            "{:<42} {:<20} {:>10} {:>12}  {}",
            pack.name(),
            pack.source().as_str(),
            pack.object_count(),
            pack.file_size(PackExt::Pack),
            modified
        );
    }

    println!(
        "\n{} packs, {} objects",
        packs.len(),
        packs.iter().map(|p| p.object_count()).sum::<u64>()
    );
    Ok(())
}
