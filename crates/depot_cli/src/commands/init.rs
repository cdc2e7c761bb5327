//! Store initialization command.

use anyhow::{bail, Result};
use console::style;
use depot_core::{Store, DEPOT_DIR};
use std::path::Path;

/// Initialize a new store in the current directory.
pub fn run() -> Result<()> {
    if Path::new(DEPOT_DIR).is_dir() {
        bail!("a depot store already exists here");
    }

    Store::init(".")?;

    println!(
        "{} Initialized empty depot store in {}",
        style("✓").green(),
        DEPOT_DIR
    );
    Ok(())
}
