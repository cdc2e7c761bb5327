//! Garbage collection command.

use anyhow::{bail, Result};
use console::style;
use depot_core::{
    DepotError, GarbageCollector, GcLock, PackExt, ProgressMonitor, Store, DEPOT_DIR,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Bridges the core progress contract onto an indicatif bar.
struct BarProgress {
    bar: ProgressBar,
}

impl ProgressMonitor for BarProgress {
    fn begin_task(&mut self, title: &str, total: u64) {
        self.bar.reset();
        self.bar.set_length(total);
        self.bar.set_message(title.to_string());
    }

    fn update(&mut self, delta: u64) {
        self.bar.inc(delta);
    }

    fn end_task(&mut self) {}
}

/// Run garbage collection.
pub fn run(ttl_hours: Option<i64>, coalesce_limit: Option<u64>) -> Result<()> {
    let store = Store::open(".")?;

    // Two GC runs on one store must never execute concurrently.
    let lock_path = Path::new(DEPOT_DIR).join("gc.lock");
    let _lock = match GcLock::acquire(&lock_path) {
        Ok(lock) => lock,
        Err(DepotError::LockUnavailable { .. }) => {
            bail!("another gc is already running on this store")
        }
        Err(e) => return Err(e.into()),
    };

    let mut gc = GarbageCollector::new(&store);
    if let Some(hours) = ttl_hours {
        gc.set_garbage_ttl_millis(hours * 60 * 60 * 1000);
    }
    if let Some(limit) = coalesce_limit {
        gc.set_coalesce_garbage_limit(limit);
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:20} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("█▓▒░  "),
    );
    let mut pm = BarProgress { bar: bar.clone() };

    // The caller's retry loop: rerun when a concurrent update races the
    // commit, up to a small bound.
    let mut attempts = 0;
    loop {
        attempts += 1;
        if gc.pack(&mut pm)? {
            break;
        }
        if attempts >= 3 {
            bar.finish_and_clear();
            bail!("gc kept racing concurrent updates; try again later");
        }
        println!(
            "{} concurrent update detected, retrying...",
            style("→").yellow()
        );
    }
    bar.finish_and_clear();

    let new_packs = gc.new_pack_descriptions();
    let pruned = gc.pruned_packs();
    tracing::info!(
        attempts,
        new = new_packs.len(),
        pruned = pruned.len(),
        "gc completed"
    );

    println!("{}", style("Garbage Collection Report:").bold());
    println!("  Packs written: {}", style(new_packs.len()).cyan());
    for desc in new_packs {
        println!(
            "    {} {:<20} {} objects, {} bytes",
            style("+").green(),
            desc.source().as_str(),
            desc.object_count(),
            desc.file_size(PackExt::Pack)
        );
    }
    println!("  Packs pruned:  {}", style(pruned.len()).cyan());
    for desc in &pruned {
        println!(
            "    {} {:<20} {} objects",
            style("-").red(),
            desc.source().as_str(),
            desc.object_count()
        );
    }

    Ok(())
}
