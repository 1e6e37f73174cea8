//! Sweep command implementation.

use std::path::Path;

use harbor_core::SweepReport;

use super::open_store;

/// Runs the sweep command.
pub fn run(path: &Path, namespace: &str, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Sweeping {:?} (namespace {})", path, namespace);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let report = sweep(path, namespace, dry_run)?;

    println!("Sweep Analysis:");
    println!("  Expired records: {}", report.expired.len());
    println!("  Corrupt records: {}", report.corrupt.len());
    if !report.locked.is_empty() {
        println!("  Kept (fallback key): {}", report.locked.len());
    }
    println!();
    if dry_run {
        println!("{} records would be removed", report.total());
    } else if report.total() > 0 {
        println!("✓ Removed {} records", report.total());
    } else {
        println!("Nothing to remove");
    }

    Ok(())
}

fn sweep(
    path: &Path,
    namespace: &str,
    dry_run: bool,
) -> Result<SweepReport, Box<dyn std::error::Error>> {
    let store = open_store(path, namespace)?;
    let report = if dry_run {
        store.kv.sweep_dry_run()?
    } else {
        let report = store.kv.sweep()?;
        store.kv.flush()?;
        report
    };
    Ok(report)
}
