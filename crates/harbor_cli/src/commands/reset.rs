//! Reset command implementation.

use std::path::Path;

use super::open_store;

/// Runs the reset command.
pub fn run(path: &Path, namespace: &str, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !yes {
        return Err("Reset deletes every record in the namespace; pass --yes to confirm".into());
    }

    let removed = reset(path, namespace)?;
    println!("✓ Removed {} records from namespace {}", removed, namespace);
    Ok(())
}

fn reset(path: &Path, namespace: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let store = open_store(path, namespace)?;
    let removed = store.kv.clear()?;
    store.kv.flush()?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::seed;

    #[test]
    fn reset_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        assert!(run(dir.path(), "harbor", false).is_err());
    }

    #[test]
    fn reset_empties_namespace() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        assert!(reset(dir.path(), "harbor").unwrap() >= 4);
        let store = open_store(dir.path(), "harbor").unwrap();
        assert!(store.kv.list_keys().unwrap().is_empty());
    }
}
