//! Inspect command implementation.

use std::path::Path;
use std::sync::Arc;

use harbor_core::{ActionQueue, CacheConfig, CacheLayer, QueueConfig};
use serde::Serialize;

use super::open_store;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Namespace inspected.
    pub namespace: String,
    /// Number of records in the namespace.
    pub keys: usize,
    /// Serialized size of those records in bytes.
    pub bytes: usize,
    /// Number of cache entries.
    pub cache_entries: usize,
    /// Decoded size of the cache entries in bytes.
    pub cache_bytes: usize,
    /// Pending actions.
    pub pending: usize,
    /// Failed actions.
    pub failed: usize,
    /// Earliest next attempt among pending actions, in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<u64>,
    /// Where the encryption key came from.
    pub key_source: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, namespace: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, namespace)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path, namespace: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_store(path, namespace)?;
    let usage = store.kv.usage()?;
    let cache = CacheLayer::open(Arc::clone(&store.kv), CacheConfig::new())?;
    let queue = ActionQueue::open(Arc::clone(&store.kv), QueueConfig::new())?;

    Ok(InspectResult {
        path: path.display().to_string(),
        namespace: namespace.to_string(),
        keys: usage.keys,
        bytes: usage.bytes,
        cache_entries: cache.len(),
        cache_bytes: cache.size_bytes(),
        pending: queue.len(),
        failed: queue.failed_actions().len(),
        next_attempt_at: queue.next_attempt_at(),
        key_source: format!("{:?}", store.key_source),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Harbor Store: {}", result.path);
    println!("Namespace:    {}", result.namespace);
    println!();
    println!("Records:");
    println!("  Keys:       {}", result.keys);
    println!("  Size:       {} bytes", result.bytes);
    println!();
    println!("Cache:");
    println!("  Entries:    {}", result.cache_entries);
    println!("  Size:       {} bytes", result.cache_bytes);
    println!();
    println!("Queue:");
    println!("  Pending:    {}", result.pending);
    println!("  Failed:     {}", result.failed);
    if let Some(at) = result.next_attempt_at {
        println!("  Next due:   {}", at);
    }
    println!();
    println!("Key source:   {}", result.key_source);
}
