//! Queue command implementation.

use std::path::Path;
use std::sync::Arc;

use harbor_core::{ActionQueue, QueueConfig};

use super::open_store;

/// Runs the queue command.
pub fn run(
    path: &Path,
    namespace: &str,
    failed: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path, namespace)?;
    let queue = ActionQueue::open(Arc::clone(&store.kv), QueueConfig::new())?;

    if failed {
        let actions = queue.failed_actions();
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&actions)?),
            _ => {
                println!("Failed actions: {}", actions.len());
                for failed in &actions {
                    println!(
                        "  #{:<6} {:<16} failed_at={} {}",
                        failed.action.id, failed.action.action_type, failed.failed_at, failed.reason
                    );
                }
            }
        }
    } else {
        let actions = queue.pending();
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&actions)?),
            _ => {
                println!("Pending actions: {}", actions.len());
                for action in &actions {
                    println!(
                        "  #{:<6} {:<16} retries={}/{} next={}{}",
                        action.id,
                        action.action_type,
                        action.retry_count,
                        action.max_retries,
                        action.next_attempt_at,
                        action
                            .last_error
                            .as_deref()
                            .map(|e| format!(" last_error={e}"))
                            .unwrap_or_default()
                    );
                }
            }
        }
    }

    Ok(())
}
