//! Connectivity observation.

use tokio::sync::watch;

/// Reports whether the remote is reachable.
///
/// Platform network monitors implement this outside Harbor. Subscribers see
/// every change of the flag; the scheduler drains on offline-to-online edges.
pub trait ConnectivityObserver: Send + Sync {
    /// Returns the current reachability.
    fn is_reachable(&self) -> bool;

    /// Returns a receiver that observes reachability changes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// A connectivity flag set by the host.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Creates a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Updates the flag. Subscribers are notified only on change.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityObserver for ManualConnectivity {
    fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_updates() {
        let connectivity = ManualConnectivity::new(false);
        assert!(!connectivity.is_reachable());

        connectivity.set_online(true);
        assert!(connectivity.is_reachable());
    }

    #[test]
    fn subscribers_see_changes_only() {
        let connectivity = ManualConnectivity::default();
        let mut rx = connectivity.subscribe();
        assert!(*rx.borrow_and_update());

        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
    }
}
