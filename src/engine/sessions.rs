// Session registry: live duplex channels per match, per player.
//
// Holds only senders; socket tasks own the receiving half. Disconnecting
// never touches match state, it just stops event delivery to that seat.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::metrics;

use super::events::ServerEvent;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Process-wide `match → player → sender` map. Connect/disconnect across
/// different matches never contend beyond the brief map lock.
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, HashMap<String, EventSender>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Create an empty connection table for a new match.
    pub fn register_match(&self, match_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .entry(match_id.to_string())
            .or_default();
    }

    /// Attach a player's sender. A reconnect replaces the previous sender,
    /// which closes the stale outbound pump.
    pub fn connect(&self, match_id: &str, player: &str, tx: EventSender) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entry(match_id.to_string())
            .or_default()
            .insert(player.to_string(), tx);
    }

    /// Detach a player's sender if it is still the one given. A seat that
    /// reconnected already owns a newer sender, which must survive the old
    /// socket's teardown.
    pub fn disconnect(&self, match_id: &str, player: &str, tx: &EventSender) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(conns) = inner.get_mut(match_id) {
            if conns.get(player).map(|t| t.same_channel(tx)).unwrap_or(false) {
                conns.remove(player);
            }
        }
    }

    /// Number of connected players in a match.
    pub fn connected_count(&self, match_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(match_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Fan a single event out to every connected player in a match.
    pub fn broadcast(&self, match_id: &str, event: &ServerEvent) {
        let inner = self.inner.lock().unwrap();
        if let Some(conns) = inner.get(match_id) {
            for tx in conns.values() {
                if tx.send(event.clone()).is_ok() {
                    metrics::WEBSOCKET_EVENTS_SENT_TOTAL.inc();
                }
            }
        }
    }

    /// Send an event to one player only. Silently dropped if disconnected.
    pub fn send_to(&self, match_id: &str, player: &str, event: ServerEvent) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx) = inner.get(match_id).and_then(|c| c.get(player)) {
            if tx.send(event).is_ok() {
                metrics::WEBSOCKET_EVENTS_SENT_TOTAL.inc();
            }
        }
    }

    /// Drop a match's whole connection table (eviction).
    pub fn remove_match(&self, match_id: &str) {
        self.inner.lock().unwrap().remove(match_id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_connect_and_count() {
        let registry = SessionRegistry::new();
        registry.register_match("m1");
        assert_eq!(registry.connected_count("m1"), 0);

        let (tx_a, _rx_a) = unbounded_channel();
        let (tx_b, _rx_b) = unbounded_channel();
        registry.connect("m1", "alice", tx_a);
        registry.connect("m1", "bob", tx_b);
        assert_eq!(registry.connected_count("m1"), 2);
        assert_eq!(registry.connected_count("m2"), 0);
    }

    #[test]
    fn test_broadcast_reaches_all_players() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        registry.connect("m1", "alice", tx_a);
        registry.connect("m1", "bob", tx_b);

        registry.broadcast("m1", &ServerEvent::RoundUpdate { seconds_left: 5 });

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerEvent::RoundUpdate { seconds_left: 5 }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::RoundUpdate { seconds_left: 5 }
        ));
    }

    #[test]
    fn test_send_to_targets_one_player() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        registry.connect("m1", "alice", tx_a);
        registry.connect("m1", "bob", tx_b);

        registry.send_to("m1", "alice", ServerEvent::Pong);

        assert!(matches!(rx_a.try_recv().unwrap(), ServerEvent::Pong));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_removes_only_matching_sender() {
        let registry = SessionRegistry::new();
        let (tx_old, _rx_old) = unbounded_channel();
        registry.connect("m1", "alice", tx_old.clone());

        // Reconnect replaces the sender.
        let (tx_new, mut rx_new) = unbounded_channel();
        registry.connect("m1", "alice", tx_new.clone());
        assert_eq!(registry.connected_count("m1"), 1);

        // The old socket's teardown must not evict the new connection.
        registry.disconnect("m1", "alice", &tx_old);
        assert_eq!(registry.connected_count("m1"), 1);
        registry.broadcast("m1", &ServerEvent::Pong);
        assert!(rx_new.try_recv().is_ok());

        registry.disconnect("m1", "alice", &tx_new);
        assert_eq!(registry.connected_count("m1"), 0);
    }

    #[test]
    fn test_remove_match() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        registry.connect("m1", "alice", tx);
        registry.remove_match("m1");
        assert_eq!(registry.connected_count("m1"), 0);
    }
}
