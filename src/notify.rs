use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: one change feed per team. Every committed event is
/// published to the owning team's channel after it is applied.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a team's feed. Creates the channel if needed.
    pub fn subscribe(&self, team_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(team_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, team_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&team_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a team is decommissioned).
    pub fn remove(&self, team_id: &Ulid) {
        self.channels.remove(team_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
