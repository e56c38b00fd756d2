//! Channel subscriptions
//!
//! Membership is tracked in both directions so a closing connection can be
//! removed from every channel without scanning all of them.

use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug)]
pub struct SubscriptionTable {
    channels: DashMap<String, BTreeSet<String>>,
    connections: DashMap<String, BTreeSet<String>>,
    max_per_channel: usize,
}

impl SubscriptionTable {
    pub fn new(max_per_channel: usize) -> Self {
        Self {
            channels: DashMap::new(),
            connections: DashMap::new(),
            max_per_channel,
        }
    }

    /// Add `connection_id` to `channel`.
    ///
    /// A full channel drops the request: the connection is not subscribed
    /// and no error is raised. Returns whether the connection is subscribed
    /// afterwards.
    pub fn subscribe(&self, connection_id: &str, channel: &str) -> bool {
        {
            let mut members = self.channels.entry(channel.to_string()).or_default();
            if !members.contains(connection_id) {
                if members.len() >= self.max_per_channel {
                    debug!(connection_id, channel, "channel full, subscription dropped");
                    return false;
                }
                members.insert(connection_id.to_string());
            }
        }
        self.connections
            .entry(connection_id.to_string())
            .or_default()
            .insert(channel.to_string());
        true
    }

    pub fn unsubscribe(&self, connection_id: &str, channel: &str) -> bool {
        let removed = self
            .channels
            .get_mut(channel)
            .map(|mut members| members.remove(connection_id))
            .unwrap_or(false);
        if let Some(mut channels) = self.connections.get_mut(connection_id) {
            channels.remove(channel);
        }
        self.channels.remove_if(channel, |_, members| members.is_empty());
        self.connections
            .remove_if(connection_id, |_, channels| channels.is_empty());
        removed
    }

    /// Remove a connection from every channel, returning the channels it left
    pub fn remove_connection(&self, connection_id: &str) -> Vec<String> {
        let Some((_, channels)) = self.connections.remove(connection_id) else {
            return Vec::new();
        };
        for channel in &channels {
            if let Some(mut members) = self.channels.get_mut(channel) {
                members.remove(connection_id);
            }
            self.channels.remove_if(channel, |_, members| members.is_empty());
        }
        channels.into_iter().collect()
    }

    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channels_of(&self, connection_id: &str) -> Vec<String> {
        self.connections
            .get(connection_id)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.channels.clear();
        self.connections.clear();
    }
}
