//! Channels and the channel registry.

use crate::auth::User;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// A message posted to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Unix time in milliseconds.
    pub time: i64,
    pub user: String,
    pub message: String,
    pub flags: String,
}

/// A named channel with its message history.
#[derive(Debug)]
pub struct Channel {
    name: String,
    messages: RwLock<Vec<ChannelMessage>>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a message and returns the stored record.
    pub fn message(&self, user: &User, message: &str, flags: &str) -> ChannelMessage {
        let record = ChannelMessage {
            time: chrono::Utc::now().timestamp_millis(),
            user: user.handle.clone(),
            message: message.to_string(),
            flags: flags.to_string(),
        };
        self.messages.write().push(record.clone());
        record
    }

    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.messages.read().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

/// Decides which channel names may exist.
pub trait ChannelNamePolicy: Send + Sync {
    fn is_valid(&self, name: &str) -> bool;
}

/// Accepts every name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ChannelNamePolicy for AcceptAll {
    fn is_valid(&self, _name: &str) -> bool {
        true
    }
}

impl<F> ChannelNamePolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, name: &str) -> bool {
        self(name)
    }
}

/// All channels known to a server, keyed by name.
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<Channel>>,
    policy: Arc<dyn ChannelNamePolicy>,
    create_on_join: bool,
}

impl ChannelRegistry {
    pub fn new(create_on_join: bool) -> Self {
        Self {
            channels: DashMap::new(),
            policy: Arc::new(AcceptAll),
            create_on_join,
        }
    }

    pub fn with_policy(mut self, policy: impl ChannelNamePolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Returns the channel called `name`, creating it on first reference
    /// when `create_on_join` is set.
    ///
    /// Returns `None` for a name the policy rejects, or for an unknown
    /// channel when creation is disabled.
    pub fn get_channel(&self, name: &str) -> Option<Arc<Channel>> {
        if !self.policy.is_valid(name) {
            return None;
        }
        if let Some(channel) = self.find(name) {
            return Some(channel);
        }
        if !self.create_on_join {
            return None;
        }

        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating channel '{}'", name);
                Arc::new(Channel::new(name))
            })
            .clone();
        Some(channel)
    }

    /// Looks up an existing channel.
    pub fn find(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn create_on_join(&self) -> bool {
        self.create_on_join
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .field("create_on_join", &self.create_on_join)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_channel_creates_once() {
        let registry = ChannelRegistry::new(true);
        assert!(registry.find("#general").is_none());

        let first = registry.get_channel("#general").unwrap();
        let second = registry.get_channel("#general").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_on_join_disabled() {
        let registry = ChannelRegistry::new(false);
        assert!(registry.get_channel("#general").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_policy_rejects_name() {
        let registry = ChannelRegistry::new(true).with_policy(|name: &str| name.starts_with('#'));
        assert!(registry.get_channel("general").is_none());
        assert!(registry.get_channel("#general").is_some());
        assert_eq!(registry.names(), ["#general"]);
    }

    #[test]
    fn test_channel_message_appends() {
        let channel = Channel::new("#general");
        let user = User::new("alice");

        let first = channel.message(&user, "hello", "");
        channel.message(&user, "again", "me");

        assert_eq!(first.user, "alice");
        assert_eq!(first.message, "hello");
        assert!(first.time > 0);
        assert_eq!(channel.len(), 2);
        let messages = channel.messages();
        assert_eq!(messages[1].message, "again");
        assert_eq!(messages[1].flags, "me");
    }
}
