//! Topic subscriptions advertised to the sidecar on `GET /dapr/subscribe`.

use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use daprfn_core::TopicSubscription;

/// Deduplicated set of topic subscriptions, kept in registration order.
///
/// Two subscriptions are the same when pub/sub name and topic match
/// exactly and the routes match ignoring case.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<Vec<TopicSubscription>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns `false` if an equal one is already present.
    pub fn register(&self, subscription: TopicSubscription) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if topics.contains(&subscription) {
            debug!(
                pubsub = %subscription.pubsub_name,
                topic = %subscription.topic,
                route = %subscription.route,
                "topic subscription already registered"
            );
            return false;
        }
        info!(
            pubsub = %subscription.pubsub_name,
            topic = %subscription.topic,
            route = %subscription.route,
            "registered topic subscription"
        );
        topics.push(subscription);
        true
    }

    /// Remove a subscription. Returns `false` if it was not present.
    pub fn remove(&self, subscription: &TopicSubscription) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let before = topics.len();
        topics.retain(|t| t != subscription);
        topics.len() != before
    }

    /// Snapshot of the current subscriptions.
    pub fn list(&self) -> Vec<TopicSubscription> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
