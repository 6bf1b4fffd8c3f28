use crate::models::PushEnvelope;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

const TOPIC_CAPACITY: usize = 256;

/// Fan-out of push envelopes keyed by container topic.
#[derive(Clone, Default)]
pub struct TopicHub {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<PushEnvelope>>>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let receiver = {
            let mut topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
                .subscribe()
        };
        Subscription {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            receiver,
            hub: self.clone(),
        }
    }

    /// Returns the number of subscribers that will see the envelope. A topic
    /// nobody listens to is not an error.
    pub fn publish(&self, topic: &str, envelope: PushEnvelope) -> usize {
        let sender = {
            let topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            topics.get(topic).cloned()
        };
        match sender {
            Some(sender) => sender.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.get(topic).map(|sender| sender.receiver_count()).unwrap_or(0)
    }

    fn release(&self, topic: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // the releasing receiver is still alive at this point
        if topics.get(topic).is_some_and(|sender| sender.receiver_count() <= 1) {
            topics.remove(topic);
        }
    }
}

pub struct Subscription {
    id: String,
    topic: String,
    receiver: broadcast::Receiver<PushEnvelope>,
    hub: TopicHub,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next envelope, or `None` once the topic is gone. Lagged receivers skip
    /// what they missed; the next envelope carries the newer orders anyway.
    pub async fn recv(&mut self) -> Option<PushEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "push subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(&self.topic);
    }
}
