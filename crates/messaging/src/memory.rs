//! In-process channel with queue-group semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, mpsc};

use crate::{ChannelError, Message, MessageChannel, MessageHandler, Result, SubscriptionId};

struct Member {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct QueueGroup {
    members: Vec<Member>,
    cursor: usize,
}

impl QueueGroup {
    /// Picks the next member round-robin.
    fn next_member(&mut self) -> Option<&Member> {
        if self.members.is_empty() {
            return None;
        }
        let index = self.cursor % self.members.len();
        self.cursor = self.cursor.wrapping_add(1);
        self.members.get(index)
    }
}

#[derive(Default)]
struct ChannelState {
    /// subject -> queue group name -> members
    subjects: HashMap<String, HashMap<String, QueueGroup>>,
    /// subscription -> (subject, queue group)
    subscriptions: HashMap<SubscriptionId, (String, String)>,
    /// Only kept by channels built with [`InMemoryChannel::recording`].
    published: Option<Vec<Message>>,
    fail_on_publish: bool,
}

/// Counts messages handed to subscribers but not yet handled.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// In-memory message channel.
///
/// Every subscription runs its handler on a dedicated task, so messages for
/// one subscriber are handled sequentially in publish order while different
/// subscribers run concurrently. Messages published to a subject without
/// subscribers are dropped. Nothing is kept
/// after delivery unless the channel was built with
/// [`InMemoryChannel::recording`].
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    state: Arc<Mutex<ChannelState>>,
    in_flight: Arc<InFlight>,
}

impl InMemoryChannel {
    /// Creates a new empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel that also keeps a log of every published message.
    pub fn recording() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                published: Some(Vec::new()),
                ..ChannelState::default()
            })),
            in_flight: Arc::default(),
        }
    }

    /// Configures the channel to reject every publish call.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Returns every message published to `subject`, in publish order.
    /// Always empty for a channel that is not recording.
    pub async fn published(&self, subject: &str) -> Vec<Message> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .flatten()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Returns the total number of recorded messages.
    pub async fn published_count(&self) -> usize {
        self.state
            .lock()
            .await
            .published
            .as_ref()
            .map_or(0, Vec::len)
    }

    /// Returns the number of live subscriptions on `subject`.
    pub async fn subscriber_count(&self, subject: &str) -> usize {
        self.state
            .lock()
            .await
            .subjects
            .get(subject)
            .map(|groups| groups.values().map(|g| g.members.len()).sum())
            .unwrap_or(0)
    }

    /// Waits until every delivered message, including the ones published
    /// by handlers while processing, has been handled.
    pub async fn settle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.fail_on_publish {
            return Err(ChannelError::Publish {
                subject: subject.to_string(),
                reason: "channel unavailable".to_string(),
            });
        }

        let message = Message::new(subject, payload);
        if let Some(log) = state.published.as_mut() {
            log.push(message.clone());
        }

        let mut delivered = 0usize;
        if let Some(groups) = state.subjects.get_mut(subject) {
            for group in groups.values_mut() {
                let Some(member) = group.next_member() else {
                    continue;
                };
                self.in_flight.begin();
                if member.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    self.in_flight.end();
                }
            }
        }

        if delivered == 0 {
            tracing::debug!(subject, "no subscribers, message dropped");
            metrics::counter!("channel_messages_dropped_total").increment(1);
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId::new();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();

        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                handler.handle(message).await;
                in_flight.end();
            }
        });

        let mut state = self.state.lock().await;
        state
            .subjects
            .entry(subject.to_string())
            .or_default()
            .entry(queue_group.to_string())
            .or_default()
            .members
            .push(Member { id, sender });
        state
            .subscriptions
            .insert(id, (subject.to_string(), queue_group.to_string()));

        tracing::debug!(subject, queue_group, subscription = %id, "subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut state = self.state.lock().await;
        let (subject, queue_group) = state
            .subscriptions
            .remove(&id)
            .ok_or(ChannelError::SubscriptionNotFound(id))?;

        // Dropping the sender lets the worker drain what it already holds.
        if let Some(group) = state
            .subjects
            .get_mut(&subject)
            .and_then(|groups| groups.get_mut(&queue_group))
        {
            group.members.retain(|m| m.id != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Arc<Mutex<Vec<Message>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: Message) {
            self.seen.lock().await.push(message);
        }
    }

    fn recorder() -> (Arc<Recorder>, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Recorder { seen: seen.clone() }), seen)
    }

    #[tokio::test]
    async fn test_each_group_receives_every_message() {
        let channel = InMemoryChannel::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();

        channel.subscribe("user-events", "report-service", a).await.unwrap();
        channel.subscribe("user-events", "event-log-service", b).await.unwrap();

        channel.publish("user-events", b"1".to_vec()).await.unwrap();
        channel.publish("user-events", b"2".to_vec()).await.unwrap();
        channel.settle().await;

        assert_eq!(seen_a.lock().await.len(), 2);
        assert_eq!(seen_b.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_group_members_compete_for_messages() {
        let channel = InMemoryChannel::new();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();

        channel.subscribe("user-events", "workers", a).await.unwrap();
        channel.subscribe("user-events", "workers", b).await.unwrap();

        for i in 0..4u8 {
            channel.publish("user-events", vec![i]).await.unwrap();
        }
        channel.settle().await;

        assert_eq!(seen_a.lock().await.len(), 2);
        assert_eq!(seen_b.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let channel = InMemoryChannel::new();
        let (a, seen) = recorder();
        channel.subscribe("user-events", "workers", a).await.unwrap();

        for i in 0..10u8 {
            channel.publish("user-events", vec![i]).await.unwrap();
        }
        channel.settle().await;

        let payloads: Vec<u8> = seen.lock().await.iter().map(|m| m.payload[0]).collect();
        assert_eq!(payloads, (0..10u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_subjects_are_isolated() {
        let channel = InMemoryChannel::recording();
        let (a, seen) = recorder();
        channel.subscribe("user-events", "workers", a).await.unwrap();

        channel.publish("invoices", b"x".to_vec()).await.unwrap();
        channel.settle().await;

        assert!(seen.lock().await.is_empty());
        assert_eq!(channel.published("invoices").await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let channel = InMemoryChannel::recording();
        channel.set_fail_on_publish(true).await;

        let result = channel.publish("user-events", b"x".to_vec()).await;
        assert!(matches!(result, Err(ChannelError::Publish { .. })));
        assert_eq!(channel.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_default_channel_keeps_nothing_after_delivery() {
        let channel = InMemoryChannel::new();
        let (a, seen) = recorder();
        channel.subscribe("user-events", "workers", a).await.unwrap();

        for i in 0..1000u16 {
            channel
                .publish("user-events", i.to_be_bytes().to_vec())
                .await
                .unwrap();
        }
        channel.publish("invoices", b"x".to_vec()).await.unwrap();
        channel.settle().await;

        assert_eq!(seen.lock().await.len(), 1000);
        assert_eq!(channel.published_count().await, 0);
        assert!(channel.published("user-events").await.is_empty());
    }

    #[tokio::test]
    async fn test_recording_channel_keeps_log() {
        let channel = InMemoryChannel::recording();

        channel.publish("user-events", b"1".to_vec()).await.unwrap();
        channel.publish("invoices", b"2".to_vec()).await.unwrap();

        assert_eq!(channel.published_count().await, 2);
        assert_eq!(channel.published("invoices").await[0].payload, b"2".to_vec());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let channel = InMemoryChannel::new();
        let (a, seen) = recorder();
        let id = channel.subscribe("user-events", "workers", a).await.unwrap();
        assert_eq!(channel.subscriber_count("user-events").await, 1);

        channel.unsubscribe(id).await.unwrap();
        assert_eq!(channel.subscriber_count("user-events").await, 0);

        channel.publish("user-events", b"x".to_vec()).await.unwrap();
        channel.settle().await;
        assert!(seen.lock().await.is_empty());

        let again = channel.unsubscribe(id).await;
        assert!(matches!(again, Err(ChannelError::SubscriptionNotFound(_))));
    }

    struct Forwarder {
        channel: InMemoryChannel,
        hops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for Forwarder {
        async fn handle(&self, message: Message) {
            let n = message.payload[0];
            self.hops.fetch_add(1, Ordering::SeqCst);
            if n > 0 {
                self.channel.publish("hop", vec![n - 1]).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_settle_waits_for_chained_publishes() {
        let channel = InMemoryChannel::new();
        let hops = Arc::new(AtomicUsize::new(0));
        channel
            .subscribe(
                "hop",
                "relay",
                Arc::new(Forwarder {
                    channel: channel.clone(),
                    hops: hops.clone(),
                }),
            )
            .await
            .unwrap();

        channel.publish("hop", vec![5]).await.unwrap();
        channel.settle().await;

        assert_eq!(hops.load(Ordering::SeqCst), 6);
    }
}
