//! In-process broker
//!
//! Each subscription owns an unbounded channel and a consumer task. Handlers
//! run concurrently up to the subscription's concurrency limit. Retries are
//! re-enqueued on the same channel after their delay, so a message stays in
//! flight until it is acknowledged, rejected or dead-lettered. A handler that
//! panics dead-letters the delivery.

use crate::error::MessagingError;
use crate::message::{Delivery, Message, ProcessingResult};
use crate::{MessageBroker, MessageHandler, SubscribeOptions, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

const DEFAULT_CONCURRENCY: usize = 1;
const SETTLE_POLL: Duration = Duration::from_millis(5);

/// A message that exhausted its deliveries
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: Message,
    pub attempts: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Snapshot of broker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub rejected: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            published: self.published.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    fn settle(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
    active: Arc<AtomicBool>,
}

struct BrokerInner {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    counters: Counters,
    connected: AtomicBool,
    next_id: AtomicU64,
}

/// Broker that delivers within the current process
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: RwLock::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                counters: Counters::default(),
                connected: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn stats(&self) -> BrokerStats {
        self.inner.counters.snapshot()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().clone()
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Wait until nothing is in flight
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn settled(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.inner.counters.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(SETTLE_POLL).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn remove_subscriber(&self, topic: &str, id: u64) {
        let mut topics = self.inner.topics.write();
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|sub| sub.id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    type Subscription = InMemorySubscription;

    async fn publish(&self, message: Message) -> Result<(), MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::ChannelClosed("broker is closed".into()));
        }

        let counters = &self.inner.counters;
        counters.published.fetch_add(1, Ordering::SeqCst);

        let topics = self.inner.topics.read();
        let Some(subscribers) = topics.get(&message.topic) else {
            debug!(topic = %message.topic, message_id = %message.id, "No subscribers, message dropped");
            return Ok(());
        };

        for subscriber in subscribers {
            counters.in_flight.fetch_add(1, Ordering::SeqCst);
            if subscriber.sender.send(Delivery::first(message.clone())).is_err() {
                counters.settle();
            }
        }

        debug!(
            topic = %message.topic,
            message_id = %message.id,
            subscribers = subscribers.len(),
            "Message published"
        );
        Ok(())
    }

    async fn subscribe_with_options(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> Result<Self::Subscription, MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::Subscribe("broker is closed".into()));
        }

        let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(MessagingError::Configuration(
                "concurrency must be at least 1".into(),
            ));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));

        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id,
                sender: sender.clone(),
                active: active.clone(),
            });

        let consumer = Consumer {
            broker: self.inner.clone(),
            handler,
            sender: sender.downgrade(),
            active: active.clone(),
            limit: Arc::new(Semaphore::new(concurrency)),
            max_attempts: options.max_attempts,
        };
        tokio::spawn(consumer.run(receiver));

        info!(
            topic,
            subscription = id,
            concurrency,
            group = options.consumer_group.as_deref().unwrap_or("-"),
            "Subscribed"
        );

        Ok(InMemorySubscription {
            broker: self.clone(),
            topic: topic.to_string(),
            id,
            active,
        })
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        let topics = std::mem::take(&mut *self.inner.topics.write());
        for subscriber in topics.into_values().flatten() {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        info!("Broker closed");
        Ok(())
    }
}

struct Consumer {
    broker: Arc<BrokerInner>,
    handler: Arc<dyn MessageHandler>,
    sender: mpsc::WeakUnboundedSender<Delivery>,
    active: Arc<AtomicBool>,
    limit: Arc<Semaphore>,
    max_attempts: Option<u32>,
}

impl Consumer {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Delivery>) {
        let this = Arc::new(self);
        while let Some(delivery) = receiver.recv().await {
            if !this.active.load(Ordering::SeqCst) {
                this.broker.counters.settle();
                continue;
            }

            let Ok(permit) = this.limit.clone().acquire_owned().await else {
                this.broker.counters.settle();
                continue;
            };

            let consumer = this.clone();
            tokio::spawn(async move {
                consumer.dispatch(delivery).await;
                drop(permit);
            });
        }
        debug!("Consumer stopped");
    }

    async fn dispatch(&self, delivery: Delivery) {
        let counters = &self.broker.counters;
        counters.delivered.fetch_add(1, Ordering::SeqCst);

        let handler = self.handler.clone();
        let attempt = delivery.clone();
        let mut reason = None;
        let outcome = match tokio::spawn(async move { handler.handle(attempt).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(
                    message_id = %delivery.message.id,
                    attempt = delivery.attempt,
                    error = %err,
                    "Handler failed"
                );
                self.handler.on_error(&err).await
            }
            Err(join) => {
                error!(
                    message_id = %delivery.message.id,
                    attempt = delivery.attempt,
                    error = %join,
                    "Handler panicked"
                );
                reason = Some(format!("handler panicked on attempt {}", delivery.attempt));
                ProcessingResult::DeadLetter
            }
        };

        let outcome = match (outcome, self.max_attempts) {
            (ProcessingResult::Retry { .. }, Some(max)) if delivery.attempt >= max => {
                ProcessingResult::DeadLetter
            }
            (outcome, _) => outcome,
        };

        match outcome {
            ProcessingResult::Success => {
                counters.acked.fetch_add(1, Ordering::SeqCst);
                counters.settle();
            }
            ProcessingResult::Reject => {
                counters.rejected.fetch_add(1, Ordering::SeqCst);
                counters.settle();
                debug!(message_id = %delivery.message.id, "Message rejected");
            }
            ProcessingResult::DeadLetter => {
                counters.dead_lettered.fetch_add(1, Ordering::SeqCst);
                warn!(
                    message_id = %delivery.message.id,
                    attempts = delivery.attempt,
                    "Message dead-lettered"
                );
                self.broker.dead_letters.lock().push(DeadLetter {
                    reason: reason.unwrap_or_else(|| {
                        format!("gave up after {} attempt(s)", delivery.attempt)
                    }),
                    attempts: delivery.attempt,
                    message: delivery.message,
                    dead_lettered_at: Utc::now(),
                });
                counters.settle();
            }
            ProcessingResult::Retry { after } => {
                counters.retried.fetch_add(1, Ordering::SeqCst);
                debug!(
                    message_id = %delivery.message.id,
                    attempt = delivery.attempt,
                    delay_ms = after.as_millis() as u64,
                    "Scheduling redelivery"
                );
                let next = delivery.redeliver();
                let sender = self.sender.clone();
                let active = self.active.clone();
                let broker = self.broker.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let requeued = match sender.upgrade() {
                        Some(sender) if active.load(Ordering::SeqCst) => sender.send(next).is_ok(),
                        _ => false,
                    };
                    if !requeued {
                        broker.counters.settle();
                    }
                });
            }
        }
    }
}

/// Handle for an [`InMemoryBroker`] subscription
pub struct InMemorySubscription {
    broker: InMemoryBroker,
    topic: String,
    id: u64,
    active: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn unsubscribe(&self) -> Result<(), MessagingError> {
        if self.active.swap(false, Ordering::SeqCst) {
            self.broker.remove_subscriber(&self.topic, self.id);
            info!(topic = %self.topic, subscription = self.id, "Unsubscribed");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnHandler;
    use std::sync::atomic::AtomicU32;

    const WAIT: Duration = Duration::from_secs(5);

    fn counting(outcome: ProcessingResult) -> (Arc<AtomicU32>, Arc<dyn MessageHandler>) {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let handler = FnHandler(move |_delivery: Delivery| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(outcome)
            }
        });
        (calls, Arc::new(handler))
    }

    #[tokio::test]
    async fn test_publish_and_ack() {
        let broker = InMemoryBroker::new();
        let (calls, handler) = counting(ProcessingResult::Success);
        let _sub = broker.subscribe("orders", handler).await.unwrap();

        broker.publish(Message::new("orders", b"1".to_vec())).await.unwrap();
        broker.publish(Message::new("other", b"2".to_vec())).await.unwrap();

        assert!(broker.settled(WAIT).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = broker.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let broker = InMemoryBroker::new();
        let (first, h1) = counting(ProcessingResult::Success);
        let (second, h2) = counting(ProcessingResult::Success);
        let _a = broker.subscribe("t", h1).await.unwrap();
        let _b = broker.subscribe("t", h2).await.unwrap();

        broker.publish(Message::new("t", Vec::new())).await.unwrap();
        assert!(broker.settled(WAIT).await);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_then_dead_letter() {
        let broker = InMemoryBroker::new();
        let (calls, handler) = counting(ProcessingResult::Retry {
            after: Duration::from_millis(1),
        });
        let options = SubscribeOptions::default().with_max_attempts(3);
        let _sub = broker
            .subscribe_with_options("t", handler, options)
            .await
            .unwrap();

        broker.publish(Message::new("t", Vec::new())).await.unwrap();
        assert!(broker.settled(WAIT).await);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = broker.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.dead_lettered, 1);

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_dead_lettered() {
        let broker = InMemoryBroker::new();
        let handler = FnHandler(|delivery: Delivery| async move {
            if delivery.message.payload.is_empty() {
                panic!("handler bug");
            }
            Ok::<_, MessagingError>(ProcessingResult::Success)
        });
        let _sub = broker.subscribe("t", Arc::new(handler)).await.unwrap();

        broker.publish(Message::new("t", Vec::new())).await.unwrap();
        broker.publish(Message::new("t", b"ok".to_vec())).await.unwrap();

        assert!(broker.settled(WAIT).await);
        let stats = broker.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert!(broker.dead_letters()[0].reason.contains("panicked"));
    }

    #[tokio::test]
    async fn test_handler_error_uses_on_error() {
        let broker = InMemoryBroker::new();
        let handler = FnHandler(|_delivery: Delivery| async {
            Err::<ProcessingResult, _>(MessagingError::Deserialization("garbage".into()))
        });
        let _sub = broker.subscribe("t", Arc::new(handler)).await.unwrap();

        broker.publish(Message::new("t", Vec::new())).await.unwrap();
        assert!(broker.settled(WAIT).await);
        assert_eq!(broker.stats().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let (calls, handler) = counting(ProcessingResult::Success);
        let sub = broker.subscribe("t", handler).await.unwrap();
        assert!(sub.is_active());
        assert_eq!(sub.topic(), "t");

        sub.unsubscribe().await.unwrap();
        assert!(!sub.is_active());
        assert_eq!(broker.subscriber_count("t"), 0);

        broker.publish(Message::new("t", Vec::new())).await.unwrap();
        assert!(broker.settled(WAIT).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_broker() {
        let broker = InMemoryBroker::new();
        broker.close().await.unwrap();
        assert!(!broker.is_connected());

        let err = broker.publish(Message::new("t", Vec::new())).await.unwrap_err();
        assert!(matches!(err, MessagingError::ChannelClosed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let broker = InMemoryBroker::new();
        let (_, handler) = counting(ProcessingResult::Success);
        let result = broker
            .subscribe_with_options("t", handler, SubscribeOptions::default().with_concurrency(0))
            .await;
        assert!(matches!(result, Err(MessagingError::Configuration(_))));
    }
}
