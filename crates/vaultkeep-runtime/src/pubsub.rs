//! In-process publish/subscribe bus (C1).
//!
//! Subscribers register against a topic name. Two publish modes exist:
//!
//! - [`PubSub::pub_`] enqueues onto a worklist; a dedicated consumer task
//!   wakes on a `Notify` and drains the worklist in FIFO order.
//! - [`PubSub::pub_immediate`] invokes matching subscribers synchronously
//!   on the caller's task.
//!
//! Once the model has shut down, `pub_` promotes to `pub_immediate` so
//! in-flight subscribers still fire without depending on the consumer task
//! still being alive.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vaultkeep_core::RuntimeFlags;

const TRACING_TARGET: &str = "vaultkeep_runtime::pubsub";

/// A subscriber callback. Subscribers report failure rather than panic;
/// one bad subscriber must not stop the bus (`BusSubscriberFailed`).
pub type Subscriber = Box<dyn Fn(&serde_json::Value) -> Result<(), vaultkeep_core::BoxedError> + Send + Sync>;

struct Message {
    topic: String,
    payload: serde_json::Value,
}

/// In-process pub/sub bus shared by the controller, schedulers, and daemons.
pub struct PubSub {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    doing_work: AtomicBool,
    flags: Arc<RuntimeFlags>,
    cancel: CancellationToken,
}

impl PubSub {
    pub fn new(flags: Arc<RuntimeFlags>) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            doing_work: AtomicBool::new(false),
            flags,
            cancel: CancellationToken::new(),
        })
    }

    /// Registers a subscriber for `topic`.
    pub fn sub(&self, topic: impl Into<String>, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .expect("pubsub subscribers mutex poisoned")
            .entry(topic.into())
            .or_default()
            .push(subscriber);
    }

    /// Publishes `payload` under `topic`, deferring delivery to the
    /// consumer task unless the model has already shut down.
    pub fn pub_(&self, topic: impl Into<String>, payload: serde_json::Value) {
        let topic = topic.into();
        if self.flags.model_is_shutdown() {
            self.pub_immediate(topic, payload);
            return;
        }
        self.queue.lock().expect("pubsub queue mutex poisoned").push_back(Message { topic, payload });
        self.notify.notify_one();
    }

    /// Publishes `payload` under `topic`, invoking matching subscribers
    /// synchronously on the caller.
    pub fn pub_immediate(&self, topic: impl Into<String>, payload: serde_json::Value) {
        self.dispatch(&topic.into(), &payload);
    }

    fn dispatch(&self, topic: &str, payload: &serde_json::Value) {
        let subs = self.subscribers.lock().expect("pubsub subscribers mutex poisoned");
        let Some(list) = subs.get(topic) else {
            return;
        };
        for subscriber in list {
            if let Err(err) = subscriber(payload) {
                tracing::error!(
                    target: TRACING_TARGET,
                    topic,
                    error = %err,
                    "BusSubscriberFailed"
                );
            }
        }
    }

    /// `work_to_do` predicate: the worklist is non-empty.
    pub fn work_to_do(&self) -> bool {
        !self.queue.lock().expect("pubsub queue mutex poisoned").is_empty()
    }

    /// `doing_work` predicate: the consumer is currently draining a batch.
    pub fn doing_work(&self) -> bool {
        self.doing_work.load(Ordering::SeqCst)
    }

    /// Blocks until both `work_to_do` and `doing_work` are false, or the
    /// model shuts down while waiting.
    pub async fn wait_until_pubsubs_empty(&self) {
        loop {
            if self.flags.model_is_shutdown() || (!self.work_to_do() && !self.doing_work()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Spawns the consumer task that drains the worklist whenever woken.
    pub fn spawn_consumer(self: Arc<Self>) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::info!(target: TRACING_TARGET, "pubsub consumer stopping");
                        break;
                    }
                    () = self.notify.notified() => {
                        self.drain_once();
                    }
                }
            }
        })
    }

    fn drain_once(&self) {
        self.doing_work.store(true, Ordering::SeqCst);
        loop {
            let next = self.queue.lock().expect("pubsub queue mutex poisoned").pop_front();
            match next {
                Some(msg) => self.dispatch(&msg.topic, &msg.payload),
                None => break,
            }
        }
        self.doing_work.store(false, Ordering::SeqCst);
    }

    /// Stops the consumer task. Pending messages already enqueued are
    /// delivered via shutdown's `pub_`-promotes-to-`pub_immediate` rule,
    /// not by this method.
    pub fn stop_consumer(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn flags() -> Arc<RuntimeFlags> {
        Arc::new(RuntimeFlags::new())
    }

    #[test]
    fn pub_immediate_invokes_subscriber_synchronously() {
        let bus = PubSub::new(flags());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        bus.sub(
            "ping",
            Box::new(move |_payload| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.pub_immediate("ping", serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_subscriber_does_not_stop_bus() {
        let bus = PubSub::new(flags());
        let hits = Arc::new(AtomicUsize::new(0));
        bus.sub("ping", Box::new(|_| Err("boom".into())));
        let hits_clone = hits.clone();
        bus.sub(
            "ping",
            Box::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.pub_immediate("ping", serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pub_drains_to_subscriber_after_consumer_runs() {
        let bus = PubSub::new(flags());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        bus.sub(
            "topic",
            Box::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let consumer = bus.clone().spawn_consumer();
        bus.pub_("topic", serde_json::json!({"n": 1}));
        bus.wait_until_pubsubs_empty().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        bus.stop_consumer();
        let _ = consumer.await;
    }

    #[test]
    fn shutdown_promotes_pub_to_pub_immediate() {
        let flags = flags();
        flags.set_model_shutdown(true);
        let bus = PubSub::new(flags);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        bus.sub(
            "topic",
            Box::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        // No consumer task is running; delivery must still happen.
        bus.pub_("topic", serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmatched_topic_is_a_no_op() {
        let bus = PubSub::new(flags());
        bus.pub_immediate("nobody-listens", serde_json::json!({}));
    }
}
