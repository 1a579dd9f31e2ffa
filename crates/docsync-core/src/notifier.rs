//! Topic-keyed listener registry.
//!
//! Listeners register under a topic and receive every payload emitted on it,
//! synchronously and in registration order. A listener that fails, by
//! returning an error or by panicking, is logged and counted; the remaining
//! listeners of the same emission still run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Error type returned by listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered callback.
pub type Listener<A> = Arc<dyn Fn(&A) -> Result<(), ListenerError> + Send + Sync>;

/// Handle identifying one registration, used to remove it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(u64);

impl ListenerToken {
    /// Raw token value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

struct ListenerEntry<A> {
    token: ListenerToken,
    listener: Listener<A>,
}

/// Publish/subscribe registry of listeners keyed by topic.
pub struct Notifier<K, A> {
    /// Listeners per topic, in registration order.
    topics: RwLock<HashMap<K, Vec<ListenerEntry<A>>>>,
    /// Next token to hand out.
    next_token: AtomicU64,
    /// Listener invocations that errored or panicked.
    failures: AtomicU64,
}

impl<K, A> Notifier<K, A>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Register a listener under a topic.
    ///
    /// Tokens are unique and increase with every registration.
    pub fn on<F>(&self, topic: K, listener: F) -> ListenerToken
    where
        F: Fn(&A) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::SeqCst));

        self.topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push(ListenerEntry {
                token,
                listener: Arc::new(listener),
            });

        tracing::trace!(?topic, token = token.0, "listener registered");
        token
    }

    /// Invoke every listener registered for `topic` with `args`.
    ///
    /// Returns `false` without doing anything when the topic has no listeners.
    /// Listeners may register or remove listeners; such changes apply from the
    /// next emission on.
    pub fn emit(&self, topic: &K, args: &A) -> bool {
        let listeners: Vec<(ListenerToken, Listener<A>)> = {
            let topics = self.topics.read();
            match topics.get(topic) {
                Some(entries) => entries
                    .iter()
                    .map(|entry| (entry.token, Arc::clone(&entry.listener)))
                    .collect(),
                None => return false,
            }
        };

        for (token, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(args))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(?topic, token = token.0, error = %error, "listener failed");
                }
                Err(payload) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        ?topic,
                        token = token.0,
                        panic = panic_message(payload.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }

        true
    }

    /// Remove the listener registered with `token` under `topic`.
    pub fn remove_listener(&self, topic: &K, token: ListenerToken) -> bool {
        let mut topics = self.topics.write();
        let Some(entries) = topics.get_mut(topic) else {
            return false;
        };

        let Some(position) = entries.iter().position(|entry| entry.token == token) else {
            return false;
        };
        entries.remove(position);
        if entries.is_empty() {
            topics.remove(topic);
        }

        tracing::trace!(?topic, token = token.0, "listener removed");
        true
    }

    /// Remove every listener registered under `topic`.
    pub fn remove_all_listeners(&self, topic: &K) -> bool {
        self.topics.write().remove(topic).is_some()
    }

    /// Number of listeners registered under `topic`.
    pub fn listener_count(&self, topic: &K) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Total number of listener invocations that failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl<K, A> Default for Notifier<K, A>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A> fmt::Debug for Notifier<K, A>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.topics.read();
        let counts: Vec<(&K, usize)> = topics.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("Notifier")
            .field("topics", &counts)
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
