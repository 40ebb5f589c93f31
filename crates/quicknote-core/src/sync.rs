//! Cross-tab change notification.
//!
//! Every view of a store opens the same named channel and hears what the
//! other views post. A handle never hears its own messages. Delivery is fire
//! and forget: FIFO per sender, no ordering across senders.

use crate::Error;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Channel name shared by every view of the application.
pub const CHANNEL_NAME: &str = "quicknote-sync";

const DEFAULT_CAPACITY: usize = 64;

/// Body of a content-update message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Content of a specific note.
    NoteUpdate {
        #[serde(rename = "noteId")]
        note_id: String,
        content: String,
    },
    /// Bare content from single-note senders.
    LegacyContent { content: String },
}

/// Body of a notes-update message: "re-read the list".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSignal {
    pub refresh: bool,
}

/// A message as it travels over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMessage {
    ContentUpdate { data: Payload, timestamp: i64 },
    NotesUpdate { data: RefreshSignal, timestamp: i64 },
}

impl SyncMessage {
    pub fn content_update(data: Payload) -> Self {
        SyncMessage::ContentUpdate {
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn notes_update() -> Self {
        SyncMessage::NotesUpdate {
            data: RefreshSignal { refresh: true },
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Send time, in milliseconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        match self {
            SyncMessage::ContentUpdate { timestamp, .. }
            | SyncMessage::NotesUpdate { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    message: SyncMessage,
}

/// Something that can open named broadcast channels.
pub trait BroadcastTransport {
    fn open(&self, name: &str) -> Result<ChannelHandle, Error>;
}

/// An open channel. Dropping it closes it.
#[derive(Debug)]
pub struct ChannelHandle {
    origin: u64,
    sender: broadcast::Sender<Envelope>,
}

impl ChannelHandle {
    /// Post to every other handle on the channel. Having no listeners is not
    /// an error.
    pub fn send(&self, message: SyncMessage) {
        let envelope = Envelope {
            origin: self.origin,
            message,
        };
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            origin: self.origin,
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving side of a [`ChannelHandle`].
pub struct Subscription {
    origin: u64,
    receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    /// Next message from another handle. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("sync subscriber lagged, skipped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process transport: every handle opened from clones of one hub with the
/// same name talks to the others.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

#[derive(Debug)]
struct HubInner {
    capacity: usize,
    next_origin: AtomicU64,
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` is how many messages a slow subscriber may fall behind
    /// before it starts skipping.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                next_origin: AtomicU64::new(1),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastTransport for BroadcastHub {
    fn open(&self, name: &str) -> Result<ChannelHandle, Error> {
        let mut channels = self
            .inner
            .channels
            .lock()
            .map_err(|_| Error::Unsupported("broadcast hub lock poisoned".into()))?;
        let capacity = self.inner.capacity;
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .clone();

        Ok(ChannelHandle {
            origin: self.inner.next_origin.fetch_add(1, Ordering::Relaxed),
            sender,
        })
    }
}

/// Transport for environments with no broadcast primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransport;

impl BroadcastTransport for NoTransport {
    fn open(&self, _name: &str) -> Result<ChannelHandle, Error> {
        Err(Error::Unsupported(
            "no broadcast channel in this environment".into(),
        ))
    }
}

/// Publishes this view's changes and delivers other views' changes to a callback.
pub struct CrossTabNotifier<T: BroadcastTransport> {
    transport: T,
    channel: Option<ChannelHandle>,
    listener: Option<JoinHandle<()>>,
}

impl<T: BroadcastTransport> CrossTabNotifier<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channel: None,
            listener: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Open the channel and deliver every message from other views to
    /// `on_message`, payloads as sent.
    ///
    /// Without a broadcast primitive or a tokio runtime this logs a warning
    /// and leaves the notifier closed; broadcasts are then no-ops.
    pub fn init_sync<C>(&mut self, on_message: C)
    where
        C: Fn(SyncMessage) + Send + Sync + 'static,
    {
        self.close_sync();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                log::warn!("cross-tab sync disabled: no async runtime");
                return;
            }
        };

        let channel = match self.transport.open(CHANNEL_NAME) {
            Ok(channel) => channel,
            Err(e) => {
                log::warn!("cross-tab sync disabled: {}", e);
                return;
            }
        };

        let mut subscription = channel.subscribe();
        self.listener = Some(runtime.spawn(async move {
            while let Some(message) = subscription.recv().await {
                on_message(message);
            }
        }));
        self.channel = Some(channel);
    }

    /// Tell other views that a note's content changed.
    pub fn broadcast_update(&self, data: Payload) {
        self.post(SyncMessage::content_update(data));
    }

    /// Tell other views to re-read the notes list.
    pub fn broadcast_notes_list_update(&self) {
        self.post(SyncMessage::notes_update());
    }

    /// Stop listening and release the channel. Safe to call repeatedly.
    pub fn close_sync(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.channel = None;
    }

    fn post(&self, message: SyncMessage) {
        if let Some(channel) = &self.channel {
            channel.send(message);
        }
    }
}

impl<T: BroadcastTransport> Drop for CrossTabNotifier<T> {
    fn drop(&mut self) {
        self.close_sync();
    }
}
