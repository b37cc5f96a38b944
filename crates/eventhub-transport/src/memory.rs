// In-process event hub: subscriber streams and topic publish without sockets.
use async_trait::async_trait;
use bytes::Bytes;
use eventhub_wire::Command;
use parking_lot::Mutex;
use slab::Slab;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::{Connection, Connector, Error, Publisher, Result};

/// Hub that serves both the subscriber side and the publish side channel.
///
/// ```
/// use bytes::Bytes;
/// use eventhub_transport::{Connection, Connector, MemoryHub, Publisher};
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let hub = MemoryHub::new();
///     hub.listen("ws://hub/test1", "eventhub.test1");
///     let mut connection = hub.connect("ws://hub/test1").await.expect("connect");
///     assert_eq!(hub.subscriber_count("eventhub.test1"), 1);
///     hub.publish("eventhub.test1", Bytes::from_static(b"event"))
///         .await
///         .expect("publish");
///     assert_eq!(connection.receive().await.expect("receive"), Bytes::from_static(b"event"));
/// });
/// ```
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    // Endpoint address -> topic every new connection starts on.
    endpoints: HashMap<String, String>,
    subscribers: Slab<SubscriberEntry>,
    next_serial: u64,
}

struct SubscriberEntry {
    // Distinguishes reuses of the same slab slot.
    serial: u64,
    topics: BTreeSet<String>,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl HubState {
    fn entry_mut(&mut self, id: usize, serial: u64) -> Option<&mut SubscriberEntry> {
        self.subscribers
            .get_mut(id)
            .filter(|entry| entry.serial == serial)
    }

    fn fan_out(&self, topic: &str, payload: &Bytes) -> usize {
        let mut delivered = 0;
        for (_, entry) in self.subscribers.iter() {
            // A failed send means the receiver is mid-drop; its guard unregisters it.
            if entry.topics.contains(topic) && entry.sender.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept connections on `endpoint`, subscribing each one to `topic`.
    pub fn listen(&self, endpoint: impl Into<String>, topic: impl Into<String>) {
        self.state
            .lock()
            .endpoints
            .insert(endpoint.into(), topic.into());
    }

    /// Live connections currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.lock();
        state
            .subscribers
            .iter()
            .filter(|(_, entry)| entry.topics.contains(topic))
            .count()
    }

    /// Drop every live connection from the hub side, as a restarting server would.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        let dropped = state.subscribers.len();
        state.subscribers.clear();
        tracing::debug!(dropped, "memory hub disconnected all subscribers");
    }
}

#[async_trait]
impl Connector for MemoryHub {
    type Connection = MemoryConnection;

    async fn connect(&self, endpoint: &str) -> Result<MemoryConnection> {
        let mut state = self.state.lock();
        let Some(topic) = state.endpoints.get(endpoint).cloned() else {
            return Err(Error::Connect {
                endpoint: endpoint.to_string(),
                source: "no hub listening on endpoint".into(),
            });
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        let serial = state.next_serial;
        state.next_serial += 1;
        let id = state.subscribers.insert(SubscriberEntry {
            serial,
            topics: BTreeSet::from([topic.clone()]),
            sender,
        });
        Ok(MemoryConnection {
            id,
            serial,
            topic,
            hub: Arc::downgrade(&self.state),
            receiver,
            closed: false,
        })
    }
}

#[async_trait]
impl Publisher for MemoryHub {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let delivered = self.state.lock().fan_out(topic, &payload);
        tracing::trace!(topic, delivered, "memory hub publish");
        Ok(())
    }
}

/// One subscriber stream on a `MemoryHub`; unregisters itself when dropped.
pub struct MemoryConnection {
    id: usize,
    serial: u64,
    // Topic of the endpoint this connection was accepted on.
    topic: String,
    hub: Weak<Mutex<HubState>>,
    receiver: mpsc::UnboundedReceiver<Bytes>,
    closed: bool,
}

impl MemoryConnection {
    fn unregister(&mut self) {
        if let Some(state) = self.hub.upgrade() {
            let mut state = state.lock();
            if state.entry_mut(self.id, self.serial).is_some() {
                state.subscribers.remove(self.id);
            }
        }
    }

    fn apply(&self, state: &mut HubState, command: Command) -> Result<()> {
        let Some(entry) = state.entry_mut(self.id, self.serial) else {
            return Err(Error::Closed);
        };
        match command {
            Command::Subscribe(name) => {
                entry.topics.insert(name);
            }
            Command::Unsubscribe(name) => {
                entry.topics.remove(&name);
            }
            Command::List => {
                let listing = entry
                    .topics
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("\n");
                let _ = entry.sender.send(Bytes::from(listing));
            }
            Command::Publish(text) => {
                state.fan_out(&self.topic, &Bytes::from(text));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        let line = std::str::from_utf8(&payload).map_err(|err| Error::Write(Box::new(err)))?;
        let command = Command::parse(line).map_err(|err| Error::Write(Box::new(err)))?;
        let Some(state) = self.hub.upgrade() else {
            return Err(Error::Closed);
        };
        let mut state = state.lock();
        self.apply(&mut state, command)
    }

    async fn receive(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.receiver.recv().await.ok_or(Error::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.unregister();
        self.receiver.close();
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.unregister();
    }
}
