use crate::error::Error;
use crate::hub::HubHandle;
use crate::message::{self, ChatMessage, Envelope, Inbound, UserId};
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::*;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Unique identifier for a client connection (server-generated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User id announced by the connection itself. Written at most once by the
/// inbound pump, read by the hub when the client is registered.
type Identity = Arc<OnceLock<UserId>>;

/// The hub's half of a client: the only producer of its outbound queue.
///
/// Dropping a `Client` seals its queue. Once the pending events are drained
/// the outbound pump sends a close frame and stops.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    identity: Identity,
    outbound: mpsc::Sender<Envelope>,
}

/// The connection's half of a client: everything the two pumps need.
#[derive(Debug)]
pub struct ClientPumps {
    id: ClientId,
    identity: Identity,
    pub(crate) outbound: mpsc::Receiver<Envelope>,
}

impl Client {
    /// Creates a client whose outbound queue holds at most `capacity` events.
    pub fn new(capacity: usize) -> (Client, ClientPumps) {
        let id = ClientId::new();
        let identity = Identity::default();
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let client = Client {
            id,
            identity: Arc::clone(&identity),
            outbound: tx,
        };
        let pumps = ClientPumps {
            id,
            identity,
            outbound: rx,
        };

        (client, pumps)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.get().map(String::as_str)
    }

    /// Binds a user id before the client is handed to the hub, so that
    /// registration indexes it. Returns `false` if the id is empty or the
    /// client already has one.
    pub fn identify(&self, user_id: impl Into<UserId>) -> bool {
        bind_identity(self.id, &self.identity, user_id.into())
    }

    /// Non-blocking enqueue. Fails when the queue is full or the outbound pump
    /// has already gone away.
    pub(crate) fn try_deliver(&self, envelope: Envelope) -> Result<(), TrySendError<Envelope>> {
        self.outbound.try_send(envelope)
    }

    /// Closes the outbound queue. Events already queued are still written.
    pub(crate) fn seal(self) {
        trace!("Sealing outbound queue of client {}", self.id);
    }
}

/// How the inbound side of a connection ended.
#[derive(Debug, PartialEq)]
enum Disconnect {
    Graceful,
    Abnormal(String),
}

impl ClientPumps {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Runs both pumps over a split duplex connection until both have finished.
    ///
    /// The outbound pump runs on its own task; the inbound pump runs on the
    /// caller's task and unregisters the client from `hub` when the
    /// connection's read side ends.
    pub async fn run<W, R, E>(self, sink: W, stream: R, hub: HubHandle)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Into<Box<dyn StdError + Send + Sync>>,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let ClientPumps {
            id,
            identity,
            outbound,
        } = self;

        let writer = tokio::spawn(outbound_pump(id, outbound, sink));
        inbound_pump(id, identity, stream, hub).await;

        if let Err(e) = writer.await {
            error!("Outbound pump of client {id} panicked: {e}");
        }
    }
}

/// Reads frames until the connection ends, dispatching each decoded envelope.
async fn inbound_pump<R, E>(id: ClientId, identity: Identity, mut stream: R, hub: HubHandle)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let disconnect = loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Disconnect::Abnormal(Error::connection(e).to_string()),
            None => break Disconnect::Graceful,
        };

        let text = match frame {
            Message::Text(text) => Ok(text),
            Message::Binary(bytes) => binary_text(bytes),
            // Pings are answered by the WebSocket layer
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(frame) => break classify_close(frame),
        };

        let dispatched = match text {
            Ok(text) => dispatch(id, &identity, &text, &hub).await,
            Err(e) => Err(e),
        };

        match dispatched {
            Ok(()) => {}
            Err(e) if e.is_decode() => {
                warn!("Skipping undecodable frame from client {id}: {e}");
            }
            Err(e) => {
                warn!("Client {id} stopped reading: {e}");
                break Disconnect::Graceful;
            }
        }
    };

    match disconnect {
        Disconnect::Graceful => debug!("Client {id} closed its connection"),
        Disconnect::Abnormal(reason) => error!("Connection of client {id} failed: {reason}"),
    }

    if let Err(e) = hub.unregister(id).await {
        debug!("Could not unregister client {id}: {e}");
    }
}

/// Binary frames carry the same JSON envelopes as text frames.
fn binary_text(bytes: Vec<u8>) -> Result<String, Error> {
    Ok(String::from_utf8(bytes)?)
}

async fn dispatch(
    id: ClientId,
    identity: &OnceLock<UserId>,
    text: &str,
    hub: &HubHandle,
) -> Result<(), Error> {
    match message::decode(text)? {
        Inbound::Envelope(Envelope::UserJoin(join)) => {
            bind_identity(id, identity, join.user_id);
            Ok(())
        }
        Inbound::Envelope(Envelope::ChatMessage(chat)) => {
            let chat: ChatMessage = chat.stamp();
            info!(
                "Message received from {}: {}",
                chat.sender_id, chat.content
            );
            hub.broadcast(Envelope::ChatMessage(chat)).await
        }
        Inbound::Envelope(Envelope::ClientInfo(_)) => {
            warn!("Ignoring client_info sent by client {id}");
            Ok(())
        }
        Inbound::Ignored { tag } => {
            warn!("Ignoring frame with unrecognized type {tag:?} from client {id}");
            Ok(())
        }
    }
}

/// Records the user id a client announced. The hub's user index is only
/// updated at registration, so a join after that point is not reflected in
/// presence snapshots.
fn bind_identity(id: ClientId, identity: &OnceLock<UserId>, user_id: UserId) -> bool {
    if user_id.is_empty() {
        warn!("Client {id} sent an empty userId");
        return false;
    }

    match identity.set(user_id) {
        Ok(()) => {
            info!(
                "User joined: {} (client {id})",
                identity.get().map(String::as_str).unwrap_or_default()
            );
            true
        }
        Err(rejected) => {
            if identity.get() != Some(&rejected) {
                warn!(
                    "Client {id} already joined as {:?}, ignoring {rejected:?}",
                    identity.get()
                );
            }
            false
        }
    }
}

fn classify_close(frame: Option<CloseFrame<'static>>) -> Disconnect {
    match frame {
        None => Disconnect::Graceful,
        Some(frame) if frame.code == close_code::NORMAL || frame.code == close_code::AWAY => {
            Disconnect::Graceful
        }
        Some(frame) => Disconnect::Abnormal(format!(
            "closed with code {} ({})",
            frame.code, frame.reason
        )),
    }
}

/// Writes queued envelopes to the connection in FIFO order. Sends a close
/// frame once the hub seals the queue and it has been drained.
async fn outbound_pump<W>(id: ClientId, mut outbound: mpsc::Receiver<Envelope>, mut sink: W)
where
    W: Sink<Message> + Unpin,
    W::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    while let Some(envelope) = outbound.recv().await {
        let text = match message::encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} event for client {id}: {e}", envelope.kind());
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            error!("Write to client {id} failed: {}", Error::connection(e));
            return;
        }
    }

    debug!("Outbound queue of client {id} sealed, closing connection");
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("Close frame to client {id} not delivered: {}", Error::connection(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::message::Presence;
    use futures::channel::mpsc as wire;
    use std::borrow::Cow;
    use std::time::Duration;
    use tokio::time::timeout;

    fn chat(content: &str) -> Envelope {
        Envelope::ChatMessage(ChatMessage {
            content: content.to_string(),
            sender_id: "alice".to_string(),
            timestamp: Some("2024-01-01T00:00:00Z".to_string()),
        })
    }

    fn text_of(frame: &Message) -> &str {
        match frame {
            Message::Text(text) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outbound_pump_writes_in_fifo_order_then_closes() {
        let (client, pumps) = Client::new(8);
        client.try_deliver(chat("first")).unwrap();
        client.try_deliver(chat("second")).unwrap();
        client.seal();

        let (sink, written) = wire::unbounded::<Message>();
        outbound_pump(pumps.id, pumps.outbound, sink).await;

        let frames: Vec<Message> = written.collect().await;
        assert_eq!(frames.len(), 3);
        assert!(text_of(&frames[0]).contains("first"));
        assert!(text_of(&frames[1]).contains("second"));
        assert!(matches!(frames[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn test_outbound_pump_stops_on_write_failure() {
        let (client, pumps) = Client::new(8);
        client.try_deliver(chat("lost")).unwrap();

        let (sink, written) = wire::unbounded::<Message>();
        drop(written);

        // The pump must return even though the queue is still open
        timeout(
            Duration::from_secs(1),
            outbound_pump(pumps.id, pumps.outbound, sink),
        )
        .await
        .expect("outbound pump should stop after a failed write");

        // Its receiver is gone, so further deliveries fail
        assert!(matches!(
            client.try_deliver(chat("after")),
            Err(TrySendError::Closed(_))
        ));
    }

    #[test]
    fn test_try_deliver_reports_full_queue() {
        let (client, _pumps) = Client::new(2);
        client.try_deliver(chat("1")).unwrap();
        client.try_deliver(chat("2")).unwrap();
        assert!(matches!(
            client.try_deliver(chat("3")),
            Err(TrySendError::Full(_))
        ));
    }

    #[test]
    fn test_identity_is_set_once() {
        let (client, pumps) = Client::new(1);
        assert_eq!(client.user_id(), None);

        assert!(!bind_identity(pumps.id, &pumps.identity, String::new()));
        assert_eq!(client.user_id(), None);

        assert!(bind_identity(pumps.id, &pumps.identity, "alice".to_string()));
        assert!(!client.identify("mallory"));
        assert_eq!(client.user_id(), Some("alice"));
    }

    #[test]
    fn test_classify_close() {
        assert_eq!(classify_close(None), Disconnect::Graceful);
        assert_eq!(
            classify_close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: Cow::from(""),
            })),
            Disconnect::Graceful
        );
        assert_eq!(
            classify_close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: Cow::from("tab closed"),
            })),
            Disconnect::Graceful
        );
        assert!(matches!(
            classify_close(Some(CloseFrame {
                code: close_code::PROTOCOL,
                reason: Cow::from("bad frame"),
            })),
            Disconnect::Abnormal(_)
        ));
    }

    #[test]
    fn test_binary_frames_must_be_utf8() {
        assert_eq!(
            binary_text(br#"{"type":"message"}"#.to_vec()).unwrap(),
            r#"{"type":"message"}"#
        );
        assert!(binary_text(vec![0xff, 0xfe]).unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn test_inbound_pump_skips_bad_frames_and_unregisters_on_close() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (client, pumps) = Client::new(8);
        let client_id = client.id();
        handle.register(client).await.unwrap();

        let (frames_tx, frames_rx) = wire::unbounded::<Result<Message, String>>();
        for frame in [
            Message::Text("not json".to_string()),
            Message::Text(r#"{"type":"typing"}"#.to_string()),
            Message::Binary(vec![0xff, 0xfe]),
            Message::Ping(vec![1]),
            Message::Text(r#"{"type":"user_join","userId":"alice"}"#.to_string()),
            Message::Close(None),
        ] {
            frames_tx.unbounded_send(Ok(frame)).unwrap();
        }

        inbound_pump(client_id, Arc::clone(&pumps.identity), frames_rx, handle.clone()).await;

        assert_eq!(pumps.identity.get().map(String::as_str), Some("alice"));
        assert_eq!(handle.presence().await.unwrap(), Presence::default());
    }

    #[tokio::test]
    async fn test_inbound_pump_unregisters_on_read_error() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (client, pumps) = Client::new(8);
        handle.register(client).await.unwrap();

        let (frames_tx, frames_rx) = wire::unbounded::<Result<Message, String>>();
        frames_tx
            .unbounded_send(Err("connection reset".to_string()))
            .unwrap();

        inbound_pump(pumps.id, pumps.identity, frames_rx, handle.clone()).await;

        assert_eq!(handle.presence().await.unwrap().total_clients, 0);
    }

    #[tokio::test]
    async fn test_chat_message_is_stamped_and_echoed_to_sender() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (client, mut pumps) = Client::new(8);
        handle.register(client).await.unwrap();

        // Registration snapshot first
        let first = pumps.outbound.recv().await.unwrap();
        assert!(matches!(first, Envelope::ClientInfo(_)));

        dispatch(
            pumps.id,
            &pumps.identity,
            r#"{"type":"message","content":"hi","senderId":"alice"}"#,
            &handle,
        )
        .await
        .unwrap();

        let Envelope::ChatMessage(echo) = pumps.outbound.recv().await.unwrap() else {
            panic!("expected the chat message to be echoed");
        };
        assert_eq!(echo.content, "hi");
        assert_eq!(echo.sender_id, "alice");
        assert!(echo.timestamp.is_some_and(|t| !t.is_empty()));
    }
}
