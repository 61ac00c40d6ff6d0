use crate::client::{Client, ClientId};
use crate::error::Error;
use crate::message::{Envelope, Presence};
use crate::registry::Registry;
use log::*;
use tokio::sync::{mpsc, oneshot};

/// Events that may wait in each of the hub's inbound channels before
/// producers start waiting for the control loop.
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

struct Registration {
    client: Client,
    ack: oneshot::Sender<Presence>,
}

struct Unregistration {
    id: ClientId,
    ack: oneshot::Sender<bool>,
}

enum Control {
    Presence(oneshot::Sender<Presence>),
    Shutdown,
}

/// The control loop that owns the registry of connected clients.
///
/// Registration, unregistration and broadcast requests arrive on separate
/// channels. Each loop iteration handles exactly one of them, so a registry
/// mutation and the `client_info` broadcast it triggers are never interleaved
/// with another event. Requests from one producer on one channel are handled
/// in the order they were sent; there is no ordering across channels.
pub struct Hub {
    registry: Registry,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Unregistration>,
    broadcast_rx: mpsc::Receiver<Envelope>,
    control_rx: mpsc::Receiver<Control>,
}

/// Cloneable entry points into a running [`Hub`].
#[derive(Clone, Debug)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Unregistration>,
    broadcast_tx: mpsc::Sender<Envelope>,
    control_tx: mpsc::Sender<Control>,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let hub = Hub {
            registry: Registry::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            control_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            control_tx,
        };

        (hub, handle)
    }

    /// Runs the control loop until [`HubHandle::shutdown`] is called or every
    /// handle has been dropped. All remaining client queues are sealed on exit.
    pub async fn run(self) {
        let Hub {
            mut registry,
            mut register_rx,
            mut unregister_rx,
            mut broadcast_rx,
            mut control_rx,
        } = self;

        info!("Hub control loop started");

        loop {
            tokio::select! {
                Some(Registration { client, ack }) = register_rx.recv() => {
                    let presence = register(&mut registry, client);
                    let _ = ack.send(presence);
                }
                Some(Unregistration { id, ack }) = unregister_rx.recv() => {
                    let removed = unregister(&mut registry, id);
                    let _ = ack.send(removed);
                }
                Some(envelope) = broadcast_rx.recv() => {
                    trace!("Broadcasting {} event", envelope.kind());
                    broadcast(&mut registry, &envelope);
                }
                control = control_rx.recv() => match control {
                    Some(Control::Presence(reply)) => {
                        let _ = reply.send(registry.presence());
                    }
                    Some(Control::Shutdown) => {
                        info!("Hub shutdown requested");
                        break;
                    }
                    None => {
                        info!("Every hub handle was dropped");
                        break;
                    }
                },
            }
        }

        let sealed = registry.seal_all();
        info!("Hub control loop stopped, sealed {sealed} client queue(s)");
    }
}

fn register(registry: &mut Registry, client: Client) -> Presence {
    let id = client.id();
    let user_id = client.user_id().unwrap_or("-").to_owned();

    registry.insert(client);
    let presence = registry.presence();

    info!(
        "New client connected: {id} ({user_id}). Total clients: {}",
        presence.total_clients
    );

    broadcast(registry, &presence.clone().into());
    presence
}

/// Returns `false`, without broadcasting, when `id` is not registered.
fn unregister(registry: &mut Registry, id: ClientId) -> bool {
    if !registry.contains(&id) {
        debug!("Client {id} is not registered, nothing to unregister");
        return false;
    }

    if let Some(client) = registry.remove(&id) {
        let user_id = client.user_id().unwrap_or("-").to_owned();
        client.seal();

        let presence = registry.presence();
        info!(
            "Client disconnected: {id} ({user_id}). Total clients: {}",
            presence.total_clients
        );

        broadcast(registry, &presence.into());
    }

    true
}

/// Fans `envelope` out to every registered client. Evicting slow consumers
/// changes presence, so a fresh `client_info` follows until a pass completes
/// without evictions.
fn broadcast(registry: &mut Registry, envelope: &Envelope) {
    let mut evicted = registry.fan_out(envelope);

    while evicted > 0 {
        let presence = registry.presence();
        info!(
            "Evicted {evicted} slow client(s). Total clients: {}",
            presence.total_clients
        );
        evicted = registry.fan_out(&presence.into());
    }
}

impl HubHandle {
    /// Hands `client` to the hub. Resolves once it is registered and its
    /// presence snapshot has been broadcast.
    pub async fn register(&self, client: Client) -> Result<Presence, Error> {
        let (ack, registered) = oneshot::channel();
        self.register_tx
            .send(Registration { client, ack })
            .await
            .map_err(|_| Error::hub_unavailable())?;

        registered.await.map_err(|_| Error::hub_unavailable())
    }

    /// Removes the client with `id`. Resolves to `false` if it was not
    /// registered, for example because it had already been evicted.
    pub async fn unregister(&self, id: ClientId) -> Result<bool, Error> {
        let (ack, removed) = oneshot::channel();
        self.unregister_tx
            .send(Unregistration { id, ack })
            .await
            .map_err(|_| Error::hub_unavailable())?;

        removed.await.map_err(|_| Error::hub_unavailable())
    }

    /// Queues `envelope` for delivery to every registered client.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), Error> {
        self.broadcast_tx
            .send(envelope)
            .await
            .map_err(|_| Error::hub_unavailable())
    }

    /// Current registry snapshot, served by the control loop.
    pub async fn presence(&self) -> Result<Presence, Error> {
        let (reply, snapshot) = oneshot::channel();
        self.control_tx
            .send(Control::Presence(reply))
            .await
            .map_err(|_| Error::hub_unavailable())?;

        snapshot.await.map_err(|_| Error::hub_unavailable())
    }

    /// Asks the control loop to seal every client's queue and stop.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.control_tx
            .send(Control::Shutdown)
            .await
            .map_err(|_| Error::hub_unavailable())
    }
}
