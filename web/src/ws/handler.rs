use crate::AppState;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::StreamExt;
use hub::{Client, HubHandle};
use log::*;

/// WebSocket handler that hands every upgraded connection to the hub.
/// One Client per connection; it lives until either side closes the socket.
pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    let hub = app_state.hub.clone();
    let capacity = app_state.config.outbound_queue_capacity;
    let connections = app_state.connections.clone();

    ws.on_failed_upgrade(|e| error!("WebSocket upgrade error: {e}"))
        .on_upgrade(move |socket| {
            connections.track_future(serve_client(socket, hub, capacity))
        })
}

async fn serve_client(socket: WebSocket, hub: HubHandle, capacity: usize) {
    let (client, pumps) = Client::new(capacity);
    let client_id = client.id();

    // Registered before any frame is read, as the pumps rely on it
    if let Err(e) = hub.register(client).await {
        error!("Dropping connection {client_id}, hub rejected it: {e}");
        return;
    }

    let (sink, stream) = socket.split();
    pumps.run(sink, stream, hub).await;

    debug!("WebSocket connection for client {client_id} finished");
}
