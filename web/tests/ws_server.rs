//! Drives the server over a real TCP socket with a WebSocket client.

use anyhow::Result;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use hub::Hub;
use serde_json::{json, Value};
use service::config::Config;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use web::AppState;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Server {
    url: String,
    stop: oneshot::Sender<()>,
    serving: JoinHandle<web::error::Result<()>>,
}

async fn start_server() -> Result<Server> {
    let (hub, hub_handle) = Hub::new();
    tokio::spawn(hub.run());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app_state = AppState::new(Config::parse_from(["chat_hub_rs"]), hub_handle);

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(web::serve(listener, app_state, async move {
        let _ = stopped.await;
    }));

    Ok(Server {
        url: format!("ws://{addr}/ws"),
        stop,
        serving,
    })
}

async fn next_event(socket: &mut Socket) -> Result<Value> {
    loop {
        let frame = timeout(WAIT, socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        if let Message::Text(text) = frame {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[tokio::test]
async fn client_connects_chats_and_is_closed_on_shutdown() -> Result<()> {
    let server = start_server().await?;

    let (mut alice, _) = connect_async(&server.url).await?;
    assert_eq!(
        next_event(&mut alice).await?,
        json!({"type": "client_info", "totalClients": 1, "onlineUsers": []})
    );

    alice
        .send(Message::Text(
            json!({"type": "user_join", "userId": "alice"}).to_string(),
        ))
        .await?;
    alice
        .send(Message::Text(
            json!({"type": "message", "content": "hi", "senderId": "alice"}).to_string(),
        ))
        .await?;

    let echo = next_event(&mut alice).await?;
    assert_eq!(echo["type"], "message");
    assert_eq!(echo["content"], "hi");
    assert_eq!(echo["senderId"], "alice");
    assert!(echo["timestamp"].as_str().is_some_and(|t| !t.is_empty()));

    server.stop.send(()).ok();

    // The hub seals the queue, so the server closes the socket
    // Reading on past the close frame flushes our close reply
    let saw_close = timeout(WAIT, async {
        let mut saw_close = false;
        while let Some(frame) = alice.next().await {
            match frame {
                Ok(Message::Close(_)) => saw_close = true,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        saw_close
    })
    .await?;
    assert!(saw_close, "server never sent a close frame");

    // serve waits for the connection task to finish before returning
    timeout(WAIT, server.serving).await???;

    Ok(())
}

#[tokio::test]
async fn second_client_updates_presence_for_both() -> Result<()> {
    let server = start_server().await?;

    let (mut alice, _) = connect_async(&server.url).await?;
    next_event(&mut alice).await?;

    let (mut bob, _) = connect_async(&server.url).await?;
    assert_eq!(next_event(&mut bob).await?["totalClients"], 2);
    assert_eq!(next_event(&mut alice).await?["totalClients"], 2);

    bob.close(None).await?;
    assert_eq!(next_event(&mut alice).await?["totalClients"], 1);

    Ok(())
}
