use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Message, MessageBroker};
use crate::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage, StatusCode};
use crate::utils::TransportError;

/// Bind `addr` and serve WebSocket clients until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    broker: Arc<dyn MessageBroker>,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, broker).await
}

/// Serve WebSocket clients on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<dyn MessageBroker>,
) -> Result<(), TransportError> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, broker).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    broker: Arc<dyn MessageBroker>,
) -> Result<(), TransportError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Replies and subscription pushes share this channel.
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let mut client = Client::new(tx);
    let client_id = client.id.clone();
    info!(client_id, "client connected");

    let send_loop = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!(error = %e, "failed to send frame");
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(client_id, error = %e, "read failed");
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(request) => handle_client_message(broker.as_ref(), &mut client, request).await,
            Err(err) => {
                warn!(
                    client_id,
                    error = %err,
                    frame = %text.as_str().chars().take(100).collect::<String>(),
                    "invalid client message"
                );
                ServerMessage::Error {
                    request_id: None,
                    code: StatusCode::InvalidArgument,
                    message: format!("invalid message: {err}"),
                }
            }
        };
        client.send(&reply);
    }

    // Aborts subscription forwarding and closes the outbound channel.
    drop(client);
    let _ = send_loop.await;
    info!(client_id, "client disconnected");
    Ok(())
}

/// Run one client request against the broker and build its reply.
pub async fn handle_client_message(
    broker: &dyn MessageBroker,
    client: &mut Client,
    request: ClientMessage,
) -> ServerMessage {
    match request {
        ClientMessage::Publish {
            request_id,
            subject,
            body,
            expiration_seconds,
        } => {
            let message = Message::new(body, Duration::from_secs(expiration_seconds));
            match broker.publish(&subject, message).await {
                Ok(id) => {
                    debug!(client_id = client.id, subject, id, "published");
                    ServerMessage::Published { request_id, id }
                }
                Err(err) => ServerMessage::from_error(request_id, &err),
            }
        }
        ClientMessage::Subscribe {
            request_id,
            subject,
        } => match broker.subscribe(&subject).await {
            Ok(subscription) => {
                client.attach(subscription);
                info!(client_id = client.id, subject, "subscribed");
                ServerMessage::Subscribed {
                    request_id,
                    subject,
                }
            }
            Err(err) => ServerMessage::from_error(request_id, &err),
        },
        ClientMessage::Fetch {
            request_id,
            subject,
            id,
        } => match broker.fetch(&subject, id).await {
            Ok(message) => ServerMessage::Fetched {
                request_id,
                body: String::from_utf8_lossy(&message.body).into_owned(),
            },
            Err(err) => ServerMessage::from_error(request_id, &err),
        },
    }
}
