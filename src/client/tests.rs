use std::time::Duration;

use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use super::pubsub_client::Client;
use crate::broker::{Message, MessageBroker};
use crate::config::Settings;
use crate::transport::ServerMessage;

#[test]
fn test_client_new() {
    let (tx, _) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    assert!(!client.id.is_empty());
    assert_eq!(client.subscription_count(), 0);
}

#[test]
fn test_send_reports_closed_channel() {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let frame = ServerMessage::Published {
        request_id: None,
        id: 1,
    };
    assert!(client.send(&frame));
    drop(rx);
    assert!(!client.send(&frame));
}

#[tokio::test]
async fn test_attached_subscription_is_forwarded() {
    let broker = crate::broker::build_broker(&Settings::default()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let mut client = Client::new(tx);

    client.attach(broker.subscribe("news").await.unwrap());
    broker
        .publish("news", Message::new("headline", Duration::from_secs(5)))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed: ServerMessage = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(
        parsed,
        ServerMessage::Message {
            subject: "news".into(),
            body: "headline".into()
        }
    );
}
