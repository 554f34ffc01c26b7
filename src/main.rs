//! CLI for SubjectMQ
//!
//! Subcommands:
//! - `server`: run the WebSocket server
//! - `client`: run a short publish/subscribe/fetch round trip (useful for smoke tests)

use clap::Parser;
use subjectmq::broker::build_broker;
use subjectmq::config::load_config;
use subjectmq::transport::start_websocket_server;
use subjectmq::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "subjectmq")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Run the smoke client (subscribe, publish, fetch)
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                // Configuration errors happen before the configured logger exists.
                logging::init("info");
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Client { url } => {
            logging::init("info");
            if let Err(e) = run_client(&url).await {
                error!("Client failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_config()?;
    logging::init(&settings.logging.level);

    let broker = build_broker(&settings).await?;
    let addr = settings.addr();

    tokio::select! {
        result = start_websocket_server(&addr, broker.clone()) => {
            if let Err(e) = result {
                error!("WebSocket server exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    broker.close();
    Ok(())
}

async fn run_client(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;

    let requests = [
        json!({ "type": "subscribe", "request_id": 1, "subject": "smoke" }),
        json!({ "type": "publish", "request_id": 2, "subject": "smoke", "body": "hello", "expiration_seconds": 60 }),
        json!({ "type": "fetch", "request_id": 3, "subject": "smoke", "id": 1 }),
    ];

    for request in &requests {
        ws_stream
            .send(WsMessage::Text(request.to_string().into()))
            .await?;
    }

    // One reply per request plus the pushed message.
    for _ in 0..requests.len() + 1 {
        match tokio::time::timeout(std::time::Duration::from_secs(5), ws_stream.next()).await {
            Ok(Some(Ok(WsMessage::Text(frame)))) => info!("Received: {}", frame),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) | Err(_) => break,
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
