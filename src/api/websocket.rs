use actix_web::{web, Error, HttpRequest, Responder};
use actix_ws::{self, Message};
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;

use crate::agent::registry::AgentRegistry;
use crate::models::agent::AgentSnapshot;

// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// Clients silent for this long are dropped
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// WebSocket message types that can be sent to clients
#[derive(Serialize)]
#[serde(tag = "type")]
enum WsOutMessage {
    /// Full roster, sent on connect and on request
    #[serde(rename = "agents")]
    Agents { agents: Vec<AgentSnapshot> },

    /// One agent changed
    #[serde(rename = "agent")]
    Agent { agent: AgentSnapshot },

    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
}

/// Handle WebSocket connections
pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    registry: web::Data<Arc<AgentRegistry>>,
) -> Result<impl Responder, Error> {
    let addr = req
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("WebSocket connection from: {}", addr);

    let (response, session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let registry = registry.get_ref().clone();
    let mut updates = registry.subscribe();

    actix_rt::spawn(async move {
        let last_seen = Arc::new(Mutex::new(Instant::now()));

        let mut initial = session.clone();
        if let Err(e) = send(&mut initial, &WsOutMessage::Agents { agents: registry.snapshots() }).await {
            warn!("Failed to send initial agent list: {}", e);
            return;
        }

        // Client messages: pings, pongs, close and the "agents" command
        let ws_msg_task = {
            let mut session = session.clone();
            let registry = registry.clone();
            let last_seen = last_seen.clone();

            async move {
                while let Some(Ok(msg)) = msg_stream.next().await {
                    *last_seen.lock() = Instant::now();
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Text(text) => {
                            debug!("Received text message: {}", text);
                            if text.trim() == "agents" {
                                let msg = WsOutMessage::Agents { agents: registry.snapshots() };
                                if send(&mut session, &msg).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        };

        // Agent state changes
        let updates_task = {
            let mut session = session.clone();
            let registry = registry.clone();

            async move {
                loop {
                    let msg = match updates.recv().await {
                        Ok(agent) => WsOutMessage::Agent { agent },
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("WebSocket client lagged by {} updates, resending roster", skipped);
                            WsOutMessage::Agents { agents: registry.snapshots() }
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if send(&mut session, &msg).await.is_err() {
                        break;
                    }
                }
            }
        };

        let heartbeat_task = {
            let mut session = session.clone();

            async move {
                let mut heartbeat = interval(HEARTBEAT_INTERVAL);
                loop {
                    heartbeat.tick().await;

                    if last_seen.lock().elapsed() > CLIENT_TIMEOUT {
                        warn!("WebSocket client heartbeat timed out");
                        let _ = session.close(None).await;
                        break;
                    }

                    let ping = WsOutMessage::Ping {
                        timestamp: chrono::Utc::now().timestamp() as u64,
                    };
                    if send(&mut session, &ping).await.is_err() {
                        break;
                    }
                    if session.ping(b"").await.is_err() {
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = ws_msg_task => {},
            _ = updates_task => {},
            _ = heartbeat_task => {},
        }

        info!("WebSocket connection from {} closed", addr);
    });

    Ok(response)
}

async fn send(session: &mut actix_ws::Session, msg: &WsOutMessage) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(msg) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            warn!("Failed to encode WebSocket message: {}", e);
            Ok(())
        }
    }
}
