use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::ChatStore;
use parley_types::events::GatewayCommand;

use crate::Gateway;
use crate::registry::Outbound;

/// Drive one WebSocket connection from accept to close.
///
/// The client must send `identify` first, naming a user the store knows.
/// After that the connection's outbound queue is forwarded to the socket
/// while inbound frames are read for pongs and close; when either side
/// stops, the session closes.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, store: Arc<dyn ChatStore>) {
    let (mut sender, mut receiver) = socket.split();
    let settings = gateway.settings().clone();

    let user_id = match wait_for_identify(&mut receiver, settings.identify_timeout).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    if !is_known_user(store, user_id).await {
        warn!("Identify as unknown user {}, closing", user_id);
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let (mut session, mut outbound_rx) = gateway.open_session();
    // Cannot fail on a fresh session
    if let Err(e) = session.identify(user_id) {
        warn!("{} could not bind: {}", user_id, e);
        return;
    }
    info!("{} connected to gateway", user_id);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let heartbeat_interval = settings.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                item = outbound_rx.recv() => {
                    match item {
                        Some(Outbound::Event(event)) => {
                            let text = match serde_json::to_string(&event) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Failed to encode event for {}: {}", user_id, e);
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close) => {
                            info!("Closing superseded connection for {}", user_id);
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping {}", missed_heartbeats, user_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Identify { user_id: other }) => {
                        warn!("{} sent identify again (as {}), ignoring", user_id, other);
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad command: {} -- raw: {}", user_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.close();
    info!("{} disconnected from gateway", user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    timeout: Duration,
) -> Option<Uuid> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Identify { user_id }) => return Some(user_id),
                    Err(e) => warn!("Expected identify, got bad command: {}", e),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    };

    tokio::time::timeout(timeout, identify).await.ok().flatten()
}

async fn is_known_user(store: Arc<dyn ChatStore>, user_id: Uuid) -> bool {
    match tokio::task::spawn_blocking(move || store.user_exists(user_id)).await {
        Ok(Ok(known)) => known,
        Ok(Err(e)) => {
            warn!("User lookup for {} failed: {:#}", user_id, e);
            false
        }
        Err(e) => {
            warn!("User lookup task for {} failed: {}", user_id, e);
            false
        }
    }
}
