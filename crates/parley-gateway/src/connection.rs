use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, trace, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::events::{ChatEvent, ClientCommand};

use crate::dispatcher::Dispatcher;

/// Server sends a Ping every 15 seconds; two missed Pongs (~30s) drop the
/// connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a client gets to send Identify before the socket is closed.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, then forward
/// subscribed events until the client goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    // Resolve the local user record for the token's subject.
    let subject = claims.sub.clone();
    let lookup_db = db.clone();
    let user = match tokio::task::spawn_blocking(move || lookup_db.get_by_subject(&subject)).await {
        Ok(Ok(Some(user))) => user,
        Ok(Ok(None)) => {
            warn!("WebSocket subject {} has no user record, closing", claims.sub);
            return;
        }
        Ok(Err(e)) => {
            warn!("User lookup failed for gateway connection: {}", e);
            return;
        }
        Err(e) => {
            warn!("User lookup task failed: {}", e);
            return;
        }
    };

    let user_id = parley_db::models::parse_uuid(&user.id, "user id");
    info!("{} ({}) connected to gateway", user.name, user_id);

    let ready = ChatEvent::Ready { user_id };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut broadcast_rx = dispatcher.subscribe();
    let mut subscriptions: HashSet<Uuid> = HashSet::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            result = broadcast_rx.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} events", n);
                        continue;
                    }
                    Err(_) => break,
                };
                if !should_deliver(&event, &subscriptions) {
                    continue;
                }
                if sender
                    .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(ClientCommand::Subscribe { conversation_ids }) => {
                                trace!("{} subscribed to {} conversations", user_id, conversation_ids.len());
                                subscriptions = conversation_ids.into_iter().collect();
                            }
                            Ok(ClientCommand::Identify { .. }) => {
                                // Already identified; ignore.
                            }
                            Err(e) => trace!("Ignoring unparseable client command: {}", e),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_heartbeats = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        trace!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if missed_heartbeats >= 2 {
                    warn!("{} missed {} heartbeats, dropping", user_id, missed_heartbeats);
                    break;
                }
                missed_heartbeats += 1;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("{} disconnected from gateway", user_id);
}

/// Conversation-scoped events only go to clients subscribed to that
/// conversation; global events go to everyone.
fn should_deliver(event: &ChatEvent, subscriptions: &HashSet<Uuid>) -> bool {
    match event.conversation_id() {
        Some(conversation_id) => subscriptions.contains(&conversation_id),
        None => true,
    }
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    let deadline = tokio::time::sleep(IDENTIFY_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            msg = receiver.next() => {
                match msg? {
                    Ok(Message::Text(text)) => {
                        if let Ok(ClientCommand::Identify { token }) = serde_json::from_str(&text) {
                            return decode::<Claims>(
                                &token,
                                &DecodingKey::from_secret(jwt_secret.as_bytes()),
                                &Validation::default(),
                            )
                            .map(|data| data.claims)
                            .ok();
                        }
                        // Not an Identify; keep waiting until the deadline.
                    }
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => {}
                    Err(_) => return None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_events_respect_subscriptions() {
        let conversation_id = Uuid::new_v4();
        let event = ChatEvent::TypingUpdate {
            conversation_id,
            user_id: Uuid::new_v4(),
            is_typing: true,
        };

        let mut subs = HashSet::new();
        assert!(!should_deliver(&event, &subs));
        subs.insert(conversation_id);
        assert!(should_deliver(&event, &subs));
    }

    #[test]
    fn global_events_are_delivered_to_everyone() {
        let event = ChatEvent::PresenceUpdate {
            user_id: Uuid::new_v4(),
            online: false,
            last_seen: 0,
        };
        assert!(should_deliver(&event, &HashSet::new()));
    }
}
