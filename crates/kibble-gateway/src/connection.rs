use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::error::PlatformError;
use crate::protocol::{self, Dispatch, FATAL_CLOSE_CODES, GatewayPayload, Hello, op};

/// Pause before re-establishing a dropped session.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for Hello after the socket opens.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a session ended without a fatal error.
#[derive(Debug)]
enum SessionEnd {
    /// The server asked us to reconnect, or closed the socket.
    Reconnect,
    /// Heartbeat ACK never arrived; the connection is a zombie.
    Zombie,
}

/// Keep a gateway session alive forever, publishing decoded events to the
/// dispatcher. Returns only on a fatal error (bad token, disallowed intents).
pub async fn run_gateway(token: String, dispatcher: Dispatcher) -> Result<(), PlatformError> {
    loop {
        match run_session(&token, &dispatcher).await {
            Ok(end) => info!(?end, "Gateway session ended, reconnecting"),
            Err(PlatformError::Gateway(reason)) if is_fatal(&reason) => {
                error!("Gateway rejected the session: {}", reason);
                return Err(PlatformError::Gateway(reason));
            }
            Err(e) => warn!("Gateway session failed: {}", e),
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn is_fatal(reason: &str) -> bool {
    FATAL_CLOSE_CODES
        .iter()
        .any(|code| reason.starts_with(&format!("close {code}")))
}

async fn run_session(token: &str, dispatcher: &Dispatcher) -> Result<SessionEnd, PlatformError> {
    let (socket, _) = connect_async(protocol::GATEWAY_URL).await?;
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Hello tells us the heartbeat cadence
    let hello = tokio::time::timeout(HELLO_TIMEOUT, async {
        while let Some(msg) = receiver.next().await {
            if let Message::Text(text) = msg? {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                if payload.op == op::HELLO {
                    return Ok(serde_json::from_value::<Hello>(payload.d)?);
                }
            }
        }
        Err(PlatformError::Gateway("socket closed before hello".into()))
    })
    .await
    .map_err(|_| PlatformError::Gateway("timed out waiting for hello".into()))??;

    // Step 2: Identify
    sender
        .send(Message::Text(protocol::identify(token).to_string().into()))
        .await?;

    let period = Duration::from_millis(hello.heartbeat_interval);
    let jitter = period.mul_f64(rand::rng().random::<f64>());
    let mut heartbeat = interval_at(Instant::now() + jitter, period);
    let mut seq: Option<u64> = None;
    let mut acked = true;

    debug!(interval_ms = hello.heartbeat_interval, "Gateway session identified");

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !acked {
                    warn!("Heartbeat not acknowledged, dropping connection");
                    return Ok(SessionEnd::Zombie);
                }
                acked = false;
                sender
                    .send(Message::Text(protocol::heartbeat(seq).to_string().into()))
                    .await?;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::Reconnect);
                };

                match msg? {
                    Message::Text(text) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(payload) => payload,
                            Err(e) => {
                                let raw: String = text.as_str().chars().take(200).collect();
                                warn!("Bad gateway payload: {} -- raw: {}", e, raw);
                                continue;
                            }
                        };
                        if payload.s.is_some() {
                            seq = payload.s;
                        }

                        match payload.op {
                            op::DISPATCH => {
                                let name = payload.t.unwrap_or_default();
                                handle_dispatch(dispatcher, &name, payload.d).await;
                            }
                            op::HEARTBEAT => {
                                sender
                                    .send(Message::Text(protocol::heartbeat(seq).to_string().into()))
                                    .await?;
                            }
                            op::HEARTBEAT_ACK => acked = true,
                            op::RECONNECT | op::INVALID_SESSION => {
                                info!(op = payload.op, "Gateway asked us to reconnect");
                                return Ok(SessionEnd::Reconnect);
                            }
                            other => trace!(op = other, "Ignoring gateway opcode"),
                        }
                    }
                    Message::Close(frame) => {
                        if let Some(frame) = frame {
                            let code = u16::from(frame.code);
                            if FATAL_CLOSE_CODES.contains(&code) {
                                return Err(PlatformError::Gateway(format!(
                                    "close {}: {}",
                                    code, frame.reason.as_str()
                                )));
                            }
                            info!(code, reason = frame.reason.as_str(), "Gateway closed the socket");
                        }
                        return Ok(SessionEnd::Reconnect);
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_dispatch(dispatcher: &Dispatcher, name: &str, data: serde_json::Value) {
    match protocol::decode_dispatch(name, data) {
        Ok(Dispatch::Event(event)) => dispatcher.publish(event).await,
        Ok(Dispatch::GuildVoiceStates { guild_id, states }) => {
            debug!(%guild_id, occupants = states.len(), "Guild available");
            dispatcher.load_guild_voice_states(guild_id, states).await;
        }
        Ok(Dispatch::Ignored) => trace!(event = name, "Ignoring dispatch"),
        Err(e) => warn!(event = name, "Failed to decode dispatch: {}", e),
    }
}
