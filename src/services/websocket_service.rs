use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{InboundMessage, OutboundMessage},
    error::ServiceError,
    state::{ConnectionId, SharedState},
};

/// Handle the full lifecycle of one participant WebSocket connection.
///
/// The first frame must be an identity claim, received within the configured timeout. Every
/// later frame is parsed here and forwarded to the session coordinator; replies come back on the
/// outbound channel registered with the coordinator.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Message>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = frames_rx.recv() => Some(frame),
                Some(message) = outbound_rx.recv() => encode(&message),
                else => break,
            };
            let Some(frame) = frame else {
                continue;
            };
            let closing = matches!(frame, Message::Close(_));
            if sender.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(
        state.config().ident_timeout,
        receiver.next(),
    )
    .await
    {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, frames_tx, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = frames_tx.send(Message::Close(None));
            finalize(writer_task, frames_tx, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(connection_id = %connection, error = %err, "websocket receive error");
            finalize(writer_task, frames_tx, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(connection_id = %connection, "websocket identification timed out");
            let _ = frames_tx.send(Message::Close(None));
            finalize(writer_task, frames_tx, outbound_tx).await;
            return;
        }
    };

    let identify = match InboundMessage::from_json_str(&initial_message) {
        Ok(message @ InboundMessage::Identify { .. }) => message,
        Ok(_) => {
            warn!(connection_id = %connection, "first message was not an identity claim");
            reject(
                &outbound_tx,
                &ServiceError::Unauthorized("identify before sending other messages".into()),
            );
            let _ = frames_tx.send(Message::Close(None));
            finalize(writer_task, frames_tx, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(connection_id = %connection, error = %err, "failed to parse or validate identity claim");
            reject(&outbound_tx, &err);
            let _ = frames_tx.send(Message::Close(None));
            finalize(writer_task, frames_tx, outbound_tx).await;
            return;
        }
    };

    let hub = state.hub();
    if !hub.connect(connection, outbound_tx.clone()) {
        finalize(writer_task, frames_tx, outbound_tx).await;
        return;
    }
    info!(
        connection_id = %connection,
        participant = identify.identification_name().unwrap_or_default(),
        "participant connected"
    );
    hub.inbound(connection, identify);

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection_id = %connection, payload = %text, "received participant message");
                match InboundMessage::from_json_str(&text) {
                    Ok(message) => {
                        if !hub.inbound(connection, message) {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(connection_id = %connection, error = %err, "failed to parse or validate participant message");
                        reject(&outbound_tx, &err);
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = frames_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection_id = %connection, "participant closed the connection");
                let _ = frames_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    hub.disconnect(connection);
    finalize(writer_task, frames_tx, outbound_tx).await;
}

/// Report a rejected frame straight to the client without involving the coordinator.
fn reject(outbound_tx: &mpsc::UnboundedSender<OutboundMessage>, err: &ServiceError) {
    let _ = outbound_tx.send(OutboundMessage::error(err));
}

/// Serialize an outbound event into a text frame.
///
/// Serialization failure is a bug in the payload types; the event is logged and skipped.
fn encode(message: &OutboundMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{message:?}`");
            None
        }
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(
    writer_task: JoinHandle<()>,
    frames_tx: mpsc::UnboundedSender<Message>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
) {
    drop(frames_tx);
    drop(outbound_tx);
    let _ = writer_task.await;
}
