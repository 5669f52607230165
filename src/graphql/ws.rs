//! Subscription multiplexer over an upgraded WebSocket (C12).
//!
//! Speaks the `graphql-transport-ws` sub-protocol. Each session owns a map
//! of subscription id → task handle: a duplicate `subscribe` id cancels the
//! running task first, client `complete` cancels one subscription, socket
//! close cancels them all without touching other sessions.
//!
//! Back-pressure: subscription tasks feed a capacity-1 channel, so a task
//! only polls its upstream for the next event after the previous `next`
//! frame has been handed to the transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::dynamic::Schema;
use async_graphql::{Request, Variables};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::fetch::BatchLoader;
use crate::graphql::complexity;
use crate::graphql::schema::RequestRole;

/// Messages a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ConnectionInit {
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<serde_json::Value>,
    },
    Ping {
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<serde_json::Value>,
    },
    Pong {
        #[serde(default)]
        #[allow(dead_code)]
        payload: Option<serde_json::Value>,
    },
    Subscribe { id: String, payload: SubscribePayload },
    Complete { id: String },
}

#[derive(Debug, Deserialize)]
struct SubscribePayload {
    query: String,
    #[serde(default)]
    variables: Option<serde_json::Value>,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

/// Messages the server sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Pong,
    Next { id: String, payload: serde_json::Value },
    Error { id: String, payload: serde_json::Value },
    Complete { id: String },
}

/// Limits applied to subscription documents before execution.
#[derive(Debug, Clone, Copy)]
pub struct WsLimits {
    pub max_depth: usize,
    pub max_complexity: usize,
}

/// Drive one WebSocket session to completion.
pub async fn serve(socket: WebSocket, schema: Schema, role: RequestRole, limits: WsLimits) {
    let (mut sink, mut source) = socket.split();
    // Capacity 1: the transport pulls exactly one event ahead.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(1);

    let mut acked = false;
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(message) = outgoing else { break };
                if send(&mut sink, &message).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                let Some(Ok(frame)) = incoming else { break };
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let parsed: Result<ClientMessage, _> = serde_json::from_str(text.as_str());
                let Ok(message) = parsed else {
                    tracing::debug!("unparseable ws frame, ignoring");
                    continue;
                };

                match message {
                    ClientMessage::ConnectionInit { .. } => {
                        acked = true;
                        if send(&mut sink, &ServerMessage::ConnectionAck).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::Ping { .. } => {
                        if send(&mut sink, &ServerMessage::Pong).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::Pong { .. } => {}
                    ClientMessage::Subscribe { id, payload } => {
                        if !acked {
                            // Protocol violation: subscribing before init.
                            break;
                        }
                        // A reused id replaces the running subscription.
                        if let Some(existing) = subscriptions.remove(&id) {
                            existing.abort();
                        }
                        match start_subscription(
                            &schema,
                            &role,
                            limits,
                            id.clone(),
                            payload,
                            out_tx.clone(),
                        ) {
                            Ok(handle) => {
                                subscriptions.insert(id, handle);
                            }
                            Err(err) => {
                                let message = ServerMessage::Error {
                                    id,
                                    payload: serde_json::json!([{ "message": err.to_string() }]),
                                };
                                if send(&mut sink, &message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    ClientMessage::Complete { id } => {
                        if let Some(handle) = subscriptions.remove(&id) {
                            handle.abort();
                            if send(&mut sink, &ServerMessage::Complete { id }).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    // Socket gone: cancel everything this session owns, nobody else's.
    for (_, handle) in subscriptions.drain() {
        handle.abort();
    }
}

fn start_subscription(
    schema: &Schema,
    role: &RequestRole,
    limits: WsLimits,
    id: String,
    payload: SubscribePayload,
    out_tx: mpsc::Sender<ServerMessage>,
) -> Result<JoinHandle<()>, ApiError> {
    let doc = async_graphql::parser::parse_query(&payload.query)
        .map_err(|e| ApiError::Validation(format!("parse error: {e}")))?;
    complexity::check_limits(&doc, limits.max_depth, limits.max_complexity)?;

    let mut request = Request::new(payload.query);
    if let Some(operation_name) = payload.operation_name {
        request = request.operation_name(operation_name);
    }
    if let Some(variables) = payload.variables {
        request = request.variables(Variables::from_json(variables));
    }
    request = request
        .data(role.clone())
        .data(Arc::new(BatchLoader::new()));

    let schema = schema.clone();
    let handle = tokio::spawn(async move {
        let mut stream = schema.execute_stream(request);
        while let Some(response) = stream.next().await {
            let message = if response.data == async_graphql::Value::Null
                && !response.errors.is_empty()
            {
                ServerMessage::Error {
                    id: id.clone(),
                    payload: serde_json::to_value(&response.errors)
                        .unwrap_or_else(|_| serde_json::json!([])),
                }
            } else {
                ServerMessage::Next {
                    id: id.clone(),
                    payload: serde_json::to_value(&response)
                        .unwrap_or_else(|_| serde_json::json!({})),
                }
            };
            let is_error = matches!(message, ServerMessage::Error { .. });
            if out_tx.send(message).await.is_err() {
                return;
            }
            if is_error {
                return;
            }
        }
        // Source completed: tell the client and release.
        let _ = out_tx.send(ServerMessage::Complete { id }).await;
    });
    Ok(handle)
}

async fn send(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message)
        .map_err(|e| axum::Error::new(std::io::Error::other(e)))?;
    sink.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn client_messages_deserialize() {
        let init: ClientMessage =
            serde_json::from_str(r#"{"type":"connection_init","payload":{}}"#).unwrap();
        assert_matches!(init, ClientMessage::ConnectionInit { .. });

        let subscribe: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","id":"1","payload":{"query":"subscription { customer_changes { table } }"}}"#,
        )
        .unwrap();
        match subscribe {
            ClientMessage::Subscribe { id, payload } => {
                assert_eq!(id, "1");
                assert!(payload.query.contains("customer_changes"));
                assert!(payload.variables.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }

        let complete: ClientMessage =
            serde_json::from_str(r#"{"type":"complete","id":"1"}"#).unwrap();
        assert_matches!(complete, ClientMessage::Complete { .. });
    }

    #[test]
    fn server_messages_serialize_with_protocol_tags() {
        let ack = serde_json::to_value(&ServerMessage::ConnectionAck).unwrap();
        assert_eq!(ack, serde_json::json!({"type": "connection_ack"}));

        let next = serde_json::to_value(&ServerMessage::Next {
            id: "7".into(),
            payload: serde_json::json!({"data": null}),
        })
        .unwrap();
        assert_eq!(next["type"], "next");
        assert_eq!(next["id"], "7");

        let complete =
            serde_json::to_value(&ServerMessage::Complete { id: "7".into() }).unwrap();
        assert_eq!(complete, serde_json::json!({"type": "complete", "id": "7"}));
    }
}
