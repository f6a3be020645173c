use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use crate::events::{Envelope, HelloBody, ManifestAccumulator};
use crate::state::AppState;

pub async fn events_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(socket, state))
}

/// Ingests editor event envelopes, routing `hello`/manifest frames through the
/// Session Resolver and Reconciler and everything else through the Indexer,
/// acknowledging every type the transport contract names.
async fn handle_events_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("dropping malformed envelope: {}", e);
                continue;
            }
        };

        if envelope.source != "unity" {
            tracing::debug!("ignoring envelope from unrecognized source: {}", envelope.source);
            continue;
        }

        if let Err(e) = dispatch_envelope(&state, &envelope).await {
            tracing::warn!("event {} failed: {}", envelope.ty, e);
        }

        if crate::events::is_acknowledged(&envelope.ty) {
            let ack = json!({ "type": "ack", "id": envelope.id });
            if sender.send(Message::Text(ack.to_string().into())).await.is_err() {
                break;
            }
        }
    }
}

async fn dispatch_envelope(state: &AppState, envelope: &Envelope) -> crate::error::AppResult<()> {
    let orchestrator = &state.orchestrator;
    let session = envelope.session.clone();

    match envelope.ty.as_str() {
        "hello" => {
            let Some(session) = session else {
                return Err(crate::error::AppError::InvalidEnvelope("hello missing session".into()));
            };
            let hello: HelloBody = serde_json::from_value(envelope.body.clone())?;
            match orchestrator.sessions.resolve_from_hello(&session, &hello) {
                Some(root) => {
                    orchestrator.verify_snapshot_on_connect(&root).await?;
                    let buffered = orchestrator.sessions.mark_resolved(&session, root.clone());
                    for (ty, body) in buffered {
                        orchestrator
                            .indexer
                            .handle_event(&ty, Some(session.clone()), body, &root)
                            .await?;
                    }
                }
                None => {
                    orchestrator.sessions.buffer_event(&session, "hello", envelope.body.clone());
                }
            }
            Ok(())
        }
        "manifest_begin" => {
            if let Some(session) = &session {
                let total = envelope.body.get("total").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                orchestrator
                    .manifests
                    .entry(session.clone())
                    .or_insert_with(|| parking_lot::Mutex::new(ManifestAccumulator::default()))
                    .lock()
                    .begin(total);
            }
            Ok(())
        }
        "manifest_batch" => {
            if let Some(session) = &session {
                if let Some(entry) = orchestrator.manifests.get(session) {
                    let items = envelope
                        .body
                        .get("items")
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?
                        .unwrap_or_default();
                    entry.lock().batch(items);
                }
            }
            Ok(())
        }
        "manifest_end" => {
            if let Some(session) = &session {
                let total = envelope.body.get("total").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                if let Some(entry) = orchestrator.manifests.get(session) {
                    let items = entry.lock().end(total);
                    drop(entry);
                    if let Some(root) = orchestrator.sessions.resolved_root(session) {
                        orchestrator.reconciler.reconcile(&items, &root, Some(session)).await?;
                    }
                }
            }
            Ok(())
        }
        "hb" | "ack" => Ok(()),
        _ => match &session {
            Some(session) if orchestrator.sessions.is_resolved(session) => {
                let root = orchestrator.sessions.resolved_root(session).expect("resolved");
                orchestrator
                    .indexer
                    .handle_event(&envelope.ty, Some(session.clone()), envelope.body.clone(), &root)
                    .await
            }
            Some(session) => {
                orchestrator.sessions.buffer_event(session, &envelope.ty, envelope.body.clone());
                Ok(())
            }
            None => Err(crate::error::AppError::ResolutionUnresolved(
                "event has no session".into(),
            )),
        },
    }
}

pub async fn progress_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_progress_socket(socket, state))
}

async fn handle_progress_socket(socket: WebSocket, state: AppState) {
    let mut rx = state.orchestrator.progress.subscribe();
    let (mut sender, _receiver) = socket.split();

    loop {
        match rx.recv().await {
            Ok(status) => {
                if let Ok(json) = serde_json::to_string(&status) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("progress subscriber lagged, skipped {} events", n);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
