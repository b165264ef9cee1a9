//! Per-session protocol loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{abortable, AbortHandle};
use futures::FutureExt;
use hostlink_core::protocol::{
    JsonRpcNotification, JsonRpcRequest, INTERNAL_ERROR, INVALID_REQUEST,
};
use hostlink_core::{JsonRpcMessage, RequestId};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::protocol::ProtocolHandler;
use crate::transport::SessionTransport;

/// Distinguishes calls that reuse a request id after a cancellation.
static NEXT_CALL: AtomicU64 = AtomicU64::new(0);

/// An inbound request whose response has not been sent yet.
struct PendingCall {
    seq: u64,
    method: String,
    started: Instant,
    abort: AbortHandle,
}

type PendingCalls = Arc<Mutex<HashMap<RequestId, PendingCall>>>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: RequestId,
}

/// Consume the session's inbound messages until the session closes or
/// `shutdown` fires, then close the transport.
///
/// Requests run concurrently so one slow capability does not hold up the
/// session. A `notifications/cancelled` stops waiting for the named request
/// and suppresses its response; host work already queued still runs.
pub async fn run_session(
    transport: Arc<SessionTransport>,
    handler: Arc<ProtocolHandler>,
    keep_alive: Duration,
    shutdown: CancellationToken,
) {
    let span = tracing::info_span!("session", session_id = %transport.token());
    async move {
        let pending: PendingCalls = Arc::default();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keep_alive, keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = transport.receive() => match message {
                    Some(JsonRpcMessage::Request(request)) => {
                        dispatch(&transport, &handler, &pending, request).await;
                    }
                    Some(JsonRpcMessage::Notification(notification)) => {
                        on_notification(&handler, &pending, &notification);
                    }
                    Some(JsonRpcMessage::Response(response)) => {
                        debug!(id = %response.id, "ignoring client response");
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if transport.send_keep_alive().await.is_err() {
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
            }
        }

        let outstanding: Vec<PendingCall> = pending.lock().drain().map(|(_, call)| call).collect();
        for call in &outstanding {
            call.abort.abort();
            debug!(
                method = %call.method,
                elapsed_ms = call.started.elapsed().as_millis() as u64,
                "abandoning in-flight request"
            );
        }
        let _ = transport.close();
        info!(abandoned = outstanding.len(), "session ended");
    }
    .instrument(span)
    .await;
}

async fn dispatch(
    transport: &Arc<SessionTransport>,
    handler: &Arc<ProtocolHandler>,
    pending: &PendingCalls,
    request: JsonRpcRequest,
) {
    let id = request.id.clone();
    let method = request.method.clone();
    let seq = NEXT_CALL.fetch_add(1, Ordering::Relaxed);

    let handler_for_call = Arc::clone(handler);
    let (call, abort) = abortable(
        AssertUnwindSafe(async move { handler_for_call.handle_request(request).await }).catch_unwind(),
    );
    let duplicate = {
        let mut calls = pending.lock();
        if calls.contains_key(&id) {
            true
        } else {
            let _ = calls.insert(
                id.clone(),
                PendingCall {
                    seq,
                    method: method.clone(),
                    started: Instant::now(),
                    abort,
                },
            );
            false
        }
    };
    if duplicate {
        debug!(%id, "duplicate request id");
        let reply = JsonRpcMessage::error(
            id.clone(),
            INVALID_REQUEST,
            format!("Request id {id} is already in flight"),
            None,
        );
        let _ = transport.send(&reply).await;
        return;
    }

    let transport = Arc::clone(transport);
    let pending = Arc::clone(pending);
    let _ = tokio::spawn(
        async move {
            let outcome = call.await;
            let finished = finish(&pending, &id, seq);
            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(_panic)) => {
                    error!(%id, "request handler panicked");
                    JsonRpcMessage::error(id.clone(), INTERNAL_ERROR, "Internal error", None)
                }
                Err(_aborted) => {
                    debug!("request cancelled");
                    return;
                }
            };
            if let Some(call) = finished {
                debug!(
                    elapsed_ms = call.started.elapsed().as_millis() as u64,
                    "request complete"
                );
            }
            if let Err(e) = transport.send(&response).await {
                debug!(error = %e, "response dropped");
            }
        }
        .instrument(tracing::debug_span!("request", %method)),
    );
}

/// Remove `id` from the pending table unless the entry now belongs to a
/// later request that reused the id.
fn finish(pending: &PendingCalls, id: &RequestId, seq: u64) -> Option<PendingCall> {
    let mut calls = pending.lock();
    match calls.get(id) {
        Some(call) if call.seq == seq => calls.remove(id),
        _ => None,
    }
}

fn on_notification(
    handler: &ProtocolHandler,
    pending: &PendingCalls,
    notification: &JsonRpcNotification,
) {
    if notification.method != "notifications/cancelled" {
        handler.handle_notification(notification);
        return;
    }
    let Some(params) = notification
        .params
        .clone()
        .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
    else {
        debug!("cancellation without a usable requestId");
        return;
    };
    match pending.lock().remove(&params.request_id) {
        Some(call) => {
            call.abort.abort();
            debug!(id = %params.request_id, method = %call.method, "request cancelled by client");
        }
        None => debug!(id = %params.request_id, "cancellation for unknown request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerInfo;
    use crate::sink::ChannelSink;
    use bytes::Bytes;
    use hostlink_core::SessionToken;
    use hostlink_tools::providers::echo;
    use hostlink_tools::{Capability, CapabilityFacade, NoArgs, RegistryBuilder};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct Harness {
        transport: Arc<SessionTransport>,
        frames: mpsc::Receiver<Bytes>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(keep_alive: Duration) -> Harness {
        let registry = RegistryBuilder::new()
            .function(echo::capability())
            .function(Capability::new("stall", "Never finishes", json!({}), |_: NoArgs| async {
                futures::future::pending::<Result<(), _>>().await
            }))
            .function(Capability::sync("explode", "Panics", json!({}), |_: NoArgs| -> Result<(), _> {
                panic!("boom")
            }))
            .build()
            .unwrap();
        let handler = Arc::new(ProtocolHandler::new(
            CapabilityFacade::new(Arc::new(registry)),
            ServerInfo {
                name: "hostlink".into(),
                version: "0.1.0".into(),
            },
        ));
        let (tx, frames) = mpsc::channel(16);
        let transport = Arc::new(SessionTransport::new(
            SessionToken::generate(),
            Box::new(ChannelSink::new(tx)),
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session(
            Arc::clone(&transport),
            handler,
            keep_alive,
            shutdown.clone(),
        ));
        Harness {
            transport,
            frames,
            shutdown,
            task,
        }
    }

    async fn next_message(frames: &mut mpsc::Receiver<Bytes>) -> Value {
        let frame = frames.recv().await.unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        let data = text
            .strip_prefix("event: message\ndata: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap_or_else(|| panic!("unexpected frame {text:?}"));
        serde_json::from_str(data).unwrap()
    }

    #[tokio::test]
    async fn answers_requests_in_session() {
        let mut h = start(Duration::from_secs(60));
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#)
            .unwrap();

        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["structuredContent"]["text"], "hi");

        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
            .unwrap();
        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], "p");

        h.transport.close();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_request_gets_no_response() {
        let mut h = start(Duration::from_secs(60));
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"stall"}}"#)
            .unwrap();
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":7}}"#)
            .unwrap();
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","id":8,"method":"ping"}"#)
            .unwrap();

        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], 8);

        h.shutdown.cancel();
        h.task.await.unwrap();
        assert!(h.transport.is_closed());
        assert!(h.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_rejected() {
        let mut h = start(Duration::from_secs(60));
        let stalled = r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"stall"}}"#;
        h.transport.on_inbound_delivered(stalled).unwrap();
        h.transport.on_inbound_delivered(stalled).unwrap();

        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], 3);
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);

        h.transport.close();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_capability_answers_and_frees_its_id() {
        let mut h = start(Duration::from_secs(60));
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"explode"}}"#)
            .unwrap();
        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(resp["result"]["structuredContent"]["code"], "PROVIDER_FAILURE");

        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"text":"again"}}}"#)
            .unwrap();
        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["structuredContent"]["text"], "again");

        h.transport.close();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn id_reused_after_cancel_is_tracked() {
        let mut h = start(Duration::from_secs(60));
        let stalled = r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"stall"}}"#;
        h.transport.on_inbound_delivered(stalled).unwrap();
        h.transport
            .on_inbound_delivered(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":4}}"#)
            .unwrap();
        h.transport.on_inbound_delivered(stalled).unwrap();
        // The second id-4 call is still in flight, so a third is a duplicate.
        h.transport.on_inbound_delivered(stalled).unwrap();

        let resp = next_message(&mut h.frames).await;
        assert_eq!(resp["id"], 4);
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);

        h.transport.close();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_gets_keep_alives() {
        let mut h = start(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;

        let frame = h.frames.recv().await.unwrap();
        assert_eq!(frame, ": keep-alive\n\n");

        h.transport.close();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_stream_ends_session_on_next_write() {
        let h = start(Duration::from_millis(20));
        drop(h.frames);
        h.task.await.unwrap();
        assert!(h.transport.is_closed());
    }
}
