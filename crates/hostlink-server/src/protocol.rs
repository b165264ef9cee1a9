//! Method-level handling of the MCP-flavoured JSON-RPC protocol.

use hostlink_core::errors::CAPABILITY_NOT_FOUND;
use hostlink_core::protocol::{
    JsonRpcNotification, JsonRpcRequest, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use hostlink_core::{CapabilityError, JsonRpcMessage};
use hostlink_tools::CapabilityFacade;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Protocol revision reported when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity reported in the `initialize` handshake.
#[derive(Clone, Debug)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Turns requests into responses. Shared by every session.
pub struct ProtocolHandler {
    facade: CapabilityFacade,
    info: ServerInfo,
}

impl ProtocolHandler {
    pub fn new(facade: CapabilityFacade, info: ServerInfo) -> Self {
        Self { facade, info }
    }

    #[instrument(skip_all, fields(method = %request.method, id = %request.id))]
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let JsonRpcRequest { id, method, params, .. } = request;
        let params = params.unwrap_or(Value::Null);

        match method.as_str() {
            "initialize" => JsonRpcMessage::result(id, self.initialize(&params)),
            "ping" => JsonRpcMessage::result(id, json!({})),
            "tools/list" => {
                let tools = self.facade.list_capabilities();
                JsonRpcMessage::result(id, json!({ "tools": tools }))
            }
            "tools/call" => match serde_json::from_value::<CallParams>(params) {
                Ok(call) => self.call_tool(id, call).await,
                Err(e) => JsonRpcMessage::error(
                    id,
                    INVALID_PARAMS,
                    format!("Invalid tools/call params: {e}"),
                    None,
                ),
            },
            other => JsonRpcMessage::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
                None,
            ),
        }
    }

    /// Notifications get no reply.
    pub fn handle_notification(&self, notification: &JsonRpcNotification) {
        debug!(method = %notification.method, "notification");
    }

    fn initialize(&self, params: &Value) -> Value {
        let version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": self.info.name, "version": self.info.version },
        })
    }

    async fn call_tool(&self, id: hostlink_core::RequestId, call: CallParams) -> JsonRpcMessage {
        match self.facade.call_capability(&call.name, call.arguments).await {
            Ok(value) => JsonRpcMessage::result(id, tool_result(value)),
            // Lookup failures are protocol errors; everything else is a tool
            // result the caller can inspect.
            Err(e @ CapabilityError::NotFound(_)) => JsonRpcMessage::error(
                id,
                INVALID_PARAMS,
                e.to_string(),
                Some(json!({ "code": CAPABILITY_NOT_FOUND, "name": call.name })),
            ),
            Err(e) => JsonRpcMessage::result(id, tool_error(&e)),
        }
    }
}

fn tool_result(value: Value) -> Value {
    let text = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    });
    if value.is_object() {
        result["structuredContent"] = value;
    }
    result
}

fn tool_error(err: &CapabilityError) -> Value {
    json!({
        "content": [{ "type": "text", "text": err.to_string() }],
        "structuredContent": { "code": err.code() },
        "isError": true,
    })
}
