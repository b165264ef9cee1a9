use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use hostlink_core::CapabilityError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type-erased invoker: JSON argument bag in, JSON result out.
pub type Invoker =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, CapabilityError>> + Send + Sync>;

/// Argument type for capabilities that take no parameters.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct NoArgs {}

/// What a client sees when listing capabilities.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A named, callable unit of work.
#[derive(Clone)]
pub struct Capability {
    name: String,
    description: String,
    input_schema: Value,
    provider: Option<String>,
    invoker: Invoker,
}

impl Capability {
    /// Wrap an async function taking a typed argument struct.
    ///
    /// The argument bag is decoded into `A` before `f` runs; a decode failure
    /// yields [`CapabilityError::ArgumentMismatch`] and `f` is not called.
    pub fn new<A, R, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: impl Into<Value>,
        f: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CapabilityError>> + Send + 'static,
    {
        let name = name.into();
        let capability = name.clone();
        let invoker: Invoker = Arc::new(move |args: Value| match decode_args::<A>(&capability, args) {
            Ok(args) => {
                let pending = f(args);
                async move { encode_result(pending.await?) }.boxed()
            }
            Err(e) => future::ready(Err(e)).boxed(),
        });

        Self {
            name,
            description: description.into(),
            input_schema: input_schema.into(),
            provider: None,
            invoker,
        }
    }

    /// Wrap a synchronous function. It runs on whichever task invokes the
    /// capability, so it must not touch host-only state.
    pub fn sync<A, R, F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: impl Into<Value>,
        f: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Result<R, CapabilityError> + Send + Sync + 'static,
    {
        Self::new(name, description, input_schema, move |args: A| {
            future::ready(f(args))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Name of the provider that declared this capability, if any.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub(crate) fn set_provider(&mut self, provider: &str) {
        self.provider = Some(provider.to_string());
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    pub fn invoke(&self, args: Value) -> BoxFuture<'static, Result<Value, CapabilityError>> {
        (self.invoker)(args)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// The bag must be a JSON object; `null` counts as an empty one. Arrays are
/// rejected rather than decoded positionally.
fn decode_args<A: DeserializeOwned>(capability: &str, args: Value) -> Result<A, CapabilityError> {
    let mismatch = |message: String| CapabilityError::ArgumentMismatch {
        capability: capability.to_string(),
        message,
    };
    let args = match args {
        Value::Null => Value::Object(serde_json::Map::new()),
        obj @ Value::Object(_) => obj,
        other => {
            return Err(mismatch(format!(
                "arguments must be a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };
    serde_json::from_value(args).map_err(|e| mismatch(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn encode_result<R: Serialize>(result: R) -> Result<Value, CapabilityError> {
    serde_json::to_value(result)
        .map_err(|e| CapabilityError::provider(format!("failed to serialize result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn add() -> Capability {
        Capability::sync("add", "Add two integers", json!({"type": "object"}), |args: AddArgs| {
            Ok(args.a + args.b)
        })
    }

    #[tokio::test]
    async fn invokes_typed_function() {
        let result = add().invoke(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn bad_arguments_are_typed_errors() {
        let err = add().invoke(json!({"a": "two"})).await.unwrap_err();
        let CapabilityError::ArgumentMismatch { capability, .. } = err else {
            panic!("expected ArgumentMismatch, got {err:?}");
        };
        assert_eq!(capability, "add");

        let err = add().invoke(json!([1, 2])).await.unwrap_err();
        assert_eq!(
            err,
            CapabilityError::ArgumentMismatch {
                capability: "add".into(),
                message: "arguments must be a JSON object, got an array".into(),
            }
        );

        let err = add().invoke(json!("a=1")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::ArgumentMismatch { .. }));
    }

    #[tokio::test]
    async fn null_arguments_decode_as_empty_object() {
        let cap = Capability::sync("noop", "", json!({}), |_: NoArgs| Ok("done"));
        assert_eq!(cap.invoke(Value::Null).await.unwrap(), json!("done"));
        assert_eq!(cap.invoke(json!({})).await.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn async_function_errors_propagate() {
        let cap = Capability::new("fails", "", json!({}), |_: NoArgs| async {
            Err::<(), _>(CapabilityError::provider("nope"))
        });
        assert_eq!(
            cap.invoke(json!({})).await,
            Err(CapabilityError::ProviderFailure("nope".into()))
        );
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let value = serde_json::to_value(add().descriptor()).unwrap();
        assert_eq!(value["name"], "add");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("provider").is_none());
    }
}
