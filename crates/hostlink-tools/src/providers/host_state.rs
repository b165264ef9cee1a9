//! Capabilities that read and write host-owned state.
//!
//! [`HostStateTools`] holds no state of its own. Every operation is queued on
//! the [`HostDispatcher`] and touches [`HostState`] only inside a drain.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use hostlink_core::CapabilityError;
use hostlink_host::HostDispatcher;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::capability::{Capability, NoArgs};
use crate::registry::CapabilityProvider;
use crate::schema::InputSchema;

/// Longest wait `delayed_echo` accepts.
pub const MAX_DELAY_MS: u64 = 10_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpawnedObject {
    pub id: u64,
    pub prefab: String,
    pub position: Vec3,
}

/// State that may only be touched on the host thread.
#[derive(Debug)]
pub struct HostState {
    text: String,
    prefabs: BTreeSet<String>,
    spawned: Option<SpawnedObject>,
    next_id: u64,
}

impl Default for HostState {
    fn default() -> Self {
        Self::with_prefabs(["Cube", "Sphere", "Capsule"])
    }
}

impl HostState {
    pub fn with_prefabs<I, S>(prefabs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: String::new(),
            prefabs: prefabs.into_iter().map(Into::into).collect(),
            spawned: None,
            next_id: 1,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn spawned(&self) -> Option<&SpawnedObject> {
        self.spawned.as_ref()
    }

    /// Replaces any previously spawned object.
    fn spawn(&mut self, prefab: &str, position: Vec3) -> Result<SpawnedObject, String> {
        if !self.prefabs.contains(prefab) {
            return Err(format!("Prefab '{prefab}' not found"));
        }
        let object = SpawnedObject {
            id: self.next_id,
            prefab: prefab.to_string(),
            position,
        };
        self.next_id += 1;
        self.spawned = Some(object.clone());
        Ok(object)
    }
}

#[derive(Debug, Deserialize)]
struct TextArgs {
    text: String,
}

#[derive(Debug, Serialize)]
struct TextResult {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SpawnArgs {
    prefab: String,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum FailureMode {
    /// The host work panics.
    #[default]
    Panic,
    /// The host work returns an error.
    Error,
}

#[derive(Debug, Deserialize)]
struct FailArgs {
    #[serde(default)]
    mode: FailureMode,
}

#[derive(Debug, Deserialize)]
struct DelayedEchoArgs {
    text: String,
    #[serde(default)]
    delay_ms: u64,
}

#[derive(Debug, Serialize)]
struct DelayedEchoResult {
    text: String,
    delay_ms: u64,
    host_text: String,
}

/// Demo provider driving [`HostState`] through the host queue.
pub struct HostStateTools {
    dispatcher: HostDispatcher<HostState>,
}

impl HostStateTools {
    pub fn new(dispatcher: HostDispatcher<HostState>) -> Self {
        Self { dispatcher }
    }

    async fn set_text(&self, args: TextArgs) -> Result<TextResult, CapabilityError> {
        let text = args.text.clone();
        self.dispatcher
            .run(move |state: &mut HostState| state.text = text)
            .await?;
        Ok(TextResult { text: args.text })
    }

    async fn get_text(&self) -> Result<TextResult, CapabilityError> {
        let text = self
            .dispatcher
            .call(|state: &mut HostState| state.text.clone())
            .await?;
        Ok(TextResult { text })
    }

    async fn spawn_object(&self, args: SpawnArgs) -> Result<SpawnedObject, CapabilityError> {
        let position = Vec3 {
            x: args.x,
            y: args.y,
            z: args.z,
        };
        let spawned = self
            .dispatcher
            .try_call(move |state: &mut HostState| state.spawn(&args.prefab, position))
            .await?;
        Ok(spawned)
    }

    async fn get_object_position(&self) -> Result<Vec3, CapabilityError> {
        let position = self
            .dispatcher
            .try_call(|state: &mut HostState| {
                state
                    .spawned
                    .as_ref()
                    .map(|object| object.position)
                    .ok_or("Spawned object does not exist.")
            })
            .await?;
        Ok(position)
    }

    async fn fail_on_host(&self, args: FailArgs) -> Result<(), CapabilityError> {
        let outcome = match args.mode {
            FailureMode::Panic => {
                self.dispatcher
                    .run(|_: &mut HostState| panic!("intentional failure on the host thread"))
                    .await
            }
            FailureMode::Error => {
                self.dispatcher
                    .try_call(|_: &mut HostState| {
                        Err::<(), _>("intentional error returned on the host thread")
                    })
                    .await
            }
        };
        if let Err(e) = &outcome {
            error!(error = %e, "fail_on_host");
        }
        outcome.map_err(CapabilityError::from)
    }

    /// Reads the host text synchronously, then waits without holding the
    /// host before resolving.
    async fn delayed_echo(&self, args: DelayedEchoArgs) -> Result<DelayedEchoResult, CapabilityError> {
        let delay_ms = args.delay_ms.min(MAX_DELAY_MS);
        let text = args.text;
        let result = self
            .dispatcher
            .call_async(move |state: &mut HostState| {
                let host_text = state.text.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    DelayedEchoResult {
                        text,
                        delay_ms,
                        host_text,
                    }
                }
            })
            .await?;
        Ok(result)
    }
}

impl CapabilityProvider for HostStateTools {
    fn name(&self) -> &str {
        "host_state"
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        let this = self;
        vec![
            Capability::new(
                "set_text",
                "Set the host text slot",
                InputSchema::new().string("text", "New text"),
                {
                    let this = Arc::clone(&this);
                    move |args: TextArgs| {
                        let this = Arc::clone(&this);
                        async move { this.set_text(args).await }
                    }
                },
            ),
            Capability::new(
                "get_text",
                "Read the host text slot",
                InputSchema::new(),
                {
                    let this = Arc::clone(&this);
                    move |_: NoArgs| {
                        let this = Arc::clone(&this);
                        async move { this.get_text().await }
                    }
                },
            ),
            Capability::new(
                "spawn_object",
                "Spawn an object from a prefab at a position",
                InputSchema::new()
                    .string("prefab", "Prefab name")
                    .optional_number("x", "X position")
                    .optional_number("y", "Y position")
                    .optional_number("z", "Z position"),
                {
                    let this = Arc::clone(&this);
                    move |args: SpawnArgs| {
                        let this = Arc::clone(&this);
                        async move { this.spawn_object(args).await }
                    }
                },
            ),
            Capability::new(
                "get_object_position",
                "Position of the spawned object",
                InputSchema::new(),
                {
                    let this = Arc::clone(&this);
                    move |_: NoArgs| {
                        let this = Arc::clone(&this);
                        async move { this.get_object_position().await }
                    }
                },
            ),
            Capability::new(
                "fail_on_host",
                "Fail on the host thread, by panic or by returned error",
                InputSchema::new().optional_string("mode", "\"panic\" (default) or \"error\""),
                {
                    let this = Arc::clone(&this);
                    move |args: FailArgs| {
                        let this = Arc::clone(&this);
                        async move { this.fail_on_host(args).await }
                    }
                },
            ),
            Capability::new(
                "delayed_echo",
                "Echo text after an asynchronous wait started on the host",
                InputSchema::new()
                    .string("text", "Text to echo back")
                    .optional_integer("delay_ms", "Milliseconds to wait (max 10000)"),
                move |args: DelayedEchoArgs| {
                    let this = Arc::clone(&this);
                    async move { this.delayed_echo(args).await }
                },
            ),
        ]
    }
}
