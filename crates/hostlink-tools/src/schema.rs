use serde_json::{json, Map, Value};

/// Builder for the JSON Schema describing a capability's argument object.
///
/// ```
/// use hostlink_tools::InputSchema;
///
/// let schema = InputSchema::new()
///     .string("text", "Text to echo back")
///     .optional_integer("delay_ms", "Milliseconds to wait")
///     .build();
/// assert_eq!(schema["required"][0], "text");
/// ```
#[derive(Clone, Debug, Default)]
pub struct InputSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(self, name: &str, description: &str) -> Self {
        self.field(name, "string", description, true)
    }

    pub fn optional_string(self, name: &str, description: &str) -> Self {
        self.field(name, "string", description, false)
    }

    pub fn integer(self, name: &str, description: &str) -> Self {
        self.field(name, "integer", description, true)
    }

    pub fn optional_integer(self, name: &str, description: &str) -> Self {
        self.field(name, "integer", description, false)
    }

    pub fn number(self, name: &str, description: &str) -> Self {
        self.field(name, "number", description, true)
    }

    pub fn optional_number(self, name: &str, description: &str) -> Self {
        self.field(name, "number", description, false)
    }

    pub fn boolean(self, name: &str, description: &str) -> Self {
        self.field(name, "boolean", description, true)
    }

    pub fn optional_boolean(self, name: &str, description: &str) -> Self {
        self.field(name, "boolean", description, false)
    }

    fn field(mut self, name: &str, ty: &str, description: &str, required: bool) -> Self {
        let _ = self.properties.insert(
            name.to_string(),
            json!({"type": ty, "description": description}),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn build(self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(self.properties),
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}

impl From<InputSchema> for Value {
    fn from(schema: InputSchema) -> Self {
        schema.build()
    }
}
