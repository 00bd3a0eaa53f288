use serde_json::Value;
use std::collections::HashMap;

/// The parts of an inbound request credential resolution looks at.
#[derive(Clone, Debug, Default)]
pub struct InboundRequest {
    authorization: Option<String>,
    form: HashMap<String, String>,
    body: Option<Value>,
}

impl InboundRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    #[must_use]
    pub fn with_form(mut self, form: HashMap<String, String>) -> Self {
        self.form = form;
        self
    }

    #[must_use]
    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Look `name` up in the form fields, then in the structured body.
    ///
    /// Non-string body values are rendered as JSON text; `null` counts as absent.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        if let Some(value) = self.form.get(name) {
            return Some(value.clone());
        }
        match self.body.as_ref()?.get(name)? {
            Value::Null => None,
            Value::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        }
    }
}
