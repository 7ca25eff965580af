use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Platform notification relayed to the event queue.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub account_id: String,
    pub workspace_id: String,
    pub project_id: String,
    pub user_id: String,
    /// Body as received, including fields not listed above
    pub body: Value,
}

impl WebhookEvent {
    /// Parses an authenticated request body.
    ///
    /// Expected layout: `type`, `resource.{id,type}`, `account.id`,
    /// `workspace.id`, `project.id`, `user.id`, all non-empty strings.
    pub fn parse(raw_body: &[u8]) -> Result<Self> {
        let body: Value = serde_json::from_slice(raw_body)
            .map_err(|e| Error::MalformedPayload(format!("body is not valid JSON: {}", e)))?;

        if !body.is_object() {
            return Err(Error::MalformedPayload("body must be a JSON object".to_string()));
        }

        Ok(Self {
            event_type: required(&body, "/type")?,
            resource_type: required(&body, "/resource/type")?,
            resource_id: required(&body, "/resource/id")?,
            account_id: required(&body, "/account/id")?,
            workspace_id: required(&body, "/workspace/id")?,
            project_id: required(&body, "/project/id")?,
            user_id: required(&body, "/user/id")?,
            body,
        })
    }
}

fn required(body: &Value, pointer: &str) -> Result<String> {
    match body.pointer(pointer).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(Error::MalformedPayload(format!(
            "missing or empty field '{}'",
            pointer.trim_start_matches('/').replace('/', ".")
        ))),
    }
}
