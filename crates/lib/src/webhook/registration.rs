//! Registering the `message.received` webhook with the API.

use crate::api::{ApiClient, ApiError};
use crate::webhook::event::NEW_MESSAGE_EVENT;
use serde_json::{json, Map, Value};

/// Public URL of the receiver: `base_url` joined with the path the receiver listens on.
pub fn build_webhook_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim().trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    )
}

/// Comma-separated ids, blanks dropped.
pub fn parse_resource_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub url: String,
    pub label: Option<String>,
    pub user_id: Option<String>,
    pub resource_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Existing(Value),
    Created(Value),
}

impl Registration {
    pub fn webhook(&self) -> &Value {
        match self {
            Registration::Existing(v) | Registration::Created(v) => v,
        }
    }
}

fn take_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Object(Map::new())),
        _ => Value::Object(Map::new()),
    }
}

pub async fn list_webhooks(
    client: &dyn ApiClient,
    user_id: Option<&str>,
) -> Result<Vec<Value>, ApiError> {
    let query: Vec<(String, String)> = user_id
        .map(|id| vec![("userId".to_string(), id.to_string())])
        .unwrap_or_default();
    match take_data(client.get("webhooks", &query).await?) {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

/// Existing webhook at `url` subscribed to exactly `message.received`.
pub async fn find_message_received_webhook(
    client: &dyn ApiClient,
    url: &str,
    user_id: Option<&str>,
) -> Result<Option<Value>, ApiError> {
    let webhooks = list_webhooks(client, user_id).await?;
    Ok(webhooks.into_iter().find(|w| {
        let events_match = w
            .get("events")
            .and_then(Value::as_array)
            .is_some_and(|events| events.len() == 1 && events[0] == NEW_MESSAGE_EVENT);
        w.get("url").and_then(Value::as_str) == Some(url) && events_match
    }))
}

pub async fn create_message_received_webhook(
    client: &dyn ApiClient,
    request: &WebhookRequest,
) -> Result<Value, ApiError> {
    let mut body = json!({
        "events": [NEW_MESSAGE_EVENT],
        "url": request.url,
        "status": "enabled",
    });
    if let Some(map) = body.as_object_mut() {
        if let Some(ref label) = request.label {
            map.insert("label".to_string(), json!(label));
        }
        if let Some(ref user_id) = request.user_id {
            map.insert("userId".to_string(), json!(user_id));
        }
        if !request.resource_ids.is_empty() {
            map.insert("resourceIds".to_string(), json!(request.resource_ids));
        }
    }
    Ok(take_data(client.post("webhooks/messages", &body).await?))
}

/// Reuse a matching webhook or create one.
pub async fn ensure_message_received_webhook(
    client: &dyn ApiClient,
    request: &WebhookRequest,
) -> Result<Registration, ApiError> {
    if let Some(existing) =
        find_message_received_webhook(client, &request.url, request.user_id.as_deref()).await?
    {
        log::info!("reusing existing webhook for {}", request.url);
        return Ok(Registration::Existing(existing));
    }
    log::info!("creating message.received webhook for {}", request.url);
    create_message_received_webhook(client, request)
        .await
        .map(Registration::Created)
}
