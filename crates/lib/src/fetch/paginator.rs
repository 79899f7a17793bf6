//! Cursor-following pager over a listing endpoint.
//!
//! Responses look like `{"data": [...], "nextPageToken": "..."}`. The pager never retries;
//! a failed request leaves the cursor where it was so calling `next_page` again reissues
//! the same page.

use crate::api::{ApiClient, ApiError};
use crate::fetch::FetchTask;
use serde_json::Value;

/// One page of raw items and the cursor it was requested with.
#[derive(Debug, Clone)]
pub struct Page {
    pub cursor: Option<String>,
    pub items: Vec<Value>,
}

fn cursor_label(cursor: &Option<String>) -> &str {
    cursor.as_deref().unwrap_or("<first page>")
}

/// A page request failed; `cursor` is the position to resume from.
#[derive(Debug, thiserror::Error)]
#[error("page request at {} failed: {}", cursor_label(.cursor), .source)]
pub struct PageError {
    pub cursor: Option<String>,
    #[source]
    pub source: ApiError,
}

pub struct Paginator<'c> {
    client: &'c dyn ApiClient,
    path: String,
    query: Vec<(String, String)>,
    cursor: Option<String>,
    exhausted: bool,
}

impl<'c> Paginator<'c> {
    pub fn new(client: &'c dyn ApiClient, path: impl Into<String>, query: Vec<(String, String)>) -> Self {
        Self {
            client,
            path: path.into(),
            query,
            cursor: None,
            exhausted: false,
        }
    }

    /// Pager for a task's endpoint, starting at the task's cursor.
    pub fn for_task(client: &'c dyn ApiClient, task: &FetchTask) -> Self {
        Self::new(client, task.path(), task.query()).starting_at(task.cursor.clone())
    }

    pub fn starting_at(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Cursor of the next page to request (None = first page).
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page. None once the listing is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<Page, PageError>> {
        if self.exhausted {
            return None;
        }
        let mut query = self.query.clone();
        if let Some(ref token) = self.cursor {
            query.push(("pageToken".to_string(), token.clone()));
        }
        let fail = |cursor: &Option<String>, source| PageError {
            cursor: cursor.clone(),
            source,
        };
        let body = match self.client.get(&self.path, &query).await {
            Ok(body) => body,
            Err(e) => return Some(Err(fail(&self.cursor, e))),
        };
        let (items, next) = match split_page(&self.path, body) {
            Ok(parts) => parts,
            Err(e) => return Some(Err(fail(&self.cursor, e))),
        };
        if items.is_empty() {
            log::debug!("{}: no more records", self.path);
            self.exhausted = true;
            return None;
        }
        let requested = self.cursor.clone();
        match next {
            Some(token) if Some(&token) != requested.as_ref() => self.cursor = Some(token),
            _ => self.exhausted = true,
        }
        Some(Ok(Page {
            cursor: requested,
            items,
        }))
    }
}

fn split_page(path: &str, body: Value) -> Result<(Vec<Value>, Option<String>), ApiError> {
    let Value::Object(mut map) = body else {
        return Err(ApiError::Decode(format!("{}: listing response is not an object", path)));
    };
    let items = match map.remove("data") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ApiError::Decode(format!("{}: `data` is not a list", path)));
        }
    };
    let next = map
        .remove("nextPageToken")
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty());
    Ok((items, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeClient;
    use serde_json::json;

    async fn drain(pager: &mut Paginator<'_>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(page) = pager.next_page().await {
            out.extend(page.unwrap().items);
        }
        out
    }

    #[tokio::test]
    async fn yields_every_page_once_in_order() {
        let fake = FakeClient::new();
        fake.on_get("users", &[], Ok(json!({"data": [{"id": 1}, {"id": 2}], "nextPageToken": "p2"})));
        fake.on_get("users", &[("pageToken", "p2")], Ok(json!({"data": [{"id": 3}], "nextPageToken": "p3"})));
        fake.on_get("users", &[("pageToken", "p3")], Ok(json!({"data": [{"id": 4}], "nextPageToken": null})));

        let mut pager = Paginator::new(&fake, "users", vec![]);
        let items = drain(&mut pager).await;
        let ids: Vec<i64> = items.iter().map(|v| v["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(pager.is_exhausted());
        assert_eq!(fake.calls().len(), 3);
        assert!(pager.next_page().await.is_none());
        assert_eq!(fake.calls().len(), 3);
    }

    #[tokio::test]
    async fn empty_page_terminates() {
        let fake = FakeClient::new();
        fake.on_get("calls", &[], Ok(json!({"data": [], "nextPageToken": "never"})));
        let mut pager = Paginator::new(&fake, "calls", vec![]);
        assert!(pager.next_page().await.is_none());
        assert!(pager.is_exhausted());
    }

    #[tokio::test]
    async fn repeated_token_does_not_loop() {
        let fake = FakeClient::new();
        fake.on_get("users", &[], Ok(json!({"data": [{"id": 1}], "nextPageToken": "same"})));
        fake.on_get("users", &[("pageToken", "same")], Ok(json!({"data": [{"id": 2}], "nextPageToken": "same"})));
        let mut pager = Paginator::new(&fake, "users", vec![]);
        let items = drain(&mut pager).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn error_is_tagged_with_cursor_and_page_can_be_reissued() {
        let fake = FakeClient::new();
        fake.on_get("messages", &[("phoneNumberId", "PN1")], Ok(json!({"data": [{"id": "a"}], "nextPageToken": "p2"})));
        fake.on_get("messages", &[("phoneNumberId", "PN1"), ("pageToken", "p2")], Err(ApiError::status(503, "busy")));
        fake.on_get("messages", &[("phoneNumberId", "PN1"), ("pageToken", "p2")], Ok(json!({"data": [{"id": "b"}]})));

        let mut pager = Paginator::new(
            &fake,
            "messages",
            vec![("phoneNumberId".to_string(), "PN1".to_string())],
        );
        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.cursor, None);

        let err = pager.next_page().await.unwrap().unwrap_err();
        assert_eq!(err.cursor.as_deref(), Some("p2"));
        assert_eq!(err.source.http_status(), Some(503));
        assert_eq!(pager.cursor(), Some("p2"));

        let second = pager.next_page().await.unwrap().unwrap();
        assert_eq!(second.cursor.as_deref(), Some("p2"));
        assert_eq!(second.items, vec![json!({"id": "b"})]);
        assert!(pager.next_page().await.is_none());
    }

    #[tokio::test]
    async fn starts_from_task_cursor() {
        let fake = FakeClient::new();
        fake.on_get("users", &[("pageToken", "mid")], Ok(json!({"data": [{"id": 9}]})));
        let task = FetchTask::users().with_cursor(Some("mid".into()));
        let mut pager = Paginator::for_task(&fake, &task);
        let items = drain(&mut pager).await;
        assert_eq!(items, vec![json!({"id": 9})]);
    }

    #[tokio::test]
    async fn non_list_data_is_a_decode_error() {
        let fake = FakeClient::new();
        fake.on_get("users", &[], Ok(json!({"data": {"id": 1}})));
        let mut pager = Paginator::new(&fake, "users", vec![]);
        let err = pager.next_page().await.unwrap().unwrap_err();
        assert!(matches!(err.source, ApiError::Decode(_)));
        assert!(!err.source.is_transient());
    }
}
