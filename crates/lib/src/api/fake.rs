//! Scripted in-memory `ApiClient` for unit tests.

use super::{ApiClient, ApiError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Responses are queued per request key (method, path, sorted query). The last queued
/// response for a key repeats; unscripted requests answer 404.
#[derive(Default)]
pub(crate) struct FakeClient {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, ApiError>>>>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, Value)>>,
}

pub(crate) fn request_key(method: &str, path: &str, query: &[(String, String)]) -> String {
    let mut q: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    q.sort();
    format!("{} {}?{}", method, path, q.join("&"))
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, path: &str, query: &[(&str, &str)], response: Result<Value, ApiError>) {
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.push(request_key("GET", path, &query), response);
    }

    pub fn on_post(&self, path: &str, response: Result<Value, ApiError>) {
        self.push(request_key("POST", path, &[]), response);
    }

    fn push(&self, key: String, response: Result<Value, ApiError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(response);
    }

    fn next(&self, key: String) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(key.clone());
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue.front().cloned().unwrap(),
            _ => Err(ApiError::status(404, format!("no fixture for {}", key))),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests made whose key starts with `prefix` (e.g. "GET messages?").
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    pub fn posted(&self) -> Vec<(String, Value)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for FakeClient {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        self.next(request_key("GET", path, query))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.posted
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        self.next(request_key("POST", path, &[]))
    }
}
