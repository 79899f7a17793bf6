//! Webhook receiver: HTTP endpoint, bounded queue, and worker tasks.

use crate::config::{validate_webhook, WebhookConfig};
use crate::webhook::event::{EventError, NewMessageEvent, WebhookEnvelope, WebhookEvent};
use crate::webhook::signature::{SignatureVerifier, SIGNATURE_HEADER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Processes queued new-message events. Errors are logged by the worker.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: NewMessageEvent) -> Result<()>;
}

/// Default handler: logs the message id; contents only at debug level.
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: NewMessageEvent) -> Result<()> {
        log::info!(
            "processing message {} (conversation {})",
            message.id,
            message.conversation_id.as_deref().unwrap_or("-")
        );
        log::debug!("message payload: {:?}", message);
        Ok(())
    }
}

/// Shared state for the receiver routes.
#[derive(Clone)]
pub struct ReceiverState {
    pub verifier: Arc<SignatureVerifier>,
    pub queue: mpsc::Sender<NewMessageEvent>,
    /// How long a request waits for queue space before answering 503.
    pub enqueue_timeout: Duration,
}

impl ReceiverState {
    pub fn new(
        verifier: SignatureVerifier,
        queue: mpsc::Sender<NewMessageEvent>,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            verifier: Arc::new(verifier),
            queue,
            enqueue_timeout,
        }
    }
}

pub fn router(state: ReceiverState, path: &str) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(path, post(receive_webhook))
        .with_state(state)
}

fn reply(status: StatusCode, body: Value) -> (StatusCode, Json<Value>) {
    (status, Json(body))
}

/// POST handler. 401 bad signature, 400 bad body, 200 ignored/queued, 503 queue full.
async fn receive_webhook(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let envelope = match WebhookEnvelope::open(&state.verifier, &body, signature) {
        Ok(envelope) => envelope,
        Err(EventError::Rejected(reason)) => {
            log::warn!("webhook rejected: {}", reason);
            return reply(StatusCode::UNAUTHORIZED, json!({"message": reason.to_string()}));
        }
        Err(e) => {
            log::warn!("webhook body rejected: {}", e);
            return reply(StatusCode::BAD_REQUEST, json!({"message": "Invalid JSON"}));
        }
    };
    let message = match envelope.event() {
        Ok(WebhookEvent::NewMessage(message)) => message,
        Ok(WebhookEvent::Ignored { event_type }) => {
            log::info!("ignored webhook type={}", event_type.as_deref().unwrap_or("<none>"));
            return reply(StatusCode::OK, json!({"status": "ignored"}));
        }
        Err(e) => {
            log::warn!("{}", e);
            return reply(
                StatusCode::BAD_REQUEST,
                json!({"message": "Invalid webhook payload"}),
            );
        }
    };
    match state.queue.send_timeout(message, state.enqueue_timeout).await {
        Ok(()) => reply(StatusCode::OK, json!({"status": "queued"})),
        Err(SendTimeoutError::Timeout(message)) | Err(SendTimeoutError::Closed(message)) => {
            log::error!("webhook queue full; dropping message id={}", message.id);
            reply(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"message": "Webhook queue is full"}),
            )
        }
    }
}

async fn health_http() -> Json<Value> {
    Json(json!({"runtime": "running"}))
}

/// Spawn `count` workers draining `rx` into `handler`. They exit once every sender is gone.
pub fn spawn_workers(
    rx: mpsc::Receiver<NewMessageEvent>,
    count: usize,
    handler: Arc<dyn MessageHandler>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (1..=count)
        .map(|n| {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(message) = next else {
                        break;
                    };
                    let id = message.id.clone();
                    if let Err(e) = handler.handle(message).await {
                        log::error!("worker {} failed processing message {}: {:#}", n, id, e);
                    }
                }
                log::debug!("webhook worker {} stopped", n);
            })
        })
        .collect()
}

/// Run the receiver until Ctrl+C or SIGTERM. `secret` is the base64 signing secret.
pub async fn run_receiver(
    config: &WebhookConfig,
    secret: &str,
    handler: Arc<dyn MessageHandler>,
) -> Result<()> {
    validate_webhook(config)?;
    let verifier = SignatureVerifier::from_base64_secret(secret, config.signature_tolerance_secs)
        .context("OPENPHONE_WEBHOOK_SIGNING_SECRET is unusable")?;
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let workers = spawn_workers(rx, config.worker_count, handler);
    let state = ReceiverState::new(
        verifier,
        tx,
        Duration::from_millis(config.enqueue_timeout_ms),
    );
    let app = router(state, &config.path);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!(
        "webhook receiver listening on {}{} (workers={}, queue={})",
        bind_addr,
        config.path,
        config.worker_count,
        config.queue_capacity
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("webhook receiver exited")?;

    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(5), worker).await.is_err() {
            log::warn!("webhook worker did not finish in time");
        }
    }
    log::info!("webhook receiver stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
