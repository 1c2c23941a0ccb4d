use crate::transport::{HttpReply, HttpRequest, HttpTransport};
use fleet::{Endpoint, RemoteError};
use log::{debug, warn};
use reqwest::Method;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Tunables of the gateway client.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Upper bound for one attempt, including reading the body.
    pub request_timeout: Duration,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Delay slept after the failed attempt number `attempt` (zero-based):
/// `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

/// Executes logical operations against remote instances.
///
/// Stateless apart from its configuration: one client serves every instance.
pub struct GatewayClient {
    transport: Arc<dyn HttpTransport>,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: GatewayConfig) -> Self {
        Self { transport, config }
    }

    /// Runs `operation` against the instance behind `endpoint` and returns the
    /// reply envelope.
    ///
    /// The credential is injected into the payload as `apikey`. Transient
    /// failures are retried up to `max_retries` times with exponential
    /// backoff; permanent failures are returned at once.
    pub async fn call(
        &self,
        endpoint: &Endpoint,
        operation: &str,
        payload: Value,
        method: Method,
    ) -> Result<Value, RemoteError> {
        let url = operation_url(endpoint.url(), operation);
        let body = inject_credential(payload, endpoint.api_key().expose());
        let mut attempt: u32 = 0;

        loop {
            debug!(
                "Gateway: {} {} (key {}) attempt {}",
                method,
                url,
                endpoint.api_key().masked(),
                attempt + 1
            );

            match self.attempt(method.clone(), &url, &body).await {
                Ok(envelope) => return Ok(envelope),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        "Gateway: '{}' on {} failed ({}), retrying in {:?}",
                        operation,
                        endpoint.url(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "Gateway: '{}' on {} failed after {} attempt(s): {}",
                        operation,
                        endpoint.url(),
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, method: Method, url: &str, body: &Value) -> Result<Value, RemoteError> {
        let request = HttpRequest {
            method,
            url: url.to_string(),
            body: body.clone(),
        };

        let reply = match tokio::time::timeout(self.config.request_timeout, self.transport.send(request)).await
        {
            Err(_) => {
                return Err(RemoteError::transient(
                    None,
                    format!("timed out after {:?}", self.config.request_timeout),
                ))
            }
            Ok(Err(e)) => return Err(RemoteError::transient(None, e.to_string())),
            Ok(Ok(reply)) => reply,
        };

        classify(reply)
    }
}

fn operation_url(base: &str, operation: &str) -> String {
    format!(
        "{}/api/v1/{}",
        base.trim_end_matches('/'),
        operation.trim_start_matches('/')
    )
}

fn inject_credential(payload: Value, api_key: &str) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    map.insert("apikey".to_string(), Value::String(api_key.to_string()));
    Value::Object(map)
}

/// Message of an error envelope, or a trimmed slice of the raw body.
fn reply_message(body: &str, fallback: String) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(Value::String(msg)) = map.get("message") {
            return msg.clone();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Sorts a raw reply into success, transient or permanent.
fn classify(reply: HttpReply) -> Result<Value, RemoteError> {
    let status = reply.status;
    match status {
        500..=599 => Err(RemoteError::transient(
            Some(status),
            reply_message(&reply.body, format!("HTTP {}", status)),
        )),
        200..=299 => {
            let envelope: Value = serde_json::from_str(&reply.body).map_err(|e| {
                RemoteError::permanent(Some(status), format!("malformed reply: {}", e))
            })?;
            match envelope.get("status").and_then(Value::as_str) {
                Some(s) if s.eq_ignore_ascii_case("error") => {
                    let message = envelope
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("remote reported an error")
                        .to_string();
                    Err(RemoteError::permanent(Some(status), message))
                }
                Some(_) => Ok(envelope),
                None => Err(RemoteError::permanent(
                    Some(status),
                    "malformed reply: missing 'status' field",
                )),
            }
        }
        _ => Err(RemoteError::permanent(
            Some(status),
            reply_message(&reply.body, format!("HTTP {}", status)),
        )),
    }
}
