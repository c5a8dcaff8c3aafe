use crate::channels::traits::{RemoteTree, TreeEvent};
use crate::config::CredentialBundle;
use crate::error::ChannelError;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// Realtime database over its REST API, with Server-Sent Events for
/// subscriptions.
#[derive(Clone)]
pub struct FirebaseTree {
    client: reqwest::Client,
    base_url: String,
    auth: Option<String>,
    idle_timeout: Option<Duration>,
}

impl FirebaseTree {
    pub fn new(base_url: impl Into<String>, auth: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            auth: auth.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            idle_timeout: None,
        }
    }

    pub fn from_bundle(bundle: &CredentialBundle) -> Self {
        Self::new(bundle.database_url.clone(), bundle.database_auth.clone())
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn authed_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(auth) = self.auth.as_deref() {
            request.query(&[("auth", auth)])
        } else {
            request
        }
    }

    async fn send(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ChannelError> {
        let resp = self.authed_request(request).send().await?;
        ensure_ok_response(resp, op).await
    }
}

async fn ensure_ok_response(
    response: reqwest::Response,
    op: &'static str,
) -> Result<reqwest::Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Status {
        op,
        status,
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl RemoteTree for FirebaseTree {
    async fn get(&self, path: &str) -> Result<Value, ChannelError> {
        let resp = self.send("get", self.client.get(self.url(path))).await?;
        Ok(resp.json::<Value>().await?)
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), ChannelError> {
        self.send("set", self.client.put(self.url(path)).json(value))
            .await
            .map(drop)
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), ChannelError> {
        self.send("update", self.client.patch(self.url(path)).json(fields))
            .await
            .map(drop)
    }

    async fn delete(&self, path: &str) -> Result<(), ChannelError> {
        self.send("delete", self.client.delete(self.url(path)))
            .await
            .map(drop)
    }

    async fn subscribe(&self, path: &str, tx: mpsc::Sender<TreeEvent>) -> Result<(), ChannelError> {
        let request = self
            .client
            .get(self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let resp = self.send("subscribe", request).await?;
        tracing::debug!("Realtime subscription open on {path}");

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::default();
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return Err(ChannelError::Idle(idle.as_secs())),
                },
                None => stream.next().await,
            };
            let Some(chunk) = next else {
                return Ok(());
            };
            for frame in decoder.push(&chunk?)? {
                if let Some(event) = frame_to_event(&frame)? {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// One complete `event:`/`data:` block from an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Upper bound on bytes held while waiting for a line break.
pub(crate) const MAX_SSE_BUFFER_BYTES: usize = 1_048_576;

/// Incremental Server-Sent Events parser; frames end at a blank line.
///
/// Bytes are buffered until a full line arrives, so a UTF-8 sequence split
/// across chunks is decoded intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, ChannelError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..newline_pos]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if !self.event.is_empty() || !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: std::mem::take(&mut self.event),
                        data: std::mem::take(&mut self.data).join("\n"),
                    });
                }
            } else if let Some(evt) = line.strip_prefix("event:") {
                self.event = evt.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // Comments (":") and unknown fields are ignored
        }
        if self.buffer.len() > MAX_SSE_BUFFER_BYTES {
            let len = self.buffer.len();
            self.buffer.clear();
            return Err(ChannelError::Overflow(len));
        }
        Ok(frames)
    }
}

#[derive(Debug, Deserialize)]
struct PathData {
    path: String,
    #[serde(default)]
    data: Value,
}

fn frame_to_event(frame: &SseFrame) -> Result<Option<TreeEvent>, ChannelError> {
    match frame.event.as_str() {
        "put" | "patch" => {
            let payload: PathData = serde_json::from_str(&frame.data)?;
            Ok(Some(if frame.event == "put" {
                TreeEvent::put(payload.path, payload.data)
            } else {
                TreeEvent::patch(payload.path, payload.data)
            }))
        }
        "keep-alive" => Ok(None),
        "cancel" => Err(ChannelError::Cancelled(
            serde_json::from_str::<Value>(&frame.data)
                .ok()
                .and_then(|v| v.as_str().map(ToOwned::to_owned))
                .unwrap_or_else(|| frame.data.trim().to_string()),
        )),
        "auth_revoked" => Err(ChannelError::Cancelled("credential revoked".to_string())),
        other => {
            tracing::debug!("Ignoring realtime stream event '{other}'");
            Ok(None)
        }
    }
}
