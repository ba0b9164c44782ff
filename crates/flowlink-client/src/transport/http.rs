//! Chunked-HTTP streaming transport.
//!
//! Opens the streaming chat request and exposes the raw byte stream; the
//! orchestrator owns the decode loop.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;

use flowlink_core::error::{FlowlinkError, Result};

/// Raw response body as it arrives off the wire.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    message: &'a str,
    conversation_id: &'a str,
}

/// Opens `POST <http_url>/api/chat/stream` requests.
#[derive(Clone)]
pub struct HttpStreamer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStreamer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    /// Issue the streaming request and hand back the body stream.
    pub async fn open(&self, conversation_id: &str, message: &str) -> Result<ByteStream> {
        let url = format!("{}/api/chat/stream", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&StreamRequest {
                message,
                conversation_id,
            })
            .send()
            .await
            .map_err(|e| FlowlinkError::ConnectFailed(format!("stream request failed: {e}")))?;

        let resp = resp
            .error_for_status()
            .map_err(|e| FlowlinkError::Stream(format!("stream request rejected: {e}")))?;

        Ok(Box::pin(resp.bytes_stream()))
    }
}
