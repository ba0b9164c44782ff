use serde::Deserialize;

use flowlink_core::error::{FlowlinkError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub server: ServerSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub stream: StreamSection,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(FlowlinkError::BadConfig(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        self.server.validate()?;
        self.reconnect.validate()?;
        self.stream.validate()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Base URL for the chat API (chunked-HTTP transport).
    pub http_url: String,

    /// Base URL for the socket transport. Derived from `http_url` if absent.
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if !self.http_url.starts_with("http://") && !self.http_url.starts_with("https://") {
            return Err(FlowlinkError::BadConfig(
                "server.http_url must start with http:// or https://".into(),
            ));
        }
        if let Some(ws) = &self.ws_url {
            if !ws.starts_with("ws://") && !ws.starts_with("wss://") {
                return Err(FlowlinkError::BadConfig(
                    "server.ws_url must start with ws:// or wss://".into(),
                ));
            }
        }
        Ok(())
    }

    /// Effective socket base URL.
    pub fn ws_url(&self) -> String {
        match &self.ws_url {
            Some(u) => u.clone(),
            None => self
                .http_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=20).contains(&self.max_attempts) {
            return Err(FlowlinkError::BadConfig(
                "reconnect.max_attempts must be between 1 and 20".into(),
            ));
        }
        if !(100..=60_000).contains(&self.base_delay_ms) {
            return Err(FlowlinkError::BadConfig(
                "reconnect.base_delay_ms must be between 100 and 60000".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(FlowlinkError::BadConfig(
                "reconnect.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        if self.max_delay_ms > 300_000 {
            return Err(FlowlinkError::BadConfig(
                "reconnect.max_delay_ms must not exceed 300000".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSection {
    /// Deadline for the next correlated response event on the socket path.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl StreamSection {
    pub fn validate(&self) -> Result<()> {
        if !(1_000..=600_000).contains(&self.request_timeout_ms) {
            return Err(FlowlinkError::BadConfig(
                "stream.request_timeout_ms must be between 1000 and 600000".into(),
            ));
        }
        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
