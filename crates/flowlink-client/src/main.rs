//! flowlink demo binary.
//!
//! Streams one prompt to the configured backend and prints the chunks:
//! - Tries the socket transport first; falls back to chunked HTTP.
//! - Config: `flowlink.yaml` (strict parsing + validation).

use std::io::Write;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing_subscriber::{fmt, EnvFilter};

use flowlink_client::config;
use flowlink_client::stream::StreamObserver;
use flowlink_client::FlowlinkClient;

struct StdoutObserver {
    done: Arc<Notify>,
}

impl StreamObserver for StdoutObserver {
    fn on_chunk(&self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_complete(&self, _full_text: &str) {
        println!();
        self.done.notify_one();
    }

    fn on_error(&self, message: &str) {
        eprintln!("stream failed: {message}");
        self.done.notify_one();
    }
}

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.is_empty() {
        eprintln!("usage: flowlink <prompt>");
        std::process::exit(2);
    }

    let cfg = config::load_from_file("flowlink.yaml").expect("config load failed");
    let client = FlowlinkClient::new(cfg).expect("client build failed");

    if let Err(e) = client.connect(None).await {
        tracing::warn!(%e, "socket unavailable, streaming over chunked http");
    }

    let done = Arc::new(Notify::new());
    let observer = Arc::new(StdoutObserver {
        done: Arc::clone(&done),
    });

    client.stream_response("default", &prompt, observer).await;
    done.notified().await;

    client.disconnect();
}
