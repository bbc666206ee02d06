//! Liveness probe for the controller: one ping, expect one pong.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[derive(Parser, Debug)]
#[clap(about = "Ping the LED controller over its websocket", version)]
struct Opt {
    /// Controller websocket URL.
    #[clap(long, env = "LED_CONTROLLER_URL", default_value = "ws://led-controller:9099/")]
    url: Url,

    /// Seconds to wait for the pong.
    #[clap(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let opt = Opt::parse();

    match ping(&opt).await {
        Ok(()) => {
            log::info!("have pong");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn ping(opt: &Opt) -> anyhow::Result<()> {
    let deadline = Duration::from_secs(opt.timeout_secs);
    let (mut ws, _) = timeout(deadline, connect_async(opt.url.as_str()))
        .await
        .map_err(|_| anyhow::anyhow!("connect timed out"))??;

    ws.send(Message::Text(json!({ "ping": true }).to_string().into()))
        .await?;

    let reply = timeout(deadline, async {
        while let Some(frame) = ws.next().await {
            if let Message::Text(text) = frame? {
                return Ok::<_, anyhow::Error>(serde_json::from_str::<serde_json::Value>(&text)?);
            }
        }
        anyhow::bail!("connection closed before a pong arrived")
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for a pong"))??;

    if reply.get("pong").and_then(|p| p.as_bool()) == Some(true) {
        Ok(())
    } else {
        anyhow::bail!("unexpected reply: {reply}")
    }
}
