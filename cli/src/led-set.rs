//! Manually hold alerts on the controller, the way the deployed listeners
//! do: the desired set lives in a sync client that survives reconnects, so
//! the alerts stay up even if the controller restarts underneath us.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lib_common::core::workqueue::{WorkQueue, Workunit};
use lib_common::sync::client::{SyncClient, SyncConfig};
use tokio::time::Instant;
use url::Url;

#[derive(Parser, Debug)]
#[clap(about = "Manually enable alerts on the LED controller", version)]
struct Opt {
    /// Controller websocket URL.
    #[clap(long, env = "LED_CONTROLLER_URL", default_value = "ws://led-controller:9099/")]
    url: Url,

    /// Label shown in the controller's client list.
    #[clap(long, default_value = "Manual Set")]
    name: String,

    /// Release the alerts and exit after this many seconds instead of
    /// holding until Ctrl-C.
    #[clap(long, value_name = "SECONDS")]
    hold_for: Option<u64>,

    /// Alert names to enable.
    #[clap(required = true)]
    alerts: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let client = SyncClient::new(SyncConfig {
        url: opt.url.to_string(),
        client_name: Some(opt.name.clone()),
        ..Default::default()
    });
    let worker = client.start();
    for alert in &opt.alerts {
        client.enable(alert);
    }
    log::info!("holding {} alert(s) on {}", opt.alerts.len(), opt.url);

    match opt.hold_for {
        Some(seconds) => {
            // The release is a scheduled workunit, the same shape the
            // pollers use for their own follow-ups.
            let queue = WorkQueue::new();
            let queue_worker = queue.start();
            let release_client = client.clone();
            let alerts = opt.alerts.clone();
            queue.enqueue(Workunit::new(
                "release-alerts",
                Some(Instant::now() + Duration::from_secs(seconds)),
                move || async move {
                    for alert in &alerts {
                        release_client.disable(alert);
                    }
                    log::info!("released alerts");
                    Ok(())
                },
            ));

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                // Leave headroom past the release for the final flush.
                _ = tokio::time::sleep(Duration::from_secs(seconds) + Duration::from_secs(2)) => {}
            }
            queue.stop();
            let _ = queue_worker.await;
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    client.stop();
    let _ = worker.await;
    Ok(())
}
