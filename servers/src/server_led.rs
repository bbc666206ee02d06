use anyhow::Result;
use tokio::signal;

use servers::led_logic::{arbiter::Arbiter, config, downstream, logger, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(
        "server_led",
        config
            .log_dir
            .as_deref()
            .unwrap_or_else(|| std::path::Path::new("./logs")),
        config.log_level.as_deref().unwrap_or("info"),
    )?;

    let alerts = config.resolved_alerts()?;
    log::info!("loaded {} alert definitions", alerts.len());

    // No hardware driver is wired in here; the arbiter logs transitions and
    // an OutputSink implementation can be attached by an embedding build.
    let (arbiter, handle) = Arbiter::new(alerts, None);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = AppState::new(handle);

    let arbiter_handle = tokio::spawn(arbiter.run(shutdown_tx.subscribe()));
    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let _ = tokio::try_join!(arbiter_handle, downstream_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
