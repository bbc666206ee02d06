//! Desired-state synchronization against the remote alert controller.
//!
//! The client owns the set of alert names this process wants enabled on the
//! peer. A sender flushes set-difference diffs over a persistent websocket;
//! every reconnect replays the whole desired set, so the peer converges
//! again after link loss without the callers noticing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings. Defaults match the deployed controller topology.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub url: String,
    /// Label sent in the identification frame; `None` skips identification.
    pub client_name: Option<String>,
    /// Dashboard path advertised alongside the name.
    pub client_link: Option<String>,
    /// Fixed delay between reconnect attempts. The client never gives up.
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: "ws://led-controller:9099/".to_string(),
            client_name: None,
            client_link: None,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// `to_disable` is what the peer still believes enabled but should not,
/// `to_enable` the opposite. A name enabled and disabled between two flushes
/// lands in neither.
pub fn compute_diff(
    last_sent: &HashSet<String>,
    desired: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let to_disable = last_sent.difference(desired).cloned().collect();
    let to_enable = desired.difference(last_sent).cloned().collect();
    (to_disable, to_enable)
}

#[derive(Default)]
struct SyncState {
    desired: HashSet<String>,
    last_sent: HashSet<String>,
}

struct Shared {
    config: SyncConfig,
    state: Mutex<SyncState>,
    wake: Notify,
    cancel: CancellationToken,
}

enum LinkState {
    Disconnected,
    Connected(Box<WsStream>),
}

#[derive(Clone)]
pub struct SyncClient {
    shared: Arc<Shared>,
}

impl SyncClient {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SyncState::default()),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Mark `alert` wanted on the peer and wake the sender. Bursts of
    /// enable/disable coalesce into a single flush.
    pub fn enable(&self, alert: &str) {
        self.shared
            .state
            .lock()
            .expect("sync state lock poisoned")
            .desired
            .insert(alert.to_string());
        self.shared.wake.notify_one();
    }

    pub fn disable(&self, alert: &str) {
        self.shared
            .state
            .lock()
            .expect("sync state lock poisoned")
            .desired
            .remove(alert);
        self.shared.wake.notify_one();
    }

    /// Snapshot of the locally wanted set.
    pub fn desired(&self) -> HashSet<String> {
        self.shared
            .state
            .lock()
            .expect("sync state lock poisoned")
            .desired
            .clone()
    }

    /// Idempotent; closes the active connection and ends [`run`](Self::run).
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }

    /// Drive the connection state machine until stopped. Reconnects forever
    /// with a fixed delay; every fresh connection starts with identification
    /// and a full resync.
    pub async fn run(&self) {
        let mut link = LinkState::Disconnected;
        loop {
            if self.shared.cancel.is_cancelled() {
                if let LinkState::Connected(mut ws) = link {
                    let _ = ws.close().await;
                }
                return;
            }
            link = match link {
                LinkState::Disconnected => match self.connect().await {
                    Some(ws) => LinkState::Connected(ws),
                    // Cancelled while connecting.
                    None => return,
                },
                LinkState::Connected(ws) => self.drive(ws).await,
            };
        }
    }

    async fn connect(&self) -> Option<Box<WsStream>> {
        loop {
            if self.shared.cancel.is_cancelled() {
                return None;
            }
            match connect_async(self.shared.config.url.as_str()).await {
                Ok((mut ws, _)) => match self.open_link(&mut ws).await {
                    Ok(()) => {
                        log::info!("connected to {}", self.shared.config.url);
                        return Some(Box::new(ws));
                    }
                    Err(e) => {
                        log::warn!("handshake with {} failed: {}", self.shared.config.url, e);
                    }
                },
                Err(e) => {
                    log::warn!(
                        "connect to {} failed: {}; retrying in {:?}",
                        self.shared.config.url,
                        e,
                        self.shared.config.retry_delay
                    );
                }
            }
            tokio::select! {
                _ = self.shared.cancel.cancelled() => return None,
                _ = sleep(self.shared.config.retry_delay) => {}
            }
        }
    }

    /// Entry actions for the connected state: identify, then resync the full
    /// desired set by resetting `last_sent` before the first flush.
    async fn open_link(&self, ws: &mut WsStream) -> Result<(), tungstenite::Error> {
        if let Some(name) = &self.shared.config.client_name {
            let mut ident = json!({ "name": name });
            if let Some(link) = &self.shared.config.client_link {
                ident["link"] = json!(link);
            }
            ws.send(Message::Text(ident.to_string().into())).await?;
        }
        self.shared
            .state
            .lock()
            .expect("sync state lock poisoned")
            .last_sent
            .clear();
        self.flush(ws).await
    }

    /// Transmit the delta between the last acknowledged snapshot and the
    /// current desired set. `last_sent` is only advanced once every frame of
    /// the round went out.
    async fn flush(&self, ws: &mut WsStream) -> Result<(), tungstenite::Error> {
        let (snapshot, to_disable, to_enable) = {
            let state = self.shared.state.lock().expect("sync state lock poisoned");
            let snapshot = state.desired.clone();
            let (to_disable, to_enable) = compute_diff(&state.last_sent, &snapshot);
            (snapshot, to_disable, to_enable)
        };
        if to_disable.is_empty() && to_enable.is_empty() {
            return Ok(());
        }
        for alert in &to_disable {
            log::debug!("disable {alert}");
            ws.send(Message::Text(json!({ "disable": alert }).to_string().into()))
                .await?;
        }
        for alert in &to_enable {
            log::debug!("enable {alert}");
            ws.send(Message::Text(json!({ "enable": alert }).to_string().into()))
                .await?;
        }
        self.shared
            .state
            .lock()
            .expect("sync state lock poisoned")
            .last_sent = snapshot;
        Ok(())
    }

    async fn drive(&self, mut ws: Box<WsStream>) -> LinkState {
        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    let _ = ws.close().await;
                    return LinkState::Disconnected;
                }
                _ = self.shared.wake.notified() => {
                    if let Err(e) = self.flush(&mut ws).await {
                        // The round is abandoned; the reconnect resync picks
                        // the state back up.
                        log::warn!("send failed: {}; reconnecting", e);
                        return LinkState::Disconnected;
                    }
                }
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.handle_reply(&text),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        log::warn!("link closed by peer; reconnecting");
                        return LinkState::Disconnected;
                    }
                    Some(Err(e)) => {
                        log::warn!("link error: {}; reconnecting", e);
                        return LinkState::Disconnected;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    /// The peer only sends acks and pongs; anything else is logged and
    /// dropped.
    fn handle_reply(&self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(reply) => log::debug!("peer reply: {reply}"),
            Err(e) => log::debug!("dropping malformed peer frame: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    #[test]
    fn diff_against_empty_last_sent_enables_everything() {
        let (to_disable, to_enable) = compute_diff(&set(&[]), &set(&["a", "b"]));
        assert!(to_disable.is_empty());
        assert_eq!(sorted(to_enable), ["a", "b"]);
    }

    #[test]
    fn diff_collapses_enable_then_disable_to_nothing() {
        // enable("x"); disable("x") with nothing transmitted in between.
        let (to_disable, to_enable) = compute_diff(&set(&[]), &set(&[]));
        assert!(to_disable.is_empty());
        assert!(to_enable.is_empty());
    }

    #[test]
    fn diff_disables_what_the_peer_still_believes() {
        let (to_disable, to_enable) = compute_diff(&set(&["a", "b"]), &set(&["b"]));
        assert_eq!(sorted(to_disable), ["a"]);
        assert!(to_enable.is_empty());
    }

    #[test]
    fn diff_mixes_both_directions() {
        let (to_disable, to_enable) = compute_diff(&set(&["a", "b"]), &set(&["b", "c"]));
        assert_eq!(sorted(to_disable), ["a"]);
        assert_eq!(sorted(to_enable), ["c"]);
    }

    #[test]
    fn local_set_mutations_are_visible_in_snapshots() {
        let client = SyncClient::new(SyncConfig::default());
        client.enable("a");
        client.enable("b");
        client.disable("a");
        assert_eq!(client.desired(), set(&["b"]));
    }
}
