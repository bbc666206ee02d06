//! Alert arbitration actor.
//!
//! All channel state lives on a single task and is only reachable through
//! the command channel, so nothing in here takes a lock. Commands mutate the
//! per-channel `alert name -> asserting sources` maps; after every mutation
//! the visible alert per channel is re-resolved and the output sink driven
//! on transitions only.

use std::collections::{HashMap, HashSet};

use lib_common::HeapBy;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::led_logic::config::Alert;
use crate::led_logic::sink::OutputSink;

/// Number of output channels on the indicator strip.
pub const CHANNEL_COUNT: usize = 8;

/// One channel's active alerts and the sources asserting each of them.
pub type ChannelAlerts = HashMap<String, HashSet<String>>;

pub enum Command {
    Enable {
        alert: String,
        source: String,
    },
    Disable {
        alert: String,
        source: String,
    },
    /// Reserved hook; connection bookkeeping happens in the endpoint layer.
    RegisterSource {
        source: String,
    },
    UnregisterSource {
        source: String,
    },
    CurrentAlerts {
        reply: oneshot::Sender<Vec<ChannelAlerts>>,
    },
    VisibleAlerts {
        reply: oneshot::Sender<Vec<Option<String>>>,
    },
}

pub struct Arbiter {
    rx: mpsc::UnboundedReceiver<Command>,
    alerts: HashMap<String, Alert>,
    /// One entry per channel.
    active: Vec<ChannelAlerts>,
    /// Last decision driven to the sink, per channel.
    visible: Vec<Option<String>>,
    /// `None` runs degraded: transitions are logged only.
    sink: Option<Box<dyn OutputSink>>,
}

impl Arbiter {
    pub fn new(alerts: Vec<Alert>, sink: Option<Box<dyn OutputSink>>) -> (Self, ArbiterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let alerts = alerts
            .into_iter()
            .map(|alert| (alert.name.clone(), alert))
            .collect();
        (
            Self {
                rx,
                alerts,
                active: vec![ChannelAlerts::new(); CHANNEL_COUNT],
                visible: vec![None; CHANNEL_COUNT],
                sink,
            },
            ArbiterHandle { tx },
        )
    }

    /// Process commands until shutdown or until every handle is gone.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        // A previous process may have left channels lit.
        if let Some(sink) = self.sink.as_mut() {
            for channel in 0..CHANNEL_COUNT {
                sink.clear_channel(channel);
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("arbiter shutting down");
                    return;
                }
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => return,
                }
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enable { alert, source } => {
                match self.alerts.get(&alert) {
                    Some(def) => {
                        self.active[def.channel]
                            .entry(alert)
                            .or_default()
                            .insert(source);
                    }
                    None => log::debug!("enable for unknown alert `{alert}` ignored"),
                }
                self.resolve();
            }
            Command::Disable { alert, source } => {
                match self.alerts.get(&alert) {
                    Some(def) => {
                        if let Some(sources) = self.active[def.channel].get_mut(&alert) {
                            sources.remove(&source);
                            if sources.is_empty() {
                                self.active[def.channel].remove(&alert);
                            }
                        } else {
                            log::debug!("disable for inactive alert `{alert}` ignored");
                        }
                    }
                    None => log::debug!("disable for unknown alert `{alert}` ignored"),
                }
                self.resolve();
            }
            Command::RegisterSource { source } => {
                log::debug!("source `{source}` registered");
            }
            Command::UnregisterSource { source } => {
                for channel in self.active.iter_mut() {
                    for sources in channel.values_mut() {
                        sources.remove(&source);
                    }
                    channel.retain(|_, sources| !sources.is_empty());
                }
                log::debug!("source `{source}` unregistered");
                self.resolve();
            }
            Command::CurrentAlerts { reply } => {
                let _ = reply.send(self.active.clone());
            }
            Command::VisibleAlerts { reply } => {
                let _ = reply.send(self.visible.clone());
            }
        }
    }

    /// Pick the lowest-priority-value active alert per channel and drive the
    /// sink on transitions. Equal priorities resolve in arbitrary order; no
    /// deterministic tie-break is promised.
    fn resolve(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            debug_assert!(
                self.active[channel].values().all(|s| !s.is_empty()),
                "empty source set left behind on channel {channel}"
            );
            self.active[channel].retain(|_, sources| !sources.is_empty());

            let mut ranked = HeapBy::new(|a: &&Alert, b: &&Alert| a.priority.cmp(&b.priority));
            for name in self.active[channel].keys() {
                if let Some(def) = self.alerts.get(name) {
                    ranked.push(def);
                }
            }
            let winner = ranked
                .peek()
                .map(|def| (def.name.clone(), def.color.clone()));

            let decision = winner.as_ref().map(|(name, _)| name.clone());
            if decision == self.visible[channel] {
                continue;
            }
            match &winner {
                Some((name, color)) => {
                    log::info!("channel {channel} -> {name} ({color})");
                    if let Some(sink) = self.sink.as_mut() {
                        sink.set_channel(channel, color);
                    }
                }
                None => {
                    log::info!("channel {channel} cleared");
                    if let Some(sink) = self.sink.as_mut() {
                        sink.clear_channel(channel);
                    }
                }
            }
            self.visible[channel] = decision;
        }
    }
}

#[derive(Clone)]
pub struct ArbiterHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ArbiterHandle {
    pub fn for_source(&self, source: impl Into<String>) -> SourceHandle {
        SourceHandle {
            tx: self.tx.clone(),
            source: source.into(),
        }
    }

    /// Snapshot of every channel's active alerts and their sources. The
    /// reply reflects all commands enqueued strictly before this call and
    /// none after. Must not be awaited from the arbiter's own task.
    pub async fn current_alerts(&self) -> anyhow::Result<Vec<ChannelAlerts>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::CurrentAlerts { reply })
            .map_err(|_| anyhow::anyhow!("arbiter is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("arbiter dropped the query"))
    }

    /// The resolved alert name per channel, or `None` for a dark channel.
    /// Same synchronization contract as [`current_alerts`](Self::current_alerts).
    pub async fn visible_alerts(&self) -> anyhow::Result<Vec<Option<String>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::VisibleAlerts { reply })
            .map_err(|_| anyhow::anyhow!("arbiter is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("arbiter dropped the query"))
    }
}

/// Fire-and-forget facade bound to one source identity, handed to each
/// connection. Sends never block; a dead arbiter turns them into no-ops.
#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::UnboundedSender<Command>,
    source: String,
}

impl SourceHandle {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn register(&self) {
        let _ = self.tx.send(Command::RegisterSource {
            source: self.source.clone(),
        });
    }

    pub fn enable(&self, alert: &str) {
        let _ = self.tx.send(Command::Enable {
            alert: alert.to_string(),
            source: self.source.clone(),
        });
    }

    pub fn disable(&self, alert: &str) {
        let _ = self.tx.send(Command::Disable {
            alert: alert.to_string(),
            source: self.source.clone(),
        });
    }

    pub fn unregister(&self) {
        let _ = self.tx.send(Command::UnregisterSource {
            source: self.source.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkCall {
        Set(usize, String),
        Clear(usize),
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        calls: Arc<Mutex<Vec<SinkCall>>>,
    }

    impl OutputSink for RecordingSink {
        fn set_channel(&mut self, channel: usize, color: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(SinkCall::Set(channel, color.to_string()));
        }

        fn clear_channel(&mut self, channel: usize) {
            self.calls.lock().unwrap().push(SinkCall::Clear(channel));
        }
    }

    fn test_alerts() -> Vec<Alert> {
        vec![
            Alert {
                name: "build-failed".into(),
                channel: 0,
                color: "red".into(),
                priority: 0,
            },
            Alert {
                name: "meeting-soon".into(),
                channel: 0,
                color: "blue".into(),
                priority: 1,
            },
            Alert {
                name: "mail-unread".into(),
                channel: 1,
                color: "green".into(),
                priority: 0,
            },
        ]
    }

    fn spawn_arbiter(
        sink: Option<Box<dyn OutputSink>>,
    ) -> (ArbiterHandle, broadcast::Sender<()>) {
        let (arbiter, handle) = Arbiter::new(test_alerts(), sink);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(arbiter.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    #[tokio::test]
    async fn highest_priority_alert_wins_the_channel() {
        let sink = RecordingSink::default();
        let calls = sink.calls.clone();
        let (handle, _shutdown) = spawn_arbiter(Some(Box::new(sink)));
        let ci = handle.for_source("ci");
        let calendar = handle.for_source("calendar");

        calendar.enable("meeting-soon");
        ci.enable("build-failed");
        let visible = handle.visible_alerts().await.unwrap();
        assert_eq!(visible[0].as_deref(), Some("build-failed"));

        ci.disable("build-failed");
        let visible = handle.visible_alerts().await.unwrap();
        assert_eq!(visible[0].as_deref(), Some("meeting-soon"));

        calendar.disable("meeting-soon");
        let visible = handle.visible_alerts().await.unwrap();
        assert_eq!(visible[0], None);

        // Startup clears all channels, then channel 0 transitions only.
        let transitions: Vec<_> = calls
            .lock()
            .unwrap()
            .iter()
            .skip(CHANNEL_COUNT)
            .cloned()
            .collect();
        assert_eq!(
            transitions,
            vec![
                SinkCall::Set(0, "blue".into()),
                SinkCall::Set(0, "red".into()),
                SinkCall::Set(0, "blue".into()),
                SinkCall::Clear(0),
            ]
        );
    }

    #[tokio::test]
    async fn alert_stays_active_until_the_last_source_leaves() {
        let (handle, _shutdown) = spawn_arbiter(None);
        let first = handle.for_source("ci-a");
        let second = handle.for_source("ci-b");

        first.enable("build-failed");
        second.enable("build-failed");
        first.disable("build-failed");
        let visible = handle.visible_alerts().await.unwrap();
        assert_eq!(visible[0].as_deref(), Some("build-failed"));

        second.disable("build-failed");
        assert_eq!(handle.visible_alerts().await.unwrap()[0], None);
    }

    #[tokio::test]
    async fn unregister_removes_every_trace_of_a_source() {
        let (handle, _shutdown) = spawn_arbiter(None);
        let flaky = handle.for_source("flaky");
        let steady = handle.for_source("steady");

        flaky.enable("build-failed");
        flaky.enable("mail-unread");
        steady.enable("build-failed");
        flaky.unregister();

        let current = handle.current_alerts().await.unwrap();
        assert!(current
            .iter()
            .all(|channel| channel.values().all(|sources| !sources.contains("flaky"))));
        assert!(current[0]["build-failed"].contains("steady"));
        // mail-unread had only the flaky source; its channel went dark.
        assert_eq!(handle.visible_alerts().await.unwrap()[1], None);
    }

    #[tokio::test]
    async fn redundant_enables_do_not_rewrite_the_sink() {
        let sink = RecordingSink::default();
        let calls = sink.calls.clone();
        let (handle, _shutdown) = spawn_arbiter(Some(Box::new(sink)));
        // Synchronize past the startup clears, then forget them.
        let _ = handle.visible_alerts().await.unwrap();
        calls.lock().unwrap().clear();

        let source = handle.for_source("ci");
        source.enable("build-failed");
        source.enable("build-failed");
        let _ = handle.visible_alerts().await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![SinkCall::Set(0, "red".into())]
        );
    }

    #[tokio::test]
    async fn unknown_alert_is_a_noop() {
        let (handle, _shutdown) = spawn_arbiter(None);
        handle.for_source("ci").enable("no-such-alert");
        let current = handle.current_alerts().await.unwrap();
        assert!(current.iter().all(|channel| channel.is_empty()));
    }

    #[tokio::test]
    async fn queries_work_without_a_sink() {
        let (handle, _shutdown) = spawn_arbiter(None);
        handle.for_source("ci").enable("build-failed");
        assert_eq!(
            handle.visible_alerts().await.unwrap()[0].as_deref(),
            Some("build-failed")
        );
        assert_eq!(
            handle.current_alerts().await.unwrap()[0]["build-failed"].len(),
            1
        );
    }
}
