use crate::config::Config;
use crate::metrics::Metrics;
use crate::probe::executor::RemoteExecutor;
use crate::probe::probe_host;
use crate::sink::StatusSink;
use crate::state::State;
use crate::status::{now_unix, StatusDocument};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub sink_errors: usize,
}

/// Probes every configured host one after another and hands each status to
/// all sinks, then sleeps `interval_secs` and starts over.
pub struct Poller {
    cfg: Arc<Config>,
    executor: Arc<dyn RemoteExecutor>,
    sinks: Vec<Box<dyn StatusSink>>,
    state: Arc<RwLock<State>>,
    metrics: Arc<Metrics>,
}

impl Poller {
    pub fn new(
        cfg: Arc<Config>,
        executor: Arc<dyn RemoteExecutor>,
        sinks: Vec<Box<dyn StatusSink>>,
        state: Arc<RwLock<State>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics.set_hosts_configured(cfg.hosts.len());
        Self {
            cfg,
            executor,
            sinks,
            state,
            metrics,
        }
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        for (device, host) in &self.cfg.hosts {
            let started = Instant::now();
            let status = probe_host(self.executor.as_ref(), host)
                .instrument(info_span!("probe", device = %device))
                .await;
            self.metrics
                .observe_probe(device, &status, started.elapsed());

            summary.probed += 1;
            if status.running {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }

            let doc = StatusDocument::new(device.as_str(), status);
            self.state.write().await.record(device, doc.status.clone());

            for sink in &self.sinks {
                if let Err(err) = sink.emit(&doc).await {
                    error!(device = %device, sink = sink.name(), error = %err, "sink failed, record skipped");
                    self.metrics.inc_sink_error(sink.name());
                    summary.sink_errors += 1;
                }
            }
        }

        let snapshot = {
            let mut guard = self.state.write().await;
            guard.finish_cycle(now_unix());
            guard.clone()
        };
        self.metrics.inc_cycle();
        self.metrics.update_from_state(&snapshot);

        info!(
            probed = summary.probed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            sink_errors = summary.sink_errors,
            "polling cycle finished"
        );
        summary
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.cfg.interval();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received during polling cycle");
                    break;
                }
                _ = self.run_cycle() => {}
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, polling stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostConfig, SinksConfig, SshConfig};
    use crate::probe::executor::{ExecError, Execution};
    use crate::sink::SinkError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const FULL: &str = "up\n---@@@---\nfs\n---@@@---\nmem\n---@@@---\nactive\n---@@@---\n";

    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn execute(&self, address: &str, _command: &str) -> Execution {
            self.calls.lock().unwrap().push(address.to_string());
            if address.starts_with("down") {
                Execution::failed(
                    Vec::new(),
                    ExecError::Exit {
                        status: "exit status: 255".to_string(),
                        detail: ": Connection refused".to_string(),
                    },
                )
            } else {
                Execution::ok(FULL)
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        docs: Arc<Mutex<Vec<StatusDocument>>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn emit(&self, doc: &StatusDocument) -> Result<(), SinkError> {
            self.docs.lock().unwrap().push(doc.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl StatusSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn emit(&self, _doc: &StatusDocument) -> Result<(), SinkError> {
            Err(SinkError::Rejected { status: 500 })
        }
    }

    fn config(interval_secs: u64) -> Arc<Config> {
        let mut hosts = BTreeMap::new();
        for (device, address) in [("web-1", "root@web-1"), ("nas", "down@nas"), ("db-1", "root@db-1")] {
            hosts.insert(
                device.to_string(),
                HostConfig {
                    address: address.to_string(),
                    units: vec!["nginx".to_string()],
                },
            );
        }
        Arc::new(Config {
            interval_secs,
            listen: None,
            ssh: SshConfig::default(),
            sinks: SinksConfig::default(),
            hosts,
        })
    }

    fn build_poller(
        interval_secs: u64,
        sinks: Vec<Box<dyn StatusSink>>,
    ) -> (Poller, Arc<ScriptedExecutor>, Arc<RwLock<State>>, Arc<Metrics>) {
        let executor = Arc::new(ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
        });
        let state = Arc::new(RwLock::new(State::new(0)));
        let metrics = Metrics::new().unwrap();
        let poller = Poller::new(
            config(interval_secs),
            executor.clone(),
            sinks,
            state.clone(),
            metrics.clone(),
        );
        (poller, executor, state, metrics)
    }

    #[tokio::test]
    async fn cycle_probes_hosts_sequentially_in_device_order() {
        let recording = RecordingSink::default();
        let (poller, executor, state, _metrics) = build_poller(60, vec![Box::new(recording.clone())]);

        let summary = poller.run_cycle().await;

        assert_eq!(
            summary,
            CycleSummary {
                probed: 3,
                succeeded: 2,
                failed: 1,
                sink_errors: 0
            }
        );
        assert_eq!(
            *executor.calls.lock().unwrap(),
            ["root@db-1", "down@nas", "root@web-1"]
        );
        let docs = recording.docs.lock().unwrap();
        let devices: Vec<&str> = docs.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(devices, ["db-1", "nas", "web-1"]);
        assert_eq!(
            docs[1].status.error,
            "remote shell failed (exit status: 255): Connection refused"
        );

        let state = state.read().await;
        assert_eq!(state.cycles_completed, 1);
        assert_eq!(state.hosts.len(), 3);
        assert_eq!(state.hosts_up(), 2);
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_other_sinks_or_hosts() {
        let recording = RecordingSink::default();
        let (poller, _executor, _state, metrics) =
            build_poller(60, vec![Box::new(FailingSink), Box::new(recording.clone())]);

        let summary = poller.run_cycle().await;

        assert_eq!(summary.probed, 3);
        assert_eq!(summary.sink_errors, 3);
        assert_eq!(recording.docs.lock().unwrap().len(), 3);
        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains(r#"collector_sink_errors_total{sink="failing"} 3"#));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_while_sleeping() {
        let recording = RecordingSink::default();
        let (poller, _executor, state, _metrics) = build_poller(3600, vec![Box::new(recording.clone())]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move { poller.run(shutdown_rx).await });

        let mut waited = 0;
        while state.read().await.cycles_completed == 0 {
            assert!(waited < 500, "first cycle never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("poller stops promptly")
            .unwrap();
        assert_eq!(recording.docs.lock().unwrap().len(), 3);
        assert_eq!(state.read().await.cycles_completed, 1);
    }

    struct HangingExecutor {
        started: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl RemoteExecutor for HangingExecutor {
        async fn execute(&self, _address: &str, _command: &str) -> Execution {
            self.started.notify_one();
            std::future::pending::<Execution>().await
        }
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_while_a_session_hangs() {
        let started = Arc::new(tokio::sync::Notify::new());
        let recording = RecordingSink::default();
        let state = Arc::new(RwLock::new(State::new(0)));
        let poller = Poller::new(
            config(1),
            Arc::new(HangingExecutor {
                started: started.clone(),
            }),
            vec![Box::new(recording.clone())],
            state.clone(),
            Metrics::new().unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move { poller.run(shutdown_rx).await });
        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .expect("first probe started");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("poller stops while the probe is still pending")
            .unwrap();
        assert!(recording.docs.lock().unwrap().is_empty());
        assert_eq!(state.read().await.cycles_completed, 0);
    }
}
