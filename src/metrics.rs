use crate::state::State;
use crate::status::{now_unix, Status};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub collector_probes_total: CounterVec,
    pub collector_host_up: GaugeVec,
    pub collector_host_units_reported: GaugeVec,
    pub collector_probe_duration_seconds: GaugeVec,
    pub collector_sink_errors_total: CounterVec,
    pub collector_cycles_total: Counter,
    pub collector_last_cycle_timestamp_seconds: Gauge,
    pub collector_hosts_configured: Gauge,
    pub collector_hosts_up: Gauge,
    pub collector_uptime_seconds: Gauge,
    pub collector_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let collector_probes_total = CounterVec::new(
            opts!(
                "collector_probes_total",
                "Host probes by outcome (succeeded/failed)"
            ),
            &["outcome"],
        )?;
        let collector_host_up = GaugeVec::new(
            opts!(
                "collector_host_up",
                "1 if the last probe of the device returned all system sections"
            ),
            &["device"],
        )?;
        let collector_host_units_reported = GaugeVec::new(
            opts!(
                "collector_host_units_reported",
                "Unit sections returned by the last probe of the device"
            ),
            &["device"],
        )?;
        let collector_probe_duration_seconds = GaugeVec::new(
            opts!(
                "collector_probe_duration_seconds",
                "Wall time of the last probe of the device"
            ),
            &["device"],
        )?;
        let collector_sink_errors_total = CounterVec::new(
            opts!(
                "collector_sink_errors_total",
                "Status documents a sink failed to accept"
            ),
            &["sink"],
        )?;
        let collector_cycles_total = Counter::with_opts(opts!(
            "collector_cycles_total",
            "Completed polling cycles"
        ))?;
        let collector_last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "collector_last_cycle_timestamp_seconds",
            "Unix time the last polling cycle finished"
        ))?;
        let collector_hosts_configured = Gauge::with_opts(opts!(
            "collector_hosts_configured",
            "Devices listed in the config"
        ))?;
        let collector_hosts_up = Gauge::with_opts(opts!(
            "collector_hosts_up",
            "Devices whose last probe succeeded"
        ))?;
        let collector_uptime_seconds = Gauge::with_opts(opts!(
            "collector_uptime_seconds",
            "Seconds since the collector started"
        ))?;
        let collector_scrape_count_total = Counter::with_opts(opts!(
            "collector_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &collector_probes_total)?;
        register(&registry, &collector_host_up)?;
        register(&registry, &collector_host_units_reported)?;
        register(&registry, &collector_probe_duration_seconds)?;
        register(&registry, &collector_sink_errors_total)?;
        register(&registry, &collector_cycles_total)?;
        register(&registry, &collector_last_cycle_timestamp_seconds)?;
        register(&registry, &collector_hosts_configured)?;
        register(&registry, &collector_hosts_up)?;
        register(&registry, &collector_uptime_seconds)?;
        register(&registry, &collector_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            collector_probes_total,
            collector_host_up,
            collector_host_units_reported,
            collector_probe_duration_seconds,
            collector_sink_errors_total,
            collector_cycles_total,
            collector_last_cycle_timestamp_seconds,
            collector_hosts_configured,
            collector_hosts_up,
            collector_uptime_seconds,
            collector_scrape_count_total,
        }))
    }

    pub fn observe_probe(&self, device: &str, status: &Status, elapsed: Duration) {
        let outcome = if status.running {
            "succeeded"
        } else {
            "failed"
        };
        self.collector_probes_total
            .with_label_values(&[outcome])
            .inc();
        self.collector_host_up
            .with_label_values(&[device])
            .set(if status.running { 1.0 } else { 0.0 });
        self.collector_host_units_reported
            .with_label_values(&[device])
            .set(status.units.len() as f64);
        self.collector_probe_duration_seconds
            .with_label_values(&[device])
            .set(elapsed.as_secs_f64());
    }

    pub fn inc_sink_error(&self, sink: &str) {
        self.collector_sink_errors_total
            .with_label_values(&[sink])
            .inc();
    }

    pub fn update_from_state(&self, state: &State) {
        self.collector_last_cycle_timestamp_seconds
            .set(state.last_cycle_timestamp_seconds as f64);
        self.collector_hosts_up.set(state.hosts_up() as f64);
        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.collector_uptime_seconds.set(uptime);
    }

    pub fn inc_cycle(&self) {
        self.collector_cycles_total.inc();
    }

    pub fn set_hosts_configured(&self, count: usize) {
        self.collector_hosts_configured.set(count as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.collector_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
