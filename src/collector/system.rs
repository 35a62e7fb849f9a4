use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Disks, Networks, System};

use super::snapshot::SystemTelemetry;

/// Source of host resource readings.
#[async_trait]
pub trait SystemProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn sample(&self) -> Result<SystemTelemetry>;
}

/// Reads host telemetry through `sysinfo`.
///
/// Refreshing is blocking, so each sample runs on the blocking pool.
pub struct SysinfoProvider {
    state: Arc<Mutex<SysinfoState>>,
}

struct SysinfoState {
    system: System,
    disks: Disks,
    networks: Networks,
    prev_network: Option<(u64, u64, Instant)>,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one
        system.refresh_cpu_all();
        system.refresh_memory();

        Self {
            state: Arc::new(Mutex::new(SysinfoState {
                system,
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
                prev_network: None,
            })),
        }
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoState {
    fn read(&mut self) -> SystemTelemetry {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.disks.refresh();
        self.networks.refresh();

        let memory_total = self.system.total_memory();
        let memory_free = self.system.available_memory();
        let memory_used = memory_total.saturating_sub(memory_free);

        // Root filesystem if present, otherwise the largest disk
        let disk = self
            .disks
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| self.disks.iter().max_by_key(|d| d.total_space()));
        let (disk_total, disk_free) = disk
            .map(|d| (d.total_space(), d.available_space()))
            .unwrap_or((0, 0));

        let (rx_total, tx_total) = self
            .networks
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        let now = Instant::now();
        let (network_rx, network_tx) = match self.prev_network {
            Some((prev_rx, prev_tx, at)) => {
                let secs = now.duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    (
                        rx_total.saturating_sub(prev_rx) as f64 / secs,
                        tx_total.saturating_sub(prev_tx) as f64 / secs,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };
        self.prev_network = Some((rx_total, tx_total, now));

        let load = System::load_average();

        SystemTelemetry {
            cpu_usage: self.system.global_cpu_usage() as f64,
            cpu_cores: self.system.cpus().len(),
            memory_total,
            memory_free,
            memory_used,
            disk_total,
            disk_free,
            disk_used: disk_total.saturating_sub(disk_free),
            network_rx,
            network_tx,
            load: [load.one, load.five, load.fifteen],
        }
    }
}

#[async_trait]
impl SystemProvider for SysinfoProvider {
    fn name(&self) -> &str { "sysinfo" }

    async fn sample(&self) -> Result<SystemTelemetry> {
        let state = self.state.clone();
        let telemetry = tokio::task::spawn_blocking(move || state.lock().read()).await?;
        Ok(telemetry)
    }
}
