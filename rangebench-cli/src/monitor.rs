//! Host statistics.

use std::fmt;
use std::fs;

use rangebench_engine::{HostSample, MonitorError, SystemMonitor};
use sysinfo::{Networks, System};

const SNMP_PATH: &str = "/proc/net/snmp";

/// Samples CPU utilization and network counters of the local host.
///
/// TCP retransmits are read from `/proc/net/snmp` and are only available on Linux.
pub struct HostMonitor {
    system: System,
    networks: Networks,
}

impl HostMonitor {
    /// Creates a monitor. The first CPU sample covers the time since creation.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();

        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMonitor").finish_non_exhaustive()
    }
}

impl SystemMonitor for HostMonitor {
    fn sample(&mut self) -> Result<HostSample, MonitorError> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(MonitorError::Unavailable("no CPU statistics".to_owned()));
        }

        self.networks.refresh();
        let (network_bytes_in, network_bytes_out) = self
            .networks
            .iter()
            .fold((0, 0), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        Ok(HostSample {
            cpu_utilization_pct: self.system.global_cpu_info().cpu_usage(),
            network_bytes_in,
            network_bytes_out,
            tcp_retransmits: fs::read_to_string(SNMP_PATH)
                .ok()
                .and_then(|snmp| parse_retransmits(&snmp)),
        })
    }
}

/// Extracts `RetransSegs` from the `Tcp:` section of `/proc/net/snmp`.
///
/// The section consists of a header line with field names followed by a line with values.
fn parse_retransmits(snmp: &str) -> Option<u64> {
    let mut tcp = snmp.lines().filter(|line| line.starts_with("Tcp:"));
    let header = tcp.next()?;
    let values = tcp.next()?;

    let index = header.split_whitespace().position(|f| f == "RetransSegs")?;
    values.split_whitespace().nth(index)?.parse().ok()
}
