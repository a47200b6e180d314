//! Host Prober: a pure function over the local machine's identity and load.
//!
//! CPU/memory enumeration follows `cmd/diagnostics.rs`'s use of `sysinfo`;
//! interface enumeration needs per-interface IPv4 addresses and up/loopback
//! flags that `sysinfo::Networks` doesn't expose directly, so `if-addrs`
//! supplies that half (grounded in the pack's infra-tooling repos).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::System;

use crate::error::{AgentError, Result};

/// Prefixes identifying virtual/container-management interfaces to exclude
/// from Node Identity, per spec.md §4.B.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "docker", "veth", "br-", "cni", "flannel", "lo", "kube", "vmnet", "virbr", "zt",
    "tailscale", "vEthernet",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub host_ips: Vec<String>,
    pub hostname: String,
    pub os: String,
    pub os_version: String,
    pub kernel_version: String,
    pub cpu_total: usize,
    pub cpu_used_percent: f64,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
}

fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Enumerates non-virtual, non-loopback, up IPv4 addresses.
fn enumerate_host_ips() -> Result<Vec<String>> {
    let interfaces = if_addrs::get_if_addrs()
        .map_err(|e| AgentError::Internal(format!("failed to enumerate interfaces: {e}")))?;

    let addrs: Vec<String> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter(|iface| !is_virtual_interface(&iface.name))
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(v4.ip.to_string()),
            if_addrs::IfAddr::V6(_) => None,
        })
        .collect();

    if addrs.is_empty() {
        return Err(AgentError::NoAddress);
    }
    Ok(addrs)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Samples CPU usage as a delta between two refreshes ~200ms apart, the same
/// two-sample approach `original_source/interval/node/cpu.go` takes against
/// `/proc/stat`.
pub async fn probe() -> Result<NodeIdentity> {
    let host_ips = enumerate_host_ips()?;

    let mut sys = System::new_all();
    sys.refresh_cpu_usage();
    tokio::time::sleep(Duration::from_millis(200)).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_used_percent = if sys.cpus().is_empty() {
        0.0
    } else {
        let total: f64 = sys.cpus().iter().map(|c| c.cpu_usage() as f64).sum();
        round2(total / sys.cpus().len() as f64)
    };

    Ok(NodeIdentity {
        host_ips,
        hostname: System::host_name().unwrap_or_default(),
        os: System::name().unwrap_or_default(),
        os_version: System::os_version().unwrap_or_default(),
        kernel_version: System::kernel_version().unwrap_or_default(),
        cpu_total: sys.cpus().len(),
        cpu_used_percent,
        memory_total_bytes: sys.total_memory(),
        memory_used_bytes: sys.used_memory(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_virtual_interface_prefixes() {
        assert!(is_virtual_interface("docker0"));
        assert!(is_virtual_interface("veth1234"));
        assert!(is_virtual_interface("br-abcdef"));
        assert!(is_virtual_interface("tailscale0"));
        assert!(!is_virtual_interface("eth0"));
        assert!(!is_virtual_interface("en0"));
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(0.0), 0.0);
    }
}
