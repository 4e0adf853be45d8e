// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interface, address and architecture helpers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::controlplane::{CONTROL_PLANE_PORT, LinkStatus};
use crate::models::UNKNOWN_ARCH;

/// Interface name prefixes that never carry the node's external address.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "bond", "br", "veth", "docker", "cni", "flannel", "kube", "wg", "tun", "tap", "teql",
    "sit", "ip6tnl", "dummy",
];

const ZERO_MAC: &str = "00:00:00:00:00:00";

/// Pick the hardware address of the most likely external interface.
///
/// Virtual interfaces and empty or all-zero addresses are skipped. The
/// rest are scored: carrier up +10, operationally up +5, `en*` naming +2.
/// The first interface with the highest positive score wins.
pub fn best_external_mac(links: &[LinkStatus]) -> Option<String> {
    let mut best: Option<&LinkStatus> = None;
    let mut best_score = 0;

    for link in links {
        if VIRTUAL_INTERFACE_PREFIXES
            .iter()
            .any(|prefix| link.name.starts_with(prefix))
        {
            continue;
        }
        let mac = link.hardware_addr.trim();
        if mac.is_empty() || mac == ZERO_MAC {
            continue;
        }

        let mut score = 0;
        if link.link_up {
            score += 10;
        }
        if link.operational_state.eq_ignore_ascii_case("up") {
            score += 5;
        }
        if link.name.starts_with("en") {
            score += 2;
        }

        if score > best_score {
            best_score = score;
            best = Some(link);
        }
    }

    best.map(|link| link.hardware_addr.trim().to_lowercase())
}

/// Map `/proc/cpuinfo` content to an architecture name.
pub fn detect_arch(cpuinfo: &str) -> &'static str {
    let text = cpuinfo.to_lowercase();
    if text.contains("aarch64") || text.contains("armv8") {
        "arm64"
    } else if text.contains("x86_64") {
        "amd64"
    } else if text.contains("riscv64") || text.contains("rv64") {
        "riscv64"
    } else if text.contains("armv7") || text.contains("v7l") {
        "armv7"
    } else {
        UNKNOWN_ARCH
    }
}

fn parse_ip(address: &str) -> Option<IpAddr> {
    // Registries may publish addresses with a prefix length.
    let bare = address.split('/').next().unwrap_or(address).trim();
    bare.parse::<IpAddr>()
        .ok()
        .or_else(|| bare.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

fn is_global_unicast_v4(ip: &Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_unspecified()
        || ip.is_broadcast())
}

/// Choose a routable address: a global-unicast IPv4 address if any, else any IPv4.
pub fn select_address(addresses: &[String]) -> Option<String> {
    let v4: Vec<Ipv4Addr> = addresses
        .iter()
        .filter_map(|a| match parse_ip(a) {
            Some(IpAddr::V4(ip)) => Some(ip),
            _ => None,
        })
        .collect();

    v4.iter()
        .find(|ip| is_global_unicast_v4(ip))
        .or_else(|| v4.first())
        .map(|ip| ip.to_string())
}

/// `address` with the management port added when it has none.
pub fn endpoint(address: &str) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    match address.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, CONTROL_PLANE_PORT).to_string(),
        Err(_) => format!("{}:{}", address, CONTROL_PLANE_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str, mac: &str, up: bool, oper: &str) -> LinkStatus {
        LinkStatus {
            name: name.into(),
            hardware_addr: mac.into(),
            link_up: up,
            operational_state: oper.into(),
        }
    }

    #[test]
    fn test_best_mac_prefers_up_physical() {
        let links = vec![
            link("lo", "00:00:00:00:00:00", true, "up"),
            link("cni0", "AA:AA:AA:AA:AA:AA", true, "up"),
            link("eth1", "11:22:33:44:55:66", false, "down"),
            link("enp3s0", "DE:AD:BE:EF:00:01", true, "up"),
            link("eth0", "de:ad:be:ef:00:02", true, "up"),
        ];
        assert_eq!(best_external_mac(&links).as_deref(), Some("de:ad:be:ef:00:01"));
    }

    #[test]
    fn test_best_mac_needs_positive_score() {
        let links = vec![
            link("eth0", "11:22:33:44:55:66", false, "down"),
            link("veth9", "aa:bb:cc:dd:ee:ff", true, "up"),
            link("eth1", "", true, "up"),
        ];
        assert_eq!(best_external_mac(&links), None);
    }

    #[test]
    fn test_detect_arch() {
        assert_eq!(detect_arch("processor\t: 0\nCPU architecture: AArch64"), "arm64");
        assert_eq!(detect_arch("flags : fpu lm\nmodel name : x86_64 CPU"), "amd64");
        assert_eq!(detect_arch("isa : rv64imafdc"), "riscv64");
        assert_eq!(detect_arch("model name : ARMv7 Processor rev 4 (v7l)"), "armv7");
        assert_eq!(detect_arch("something else"), "Unknown");
    }

    #[test]
    fn test_select_address() {
        let addrs = vec![
            "fe80::1".to_string(),
            "169.254.1.1".to_string(),
            "10.0.0.12/24".to_string(),
        ];
        assert_eq!(select_address(&addrs).as_deref(), Some("10.0.0.12"));

        let only_link_local = vec!["fd00::1".to_string(), "169.254.3.4".to_string()];
        assert_eq!(select_address(&only_link_local).as_deref(), Some("169.254.3.4"));
        assert_eq!(select_address(&["fd00::1".to_string()]), None);
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(endpoint("10.0.0.1"), "10.0.0.1:50000");
        assert_eq!(endpoint("10.0.0.1:6443"), "10.0.0.1:6443");
        assert_eq!(endpoint("fd00::1"), "[fd00::1]:50000");
    }
}
