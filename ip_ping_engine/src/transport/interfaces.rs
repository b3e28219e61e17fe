//! Interface lookup shared by the transports.

use pnet::datalink::NetworkInterface;
use std::net::{IpAddr, Ipv4Addr};

fn has_ipv4(interface: &NetworkInterface) -> bool {
    interface.ips.iter().any(|ip| ip.is_ipv4())
}

/// A non-empty hint picks the first interface whose name contains it.
/// Otherwise prefer an interface that is up, not loopback and has IPv4, and
/// fall back to any interface with IPv4.
pub(super) fn select_interface<'a>(
    interfaces: &'a [NetworkInterface],
    hint: &str,
) -> Option<&'a NetworkInterface> {
    if !hint.is_empty() {
        return interfaces.iter().find(|i| i.name.contains(hint));
    }
    interfaces
        .iter()
        .find(|i| i.is_up() && !i.is_loopback() && has_ipv4(i))
        .or_else(|| interfaces.iter().find(|i| has_ipv4(i)))
}

pub(super) fn ipv4_addresses(interfaces: &[NetworkInterface]) -> Vec<Ipv4Addr> {
    interfaces
        .iter()
        .flat_map(|i| i.ips.iter())
        .filter_map(|ip| match ip.ip() {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn interface(name: &str, network: &str) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            description: String::new(),
            index: 0,
            mac: None,
            ips: vec![network.parse().unwrap()],
            flags: 0,
        }
    }

    #[test]
    fn hint_selects_by_substring() {
        let interfaces = vec![
            interface("lo", "127.0.0.1/8"),
            interface("enp3s0", "192.168.1.20/24"),
            interface("wlp2s0", "10.1.0.7/16"),
        ];
        assert_eq!(select_interface(&interfaces, "wlp").unwrap().name, "wlp2s0");
        assert!(select_interface(&interfaces, "tun").is_none());
        // Nothing reports itself up here, so automatic selection falls back
        // to the first interface carrying IPv4.
        assert_eq!(select_interface(&interfaces, "").unwrap().name, "lo");
    }

    #[test]
    fn collects_ipv4_addresses_only() {
        let interfaces = vec![
            interface("lo", "127.0.0.1/8"),
            interface("lo6", "::1/128"),
            interface("eth0", "192.0.2.9/24"),
        ];
        assert_eq!(
            ipv4_addresses(&interfaces),
            vec![Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(192, 0, 2, 9)]
        );
    }
}
