//! Local address discovery.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use if_addrs::IfAddr;

/// The address other hosts use to reach this one: the source address the OS
/// picks for an outbound route.  No packet is sent.
///
/// Falls back to `127.0.0.1` when the host has no route.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// `<ip>/<prefix length>` of the local interface that owns `ip`.
///
/// The prefix is `unknown` when no interface carries `ip` or the interfaces
/// cannot be listed.
pub fn local_network(ip: IpAddr) -> String {
    let prefix = if_addrs::get_if_addrs().ok().and_then(|interfaces| {
        interfaces.into_iter().find_map(|interface| match interface.addr {
            IfAddr::V4(v4) if IpAddr::V4(v4.ip) == ip => Some(u32::from(v4.netmask).count_ones()),
            IfAddr::V6(v6) if IpAddr::V6(v6.ip) == ip => Some(u128::from(v6.netmask).count_ones()),
            _ => None,
        })
    });
    network_label(ip, prefix)
}

fn network_label(ip: IpAddr, prefix: Option<u32>) -> String {
    match prefix {
        Some(len) => format!("{ip}/{len}"),
        None => format!("{ip}/unknown"),
    }
}

/// The callback URL advertised in the handshake.
pub fn provider_url(ip: IpAddr, port: u16) -> String {
    format!("http://{ip}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ip_is_not_unspecified() {
        assert!(!local_ip().is_unspecified());
    }

    #[test]
    fn test_network_label() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(network_label(ip, Some(24)), "192.168.1.20/24");
        assert_eq!(network_label(ip, None), "192.168.1.20/unknown");
    }

    #[test]
    fn test_local_network_of_foreign_address_is_unknown() {
        // 192.0.2.0/24 is reserved for documentation and never assigned.
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(local_network(ip), "192.0.2.1/unknown");
    }

    #[test]
    fn test_local_network_keeps_the_address() {
        let ip = local_ip();
        assert!(local_network(ip).starts_with(&format!("{ip}/")));
    }

    #[test]
    fn test_provider_url_format() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(provider_url(ip, 3500), "http://10.0.0.9:3500");
    }
}
