// 网络链路管理
// Link supervision: periodic connectivity check towards the broker and the IP info view

use crate::types::NetworkParams;
use log::{info, warn};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Interval between connectivity checks
pub const LINK_CHECK_INTERVAL_MS: u64 = 20_000;

/// Snapshot returned by `/getipinfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub sta_ip: String,
    pub sta_connected: bool,
    pub ap_ip: String,
    pub ap_connected_clients: u32,
}

pub trait LinkManager {
    /// Called once per scheduler tick
    fn service(&mut self, now_ms: u64);
    fn is_up(&self) -> bool;
    fn info(&self) -> LinkInfo;
    /// New credentials / endpoint were persisted
    fn apply(&mut self, params: &NetworkParams);
}

/// Host networking is managed by the OS; this only tracks the route towards the broker
#[derive(Debug)]
pub struct HostLink {
    params: NetworkParams,
    last_check_ms: Option<u64>,
    local_ip: Option<IpAddr>,
    restart_pending: bool,
}

impl HostLink {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            last_check_ms: None,
            local_ip: None,
            restart_pending: false,
        }
    }

    /// Endpoint changes take effect on the next start
    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    /// Local address the OS would use to reach the broker. Connecting a UDP socket
    /// only selects a route, nothing is sent. Hostnames are not resolved here.
    fn probe(&self) -> Option<IpAddr> {
        let broker: IpAddr = self.params.mqtt_server.parse().ok()?;
        let socket = UdpSocket::bind(SocketAddr::new(
            if broker.is_ipv4() {
                IpAddr::from([0u8; 4])
            } else {
                IpAddr::from([0u16; 8])
            },
            0,
        ))
        .ok()?;
        socket.connect(SocketAddr::new(broker, self.params.mqtt_port)).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }
}

impl LinkManager for HostLink {
    fn service(&mut self, now_ms: u64) {
        let due = self
            .last_check_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= LINK_CHECK_INTERVAL_MS);
        if !due {
            return;
        }
        self.last_check_ms = Some(now_ms);

        let ip = self.probe();
        match (self.local_ip, ip) {
            (None, Some(ip)) => info!("Link up, local address {}", ip),
            (Some(_), None) => warn!("Link to {} lost, rechecking", self.params.mqtt_server),
            _ => {}
        }
        self.local_ip = ip;
    }

    fn is_up(&self) -> bool {
        self.local_ip.is_some()
    }

    fn info(&self) -> LinkInfo {
        LinkInfo {
            sta_ip: self
                .local_ip
                .map_or_else(|| "Not connected".to_string(), |ip| ip.to_string()),
            sta_connected: self.local_ip.is_some(),
            ap_ip: "N/A".to_string(),
            ap_connected_clients: 0,
        }
    }

    fn apply(&mut self, params: &NetworkParams) {
        if params.mqtt_server != self.params.mqtt_server || params.mqtt_port != self.params.mqtt_port {
            warn!(
                "MQTT endpoint changed to {}:{}, restart to apply",
                params.mqtt_server, params.mqtt_port
            );
            self.restart_pending = true;
        }
        self.params = params.clone();
        self.last_check_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_broker_is_reachable() {
        let mut link = HostLink::new(NetworkParams::default());
        link.service(0);
        assert!(link.is_up());
        assert_eq!(link.info().sta_ip, "127.0.0.1");
    }

    #[test]
    fn hostname_broker_is_not_probed() {
        let mut link = HostLink::new(NetworkParams {
            mqtt_server: "broker.local".to_string(),
            ..Default::default()
        });
        link.service(0);
        assert!(!link.is_up());
        assert_eq!(link.info().sta_ip, "Not connected");
    }

    #[test]
    fn checks_are_paced() {
        let mut link = HostLink::new(NetworkParams {
            mqtt_server: "broker.local".to_string(),
            ..Default::default()
        });
        link.service(0);
        link.apply(&NetworkParams::default());
        assert!(link.restart_pending());
        // apply forces a recheck on the next tick
        link.service(10);
        assert!(link.is_up());
    }
}
