//! Optional mDNS advertisement so clients on the local network can find the
//! relay without knowing its address.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

/// DNS-SD service type registered for the relay.
pub const SERVICE_TYPE: &str = "_tcp-relay._tcp.local.";

pub const DEFAULT_INSTANCE_NAME: &str = "tcp_relay";

/// Describes the relay listening on `addr`. A wildcard listen address is
/// advertised on every interface the daemon finds.
pub fn service_info(instance: &str, addr: SocketAddr) -> Result<ServiceInfo> {
    let host_name = format!("{instance}.local.");
    let properties = [("version", env!("CARGO_PKG_VERSION"))];

    let info = if addr.ip().is_unspecified() {
        ServiceInfo::new(
            SERVICE_TYPE,
            instance,
            &host_name,
            "",
            addr.port(),
            &properties[..],
        )
        .map(ServiceInfo::enable_addr_auto)
    } else {
        ServiceInfo::new(
            SERVICE_TYPE,
            instance,
            &host_name,
            addr.ip(),
            addr.port(),
            &properties[..],
        )
    };
    info.with_context(|| format!("invalid mDNS service for instance '{instance}'"))
}

/// A registered advertisement. Dropping it without [`Advertisement::withdraw`]
/// leaves the record to expire on its own.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertisement {
    pub fn register(instance: &str, addr: SocketAddr) -> Result<Self> {
        let info = service_info(instance, addr)?;
        let fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new().context("failed to start mDNS daemon")?;
        daemon
            .register(info)
            .with_context(|| format!("failed to register {fullname}"))?;
        info!(service = %fullname, port = addr.port(), "advertising relay over mDNS");

        Ok(Self { daemon, fullname })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Unregisters the service and stops the daemon.
    pub fn withdraw(self) {
        if let Err(err) = self.daemon.unregister(&self.fullname) {
            warn!(service = %self.fullname, error = ?err, "failed to unregister mDNS service");
        }
        if let Err(err) = self.daemon.shutdown() {
            warn!(error = ?err, "failed to stop mDNS daemon");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_a_bound_relay() {
        let addr: SocketAddr = "192.168.1.20:1302".parse().unwrap();
        let info = service_info("lab", addr).expect("valid service");

        assert_eq!(info.get_type(), SERVICE_TYPE);
        assert_eq!(info.get_fullname(), "lab._tcp-relay._tcp.local.");
        assert_eq!(info.get_hostname(), "lab.local.");
        assert_eq!(info.get_port(), 1302);
        assert_eq!(
            info.get_property_val_str("version"),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert!(!info.is_addr_auto());
    }

    #[test]
    fn wildcard_listen_uses_interface_addresses() {
        let addr: SocketAddr = "0.0.0.0:1302".parse().unwrap();
        let info = service_info(DEFAULT_INSTANCE_NAME, addr).expect("valid service");
        assert!(info.is_addr_auto());
        assert_eq!(info.get_port(), 1302);
    }

    #[test]
    fn register_and_withdraw() {
        let addr: SocketAddr = "127.0.0.1:1302".parse().unwrap();
        let advertisement = Advertisement::register("relay-test", addr).expect("registered");
        assert_eq!(advertisement.fullname(), "relay-test._tcp-relay._tcp.local.");
        advertisement.withdraw();
    }
}
