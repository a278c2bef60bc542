//! Minimal demonstration entry point: wires one `Instance` up to a real
//! interface and drives it until `SIGTERM`. The operator CLI and config
//! loader that would normally build the `InstanceConfig` and interface
//! list are out of scope here; this just proves the crate runs end to
//! end with stub external collaborators.

use std::net::Ipv4Addr;
use std::time::Duration;

use eigrpd_core::config::InstanceConfigBuilder;
use eigrpd_core::external::{FilterPredicate, PermitAll, RouteManager};
use eigrpd_core::instance::Instance;
use eigrpd_core::interface::{Interface, InterfaceType};
use eigrpd_core::net::{EigrpSocket, EigrpTransport};
use eigrpd_core::transport::Destination;
use eigrpd_core::auth::{AuthKey, Keychain};
use eigrpd_core::address::Prefix;

/// Logs installs/withdrawals instead of touching the kernel's routing
/// table — a real implementation would shell out to rtnetlink or similar.
struct LoggingRouteManager;
impl RouteManager for LoggingRouteManager {
    fn install(&mut self, prefix: Prefix, next_hops: &[Ipv4Addr]) {
        log::info!("installing {prefix} via {next_hops:?}");
    }
    fn withdraw(&mut self, prefix: Prefix) {
        log::info!("withdrawing {prefix}");
    }
}

/// No keys configured: every authenticated packet is rejected, every
/// outgoing packet is sent unauthenticated. Fine for a demo; a real
/// deployment wires this to its key-chain store.
struct EmptyKeychain;
impl Keychain for EmptyKeychain {
    fn send_key(&self, _iface: &str) -> Option<AuthKey> {
        None
    }
    fn key_by_id(&self, _iface: &str, _key_id: u32) -> Option<AuthKey> {
        None
    }
}

fn run() -> eigrpd_core::error::Result<()> {
    let as_number: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);

    let config = InstanceConfigBuilder::default().as_number(as_number).build()?;

    let mut instance = Instance::new(
        config,
        Box::new(LoggingRouteManager),
        Box::new(EmptyKeychain),
        Box::new(PermitAll) as Box<dyn FilterPredicate>,
    )?;

    let local_addr = Ipv4Addr::new(0, 0, 0, 0);
    instance.add_interface(Interface::new("eth0", InterfaceType::Broadcast, local_addr));

    let socket = EigrpSocket::bind(local_addr)?;
    let mut transport = EigrpTransport::new(socket);

    log::info!("eigrpd starting for AS {as_number}");

    // Real signal handling (clean shutdown on SIGTERM) is process plumbing
    // left to the operator CLI; this loop just runs until killed.
    loop {
        instance.run_due_timers();
        for pending in instance.take_outbound() {
            let dest = match pending.dest {
                Destination::Unicast(addr) => addr,
                Destination::Multicast => eigrpd_core::net::socket::EIGRP_MULTICAST_GROUP,
            };
            if let Err(e) = transport.send(&pending.packet, dest) {
                log::warn!("send on {}: {e}", pending.iface);
            }
        }
        std::thread::sleep(Duration::from_millis(100));

        match transport.recv() {
            Ok((packet, from, raw)) => {
                if let Err(e) = instance.receive("eth0", from, packet, &raw) {
                    log::warn!("dropping packet from {from}: {e}");
                }
            }
            Err(e) => log::trace!("recv: {e}"),
        }
    }
}

fn main() {
    env_logger::init();
    let code = match run() {
        Ok(()) => 0,
        Err(e @ (eigrpd_core::error::Error::ErrConfig(_) | eigrpd_core::error::Error::ErrConfigDynamic(_))) => {
            log::error!("configuration error: {e}");
            2
        }
        Err(e) => {
            log::error!("fatal: {e}");
            1
        }
    };
    std::process::exit(code);
}
