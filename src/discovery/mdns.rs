//! mDNS browsing and advertisement.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::discovery::{parse_codecs, Device, DeviceBrowser, DeviceKind};
use crate::BridgeError;

/// Service type of audio sinks.
pub const RAOP_SERVICE: &str = "_raop._tcp.local.";

/// Service type of full media receivers; never matched as an audio sink.
const AIRPLAY_SERVICE: &str = "_airplay._tcp.local.";

fn mdns_error(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::backend("mdns", e)
}

/// Browses the local network for speakers.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    sinks: mdns_sd::Receiver<ServiceEvent>,
    others: mdns_sd::Receiver<ServiceEvent>,
}

impl MdnsBrowser {
    /// Starts an mDNS daemon and begins browsing.
    pub fn new() -> Result<Self, BridgeError> {
        let daemon = ServiceDaemon::new().map_err(mdns_error)?;
        let sinks = daemon.browse(RAOP_SERVICE).map_err(mdns_error)?;
        let others = daemon.browse(AIRPLAY_SERVICE).map_err(mdns_error)?;
        Ok(Self {
            daemon,
            sinks,
            others,
        })
    }

    fn collect(batch: &mut Vec<Device>, event: ServiceEvent, kind: &DeviceKind) {
        if let ServiceEvent::ServiceResolved(service) = event {
            if let Some(device) = device_from_service(&service, kind.clone()) {
                batch.push(device);
            }
        }
    }
}

#[async_trait]
impl DeviceBrowser for MdnsBrowser {
    async fn next_batch(&mut self) -> Option<Vec<Device>> {
        let sink = DeviceKind::Sink;
        let other = DeviceKind::Other("airplay".to_string());

        loop {
            let mut batch = Vec::new();
            tokio::select! {
                event = self.sinks.recv_async() => Self::collect(&mut batch, event.ok()?, &sink),
                event = self.others.recv_async() => Self::collect(&mut batch, event.ok()?, &other),
            }

            // Whatever else already arrived belongs to the same batch.
            while let Ok(event) = self.sinks.try_recv() {
                Self::collect(&mut batch, event, &sink);
            }
            while let Ok(event) = self.others.try_recv() {
                Self::collect(&mut batch, event, &other);
            }

            if !batch.is_empty() {
                return Some(batch);
            }
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        let _ = self.daemon.stop_browse(RAOP_SERVICE);
        let _ = self.daemon.stop_browse(AIRPLAY_SERVICE);
        let _ = self.daemon.shutdown();
    }
}

/// Instance name without the `<id>@` prefix and service suffix.
fn instance_name(fullname: &str, service: &str) -> String {
    let instance = fullname
        .strip_suffix(service)
        .unwrap_or(fullname)
        .trim_end_matches('.');
    match instance.split_once('@') {
        Some((_, name)) => name.to_string(),
        None => instance.to_string(),
    }
}

fn device_from_service(service: &ServiceInfo, kind: DeviceKind) -> Option<Device> {
    let ip = service.get_addresses_v4().into_iter().min()?;
    let service_type = match kind {
        DeviceKind::Sink => RAOP_SERVICE,
        DeviceKind::Other(_) => AIRPLAY_SERVICE,
    };

    let number = |key: &str, default: u32| {
        service
            .get_property_val_str(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    };

    Some(Device {
        name: instance_name(service.get_fullname(), service_type),
        ip: IpAddr::V4(*ip),
        port: service.get_port(),
        hostname: service.get_hostname().trim_end_matches('.').to_string(),
        codecs: service
            .get_property_val_str("cn")
            .map(parse_codecs)
            .unwrap_or_default(),
        sample_rate: number("sr", 44100),
        sample_size: number("ss", 16) as u16,
        channels: number("ch", 2) as u16,
        kind,
    })
}

/// An mDNS record announcing the receiver input as an audio sink.
pub(crate) struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertisement {
    /// Publishes `name` at `ip:port`. `codecs` is the advertised `cn` list.
    pub fn register(name: &str, ip: IpAddr, port: u16, codecs: &str) -> Result<Self, BridgeError> {
        let daemon = ServiceDaemon::new().map_err(mdns_error)?;

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let id = hasher.finish() & 0xFFFF_FFFF_FFFF;
        let instance = format!("{id:012X}@{name}");
        let host = format!("{}.local.", name.replace(|c: char| !c.is_ascii_alphanumeric(), "-"));

        let properties = [
            ("txtvers", "1"),
            ("ch", "2"),
            ("cn", codecs),
            ("et", "0"),
            ("sr", "44100"),
            ("ss", "16"),
            ("tp", "UDP"),
            ("md", "0,2"),
            ("vn", "3"),
        ];
        let info = ServiceInfo::new(RAOP_SERVICE, &instance, &host, ip, port, &properties[..])
            .map_err(mdns_error)?;
        let fullname = info.get_fullname().to_string();
        daemon.register(info).map_err(mdns_error)?;
        tracing::info!(%fullname, %ip, port, "receiver advertised");

        Ok(Self { daemon, fullname })
    }

    /// Withdraws the record and stops the daemon.
    pub fn withdraw(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            tracing::warn!(fullname = %self.fullname, "mDNS unregister failed: {e}");
        }
        let _ = self.daemon.shutdown();
        tracing::info!(fullname = %self.fullname, "receiver advertisement withdrawn");
    }
}
