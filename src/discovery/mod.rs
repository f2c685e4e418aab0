//! Speaker discovery.
//!
//! Discovery is a continuous feed of device batches. [`discover`] scans each
//! batch as it arrives and returns the first device matching a
//! [`DeviceFilter`], giving up after a caller-supplied timeout.

mod device;
mod filter;
mod mdns;

pub use device::{parse_codecs, Device, DeviceKind, CODEC_ALAC, CODEC_PCM};
pub use filter::DeviceFilter;
pub use mdns::{MdnsBrowser, RAOP_SERVICE};
pub(crate) use mdns::Advertisement;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::BridgeError;

/// A source of device batches.
#[async_trait]
pub trait DeviceBrowser: Send {
    /// Waits for the next batch. `None` means the feed has ended.
    async fn next_batch(&mut self) -> Option<Vec<Device>>;
}

/// Creates a fresh browser for each discovery.
pub type BrowserFactory = Arc<dyn Fn() -> Result<Box<dyn DeviceBrowser>, BridgeError> + Send + Sync>;

/// Default factory: browse the local network over mDNS.
pub fn mdns_browser_factory() -> BrowserFactory {
    Arc::new(|| Ok(Box::new(MdnsBrowser::new()?) as Box<dyn DeviceBrowser>))
}

/// A browser replaying fixed batches, then waiting forever.
///
/// Useful for tests and for pinning a known device list.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    batches: VecDeque<Vec<Device>>,
}

impl StaticBrowser {
    /// Creates a browser yielding `batches` in order.
    pub fn new(batches: Vec<Vec<Device>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// Returns a factory handing out clones of this browser.
    pub fn factory(self) -> BrowserFactory {
        Arc::new(move || Ok(Box::new(self.clone()) as Box<dyn DeviceBrowser>))
    }
}

#[async_trait]
impl DeviceBrowser for StaticBrowser {
    async fn next_batch(&mut self) -> Option<Vec<Device>> {
        match self.batches.pop_front() {
            Some(batch) => Some(batch),
            None => std::future::pending().await,
        }
    }
}

/// Returns the first device in `batch` matching `filter`.
///
/// With `verbose`, every device is logged whether it matches or not.
pub fn find_match<'a>(batch: &'a [Device], filter: &DeviceFilter, verbose: bool) -> Option<&'a Device> {
    let mut found = None;
    for device in batch {
        if verbose {
            tracing::info!(target: "stream_bridge::discovery", "{device}");
        }
        if found.is_none() && filter.matches(device) {
            found = Some(device);
            if !verbose {
                break;
            }
        }
    }
    found
}

/// Scans batches from `browser` until a device matches or `timeout` expires.
///
/// # Errors
///
/// [`BridgeError::DiscoveryTimeout`] when nothing matched in time, or a
/// backend error if the feed ended.
pub async fn discover(
    browser: &mut dyn DeviceBrowser,
    filter: &DeviceFilter,
    timeout: Duration,
    verbose: bool,
) -> Result<Device, BridgeError> {
    let scan = async {
        while let Some(batch) = browser.next_batch().await {
            tracing::debug!(devices = batch.len(), "discovery batch");
            if let Some(device) = find_match(&batch, filter, verbose) {
                return Ok(device.clone());
            }
        }
        Err(BridgeError::backend("discovery", "device feed ended"))
    };

    match tokio::time::timeout(timeout, scan).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::DiscoveryTimeout {
            filter: filter.to_string(),
            timeout,
        }),
    }
}
