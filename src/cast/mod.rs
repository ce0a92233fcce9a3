//! Device-control collaborator: discovery, status feed and launch commands.

pub mod castv2;
pub mod discovery;

use crate::status::DeviceStatusSnapshot;
use anyhow::{Context, Result};
use std::future::Future;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub use castv2::LaunchAck;
pub use discovery::{CastDevice, DiscoveryError};

const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The operations the launcher needs from a cast device.
///
/// Implementations must not block the calling task; blocking I/O belongs on
/// the blocking pool.
pub trait CastControl: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn current_status(&self) -> impl Future<Output = Result<DeviceStatusSnapshot>> + Send;

    /// Ask the device to show `url` in the dashboard app. Repeating this while
    /// the dashboard is already showing is harmless.
    fn load_dashboard(&self, url: &str) -> impl Future<Output = Result<LaunchAck>> + Send;
}

/// A Chromecast reachable over CASTv2.
#[derive(Debug, Clone)]
pub struct ChromecastDevice {
    name: String,
    host: String,
    port: u16,
    ignore_input_signal: bool,
}

impl ChromecastDevice {
    pub fn from_discovered(
        device: &CastDevice,
        ignore_input_signal: bool,
    ) -> Result<Self, DiscoveryError> {
        let host = device.ip.clone().ok_or_else(|| DiscoveryError::Unresolved {
            name: device.name.clone(),
        })?;
        Ok(Self {
            name: device.name.clone(),
            host,
            port: device.port.unwrap_or(castv2::DEFAULT_CAST_PORT),
            ignore_input_signal,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Push a snapshot into `tx` for every status change the device reports.
    ///
    /// Runs on its own thread, reconnecting after connection failures, until
    /// the receiving side of `tx` is dropped.
    pub fn spawn_status_listener(
        &self,
        tx: UnboundedSender<DeviceStatusSnapshot>,
    ) -> Result<thread::JoinHandle<()>> {
        let device = self.clone();
        thread::Builder::new()
            .name(format!("cast-status-{}", self.host))
            .spawn(move || device.status_listener_loop(tx))
            .with_context(|| "Failed to spawn cast status listener thread")
    }

    fn status_listener_loop(&self, tx: UnboundedSender<DeviceStatusSnapshot>) {
        loop {
            let result = castv2::watch_receiver_status(&self.host, self.port, |payload| {
                let snapshot =
                    DeviceStatusSnapshot::from_receiver_status(payload, self.ignore_input_signal);
                debug!(device = %self.name, %snapshot, "receiver status");
                tx.send(snapshot).is_ok()
            });

            match result {
                Ok(()) => {
                    debug!(device = %self.name, "status listener stopped");
                    return;
                }
                Err(err) => {
                    warn!(
                        device = %self.name,
                        "status connection lost: {err:#}; retrying in {}s",
                        LISTENER_RETRY_DELAY.as_secs()
                    );
                }
            }

            if tx.is_closed() {
                return;
            }
            thread::sleep(LISTENER_RETRY_DELAY);
            info!(device = %self.name, address = %self.address(), "reconnecting status listener");
        }
    }
}

impl CastControl for ChromecastDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_status(&self) -> Result<DeviceStatusSnapshot> {
        let host = self.host.clone();
        let port = self.port;
        let ignore = self.ignore_input_signal;
        let payload = tokio::task::spawn_blocking(move || castv2::receiver_status(&host, port))
            .await
            .context("receiver status task failed")??;
        Ok(DeviceStatusSnapshot::from_receiver_status(&payload, ignore))
    }

    async fn load_dashboard(&self, url: &str) -> Result<LaunchAck> {
        let host = self.host.clone();
        let port = self.port;
        let url = url.to_string();
        tokio::task::spawn_blocking(move || castv2::load_dashcast(&host, port, &url))
            .await
            .context("dashboard launch task failed")?
    }
}
