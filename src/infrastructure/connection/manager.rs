use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::link::{Link, LinkKind};
use super::serial::open_serial;
use super::target::TargetSpec;
use super::tcp::open_tcp;
use crate::domain::config::{ConnectionConfig, SerialConfig};
use crate::domain::error::{ConnectError, RelayError, RelayResult};

/// Makes one connection attempt.
#[async_trait]
pub trait Connector {
    async fn connect(&mut self, target: &TargetSpec) -> Result<Link, ConnectError>;
}

/// Opens serial devices and TCP sockets.
#[derive(Debug, Clone, Default)]
pub struct SystemConnector {
    serial: SerialConfig,
}

impl SystemConnector {
    pub fn new(serial: SerialConfig) -> Self {
        Self { serial }
    }
}

#[async_trait]
impl Connector for SystemConnector {
    async fn connect(&mut self, target: &TargetSpec) -> Result<Link, ConnectError> {
        let name = target.to_string();
        let (kind, fd) = match target {
            TargetSpec::Serial { path } => (LinkKind::Serial, open_serial(path, &self.serial).await?),
            TargetSpec::Network { host, port } => (LinkKind::Network, open_tcp(host, *port).await?),
        };
        Link::new(kind, fd, name).map_err(ConnectError::Fatal)
    }
}

/// Opens the target and applies the retry policy.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    target: TargetSpec,
    name: String,
    reconnect: bool,
    retry_interval: Duration,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, target: TargetSpec, config: &ConnectionConfig) -> Self {
        Self {
            connector,
            name: target.to_string(),
            target,
            reconnect: config.reconnect,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
        }
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    pub fn set_reconnect(&mut self, reconnect: bool) {
        self.reconnect = reconnect;
    }

    /// Connect, retrying every interval while reconnecting is enabled and the
    /// failure is retryable. `notify` receives the progress lines.
    pub async fn open<N>(&mut self, mut notify: N) -> RelayResult<Link>
    where
        N: FnMut(&str) -> io::Result<()>,
    {
        let mut first = true;
        loop {
            let err = match self.connector.connect(&self.target).await {
                Ok(link) => {
                    info!("connected to {}", self.name);
                    notify(&format!(
                        "ttyrelay connected to {}, escape character is 'CTRL-\\'.",
                        self.name
                    ))?;
                    return Ok(link);
                }
                Err(err) => err,
            };

            if !err.is_retryable() && self.reconnect {
                warn!("{} cannot be retried, reconnect disabled: {}", self.name, err);
                self.reconnect = false;
            }
            if !self.reconnect {
                return Err(RelayError::Connect {
                    target: self.name.clone(),
                    source: err,
                });
            }

            if first {
                notify(&format!("Could not connect to {}: {}", self.name, err))?;
                first = false;
            }
            notify(&format!("ttyrelay retrying {}...", self.name))?;
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Close the old link, then connect again under the same policy.
    pub async fn reopen<N>(&mut self, old: Link, mut notify: N) -> RelayResult<Link>
    where
        N: FnMut(&str) -> io::Result<()>,
    {
        drop(old);
        notify(&format!("ttyrelay reconnecting to {}...", self.name))?;
        self.open(notify).await
    }
}
