use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::error::RelayError;

/// Where to connect, parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// Anything containing a `/`
    Serial { path: PathBuf },
    /// `host:port`, split on the last `:`
    Network { host: String, port: u16 },
}

impl TargetSpec {
    pub fn is_network(&self) -> bool {
        matches!(self, TargetSpec::Network { .. })
    }
}

impl FromStr for TargetSpec {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            return Ok(TargetSpec::Serial {
                path: PathBuf::from(s),
            });
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RelayError::InvalidTarget(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(RelayError::Config {
                message: format!("missing host in '{}'", s),
            });
        }
        let port = port.parse::<u16>().map_err(|_| RelayError::Config {
            message: format!("invalid port '{}' in '{}'", port, s),
        })?;

        Ok(TargetSpec::Network {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::Serial { path } => write!(f, "{}", path.display()),
            TargetSpec::Network { host, port } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            TargetSpec::Network { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}
