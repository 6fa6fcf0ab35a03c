//! Port binding parsing

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::daemon::{ExposedPort, HostBinding};
use crate::errors::DeployError;

/// One `hostIp:hostPort:containerPort[/proto]` binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: Option<IpAddr>,
    pub host_port: Option<u16>,
    pub container_port: ExposedPort,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = match self.host_ip {
            Some(IpAddr::V6(ip)) => format!("[{}]", ip),
            Some(ip) => ip.to_string(),
            None => String::new(),
        };
        let host_port = self.host_port.map(|p| p.to_string()).unwrap_or_default();
        write!(f, "{}:{}:{}", ip, host_port, self.container_port)
    }
}

impl FromStr for PortMapping {
    type Err = DeployError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DeployError::InvalidPortSpec(format!("{:?}: {}", raw, reason));

        let entry = raw.trim();
        if entry.is_empty() {
            return Err(invalid("empty port mapping"));
        }

        // Split from the right so bracketed IPv6 host addresses keep their colons
        let mut fields = entry.rsplitn(3, ':');
        let container = fields.next().unwrap_or_default();
        let host_port = fields.next().ok_or_else(|| invalid("expected hostIp:hostPort:containerPort"))?;
        let host_ip = fields.next().ok_or_else(|| invalid("expected hostIp:hostPort:containerPort"))?;

        let host_ip = match host_ip.trim_start_matches('[').trim_end_matches(']') {
            "" => None,
            ip => Some(ip.parse::<IpAddr>().map_err(|_| invalid("invalid host ip"))?),
        };

        let host_port = match host_port {
            "" => None,
            port => Some(parse_port(port).ok_or_else(|| invalid("invalid host port"))?),
        };

        let (port, protocol) = match container.split_once('/') {
            Some((port, protocol)) => (port, protocol.to_lowercase()),
            None => (container, "tcp".to_string()),
        };
        if !matches!(protocol.as_str(), "tcp" | "udp" | "sctp") {
            return Err(invalid("unsupported protocol"));
        }
        let port = parse_port(port).ok_or_else(|| invalid("invalid container port"))?;

        Ok(Self {
            host_ip,
            host_port,
            container_port: ExposedPort { port, protocol },
        })
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.parse::<u16>().ok().filter(|p| *p != 0)
}

/// Ordered set of port bindings to apply to a new container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    mappings: Vec<PortMapping>,
}

impl PortSpec {
    /// Parse a comma-separated list of mappings. Any malformed entry fails the
    /// whole spec.
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        if raw.trim().is_empty() {
            return Err(DeployError::InvalidPortSpec("port spec is empty".to_string()));
        }
        let mappings = raw
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<PortMapping>, _>>()?;
        Ok(Self { mappings })
    }

    pub fn mappings(&self) -> &[PortMapping] {
        &self.mappings
    }

    /// Container ports to expose, deduplicated, in first-seen order
    pub fn exposed_ports(&self) -> Vec<ExposedPort> {
        let mut ports: Vec<ExposedPort> = Vec::new();
        for mapping in &self.mappings {
            if !ports.contains(&mapping.container_port) {
                ports.push(mapping.container_port.clone());
            }
        }
        ports
    }

    /// Host bindings keyed by container port
    pub fn port_bindings(&self) -> BTreeMap<ExposedPort, Vec<HostBinding>> {
        let mut bindings: BTreeMap<ExposedPort, Vec<HostBinding>> = BTreeMap::new();
        for mapping in &self.mappings {
            bindings
                .entry(mapping.container_port.clone())
                .or_default()
                .push(HostBinding {
                    host_ip: mapping.host_ip.map(|ip| ip.to_string()).unwrap_or_default(),
                    host_port: mapping.host_port.map(|p| p.to_string()).unwrap_or_default(),
                });
        }
        bindings
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.mappings.iter().map(|m| m.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}
