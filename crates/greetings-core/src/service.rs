//! Running services and reverse-proxy composition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// A port exposed by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port the process listens on.
    pub internal: u16,
    /// Port reachable from outside.
    pub external: u16,
}

/// Reference to a running, network-reachable process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: String,
    /// Host name other services use to reach this one.
    pub hostname: String,
    /// Engine-specific identifier (e.g. container id).
    pub runtime_id: String,
    pub ports: Vec<PortMapping>,
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for port in &self.ports {
            write!(f, " {}->{}", port.external, port.internal)?;
        }
        Ok(())
    }
}

/// One service exposed through the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub service: ServiceHandle,
    /// Route name, e.g. `backend`.
    pub name: String,
    /// Port the proxy listens on.
    pub external_port: u16,
    /// Port on the service the proxy forwards to.
    pub internal_port: u16,
}

impl ProxyRoute {
    pub fn new(
        service: ServiceHandle,
        name: impl Into<String>,
        external_port: u16,
        internal_port: u16,
    ) -> Self {
        Self {
            service,
            name: name.into(),
            external_port,
            internal_port,
        }
    }
}

/// Trait for reverse proxies that front several services.
///
/// The proxy references the routed services; it does not own them.
#[async_trait]
pub trait Proxy: Send + Sync {
    async fn compose(&self, routes: &[ProxyRoute]) -> Result<ServiceHandle>;
}
