//! Unit name to base URL resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::storage::{Database, DatabaseError};

/// Resolution failures. The dispatcher turns these into absent-markers.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Failed to resolve {unit}: {source}")]
    Lookup {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Maps a unit name to the base URL of its agent (`http://host:port`).
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, unit: &str) -> Result<String, ResolveError>;
}

/// Fixed name to URL table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    addresses: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, unit: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.addresses.insert(unit.into(), base_url.into());
        self
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, unit: &str) -> Result<String, ResolveError> {
        self.addresses
            .get(unit)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownUnit(unit.to_string()))
    }
}

/// Resolves `unit` as `unit.<domain_suffix>` through the system resolver.
#[derive(Debug, Clone)]
pub struct HostnameResolver {
    domain_suffix: String,
    port: u16,
}

impl HostnameResolver {
    pub fn new(domain_suffix: &str, port: u16) -> Self {
        Self {
            domain_suffix: domain_suffix.trim_matches('.').to_string(),
            port,
        }
    }

    /// Fully-qualified host for `unit`. Names that already contain a dot are kept.
    pub fn host_for(&self, unit: &str) -> String {
        if unit.contains('.') || self.domain_suffix.is_empty() {
            unit.to_string()
        } else {
            format!("{unit}.{}", self.domain_suffix)
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl AddressResolver for HostnameResolver {
    async fn resolve(&self, unit: &str) -> Result<String, ResolveError> {
        let host = self.host_for(unit);
        let addr = tokio::net::lookup_host((host.as_str(), self.port))
            .await
            .map_err(|source| ResolveError::Lookup {
                unit: unit.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| ResolveError::UnknownUnit(unit.to_string()))?;
        debug!(unit, %addr, "Resolved unit");
        Ok(format!("http://{addr}"))
    }
}

/// Looks units up in the workers table, falling back to hostname resolution
/// for workers registered without an address.
#[derive(Clone)]
pub struct WorkerRegistryResolver {
    db: Database,
    fallback: HostnameResolver,
}

impl WorkerRegistryResolver {
    pub const fn new(db: Database, fallback: HostnameResolver) -> Self {
        Self { db, fallback }
    }
}

#[async_trait]
impl AddressResolver for WorkerRegistryResolver {
    async fn resolve(&self, unit: &str) -> Result<String, ResolveError> {
        let worker = match self.db.get_worker(unit).await {
            Ok(worker) => worker,
            Err(DatabaseError::NotFound(_)) => {
                return Err(ResolveError::UnknownUnit(unit.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        match worker.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => {
                Ok(normalize_base_url(address, self.fallback.port()))
            }
            _ => self.fallback.resolve(unit).await,
        }
    }
}

/// `host`, `host:port` or a full URL, as a base URL without a trailing slash.
fn normalize_base_url(address: &str, default_port: u16) -> String {
    if address.contains("://") {
        return address.trim_end_matches('/').to_string();
    }
    let address = address.trim_end_matches('/');
    if address.contains(':') {
        format!("http://{address}")
    } else {
        format!("http://{address}:{default_port}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_knows_only_its_table() {
        let resolver = StaticResolver::new().with("unit1", "http://127.0.0.1:9000");
        assert_eq!(resolver.resolve("unit1").await.unwrap(), "http://127.0.0.1:9000");
        assert!(matches!(
            resolver.resolve("unit2").await,
            Err(ResolveError::UnknownUnit(_))
        ));
    }

    #[test]
    fn hostname_gets_domain_suffix() {
        let resolver = HostnameResolver::new(".local.", 80);
        assert_eq!(resolver.host_for("unit1"), "unit1.local");
        assert_eq!(resolver.host_for("unit1.lab.example"), "unit1.lab.example");
        assert_eq!(HostnameResolver::new("", 80).host_for("unit1"), "unit1");
    }

    #[tokio::test]
    async fn hostname_resolver_handles_localhost() {
        let resolver = HostnameResolver::new("", 4999);
        let url = resolver.resolve("localhost").await.unwrap();
        assert!(url.starts_with("http://"), "{url}");
        assert!(url.ends_with(":4999"), "{url}");
    }

    #[test]
    fn addresses_are_normalized() {
        assert_eq!(normalize_base_url("10.0.0.4", 80), "http://10.0.0.4:80");
        assert_eq!(normalize_base_url("10.0.0.4:8080", 80), "http://10.0.0.4:8080");
        assert_eq!(normalize_base_url("https://unit1.lab/", 80), "https://unit1.lab");
    }

    #[tokio::test]
    async fn registry_prefers_stored_address() {
        let db = Database::open_in_memory().await.unwrap();
        db.add_worker("unit1", Some("10.0.0.4:8080")).await.unwrap();
        let resolver = WorkerRegistryResolver::new(db, HostnameResolver::new("local", 80));

        assert_eq!(resolver.resolve("unit1").await.unwrap(), "http://10.0.0.4:8080");
        assert!(matches!(
            resolver.resolve("ghost").await,
            Err(ResolveError::UnknownUnit(_))
        ));
    }

    #[tokio::test]
    async fn registry_falls_back_to_hostname() {
        let db = Database::open_in_memory().await.unwrap();
        db.add_worker("localhost", None).await.unwrap();
        let resolver = WorkerRegistryResolver::new(db, HostnameResolver::new("", 8123));
        assert!(resolver.resolve("localhost").await.unwrap().ends_with(":8123"));
    }
}
