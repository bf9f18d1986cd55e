use std::{
    fmt::{Display, Formatter},
    io,
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub mod fetcher;
pub mod file_vehicle;
pub mod http_vehicle;
pub mod proxy_provider;

#[cfg(test)]
use mockall::automock;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ProviderVehicleType {
    File,
    Http,
}

impl Display for ProviderVehicleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderVehicleType::File => write!(f, "File"),
            ProviderVehicleType::Http => write!(f, "HTTP"),
        }
    }
}

pub type ThreadSafeProviderVehicle = Arc<dyn ProviderVehicle + Send + Sync>;

/// Where subscription bytes come from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderVehicle {
    async fn read(&self) -> io::Result<Vec<u8>>;
    /// The cache file for remote vehicles, the source itself for files.
    fn path(&self) -> &Path;
    fn typ(&self) -> ProviderVehicleType;
}

pub enum ProviderType {
    Proxy,
}

impl Display for ProviderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Proxy => write!(f, "Proxy"),
        }
    }
}

/// What one load or refresh did to the pool.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: Vec<String>,
    pub rebuilt: Vec<String>,
    pub removed: Vec<String>,
    pub total: usize,
    /// Every source returned the bytes it returned last time.
    pub unchanged: bool,
    /// A cached source is older than the refresh interval.
    pub stale: bool,
}

#[async_trait]
pub trait Provider {
    fn name(&self) -> &str;
    fn vehicle_type(&self) -> ProviderVehicleType;
    fn typ(&self) -> ProviderType;
    /// Loads the pool, preferring caches over the network.
    async fn initialize(&self) -> crate::Result<RefreshSummary>;
    /// Fetches every source again and reconciles the pool.
    async fn update(&self) -> crate::Result<RefreshSummary>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;

    fn as_map(&self) -> serde_json::Map<String, Value>;
}
