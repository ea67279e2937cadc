pub mod config;
pub mod error;
pub mod mapping;

pub use config::DriftProxyConfig;
pub use error::DriftProxyError;
pub use mapping::{
    ContainerRecord, Hostname, InventorySnapshot, MappingKind, ProcessIdentifier, ProcessRecord,
    PublishedMapping, RouteMapping, TargetDecision,
};
