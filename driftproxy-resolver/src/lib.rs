pub mod gateway;
pub mod rebind;
pub mod singleflight;

pub use gateway::ResolverGateway;
pub use rebind::{match_workdir, PortRebinder};
pub use singleflight::SingleflightResolver;
