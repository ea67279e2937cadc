pub mod address;
pub mod dispatch;
pub mod forward;

pub use address::{UpstreamAddress, UpstreamAddressBuilder};
pub use dispatch::{ControlPlane, RoutingDispatcher};
pub use forward::ReverseProxyForwarder;
