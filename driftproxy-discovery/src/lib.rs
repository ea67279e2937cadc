pub mod backends;
pub mod cache;
pub mod container;
pub mod process;

pub use backends::{CommandProcessProbe, DockerContainerProbe};
pub use container::{ContainerProbe, ContainerSnapshot};
pub use process::{ProcessProbe, ProcessSnapshot};
