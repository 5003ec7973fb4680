//! Runtime configuration, generator lookup and compiled networks.

pub mod config;
pub mod network;
pub mod registry;

pub use config::{ConfigError, RuntimeConfig};
pub use network::{CompiledNetwork, NetworkBuilder, Port, PortKind};
pub use registry::GeneratorRegistry;
