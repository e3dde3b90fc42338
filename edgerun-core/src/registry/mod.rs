//! Model metadata and provider registries.

pub mod models;
pub mod providers;

pub use models::{Capability, Framework, ModelDescriptor, ModelRegistry};
pub use providers::{ProviderFactory, ProviderRegistration, ProviderRegistry, ServiceConfig};
