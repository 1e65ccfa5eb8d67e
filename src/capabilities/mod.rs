//! Capability 层：provider 契约、注册表与带超时的调用器

pub mod executor;
pub mod registry;
pub mod traits;
pub mod types;

pub use executor::ProviderCaller;
pub use registry::{Capability, CapabilityContract, CapabilityRegistry};
pub use traits::*;
pub use types::*;
