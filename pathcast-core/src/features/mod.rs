//! Feature vectors for model nodes.

pub mod descriptor;
pub mod engine;

pub use descriptor::{FeatureDescriptor, FeatureKind};
pub use engine::{Delegate, FeatureEngine, NoDelegates};
