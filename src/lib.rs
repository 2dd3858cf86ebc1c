pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod repo;
pub mod telemetry;

pub use engine::{CloneTarget, NetworkStore, OwnerKey, VariantHandle};
pub use error::{Result, StoreError};
