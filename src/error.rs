use thiserror::Error;
use uuid::Uuid;

use crate::domain::FamilyKind;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by the variant store.
///
/// Absence of data is never an error: reads return `Ok(None)` for a key with
/// no row, and every variant below names a caller mistake or a store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network {network_id} not found")]
    NetworkNotFound { network_id: Uuid },

    #[error("variant {variant_num} of network {network_id} not found")]
    VariantNotFound { network_id: Uuid, variant_num: i32 },

    #[error("variant '{variant_name}' of network {network_id} not found")]
    VariantNameNotFound { network_id: Uuid, variant_name: String },

    #[error("network {network_id} already exists")]
    DuplicateNetwork { network_id: Uuid },

    #[error("variant {variant_num} of network {network_id} already exists")]
    DuplicateVariant { network_id: Uuid, variant_num: i32 },

    #[error("variant name '{variant_name}' is already used in network {network_id}")]
    DuplicateVariantName { network_id: Uuid, variant_name: String },

    #[error("variant {variant_num} of network {network_id} cannot be overwritten")]
    ForbiddenOverwrite { network_id: Uuid, variant_num: i32 },

    #[error("variant {variant_num} of network {network_id} is the baseline of variants {dependents:?}")]
    DanglingBaseline {
        network_id: Uuid,
        variant_num: i32,
        dependents: Vec<i32>,
    },

    #[error("variant {variant_num} is the last variant of network {network_id}")]
    LastVariant { network_id: Uuid, variant_num: i32 },

    #[error("the initial variant of network {network_id} cannot be removed")]
    InitialVariantRemoval { network_id: Uuid },

    #[error("variants cloned from network {network_id} must include its initial variant")]
    MissingInitialVariant { network_id: Uuid },

    #[error("invalid {family} payload: {source}")]
    Codec {
        family: FamilyKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[cfg(feature = "db")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub(crate) fn codec(family: FamilyKind) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| StoreError::Codec { family, source }
    }

    /// True for the "unknown source" class of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NetworkNotFound { .. }
                | StoreError::VariantNotFound { .. }
                | StoreError::VariantNameNotFound { .. }
        )
    }

    /// True for the conflict class: duplicates and dependencies.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateNetwork { .. }
                | StoreError::DuplicateVariant { .. }
                | StoreError::DuplicateVariantName { .. }
                | StoreError::DanglingBaseline { .. }
                | StoreError::LastVariant { .. }
        )
    }
}
