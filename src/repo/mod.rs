//! Backing-store abstraction.
//!
//! The engine never talks to a database directly: every operation opens one
//! [`StoreTransaction`] from a [`StoreBackend`], performs its reads and writes
//! through it, and commits. Dropping a transaction without committing rolls it
//! back, which is what makes clones all-or-nothing.
//!
//! Implementations:
//! - [`memory::MemoryStore`]: in-process tables, used by tests and local runs
//! - `pg::PgStore`: PostgreSQL through sqlx (`db` feature)

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{StoreConfig, StoreKind};
use crate::domain::{FamilyKind, ResourceType, VariantInfo, VariantRef};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

/// One physical row of an attribute table, stripped of its variant address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRow {
    pub equipment_id: String,
    pub equipment_type: ResourceType,
    /// Canonical text encoding of the family sub-key.
    pub sub_key: String,
    pub attributes: serde_json::Value,
}

impl AttributeRow {
    pub fn key(&self) -> RowKey {
        (self.equipment_id.clone(), self.sub_key.clone())
    }
}

/// `(equipment_id, sub_key)`: identity of a row within one family and variant.
pub type RowKey = (String, String);

/// One entry of the tombstone ledger.
///
/// Tombstones of the `Equipment` family mark the whole equipment as deleted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TombstoneRow {
    pub family: FamilyKind,
    pub equipment_id: String,
    pub equipment_type: ResourceType,
    pub sub_key: String,
}

impl TombstoneRow {
    pub fn key(&self) -> (FamilyKind, RowKey) {
        (self.family, (self.equipment_id.clone(), self.sub_key.clone()))
    }
}

/// Which rows of a table an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelector {
    All,
    Equipment(String),
    Equipments(Vec<String>),
    Type(ResourceType),
    Key { equipment_id: String, sub_key: String },
}

impl RowSelector {
    pub fn key(equipment_id: impl Into<String>, sub_key: impl Into<String>) -> Self {
        RowSelector::Key {
            equipment_id: equipment_id.into(),
            sub_key: sub_key.into(),
        }
    }

    pub fn matches(&self, equipment_id: &str, equipment_type: ResourceType, sub_key: &str) -> bool {
        match self {
            RowSelector::All => true,
            RowSelector::Equipment(id) => id == equipment_id,
            RowSelector::Equipments(ids) => ids.iter().any(|id| id == equipment_id),
            RowSelector::Type(ty) => *ty == equipment_type,
            RowSelector::Key {
                equipment_id: id,
                sub_key: key,
            } => id == equipment_id && key == sub_key,
        }
    }

    /// Same equipment scope without the sub-key restriction.
    ///
    /// Tombstone lookups need this: the equipment tombstone of a row lives
    /// under a different sub-key than the row itself.
    pub fn equipment_scope(&self) -> RowSelector {
        match self {
            RowSelector::Key { equipment_id, .. } => RowSelector::Equipment(equipment_id.clone()),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Consistent snapshot, writes rejected.
    ReadOnly,
    ReadWrite,
}

#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Opens a transaction over `networks`, the networks it will read or write.
    async fn begin(&self, mode: TxMode, networks: &[Uuid]) -> Result<Box<dyn StoreTransaction>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Raw table access inside one transaction.
///
/// Row listings are ordered by `(equipment_id, sub_key)`. Row and tombstone
/// inserts are idempotent upserts.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn network_ids(&mut self) -> Result<Vec<Uuid>>;

    /// Directory entries of a network, ordered by variant number.
    async fn variants(&mut self, network_id: Uuid) -> Result<Vec<VariantInfo>>;

    /// In a write transaction the returned entry cannot be locked by
    /// [`lock_variant`](Self::lock_variant) elsewhere until commit.
    async fn variant(&mut self, variant: VariantRef) -> Result<Option<VariantInfo>>;

    /// Fails with `DuplicateVariant` or `DuplicateVariantName` on a taken
    /// number or name.
    async fn insert_variant(&mut self, info: &VariantInfo) -> Result<()>;

    /// Holds `variant` exclusively until commit: concurrent writers, clones
    /// from it and removals wait.
    async fn lock_variant(&mut self, variant: VariantRef) -> Result<()>;

    async fn delete_variant(&mut self, variant: VariantRef) -> Result<()>;

    async fn rows(
        &mut self,
        family: FamilyKind,
        variant: VariantRef,
        selector: &RowSelector,
    ) -> Result<Vec<AttributeRow>>;

    async fn upsert_rows(&mut self, family: FamilyKind, variant: VariantRef, rows: &[AttributeRow]) -> Result<()>;

    async fn delete_rows(&mut self, family: FamilyKind, variant: VariantRef, selector: &RowSelector) -> Result<u64>;

    /// Tombstones of one variant; `family = None` spans every family.
    async fn tombstones(
        &mut self,
        variant: VariantRef,
        family: Option<FamilyKind>,
        selector: &RowSelector,
    ) -> Result<Vec<TombstoneRow>>;

    async fn insert_tombstones(&mut self, variant: VariantRef, rows: &[TombstoneRow]) -> Result<()>;

    async fn delete_tombstones(
        &mut self,
        variant: VariantRef,
        family: Option<FamilyKind>,
        selector: &RowSelector,
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Open the backend selected by configuration.
pub async fn open_backend(cfg: &StoreConfig) -> AnyResult<Arc<dyn StoreBackend>> {
    match cfg.backend {
        StoreKind::Memory => Ok(Arc::new(memory::MemoryStore::new())),
        #[cfg(feature = "db")]
        StoreKind::Postgres => {
            let store = pg::PgStore::connect(cfg).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "db"))]
        StoreKind::Postgres => {
            anyhow::bail!("postgres backend requested but the 'db' feature is not enabled")
        }
    }
}
