//! Variant overlay engine.
//!
//! [`NetworkStore`] is the entry point: network and variant lifecycle,
//! cloning, tombstone introspection, and one [`FamilyHandler`] per attribute
//! family for reads and writes. It holds no state of its own beyond the
//! backend handle; all mutual exclusion is left to the backend's transactions.

pub mod clone;
pub mod dependents;
pub mod directory;
pub mod family;
pub mod resolve;
pub mod tombstone;

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub use clone::CloneTarget;
pub use family::{
    AreaBoundaries, AttributeFamily, Equipments, Extensions, FamilyHandler, OperationalLimits, OwnerKey,
    ReactiveCapabilityCurves, RegulatingPoints, TapChangerSteps,
};

use crate::domain::{FamilyKind, VariantInfo, VariantRef};
use crate::error::{Result, StoreError};
use crate::repo::{memory::MemoryStore, StoreBackend, TombstoneRow, TxMode};

#[derive(Clone)]
pub struct NetworkStore {
    backend: Arc<dyn StoreBackend>,
}

impl NetworkStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Store over a fresh in-process backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub(crate) fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ------------------------------------------------------------------
    // Family handlers
    // ------------------------------------------------------------------

    pub fn family<F: AttributeFamily>(&self) -> FamilyHandler<'_, F> {
        FamilyHandler::new(self)
    }

    pub fn equipments(&self) -> FamilyHandler<'_, Equipments> {
        self.family()
    }

    pub fn tap_changer_steps(&self) -> FamilyHandler<'_, TapChangerSteps> {
        self.family()
    }

    pub fn operational_limits(&self) -> FamilyHandler<'_, OperationalLimits> {
        self.family()
    }

    pub fn reactive_capability_curves(&self) -> FamilyHandler<'_, ReactiveCapabilityCurves> {
        self.family()
    }

    pub fn regulating_points(&self) -> FamilyHandler<'_, RegulatingPoints> {
        self.family()
    }

    pub fn area_boundaries(&self) -> FamilyHandler<'_, AreaBoundaries> {
        self.family()
    }

    pub fn extensions(&self) -> FamilyHandler<'_, Extensions> {
        self.family()
    }

    // ------------------------------------------------------------------
    // Networks
    // ------------------------------------------------------------------

    /// Creates a network with its INITIAL FULL variant.
    pub async fn create_network(&self, network_id: Uuid) -> Result<VariantInfo> {
        let mut tx = self.backend.begin(TxMode::ReadWrite, &[network_id]).await?;
        if !tx.variants(network_id).await?.is_empty() {
            return Err(StoreError::DuplicateNetwork { network_id });
        }
        let initial = VariantInfo::initial(network_id);
        tx.insert_variant(&initial).await.map_err(directory::network_taken)?;
        tx.commit().await?;
        info!(%network_id, "created network");
        Ok(initial)
    }

    /// Removes every variant of a network with its rows and tombstones.
    pub async fn delete_network(&self, network_id: Uuid) -> Result<()> {
        let mut tx = self.backend.begin(TxMode::ReadWrite, &[network_id]).await?;
        let variants = directory::require_network(tx.as_mut(), network_id).await?;
        for variant in &variants {
            directory::purge(tx.as_mut(), variant.variant_ref()).await?;
        }
        tx.commit().await?;
        info!(%network_id, variants = variants.len(), "deleted network");
        Ok(())
    }

    pub async fn networks(&self) -> Result<Vec<Uuid>> {
        let mut tx = self.backend.begin(TxMode::ReadOnly, &[]).await?;
        tx.network_ids().await
    }

    // ------------------------------------------------------------------
    // Variant directory
    // ------------------------------------------------------------------

    /// Variants of a network ordered by number.
    pub async fn variants(&self, network_id: Uuid) -> Result<Vec<VariantInfo>> {
        let mut tx = self.backend.begin(TxMode::ReadOnly, &[network_id]).await?;
        directory::require_network(tx.as_mut(), network_id).await
    }

    pub async fn variant(&self, network_id: Uuid, variant_num: i32) -> Result<VariantInfo> {
        let mut tx = self.backend.begin(TxMode::ReadOnly, &[network_id]).await?;
        directory::require_variant(tx.as_mut(), VariantRef::new(network_id, variant_num)).await
    }

    pub async fn variant_by_name(&self, network_id: Uuid, name: &str) -> Result<VariantInfo> {
        let variants = self.variants(network_id).await?;
        directory::find_by_name(&variants, name)
            .cloned()
            .ok_or_else(|| StoreError::VariantNameNotFound {
                network_id,
                variant_name: name.to_string(),
            })
    }

    /// Clones `source_num` into `target`, as an overlay or a materialized copy.
    pub async fn clone_variant(&self, network_id: Uuid, source_num: i32, target: &CloneTarget) -> Result<VariantInfo> {
        let mut tx = self.backend.begin(TxMode::ReadWrite, &[network_id]).await?;
        let created = clone::clone_variant(tx.as_mut(), network_id, source_num, target).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Replays the named variants of `source_network` under a new identity.
    pub async fn clone_network(
        &self,
        target_network: Uuid,
        source_network: Uuid,
        variant_names: &[String],
    ) -> Result<Vec<VariantInfo>> {
        let mut tx = self
            .backend
            .begin(TxMode::ReadWrite, &[target_network, source_network])
            .await?;
        let created = clone::clone_network(tx.as_mut(), target_network, source_network, variant_names).await?;
        tx.commit().await?;
        Ok(created)
    }

    pub async fn remove_variant(&self, network_id: Uuid, variant_num: i32) -> Result<()> {
        let mut tx = self.backend.begin(TxMode::ReadWrite, &[network_id]).await?;
        clone::remove_variant(tx.as_mut(), VariantRef::new(network_id, variant_num)).await?;
        tx.commit().await
    }

    // ------------------------------------------------------------------
    // Tombstone introspection
    // ------------------------------------------------------------------

    /// Equipment ids deleted in this variant.
    pub async fn tombstoned_equipment_ids(&self, network_id: Uuid, variant_num: i32) -> Result<Vec<String>> {
        Ok(self
            .tombstones(network_id, variant_num)
            .await?
            .into_iter()
            .filter(|t| t.family.is_core())
            .map(|t| t.equipment_id)
            .collect())
    }

    /// Attribute rows deleted in this variant, equipment tombstones excluded.
    pub async fn tombstoned_attribute_keys(&self, network_id: Uuid, variant_num: i32) -> Result<Vec<TombstoneRow>> {
        Ok(self
            .tombstones(network_id, variant_num)
            .await?
            .into_iter()
            .filter(|t| t.family != FamilyKind::Equipment)
            .collect())
    }

    async fn tombstones(&self, network_id: Uuid, variant_num: i32) -> Result<Vec<TombstoneRow>> {
        let variant = VariantRef::new(network_id, variant_num);
        let mut tx = self.backend.begin(TxMode::ReadOnly, &[network_id]).await?;
        directory::require_variant(tx.as_mut(), variant).await?;
        tombstone::list(tx.as_mut(), variant).await
    }

    /// Binds this store to one working variant.
    pub fn variant_handle(&self, network_id: Uuid, variant_num: i32) -> VariantHandle {
        VariantHandle {
            store: self.clone(),
            variant: VariantRef::new(network_id, variant_num),
        }
    }
}

/// A store bound to one `(network, variant)`, for callers that work on a
/// single working variant at a time.
#[derive(Clone)]
pub struct VariantHandle {
    store: NetworkStore,
    variant: VariantRef,
}

impl VariantHandle {
    pub fn variant_ref(&self) -> VariantRef {
        self.variant
    }

    pub async fn info(&self) -> Result<VariantInfo> {
        self.store.variant(self.variant.network_id, self.variant.num).await
    }

    pub async fn get<F: AttributeFamily>(&self, key: &OwnerKey<F::SubKey>) -> Result<Option<F::Value>> {
        self.store.family::<F>().get(self.variant.network_id, self.variant.num, key).await
    }

    pub async fn get_local<F: AttributeFamily>(&self, key: &OwnerKey<F::SubKey>) -> Result<Option<F::Value>> {
        self.store
            .family::<F>()
            .get_local(self.variant.network_id, self.variant.num, key)
            .await
    }

    pub async fn put<F: AttributeFamily>(&self, key: &OwnerKey<F::SubKey>, value: &F::Value) -> Result<()> {
        self.store
            .family::<F>()
            .put(self.variant.network_id, self.variant.num, key, value)
            .await
    }

    pub async fn tombstone<F: AttributeFamily>(&self, key: &OwnerKey<F::SubKey>) -> Result<()> {
        self.store
            .family::<F>()
            .tombstone(self.variant.network_id, self.variant.num, key)
            .await
    }

    /// Clones this variant and returns a handle on the clone.
    pub async fn clone_to(&self, target: &CloneTarget) -> Result<VariantHandle> {
        let created = self
            .store
            .clone_variant(self.variant.network_id, self.variant.num, target)
            .await?;
        Ok(self.store.variant_handle(created.network_id, created.num))
    }
}
