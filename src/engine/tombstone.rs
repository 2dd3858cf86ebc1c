//! Tombstone ledger.
//!
//! A tombstone records, for one variant, that a key visible in the baseline
//! must be treated as deleted. Tombstones of the core `Equipment` family mark
//! the whole equipment; every other family consults them first.

use std::collections::HashSet;
use strum::IntoEnumIterator;
use tracing::debug;

use super::dependents;
use crate::domain::{FamilyKind, ResourceType, VariantInfo, VariantRef};
use crate::error::Result;
use crate::repo::{RowKey, RowSelector, StoreTransaction, TombstoneRow};

/// Sub-key of core-family rows and of whole-equipment tombstones.
pub const CORE_SUB_KEY: &str = "";

pub(crate) fn equipment_tombstone(equipment_id: &str, equipment_type: ResourceType) -> TombstoneRow {
    TombstoneRow {
        family: FamilyKind::Equipment,
        equipment_id: equipment_id.to_string(),
        equipment_type,
        sub_key: CORE_SUB_KEY.to_string(),
    }
}

/// Tombstones of one variant, loaded for a resolution pass.
#[derive(Debug, Default)]
pub(crate) struct TombstoneSet {
    equipments: HashSet<String>,
    keys: HashSet<(FamilyKind, RowKey)>,
}

impl TombstoneSet {
    pub fn from_rows(rows: impl IntoIterator<Item = TombstoneRow>) -> Self {
        let mut set = Self::default();
        for row in rows {
            if row.family.is_core() {
                set.equipments.insert(row.equipment_id);
            } else {
                set.keys.insert((row.family, (row.equipment_id, row.sub_key)));
            }
        }
        set
    }

    /// Loads the equipment tombstones plus those of `family` within `scope`.
    pub async fn load(
        tx: &mut dyn StoreTransaction,
        variant: VariantRef,
        family: FamilyKind,
        scope: &RowSelector,
    ) -> Result<Self> {
        let mut rows = tx.tombstones(variant, Some(FamilyKind::Equipment), scope).await?;
        if !family.is_core() {
            rows.extend(tx.tombstones(variant, Some(family), scope).await?);
        }
        Ok(Self::from_rows(rows))
    }

    pub fn hides_equipment(&self, equipment_id: &str) -> bool {
        self.equipments.contains(equipment_id)
    }

    /// Key-level tombstone only; callers check the equipment first.
    pub fn hides_key(&self, family: FamilyKind, key: &RowKey) -> bool {
        if family.is_core() {
            return self.equipments.contains(&key.0);
        }
        self.keys.contains(&(family, key.clone()))
    }
}

/// Records tombstones; re-marking an existing key is a no-op.
pub(crate) async fn mark(tx: &mut dyn StoreTransaction, variant: VariantRef, rows: &[TombstoneRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    debug!(%variant, count = rows.len(), "writing tombstones");
    tx.insert_tombstones(variant, rows).await
}

/// Drops the tombstone of one key so a local row can shadow the baseline again.
pub(crate) async fn clear(
    tx: &mut dyn StoreTransaction,
    variant: VariantRef,
    family: FamilyKind,
    selector: &RowSelector,
) -> Result<u64> {
    tx.delete_tombstones(variant, Some(family), selector).await
}

/// Deletes an equipment and every attribute row it owns in one variant.
///
/// Local rows of all families go away; in a FULL variant the dependents keep
/// them first. In a PARTIAL variant the equipment is
/// tombstoned, and so is each attribute row it has in the baseline: recreating
/// the equipment later must not resurrect the attributes of the deleted one.
pub(crate) async fn remove_equipment(
    tx: &mut dyn StoreTransaction,
    variant: &VariantInfo,
    equipment_id: &str,
    equipment_type: ResourceType,
) -> Result<()> {
    let here = variant.variant_ref();
    let scope = RowSelector::Equipment(equipment_id.to_string());
    let overlays = dependents::dependents_of(tx, variant).await?;
    dependents::preserve_equipment(tx, variant, &overlays, equipment_id).await?;
    for family in FamilyKind::iter() {
        tx.delete_rows(family, here, &scope).await?;
    }

    let Some(baseline) = variant.baseline() else {
        return Ok(());
    };
    let baseline = VariantRef::new(variant.network_id, baseline);
    let mut marks = vec![equipment_tombstone(equipment_id, equipment_type)];
    for family in FamilyKind::iter().filter(|f| !f.is_core()) {
        marks.extend(
            tx.rows(family, baseline, &scope)
                .await?
                .into_iter()
                .map(|row| TombstoneRow {
                    family,
                    equipment_id: row.equipment_id,
                    equipment_type: row.equipment_type,
                    sub_key: row.sub_key,
                }),
        );
    }
    mark(tx, here, &marks).await
}

/// Every tombstone of a variant, sorted by family then key.
pub(crate) async fn list(tx: &mut dyn StoreTransaction, variant: VariantRef) -> Result<Vec<TombstoneRow>> {
    let mut rows = tx.tombstones(variant, None, &RowSelector::All).await?;
    rows.sort();
    Ok(rows)
}
