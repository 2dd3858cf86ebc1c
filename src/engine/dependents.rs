//! Dependent preservation.
//!
//! A PARTIAL variant reads through its FULL baseline, so editing the baseline
//! would silently edit the overlay too. Before a write or delete lands in a
//! FULL variant, each dependent receives, for every touched key it does not
//! already shadow, what it resolved so far: the old baseline row as a local
//! row, or a tombstone when the key was absent.

use std::collections::{BTreeMap, HashSet};
use strum::IntoEnumIterator;
use tracing::debug;

use super::directory;
use super::tombstone::{self, equipment_tombstone, TombstoneSet};
use crate::domain::{FamilyKind, ResourceType, VariantInfo};
use crate::error::Result;
use crate::repo::{AttributeRow, RowKey, RowSelector, StoreTransaction, TombstoneRow};

/// PARTIAL variants resolving through `base`. The caller holds the lock on
/// `base` so the list cannot grow before commit.
pub(crate) async fn dependents_of(tx: &mut dyn StoreTransaction, base: &VariantInfo) -> Result<Vec<VariantInfo>> {
    if !base.is_full() {
        return Ok(Vec::new());
    }
    let variants = tx.variants(base.network_id).await?;
    let nums: HashSet<i32> = directory::dependents(&variants, base.num).into_iter().collect();
    Ok(variants.into_iter().filter(|v| nums.contains(&v.num)).collect())
}

fn absent_in(family: FamilyKind, key: &RowKey, equipment_type: ResourceType) -> TombstoneRow {
    if family.is_core() {
        return equipment_tombstone(&key.0, equipment_type);
    }
    TombstoneRow {
        family,
        equipment_id: key.0.clone(),
        equipment_type,
        sub_key: key.1.clone(),
    }
}

/// Freezes `targets` of `family` in every dependent before `base` changes them.
pub(crate) async fn preserve(
    tx: &mut dyn StoreTransaction,
    base: &VariantInfo,
    dependents: &[VariantInfo],
    family: FamilyKind,
    targets: &[(RowKey, ResourceType)],
) -> Result<()> {
    if dependents.is_empty() || targets.is_empty() {
        return Ok(());
    }
    let targets: BTreeMap<&RowKey, ResourceType> = targets.iter().map(|(key, ty)| (key, *ty)).collect();
    let mut ids: Vec<String> = targets.keys().map(|key| key.0.clone()).collect();
    ids.dedup();
    let scope = RowSelector::Equipments(ids);

    let old: BTreeMap<RowKey, AttributeRow> = tx
        .rows(family, base.variant_ref(), &scope)
        .await?
        .into_iter()
        .map(|row| (row.key(), row))
        .collect();

    for dependent in dependents {
        let here = dependent.variant_ref();
        let local: HashSet<RowKey> = tx
            .rows(family, here, &scope)
            .await?
            .iter()
            .map(AttributeRow::key)
            .collect();
        let tombstones = TombstoneSet::load(tx, here, family, &scope).await?;

        let mut copies = Vec::new();
        let mut marks = Vec::new();
        for (&key, &equipment_type) in &targets {
            if local.contains(key) || tombstones.hides_key(family, key) {
                continue;
            }
            match old.get(key) {
                Some(row) if !tombstones.hides_equipment(&key.0) => copies.push(row.clone()),
                _ => marks.push(absent_in(family, key, equipment_type)),
            }
        }
        if copies.is_empty() && marks.is_empty() {
            continue;
        }
        debug!(
            variant = %here,
            family = %family,
            copies = copies.len(),
            tombstones = marks.len(),
            "preserving dependent view"
        );
        tx.upsert_rows(family, here, &copies).await?;
        tombstone::mark(tx, here, &marks).await?;
    }
    Ok(())
}

/// [`preserve`] over every row `equipment_id` owns in `base`, all families.
pub(crate) async fn preserve_equipment(
    tx: &mut dyn StoreTransaction,
    base: &VariantInfo,
    dependents: &[VariantInfo],
    equipment_id: &str,
) -> Result<()> {
    if dependents.is_empty() {
        return Ok(());
    }
    let scope = RowSelector::Equipment(equipment_id.to_string());
    for family in FamilyKind::iter() {
        let targets: Vec<(RowKey, ResourceType)> = tx
            .rows(family, base.variant_ref(), &scope)
            .await?
            .into_iter()
            .map(|row| (row.key(), row.equipment_type))
            .collect();
        preserve(tx, base, dependents, family, &targets).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VariantRef;
    use crate::repo::{memory::MemoryStore, StoreBackend, TxMode};
    use serde_json::json;
    use uuid::Uuid;

    fn load(id: &str, p0: f64) -> AttributeRow {
        AttributeRow {
            equipment_id: id.to_string(),
            equipment_type: ResourceType::Load,
            sub_key: String::new(),
            attributes: json!({ "p0": p0 }),
        }
    }

    fn core_key(id: &str) -> (RowKey, ResourceType) {
        ((id.to_string(), String::new()), ResourceType::Load)
    }

    #[tokio::test]
    async fn test_preserve_copies_old_rows_and_tombstones_new_keys() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let v0 = VariantInfo::initial(network);
        let v1 = VariantInfo::partial_of(&v0, 1, "v1");
        let v2 = VariantInfo::partial_of(&v0, 2, "v2");

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        for info in [&v0, &v1, &v2] {
            tx.insert_variant(info).await.unwrap();
        }
        tx.upsert_rows(FamilyKind::Equipment, v0.variant_ref(), &[load("LOAD", 600.0)])
            .await
            .unwrap();
        tx.upsert_rows(FamilyKind::Equipment, v2.variant_ref(), &[load("LOAD", 1.0)])
            .await
            .unwrap();

        let dependents = dependents_of(tx.as_mut(), &v0).await.unwrap();
        assert_eq!(dependents, vec![v1.clone(), v2.clone()]);
        preserve(
            tx.as_mut(),
            &v0,
            &dependents,
            FamilyKind::Equipment,
            &[core_key("LOAD"), core_key("NEW")],
        )
        .await
        .unwrap();

        let v1_rows = tx
            .rows(FamilyKind::Equipment, v1.variant_ref(), &RowSelector::All)
            .await
            .unwrap();
        assert_eq!(v1_rows, vec![load("LOAD", 600.0)]);
        let v1_tombstones = tx.tombstones(v1.variant_ref(), None, &RowSelector::All).await.unwrap();
        assert_eq!(v1_tombstones, vec![equipment_tombstone("NEW", ResourceType::Load)]);

        let v2_rows = tx
            .rows(FamilyKind::Equipment, v2.variant_ref(), &RowSelector::All)
            .await
            .unwrap();
        assert_eq!(v2_rows, vec![load("LOAD", 1.0)]);
    }

    #[tokio::test]
    async fn test_partial_and_unrelated_variants_have_no_dependents() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let v0 = VariantInfo::initial(network);
        let v1 = VariantInfo::partial_of(&v0, 1, "v1");
        let v2 = VariantInfo::full(network, 2, "v2");

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        for info in [&v0, &v1, &v2] {
            tx.insert_variant(info).await.unwrap();
        }
        assert!(dependents_of(tx.as_mut(), &v1).await.unwrap().is_empty());
        assert!(dependents_of(tx.as_mut(), &v2).await.unwrap().is_empty());
        assert_eq!(tx.variant(VariantRef::new(network, 1)).await.unwrap(), Some(v1));
    }
}
