//! Effective-view resolution.
//!
//! For a key in a variant: a local row wins; otherwise a tombstone makes the
//! key absent; otherwise the baseline row, if any, is returned. For attribute
//! families an equipment tombstone is checked before anything else. Baseline
//! pointers are flattened when variants are created, so a miss costs at most
//! one extra read of a FULL variant.

use std::collections::BTreeMap;

use super::tombstone::TombstoneSet;
use crate::domain::{FamilyKind, VariantInfo};
use crate::error::Result;
use crate::repo::{AttributeRow, RowKey, RowSelector, StoreTransaction};

/// Combines local rows, the variant's tombstones and baseline rows into the
/// effective rows, ordered by `(equipment_id, sub_key)`.
pub(crate) fn merge_effective(
    family: FamilyKind,
    local: Vec<AttributeRow>,
    tombstones: &TombstoneSet,
    baseline: Vec<AttributeRow>,
) -> Vec<AttributeRow> {
    let mut effective: BTreeMap<RowKey, AttributeRow> = BTreeMap::new();
    for row in local {
        if !family.is_core() && tombstones.hides_equipment(&row.equipment_id) {
            continue;
        }
        effective.insert(row.key(), row);
    }
    for row in baseline {
        let key = row.key();
        if effective.contains_key(&key)
            || tombstones.hides_equipment(&row.equipment_id)
            || tombstones.hides_key(family, &key)
        {
            continue;
        }
        effective.insert(key, row);
    }
    effective.into_values().collect()
}

/// Effective rows of `family` in `variant` matching `selector`.
pub(crate) async fn resolve(
    tx: &mut dyn StoreTransaction,
    family: FamilyKind,
    variant: &VariantInfo,
    selector: &RowSelector,
) -> Result<Vec<AttributeRow>> {
    let local = tx.rows(family, variant.variant_ref(), selector).await?;
    if variant.is_full() {
        return Ok(local);
    }
    let tombstones = TombstoneSet::load(tx, variant.variant_ref(), family, &selector.equipment_scope()).await?;
    let baseline = tx.rows(family, variant.baseline_ref(), selector).await?;
    Ok(merge_effective(family, local, &tombstones, baseline))
}
