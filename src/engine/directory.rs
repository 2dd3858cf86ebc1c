//! Variant directory lookups and bookkeeping shared by the engine operations.

use strum::IntoEnumIterator;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{FamilyKind, VariantInfo, VariantRef};
use crate::error::{Result, StoreError};
use crate::repo::{RowSelector, StoreTransaction};

/// Directory entry of `variant`, or `VariantNotFound`.
pub(crate) async fn require_variant(tx: &mut dyn StoreTransaction, variant: VariantRef) -> Result<VariantInfo> {
    tx.variant(variant)
        .await?
        .ok_or(StoreError::VariantNotFound {
            network_id: variant.network_id,
            variant_num: variant.num,
        })
}

/// All directory entries of a network, or `NetworkNotFound` if it has none.
pub(crate) async fn require_network(tx: &mut dyn StoreTransaction, network_id: Uuid) -> Result<Vec<VariantInfo>> {
    let variants = tx.variants(network_id).await?;
    if variants.is_empty() {
        return Err(StoreError::NetworkNotFound { network_id });
    }
    Ok(variants)
}

/// A taken INITIAL variant number means the network already exists.
pub(crate) fn network_taken(error: StoreError) -> StoreError {
    match error {
        StoreError::DuplicateVariant { network_id, .. } => StoreError::DuplicateNetwork { network_id },
        other => other,
    }
}

pub(crate) fn find_by_name<'a>(variants: &'a [VariantInfo], name: &str) -> Option<&'a VariantInfo> {
    variants.iter().find(|v| v.name == name)
}

/// Variants other than `num` that resolve misses through `num`.
pub(crate) fn dependents(variants: &[VariantInfo], num: i32) -> Vec<i32> {
    variants
        .iter()
        .filter(|v| v.num != num && v.baseline_num == num)
        .map(|v| v.num)
        .collect()
}

/// Rejects removal of a variant still used as a baseline.
pub(crate) fn ensure_no_dependents(variants: &[VariantInfo], variant: &VariantInfo) -> Result<()> {
    let dependents = dependents(variants, variant.num);
    if dependents.is_empty() {
        return Ok(());
    }
    Err(StoreError::DanglingBaseline {
        network_id: variant.network_id,
        variant_num: variant.num,
        dependents,
    })
}

/// Deletes a variant's directory entry, local rows and tombstones, unchecked.
pub(crate) async fn purge(tx: &mut dyn StoreTransaction, variant: VariantRef) -> Result<()> {
    let mut removed = 0;
    for family in FamilyKind::iter() {
        removed += tx.delete_rows(family, variant, &RowSelector::All).await?;
    }
    let tombstones = tx.delete_tombstones(variant, None, &RowSelector::All).await?;
    tx.delete_variant(variant).await?;
    debug!(%variant, rows = removed, tombstones, "purged variant");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependents_lists_partial_variants_on_baseline() {
        let network = Uuid::new_v4();
        let v0 = VariantInfo::initial(network);
        let v1 = VariantInfo::partial_of(&v0, 1, "v1");
        let v2 = VariantInfo::full(network, 2, "v2");
        let v3 = VariantInfo::partial_of(&v2, 3, "v3");
        let all = vec![v0.clone(), v1, v2.clone(), v3];

        assert_eq!(dependents(&all, 0), vec![1]);
        assert_eq!(dependents(&all, 2), vec![3]);
        assert!(dependents(&all, 1).is_empty());
        assert!(ensure_no_dependents(&all, &v0).is_err());
    }

    #[test]
    fn test_network_taken_maps_duplicate_initial_variant() {
        let network_id = Uuid::new_v4();
        let error = network_taken(StoreError::DuplicateVariant {
            network_id,
            variant_num: 0,
        });
        assert!(matches!(error, StoreError::DuplicateNetwork { network_id: id } if id == network_id));
        let error = network_taken(StoreError::Storage("down".into()));
        assert!(matches!(error, StoreError::Storage(_)));
    }

    #[test]
    fn test_find_by_name() {
        let network = Uuid::new_v4();
        let all = vec![VariantInfo::initial(network), VariantInfo::full(network, 4, "contingency")];
        assert_eq!(find_by_name(&all, "contingency").map(|v| v.num), Some(4));
        assert!(find_by_name(&all, "missing").is_none());
    }
}
