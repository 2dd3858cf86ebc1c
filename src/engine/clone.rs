//! Variant and network cloning.
//!
//! Every function here runs inside the caller's transaction; the caller
//! commits once at the end, so a half-cloned variant is never visible.

use std::collections::HashSet;
use strum::IntoEnumIterator;
use tracing::info;
use uuid::Uuid;

use super::{directory, resolve, tombstone};
use crate::domain::{FamilyKind, VariantInfo, VariantMode, VariantRef, INITIAL_VARIANT_NUM};
use crate::error::{Result, StoreError};
use crate::repo::{RowSelector, StoreTransaction};

/// Where a clone goes and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneTarget {
    pub num: i32,
    pub name: String,
    pub mode: VariantMode,
    /// Replace an existing variant with the same number.
    pub overwrite: bool,
}

impl CloneTarget {
    pub fn partial(num: i32, name: impl Into<String>) -> Self {
        Self {
            num,
            name: name.into(),
            mode: VariantMode::Partial,
            overwrite: false,
        }
    }

    pub fn full(num: i32, name: impl Into<String>) -> Self {
        Self {
            num,
            name: name.into(),
            mode: VariantMode::Full,
            overwrite: false,
        }
    }

    pub fn overwriting(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

pub(crate) async fn clone_variant(
    tx: &mut dyn StoreTransaction,
    network_id: Uuid,
    source_num: i32,
    target: &CloneTarget,
) -> Result<VariantInfo> {
    let source = directory::require_variant(tx, VariantRef::new(network_id, source_num)).await?;
    if source.is_partial() {
        // The clone becomes a dependent of the baseline too.
        directory::require_variant(tx, source.baseline_ref()).await?;
    }
    let variants = tx.variants(network_id).await?;

    if target.num == INITIAL_VARIANT_NUM {
        return Err(StoreError::ForbiddenOverwrite {
            network_id,
            variant_num: target.num,
        });
    }
    if let Some(existing) = variants.iter().find(|v| v.num == target.num) {
        if !target.overwrite {
            return Err(StoreError::DuplicateVariant {
                network_id,
                variant_num: target.num,
            });
        }
        if existing.num == source.num {
            return Err(StoreError::ForbiddenOverwrite {
                network_id,
                variant_num: target.num,
            });
        }
    }
    if variants.iter().any(|v| v.num != target.num && v.name == target.name) {
        return Err(StoreError::DuplicateVariantName {
            network_id,
            variant_name: target.name.clone(),
        });
    }
    if let Some(existing) = variants.iter().find(|v| v.num == target.num) {
        tx.lock_variant(existing.variant_ref()).await?;
        let variants = tx.variants(network_id).await?;
        directory::ensure_no_dependents(&variants, existing)?;
        directory::purge(tx, existing.variant_ref()).await?;
    }

    let created = match target.mode {
        VariantMode::Partial => {
            let created = VariantInfo::partial_of(&source, target.num, target.name.clone());
            tx.insert_variant(&created).await?;
            // A FULL source is the baseline itself: nothing of it is copied.
            if source.is_partial() {
                copy_local(tx, source.variant_ref(), created.variant_ref()).await?;
            }
            created
        }
        VariantMode::Full => {
            let created = VariantInfo::full(network_id, target.num, target.name.clone());
            tx.insert_variant(&created).await?;
            materialize(tx, &source, created.variant_ref()).await?;
            created
        }
    };

    info!(
        %network_id,
        source = source.num,
        target = created.num,
        name = %created.name,
        mode = %created.mode,
        baseline = created.baseline_num,
        "cloned variant"
    );
    Ok(created)
}

pub(crate) async fn remove_variant(tx: &mut dyn StoreTransaction, variant: VariantRef) -> Result<()> {
    tx.lock_variant(variant).await?;
    let info = directory::require_variant(tx, variant).await?;
    let variants = tx.variants(variant.network_id).await?;
    if variants.len() == 1 {
        return Err(StoreError::LastVariant {
            network_id: variant.network_id,
            variant_num: variant.num,
        });
    }
    if info.is_initial() {
        return Err(StoreError::InitialVariantRemoval {
            network_id: variant.network_id,
        });
    }
    directory::ensure_no_dependents(&variants, &info)?;
    directory::purge(tx, variant).await?;
    info!(%variant, name = %info.name, "removed variant");
    Ok(())
}

/// Replays the named variants of `source_network` under `target_network`.
///
/// Modes, numbers, baselines and tombstones are kept. A PARTIAL variant whose
/// baseline is not among the replayed variants is materialized as FULL.
pub(crate) async fn clone_network(
    tx: &mut dyn StoreTransaction,
    target_network: Uuid,
    source_network: Uuid,
    variant_names: &[String],
) -> Result<Vec<VariantInfo>> {
    if !tx.variants(target_network).await?.is_empty() {
        return Err(StoreError::DuplicateNetwork {
            network_id: target_network,
        });
    }
    let source_variants = directory::require_network(tx, source_network).await?;
    // Pins the source variants until commit.
    for variant in &source_variants {
        tx.variant(variant.variant_ref()).await?;
    }

    let mut selected: Vec<VariantInfo> = Vec::with_capacity(variant_names.len());
    for name in variant_names {
        let info = directory::find_by_name(&source_variants, name).ok_or_else(|| StoreError::VariantNameNotFound {
            network_id: source_network,
            variant_name: name.clone(),
        })?;
        if !selected.iter().any(|v| v.num == info.num) {
            selected.push(info.clone());
        }
    }
    if !selected.iter().any(VariantInfo::is_initial) {
        return Err(StoreError::MissingInitialVariant {
            network_id: source_network,
        });
    }

    let kept: HashSet<i32> = selected.iter().map(|v| v.num).collect();
    let mut created = Vec::with_capacity(selected.len());
    for source in &selected {
        let target_ref = VariantRef::new(target_network, source.num);
        let info = if source.is_partial() && !kept.contains(&source.baseline_num) {
            let info = VariantInfo::full(target_network, source.num, source.name.clone());
            tx.insert_variant(&info).await.map_err(directory::network_taken)?;
            materialize(tx, source, target_ref).await?;
            info
        } else {
            let info = source.with_network(target_network);
            tx.insert_variant(&info).await.map_err(directory::network_taken)?;
            copy_local(tx, source.variant_ref(), target_ref).await?;
            info
        };
        created.push(info);
    }

    info!(
        source = %source_network,
        target = %target_network,
        variants = created.len(),
        "cloned network"
    );
    Ok(created)
}

/// Copies local rows and tombstones verbatim.
async fn copy_local(tx: &mut dyn StoreTransaction, from: VariantRef, to: VariantRef) -> Result<()> {
    for family in FamilyKind::iter() {
        let rows = tx.rows(family, from, &RowSelector::All).await?;
        tx.upsert_rows(family, to, &rows).await?;
    }
    let tombstones = tx.tombstones(from, None, &RowSelector::All).await?;
    tombstone::mark(tx, to, &tombstones).await
}

/// Writes the effective view of `source` as local rows of `to`.
async fn materialize(tx: &mut dyn StoreTransaction, source: &VariantInfo, to: VariantRef) -> Result<()> {
    for family in FamilyKind::iter() {
        let rows = resolve::resolve(tx, family, source, &RowSelector::All).await?;
        tx.upsert_rows(family, to, &rows).await?;
    }
    Ok(())
}
