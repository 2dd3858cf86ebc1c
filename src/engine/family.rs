//! Attribute families and their typed handlers.
//!
//! One generic [`FamilyHandler`] implements read, write, delete and batched
//! reads for every family; a family only declares its table, its sub-key type
//! and its payload type through [`AttributeFamily`].

use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;
use uuid::Uuid;

use super::tombstone::{self, CORE_SUB_KEY};
use super::{dependents, directory, resolve, NetworkStore};
use crate::domain::{
    AreaBoundary, AreaBoundaryKey, CurvePointKey, FamilyKind, LimitsGroupKey, OperationalLimitsGroup,
    ReactiveCapabilityCurvePoint, RegulatingPoint, RegulatingPointKey, ResourceType, TapChangerStep,
    TapChangerStepKey, VariantRef,
};
use crate::error::{Result, StoreError};
use crate::repo::{AttributeRow, RowKey, RowSelector, TombstoneRow, TxMode};

/// Table shape of one attribute family.
pub trait AttributeFamily: Send + Sync + 'static {
    const KIND: FamilyKind;

    /// Distinguishes rows of the same equipment; `()` for one row per equipment.
    type SubKey: Clone + Ord + Debug + Serialize + DeserializeOwned + Send + Sync;

    type Value: Clone + Debug + Serialize + DeserializeOwned + Send + Sync;

    fn encode_sub_key(sub_key: &Self::SubKey) -> Result<String> {
        serde_json::to_string(sub_key).map_err(StoreError::codec(Self::KIND))
    }

    fn decode_sub_key(text: &str) -> Result<Self::SubKey> {
        serde_json::from_str(text).map_err(StoreError::codec(Self::KIND))
    }
}

/// Core record of each equipment: a free-form attribute object.
pub struct Equipments;

impl AttributeFamily for Equipments {
    const KIND: FamilyKind = FamilyKind::Equipment;
    type SubKey = ();
    type Value = serde_json::Value;

    fn encode_sub_key(_: &()) -> Result<String> {
        Ok(CORE_SUB_KEY.to_string())
    }

    fn decode_sub_key(_: &str) -> Result<()> {
        Ok(())
    }
}

pub struct TapChangerSteps;

impl AttributeFamily for TapChangerSteps {
    const KIND: FamilyKind = FamilyKind::TapChangerStep;
    type SubKey = TapChangerStepKey;
    type Value = TapChangerStep;
}

pub struct OperationalLimits;

impl AttributeFamily for OperationalLimits {
    const KIND: FamilyKind = FamilyKind::OperationalLimitsGroup;
    type SubKey = LimitsGroupKey;
    type Value = OperationalLimitsGroup;
}

pub struct ReactiveCapabilityCurves;

impl AttributeFamily for ReactiveCapabilityCurves {
    const KIND: FamilyKind = FamilyKind::ReactiveCapabilityCurvePoint;
    type SubKey = CurvePointKey;
    type Value = ReactiveCapabilityCurvePoint;

    /// Only finite powers address a point; `-0.0` and `0.0` are one key.
    fn encode_sub_key(p: &CurvePointKey) -> Result<String> {
        if !p.0.is_finite() {
            let error =
                <serde_json::Error as serde::ser::Error>::custom(format!("curve point power {} is not finite", p.0));
            return Err(StoreError::codec(Self::KIND)(error));
        }
        let p = if p.0 == 0.0 { 0.0 } else { p.0 };
        serde_json::to_string(&p).map_err(StoreError::codec(Self::KIND))
    }
}

pub struct RegulatingPoints;

impl AttributeFamily for RegulatingPoints {
    const KIND: FamilyKind = FamilyKind::RegulatingPoint;
    type SubKey = RegulatingPointKey;
    type Value = RegulatingPoint;
}

pub struct AreaBoundaries;

impl AttributeFamily for AreaBoundaries {
    const KIND: FamilyKind = FamilyKind::AreaBoundary;
    type SubKey = AreaBoundaryKey;
    type Value = AreaBoundary;
}

/// Named extensions, payload left to the extension's owner.
pub struct Extensions;

impl AttributeFamily for Extensions {
    const KIND: FamilyKind = FamilyKind::Extension;
    type SubKey = String;
    type Value = serde_json::Value;
}

/// Identifies one row (or, for the core family, one equipment) in a family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerKey<K> {
    pub equipment_id: String,
    pub equipment_type: ResourceType,
    pub sub_key: K,
}

impl<K> OwnerKey<K> {
    pub fn new(equipment_id: impl Into<String>, equipment_type: ResourceType, sub_key: K) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            equipment_type,
            sub_key,
        }
    }
}

impl OwnerKey<()> {
    pub fn equipment(equipment_id: impl Into<String>, equipment_type: ResourceType) -> Self {
        Self::new(equipment_id, equipment_type, ())
    }
}

/// Read/write access to one family, bound to a store.
pub struct FamilyHandler<'s, F> {
    store: &'s NetworkStore,
    family: PhantomData<fn() -> F>,
}

impl<'s, F: AttributeFamily> FamilyHandler<'s, F> {
    pub(crate) fn new(store: &'s NetworkStore) -> Self {
        Self {
            store,
            family: PhantomData,
        }
    }

    fn selector(key: &OwnerKey<F::SubKey>) -> Result<RowSelector> {
        Ok(RowSelector::key(key.equipment_id.clone(), F::encode_sub_key(&key.sub_key)?))
    }

    fn encode(key: &OwnerKey<F::SubKey>, value: &F::Value) -> Result<AttributeRow> {
        Ok(AttributeRow {
            equipment_id: key.equipment_id.clone(),
            equipment_type: key.equipment_type,
            sub_key: F::encode_sub_key(&key.sub_key)?,
            attributes: serde_json::to_value(value).map_err(StoreError::codec(F::KIND))?,
        })
    }

    fn decode(row: AttributeRow) -> Result<(OwnerKey<F::SubKey>, F::Value)> {
        let key = OwnerKey::new(row.equipment_id, row.equipment_type, F::decode_sub_key(&row.sub_key)?);
        let value = serde_json::from_value(row.attributes).map_err(StoreError::codec(F::KIND))?;
        Ok((key, value))
    }

    fn decode_all(rows: Vec<AttributeRow>) -> Result<Vec<(OwnerKey<F::SubKey>, F::Value)>> {
        let mut decoded = rows.into_iter().map(Self::decode).collect::<Result<Vec<_>>>()?;
        decoded.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(decoded)
    }

    async fn resolve_selected(
        &self,
        network_id: Uuid,
        variant_num: i32,
        selector: &RowSelector,
    ) -> Result<Vec<AttributeRow>> {
        let mut tx = self.store.backend().begin(TxMode::ReadOnly, &[network_id]).await?;
        let info = directory::require_variant(tx.as_mut(), VariantRef::new(network_id, variant_num)).await?;
        resolve::resolve(tx.as_mut(), F::KIND, &info, selector).await
    }

    /// Effective value of `key` in the variant.
    pub async fn get(&self, network_id: Uuid, variant_num: i32, key: &OwnerKey<F::SubKey>) -> Result<Option<F::Value>> {
        let rows = self.resolve_selected(network_id, variant_num, &Self::selector(key)?).await?;
        rows.into_iter()
            .next()
            .map(|row| Self::decode(row).map(|(_, value)| value))
            .transpose()
    }

    /// Batched [`get`](Self::get) over one snapshot; absent keys are left out.
    ///
    /// Rows are matched on `(equipment_id, sub_key)` like `get`, so keys that
    /// differ only in equipment type each receive the stored value.
    pub async fn get_many(
        &self,
        network_id: Uuid,
        variant_num: i32,
        keys: &[OwnerKey<F::SubKey>],
    ) -> Result<BTreeMap<OwnerKey<F::SubKey>, F::Value>> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut wanted: BTreeMap<RowKey, Vec<&OwnerKey<F::SubKey>>> = BTreeMap::new();
        for key in keys {
            wanted
                .entry((key.equipment_id.clone(), F::encode_sub_key(&key.sub_key)?))
                .or_default()
                .push(key);
        }
        let selector = RowSelector::Equipments(keys.iter().map(|k| k.equipment_id.clone()).unique().collect());

        let mut found = BTreeMap::new();
        for row in self.resolve_selected(network_id, variant_num, &selector).await? {
            if let Some(owners) = wanted.get(&row.key()) {
                let (_, value) = Self::decode(row)?;
                for owner in owners {
                    found.insert((*owner).clone(), value.clone());
                }
            }
        }
        Ok(found)
    }

    /// What physically exists in the variant's own rows, ignoring the baseline.
    pub async fn get_local(
        &self,
        network_id: Uuid,
        variant_num: i32,
        key: &OwnerKey<F::SubKey>,
    ) -> Result<Option<F::Value>> {
        let variant = VariantRef::new(network_id, variant_num);
        let mut tx = self.store.backend().begin(TxMode::ReadOnly, &[network_id]).await?;
        directory::require_variant(tx.as_mut(), variant).await?;
        let rows = tx.rows(F::KIND, variant, &Self::selector(key)?).await?;
        rows.into_iter()
            .next()
            .map(|row| Self::decode(row).map(|(_, value)| value))
            .transpose()
    }

    /// Effective rows of one equipment, keyed by sub-key.
    pub async fn get_equipment(
        &self,
        network_id: Uuid,
        variant_num: i32,
        equipment_id: &str,
    ) -> Result<BTreeMap<F::SubKey, F::Value>> {
        let selector = RowSelector::Equipment(equipment_id.to_string());
        let rows = self.resolve_selected(network_id, variant_num, &selector).await?;
        rows.into_iter()
            .map(|row| Self::decode(row).map(|(key, value)| (key.sub_key, value)))
            .collect()
    }

    /// Effective rows owned by equipments of one type.
    pub async fn get_by_type(
        &self,
        network_id: Uuid,
        variant_num: i32,
        equipment_type: ResourceType,
    ) -> Result<Vec<(OwnerKey<F::SubKey>, F::Value)>> {
        let rows = self
            .resolve_selected(network_id, variant_num, &RowSelector::Type(equipment_type))
            .await?;
        Self::decode_all(rows)
    }

    pub async fn get_all(&self, network_id: Uuid, variant_num: i32) -> Result<Vec<(OwnerKey<F::SubKey>, F::Value)>> {
        let rows = self.resolve_selected(network_id, variant_num, &RowSelector::All).await?;
        Self::decode_all(rows)
    }

    /// Upserts into the variant's own rows; a tombstone on the key is lifted.
    pub async fn put(&self, network_id: Uuid, variant_num: i32, key: &OwnerKey<F::SubKey>, value: &F::Value) -> Result<()> {
        self.put_all(network_id, variant_num, &[(key.clone(), value.clone())]).await
    }

    /// Writes several rows in one transaction; the last entry wins on a
    /// repeated key.
    ///
    /// In a FULL variant, PARTIAL variants built on it keep the values they
    /// resolved before the write.
    pub async fn put_all(
        &self,
        network_id: Uuid,
        variant_num: i32,
        entries: &[(OwnerKey<F::SubKey>, F::Value)],
    ) -> Result<()> {
        let variant = VariantRef::new(network_id, variant_num);
        let mut unique: BTreeMap<RowKey, AttributeRow> = BTreeMap::new();
        for (key, value) in entries {
            let row = Self::encode(key, value)?;
            unique.insert(row.key(), row);
        }
        let rows: Vec<AttributeRow> = unique.into_values().collect();

        let mut tx = self.store.backend().begin(TxMode::ReadWrite, &[network_id]).await?;
        tx.lock_variant(variant).await?;
        let info = directory::require_variant(tx.as_mut(), variant).await?;
        let overlays = dependents::dependents_of(tx.as_mut(), &info).await?;
        let targets: Vec<(RowKey, ResourceType)> = rows.iter().map(|row| (row.key(), row.equipment_type)).collect();
        dependents::preserve(tx.as_mut(), &info, &overlays, F::KIND, &targets).await?;
        tx.upsert_rows(F::KIND, variant, &rows).await?;
        if info.is_partial() {
            for row in &rows {
                let selector = RowSelector::key(row.equipment_id.clone(), row.sub_key.clone());
                tombstone::clear(tx.as_mut(), variant, F::KIND, &selector).await?;
            }
        }
        tx.commit().await?;
        debug!(%variant, family = %F::KIND, count = rows.len(), "put rows");
        Ok(())
    }

    /// Deletes `key` in the variant.
    ///
    /// FULL variants lose the row. PARTIAL variants lose their local row and
    /// record a tombstone hiding the baseline's. On the core family this
    /// deletes the whole equipment, attributes included.
    pub async fn tombstone(&self, network_id: Uuid, variant_num: i32, key: &OwnerKey<F::SubKey>) -> Result<()> {
        let variant = VariantRef::new(network_id, variant_num);
        let mut tx = self.store.backend().begin(TxMode::ReadWrite, &[network_id]).await?;
        tx.lock_variant(variant).await?;
        let info = directory::require_variant(tx.as_mut(), variant).await?;
        if F::KIND.is_core() {
            tombstone::remove_equipment(tx.as_mut(), &info, &key.equipment_id, key.equipment_type).await?;
        } else {
            let selector = Self::selector(key)?;
            let overlays = dependents::dependents_of(tx.as_mut(), &info).await?;
            let target = ((key.equipment_id.clone(), F::encode_sub_key(&key.sub_key)?), key.equipment_type);
            dependents::preserve(tx.as_mut(), &info, &overlays, F::KIND, &[target]).await?;
            tx.delete_rows(F::KIND, variant, &selector).await?;
            if info.is_partial() {
                let mark = TombstoneRow {
                    family: F::KIND,
                    equipment_id: key.equipment_id.clone(),
                    equipment_type: key.equipment_type,
                    sub_key: F::encode_sub_key(&key.sub_key)?,
                };
                tombstone::mark(tx.as_mut(), variant, &[mark]).await?;
            }
        }
        tx.commit().await?;
        debug!(%variant, family = %F::KIND, equipment = %key.equipment_id, "tombstoned");
        Ok(())
    }

    /// Deletes every effective row of one equipment in this family.
    pub async fn tombstone_equipment(&self, network_id: Uuid, variant_num: i32, equipment_id: &str) -> Result<()> {
        let variant = VariantRef::new(network_id, variant_num);
        let scope = RowSelector::Equipment(equipment_id.to_string());
        let mut tx = self.store.backend().begin(TxMode::ReadWrite, &[network_id]).await?;
        tx.lock_variant(variant).await?;
        let info = directory::require_variant(tx.as_mut(), variant).await?;
        let effective = resolve::resolve(tx.as_mut(), F::KIND, &info, &scope).await?;

        if F::KIND.is_core() {
            if let Some(row) = effective.first() {
                tombstone::remove_equipment(tx.as_mut(), &info, equipment_id, row.equipment_type).await?;
            }
        } else {
            let overlays = dependents::dependents_of(tx.as_mut(), &info).await?;
            let targets: Vec<(RowKey, ResourceType)> =
                effective.iter().map(|row| (row.key(), row.equipment_type)).collect();
            dependents::preserve(tx.as_mut(), &info, &overlays, F::KIND, &targets).await?;
            tx.delete_rows(F::KIND, variant, &scope).await?;
            if info.is_partial() {
                let marks: Vec<TombstoneRow> = effective
                    .into_iter()
                    .map(|row| TombstoneRow {
                        family: F::KIND,
                        equipment_id: row.equipment_id,
                        equipment_type: row.equipment_type,
                        sub_key: row.sub_key,
                    })
                    .collect();
                tombstone::mark(tx.as_mut(), variant, &marks).await?;
            }
        }
        tx.commit().await
    }
}

impl FamilyHandler<'_, RegulatingPoints> {
    /// Regulating points whose regulated terminal belongs to `regulated_id`.
    pub async fn regulating_equipments(
        &self,
        network_id: Uuid,
        variant_num: i32,
        regulated_id: &str,
    ) -> Result<Vec<OwnerKey<RegulatingPointKey>>> {
        Ok(self
            .get_all(network_id, variant_num)
            .await?
            .into_iter()
            .filter(|(_, point)| point.regulated_equipment_id() == regulated_id)
            .map(|(key, _)| key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TapChangerType, ThreeSides};
    use ordered_float::OrderedFloat;
    use rstest::rstest;

    #[test]
    fn test_core_sub_key_is_empty() {
        assert_eq!(Equipments::encode_sub_key(&()).unwrap(), "");
    }

    #[test]
    fn test_sub_key_encoding_is_stable() {
        let key = TapChangerStepKey::ratio(3).on_side(ThreeSides::Two);
        let text = TapChangerSteps::encode_sub_key(&key).unwrap();
        assert_eq!(text, r#"{"tap_changer_type":"RATIO","side":"TWO","index":3}"#);
        let back = TapChangerSteps::decode_sub_key(&text).unwrap();
        assert_eq!(back.tap_changer_type, TapChangerType::Ratio);
        assert_eq!(back, key);

        assert_eq!(ReactiveCapabilityCurves::encode_sub_key(&OrderedFloat(10.5)).unwrap(), "10.5");
    }

    #[test]
    fn test_signed_zero_curve_points_share_a_key() {
        let positive = ReactiveCapabilityCurves::encode_sub_key(&OrderedFloat(0.0)).unwrap();
        let negative = ReactiveCapabilityCurves::encode_sub_key(&OrderedFloat(-0.0)).unwrap();
        assert_eq!(positive, negative);
        assert_eq!(ReactiveCapabilityCurves::decode_sub_key(&negative).unwrap(), OrderedFloat(0.0));
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(f64::NEG_INFINITY)]
    fn test_non_finite_curve_point_is_a_codec_error(#[case] p: f64) {
        let error = ReactiveCapabilityCurves::encode_sub_key(&OrderedFloat(p)).unwrap_err();
        assert!(matches!(
            error,
            StoreError::Codec {
                family: FamilyKind::ReactiveCapabilityCurvePoint,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_payload_is_a_codec_error() {
        let row = AttributeRow {
            equipment_id: "TWT".to_string(),
            equipment_type: ResourceType::TwoWindingsTransformer,
            sub_key: "{}".to_string(),
            attributes: serde_json::json!({}),
        };
        let error = FamilyHandler::<TapChangerSteps>::decode(row).unwrap_err();
        assert!(matches!(
            error,
            StoreError::Codec {
                family: FamilyKind::TapChangerStep,
                ..
            }
        ));
    }
}
