use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use super::{AttributeRow, RowKey, RowSelector, StoreBackend, StoreTransaction, TombstoneRow, TxMode};
use crate::domain::{FamilyKind, VariantInfo, VariantRef};
use crate::error::{Result, StoreError};

type TombstoneKey = (FamilyKind, RowKey);

/// Everything stored for one network.
#[derive(Debug, Default)]
struct NetworkTables {
    variants: BTreeMap<i32, VariantInfo>,
    rows: BTreeMap<(FamilyKind, i32), BTreeMap<RowKey, AttributeRow>>,
    tombstones: BTreeMap<i32, BTreeMap<TombstoneKey, TombstoneRow>>,
}

type SharedTables = Arc<RwLock<NetworkTables>>;

/// In-process backing store.
///
/// Each network sits behind its own lock. A transaction locks the networks it
/// was opened over, in uuid order, and holds them until commit or drop. Writes
/// land in place and are recorded in an undo log that a dropped transaction
/// replays backwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    networks: Arc<Mutex<BTreeMap<Uuid, SharedTables>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn tables(&self, network_id: Uuid, mode: TxMode) -> SharedTables {
        let mut registry = self.networks.lock().await;
        match mode {
            TxMode::ReadWrite => registry.entry(network_id).or_default().clone(),
            TxMode::ReadOnly => registry.get(&network_id).cloned().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn begin(&self, mode: TxMode, networks: &[Uuid]) -> Result<Box<dyn StoreTransaction>> {
        let mut scope = networks.to_vec();
        scope.sort();
        scope.dedup();

        let mut held = BTreeMap::new();
        for network_id in scope {
            let tables = self.tables(network_id, mode).await;
            let guard = match mode {
                TxMode::ReadOnly => Held::Read(tables.read_owned().await),
                TxMode::ReadWrite => Held::Write(tables.write_owned().await),
            };
            held.insert(network_id, guard);
        }
        Ok(Box::new(MemoryTransaction {
            registry: self.networks.clone(),
            held,
            undo: Vec::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

enum Held {
    Read(OwnedRwLockReadGuard<NetworkTables>),
    Write(OwnedRwLockWriteGuard<NetworkTables>),
}

impl Held {
    fn tables(&self) -> &NetworkTables {
        match self {
            Held::Read(guard) => &**guard,
            Held::Write(guard) => &**guard,
        }
    }
}

/// Previous state of one entry touched by a write.
enum Undo {
    Variant {
        network_id: Uuid,
        num: i32,
        previous: Option<VariantInfo>,
    },
    Row {
        network_id: Uuid,
        family: FamilyKind,
        num: i32,
        key: RowKey,
        previous: Option<AttributeRow>,
    },
    Tombstone {
        network_id: Uuid,
        num: i32,
        key: TombstoneKey,
        previous: Option<TombstoneRow>,
    },
}

impl Undo {
    fn network_id(&self) -> Uuid {
        match self {
            Undo::Variant { network_id, .. } | Undo::Row { network_id, .. } | Undo::Tombstone { network_id, .. } => {
                *network_id
            }
        }
    }

    fn apply(self, tables: &mut NetworkTables) {
        match self {
            Undo::Variant { num, previous, .. } => restore(&mut tables.variants, num, previous),
            Undo::Row {
                family,
                num,
                key,
                previous,
                ..
            } => restore(tables.rows.entry((family, num)).or_default(), key, previous),
            Undo::Tombstone { num, key, previous, .. } => {
                restore(tables.tombstones.entry(num).or_default(), key, previous)
            }
        }
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

pub struct MemoryTransaction {
    registry: Arc<Mutex<BTreeMap<Uuid, SharedTables>>>,
    held: BTreeMap<Uuid, Held>,
    undo: Vec<Undo>,
}

impl MemoryTransaction {
    fn tables(&self, network_id: Uuid) -> Result<&NetworkTables> {
        self.held
            .get(&network_id)
            .map(Held::tables)
            .ok_or_else(|| out_of_scope(network_id))
    }

    fn tables_mut(&mut self, network_id: Uuid) -> Result<&mut NetworkTables> {
        match self.held.get_mut(&network_id) {
            Some(Held::Write(guard)) => Ok(&mut **guard),
            Some(Held::Read(_)) => Err(StoreError::Storage(
                "write attempted in a read-only transaction".to_string(),
            )),
            None => Err(out_of_scope(network_id)),
        }
    }
}

fn out_of_scope(network_id: Uuid) -> StoreError {
    StoreError::Storage(format!("network {network_id} is outside the transaction scope"))
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            if let Some(Held::Write(guard)) = self.held.get_mut(&undo.network_id()) {
                undo.apply(guard);
            }
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    /// Needs a transaction opened over no network: every network is visited
    /// under a short-lived read lock.
    async fn network_ids(&mut self) -> Result<Vec<Uuid>> {
        if !self.held.is_empty() {
            return Err(StoreError::Storage(
                "network listing needs a transaction without network scope".to_string(),
            ));
        }
        let networks: Vec<(Uuid, SharedTables)> = self
            .registry
            .lock()
            .await
            .iter()
            .map(|(id, tables)| (*id, tables.clone()))
            .collect();
        let mut ids = Vec::new();
        for (network_id, tables) in networks {
            if !tables.read().await.variants.is_empty() {
                ids.push(network_id);
            }
        }
        Ok(ids)
    }

    async fn variants(&mut self, network_id: Uuid) -> Result<Vec<VariantInfo>> {
        Ok(self.tables(network_id)?.variants.values().cloned().collect())
    }

    async fn variant(&mut self, variant: VariantRef) -> Result<Option<VariantInfo>> {
        Ok(self.tables(variant.network_id)?.variants.get(&variant.num).cloned())
    }

    async fn insert_variant(&mut self, info: &VariantInfo) -> Result<()> {
        let network_id = info.network_id;
        let tables = self.tables_mut(network_id)?;
        if tables.variants.contains_key(&info.num) {
            return Err(StoreError::DuplicateVariant {
                network_id,
                variant_num: info.num,
            });
        }
        if tables.variants.values().any(|v| v.name == info.name) {
            return Err(StoreError::DuplicateVariantName {
                network_id,
                variant_name: info.name.clone(),
            });
        }
        tables.variants.insert(info.num, info.clone());
        self.undo.push(Undo::Variant {
            network_id,
            num: info.num,
            previous: None,
        });
        Ok(())
    }

    /// Write transactions already hold their networks exclusively.
    async fn lock_variant(&mut self, variant: VariantRef) -> Result<()> {
        self.tables_mut(variant.network_id).map(|_| ())
    }

    async fn delete_variant(&mut self, variant: VariantRef) -> Result<()> {
        let previous = self.tables_mut(variant.network_id)?.variants.remove(&variant.num);
        if previous.is_some() {
            self.undo.push(Undo::Variant {
                network_id: variant.network_id,
                num: variant.num,
                previous,
            });
        }
        Ok(())
    }

    async fn rows(
        &mut self,
        family: FamilyKind,
        variant: VariantRef,
        selector: &RowSelector,
    ) -> Result<Vec<AttributeRow>> {
        let tables = self.tables(variant.network_id)?;
        let Some(table) = tables.rows.get(&(family, variant.num)) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|row| selector.matches(&row.equipment_id, row.equipment_type, &row.sub_key))
            .cloned()
            .collect())
    }

    async fn upsert_rows(&mut self, family: FamilyKind, variant: VariantRef, rows: &[AttributeRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let table = self
            .tables_mut(variant.network_id)?
            .rows
            .entry((family, variant.num))
            .or_default();
        let mut undo = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.key();
            let previous = table.insert(key.clone(), row.clone());
            undo.push(Undo::Row {
                network_id: variant.network_id,
                family,
                num: variant.num,
                key,
                previous,
            });
        }
        self.undo.extend(undo);
        Ok(())
    }

    async fn delete_rows(&mut self, family: FamilyKind, variant: VariantRef, selector: &RowSelector) -> Result<u64> {
        let tables = self.tables_mut(variant.network_id)?;
        let Some(table) = tables.rows.get_mut(&(family, variant.num)) else {
            return Ok(0);
        };
        let doomed: Vec<RowKey> = table
            .values()
            .filter(|row| selector.matches(&row.equipment_id, row.equipment_type, &row.sub_key))
            .map(AttributeRow::key)
            .collect();
        let mut undo = Vec::with_capacity(doomed.len());
        for key in doomed {
            let previous = table.remove(&key);
            undo.push(Undo::Row {
                network_id: variant.network_id,
                family,
                num: variant.num,
                key,
                previous,
            });
        }
        let removed = undo.len() as u64;
        self.undo.extend(undo);
        Ok(removed)
    }

    async fn tombstones(
        &mut self,
        variant: VariantRef,
        family: Option<FamilyKind>,
        selector: &RowSelector,
    ) -> Result<Vec<TombstoneRow>> {
        let tables = self.tables(variant.network_id)?;
        let Some(ledger) = tables.tombstones.get(&variant.num) else {
            return Ok(Vec::new());
        };
        Ok(ledger
            .values()
            .filter(|t| family.map_or(true, |f| f == t.family))
            .filter(|t| selector.matches(&t.equipment_id, t.equipment_type, &t.sub_key))
            .cloned()
            .collect())
    }

    async fn insert_tombstones(&mut self, variant: VariantRef, rows: &[TombstoneRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let ledger = self
            .tables_mut(variant.network_id)?
            .tombstones
            .entry(variant.num)
            .or_default();
        let mut undo = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.key();
            let previous = ledger.insert(key.clone(), row.clone());
            undo.push(Undo::Tombstone {
                network_id: variant.network_id,
                num: variant.num,
                key,
                previous,
            });
        }
        self.undo.extend(undo);
        Ok(())
    }

    async fn delete_tombstones(
        &mut self,
        variant: VariantRef,
        family: Option<FamilyKind>,
        selector: &RowSelector,
    ) -> Result<u64> {
        let tables = self.tables_mut(variant.network_id)?;
        let Some(ledger) = tables.tombstones.get_mut(&variant.num) else {
            return Ok(0);
        };
        let doomed: Vec<TombstoneKey> = ledger
            .values()
            .filter(|t| family.map_or(true, |f| f == t.family))
            .filter(|t| selector.matches(&t.equipment_id, t.equipment_type, &t.sub_key))
            .map(TombstoneRow::key)
            .collect();
        let mut undo = Vec::with_capacity(doomed.len());
        for key in doomed {
            let previous = ledger.remove(&key);
            undo.push(Undo::Tombstone {
                network_id: variant.network_id,
                num: variant.num,
                key,
                previous,
            });
        }
        let removed = undo.len() as u64;
        self.undo.extend(undo);
        Ok(removed)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.undo.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceType;
    use serde_json::json;
    use std::time::Duration;

    fn load_row(id: &str, p0: f64) -> AttributeRow {
        AttributeRow {
            equipment_id: id.to_string(),
            equipment_type: ResourceType::Load,
            sub_key: String::new(),
            attributes: json!({ "p0": p0 }),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_rolled_back() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let v0 = VariantRef::new(network, 0);

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.upsert_rows(FamilyKind::Equipment, v0, &[load_row("LOAD", 600.0)])
            .await
            .unwrap();
        drop(tx);

        let mut tx = store.begin(TxMode::ReadOnly, &[network]).await.unwrap();
        let rows = tx.rows(FamilyKind::Equipment, v0, &RowSelector::All).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_restores_overwritten_and_deleted_entries() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let v0 = VariantRef::new(network, 0);

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.insert_variant(&VariantInfo::initial(network)).await.unwrap();
        tx.upsert_rows(
            FamilyKind::Equipment,
            v0,
            &[load_row("LOAD", 600.0), load_row("LOAD2", 10.0)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.upsert_rows(FamilyKind::Equipment, v0, &[load_row("LOAD", 1.0)])
            .await
            .unwrap();
        tx.upsert_rows(FamilyKind::Equipment, v0, &[load_row("LOAD", 2.0)])
            .await
            .unwrap();
        tx.delete_rows(FamilyKind::Equipment, v0, &RowSelector::Equipment("LOAD2".into()))
            .await
            .unwrap();
        tx.delete_variant(v0).await.unwrap();
        drop(tx);

        let mut tx = store.begin(TxMode::ReadOnly, &[network]).await.unwrap();
        let rows = tx.rows(FamilyKind::Equipment, v0, &RowSelector::All).await.unwrap();
        assert_eq!(rows, vec![load_row("LOAD", 600.0), load_row("LOAD2", 10.0)]);
        assert_eq!(tx.variant(v0).await.unwrap(), Some(VariantInfo::initial(network)));
    }

    #[tokio::test]
    async fn test_upsert_replaces_row_with_same_key() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let v0 = VariantRef::new(network, 0);

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.upsert_rows(FamilyKind::Equipment, v0, &[load_row("LOAD", 600.0)])
            .await
            .unwrap();
        tx.upsert_rows(FamilyKind::Equipment, v0, &[load_row("LOAD", 601.0)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(TxMode::ReadOnly, &[network]).await.unwrap();
        let rows = tx.rows(FamilyKind::Equipment, v0, &RowSelector::All).await.unwrap();
        assert_eq!(rows, vec![load_row("LOAD", 601.0)]);
    }

    #[tokio::test]
    async fn test_read_only_transaction_rejects_writes() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let mut tx = store.begin(TxMode::ReadOnly, &[network]).await.unwrap();
        let result = tx.insert_variant(&VariantInfo::initial(network)).await;
        assert!(matches!(result, Err(StoreError::Storage(_))));
    }

    #[tokio::test]
    async fn test_network_outside_scope_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin(TxMode::ReadWrite, &[Uuid::new_v4()]).await.unwrap();
        let result = tx.variants(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::Storage(_))));
    }

    #[tokio::test]
    async fn test_insert_variant_rejects_taken_number_and_name() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let initial = VariantInfo::initial(network);

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.insert_variant(&initial).await.unwrap();
        let result = tx.insert_variant(&initial).await;
        assert!(matches!(result, Err(StoreError::DuplicateVariant { variant_num: 0, .. })));
        let result = tx.insert_variant(&VariantInfo::partial_of(&initial, 1, &initial.name)).await;
        assert!(matches!(result, Err(StoreError::DuplicateVariantName { .. })));
    }

    #[tokio::test]
    async fn test_writers_on_different_networks_do_not_wait() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _held = store.begin(TxMode::ReadWrite, &[a]).await.unwrap();
        let other = tokio::time::timeout(Duration::from_secs(1), store.begin(TxMode::ReadWrite, &[b])).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), store.begin(TxMode::ReadOnly, &[a])).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn test_network_listing_skips_empty_networks() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.insert_variant(&VariantInfo::initial(network)).await.unwrap();
        tx.commit().await.unwrap();
        drop(store.begin(TxMode::ReadWrite, &[Uuid::new_v4()]).await.unwrap());

        let mut tx = store.begin(TxMode::ReadOnly, &[]).await.unwrap();
        assert_eq!(tx.network_ids().await.unwrap(), vec![network]);
    }

    #[tokio::test]
    async fn test_tombstone_insert_is_idempotent() {
        let store = MemoryStore::new();
        let network = Uuid::new_v4();
        let v1 = VariantRef::new(network, 1);
        let tombstone = TombstoneRow {
            family: FamilyKind::Equipment,
            equipment_id: "LOAD".to_string(),
            equipment_type: ResourceType::Load,
            sub_key: String::new(),
        };

        let mut tx = store.begin(TxMode::ReadWrite, &[network]).await.unwrap();
        tx.insert_tombstones(v1, &[tombstone.clone()]).await.unwrap();
        tx.insert_tombstones(v1, &[tombstone.clone()]).await.unwrap();
        let listed = tx.tombstones(v1, None, &RowSelector::All).await.unwrap();
        assert_eq!(listed, vec![tombstone]);

        let removed = tx
            .delete_tombstones(v1, Some(FamilyKind::Equipment), &RowSelector::Equipment("LOAD".into()))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
