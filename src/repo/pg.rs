#![cfg(feature = "db")]

//! PostgreSQL backend.
//!
//! Attribute tables share one shape and differ only by name, so statements
//! are built with sea-query against [`FamilyKind::table_name`].

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use sea_query::{
    Alias, Condition, Expr, Iden, LockType, OnConflict, Order, PostgresQueryBuilder, Query, SimpleExpr,
};
use sea_query_binder::SqlxBinder;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AttributeRow, RowSelector, StoreBackend, StoreTransaction, TombstoneRow, TxMode};
use crate::config::StoreConfig;
use crate::domain::{FamilyKind, VariantInfo, VariantRef};
use crate::error::{Result, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_variant_store.sql");

const CONNECT_ATTEMPTS: usize = 5;

/// Unique constraint on `(network_uuid, variant_name)`.
const VARIANT_NAME_CONSTRAINT: &str = "network_variant_name_key";

/// Rows per INSERT; six bound parameters each stays well under the
/// protocol limit of 65535.
const INSERT_CHUNK: usize = 1000;

#[derive(Iden)]
enum NetworkVariant {
    Table,
    NetworkUuid,
    VariantNum,
    VariantName,
    Mode,
    BaselineVariantNum,
}

#[derive(Iden)]
enum Tombstone {
    Table,
    Family,
}

/// Columns shared by every attribute table and the tombstone table.
#[derive(Iden, Clone, Copy)]
enum Col {
    NetworkUuid,
    VariantNum,
    EquipmentId,
    EquipmentType,
    SubKey,
    Attributes,
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with exponential backoff.
    pub async fn connect(cfg: &StoreConfig) -> AnyResult<Self> {
        info!("Initializing store connection pool");
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            attempt += 1;
            match Self::try_connect(cfg).await {
                Ok(pool) => {
                    info!("Store connection pool initialized");
                    return Ok(Self { pool });
                }
                Err(e) if attempt >= CONNECT_ATTEMPTS => {
                    return Err(e).context(format!(
                        "Failed to connect to the store after {} attempts",
                        CONNECT_ATTEMPTS
                    ));
                }
                Err(e) => {
                    warn!(
                        "Store connection attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, CONNECT_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn try_connect(cfg: &StoreConfig) -> AnyResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .min_connections(cfg.min_connections)
            .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
            .connect(&cfg.url)
            .await
            .context("Failed to create store pool")?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("Store health check failed")?;
        Ok(pool)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the directory, tombstone and attribute tables if missing.
    pub async fn ensure_schema(&self) -> AnyResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply store schema")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreBackend for PgStore {
    /// Row locks on `network_variant` stand in for network scoping.
    async fn begin(&self, mode: TxMode, _networks: &[Uuid]) -> Result<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;
        if mode == TxMode::ReadOnly {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                .execute(&mut *tx)
                .await?;
        }
        Ok(Box::new(PgTransaction { tx, mode }))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    mode: TxMode,
}

fn query_error(e: sea_query::error::Error) -> StoreError {
    StoreError::Storage(format!("query build failed: {e}"))
}

fn parse_column<T: std::str::FromStr>(column: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| StoreError::Storage(format!("unexpected {column} value '{raw}'")))
}

fn variant_condition(variant: VariantRef) -> Condition {
    Condition::all()
        .add(Expr::col(Col::NetworkUuid).eq(variant.network_id))
        .add(Expr::col(Col::VariantNum).eq(variant.num))
}

fn selector_condition(selector: &RowSelector) -> Condition {
    match selector {
        RowSelector::All => Condition::all(),
        RowSelector::Equipment(id) => Condition::all().add(Expr::col(Col::EquipmentId).eq(id.as_str())),
        RowSelector::Equipments(ids) => {
            Condition::all().add(Expr::col(Col::EquipmentId).is_in(ids.iter().map(String::as_str)))
        }
        RowSelector::Type(ty) => Condition::all().add(Expr::col(Col::EquipmentType).eq(ty.to_string())),
        RowSelector::Key { equipment_id, sub_key } => Condition::all()
            .add(Expr::col(Col::EquipmentId).eq(equipment_id.as_str()))
            .add(Expr::col(Col::SubKey).eq(sub_key.as_str())),
    }
}

fn family_condition(family: Option<FamilyKind>) -> Condition {
    match family {
        Some(family) => Condition::all().add(Expr::col(Tombstone::Family).eq(family.to_string())),
        None => Condition::all(),
    }
}

/// Maps a unique violation on `network_variant` to the typed duplicate error.
fn insert_variant_error(info: &VariantInfo, error: sqlx::Error) -> StoreError {
    let name_taken = match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => Some(db.constraint() == Some(VARIANT_NAME_CONSTRAINT)),
        _ => None,
    };
    match name_taken {
        Some(true) => StoreError::DuplicateVariantName {
            network_id: info.network_id,
            variant_name: info.name.clone(),
        },
        Some(false) => StoreError::DuplicateVariant {
            network_id: info.network_id,
            variant_num: info.num,
        },
        None => error.into(),
    }
}

fn variant_from_row(row: &sqlx::postgres::PgRow) -> Result<VariantInfo> {
    let mode: String = row.try_get("mode")?;
    Ok(VariantInfo {
        network_id: row.try_get("network_uuid")?,
        num: row.try_get("variant_num")?,
        name: row.try_get("variant_name")?,
        mode: parse_column("mode", &mode)?,
        baseline_num: row.try_get("baseline_variant_num")?,
    })
}

impl PgTransaction {
    async fn fetch_variants(&mut self, cond: Condition, lock: Option<LockType>) -> Result<Vec<VariantInfo>> {
        let mut select = Query::select();
        select
            .columns([
                NetworkVariant::NetworkUuid,
                NetworkVariant::VariantNum,
                NetworkVariant::VariantName,
                NetworkVariant::Mode,
                NetworkVariant::BaselineVariantNum,
            ])
            .from(NetworkVariant::Table)
            .cond_where(cond)
            .order_by(NetworkVariant::VariantNum, Order::Asc);
        if let Some(lock) = lock {
            select.lock(lock);
        }
        let (sql, values) = select.build_sqlx(PostgresQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *self.tx).await?;
        rows.iter().map(variant_from_row).collect()
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn network_ids(&mut self) -> Result<Vec<Uuid>> {
        let (sql, values) = Query::select()
            .distinct()
            .column(NetworkVariant::NetworkUuid)
            .from(NetworkVariant::Table)
            .order_by(NetworkVariant::NetworkUuid, Order::Asc)
            .build_sqlx(PostgresQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|r| r.try_get("network_uuid").map_err(StoreError::from))
            .collect()
    }

    async fn variants(&mut self, network_id: Uuid) -> Result<Vec<VariantInfo>> {
        self.fetch_variants(
            Condition::all().add(Expr::col(NetworkVariant::NetworkUuid).eq(network_id)),
            None,
        )
        .await
    }

    /// `FOR SHARE` in write transactions: a concurrent removal or overwrite
    /// of the entry waits for this transaction.
    async fn variant(&mut self, variant: VariantRef) -> Result<Option<VariantInfo>> {
        let lock = (self.mode == TxMode::ReadWrite).then_some(LockType::Share);
        let mut found = self.fetch_variants(variant_condition(variant), lock).await?;
        Ok(found.pop())
    }

    async fn insert_variant(&mut self, info: &VariantInfo) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(NetworkVariant::Table)
            .columns([
                NetworkVariant::NetworkUuid,
                NetworkVariant::VariantNum,
                NetworkVariant::VariantName,
                NetworkVariant::Mode,
                NetworkVariant::BaselineVariantNum,
            ])
            .values([
                info.network_id.into(),
                info.num.into(),
                info.name.clone().into(),
                info.mode.to_string().into(),
                info.baseline_num.into(),
            ])
            .map_err(query_error)?
            .build_sqlx(PostgresQueryBuilder);
        sqlx::query_with(&sql, values)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| insert_variant_error(info, e))?;
        Ok(())
    }

    async fn lock_variant(&mut self, variant: VariantRef) -> Result<()> {
        self.fetch_variants(variant_condition(variant), Some(LockType::Update))
            .await?;
        Ok(())
    }

    async fn delete_variant(&mut self, variant: VariantRef) -> Result<()> {
        let (sql, values) = Query::delete()
            .from_table(NetworkVariant::Table)
            .cond_where(variant_condition(variant))
            .build_sqlx(PostgresQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rows(
        &mut self,
        family: FamilyKind,
        variant: VariantRef,
        selector: &RowSelector,
    ) -> Result<Vec<AttributeRow>> {
        let (sql, values) = Query::select()
            .columns([Col::EquipmentId, Col::EquipmentType, Col::SubKey, Col::Attributes])
            .from(Alias::new(family.table_name()))
            .cond_where(variant_condition(variant).add(selector_condition(selector)))
            .order_by(Col::EquipmentId, Order::Asc)
            .order_by(Col::SubKey, Order::Asc)
            .build_sqlx(PostgresQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| {
                let equipment_type: String = row.try_get("equipment_type")?;
                Ok(AttributeRow {
                    equipment_id: row.try_get("equipment_id")?,
                    equipment_type: parse_column("equipment_type", &equipment_type)?,
                    sub_key: row.try_get("sub_key")?,
                    attributes: row.try_get("attributes")?,
                })
            })
            .collect()
    }

    async fn upsert_rows(&mut self, family: FamilyKind, variant: VariantRef, rows: &[AttributeRow]) -> Result<()> {
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut insert = Query::insert();
            insert.into_table(Alias::new(family.table_name())).columns([
                Col::NetworkUuid,
                Col::VariantNum,
                Col::EquipmentId,
                Col::EquipmentType,
                Col::SubKey,
                Col::Attributes,
            ]);
            for row in chunk {
                let values: [SimpleExpr; 6] = [
                    variant.network_id.into(),
                    variant.num.into(),
                    row.equipment_id.clone().into(),
                    row.equipment_type.to_string().into(),
                    row.sub_key.clone().into(),
                    row.attributes.clone().into(),
                ];
                insert.values(values).map_err(query_error)?;
            }
            insert.on_conflict(
                OnConflict::columns([Col::NetworkUuid, Col::VariantNum, Col::EquipmentId, Col::SubKey])
                    .update_columns([Col::EquipmentType, Col::Attributes])
                    .to_owned(),
            );
            let (sql, values) = insert.build_sqlx(PostgresQueryBuilder);
            sqlx::query_with(&sql, values).execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn delete_rows(&mut self, family: FamilyKind, variant: VariantRef, selector: &RowSelector) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Alias::new(family.table_name()))
            .cond_where(variant_condition(variant).add(selector_condition(selector)))
            .build_sqlx(PostgresQueryBuilder);
        let done = sqlx::query_with(&sql, values).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn tombstones(
        &mut self,
        variant: VariantRef,
        family: Option<FamilyKind>,
        selector: &RowSelector,
    ) -> Result<Vec<TombstoneRow>> {
        let (sql, values) = Query::select()
            .column(Tombstone::Family)
            .columns([Col::EquipmentId, Col::EquipmentType, Col::SubKey])
            .from(Tombstone::Table)
            .cond_where(
                variant_condition(variant)
                    .add(family_condition(family))
                    .add(selector_condition(selector)),
            )
            .order_by(Col::EquipmentId, Order::Asc)
            .order_by(Col::SubKey, Order::Asc)
            .build_sqlx(PostgresQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| {
                let family: String = row.try_get("family")?;
                let equipment_type: String = row.try_get("equipment_type")?;
                Ok(TombstoneRow {
                    family: parse_column("family", &family)?,
                    equipment_id: row.try_get("equipment_id")?,
                    equipment_type: parse_column("equipment_type", &equipment_type)?,
                    sub_key: row.try_get("sub_key")?,
                })
            })
            .collect()
    }

    async fn insert_tombstones(&mut self, variant: VariantRef, rows: &[TombstoneRow]) -> Result<()> {
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut insert = Query::insert();
            insert.into_table(Tombstone::Table).columns([
                Alias::new("network_uuid"),
                Alias::new("variant_num"),
                Alias::new("family"),
                Alias::new("equipment_id"),
                Alias::new("equipment_type"),
                Alias::new("sub_key"),
            ]);
            for row in chunk {
                let values: [SimpleExpr; 6] = [
                    variant.network_id.into(),
                    variant.num.into(),
                    row.family.to_string().into(),
                    row.equipment_id.clone().into(),
                    row.equipment_type.to_string().into(),
                    row.sub_key.clone().into(),
                ];
                insert.values(values).map_err(query_error)?;
            }
            insert.on_conflict(
                OnConflict::columns([
                    Alias::new("network_uuid"),
                    Alias::new("variant_num"),
                    Alias::new("family"),
                    Alias::new("equipment_id"),
                    Alias::new("sub_key"),
                ])
                .do_nothing()
                .to_owned(),
            );
            let (sql, values) = insert.build_sqlx(PostgresQueryBuilder);
            sqlx::query_with(&sql, values).execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn delete_tombstones(
        &mut self,
        variant: VariantRef,
        family: Option<FamilyKind>,
        selector: &RowSelector,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Tombstone::Table)
            .cond_where(
                variant_condition(variant)
                    .add(family_condition(family))
                    .add(selector_condition(selector)),
            )
            .build_sqlx(PostgresQueryBuilder);
        let done = sqlx::query_with(&sql, values).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
