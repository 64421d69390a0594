// ==========================================
// 牛奶冷链物流系统 - 单农户批次仓储
// ==========================================
// 红线: 状态列只允许通过带前置状态守卫的 UPDATE 变更,
//       保证状态机判定与持久化原子一致
// ==========================================

use crate::domain::batch::{CustodyHolder, MilkBatch, QualityMetrics};
use crate::domain::types::{BatchStatus, HandlerKind, HandlerModel, PaymentStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{opt_ts_from_db, ts_from_db, ts_to_db};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 单农户批次仓储
pub struct MilkBatchRepository {
    conn: Arc<Mutex<Connection>>,
}

/// 行的原始形态 (枚举列先取文本, 出闭包后再解析)
struct RawBatchRow {
    batch_id: String,
    farmer_id: String,
    center_id: String,
    quantity_l: f64,
    fat_content: f64,
    acidity: f64,
    temperature_at_collection: f64,
    lactometer_reading: f64,
    adulteration_test: bool,
    current_status: String,
    handler_kind: String,
    handler_id: String,
    handler_model: String,
    payment_status: String,
    expiry_time: Option<String>,
    collected_at: String,
}

impl MilkBatchRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    const COLUMNS: &'static str = "batch_id, farmer_id, center_id, quantity_l, \
        fat_content, acidity, temperature_at_collection, lactometer_reading, \
        adulteration_test, current_status, handler_kind, handler_id, handler_model, \
        payment_status, expiry_time, collected_at";

    fn parse_enum<T>(field: &str, raw: &str, parsed: Option<T>) -> RepositoryResult<T> {
        parsed.ok_or_else(|| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("未知枚举值 '{}'", raw),
        })
    }

    fn from_raw(raw: RawBatchRow) -> RepositoryResult<MilkBatch> {
        Ok(MilkBatch {
            quality: QualityMetrics {
                fat_content: raw.fat_content,
                acidity: raw.acidity,
                temperature_at_collection: raw.temperature_at_collection,
                lactometer_reading: raw.lactometer_reading,
                adulteration_test: raw.adulteration_test,
            },
            current_status: Self::parse_enum(
                "current_status",
                &raw.current_status,
                BatchStatus::from_db_str(&raw.current_status),
            )?,
            handler: CustodyHolder {
                kind: Self::parse_enum(
                    "handler_kind",
                    &raw.handler_kind,
                    HandlerKind::from_db_str(&raw.handler_kind),
                )?,
                actor_id: raw.handler_id,
                model: Self::parse_enum(
                    "handler_model",
                    &raw.handler_model,
                    HandlerModel::from_db_str(&raw.handler_model),
                )?,
            },
            payment_status: Self::parse_enum(
                "payment_status",
                &raw.payment_status,
                PaymentStatus::from_db_str(&raw.payment_status),
            )?,
            expiry_time: opt_ts_from_db(raw.expiry_time)?,
            collected_at: ts_from_db(&raw.collected_at)?,
            batch_id: raw.batch_id,
            farmer_id: raw.farmer_id,
            center_id: raw.center_id,
            quantity_l: raw.quantity_l,
        })
    }

    /// 插入或整行更新批次
    pub fn upsert(&self, batch: &MilkBatch) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO milk_batch (
                batch_id, farmer_id, center_id, quantity_l,
                fat_content, acidity, temperature_at_collection, lactometer_reading,
                adulteration_test, current_status, handler_kind, handler_id, handler_model,
                payment_status, expiry_time, collected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                batch.batch_id,
                batch.farmer_id,
                batch.center_id,
                batch.quantity_l,
                batch.quality.fat_content,
                batch.quality.acidity,
                batch.quality.temperature_at_collection,
                batch.quality.lactometer_reading,
                batch.quality.adulteration_test,
                batch.current_status.to_db_str(),
                batch.handler.kind.to_db_str(),
                batch.handler.actor_id,
                batch.handler.model.to_db_str(),
                batch.payment_status.to_db_str(),
                batch.expiry_time.as_ref().map(ts_to_db),
                ts_to_db(&batch.collected_at),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询批次
    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<MilkBatch>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM milk_batch WHERE batch_id = ?1", Self::COLUMNS);
        let raw = conn
            .query_row(&sql, params![batch_id], |row| {
                Ok(RawBatchRow {
                    batch_id: row.get(0)?,
                    farmer_id: row.get(1)?,
                    center_id: row.get(2)?,
                    quantity_l: row.get(3)?,
                    fat_content: row.get(4)?,
                    acidity: row.get(5)?,
                    temperature_at_collection: row.get(6)?,
                    lactometer_reading: row.get(7)?,
                    adulteration_test: row.get(8)?,
                    current_status: row.get(9)?,
                    handler_kind: row.get(10)?,
                    handler_id: row.get(11)?,
                    handler_model: row.get(12)?,
                    payment_status: row.get(13)?,
                    expiry_time: row.get(14)?,
                    collected_at: row.get(15)?,
                })
            })
            .optional()?;

        raw.map(Self::from_raw).transpose()
    }

    pub fn get_by_id(&self, batch_id: &str) -> RepositoryResult<MilkBatch> {
        self.find_by_id(batch_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "MilkBatch".to_string(),
                id: batch_id.to_string(),
            })
    }

    /// 带前置状态守卫的状态迁移
    ///
    /// UPDATE ... WHERE current_status = from; 0 行受影响说明
    /// 前置状态已被并发修改, 由调用方按冲突处理
    pub fn transition_status(
        &self,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
        handler: &CustodyHolder,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE milk_batch
            SET current_status = ?1, handler_kind = ?2, handler_id = ?3, handler_model = ?4
            WHERE batch_id = ?5 AND current_status = ?6
            "#,
            params![
                to.to_db_str(),
                handler.kind.to_db_str(),
                handler.actor_id,
                handler.model.to_db_str(),
                batch_id,
                from.to_db_str(),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::DatabaseTransactionError(format!(
                "批次 {} 状态守卫失败: 期望前置状态 {}",
                batch_id, from
            )));
        }
        Ok(())
    }

    /// 更新到期时刻 (去向判定为 local_sale 时重算)
    pub fn set_expiry(&self, batch_id: &str, expiry: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE milk_batch SET expiry_time = ?1 WHERE batch_id = ?2",
            params![ts_to_db(&expiry), batch_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "MilkBatch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }
}
