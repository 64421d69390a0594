// ==========================================
// 牛奶冷链物流系统 - 聚合批次仓储
// ==========================================
// 并发控制: 聚合批次的读-改-写走乐观锁 (revision 列);
//           聚合更新与交奶记录插入在同一事务内, 要么都可见要么都不可见
// ==========================================

use crate::domain::batch::{AggregateBatch, Delivery, QualityMetrics};
use crate::domain::types::BatchStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{ts_from_db, ts_to_db};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 聚合批次仓储
pub struct AggregateBatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AggregateBatchRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    const COLUMNS: &'static str = "batch_number, center_id, total_quantity_l, total_cost, \
        fat_content, acidity, temperature_at_collection, lactometer_reading, \
        adulteration_test, status, window_started_at, revision";

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(AggregateBatch, String)> {
        let status_raw: String = row.get(9)?;
        let window_raw: String = row.get(10)?;
        Ok((
            AggregateBatch {
                batch_number: row.get(0)?,
                center_id: row.get(1)?,
                total_quantity_l: row.get(2)?,
                total_cost: row.get(3)?,
                quality: QualityMetrics {
                    fat_content: row.get(4)?,
                    acidity: row.get(5)?,
                    temperature_at_collection: row.get(6)?,
                    lactometer_reading: row.get(7)?,
                    adulteration_test: row.get(8)?,
                },
                status: BatchStatus::from_db_str(&status_raw).unwrap_or(BatchStatus::Collected),
                window_started_at: chrono::Utc::now(), // 占位, 出闭包后替换
                revision: row.get(11)?,
            },
            window_raw,
        ))
    }

    fn finish_row(pair: (AggregateBatch, String)) -> RepositoryResult<AggregateBatch> {
        let (mut agg, window_raw) = pair;
        agg.window_started_at = ts_from_db(&window_raw)?;
        Ok(agg)
    }

    /// 查询中心当前开放的聚合批次 (status='collected', 取最新窗口)
    pub fn find_open_for_center(
        &self,
        center_id: &str,
    ) -> RepositoryResult<Option<AggregateBatch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM aggregate_batch \
             WHERE center_id = ?1 AND status = 'collected' \
             ORDER BY window_started_at DESC LIMIT 1",
            Self::COLUMNS
        );
        let pair = conn
            .query_row(&sql, params![center_id], Self::map_row)
            .optional()?;
        pair.map(Self::finish_row).transpose()
    }

    /// 按批次号查询
    pub fn find_by_number(&self, batch_number: &str) -> RepositoryResult<Option<AggregateBatch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM aggregate_batch WHERE batch_number = ?1",
            Self::COLUMNS
        );
        let pair = conn
            .query_row(&sql, params![batch_number], Self::map_row)
            .optional()?;
        pair.map(Self::finish_row).transpose()
    }

    /// 原子落库一笔交奶
    ///
    /// 同一事务内:
    /// 1. 新聚合批次 INSERT, 已有批次按 expected_revision 条件 UPDATE
    ///    (0 行受影响即乐观锁冲突, 整体回滚)
    /// 2. INSERT 交奶记录
    ///
    /// # 参数
    /// - agg: 合并后的聚合批次状态 (revision 为合并前的值)
    /// - is_new: 是否本次新开窗口
    /// - delivery: 本笔交奶记录
    pub fn apply_delivery(
        &self,
        agg: &AggregateBatch,
        is_new: bool,
        delivery: &Delivery,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        if is_new {
            tx.execute(
                r#"
                INSERT INTO aggregate_batch (
                    batch_number, center_id, total_quantity_l, total_cost,
                    fat_content, acidity, temperature_at_collection, lactometer_reading,
                    adulteration_test, status, window_started_at, revision
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)
                "#,
                params![
                    agg.batch_number,
                    agg.center_id,
                    agg.total_quantity_l,
                    agg.total_cost,
                    agg.quality.fat_content,
                    agg.quality.acidity,
                    agg.quality.temperature_at_collection,
                    agg.quality.lactometer_reading,
                    agg.quality.adulteration_test,
                    agg.status.to_db_str(),
                    ts_to_db(&agg.window_started_at),
                ],
            )?;
        } else {
            let affected = tx.execute(
                r#"
                UPDATE aggregate_batch SET
                    total_quantity_l = ?1, total_cost = ?2,
                    fat_content = ?3, acidity = ?4,
                    temperature_at_collection = ?5, lactometer_reading = ?6,
                    adulteration_test = ?7, revision = revision + 1
                WHERE batch_number = ?8 AND revision = ?9
                "#,
                params![
                    agg.total_quantity_l,
                    agg.total_cost,
                    agg.quality.fat_content,
                    agg.quality.acidity,
                    agg.quality.temperature_at_collection,
                    agg.quality.lactometer_reading,
                    agg.quality.adulteration_test,
                    agg.batch_number,
                    agg.revision,
                ],
            )?;

            if affected == 0 {
                // 并发交奶抢先提交, 读出实际版本供错误上下文
                let actual: i64 = tx
                    .query_row(
                        "SELECT revision FROM aggregate_batch WHERE batch_number = ?1",
                        params![agg.batch_number],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(-1);
                // 事务随 drop 回滚
                return Err(RepositoryError::OptimisticLockFailure {
                    batch_number: agg.batch_number.clone(),
                    expected: agg.revision,
                    actual,
                });
            }
        }

        tx.execute(
            r#"
            INSERT INTO delivery (
                delivery_id, batch_number, farmer_id, center_id,
                quantity_l, price_per_liter,
                fat_content, acidity, temperature_at_collection, lactometer_reading,
                adulteration_test, handler_kind, handler_id, handler_model, collected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                delivery.delivery_id,
                delivery.batch_number,
                delivery.farmer_id,
                delivery.center_id,
                delivery.quantity_l,
                delivery.price_per_liter,
                delivery.quality.fat_content,
                delivery.quality.acidity,
                delivery.quality.temperature_at_collection,
                delivery.quality.lactometer_reading,
                delivery.quality.adulteration_test,
                delivery.handler.kind.to_db_str(),
                delivery.handler.actor_id,
                delivery.handler.model.to_db_str(),
                ts_to_db(&delivery.collected_at),
            ],
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 统计中心名下交奶记录数 (测试与对账用)
    pub fn count_deliveries(&self, batch_number: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM delivery WHERE batch_number = ?1",
            params![batch_number],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
