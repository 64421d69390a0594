// ==========================================
// 牛奶冷链物流系统 - 溯源/交接仓储
// ==========================================
// 职责: 跨表的交接落库 (批次 + 中心库存 + 车辆/加工厂), 全部单事务
// 红线: 批次状态列带前置状态守卫; 守卫失败整体回滚
// ==========================================

use crate::domain::batch::{CustodyHolder, MilkBatch};
use crate::domain::plant::ExpectedDelivery;
use crate::domain::types::{BatchStatus, VehicleStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::ts_to_db;
use rusqlite::{params, Connection, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

/// 溯源交接仓储
pub struct MilkTrackingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MilkTrackingRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn guarded_transition(
        tx: &Transaction<'_>,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
        handler: &CustodyHolder,
    ) -> RepositoryResult<()> {
        let affected = tx.execute(
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

    /// 入库一笔收奶: 批次落库 + 中心库存增加, 同一事务
    pub fn record_collection(&self, batch: &MilkBatch) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO milk_batch (
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

        let affected = tx.execute(
            "UPDATE collection_center SET current_stock_l = current_stock_l + ?1 \
             WHERE center_id = ?2",
            params![batch.quantity_l, batch.center_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CollectionCenter".to_string(),
                id: batch.center_id.clone(),
            });
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 装车发运: 批次 at_center → in_transit, 中心库存减少,
    /// 车辆在途批次清单追加且车辆转入在途, 同一事务
    ///
    /// 车辆必须处于 available 状态, 否则整体回滚
    pub fn record_transfer_to_supplier(
        &self,
        batch: &MilkBatch,
        vehicle_id: &str,
        driver: &CustodyHolder,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        Self::guarded_transition(
            &tx,
            &batch.batch_id,
            BatchStatus::AtCenter,
            BatchStatus::InTransit,
            driver,
        )?;

        let affected = tx.execute(
            "UPDATE collection_center SET current_stock_l = MAX(current_stock_l - ?1, 0) \
             WHERE center_id = ?2",
            params![batch.quantity_l, batch.center_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CollectionCenter".to_string(),
                id: batch.center_id.clone(),
            });
        }

        let (vehicle_status, batches_json): (String, String) = tx.query_row(
            "SELECT status, current_batches_json FROM vehicle WHERE vehicle_id = ?1",
            params![vehicle_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut batches: Vec<String> = serde_json::from_str(&batches_json)?;
        if !batches.iter().any(|b| b == &batch.batch_id) {
            batches.push(batch.batch_id.clone());
        }
        // 状态守卫在 SQL 中, 0 行即车辆不可用
        let affected = tx.execute(
            "UPDATE vehicle SET current_batches_json = ?1, status = ?2 \
             WHERE vehicle_id = ?3 AND status = ?4",
            params![
                serde_json::to_string(&batches)?,
                VehicleStatus::InTransit.to_db_str(),
                vehicle_id,
                VehicleStatus::Available.to_db_str(),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::VehicleUnavailable {
                vehicle_id: vehicle_id.to_string(),
                status: vehicle_status,
            });
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 到厂交付: 批次 in_transit → at_plant, 车辆在途清单移除
    /// (清单清空即回到 available), 加工厂库存增加并核销预期到货, 同一事务
    pub fn record_plant_delivery(
        &self,
        batch: &MilkBatch,
        vehicle_id: &str,
        plant_id: &str,
        plant_staff: &CustodyHolder,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        Self::guarded_transition(
            &tx,
            &batch.batch_id,
            BatchStatus::InTransit,
            BatchStatus::AtPlant,
            plant_staff,
        )?;

        let batches_json: String = tx.query_row(
            "SELECT current_batches_json FROM vehicle WHERE vehicle_id = ?1",
            params![vehicle_id],
            |row| row.get(0),
        )?;
        let mut batches: Vec<String> = serde_json::from_str(&batches_json)?;
        batches.retain(|b| b != &batch.batch_id);
        if batches.is_empty() {
            tx.execute(
                "UPDATE vehicle SET current_batches_json = ?1, status = ?2 \
                 WHERE vehicle_id = ?3",
                params![
                    serde_json::to_string(&batches)?,
                    VehicleStatus::Available.to_db_str(),
                    vehicle_id,
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE vehicle SET current_batches_json = ?1 WHERE vehicle_id = ?2",
                params![serde_json::to_string(&batches)?, vehicle_id],
            )?;
        }

        let expected_json: String = tx.query_row(
            "SELECT expected_json FROM processing_plant WHERE plant_id = ?1",
            params![plant_id],
            |row| row.get(0),
        )?;
        let mut expected: Vec<ExpectedDelivery> = serde_json::from_str(&expected_json)?;
        expected.retain(|e| e.batch_id != batch.batch_id);
        tx.execute(
            "UPDATE processing_plant SET current_stock_l = current_stock_l + ?1, \
             expected_json = ?2 WHERE plant_id = ?3",
            params![
                batch.quantity_l,
                serde_json::to_string(&expected)?,
                plant_id,
            ],
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 登记一笔预期到货 (发运时通知加工厂)
    pub fn register_expected_delivery(
        &self,
        plant_id: &str,
        entry: &ExpectedDelivery,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let expected_json: String = tx.query_row(
            "SELECT expected_json FROM processing_plant WHERE plant_id = ?1",
            params![plant_id],
            |row| row.get(0),
        )?;
        let mut expected: Vec<ExpectedDelivery> = serde_json::from_str(&expected_json)?;
        expected.retain(|e| e.batch_id != entry.batch_id);
        expected.push(entry.clone());
        tx.execute(
            "UPDATE processing_plant SET expected_json = ?1 WHERE plant_id = ?2",
            params![serde_json::to_string(&expected)?, plant_id],
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }
}
