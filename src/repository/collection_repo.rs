// ==========================================
// 牛奶冷链物流系统 - 集奶行程仓储
// ==========================================
// 职责: 行程(收集任务)的落库与查询, 含站点/路线/冷链记录的 JSON 列
// 红线: 派车 = 车辆容量预留 + 行程更新, 必须同一事务;
//       预留用条件 UPDATE, 0 行受影响即容量不足, 整体回滚
// ==========================================

use crate::domain::collection::{Collection, CoolingRecord, PlannedRoute, TemperatureLog, ViolationEvent};
use crate::domain::types::{CollectionStatus, VehicleStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{opt_ts_from_db, ts_from_db, ts_to_db};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

/// 集奶行程仓储
pub struct CollectionRepository {
    conn: Arc<Mutex<Connection>>,
}

struct RawCollectionRow {
    collection_id: String,
    center_id: String,
    status: String,
    planned_date: String,
    actual_date: Option<String>,
    vehicle_id: Option<String>,
    urgency_score: f64,
    stops_json: String,
    route_json: Option<String>,
    cooling_json: String,
    created_at: String,
}

impl CollectionRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    const COLUMNS: &'static str = "collection_id, center_id, status, planned_date, \
        actual_date, vehicle_id, urgency_score, stops_json, route_json, cooling_json, \
        created_at";

    fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCollectionRow> {
        Ok(RawCollectionRow {
            collection_id: row.get(0)?,
            center_id: row.get(1)?,
            status: row.get(2)?,
            planned_date: row.get(3)?,
            actual_date: row.get(4)?,
            vehicle_id: row.get(5)?,
            urgency_score: row.get(6)?,
            stops_json: row.get(7)?,
            route_json: row.get(8)?,
            cooling_json: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn from_raw(raw: RawCollectionRow) -> RepositoryResult<Collection> {
        let route: Option<PlannedRoute> = match raw.route_json {
            Some(ref text) => Some(serde_json::from_str(text)?),
            None => None,
        };
        Ok(Collection {
            status: CollectionStatus::from_db_str(&raw.status).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "status".to_string(),
                    message: format!("未知枚举值 '{}'", raw.status),
                }
            })?,
            planned_date: ts_from_db(&raw.planned_date)?,
            actual_date: opt_ts_from_db(raw.actual_date)?,
            stops: serde_json::from_str(&raw.stops_json)?,
            cooling: serde_json::from_str(&raw.cooling_json)?,
            created_at: ts_from_db(&raw.created_at)?,
            route,
            collection_id: raw.collection_id,
            center_id: raw.center_id,
            vehicle_id: raw.vehicle_id,
            urgency_score: raw.urgency_score,
        })
    }

    pub fn insert(&self, collection: &Collection) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO collection (
                collection_id, center_id, status, planned_date, actual_date,
                vehicle_id, urgency_score, stops_json, route_json, cooling_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                collection.collection_id,
                collection.center_id,
                collection.status.to_db_str(),
                ts_to_db(&collection.planned_date),
                collection.actual_date.as_ref().map(ts_to_db),
                collection.vehicle_id,
                collection.urgency_score,
                serde_json::to_string(&collection.stops)?,
                collection
                    .route
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&collection.cooling)?,
                ts_to_db(&collection.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, collection_id: &str) -> RepositoryResult<Option<Collection>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM collection WHERE collection_id = ?1",
            Self::COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![collection_id], Self::read_raw)
            .optional()?;
        raw.map(Self::from_raw).transpose()
    }

    pub fn get_by_id(&self, collection_id: &str) -> RepositoryResult<Collection> {
        self.find_by_id(collection_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Collection".to_string(),
                id: collection_id.to_string(),
            })
    }

    /// 查询全部待调度行程, 按计划时间升序
    pub fn find_pending(&self) -> RepositoryResult<Vec<Collection>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM collection WHERE status = 'pending' ORDER BY planned_date ASC",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], Self::read_raw)?
            .collect::<rusqlite::Result<Vec<RawCollectionRow>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(Self::from_raw).collect()
    }

    /// 更新行程状态; 完成/取消时同时记录实际时间
    pub fn update_status(
        &self,
        collection_id: &str,
        status: CollectionStatus,
        actual_date: Option<DateTime<Utc>>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE collection SET status = ?1, actual_date = COALESCE(?2, actual_date) \
             WHERE collection_id = ?3",
            params![
                status.to_db_str(),
                actual_date.as_ref().map(ts_to_db),
                collection_id,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Collection".to_string(),
                id: collection_id.to_string(),
            });
        }
        Ok(())
    }

    /// 派车失败后的改期: 顺延计划时间并抬升紧急度
    pub fn reschedule(
        &self,
        collection_id: &str,
        planned_date: DateTime<Utc>,
        urgency_score: f64,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE collection SET planned_date = ?1, urgency_score = ?2 \
             WHERE collection_id = ?3",
            params![ts_to_db(&planned_date), urgency_score, collection_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Collection".to_string(),
                id: collection_id.to_string(),
            });
        }
        Ok(())
    }

    /// 派车: 车辆容量预留与行程更新同一事务
    ///
    /// 1. 条件 UPDATE 预留容量 (capacity_l - committed_l >= 需求才成立),
    ///    0 行受影响即容量不足, 回滚并返回 CapacityReservationFailed
    /// 2. 车辆状态置 in_transit
    /// 3. 行程写入 vehicle_id / 路线 / 状态 in_progress
    pub fn assign_vehicle(
        &self,
        collection_id: &str,
        vehicle_id: &str,
        required_l: f64,
        route: &PlannedRoute,
        planned_date: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let route_json = serde_json::to_string(route)?;
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let reserved = tx.execute(
            "UPDATE vehicle SET committed_l = committed_l + ?1 \
             WHERE vehicle_id = ?2 AND capacity_l - committed_l >= ?1",
            params![required_l, vehicle_id],
        )?;
        if reserved == 0 {
            // 事务随 drop 回滚
            return Err(RepositoryError::CapacityReservationFailed {
                vehicle_id: vehicle_id.to_string(),
                required_l,
            });
        }

        tx.execute(
            "UPDATE vehicle SET status = ?1 WHERE vehicle_id = ?2",
            params![VehicleStatus::InTransit.to_db_str(), vehicle_id],
        )?;

        let affected = tx.execute(
            r#"
            UPDATE collection
            SET status = ?1, vehicle_id = ?2, route_json = ?3, planned_date = ?4
            WHERE collection_id = ?5
            "#,
            params![
                CollectionStatus::InProgress.to_db_str(),
                vehicle_id,
                route_json,
                ts_to_db(&planned_date),
                collection_id,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Collection".to_string(),
                id: collection_id.to_string(),
            });
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    fn read_cooling(tx: &Transaction<'_>, collection_id: &str) -> RepositoryResult<CoolingRecord> {
        let text: Option<String> = tx
            .query_row(
                "SELECT cooling_json FROM collection WHERE collection_id = ?1",
                params![collection_id],
                |row| row.get(0),
            )
            .optional()?;
        let text = text.ok_or_else(|| RepositoryError::NotFound {
            entity: "Collection".to_string(),
            id: collection_id.to_string(),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_cooling(
        tx: &Transaction<'_>,
        collection_id: &str,
        cooling: &CoolingRecord,
    ) -> RepositoryResult<()> {
        tx.execute(
            "UPDATE collection SET cooling_json = ?1 WHERE collection_id = ?2",
            params![serde_json::to_string(cooling)?, collection_id],
        )?;
        Ok(())
    }

    /// 向行程冷链记录追加一条温度日志 (读-改-写同一事务)
    pub fn append_temperature_log(
        &self,
        collection_id: &str,
        log: TemperatureLog,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut cooling = Self::read_cooling(&tx, collection_id)?;
        if cooling.initial_temperature.is_none() {
            cooling.initial_temperature = Some(log.temperature);
        }
        cooling.final_temperature = Some(log.temperature);
        cooling.temperature_logs.push(log);
        Self::write_cooling(&tx, collection_id, &cooling)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 向行程冷链记录追加一条确认的温度违规
    pub fn append_violation(
        &self,
        collection_id: &str,
        event: ViolationEvent,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut cooling = Self::read_cooling(&tx, collection_id)?;
        cooling.violations.push(event);
        Self::write_cooling(&tx, collection_id, &cooling)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }
}
