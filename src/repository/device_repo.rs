// ==========================================
// 牛奶冷链物流系统 - 冷链设备仓储
// ==========================================
// 覆盖三张表: iot_device (设备档案), temperature_reading (原始读数),
// cooling_violation (确认违规, end_time 为空即未解除)
// ==========================================

use crate::domain::device::{CoolingViolation, IotDevice, TemperatureReading};
use crate::domain::types::TemperatureStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{opt_ts_from_db, ts_from_db, ts_to_db};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 冷链设备档案仓储
pub struct IotDeviceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl IotDeviceRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, device: &IotDevice) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO iot_device (device_id, name, collection_id, capabilities_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                device.device_id,
                device.name,
                device.collection_id,
                serde_json::to_string(&device.control_capabilities)?,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, device_id: &str) -> RepositoryResult<Option<IotDevice>> {
        let conn = self.get_conn()?;
        let raw: Option<(String, String, Option<String>, String)> = conn
            .query_row(
                "SELECT device_id, name, collection_id, capabilities_json \
                 FROM iot_device WHERE device_id = ?1",
                params![device_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        raw.map(|(device_id, name, collection_id, capabilities_json)| {
            Ok(IotDevice {
                control_capabilities: serde_json::from_str(&capabilities_json)?,
                device_id,
                name,
                collection_id,
            })
        })
        .transpose()
    }

    pub fn get_by_id(&self, device_id: &str) -> RepositoryResult<IotDevice> {
        self.find_by_id(device_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "IotDevice".to_string(),
                id: device_id.to_string(),
            })
    }
}

/// 原始温度读数仓储
pub struct TemperatureReadingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TemperatureReadingRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, reading: &TemperatureReading) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO temperature_reading (device_id, temperature, recorded_at) \
             VALUES (?1, ?2, ?3)",
            params![
                reading.device_id,
                reading.temperature,
                ts_to_db(&reading.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// 最近 N 条读数, 新的在前 (监控面板用)
    pub fn recent_for_device(
        &self,
        device_id: &str,
        limit: u32,
    ) -> RepositoryResult<Vec<TemperatureReading>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, temperature, recorded_at FROM temperature_reading \
             WHERE device_id = ?1 ORDER BY recorded_at DESC LIMIT ?2",
        )?;
        let raws = stmt
            .query_map(params![device_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<(String, f64, String)>>>()?;
        drop(stmt);
        drop(conn);

        raws.into_iter()
            .map(|(device_id, temperature, recorded_at)| {
                Ok(TemperatureReading {
                    recorded_at: ts_from_db(&recorded_at)?,
                    device_id,
                    temperature,
                })
            })
            .collect()
    }
}

/// 确认违规仓储
pub struct CoolingViolationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CoolingViolationRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    const COLUMNS: &'static str =
        "violation_id, device_id, collection_id, temperature, status, start_time, end_time";

    fn map_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, Option<String>, f64, String, String, Option<String>)>
    {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn from_raw(
        raw: (String, String, Option<String>, f64, String, String, Option<String>),
    ) -> RepositoryResult<CoolingViolation> {
        let (violation_id, device_id, collection_id, temperature, status, start_time, end_time) =
            raw;
        Ok(CoolingViolation {
            status: TemperatureStatus::from_db_str(&status).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "status".to_string(),
                    message: format!("未知枚举值 '{}'", status),
                }
            })?,
            start_time: ts_from_db(&start_time)?,
            end_time: opt_ts_from_db(end_time)?,
            violation_id,
            device_id,
            collection_id,
            temperature,
        })
    }

    /// 落库一条确认违规 (计时器到期触发时)
    pub fn insert(&self, violation: &CoolingViolation) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO cooling_violation (
                violation_id, device_id, collection_id, temperature, status,
                start_time, end_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                violation.violation_id,
                violation.device_id,
                violation.collection_id,
                violation.temperature,
                violation.status.to_db_str(),
                ts_to_db(&violation.start_time),
                violation.end_time.as_ref().map(ts_to_db),
            ],
        )?;
        Ok(())
    }

    /// 全部未解除的违规 (重启恢复用)
    pub fn find_open(&self) -> RepositoryResult<Vec<CoolingViolation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM cooling_violation WHERE end_time IS NULL ORDER BY start_time ASC",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(Self::from_raw).collect()
    }

    /// 设备名下未解除的违规
    pub fn find_open_by_device(&self, device_id: &str) -> RepositoryResult<Vec<CoolingViolation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM cooling_violation \
             WHERE device_id = ?1 AND end_time IS NULL ORDER BY start_time ASC",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![device_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(Self::from_raw).collect()
    }

    /// 温度回正时解除设备名下全部未结违规, 返回受影响行数
    pub fn close_open_for_device(
        &self,
        device_id: &str,
        end_time: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE cooling_violation SET end_time = ?1 \
             WHERE device_id = ?2 AND end_time IS NULL",
            params![ts_to_db(&end_time), device_id],
        )?;
        Ok(affected)
    }
}
