// ==========================================
// 牛奶冷链物流系统 - 供应商车辆仓储
// ==========================================
// 说明: SQLite 无地理索引, 邻近查询先按状态/容量过滤,
//       再在内存中用 Haversine 距离筛选半径
// 并发: 容量预留用条件 UPDATE ("剩余 ≥ 需求才预留"),
//       多调度实例下以共享存储为权威台账
// ==========================================

use crate::domain::geo::GeoPoint;
use crate::domain::types::{VehicleStatus, VehicleType};
use crate::domain::vehicle::Vehicle;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{opt_ts_from_db, ts_to_db};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 供应商车辆仓储
pub struct VehicleRepository {
    conn: Arc<Mutex<Connection>>,
}

struct RawVehicleRow {
    vehicle_id: String,
    name: String,
    plate_number: String,
    vehicle_type: String,
    capacity_l: f64,
    committed_l: f64,
    driver_name: String,
    driver_contact: String,
    lat: f64,
    lng: f64,
    located_at: Option<String>,
    status: String,
    current_batches_json: String,
}

impl VehicleRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    const COLUMNS: &'static str = "vehicle_id, name, plate_number, vehicle_type, \
        capacity_l, committed_l, driver_name, driver_contact, lat, lng, located_at, \
        status, current_batches_json";

    fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawVehicleRow> {
        Ok(RawVehicleRow {
            vehicle_id: row.get(0)?,
            name: row.get(1)?,
            plate_number: row.get(2)?,
            vehicle_type: row.get(3)?,
            capacity_l: row.get(4)?,
            committed_l: row.get(5)?,
            driver_name: row.get(6)?,
            driver_contact: row.get(7)?,
            lat: row.get(8)?,
            lng: row.get(9)?,
            located_at: row.get(10)?,
            status: row.get(11)?,
            current_batches_json: row.get(12)?,
        })
    }

    fn from_raw(raw: RawVehicleRow) -> RepositoryResult<Vehicle> {
        Ok(Vehicle {
            vehicle_type: VehicleType::from_db_str(&raw.vehicle_type).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "vehicle_type".to_string(),
                    message: format!("未知枚举值 '{}'", raw.vehicle_type),
                }
            })?,
            status: VehicleStatus::from_db_str(&raw.status).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "status".to_string(),
                    message: format!("未知枚举值 '{}'", raw.status),
                }
            })?,
            current_batches: serde_json::from_str(&raw.current_batches_json)?,
            located_at: opt_ts_from_db(raw.located_at)?,
            location: GeoPoint::new(raw.lat, raw.lng),
            vehicle_id: raw.vehicle_id,
            name: raw.name,
            plate_number: raw.plate_number,
            capacity_l: raw.capacity_l,
            committed_l: raw.committed_l,
            driver_name: raw.driver_name,
            driver_contact: raw.driver_contact,
        })
    }

    pub fn upsert(&self, vehicle: &Vehicle) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO vehicle (
                vehicle_id, name, plate_number, vehicle_type, capacity_l, committed_l,
                driver_name, driver_contact, lat, lng, located_at, status,
                current_batches_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                vehicle.vehicle_id,
                vehicle.name,
                vehicle.plate_number,
                vehicle.vehicle_type.to_db_str(),
                vehicle.capacity_l,
                vehicle.committed_l,
                vehicle.driver_name,
                vehicle.driver_contact,
                vehicle.location.lat,
                vehicle.location.lng,
                vehicle.located_at.as_ref().map(ts_to_db),
                vehicle.status.to_db_str(),
                serde_json::to_string(&vehicle.current_batches)?,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, vehicle_id: &str) -> RepositoryResult<Option<Vehicle>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM vehicle WHERE vehicle_id = ?1", Self::COLUMNS);
        let raw = conn
            .query_row(&sql, params![vehicle_id], Self::read_raw)
            .optional()?;
        raw.map(Self::from_raw).transpose()
    }

    pub fn get_by_id(&self, vehicle_id: &str) -> RepositoryResult<Vehicle> {
        self.find_by_id(vehicle_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Vehicle".to_string(),
                id: vehicle_id.to_string(),
            })
    }

    /// 查询指定点半径内可调度且额定容量足够的候选车辆
    ///
    /// # 返回
    /// - Vec<(Vehicle, 距离公里)> 按距离升序
    pub fn find_available_candidates(
        &self,
        near: &GeoPoint,
        required_l: f64,
        radius_km: f64,
    ) -> RepositoryResult<Vec<(Vehicle, f64)>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM vehicle WHERE status = 'available' AND capacity_l >= ?1",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![required_l], Self::read_raw)?
            .collect::<rusqlite::Result<Vec<RawVehicleRow>>>()?;
        drop(stmt);
        drop(conn);

        let mut candidates = Vec::new();
        for raw in raws {
            let vehicle = Self::from_raw(raw)?;
            let dist_km = near.distance_km(&vehicle.location);
            if dist_km <= radius_km {
                candidates.push((vehicle, dist_km));
            }
        }
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(candidates)
    }

    /// 更新车辆状态
    pub fn set_status(&self, vehicle_id: &str, status: VehicleStatus) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE vehicle SET status = ?1 WHERE vehicle_id = ?2",
            params![status.to_db_str(), vehicle_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Vehicle".to_string(),
                id: vehicle_id.to_string(),
            });
        }
        Ok(())
    }

    /// 释放已承诺容量 (行程完成/取消时)
    pub fn release_capacity(&self, vehicle_id: &str, amount_l: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE vehicle SET committed_l = MAX(committed_l - ?1, 0) WHERE vehicle_id = ?2",
            params![amount_l, vehicle_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Vehicle".to_string(),
                id: vehicle_id.to_string(),
            });
        }
        Ok(())
    }
}
