// ==========================================
// 牛奶冷链物流系统 - 加工厂仓储
// ==========================================
// 说明: 预期到货清单存 JSON 列, 备用产能在内存中按
//       加工产能 - 当前库存 - 预期到货合计 计算
// ==========================================

use crate::domain::geo::GeoPoint;
use crate::domain::plant::ProcessingPlant;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 加工厂仓储
pub struct ProcessingPlantRepository {
    conn: Arc<Mutex<Connection>>,
}

struct RawPlantRow {
    plant_id: String,
    name: String,
    lat: f64,
    lng: f64,
    processing_capacity_l: f64,
    current_stock_l: f64,
    expected_json: String,
}

impl ProcessingPlantRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    const COLUMNS: &'static str =
        "plant_id, name, lat, lng, processing_capacity_l, current_stock_l, expected_json";

    fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPlantRow> {
        Ok(RawPlantRow {
            plant_id: row.get(0)?,
            name: row.get(1)?,
            lat: row.get(2)?,
            lng: row.get(3)?,
            processing_capacity_l: row.get(4)?,
            current_stock_l: row.get(5)?,
            expected_json: row.get(6)?,
        })
    }

    fn from_raw(raw: RawPlantRow) -> RepositoryResult<ProcessingPlant> {
        Ok(ProcessingPlant {
            expected_deliveries: serde_json::from_str(&raw.expected_json)?,
            location: GeoPoint::new(raw.lat, raw.lng),
            plant_id: raw.plant_id,
            name: raw.name,
            processing_capacity_l: raw.processing_capacity_l,
            current_stock_l: raw.current_stock_l,
        })
    }

    pub fn upsert(&self, plant: &ProcessingPlant) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO processing_plant (
                plant_id, name, lat, lng, processing_capacity_l,
                current_stock_l, expected_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                plant.plant_id,
                plant.name,
                plant.location.lat,
                plant.location.lng,
                plant.processing_capacity_l,
                plant.current_stock_l,
                serde_json::to_string(&plant.expected_deliveries)?,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, plant_id: &str) -> RepositoryResult<Option<ProcessingPlant>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM processing_plant WHERE plant_id = ?1",
            Self::COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![plant_id], Self::read_raw)
            .optional()?;
        raw.map(Self::from_raw).transpose()
    }

    pub fn get_by_id(&self, plant_id: &str) -> RepositoryResult<ProcessingPlant> {
        self.find_by_id(plant_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ProcessingPlant".to_string(),
                id: plant_id.to_string(),
            })
    }

    /// 查询距指定点最近且备用产能足够的加工厂
    pub fn find_nearest_with_capacity(
        &self,
        near: &GeoPoint,
        required_l: f64,
    ) -> RepositoryResult<Option<ProcessingPlant>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM processing_plant", Self::COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], Self::read_raw)?
            .collect::<rusqlite::Result<Vec<RawPlantRow>>>()?;
        drop(stmt);
        drop(conn);

        let mut best: Option<(ProcessingPlant, f64)> = None;
        for raw in raws {
            let plant = Self::from_raw(raw)?;
            if plant.spare_capacity_l() < required_l {
                continue;
            }
            let dist = near.distance_km(&plant.location);
            if best.as_ref().map(|(_, d)| dist < *d).unwrap_or(true) {
                best = Some((plant, dist));
            }
        }
        Ok(best.map(|(plant, _)| plant))
    }
}
