// ==========================================
// 牛奶冷链物流系统 - 收奶中心仓储
// ==========================================

use crate::domain::geo::GeoPoint;
use crate::domain::vehicle::CollectionCenter;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

/// 收奶中心仓储
pub struct CollectionCenterRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CollectionCenterRepository {
    /// 从共享连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<CollectionCenter> {
        Ok(CollectionCenter {
            center_id: row.get(0)?,
            name: row.get(1)?,
            village: row.get(2)?,
            location: GeoPoint::new(row.get(3)?, row.get(4)?),
            storage_capacity_l: row.get(5)?,
            current_stock_l: row.get(6)?,
            village_demand_l: row.get(7)?,
            status: row.get(8)?,
        })
    }

    const COLUMNS: &'static str = "center_id, name, village, lat, lng, \
        storage_capacity_l, current_stock_l, village_demand_l, status";

    /// 插入或更新中心
    pub fn upsert(&self, center: &CollectionCenter) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO collection_center (
                center_id, name, village, lat, lng,
                storage_capacity_l, current_stock_l, village_demand_l, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                center.center_id,
                center.name,
                center.village,
                center.location.lat,
                center.location.lng,
                center.storage_capacity_l,
                center.current_stock_l,
                center.village_demand_l,
                center.status,
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询中心
    pub fn find_by_id(&self, center_id: &str) -> RepositoryResult<Option<CollectionCenter>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM collection_center WHERE center_id = ?1",
            Self::COLUMNS
        );
        let center = conn
            .query_row(&sql, params![center_id], Self::map_row)
            .optional()?;
        Ok(center)
    }

    /// 必须存在的查询 (找不到即 NotFound)
    pub fn get_by_id(&self, center_id: &str) -> RepositoryResult<CollectionCenter> {
        self.find_by_id(center_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "CollectionCenter".to_string(),
                id: center_id.to_string(),
            })
    }

    /// 调整中心库存 (交奶 +, 装车 -)
    pub fn adjust_stock(&self, center_id: &str, delta_l: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE collection_center SET current_stock_l = current_stock_l + ?1 \
             WHERE center_id = ?2",
            params![delta_l, center_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CollectionCenter".to_string(),
                id: center_id.to_string(),
            });
        }
        Ok(())
    }
}
