// ==========================================
// 牛奶冷链物流系统 - 奶农仓储
// ==========================================

use crate::domain::geo::GeoPoint;
use crate::domain::vehicle::Farmer;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 奶农仓储
pub struct FarmerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FarmerRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, farmer: &Farmer) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO farmer (farmer_id, name, phone, center_id, lat, lng)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                farmer.farmer_id,
                farmer.name,
                farmer.phone,
                farmer.center_id,
                farmer.location.lat,
                farmer.location.lng,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, farmer_id: &str) -> RepositoryResult<Option<Farmer>> {
        let conn = self.get_conn()?;
        let farmer = conn
            .query_row(
                "SELECT farmer_id, name, phone, center_id, lat, lng FROM farmer WHERE farmer_id = ?1",
                params![farmer_id],
                |row| {
                    Ok(Farmer {
                        farmer_id: row.get(0)?,
                        name: row.get(1)?,
                        phone: row.get(2)?,
                        center_id: row.get(3)?,
                        location: GeoPoint::new(row.get(4)?, row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(farmer)
    }

    pub fn get_by_id(&self, farmer_id: &str) -> RepositoryResult<Farmer> {
        self.find_by_id(farmer_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Farmer".to_string(),
                id: farmer_id.to_string(),
            })
    }
}
