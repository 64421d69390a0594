// ==========================================
// 牛奶冷链物流系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑, 只做持久化与查询;
//       多表写路径 (交奶/分配/交接) 必须走显式事务
// ==========================================

pub mod aggregate_repo;
pub mod batch_repo;
pub mod center_repo;
pub mod collection_repo;
pub mod device_repo;
pub mod error;
pub mod farmer_repo;
pub mod plant_repo;
pub mod tracking_repo;
pub mod vehicle_repo;

pub use aggregate_repo::AggregateBatchRepository;
pub use batch_repo::MilkBatchRepository;
pub use center_repo::CollectionCenterRepository;
pub use collection_repo::CollectionRepository;
pub use device_repo::{CoolingViolationRepository, IotDeviceRepository, TemperatureReadingRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use farmer_repo::FarmerRepository;
pub use plant_repo::ProcessingPlantRepository;
pub use tracking_repo::MilkTrackingRepository;
pub use vehicle_repo::VehicleRepository;

use chrono::{DateTime, Utc};

/// 时间戳统一按 RFC3339 文本存储
pub(crate) fn ts_to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// 从数据库文本解析时间戳
pub(crate) fn ts_from_db(s: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::FieldValueError {
            field: "timestamp".to_string(),
            message: format!("无法解析 '{}': {}", s, e),
        })
}

/// 可空时间戳解析
pub(crate) fn opt_ts_from_db(s: Option<String>) -> RepositoryResult<Option<DateTime<Utc>>> {
    match s {
        Some(v) => Ok(Some(ts_from_db(&v)?)),
        None => Ok(None),
    }
}
