// ==========================================
// 牛奶冷链物流系统 - 领域层
// ==========================================
// 职责: 实体与类型定义, 不含持久化与业务规则
// ==========================================

pub mod batch;
pub mod collection;
pub mod device;
pub mod geo;
pub mod plant;
pub mod types;
pub mod vehicle;

// 重导出核心实体
pub use batch::{AggregateBatch, CustodyHolder, Delivery, MilkBatch, QualityMetrics};
pub use collection::{
    BatchStop, Collection, CoolingRecord, PlannedRoute, RouteWaypoint, TemperatureLog,
    ViolationEvent,
};
pub use device::{CoolingViolation, IotDevice, TemperatureReading, CAP_ADJUST_TEMPERATURE};
pub use geo::GeoPoint;
pub use plant::{ExpectedDelivery, ProcessingPlant};
pub use vehicle::{CollectionCenter, Farmer, Vehicle};
