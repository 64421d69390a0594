// ==========================================
// 牛奶冷链物流系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批次溯源与冷链物流协调引擎
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AlertPriority, BatchEvent, BatchStatus, CollectionStatus, Destination, HandlerKind,
    HandlerModel, PaymentStatus, TemperatureStatus, VehicleStatus, VehicleType,
};

// 领域实体
pub use domain::{
    AggregateBatch, BatchStop, Collection, CollectionCenter, CoolingRecord, CoolingViolation,
    CustodyHolder, Delivery, Farmer, GeoPoint, IotDevice, MilkBatch, PlannedRoute,
    ProcessingPlant, QualityMetrics, TemperatureLog, TemperatureReading, Vehicle, ViolationEvent,
};

// 引擎
pub use engine::{
    CollectionAggregator, CollectionOptimizer, EngineError, EngineResult, MilkTrackingEngine,
    RoutePlanner, ShelfLifeEngine, TemperatureMonitor,
};

// 配置
pub use config::{ConfigManager, Settings};

/// 库版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用名称
pub const APP_NAME: &str = "maziwa-chain";
