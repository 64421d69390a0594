// ==========================================
// 牛奶冷链物流系统 - 引擎层
// ==========================================
// 职责: 全部业务决策 (状态迁移合法性/聚合加权/紧急度排程/
//       阈值分级与防抖/路线时刻计算), 持久化交给仓储层
// ==========================================

pub mod aggregator;
pub mod error;
pub mod events;
pub mod optimizer;
pub mod route_planner;
pub mod shelf_life;
pub mod state_machine;
pub mod temperature;
pub mod tracking;

pub use aggregator::CollectionAggregator;
pub use error::{EngineError, EngineResult};
pub use events::{
    BroadcastAlert, DeviceCommandPublisher, NoOpDispatcher, Notification, NotificationChannel,
    NotificationDispatcher, NotificationKind, RecordingDispatcher,
};
pub use optimizer::{CollectionOptimizer, OptimizeOutcome};
pub use route_planner::{DirectionsPlan, DirectionsProvider, HaversineDirections, RouteLeg, RoutePlanner};
pub use shelf_life::{remaining_shelf_life, ShelfLifeEngine};
pub use temperature::{classify, TemperatureMonitor};
pub use tracking::MilkTrackingEngine;
