// ==========================================
// 牛奶冷链物流系统 - 配置层
// ==========================================
// 职责: 运行参数的默认值与 config_kv 覆写加载
// ==========================================

pub mod config_manager;
pub mod settings;

pub use config_manager::{config_keys, ConfigManager};
pub use settings::{
    AggregatorSettings, CoolingThresholds, MonitorSettings, OptimizerSettings, RouteSettings,
    Settings, ShelfLifeSettings,
};
