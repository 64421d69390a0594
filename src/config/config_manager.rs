// ==========================================
// 牛奶冷链物流系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: 键不存在或格式非法时落回出厂默认值并告警, 不中断启动
// ==========================================

use crate::config::settings::{
    AggregatorSettings, CoolingThresholds, MonitorSettings, OptimizerSettings, RouteSettings,
    Settings, ShelfLifeSettings,
};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 为保证连接行为一致, 会对传入连接再次应用统一 PRAGMA (幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值 (scope_id='global')
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, Box<dyn Error>> {
        match self.get_config_value(key)? {
            Some(raw) => Ok(raw.trim().parse::<f64>().unwrap_or_else(|_| {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误, 使用默认值");
                default
            })),
            None => Ok(default),
        }
    }

    fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, Box<dyn Error>> {
        match self.get_config_value(key)? {
            Some(raw) => Ok(raw.trim().parse::<i64>().unwrap_or_else(|_| {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误, 使用默认值");
                default
            })),
            None => Ok(default),
        }
    }

    /// 加载温度阈值配置
    pub fn get_cooling_thresholds(&self) -> Result<CoolingThresholds, Box<dyn Error>> {
        let d = CoolingThresholds::default();
        Ok(CoolingThresholds {
            critical_high: self.get_f64_or(config_keys::TEMP_CRITICAL_HIGH, d.critical_high)?,
            warning_high: self.get_f64_or(config_keys::TEMP_WARNING_HIGH, d.warning_high)?,
            ideal: self.get_f64_or(config_keys::TEMP_IDEAL, d.ideal)?,
            warning_low: self.get_f64_or(config_keys::TEMP_WARNING_LOW, d.warning_low)?,
            critical_low: self.get_f64_or(config_keys::TEMP_CRITICAL_LOW, d.critical_low)?,
        })
    }

    /// 加载温度监控配置
    pub fn get_monitor_settings(&self) -> Result<MonitorSettings, Box<dyn Error>> {
        let d = MonitorSettings::default();
        Ok(MonitorSettings {
            thresholds: self.get_cooling_thresholds()?,
            debounce_secs: self.get_i64_or(config_keys::VIOLATION_DEBOUNCE_SECS, d.debounce_secs)?,
        })
    }

    /// 加载交奶聚合配置
    pub fn get_aggregator_settings(&self) -> Result<AggregatorSettings, Box<dyn Error>> {
        let d = AggregatorSettings::default();
        Ok(AggregatorSettings {
            window_hours: self.get_i64_or(config_keys::BATCH_WINDOW_HOURS, d.window_hours)?,
            max_retries: self.get_i64_or(config_keys::MERGE_MAX_RETRIES, d.max_retries as i64)?
                as u32,
        })
    }

    /// 加载保质期模型配置
    pub fn get_shelf_life_settings(&self) -> Result<ShelfLifeSettings, Box<dyn Error>> {
        let d = ShelfLifeSettings::default();
        Ok(ShelfLifeSettings {
            base_hours: self.get_f64_or(config_keys::SHELF_BASE_HOURS, d.base_hours)?,
            fat_weight: self.get_f64_or(config_keys::SHELF_FAT_WEIGHT, d.fat_weight)?,
            acidity_weight: self.get_f64_or(config_keys::SHELF_ACIDITY_WEIGHT, d.acidity_weight)?,
            violation_penalty: self
                .get_f64_or(config_keys::SHELF_VIOLATION_PENALTY, d.violation_penalty)?,
            violation_temp_c: self
                .get_f64_or(config_keys::SHELF_VIOLATION_TEMP_C, d.violation_temp_c)?,
            local_sale_fat_pct: self
                .get_f64_or(config_keys::LOCAL_SALE_FAT_PCT, d.local_sale_fat_pct)?,
            plant_acidity_max: self
                .get_f64_or(config_keys::PLANT_ACIDITY_MAX, d.plant_acidity_max)?,
            plant_radius_km: self.get_f64_or(config_keys::PLANT_RADIUS_KM, d.plant_radius_km)?,
            souring_window_hours: self
                .get_f64_or(config_keys::SOURING_WINDOW_HOURS, d.souring_window_hours)?,
        })
    }

    /// 加载集奶调度配置
    pub fn get_optimizer_settings(&self) -> Result<OptimizerSettings, Box<dyn Error>> {
        let d = OptimizerSettings::default();
        Ok(OptimizerSettings {
            search_radius_km: self.get_f64_or(config_keys::SEARCH_RADIUS_KM, d.search_radius_km)?,
            max_candidates: self
                .get_i64_or(config_keys::MAX_CANDIDATES, d.max_candidates as i64)?
                as usize,
            retry_delay_mins: self.get_i64_or(config_keys::RETRY_DELAY_MINS, d.retry_delay_mins)?,
            retry_urgency_bump: self
                .get_f64_or(config_keys::RETRY_URGENCY_BUMP, d.retry_urgency_bump)?,
            hours_weight: self.get_f64_or(config_keys::URGENCY_HOURS_WEIGHT, d.hours_weight)?,
            fat_weight: self.get_f64_or(config_keys::URGENCY_FAT_WEIGHT, d.fat_weight)?,
        })
    }

    /// 加载路线规划配置
    pub fn get_route_settings(&self) -> Result<RouteSettings, Box<dyn Error>> {
        let d = RouteSettings::default();
        Ok(RouteSettings {
            loading_unit_l: self.get_f64_or(config_keys::LOADING_UNIT_L, d.loading_unit_l)?,
            loading_mins_per_unit: self
                .get_i64_or(config_keys::LOADING_MINS_PER_UNIT, d.loading_mins_per_unit)?,
            fallback_speed_kmh: self
                .get_f64_or(config_keys::FALLBACK_SPEED_KMH, d.fallback_speed_kmh)?,
        })
    }

    /// 加载全量参数快照
    pub fn load_settings(&self) -> Result<Settings, Box<dyn Error>> {
        Ok(Settings {
            monitor: self.get_monitor_settings()?,
            aggregator: self.get_aggregator_settings()?,
            shelf_life: self.get_shelf_life_settings()?,
            optimizer: self.get_optimizer_settings()?,
            route: self.get_route_settings()?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 温度阈值
    pub const TEMP_CRITICAL_HIGH: &str = "temp_critical_high";
    pub const TEMP_WARNING_HIGH: &str = "temp_warning_high";
    pub const TEMP_IDEAL: &str = "temp_ideal";
    pub const TEMP_WARNING_LOW: &str = "temp_warning_low";
    pub const TEMP_CRITICAL_LOW: &str = "temp_critical_low";

    // 违规防抖
    pub const VIOLATION_DEBOUNCE_SECS: &str = "violation_debounce_secs";

    // 交奶聚合
    pub const BATCH_WINDOW_HOURS: &str = "batch_window_hours";
    pub const MERGE_MAX_RETRIES: &str = "merge_max_retries";

    // 保质期模型
    pub const SHELF_BASE_HOURS: &str = "shelf_base_hours";
    pub const SHELF_FAT_WEIGHT: &str = "shelf_fat_weight";
    pub const SHELF_ACIDITY_WEIGHT: &str = "shelf_acidity_weight";
    pub const SHELF_VIOLATION_PENALTY: &str = "shelf_violation_penalty";
    pub const SHELF_VIOLATION_TEMP_C: &str = "shelf_violation_temp_c";
    pub const LOCAL_SALE_FAT_PCT: &str = "local_sale_fat_pct";
    pub const PLANT_ACIDITY_MAX: &str = "plant_acidity_max";
    pub const PLANT_RADIUS_KM: &str = "plant_radius_km";
    pub const SOURING_WINDOW_HOURS: &str = "souring_window_hours";

    // 集奶调度
    pub const SEARCH_RADIUS_KM: &str = "search_radius_km";
    pub const MAX_CANDIDATES: &str = "max_candidates";
    pub const RETRY_DELAY_MINS: &str = "retry_delay_mins";
    pub const RETRY_URGENCY_BUMP: &str = "retry_urgency_bump";
    pub const URGENCY_HOURS_WEIGHT: &str = "urgency_hours_weight";
    pub const URGENCY_FAT_WEIGHT: &str = "urgency_fat_weight";

    // 路线规划
    pub const LOADING_UNIT_L: &str = "loading_unit_l";
    pub const LOADING_MINS_PER_UNIT: &str = "loading_mins_per_unit";
    pub const FALLBACK_SPEED_KMH: &str = "fallback_speed_kmh";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn manager_with_schema() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_table_empty() {
        let mgr = manager_with_schema();
        let settings = mgr.load_settings().unwrap();
        assert_eq!(settings.monitor.debounce_secs, 300, "默认防抖 5 分钟");
        assert_eq!(settings.aggregator.window_hours, 24, "默认窗口 24 小时");
        assert!((settings.monitor.thresholds.critical_high - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_override_roundtrip() {
        let mgr = manager_with_schema();
        mgr.set_config_value(config_keys::BATCH_WINDOW_HOURS, "12")
            .unwrap();
        mgr.set_config_value(config_keys::TEMP_CRITICAL_HIGH, "9.5")
            .unwrap();
        let settings = mgr.load_settings().unwrap();
        assert_eq!(settings.aggregator.window_hours, 12);
        assert!((settings.monitor.thresholds.critical_high - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let mgr = manager_with_schema();
        mgr.set_config_value(config_keys::SEARCH_RADIUS_KM, "not-a-number")
            .unwrap();
        let settings = mgr.load_settings().unwrap();
        assert!((settings.optimizer.search_radius_km - 50.0).abs() < 1e-9, "非法值落回默认");
    }
}
