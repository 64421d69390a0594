// ==========================================
// 牛奶冷链物流系统 - 运行参数
// ==========================================
// 各引擎的可调参数, 带出厂默认值; 由 ConfigManager
// 从 config_kv 表加载覆写后的快照
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// 冷链温度阈值 (摄氏度)
// ==========================================
// 分级边界为严格比较: 恰好 8.0°C 不算 critical_high
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoolingThresholds {
    pub critical_high: f64,
    pub warning_high: f64,
    pub ideal: f64,
    pub warning_low: f64,
    pub critical_low: f64,
}

impl Default for CoolingThresholds {
    fn default() -> Self {
        Self {
            critical_high: 8.0,
            warning_high: 6.0,
            ideal: 4.0,
            warning_low: 2.0,
            critical_low: 0.0,
        }
    }
}

// ==========================================
// 温度监控参数
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub thresholds: CoolingThresholds,
    /// 违规确认防抖窗口 (秒): 同一设备同一等级在窗口内持续异常才确认
    pub debounce_secs: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            thresholds: CoolingThresholds::default(),
            debounce_secs: 300,
        }
    }
}

// ==========================================
// 交奶聚合参数
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggregatorSettings {
    /// 聚合批次作业窗口 (小时), 超龄则开新批次
    pub window_hours: i64,
    /// 乐观锁冲突重试上限
    pub max_retries: u32,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            window_hours: 24,
            max_retries: 3,
        }
    }
}

// ==========================================
// 保质期模型参数
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShelfLifeSettings {
    /// 基准保质时长 (小时)
    pub base_hours: f64,
    /// 脂肪因子权重
    pub fat_weight: f64,
    /// 酸度因子权重
    pub acidity_weight: f64,
    /// 每条超温日志的衰减比例
    pub violation_penalty: f64,
    /// 超温判定线 (摄氏度, 严格大于)
    pub violation_temp_c: f64,
    /// 本地直销的脂肪率门槛 (百分比, 严格大于)
    pub local_sale_fat_pct: f64,
    /// 送加工厂的酸度上限 (严格小于)
    pub plant_acidity_max: f64,
    /// 加工厂搜索半径 (公里)
    pub plant_radius_km: f64,
    /// 距到期不足该小时数转酸奶处理
    pub souring_window_hours: f64,
}

impl Default for ShelfLifeSettings {
    fn default() -> Self {
        Self {
            base_hours: 48.0,
            fat_weight: 0.3,
            acidity_weight: 0.7,
            violation_penalty: 0.1,
            violation_temp_c: 4.0,
            local_sale_fat_pct: 3.5,
            plant_acidity_max: 0.15,
            plant_radius_km: 50.0,
            souring_window_hours: 12.0,
        }
    }
}

// ==========================================
// 集奶调度参数
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// 车辆搜索半径 (公里)
    pub search_radius_km: f64,
    /// 候选车辆数上限
    pub max_candidates: usize,
    /// 派车失败后的顺延时长 (分钟)
    pub retry_delay_mins: i64,
    /// 每次失败抬升的紧急度
    pub retry_urgency_bump: f64,
    /// 紧急度: 等待时长权重
    pub hours_weight: f64,
    /// 紧急度: 低脂易腐权重
    pub fat_weight: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            search_radius_km: 50.0,
            max_candidates: 5,
            retry_delay_mins: 30,
            retry_urgency_bump: 0.5,
            hours_weight: 0.6,
            fat_weight: 0.4,
        }
    }
}

// ==========================================
// 路线规划参数
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteSettings {
    /// 装载折算单位 (升): 每满该升数计一个装载单元
    pub loading_unit_l: f64,
    /// 每个装载单元的装载时长 (分钟)
    pub loading_mins_per_unit: i64,
    /// 兜底直线测距时的平均车速 (公里/小时)
    pub fallback_speed_kmh: f64,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            loading_unit_l: 20.0,
            loading_mins_per_unit: 2,
            fallback_speed_kmh: 40.0,
        }
    }
}

// ==========================================
// Settings - 全量参数快照
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub aggregator: AggregatorSettings,
    pub shelf_life: ShelfLifeSettings,
    pub optimizer: OptimizerSettings,
    pub route: RouteSettings,
}
