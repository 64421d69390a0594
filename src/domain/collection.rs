// ==========================================
// 牛奶冷链物流系统 - 采集任务实体
// ==========================================
// 职责: 采集任务(取奶行程) / 站点 / 路线 / 冷链记录
// 不变量: 站点总量不得超过所分配车辆的额定容量 (分配时检查);
//         状态单调递增, 取消是唯一例外
// ==========================================

use crate::domain::batch::QualityMetrics;
use crate::domain::geo::GeoPoint;
use crate::domain::types::{CollectionStatus, TemperatureStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// 站点与路线
// ==========================================

/// 批次站点 (行程中的一个取奶点)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStop {
    pub batch_id: String,
    pub farmer_id: String,
    pub quantity_l: f64,
    /// 采集时的质量快照
    pub quality: QualityMetrics,
    pub location: GeoPoint,
    pub planned_time: Option<DateTime<Utc>>,
    pub actual_time: Option<DateTime<Utc>>,
}

/// 路线航点 (有序, 含本地计算的计划时刻)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteWaypoint {
    pub location: GeoPoint,
    /// 对应奶农 (中心终点站为 None)
    pub farmer_id: Option<String>,
    pub quantity_l: f64,
    /// 是否中心终点站
    pub is_center: bool,
    pub planned_time: DateTime<Utc>,
    /// 上一站到本站的行驶秒数
    pub leg_duration_secs: i64,
    /// 装奶耗时秒数 (ceil(升/20) × 2 分钟)
    pub loading_secs: i64,
}

/// 计算完成的路线
///
/// polyline 为外部导航服务返回的编码路径, 对本系统不透明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub waypoints: Vec<RouteWaypoint>,
    pub polyline: String,
    pub distance_m: f64,
    pub duration_secs: i64,
}

// ==========================================
// 冷链记录
// ==========================================

/// 温度日志条目
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemperatureLog {
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

/// 超温违规事件 (告警触发后追加)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    /// 持续时长 (去抖窗口, 秒)
    pub duration_secs: i64,
    pub status: TemperatureStatus,
}

/// 冷链记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingRecord {
    pub initial_temperature: Option<f64>,
    pub final_temperature: Option<f64>,
    pub temperature_logs: Vec<TemperatureLog>,
    pub violations: Vec<ViolationEvent>,
}

// ==========================================
// Collection - 采集任务
// ==========================================

/// 采集任务 (计划中或执行中的一次取奶行程)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub collection_id: String,
    pub center_id: String,
    pub status: CollectionStatus,
    pub planned_date: DateTime<Utc>,
    pub actual_date: Option<DateTime<Utc>>,
    pub vehicle_id: Option<String>,
    /// 持久化紧急度评分 (每次调度失败 +0.5, 单调递增保证不饿死)
    pub urgency_score: f64,
    pub stops: Vec<BatchStop>,
    pub route: Option<PlannedRoute>,
    pub cooling: CoolingRecord,
    pub created_at: DateTime<Utc>,
}

impl Collection {
    /// 行程总需求量 (升)
    pub fn total_quantity_l(&self) -> f64 {
        self.stops.iter().map(|s| s.quantity_l).sum()
    }

    /// 站点平均乳脂率 (百分比; 无站点时为 0)
    pub fn avg_fat_content(&self) -> f64 {
        if self.stops.is_empty() {
            return 0.0;
        }
        self.stops.iter().map(|s| s.quality.fat_content).sum::<f64>() / self.stops.len() as f64
    }
}
