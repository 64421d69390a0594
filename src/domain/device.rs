// ==========================================
// 牛奶冷链物流系统 - 冷链设备实体
// ==========================================
// 职责: 物联网温控设备 / 温度读数 / 超温违规记录
// ==========================================

use crate::domain::types::TemperatureStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 可自动调温的控制能力标识
pub const CAP_ADJUST_TEMPERATURE: &str = "adjust_temperature";

/// 冷链温控设备
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IotDevice {
    pub device_id: String,
    pub name: String,
    /// 所属采集任务 (冷藏箱随车时绑定)
    pub collection_id: Option<String>,
    /// 控制能力列表
    pub control_capabilities: Vec<String>,
}

impl IotDevice {
    /// 是否支持自动调温
    pub fn supports_auto_adjust(&self) -> bool {
        self.control_capabilities
            .iter()
            .any(|c| c == CAP_ADJUST_TEMPERATURE)
    }
}

/// 温度读数 (每次上报落一行)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub device_id: String,
    pub temperature: f64,
    pub recorded_at: DateTime<Utc>,
}

/// 超温违规记录
///
/// 进入 Violating 即落库 (end_time 开放);
/// 设备恢复正常读数时统一补上 end_time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingViolation {
    pub violation_id: String,
    pub device_id: String,
    pub collection_id: Option<String>,
    pub temperature: f64,
    pub status: TemperatureStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_auto_adjust() {
        let mut d = IotDevice {
            device_id: "DEV-1".into(),
            name: "Cooler 1".into(),
            collection_id: None,
            control_capabilities: vec!["report_temperature".into()],
        };
        assert!(!d.supports_auto_adjust());
        d.control_capabilities.push(CAP_ADJUST_TEMPERATURE.into());
        assert!(d.supports_auto_adjust());
    }
}
