// ==========================================
// 牛奶冷链物流系统 - 冷链温度监控引擎
// ==========================================
// 职责: 读数入库、阈值分级、违规防抖确认、纠正指令下发
// 说明: 防抖不靠回调计时器, 而是显式的到期表 (key → 触发时刻),
//       由调度循环 poll(now) 驱动; 违规起点已持久化, 重启后可按
//       墙钟时间补判 "早该告警" 的条目
// 红线: 同一 (设备, 等级) 键至多一个在途计时器; 正常读数
//       解除该设备名下全部键与全部未结违规
// ==========================================

use crate::config::MonitorSettings;
use crate::domain::collection::{TemperatureLog, ViolationEvent};
use crate::domain::device::{CoolingViolation, TemperatureReading};
use crate::domain::types::{AlertPriority, TemperatureStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{
    BroadcastAlert, DeviceCommandPublisher, NotificationDispatcher, NotificationKind,
};
use crate::repository::{
    CollectionRepository, CoolingViolationRepository, IotDeviceRepository,
    TemperatureReadingRepository,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// 阈值分级, 顺序评估首个命中:
/// > critical_high → critical_high; > warning_high → warning_high;
/// < critical_low → critical_low; < warning_low → warning_low; 其余 normal
///
/// 边界为严格比较: 恰好 8.0°C 不算 critical_high
pub fn classify(temperature: f64, settings: &MonitorSettings) -> TemperatureStatus {
    let t = &settings.thresholds;
    if temperature > t.critical_high {
        TemperatureStatus::CriticalHigh
    } else if temperature > t.warning_high {
        TemperatureStatus::WarningHigh
    } else if temperature < t.critical_low {
        TemperatureStatus::CriticalLow
    } else if temperature < t.warning_low {
        TemperatureStatus::WarningLow
    } else {
        TemperatureStatus::Normal
    }
}

/// 在途防抖计时器 (到期表条目)
#[derive(Debug, Clone)]
struct PendingViolation {
    violation_id: String,
    device_id: String,
    collection_id: Option<String>,
    temperature: f64,
    status: TemperatureStatus,
    started_at: DateTime<Utc>,
    fire_at: DateTime<Utc>,
}

// ==========================================
// TemperatureMonitor - 温度监控引擎
// ==========================================
pub struct TemperatureMonitor {
    settings: MonitorSettings,
    device_repo: Arc<IotDeviceRepository>,
    reading_repo: Arc<TemperatureReadingRepository>,
    violation_repo: Arc<CoolingViolationRepository>,
    collection_repo: Arc<CollectionRepository>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    commander: Arc<dyn DeviceCommandPublisher>,
    /// key = "{device_id}-{status}", 至多一个在途计时器
    timers: HashMap<String, PendingViolation>,
}

impl TemperatureMonitor {
    pub fn new(
        settings: MonitorSettings,
        device_repo: Arc<IotDeviceRepository>,
        reading_repo: Arc<TemperatureReadingRepository>,
        violation_repo: Arc<CoolingViolationRepository>,
        collection_repo: Arc<CollectionRepository>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        commander: Arc<dyn DeviceCommandPublisher>,
    ) -> Self {
        Self {
            settings,
            device_repo,
            reading_repo,
            violation_repo,
            collection_repo,
            dispatcher,
            commander,
            timers: HashMap::new(),
        }
    }

    fn timer_key(device_id: &str, status: TemperatureStatus) -> String {
        format!("{}-{}", device_id, status)
    }

    /// 重启恢复: 把存储中未解除的违规重新装入到期表
    ///
    /// fire_at 仍按违规起点 + 防抖窗口计算, 已越过窗口的条目
    /// 会在下一次 poll 立即触发
    ///
    /// # 返回
    /// - 重新挂起的计时器数
    pub fn initialize(&mut self) -> EngineResult<usize> {
        let open = self
            .violation_repo
            .find_open()
            .map_err(EngineError::from_repo)?;

        let mut armed = 0usize;
        for violation in open {
            let key = Self::timer_key(&violation.device_id, violation.status);
            if self.timers.contains_key(&key) {
                continue;
            }
            let fire_at =
                violation.start_time + chrono::Duration::seconds(self.settings.debounce_secs);
            self.timers.insert(
                key,
                PendingViolation {
                    violation_id: violation.violation_id,
                    device_id: violation.device_id,
                    collection_id: violation.collection_id,
                    temperature: violation.temperature,
                    status: violation.status,
                    started_at: violation.start_time,
                    fire_at,
                },
            );
            armed += 1;
        }
        if armed > 0 {
            tracing::info!(armed, "未解除违规已重新挂起");
        }
        Ok(armed)
    }

    /// 在途计时器数 (测试与诊断用)
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// 处理一条传感器读数
    ///
    /// 未知设备按 NotFound 上报, 不入库任何数据
    pub fn process_reading(
        &mut self,
        device_id: &str,
        temperature: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<TemperatureStatus> {
        let device = self
            .device_repo
            .find_by_id(device_id)
            .map_err(EngineError::from_repo)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "IotDevice".to_string(),
                id: device_id.to_string(),
            })?;

        self.reading_repo
            .insert(&TemperatureReading {
                device_id: device_id.to_string(),
                temperature,
                recorded_at: now,
            })
            .map_err(EngineError::from_repo)?;

        // 读数同步追加到所属行程的冷链日志
        if let Some(collection_id) = &device.collection_id {
            self.collection_repo
                .append_temperature_log(
                    collection_id,
                    TemperatureLog {
                        temperature,
                        timestamp: now,
                    },
                )
                .map_err(EngineError::from_repo)?;
        }

        let status = classify(temperature, &self.settings);
        if status == TemperatureStatus::Normal {
            self.clear_device(device_id, now)?;
            return Ok(status);
        }

        let key = Self::timer_key(device_id, status);
        if self.timers.contains_key(&key) {
            // 同键重复异常读数为空操作: 不重置也不重复建表项
            return Ok(status);
        }

        let violation = CoolingViolation {
            violation_id: format!("VIO-{}", Uuid::new_v4()),
            device_id: device_id.to_string(),
            collection_id: device.collection_id.clone(),
            temperature,
            status,
            start_time: now,
            end_time: None,
        };
        // 初步违规行先持久化 (开放式, 无 end_time), 重启后可恢复
        self.violation_repo
            .insert(&violation)
            .map_err(EngineError::from_repo)?;

        self.timers.insert(
            key,
            PendingViolation {
                violation_id: violation.violation_id,
                device_id: device_id.to_string(),
                collection_id: device.collection_id,
                temperature,
                status,
                started_at: now,
                fire_at: now + chrono::Duration::seconds(self.settings.debounce_secs),
            },
        );
        tracing::debug!(device_id, temperature, status = %status, "异常读数, 防抖计时开始");
        Ok(status)
    }

    /// 正常读数: 撤销该设备名下全部在途计时器, 并解除未结违规
    fn clear_device(&mut self, device_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let prefix = format!("{}-", device_id);
        let before = self.timers.len();
        self.timers.retain(|key, _| !key.starts_with(&prefix));
        let cancelled = before - self.timers.len();

        let closed = self
            .violation_repo
            .close_open_for_device(device_id, now)
            .map_err(EngineError::from_repo)?;

        if cancelled > 0 || closed > 0 {
            tracing::info!(device_id, cancelled, closed, "温度回正, 违规解除");
        }
        Ok(())
    }

    /// 调度循环驱动: 触发全部已到期的计时器
    ///
    /// 每条到期违规: 广播告警 (critical_* 高优先级, warning_* 中优先级),
    /// 设备支持自动调温时下发纠正指令, 违规事件追加到所属行程冷链记录,
    /// 计时器一次性移除
    ///
    /// # 返回
    /// - 本轮触发的违规数
    pub fn poll(&mut self, now: DateTime<Utc>) -> EngineResult<usize> {
        let due_keys: Vec<String> = self
            .timers
            .iter()
            .filter(|(_, pending)| pending.fire_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut fired = 0usize;
        for key in due_keys {
            let Some(pending) = self.timers.remove(&key) else {
                continue;
            };
            self.fire(&pending, now)?;
            fired += 1;
        }
        Ok(fired)
    }

    fn fire(&self, pending: &PendingViolation, now: DateTime<Utc>) -> EngineResult<()> {
        let priority = if pending.status.is_critical() {
            AlertPriority::High
        } else {
            AlertPriority::Medium
        };

        let alert = BroadcastAlert {
            kind: NotificationKind::TemperatureAlert,
            priority,
            message: format!(
                "设备 {} 持续 {} ({:.1}°C)",
                pending.device_id,
                pending.status.label(),
                pending.temperature
            ),
            payload: serde_json::json!({
                "device_id": pending.device_id,
                "violation_id": pending.violation_id,
                "status": pending.status.to_db_str(),
                "temperature": pending.temperature,
                "started_at": pending.started_at.to_rfc3339(),
            }),
        };
        if let Err(e) = self.dispatcher.broadcast(alert) {
            tracing::warn!(device_id = %pending.device_id, error = %e, "温度告警广播失败");
        }

        // 支持自动调温的设备下发纠正指令, 目标为理想温度
        let device = self
            .device_repo
            .get_by_id(&pending.device_id)
            .map_err(EngineError::from_repo)?;
        if device.supports_auto_adjust() {
            let topic = format!("devices/{}/control", pending.device_id);
            let command = serde_json::json!({
                "command": "set_temperature",
                "value": self.settings.thresholds.ideal,
            });
            if let Err(e) = self.commander.publish(&topic, command) {
                tracing::warn!(device_id = %pending.device_id, error = %e, "纠正指令下发失败");
            }
        }

        if let Some(collection_id) = &pending.collection_id {
            self.collection_repo
                .append_violation(
                    collection_id,
                    ViolationEvent {
                        timestamp: now,
                        temperature: pending.temperature,
                        duration_secs: (now - pending.started_at).num_seconds(),
                        status: pending.status,
                    },
                )
                .map_err(EngineError::from_repo)?;
        }

        tracing::warn!(
            device_id = %pending.device_id,
            violation_id = %pending.violation_id,
            status = %pending.status,
            "防抖窗口到期, 违规确认并告警"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorSettings;

    #[test]
    fn test_classification_first_match_wins() {
        let s = MonitorSettings::default();
        assert_eq!(classify(9.0, &s), TemperatureStatus::CriticalHigh);
        assert_eq!(classify(7.0, &s), TemperatureStatus::WarningHigh);
        assert_eq!(classify(4.0, &s), TemperatureStatus::Normal);
        assert_eq!(classify(1.5, &s), TemperatureStatus::WarningLow);
        assert_eq!(classify(-0.5, &s), TemperatureStatus::CriticalLow);
    }

    #[test]
    fn test_classification_strict_boundaries() {
        let s = MonitorSettings::default();
        assert_eq!(classify(8.0, &s), TemperatureStatus::WarningHigh, "恰好 8.0 不算临界");
        assert_eq!(classify(8.01, &s), TemperatureStatus::CriticalHigh);
        assert_eq!(classify(2.0, &s), TemperatureStatus::Normal, "恰好 2.0 不算偏低");
        assert_eq!(classify(0.0, &s), TemperatureStatus::WarningLow, "恰好 0.0 不算临界低");
    }
}
