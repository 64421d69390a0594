// ==========================================
// 牛奶冷链物流系统 - 引擎层事件发布
// ==========================================
// 职责: 定义通知与设备指令的发布 trait, 实现依赖倒置
// 说明: Engine 层定义 trait, 外层 (短信网关/推送服务/MQTT 客户端) 实现适配器
// ==========================================

use crate::domain::types::AlertPriority;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 通知类型
// ==========================================

/// 通知送达渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Sms,  // 短信 (奶农)
    Push, // 推送 (奶农)
    App,  // 应用内 (司机/管理端)
}

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CollectionScheduled, // 集奶已排期 (奶农)
    NewAssignment,       // 新派单 (司机)
    TemperatureAlert,    // 冷链温度告警 (广播)
    BatchSpoiled,        // 批次判废 (广播)
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::CollectionScheduled => "collection_scheduled",
            NotificationKind::NewAssignment => "new_assignment",
            NotificationKind::TemperatureAlert => "temperature_alert",
            NotificationKind::BatchSpoiled => "batch_spoiled",
        }
    }
}

/// 定向通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// 接收人 ID
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub channels: Vec<NotificationChannel>,
    /// 业务负载 (JSON)
    pub payload: serde_json::Value,
}

/// 广播告警
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastAlert {
    pub kind: NotificationKind,
    pub priority: AlertPriority,
    pub message: String,
    pub payload: serde_json::Value,
}

// ==========================================
// 发布 Trait
// ==========================================

/// 通知分发者 Trait
///
/// Engine 层定义, 外层实现 (短信网关 / 推送服务 / WebSocket 广播)
pub trait NotificationDispatcher: Send + Sync {
    /// 定向发送
    fn send(&self, notification: Notification) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// 全员广播
    fn broadcast(&self, alert: BroadcastAlert) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 设备指令发布者 Trait (MQTT 下行)
pub trait DeviceCommandPublisher: Send + Sync {
    /// 向指定主题发布指令
    ///
    /// # 参数
    /// - topic: 形如 devices/{device_id}/control
    /// - payload: 指令 JSON
    fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作分发者
///
/// 用于不需要通知的场景 (如单元测试)
#[derive(Debug, Clone, Default)]
pub struct NoOpDispatcher;

impl NotificationDispatcher for NoOpDispatcher {
    fn send(&self, notification: Notification) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpDispatcher: 跳过定向通知 - recipient={}, kind={}",
            notification.recipient_id,
            notification.kind.as_str()
        );
        Ok(())
    }

    fn broadcast(&self, alert: BroadcastAlert) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpDispatcher: 跳过广播 - kind={}, priority={}",
            alert.kind.as_str(),
            alert.priority
        );
        Ok(())
    }
}

impl DeviceCommandPublisher for NoOpDispatcher {
    fn publish(
        &self,
        topic: &str,
        _payload: serde_json::Value,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!("NoOpDispatcher: 跳过设备指令 - topic={}", topic);
        Ok(())
    }
}

/// 记录型分发者 (测试用): 把所有发布记录在内存里供断言
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<Notification>>,
    pub broadcasts: Mutex<Vec<BroadcastAlert>>,
    pub commands: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn send(&self, notification: Notification) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.sent
            .lock()
            .map_err(|e| -> Box<dyn Error + Send + Sync> { e.to_string().into() })?
            .push(notification);
        Ok(())
    }

    fn broadcast(&self, alert: BroadcastAlert) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.broadcasts
            .lock()
            .map_err(|e| -> Box<dyn Error + Send + Sync> { e.to_string().into() })?
            .push(alert);
        Ok(())
    }
}

impl DeviceCommandPublisher for RecordingDispatcher {
    fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.commands
            .lock()
            .map_err(|e| -> Box<dyn Error + Send + Sync> { e.to_string().into() })?
            .push((topic.to_string(), payload));
        Ok(())
    }
}
