// ==========================================
// 牛奶冷链物流系统 - 加工厂实体
// ==========================================

use crate::domain::geo::GeoPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 预期到货 (送厂交付时追加)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedDelivery {
    pub batch_id: String,
    pub expected_time: DateTime<Utc>,
    pub quantity_l: f64,
}

/// 加工厂
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingPlant {
    pub plant_id: String,
    pub name: String,
    pub location: GeoPoint,
    /// 日处理能力 (升)
    pub processing_capacity_l: f64,
    pub current_stock_l: f64,
    pub expected_deliveries: Vec<ExpectedDelivery>,
}

impl ProcessingPlant {
    /// 富余处理能力 (升) = 处理能力 − 当前库存 − 在途预期到货, 下限为零
    pub fn spare_capacity_l(&self) -> f64 {
        let inbound: f64 = self.expected_deliveries.iter().map(|e| e.quantity_l).sum();
        (self.processing_capacity_l - self.current_stock_l - inbound).max(0.0)
    }
}
