// ==========================================
// 牛奶冷链物流系统 - 运力与网点实体
// ==========================================
// 职责: 供应商车辆 / 收奶中心 / 奶农
// 不变量: 车辆已承诺量 ≤ 额定容量 (预留走条件更新, 见仓储层)
// ==========================================

use crate::domain::geo::GeoPoint;
use crate::domain::types::{VehicleStatus, VehicleType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Vehicle - 供应商车辆
// ==========================================

/// 供应商车辆 (带容量台账的运输资产)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub name: String,
    pub plate_number: String,
    pub vehicle_type: VehicleType,
    /// 额定容量 (升)
    pub capacity_l: f64,
    /// 已承诺量 (升) - 共享存储中的权威预留值
    pub committed_l: f64,
    pub driver_name: String,
    pub driver_contact: String,
    pub location: GeoPoint,
    pub located_at: Option<DateTime<Utc>>,
    pub status: VehicleStatus,
    /// 当前在途批次
    pub current_batches: Vec<String>,
}

impl Vehicle {
    /// 剩余容量 = 额定容量 - 已承诺量
    pub fn remaining_capacity_l(&self) -> f64 {
        self.capacity_l - self.committed_l
    }
}

// ==========================================
// CollectionCenter - 收奶中心
// ==========================================

/// 收奶中心
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCenter {
    pub center_id: String,
    pub name: String,
    pub village: String,
    pub location: GeoPoint,
    pub storage_capacity_l: f64,
    /// 当前库存 (升)
    pub current_stock_l: f64,
    /// 所在村当日鲜奶需求 (升) - 去向判定规则 1 的输入
    pub village_demand_l: f64,
    pub status: String,
}

// ==========================================
// Farmer - 奶农
// ==========================================

/// 奶农
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Farmer {
    pub farmer_id: String,
    pub name: String,
    pub phone: String,
    pub center_id: String,
    pub location: GeoPoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_capacity() {
        let v = Vehicle {
            vehicle_id: "V1".into(),
            name: "Truck A".into(),
            plate_number: "KDA 123A".into(),
            vehicle_type: VehicleType::Truck,
            capacity_l: 1000.0,
            committed_l: 600.0,
            driver_name: "D".into(),
            driver_contact: "0700".into(),
            location: GeoPoint::new(0.0, 36.0),
            located_at: None,
            status: VehicleStatus::Available,
            current_batches: vec![],
        };
        assert!((v.remaining_capacity_l() - 400.0).abs() < 1e-9);
    }
}
