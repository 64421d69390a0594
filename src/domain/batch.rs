// ==========================================
// 牛奶冷链物流系统 - 批次实体
// ==========================================
// 职责: 单农户批次 / 中心聚合批次 / 交奶记录
// 不变量: 批次数量只能通过聚合器合并变化; 状态只能经状态机变化;
//         任一时刻恰有一个保管人
// ==========================================

use crate::domain::types::{BatchStatus, HandlerKind, HandlerModel, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// 质量指标 (Quality Metrics)
// ==========================================

/// 质量指标
///
/// fat_content 统一按百分比存储 ([0,100], 4.0 表示 4%);
/// 保质期公式中使用时除以 100 折算成 [0,1] 分数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// 乳脂率 (百分比, [0,100])
    pub fat_content: f64,
    /// 酸度 ([0,1])
    pub acidity: f64,
    /// 采集时温度 (°C)
    pub temperature_at_collection: f64,
    /// 乳汁比重计读数
    pub lactometer_reading: f64,
    /// 掺假检测 (任一阳性污染整个聚合批次)
    pub adulteration_test: bool,
}

impl QualityMetrics {
    /// 零值指标 (新聚合批次的初始值)
    pub fn zeroed() -> Self {
        Self {
            fat_content: 0.0,
            acidity: 0.0,
            temperature_at_collection: 0.0,
            lactometer_reading: 0.0,
            adulteration_test: false,
        }
    }

    /// 字段有效性校验 (入库前拒绝畸形数据)
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.fat_content) {
            return Err(format!("乳脂率超出 [0,100]: {}", self.fat_content));
        }
        if !(0.0..=1.0).contains(&self.acidity) {
            return Err(format!("酸度超出 [0,1]: {}", self.acidity));
        }
        if !self.lactometer_reading.is_finite() || !self.temperature_at_collection.is_finite() {
            return Err("温度/比重计读数必须为有限数".to_string());
        }
        Ok(())
    }
}

// ==========================================
// 保管人 (Custody Holder)
// ==========================================

/// 当前保管人 {type, userId, model}
///
/// 外部层 (UI/USSD) 按字面值分支, 线上形状不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodyHolder {
    #[serde(rename = "type")]
    pub kind: HandlerKind,
    #[serde(rename = "userId")]
    pub actor_id: String,
    pub model: HandlerModel,
}

impl CustodyHolder {
    pub fn farmer(farmer_id: &str) -> Self {
        Self {
            kind: HandlerKind::Farmer,
            actor_id: farmer_id.to_string(),
            model: HandlerModel::Farmer,
        }
    }

    pub fn center_staff(user_id: &str) -> Self {
        Self {
            kind: HandlerKind::CenterStaff,
            actor_id: user_id.to_string(),
            model: HandlerModel::User,
        }
    }

    pub fn driver(supplier_id: &str) -> Self {
        Self {
            kind: HandlerKind::Driver,
            actor_id: supplier_id.to_string(),
            model: HandlerModel::Supplier,
        }
    }

    pub fn plant_staff(user_id: &str) -> Self {
        Self {
            kind: HandlerKind::PlantStaff,
            actor_id: user_id.to_string(),
            model: HandlerModel::User,
        }
    }
}

// ==========================================
// MilkBatch - 单农户批次
// ==========================================

/// 单农户批次 (带溯源链的一笔奶量)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilkBatch {
    pub batch_id: String,
    pub farmer_id: String,
    pub center_id: String,
    /// 数量 (升, > 0)
    pub quantity_l: f64,
    pub quality: QualityMetrics,
    pub current_status: BatchStatus,
    pub handler: CustodyHolder,
    pub payment_status: PaymentStatus,
    /// 到期时刻 (去向判定为 local_sale 时重算)
    pub expiry_time: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
}

// ==========================================
// AggregateBatch - 中心聚合批次
// ==========================================

/// 中心聚合批次 (一个作业窗口内滚动合并的交奶)
///
/// revision 用于乐观锁: 并发交奶对同一聚合批次的读-改-写
/// 必须串行化, 版本不匹配即冲突重试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateBatch {
    pub batch_number: String,
    pub center_id: String,
    pub total_quantity_l: f64,
    /// 总成本 = Σ 数量×单价
    pub total_cost: f64,
    /// 合并质量指标 (数量加权平均; 掺假取逻辑或)
    pub quality: QualityMetrics,
    pub status: BatchStatus,
    /// 作业窗口起始时刻
    pub window_started_at: DateTime<Utc>,
    /// 乐观锁版本号
    pub revision: i64,
}

impl AggregateBatch {
    /// 开启新的聚合批次 (零值总量)
    pub fn open(batch_number: String, center_id: String, now: DateTime<Utc>) -> Self {
        Self {
            batch_number,
            center_id,
            total_quantity_l: 0.0,
            total_cost: 0.0,
            quality: QualityMetrics::zeroed(),
            status: BatchStatus::Collected,
            window_started_at: now,
            revision: 0,
        }
    }

    /// 窗口是否已超龄 (超过则由新聚合批次接替)
    pub fn is_expired(&self, now: DateTime<Utc>, window_hours: i64) -> bool {
        now - self.window_started_at > chrono::Duration::hours(window_hours)
    }
}

// ==========================================
// Delivery - 单笔交奶记录
// ==========================================

/// 单笔交奶记录 (引用所属聚合批次, 与聚合批次更新同事务落库)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_id: String,
    /// 所属聚合批次号
    pub batch_number: String,
    pub farmer_id: String,
    pub center_id: String,
    pub quantity_l: f64,
    pub price_per_liter: f64,
    pub quality: QualityMetrics,
    pub handler: CustodyHolder,
    pub collected_at: DateTime<Utc>,
}
