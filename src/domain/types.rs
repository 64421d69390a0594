// ==========================================
// 牛奶冷链物流系统 - 领域类型定义
// ==========================================
// 红线: 状态枚举的字面值是对外契约 (UI/USSD 层按字符串分支),
//       序列化格式必须保持 snake_case 字面值不变
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// 生命周期: collected → at_center → in_transit → at_plant → processed
// 分支: at_center/in_transit → sold_fresh; 任意非终态 → spoiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Collected, // 已采集(初始)
    AtCenter,  // 在收奶中心
    InTransit, // 运输中
    AtPlant,   // 已到加工厂
    SoldFresh, // 鲜奶本地售出(终态)
    Processed, // 已加工(终态)
    Spoiled,   // 已变质(终态)
}

impl BatchStatus {
    /// 是否终态 (终态不再接受任何事件)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::SoldFresh | BatchStatus::Processed | BatchStatus::Spoiled
        )
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchStatus::Collected => "collected",
            BatchStatus::AtCenter => "at_center",
            BatchStatus::InTransit => "in_transit",
            BatchStatus::AtPlant => "at_plant",
            BatchStatus::SoldFresh => "sold_fresh",
            BatchStatus::Processed => "processed",
            BatchStatus::Spoiled => "spoiled",
        }
    }

    /// 从字符串解析状态
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "collected" => Some(BatchStatus::Collected),
            "at_center" => Some(BatchStatus::AtCenter),
            "in_transit" => Some(BatchStatus::InTransit),
            "at_plant" => Some(BatchStatus::AtPlant),
            "sold_fresh" => Some(BatchStatus::SoldFresh),
            "processed" => Some(BatchStatus::Processed),
            "spoiled" => Some(BatchStatus::Spoiled),
            _ => None,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 批次事件 (Batch Event)
// ==========================================
// 状态机的输入, 由状态机查表决定 (state, event) 是否合法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchEvent {
    DeliverToCenter, // 奶农交付到中心
    Dispatch,        // 装车发运
    DeliverToPlant,  // 送达加工厂
    Process,         // 进入加工
    SellFresh,       // 鲜奶本地售出
    Spoil,           // 变质
}

impl fmt::Display for BatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchEvent::DeliverToCenter => write!(f, "deliver_to_center"),
            BatchEvent::Dispatch => write!(f, "dispatch"),
            BatchEvent::DeliverToPlant => write!(f, "deliver_to_plant"),
            BatchEvent::Process => write!(f, "process"),
            BatchEvent::SellFresh => write!(f, "sell_fresh"),
            BatchEvent::Spoil => write!(f, "spoil"),
        }
    }
}

// ==========================================
// 保管人类型 (Handler Kind)
// ==========================================
// 批次当前的实际责任人类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Farmer,      // 奶农
    CenterStaff, // 中心工作人员
    Driver,      // 运输司机
    PlantStaff,  // 加工厂人员
    Retailer,    // 零售商
}

impl HandlerKind {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            HandlerKind::Farmer => "farmer",
            HandlerKind::CenterStaff => "center_staff",
            HandlerKind::Driver => "driver",
            HandlerKind::PlantStaff => "plant_staff",
            HandlerKind::Retailer => "retailer",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "farmer" => Some(HandlerKind::Farmer),
            "center_staff" => Some(HandlerKind::CenterStaff),
            "driver" => Some(HandlerKind::Driver),
            "plant_staff" => Some(HandlerKind::PlantStaff),
            "retailer" => Some(HandlerKind::Retailer),
            _ => None,
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 保管人所属模型 (Handler Model)
// ==========================================
// 外部层按此字段反查实体集合, 字面值保持首字母大写
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerModel {
    Farmer,   // 奶农集合
    User,     // 员工集合 (中心/加工厂)
    Supplier, // 供应商(车辆)集合
}

impl HandlerModel {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            HandlerModel::Farmer => "Farmer",
            HandlerModel::User => "User",
            HandlerModel::Supplier => "Supplier",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "Farmer" => Some(HandlerModel::Farmer),
            "User" => Some(HandlerModel::User),
            "Supplier" => Some(HandlerModel::Supplier),
            _ => None,
        }
    }
}

impl fmt::Display for HandlerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 支付状态 (Payment Status)
// ==========================================
// 仅透传, 本系统不做支付计算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,       // 待支付
    Paid,          // 已支付
    PartiallyPaid, // 部分支付
}

impl PaymentStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PartiallyPaid => "partially_paid",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "partially_paid" => Some(PaymentStatus::PartiallyPaid),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 车辆状态 (Vehicle Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,   // 可调度
    InTransit,   // 运输中
    Unloading,   // 卸货中
    Maintenance, // 维修中
}

impl VehicleStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::InTransit => "in_transit",
            VehicleStatus::Unloading => "unloading",
            VehicleStatus::Maintenance => "maintenance",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(VehicleStatus::Available),
            "in_transit" => Some(VehicleStatus::InTransit),
            "unloading" => Some(VehicleStatus::Unloading),
            "maintenance" => Some(VehicleStatus::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 车辆类型 (Vehicle Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Truck,      // 卡车
    Pickup,     // 皮卡
    Motorcycle, // 摩托车
}

impl VehicleType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            VehicleType::Truck => "truck",
            VehicleType::Pickup => "pickup",
            VehicleType::Motorcycle => "motorcycle",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "truck" => Some(VehicleType::Truck),
            "pickup" => Some(VehicleType::Pickup),
            "motorcycle" => Some(VehicleType::Motorcycle),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 采集任务状态 (Collection Status)
// ==========================================
// 单调递增: pending → in_progress → completed; 取消是唯一例外
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Pending,    // 待调度
    InProgress, // 执行中(已分配车辆)
    Completed,  // 已完成
    Cancelled,  // 已取消
}

impl CollectionStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CollectionStatus::Pending => "pending",
            CollectionStatus::InProgress => "in_progress",
            CollectionStatus::Completed => "completed",
            CollectionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CollectionStatus::Pending),
            "in_progress" => Some(CollectionStatus::InProgress),
            "completed" => Some(CollectionStatus::Completed),
            "cancelled" => Some(CollectionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 温度分级 (Temperature Status)
// ==========================================
// 分级顺序固定: 先高温后低温, 首次命中即返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureStatus {
    Normal,       // 正常 (2~6°C)
    WarningHigh,  // 偏高警告 (>6°C)
    CriticalHigh, // 高温严重 (>8°C)
    WarningLow,   // 偏低警告 (<2°C)
    CriticalLow,  // 低温严重 (<0°C)
}

impl TemperatureStatus {
    /// 是否严重级别 (critical_*)
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            TemperatureStatus::CriticalHigh | TemperatureStatus::CriticalLow
        )
    }

    /// 是否异常 (非 normal)
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, TemperatureStatus::Normal)
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            TemperatureStatus::Normal => "normal",
            TemperatureStatus::WarningHigh => "warning_high",
            TemperatureStatus::CriticalHigh => "critical_high",
            TemperatureStatus::WarningLow => "warning_low",
            TemperatureStatus::CriticalLow => "critical_low",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(TemperatureStatus::Normal),
            "warning_high" => Some(TemperatureStatus::WarningHigh),
            "critical_high" => Some(TemperatureStatus::CriticalHigh),
            "warning_low" => Some(TemperatureStatus::WarningLow),
            "critical_low" => Some(TemperatureStatus::CriticalLow),
            _ => None,
        }
    }

    /// 告警标题用的人读文本 (下划线转空格)
    pub fn label(&self) -> String {
        self.to_db_str().replace('_', " ")
    }
}

impl fmt::Display for TemperatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 告警优先级 (Alert Priority)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    High,   // critical_* 违规
    Medium, // warning_* 违规
    Low,    // 常规通知
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertPriority::High => write!(f, "high"),
            AlertPriority::Medium => write!(f, "medium"),
            AlertPriority::Low => write!(f, "low"),
        }
    }
}

// ==========================================
// 去向建议 (Destination)
// ==========================================
// 严格优先级: local_sale(1) > 加工厂(2) > soured_milk(3) > cooled_storage(4)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "destination", content = "plant_id", rename_all = "snake_case")]
pub enum Destination {
    LocalSale,               // 本地鲜奶销售
    ProcessingPlant(String), // 指定加工厂
    SouredMilk,              // 转酸奶处理
    CooledStorage,           // 冷藏暂存
}

impl Destination {
    /// 规则优先级 (数字越小越优先)
    pub fn priority(&self) -> u8 {
        match self {
            Destination::LocalSale => 1,
            Destination::ProcessingPlant(_) => 2,
            Destination::SouredMilk => 3,
            Destination::CooledStorage => 4,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::LocalSale => write!(f, "local_sale"),
            Destination::ProcessingPlant(id) => write!(f, "{}", id),
            Destination::SouredMilk => write!(f, "soured_milk"),
            Destination::CooledStorage => write!(f, "cooled_storage"),
        }
    }
}

// ==========================================
// 单元测试
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_wire_values() {
        // 字面值是对外契约, 不允许变化
        assert_eq!(BatchStatus::AtCenter.to_db_str(), "at_center");
        assert_eq!(BatchStatus::SoldFresh.to_db_str(), "sold_fresh");
        assert_eq!(
            serde_json::to_string(&BatchStatus::InTransit).unwrap(),
            "\"in_transit\""
        );
        assert_eq!(BatchStatus::from_db_str("at_plant"), Some(BatchStatus::AtPlant));
        assert_eq!(BatchStatus::from_db_str("unknown"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(BatchStatus::SoldFresh.is_terminal());
        assert!(BatchStatus::Processed.is_terminal());
        assert!(BatchStatus::Spoiled.is_terminal());
        assert!(!BatchStatus::Collected.is_terminal());
        assert!(!BatchStatus::AtPlant.is_terminal());
    }

    #[test]
    fn test_handler_model_casing() {
        // 外部层按首字母大写的模型名分支
        assert_eq!(HandlerModel::Supplier.to_db_str(), "Supplier");
        assert_eq!(HandlerModel::from_db_str("User"), Some(HandlerModel::User));
        assert_eq!(HandlerModel::from_db_str("user"), None);
    }

    #[test]
    fn test_temperature_status_label() {
        assert_eq!(TemperatureStatus::CriticalHigh.label(), "critical high");
        assert!(TemperatureStatus::CriticalLow.is_critical());
        assert!(!TemperatureStatus::WarningHigh.is_critical());
        assert!(TemperatureStatus::WarningLow.is_abnormal());
        assert!(!TemperatureStatus::Normal.is_abnormal());
    }

    #[test]
    fn test_destination_priority_order() {
        assert!(
            Destination::LocalSale.priority()
                < Destination::ProcessingPlant("P1".into()).priority()
        );
        assert!(Destination::SouredMilk.priority() < Destination::CooledStorage.priority());
        assert_eq!(Destination::CooledStorage.to_string(), "cooled_storage");
    }
}
