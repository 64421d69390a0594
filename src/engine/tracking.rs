// ==========================================
// 牛奶冷链物流系统 - 批次溯源引擎
// ==========================================
// 职责: 批次生命周期的入口操作 (收奶/发运/到厂/加工/直销/判废),
//       每次操作先查状态机, 再走仓储的事务化落库
// 红线: 状态迁移与保管人变更原子持久化; 校验失败不落任何数据
// ==========================================

use crate::domain::batch::{CustodyHolder, MilkBatch, QualityMetrics};
use crate::domain::plant::ExpectedDelivery;
use crate::domain::types::{BatchEvent, BatchStatus, PaymentStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{BroadcastAlert, NotificationDispatcher, NotificationKind};
use crate::engine::state_machine;
use crate::repository::{FarmerRepository, MilkBatchRepository, MilkTrackingRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

// ==========================================
// MilkTrackingEngine - 批次溯源引擎
// ==========================================
pub struct MilkTrackingEngine {
    batch_repo: Arc<MilkBatchRepository>,
    farmer_repo: Arc<FarmerRepository>,
    tracking_repo: Arc<MilkTrackingRepository>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl MilkTrackingEngine {
    pub fn new(
        batch_repo: Arc<MilkBatchRepository>,
        farmer_repo: Arc<FarmerRepository>,
        tracking_repo: Arc<MilkTrackingRepository>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            batch_repo,
            farmer_repo,
            tracking_repo,
            dispatcher,
        }
    }

    /// 收奶建档: 新批次以 collected 状态落库, 保管人为奶农本人
    ///
    /// 批次 + 中心库存增量在仓储层同一事务提交;
    /// 交付中心 (at_center) 走 record_center_delivery
    pub fn record_collection(
        &self,
        farmer_id: &str,
        center_id: &str,
        quantity_l: f64,
        quality: QualityMetrics,
        now: DateTime<Utc>,
    ) -> EngineResult<MilkBatch> {
        if quantity_l <= 0.0 {
            return Err(EngineError::Validation(format!(
                "收奶数量必须为正: {}",
                quantity_l
            )));
        }
        quality.validate().map_err(EngineError::Validation)?;
        // 奶农必须在册
        self.farmer_repo
            .get_by_id(farmer_id)
            .map_err(EngineError::from_repo)?;

        let batch = MilkBatch {
            batch_id: format!("MB-{}", Uuid::new_v4()),
            farmer_id: farmer_id.to_string(),
            center_id: center_id.to_string(),
            quantity_l,
            quality,
            current_status: BatchStatus::Collected,
            handler: CustodyHolder::farmer(farmer_id),
            payment_status: PaymentStatus::Pending,
            expiry_time: None,
            collected_at: now,
        };

        self.tracking_repo
            .record_collection(&batch)
            .map_err(EngineError::from_repo)?;

        tracing::info!(
            batch_id = %batch.batch_id,
            farmer_id,
            center_id,
            quantity_l,
            "收奶建档完成"
        );
        Ok(batch)
    }

    /// 交付中心: collected → at_center, 保管人移交中心员工
    pub fn record_center_delivery(
        &self,
        batch_id: &str,
        staff_user_id: &str,
    ) -> EngineResult<MilkBatch> {
        let batch = self
            .batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)?;
        let next = state_machine::next_status(batch.current_status, BatchEvent::DeliverToCenter)?;

        let staff = CustodyHolder::center_staff(staff_user_id);
        self.batch_repo
            .transition_status(batch_id, batch.current_status, next, &staff)
            .map_err(|e| match e {
                crate::repository::RepositoryError::DatabaseTransactionError(msg) => {
                    EngineError::Conflict(msg)
                }
                other => EngineError::from_repo(other),
            })?;

        tracing::info!(batch_id, staff_user_id, "批次交付收奶中心");
        self.batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)
    }

    /// 装车发运: at_center → in_transit, 保管人移交司机
    ///
    /// 指定 plant_id 时同步登记加工厂的预期到货
    pub fn record_transfer_to_supplier(
        &self,
        batch_id: &str,
        vehicle_id: &str,
        driver_id: &str,
        destination_plant: Option<(&str, DateTime<Utc>)>,
    ) -> EngineResult<MilkBatch> {
        let batch = self
            .batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)?;
        state_machine::next_status(batch.current_status, BatchEvent::Dispatch)?;

        let driver = CustodyHolder::driver(driver_id);
        self.tracking_repo
            .record_transfer_to_supplier(&batch, vehicle_id, &driver)
            .map_err(EngineError::from_repo)?;

        if let Some((plant_id, expected_time)) = destination_plant {
            self.tracking_repo
                .register_expected_delivery(
                    plant_id,
                    &ExpectedDelivery {
                        batch_id: batch.batch_id.clone(),
                        expected_time,
                        quantity_l: batch.quantity_l,
                    },
                )
                .map_err(EngineError::from_repo)?;
        }

        tracing::info!(batch_id, vehicle_id, driver_id, "批次已装车发运");
        self.batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)
    }

    /// 到厂交付: in_transit → at_plant, 保管人移交厂方
    pub fn record_plant_delivery(
        &self,
        batch_id: &str,
        vehicle_id: &str,
        plant_id: &str,
        plant_user_id: &str,
    ) -> EngineResult<MilkBatch> {
        let batch = self
            .batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)?;
        state_machine::next_status(batch.current_status, BatchEvent::DeliverToPlant)?;

        let staff = CustodyHolder::plant_staff(plant_user_id);
        self.tracking_repo
            .record_plant_delivery(&batch, vehicle_id, plant_id, &staff)
            .map_err(EngineError::from_repo)?;

        tracing::info!(batch_id, plant_id, "批次已到厂交付");
        self.batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)
    }

    /// 单事件迁移 (加工 / 直销): 查状态机后带守卫持久化
    pub fn apply_event(
        &self,
        batch_id: &str,
        event: BatchEvent,
        handler: CustodyHolder,
    ) -> EngineResult<BatchStatus> {
        let batch = self
            .batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)?;
        let next = state_machine::next_status(batch.current_status, event)?;

        self.batch_repo
            .transition_status(batch_id, batch.current_status, next, &handler)
            .map_err(|e| match e {
                crate::repository::RepositoryError::DatabaseTransactionError(msg) => {
                    EngineError::Conflict(msg)
                }
                other => EngineError::from_repo(other),
            })?;

        tracing::info!(batch_id, event = %event, next_status = %next, "批次状态迁移完成");
        Ok(next)
    }

    /// 判废: 任意非终态 → spoiled, 并广播告警
    pub fn spoil(&self, batch_id: &str, reason: &str) -> EngineResult<()> {
        let batch = self
            .batch_repo
            .get_by_id(batch_id)
            .map_err(EngineError::from_repo)?;
        let next = state_machine::next_status(batch.current_status, BatchEvent::Spoil)?;

        self.batch_repo
            .transition_status(batch_id, batch.current_status, next, &batch.handler)
            .map_err(EngineError::from_repo)?;

        let alert = BroadcastAlert {
            kind: NotificationKind::BatchSpoiled,
            priority: crate::domain::types::AlertPriority::High,
            message: format!("批次 {} 已判废: {}", batch_id, reason),
            payload: serde_json::json!({
                "batch_id": batch_id,
                "center_id": batch.center_id,
                "quantity_l": batch.quantity_l,
                "reason": reason,
            }),
        };
        if let Err(e) = self.dispatcher.broadcast(alert) {
            // 通知失败不回滚判废
            tracing::warn!(batch_id, error = %e, "判废广播发送失败");
        }

        tracing::warn!(batch_id, reason, "批次已判废");
        Ok(())
    }
}
