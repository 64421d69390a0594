// ==========================================
// 牛奶冷链物流系统 - 交奶聚合引擎
// ==========================================
// 职责: 把单笔交奶并入中心当前聚合批次, 维护累计量与
//       数量加权平均质量指标; 窗口超龄则开新批次
// 红线: 聚合读-改-写走乐观锁, 冲突有界重试;
//       零量交奶在任何持久化之前拒绝 (权重分母不可为零)
// ==========================================

use crate::config::AggregatorSettings;
use crate::domain::batch::{AggregateBatch, CustodyHolder, Delivery, QualityMetrics};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{AggregateBatchRepository, RepositoryError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// 把新交奶并入既有指标: 数值列按数量加权平均, 掺假取逻辑或
fn merge_metrics(
    existing: &QualityMetrics,
    existing_qty: f64,
    incoming: &QualityMetrics,
    incoming_qty: f64,
) -> QualityMetrics {
    let total = existing_qty + incoming_qty;
    let avg = |old: f64, new: f64| (old * existing_qty + new * incoming_qty) / total;
    QualityMetrics {
        fat_content: avg(existing.fat_content, incoming.fat_content),
        acidity: avg(existing.acidity, incoming.acidity),
        temperature_at_collection: avg(
            existing.temperature_at_collection,
            incoming.temperature_at_collection,
        ),
        lactometer_reading: avg(existing.lactometer_reading, incoming.lactometer_reading),
        adulteration_test: existing.adulteration_test || incoming.adulteration_test,
    }
}

// ==========================================
// CollectionAggregator - 交奶聚合引擎
// ==========================================
pub struct CollectionAggregator {
    settings: AggregatorSettings,
    aggregate_repo: Arc<AggregateBatchRepository>,
}

impl CollectionAggregator {
    pub fn new(settings: AggregatorSettings, aggregate_repo: Arc<AggregateBatchRepository>) -> Self {
        Self {
            settings,
            aggregate_repo,
        }
    }

    fn new_batch_number() -> String {
        // 取 UUID 前段做短号, 便于口头报号
        let id = Uuid::new_v4().simple().to_string();
        format!("BATCH-{}", &id[..12].to_uppercase())
    }

    /// 入账一笔交奶
    ///
    /// 1. 取中心当前开放聚合批次; 无或超龄 (window_hours) 则开新批次
    /// 2. 累计总量/总成本, 重算加权质量指标
    /// 3. 聚合更新 + 交奶记录插入单事务落库 (乐观锁, 冲突重试)
    ///
    /// # 返回
    /// - (合并后的聚合批次, 交奶记录)
    pub fn add_delivery(
        &self,
        center_id: &str,
        farmer_id: &str,
        quantity_l: f64,
        price_per_liter: f64,
        quality: QualityMetrics,
        handler: CustodyHolder,
        now: DateTime<Utc>,
    ) -> EngineResult<(AggregateBatch, Delivery)> {
        if quantity_l <= 0.0 {
            return Err(EngineError::Validation(format!(
                "交奶数量必须为正: {}",
                quantity_l
            )));
        }
        if price_per_liter < 0.0 {
            return Err(EngineError::Validation(format!(
                "单价不可为负: {}",
                price_per_liter
            )));
        }
        quality.validate().map_err(EngineError::Validation)?;

        let mut attempt = 0u32;
        loop {
            let open = self
                .aggregate_repo
                .find_open_for_center(center_id)
                .map_err(EngineError::from_repo)?;

            let (base, is_new) = match open {
                Some(agg) if !agg.is_expired(now, self.settings.window_hours) => (agg, false),
                _ => (
                    AggregateBatch::open(Self::new_batch_number(), center_id.to_string(), now),
                    true,
                ),
            };

            let mut merged = base.clone();
            merged.quality = if base.total_quantity_l > 0.0 {
                merge_metrics(&base.quality, base.total_quantity_l, &quality, quantity_l)
            } else {
                quality.clone()
            };
            merged.total_quantity_l = base.total_quantity_l + quantity_l;
            merged.total_cost = base.total_cost + quantity_l * price_per_liter;

            let delivery = Delivery {
                delivery_id: format!("DLV-{}", Uuid::new_v4()),
                batch_number: merged.batch_number.clone(),
                farmer_id: farmer_id.to_string(),
                center_id: center_id.to_string(),
                quantity_l,
                price_per_liter,
                quality: quality.clone(),
                handler: handler.clone(),
                collected_at: now,
            };

            match self.aggregate_repo.apply_delivery(&merged, is_new, &delivery) {
                Ok(()) => {
                    tracing::info!(
                        batch_number = %merged.batch_number,
                        center_id,
                        farmer_id,
                        quantity_l,
                        total_quantity_l = merged.total_quantity_l,
                        new_batch = is_new,
                        "交奶入账完成"
                    );
                    return Ok((merged, delivery));
                }
                Err(RepositoryError::OptimisticLockFailure {
                    batch_number,
                    expected,
                    actual,
                }) => {
                    attempt += 1;
                    if attempt >= self.settings.max_retries {
                        return Err(EngineError::Conflict(format!(
                            "聚合批次 {} 并发冲突超过重试上限 (期望版本 {}, 实际 {})",
                            batch_number, expected, actual
                        )));
                    }
                    tracing::debug!(
                        batch_number = %batch_number,
                        attempt,
                        "聚合乐观锁冲突, 重读后重试"
                    );
                }
                Err(e) => return Err(EngineError::from_repo(e)),
            }
        }
    }
}
