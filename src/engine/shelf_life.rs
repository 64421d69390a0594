// ==========================================
// 牛奶冷链物流系统 - 保质期与去向建议引擎
// ==========================================
// 职责: 按质量指标与温度履历估算剩余保质时长;
//       按严格优先级规则给出批次去向建议
// 红线: 规则逐条评估, 首个命中即返回; 加工厂查询失败
//       降级到下一条规则, 不让整个请求失败
// ==========================================

use crate::config::ShelfLifeSettings;
use crate::domain::batch::MilkBatch;
use crate::domain::collection::TemperatureLog;
use crate::domain::types::Destination;
use crate::domain::vehicle::CollectionCenter;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{MilkBatchRepository, ProcessingPlantRepository};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// 剩余保质时长 (小时)
///
/// 公式: base × 初始质量 × 超温衰减, 下限 0
/// - 初始质量 = 脂肪率/100 × fat_weight + (1-酸度) × acidity_weight
/// - 每条超温日志 (> violation_temp_c) 衰减 violation_penalty
pub fn remaining_shelf_life(
    settings: &ShelfLifeSettings,
    fat_content_pct: f64,
    acidity: f64,
    temperature_logs: &[TemperatureLog],
) -> f64 {
    let initial_quality =
        (fat_content_pct / 100.0) * settings.fat_weight + (1.0 - acidity) * settings.acidity_weight;

    let excursions = temperature_logs
        .iter()
        .filter(|log| log.temperature > settings.violation_temp_c)
        .count() as f64;
    let decay = (1.0 - settings.violation_penalty * excursions).max(0.0);

    (settings.base_hours * initial_quality * decay).max(0.0)
}

// ==========================================
// ShelfLifeEngine - 去向建议引擎
// ==========================================
pub struct ShelfLifeEngine {
    settings: ShelfLifeSettings,
    batch_repo: Arc<MilkBatchRepository>,
    plant_repo: Arc<ProcessingPlantRepository>,
}

impl ShelfLifeEngine {
    pub fn new(
        settings: ShelfLifeSettings,
        batch_repo: Arc<MilkBatchRepository>,
        plant_repo: Arc<ProcessingPlantRepository>,
    ) -> Self {
        Self {
            settings,
            batch_repo,
            plant_repo,
        }
    }

    /// 批次的剩余保质时长 (小时)
    pub fn remaining_hours(&self, batch: &MilkBatch, logs: &[TemperatureLog]) -> f64 {
        remaining_shelf_life(
            &self.settings,
            batch.quality.fat_content,
            batch.quality.acidity,
            logs,
        )
    }

    /// 批次距到期的小时数; 未设 expiry 时按采集时刻 + 剩余保质推算
    fn hours_to_expiry(&self, batch: &MilkBatch, logs: &[TemperatureLog], now: DateTime<Utc>) -> f64 {
        let expiry = match batch.expiry_time {
            Some(t) => t,
            None => {
                let remaining = self.remaining_hours(batch, logs);
                batch.collected_at + Duration::seconds((remaining * 3600.0) as i64)
            }
        };
        (expiry - now).num_seconds() as f64 / 3600.0
    }

    /// 去向判定, 严格优先级, 首个命中即返回:
    /// 1. 脂肪率 > 门槛 且 村内需求 > 0          → local_sale
    /// 2. 半径内有备用产能足够的加工厂 且酸度达标  → 该加工厂
    /// 3. 距到期不足 souring_window_hours          → soured_milk
    /// 4. 其余                                     → cooled_storage
    ///
    /// 判定为 local_sale 时重算并持久化到期时刻
    pub fn determine_destination(
        &self,
        batch: &MilkBatch,
        center: &CollectionCenter,
        logs: &[TemperatureLog],
        now: DateTime<Utc>,
    ) -> EngineResult<Destination> {
        // 规则 1: 本地直销
        if batch.quality.fat_content > self.settings.local_sale_fat_pct
            && center.village_demand_l > 0.0
        {
            let remaining = self.remaining_hours(batch, logs);
            let expiry = now + Duration::seconds((remaining * 3600.0) as i64);
            self.batch_repo
                .set_expiry(&batch.batch_id, expiry)
                .map_err(EngineError::from_repo)?;
            tracing::info!(
                batch_id = %batch.batch_id,
                remaining_hours = remaining,
                "去向判定: local_sale, 到期时刻已重算"
            );
            return Ok(Destination::LocalSale);
        }

        // 规则 2: 送加工厂 (查询失败降级, 不中断判定)
        if batch.quality.acidity < self.settings.plant_acidity_max {
            match self
                .plant_repo
                .find_nearest_with_capacity(&center.location, batch.quantity_l)
            {
                Ok(Some(plant))
                    if center.location.distance_km(&plant.location)
                        <= self.settings.plant_radius_km =>
                {
                    tracing::info!(
                        batch_id = %batch.batch_id,
                        plant_id = %plant.plant_id,
                        "去向判定: 送加工厂"
                    );
                    return Ok(Destination::ProcessingPlant(plant.plant_id));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        batch_id = %batch.batch_id,
                        error = %e,
                        "加工厂查询失败, 降级到下一条规则"
                    );
                }
            }
        }

        // 规则 3: 临期转酸奶
        if self.hours_to_expiry(batch, logs, now) < self.settings.souring_window_hours {
            tracing::info!(batch_id = %batch.batch_id, "去向判定: soured_milk");
            return Ok(Destination::SouredMilk);
        }

        // 规则 4: 冷藏暂存
        tracing::info!(batch_id = %batch.batch_id, "去向判定: cooled_storage");
        Ok(Destination::CooledStorage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShelfLifeSettings;

    fn log_at(temp: f64) -> TemperatureLog {
        TemperatureLog {
            temperature: temp,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_scenario_1_reference_value() {
        // 脂肪 4%, 酸度 0.1, 无超温: 48 × (0.04×0.3 + 0.9×0.7) = 30.816
        let settings = ShelfLifeSettings::default();
        let hours = remaining_shelf_life(&settings, 4.0, 0.1, &[]);
        assert!((hours - 30.816).abs() < 1e-9, "基准样例应得 30.816, 实得 {}", hours);
    }

    #[test]
    fn test_scenario_2_each_excursion_decays_ten_percent() {
        let settings = ShelfLifeSettings::default();
        let base = remaining_shelf_life(&settings, 4.0, 0.1, &[]);
        let one = remaining_shelf_life(&settings, 4.0, 0.1, &[log_at(5.0)]);
        let two = remaining_shelf_life(&settings, 4.0, 0.1, &[log_at(5.0), log_at(6.5)]);
        assert!((one - base * 0.9).abs() < 1e-9);
        assert!((two - base * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_3_boundary_log_not_an_excursion() {
        // 恰好 4.0°C 不算超温 (严格大于)
        let settings = ShelfLifeSettings::default();
        let base = remaining_shelf_life(&settings, 4.0, 0.1, &[]);
        let at_line = remaining_shelf_life(&settings, 4.0, 0.1, &[log_at(4.0)]);
        assert!((at_line - base).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_4_floor_at_zero() {
        // 超温条数足够多时衰减钳位到 0, 不出现负保质期
        let settings = ShelfLifeSettings::default();
        let logs: Vec<TemperatureLog> = (0..15).map(|_| log_at(9.0)).collect();
        let hours = remaining_shelf_life(&settings, 4.0, 0.1, &logs);
        assert_eq!(hours, 0.0);
    }
}
