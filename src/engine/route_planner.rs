// ==========================================
// 牛奶冷链物流系统 - 路线规划适配器
// ==========================================
// 职责: 站点排序与几何交给外部导航服务, 到点时刻与装载
//       时长本地计算; 提供直线测距的兜底实现
// 说明: 首个站点到点时刻 = 当前时刻且行驶段为零;
//       后续站点 = 上一站到点 + 行驶段 + 本站装载;
//       中心收尾只计行驶段
// ==========================================

use crate::config::RouteSettings;
use crate::domain::collection::{BatchStop, PlannedRoute, RouteWaypoint};
use crate::domain::geo::GeoPoint;
use crate::domain::types::VehicleType;
use crate::engine::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::error::Error;
use std::sync::Arc;

/// 单个行驶段
#[derive(Debug, Clone)]
pub struct RouteLeg {
    pub distance_m: f64,
    pub duration_secs: i64,
}

/// 导航服务返回的排序方案
#[derive(Debug, Clone)]
pub struct DirectionsPlan {
    /// 站点访问顺序 (对输入 stops 的索引重排)
    pub order: Vec<usize>,
    /// 依次的行驶段: 起点→首站, 站间各段, 末站→终点; 共 stops.len()+1 段
    pub legs: Vec<RouteLeg>,
    /// 编码路径, 对本系统不透明
    pub polyline: String,
}

/// 外部导航服务 Trait
///
/// 失败直接上浮, 不内建重试; 调度器以整单顺延的方式重试
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn optimize_route(
        &self,
        start: GeoPoint,
        stops: &[GeoPoint],
        finish: GeoPoint,
        vehicle_type: VehicleType,
    ) -> Result<DirectionsPlan, Box<dyn Error + Send + Sync>>;
}

// ==========================================
// HaversineDirections - 直线测距兜底实现
// ==========================================
// 导航服务不可用或未配置时使用: 最近邻排序 + 大圆距离,
// 行驶时长按固定平均车速折算
pub struct HaversineDirections {
    speed_kmh: f64,
}

impl HaversineDirections {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    fn leg(&self, from: &GeoPoint, to: &GeoPoint) -> RouteLeg {
        let distance_m = from.distance_m(to);
        let duration_secs = (distance_m / 1000.0 / self.speed_kmh * 3600.0).round() as i64;
        RouteLeg {
            distance_m,
            duration_secs,
        }
    }
}

#[async_trait]
impl DirectionsProvider for HaversineDirections {
    async fn optimize_route(
        &self,
        start: GeoPoint,
        stops: &[GeoPoint],
        finish: GeoPoint,
        _vehicle_type: VehicleType,
    ) -> Result<DirectionsPlan, Box<dyn Error + Send + Sync>> {
        let mut remaining: Vec<usize> = (0..stops.len()).collect();
        let mut order = Vec::with_capacity(stops.len());
        let mut legs = Vec::with_capacity(stops.len() + 1);
        let mut cursor = start;

        // 最近邻贪心排序
        while !remaining.is_empty() {
            let (pos, &idx) = remaining
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let da = cursor.distance_m(&stops[**a]);
                    let db = cursor.distance_m(&stops[**b]);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .ok_or("最近邻选择失败")?;
            legs.push(self.leg(&cursor, &stops[idx]));
            cursor = stops[idx];
            order.push(idx);
            remaining.remove(pos);
        }
        legs.push(self.leg(&cursor, &finish));

        let mut points: Vec<String> = Vec::with_capacity(stops.len() + 2);
        points.push(format!("{:.6},{:.6}", start.lat, start.lng));
        for &idx in &order {
            points.push(format!("{:.6},{:.6}", stops[idx].lat, stops[idx].lng));
        }
        points.push(format!("{:.6},{:.6}", finish.lat, finish.lng));

        Ok(DirectionsPlan {
            order,
            legs,
            polyline: points.join(";"),
        })
    }
}

// ==========================================
// RoutePlanner - 路线规划器
// ==========================================
pub struct RoutePlanner {
    settings: RouteSettings,
    provider: Arc<dyn DirectionsProvider>,
}

impl RoutePlanner {
    pub fn new(settings: RouteSettings, provider: Arc<dyn DirectionsProvider>) -> Self {
        Self { settings, provider }
    }

    /// 装载时长 (秒): 数量按装载单位向上取整, 每单位固定分钟数
    pub fn loading_secs(&self, quantity_l: f64) -> i64 {
        let units = (quantity_l / self.settings.loading_unit_l).ceil() as i64;
        units * self.settings.loading_mins_per_unit * 60
    }

    /// 规划一条行程路线
    ///
    /// # 参数
    /// - start: 车辆当前位置
    /// - stops: 无序的取奶站点
    /// - center: 强制的收尾中心点
    pub async fn plan_route(
        &self,
        start: GeoPoint,
        stops: &[BatchStop],
        center: GeoPoint,
        vehicle_type: VehicleType,
        now: DateTime<Utc>,
    ) -> EngineResult<PlannedRoute> {
        if stops.is_empty() {
            return Err(EngineError::Validation("路线至少需要一个取奶站点".to_string()));
        }

        let points: Vec<GeoPoint> = stops.iter().map(|s| s.location).collect();
        let plan = self
            .provider
            .optimize_route(start, &points, center, vehicle_type)
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        if plan.order.len() != stops.len() || plan.legs.len() != stops.len() + 1 {
            return Err(EngineError::Provider(format!(
                "导航服务返回形状不符: order={}, legs={}, stops={}",
                plan.order.len(),
                plan.legs.len(),
                stops.len()
            )));
        }

        let mut waypoints = Vec::with_capacity(stops.len() + 1);
        let mut cursor = now;

        for (seq, &idx) in plan.order.iter().enumerate() {
            let stop = &stops[idx];
            let loading = self.loading_secs(stop.quantity_l);
            let leg_duration = if seq == 0 {
                // 首站即刻出发, 行驶段计零
                0
            } else {
                plan.legs[seq].duration_secs
            };
            if seq > 0 {
                // 到点时刻含本站装载完成
                cursor = cursor + Duration::seconds(leg_duration + loading);
            }
            waypoints.push(RouteWaypoint {
                location: stop.location,
                farmer_id: Some(stop.farmer_id.clone()),
                quantity_l: stop.quantity_l,
                is_center: false,
                planned_time: cursor,
                leg_duration_secs: leg_duration,
                loading_secs: loading,
            });
        }

        let last_leg = &plan.legs[stops.len()];
        cursor = cursor + Duration::seconds(last_leg.duration_secs);
        waypoints.push(RouteWaypoint {
            location: center,
            farmer_id: None,
            quantity_l: 0.0,
            is_center: true,
            planned_time: cursor,
            leg_duration_secs: last_leg.duration_secs,
            loading_secs: 0,
        });

        let distance_m: f64 = plan.legs.iter().map(|leg| leg.distance_m).sum();
        let duration_secs = (cursor - now).num_seconds();

        tracing::debug!(
            stops = stops.len(),
            distance_m,
            duration_secs,
            "路线规划完成"
        );
        Ok(PlannedRoute {
            waypoints,
            polyline: plan.polyline,
            distance_m,
            duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::QualityMetrics;

    fn planner() -> RoutePlanner {
        RoutePlanner::new(
            RouteSettings::default(),
            Arc::new(HaversineDirections::new(40.0)),
        )
    }

    fn stop(id: &str, lat: f64, lng: f64, qty: f64) -> BatchStop {
        BatchStop {
            batch_id: format!("MB-{}", id),
            farmer_id: format!("F-{}", id),
            quantity_l: qty,
            quality: QualityMetrics::zeroed(),
            location: GeoPoint::new(lat, lng),
            planned_time: None,
            actual_time: None,
        }
    }

    #[test]
    fn test_loading_time_rounds_up() {
        let p = planner();
        // 20 升为一个装载单元, 每单元 2 分钟
        assert_eq!(p.loading_secs(20.0), 120, "恰好一单元");
        assert_eq!(p.loading_secs(21.0), 240, "超出即进位");
        assert_eq!(p.loading_secs(45.0), 360, "45L → 3 单元");
    }

    #[tokio::test]
    async fn test_first_stop_departs_now_with_zero_leg() {
        let p = planner();
        let now = Utc::now();
        let stops = vec![stop("1", -1.20, 36.80, 40.0), stop("2", -1.25, 36.85, 30.0)];
        let route = p
            .plan_route(
                GeoPoint::new(-1.19, 36.79),
                &stops,
                GeoPoint::new(-1.30, 36.90),
                VehicleType::Truck,
                now,
            )
            .await
            .unwrap();

        assert_eq!(route.waypoints.len(), 3, "两个站点 + 中心收尾");
        assert_eq!(route.waypoints[0].planned_time, now);
        assert_eq!(route.waypoints[0].leg_duration_secs, 0);
        assert!(route.waypoints.last().unwrap().is_center);
        assert!(route.duration_secs > 0);
        assert!(route.distance_m > 0.0);
    }

    #[tokio::test]
    async fn test_subsequent_stop_charges_own_loading_not_predecessors() {
        let p = planner();
        let now = Utc::now();
        // 装载悬殊的两站: 第二站的到点时刻只含第二站自己的装载
        let stops = vec![stop("1", -1.20, 36.80, 200.0), stop("2", -1.25, 36.85, 20.0)];
        let route = p
            .plan_route(
                GeoPoint::new(-1.19, 36.79),
                &stops,
                GeoPoint::new(-1.30, 36.90),
                VehicleType::Truck,
                now,
            )
            .await
            .unwrap();

        let first = &route.waypoints[0];
        let second = &route.waypoints[1];
        assert_eq!(second.loading_secs, 120, "20L → 1 单元装载");
        let expected =
            first.planned_time + Duration::seconds(second.leg_duration_secs + second.loading_secs);
        assert_eq!(second.planned_time, expected, "间隔 = 行驶段 + 本站装载");

        // 中心收尾只计行驶段, 不再隐式吸收末站装载
        let center = route.waypoints.last().unwrap();
        assert_eq!(
            center.planned_time,
            second.planned_time + Duration::seconds(center.leg_duration_secs)
        );
    }

    #[tokio::test]
    async fn test_nearest_neighbour_ordering() {
        let p = planner();
        // 站点 2 离起点更近, 应先访问
        let stops = vec![stop("far", -2.00, 37.50, 20.0), stop("near", -1.21, 36.81, 20.0)];
        let route = p
            .plan_route(
                GeoPoint::new(-1.20, 36.80),
                &stops,
                GeoPoint::new(-1.30, 36.90),
                VehicleType::Truck,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(route.waypoints[0].farmer_id.as_deref(), Some("F-near"));
    }

    #[tokio::test]
    async fn test_empty_stops_rejected() {
        let p = planner();
        let result = p
            .plan_route(
                GeoPoint::new(0.0, 0.0),
                &[],
                GeoPoint::new(1.0, 1.0),
                VehicleType::Truck,
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
