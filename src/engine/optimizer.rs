// ==========================================
// 牛奶冷链物流系统 - 集奶调度引擎
// ==========================================
// 职责: 待调度行程按紧急度出队, 按容量与邻近度匹配车辆,
//       规划路线后事务化派车; 无车可派则顺延并抬升紧急度
// 红线: 车辆容量的权威台账在共享存储 (条件 UPDATE 预留),
//       内存台账只做本轮筛选加速; 单条行程的失败不允许
//       中断整个调度循环
// 说明: 顺延条目带 not_before, 本轮内不重复处理, 保证
//       单次 optimize() 必然终止
// ==========================================

use crate::config::OptimizerSettings;
use crate::domain::collection::Collection;
use crate::domain::types::CollectionStatus;
use crate::domain::vehicle::Vehicle;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{
    Notification, NotificationChannel, NotificationDispatcher, NotificationKind,
};
use crate::engine::route_planner::RoutePlanner;
use crate::repository::{
    CollectionCenterRepository, CollectionRepository, RepositoryError, VehicleRepository,
};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// 队列条目: 紧急度大者先出, 同分按入队顺序稳定出队
#[derive(Debug, Clone)]
struct QueueEntry {
    urgency: f64,
    seq: u64,
    collection_id: String,
    /// 顺延后的最早可处理时刻
    not_before: Option<DateTime<Utc>>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap 为最大堆: 紧急度高优先; 同分时 seq 小 (先入队) 优先
        self.urgency
            .partial_cmp(&other.urgency)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 本轮调度结果统计
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizeOutcome {
    pub assigned: usize,
    pub rescheduled: usize,
    pub skipped: usize,
}

// ==========================================
// CollectionOptimizer - 集奶调度引擎
// ==========================================
pub struct CollectionOptimizer {
    settings: OptimizerSettings,
    collection_repo: Arc<CollectionRepository>,
    vehicle_repo: Arc<VehicleRepository>,
    center_repo: Arc<CollectionCenterRepository>,
    route_planner: Arc<RoutePlanner>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    queue: BinaryHeap<QueueEntry>,
    /// 本轮内存台账: vehicle_id → 本进程已规划承诺的升数
    ledger: HashMap<String, f64>,
    seq: u64,
    stop_flag: Arc<AtomicBool>,
}

impl CollectionOptimizer {
    pub fn new(
        settings: OptimizerSettings,
        collection_repo: Arc<CollectionRepository>,
        vehicle_repo: Arc<VehicleRepository>,
        center_repo: Arc<CollectionCenterRepository>,
        route_planner: Arc<RoutePlanner>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            settings,
            collection_repo,
            vehicle_repo,
            center_repo,
            route_planner,
            dispatcher,
            queue: BinaryHeap::new(),
            ledger: HashMap::new(),
            seq: 0,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 外部停止句柄 (调度循环每条目检查一次)
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    /// 紧急度 = 等待小时数 × hours_weight + (1 − 平均脂肪率) × fat_weight
    ///         + 已累积的失败抬升分
    ///
    /// 脂肪率按 0-1 比例参与 (存储为百分比, 此处 /100)
    pub fn urgency(&self, collection: &Collection, now: DateTime<Utc>) -> f64 {
        let hours_pending = (now - collection.created_at).num_seconds() as f64 / 3600.0;
        let avg_fat_fraction = collection.avg_fat_content() / 100.0;
        hours_pending.max(0.0) * self.settings.hours_weight
            + (1.0 - avg_fat_fraction) * self.settings.fat_weight
            + collection.urgency_score
    }

    fn push_entry(&mut self, collection: &Collection, now: DateTime<Utc>, not_before: Option<DateTime<Utc>>) {
        let entry = QueueEntry {
            urgency: self.urgency(collection, now),
            seq: self.seq,
            collection_id: collection.collection_id.clone(),
            not_before,
        };
        self.seq += 1;
        self.queue.push(entry);
    }

    /// 新建的待调度行程入队
    pub fn enqueue(&mut self, collection: &Collection, now: DateTime<Utc>) {
        self.push_entry(collection, now, None);
    }

    /// 从存储装载全部待调度行程 (进程启动/重启后恢复队列)
    pub fn initialize(&mut self, now: DateTime<Utc>) -> EngineResult<usize> {
        self.queue.clear();
        self.ledger.clear();
        let pending = self
            .collection_repo
            .find_pending()
            .map_err(EngineError::from_repo)?;
        let count = pending.len();
        for collection in &pending {
            // 尚未到计划时刻的行程按顺延条目装载
            let not_before = if collection.planned_date > now {
                Some(collection.planned_date)
            } else {
                None
            };
            self.push_entry(collection, now, not_before);
        }
        tracing::info!(count, "调度队列已装载");
        Ok(count)
    }

    /// 队列长度 (测试与诊断用)
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// 候选车辆筛选: 状态可用、额定容量达标、半径内,
    /// 再按 "剩余容量 = 额定 − 存储已承诺 − 本轮台账" 过滤;
    /// 距离升序, 同距剩余容量大者优先, 取前 max_candidates 的首个
    fn find_optimal_vehicle(
        &self,
        center_location: &crate::domain::geo::GeoPoint,
        required_l: f64,
    ) -> EngineResult<Option<Vehicle>> {
        let candidates = self
            .vehicle_repo
            .find_available_candidates(center_location, required_l, self.settings.search_radius_km)
            .map_err(EngineError::from_repo)?;

        let mut eligible: Vec<(Vehicle, f64)> = candidates
            .into_iter()
            .filter(|(vehicle, _)| {
                let planned = self.ledger.get(&vehicle.vehicle_id).copied().unwrap_or(0.0);
                vehicle.remaining_capacity_l() - planned >= required_l
            })
            .collect();

        eligible.sort_by(|(va, da), (vb, db)| {
            da.partial_cmp(db)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    vb.remaining_capacity_l()
                        .partial_cmp(&va.remaining_capacity_l())
                        .unwrap_or(Ordering::Equal)
                })
        });
        eligible.truncate(self.settings.max_candidates);
        Ok(eligible.into_iter().next().map(|(vehicle, _)| vehicle))
    }

    /// 调度主循环: 队列清空或收到停止信号为止
    ///
    /// 顺延条目 (not_before 未到) 暂存, 循环结束后放回队列,
    /// 留待下一轮处理
    pub async fn optimize(&mut self, now: DateTime<Utc>) -> EngineResult<OptimizeOutcome> {
        let mut outcome = OptimizeOutcome::default();
        let mut deferred: Vec<QueueEntry> = Vec::new();

        while let Some(entry) = self.queue.pop() {
            if self.stop_flag.load(AtomicOrdering::Relaxed) {
                deferred.push(entry);
                break;
            }
            if entry.not_before.map(|t| t > now).unwrap_or(false) {
                deferred.push(entry);
                continue;
            }

            match self.process_entry(&entry, now).await {
                Ok(EntryResult::Assigned) => outcome.assigned += 1,
                Ok(EntryResult::Rescheduled) => outcome.rescheduled += 1,
                Ok(EntryResult::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    // 单条失败只记日志, 不中断其余行程的调度
                    outcome.skipped += 1;
                    tracing::error!(
                        collection_id = %entry.collection_id,
                        error = %e,
                        "行程调度失败, 跳过"
                    );
                }
            }
        }

        for entry in deferred {
            self.queue.push(entry);
        }

        tracing::info!(
            assigned = outcome.assigned,
            rescheduled = outcome.rescheduled,
            skipped = outcome.skipped,
            remaining = self.queue.len(),
            "调度循环结束"
        );
        Ok(outcome)
    }

    async fn process_entry(
        &mut self,
        entry: &QueueEntry,
        now: DateTime<Utc>,
    ) -> EngineResult<EntryResult> {
        // 重新装载全量详情, 队列里只存 ID
        let Some(collection) = self
            .collection_repo
            .find_by_id(&entry.collection_id)
            .map_err(EngineError::from_repo)?
        else {
            return Ok(EntryResult::Skipped);
        };
        if collection.status != CollectionStatus::Pending {
            return Ok(EntryResult::Skipped);
        }

        let required_l = collection.total_quantity_l();
        if required_l <= 0.0 {
            tracing::warn!(collection_id = %collection.collection_id, "行程无有效取奶量, 跳过");
            return Ok(EntryResult::Skipped);
        }

        let center = self
            .center_repo
            .get_by_id(&collection.center_id)
            .map_err(EngineError::from_repo)?;

        let Some(vehicle) = self.find_optimal_vehicle(&center.location, required_l)? else {
            self.reschedule(&collection, now)?;
            return Ok(EntryResult::Rescheduled);
        };

        // 路线规划失败视同无车可派: 顺延重试而非让整单失败
        let route = match self
            .route_planner
            .plan_route(
                vehicle.location,
                &collection.stops,
                center.location,
                vehicle.vehicle_type,
                now,
            )
            .await
        {
            Ok(route) => route,
            Err(EngineError::Provider(msg)) => {
                tracing::warn!(
                    collection_id = %collection.collection_id,
                    error = %msg,
                    "导航服务失败, 行程顺延"
                );
                self.reschedule(&collection, now)?;
                return Ok(EntryResult::Rescheduled);
            }
            Err(e) => return Err(e),
        };

        // 存储层条件预留容量; 并发抢占导致预留失败时同样顺延
        match self.collection_repo.assign_vehicle(
            &collection.collection_id,
            &vehicle.vehicle_id,
            required_l,
            &route,
            now,
        ) {
            Ok(()) => {}
            Err(RepositoryError::CapacityReservationFailed { vehicle_id, .. }) => {
                tracing::warn!(
                    collection_id = %collection.collection_id,
                    vehicle_id = %vehicle_id,
                    "容量预留被并发抢占, 行程顺延"
                );
                self.reschedule(&collection, now)?;
                return Ok(EntryResult::Rescheduled);
            }
            Err(e) => return Err(EngineError::from_repo(e)),
        }

        *self.ledger.entry(vehicle.vehicle_id.clone()).or_insert(0.0) += required_l;
        self.notify_assignment(&collection, &vehicle);

        tracing::info!(
            collection_id = %collection.collection_id,
            vehicle_id = %vehicle.vehicle_id,
            required_l,
            "派车完成"
        );
        Ok(EntryResult::Assigned)
    }

    /// 无车可派: 计划时刻顺延, 紧急度抬升固定分, 重新入队
    fn reschedule(&mut self, collection: &Collection, now: DateTime<Utc>) -> EngineResult<()> {
        let new_planned = now + Duration::minutes(self.settings.retry_delay_mins);
        let new_score = collection.urgency_score + self.settings.retry_urgency_bump;
        self.collection_repo
            .reschedule(&collection.collection_id, new_planned, new_score)
            .map_err(EngineError::from_repo)?;

        let mut updated = collection.clone();
        updated.planned_date = new_planned;
        updated.urgency_score = new_score;
        self.push_entry(&updated, now, Some(new_planned));

        tracing::info!(
            collection_id = %collection.collection_id,
            new_planned = %new_planned,
            urgency_score = new_score,
            "无车可派, 行程顺延"
        );
        Ok(())
    }

    /// 通知行程内每位奶农 (短信+推送) 与司机 (应用内)
    fn notify_assignment(&self, collection: &Collection, vehicle: &Vehicle) {
        for stop in &collection.stops {
            let notification = Notification {
                recipient_id: stop.farmer_id.clone(),
                kind: NotificationKind::CollectionScheduled,
                channels: vec![NotificationChannel::Sms, NotificationChannel::Push],
                payload: serde_json::json!({
                    "collection_id": collection.collection_id,
                    "batch_id": stop.batch_id,
                    "vehicle": vehicle.plate_number,
                }),
            };
            if let Err(e) = self.dispatcher.send(notification) {
                tracing::warn!(farmer_id = %stop.farmer_id, error = %e, "奶农通知发送失败");
            }
        }

        let driver_note = Notification {
            recipient_id: vehicle.vehicle_id.clone(),
            kind: NotificationKind::NewAssignment,
            channels: vec![NotificationChannel::App],
            payload: serde_json::json!({
                "collection_id": collection.collection_id,
                "center_id": collection.center_id,
                "stops": collection.stops.len(),
                "total_quantity_l": collection.total_quantity_l(),
            }),
        };
        if let Err(e) = self.dispatcher.send(driver_note) {
            tracing::warn!(vehicle_id = %vehicle.vehicle_id, error = %e, "司机通知发送失败");
        }
    }
}

enum EntryResult {
    Assigned,
    Rescheduled,
    Skipped,
}
