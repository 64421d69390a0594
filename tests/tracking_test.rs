// ==========================================
// 批次溯源引擎集成测试
// ==========================================
// 测试目标: 交接链路的原子落库、状态守卫、车辆可用性、判废广播、终态封闭
// ==========================================


use chrono::{Duration, Utc};
use maziwa_chain::domain::types::{BatchEvent, BatchStatus, HandlerKind, VehicleStatus};
use maziwa_chain::domain::{CustodyHolder, GeoPoint};
use maziwa_chain::engine::events::RecordingDispatcher;
use maziwa_chain::engine::{EngineError, MilkTrackingEngine};
use maziwa_chain::repository::{
    CollectionCenterRepository, FarmerRepository, MilkBatchRepository, MilkTrackingRepository,
    ProcessingPlantRepository, RepositoryError, VehicleRepository,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::{
    create_test_db, open_shared, sample_metrics, seed_center, seed_farmer, seed_plant, seed_vehicle,
};

struct Fixture {
    _temp_file: tempfile::NamedTempFile,
    conn: Arc<Mutex<Connection>>,
    engine: MilkTrackingEngine,
    dispatcher: Arc<RecordingDispatcher>,
    batch_repo: Arc<MilkBatchRepository>,
    center_repo: Arc<CollectionCenterRepository>,
    vehicle_repo: Arc<VehicleRepository>,
    plant_repo: Arc<ProcessingPlantRepository>,
}

fn setup() -> Fixture {
    let (temp_file, db_path) = create_test_db().expect("测试库创建失败");
    let conn = open_shared(&db_path).expect("连接打开失败");
    let dispatcher = RecordingDispatcher::new();

    let batch_repo = Arc::new(MilkBatchRepository::from_connection(Arc::clone(&conn)));
    let farmer_repo = Arc::new(FarmerRepository::from_connection(Arc::clone(&conn)));
    let tracking_repo = Arc::new(MilkTrackingRepository::from_connection(Arc::clone(&conn)));
    let center_repo = Arc::new(CollectionCenterRepository::from_connection(Arc::clone(&conn)));
    let vehicle_repo = Arc::new(VehicleRepository::from_connection(Arc::clone(&conn)));
    let plant_repo = Arc::new(ProcessingPlantRepository::from_connection(Arc::clone(&conn)));

    let engine = MilkTrackingEngine::new(
        Arc::clone(&batch_repo),
        farmer_repo,
        tracking_repo,
        dispatcher.clone(),
    );

    seed_center(&conn, "CEN-1", GeoPoint::new(-1.2, 36.8), 0.0);
    seed_farmer(&conn, "F-1", "CEN-1", GeoPoint::new(-1.21, 36.81));

    Fixture {
        _temp_file: temp_file,
        conn,
        engine,
        dispatcher,
        batch_repo,
        center_repo,
        vehicle_repo,
        plant_repo,
    }
}

#[test]
fn test_record_collection_starts_in_farmer_custody() {
    let fx = setup();
    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .expect("收奶应成功");

    assert_eq!(batch.current_status, BatchStatus::Collected, "建档即 collected");
    assert_eq!(batch.handler.kind, HandlerKind::Farmer, "初始保管人为奶农");
    assert_eq!(batch.handler.actor_id, "F-1");

    let reread = fx.batch_repo.get_by_id(&batch.batch_id).unwrap();
    assert_eq!(reread.current_status, BatchStatus::Collected);
    assert!((reread.quantity_l - 80.0).abs() < 1e-9);

    let center = fx.center_repo.get_by_id("CEN-1").unwrap();
    assert!((center.current_stock_l - 80.0).abs() < 1e-9, "中心库存同事务增加");
}

#[test]
fn test_center_delivery_moves_custody_to_staff() {
    let fx = setup();
    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();

    let delivered = fx
        .engine
        .record_center_delivery(&batch.batch_id, "U-1")
        .expect("交付中心应成功");
    assert_eq!(delivered.current_status, BatchStatus::AtCenter);
    assert_eq!(delivered.handler.kind, HandlerKind::CenterStaff, "保管人移交中心员工");
    assert_eq!(delivered.handler.actor_id, "U-1");
}

#[test]
fn test_record_collection_rejects_unknown_farmer_and_zero_quantity() {
    let fx = setup();
    let result = fx.engine.record_collection(
        "F-GHOST",
        "CEN-1",
        80.0,
        sample_metrics(3.8, 0.12),
        Utc::now(),
    );
    assert!(matches!(result, Err(EngineError::NotFound { .. })), "奶农必须在册");

    let result = fx.engine.record_collection(
        "F-1",
        "CEN-1",
        0.0,
        sample_metrics(3.8, 0.12),
        Utc::now(),
    );
    assert!(matches!(result, Err(EngineError::Validation(_))), "零量收奶应被拒绝");

    let center = fx.center_repo.get_by_id("CEN-1").unwrap();
    assert!((center.current_stock_l - 0.0).abs() < 1e-9, "校验失败不落任何数据");
}

#[test]
fn test_dispatch_requires_center_delivery_first() {
    let fx = setup();
    seed_vehicle(&fx.conn, "VEH-1", 500.0, GeoPoint::new(-1.22, 36.82));
    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();

    // collected 状态不可直接发运
    let result = fx
        .engine
        .record_transfer_to_supplier(&batch.batch_id, "VEH-1", "D-1", None);
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })), "未交付中心不得发运");

    let reread = fx.batch_repo.get_by_id(&batch.batch_id).unwrap();
    assert_eq!(reread.current_status, BatchStatus::Collected);
}

#[test]
fn test_transfer_to_supplier_moves_custody_and_stock() {
    let fx = setup();
    seed_vehicle(&fx.conn, "VEH-1", 500.0, GeoPoint::new(-1.22, 36.82));
    seed_plant(&fx.conn, "PLT-1", GeoPoint::new(-1.3, 36.9), 10_000.0);

    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();
    fx.engine.record_center_delivery(&batch.batch_id, "U-1").unwrap();

    let eta = Utc::now() + Duration::hours(2);
    let updated = fx
        .engine
        .record_transfer_to_supplier(&batch.batch_id, "VEH-1", "D-1", Some(("PLT-1", eta)))
        .expect("发运应成功");

    assert_eq!(updated.current_status, BatchStatus::InTransit);
    assert_eq!(updated.handler.kind, HandlerKind::Driver, "保管人移交司机");
    assert_eq!(updated.handler.actor_id, "D-1");

    let center = fx.center_repo.get_by_id("CEN-1").unwrap();
    assert!((center.current_stock_l - 0.0).abs() < 1e-9, "发运扣减中心库存");

    let vehicle = fx.vehicle_repo.get_by_id("VEH-1").unwrap();
    assert!(vehicle.current_batches.contains(&batch.batch_id), "批次挂到车辆在途清单");
    assert_eq!(vehicle.status, VehicleStatus::InTransit, "装车后车辆转入在途");

    let plant = fx.plant_repo.get_by_id("PLT-1").unwrap();
    assert_eq!(plant.expected_deliveries.len(), 1, "加工厂登记预期到货");
    assert_eq!(plant.expected_deliveries[0].batch_id, batch.batch_id);
}

#[test]
fn test_transfer_rejected_when_vehicle_not_available() {
    let fx = setup();
    let mut vehicle = seed_vehicle(&fx.conn, "VEH-1", 500.0, GeoPoint::new(-1.22, 36.82));
    vehicle.status = VehicleStatus::Maintenance;
    fx.vehicle_repo.upsert(&vehicle).unwrap();

    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();
    fx.engine.record_center_delivery(&batch.batch_id, "U-1").unwrap();

    let result = fx
        .engine
        .record_transfer_to_supplier(&batch.batch_id, "VEH-1", "D-1", None);
    assert!(
        matches!(
            result,
            Err(EngineError::Repository(RepositoryError::VehicleUnavailable { .. }))
        ),
        "维保中的车辆不得装车"
    );

    // 整体回滚: 批次/库存/清单都不变
    let reread = fx.batch_repo.get_by_id(&batch.batch_id).unwrap();
    assert_eq!(reread.current_status, BatchStatus::AtCenter, "发运失败不改批次状态");
    let center = fx.center_repo.get_by_id("CEN-1").unwrap();
    assert!((center.current_stock_l - 80.0).abs() < 1e-9, "库存不扣减");
    let vehicle = fx.vehicle_repo.get_by_id("VEH-1").unwrap();
    assert!(vehicle.current_batches.is_empty(), "清单不追加");
    assert_eq!(vehicle.status, VehicleStatus::Maintenance);
}

#[test]
fn test_plant_delivery_settles_expected_and_frees_vehicle() {
    let fx = setup();
    seed_vehicle(&fx.conn, "VEH-1", 500.0, GeoPoint::new(-1.22, 36.82));
    seed_plant(&fx.conn, "PLT-1", GeoPoint::new(-1.3, 36.9), 10_000.0);

    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();
    fx.engine.record_center_delivery(&batch.batch_id, "U-1").unwrap();
    fx.engine
        .record_transfer_to_supplier(
            &batch.batch_id,
            "VEH-1",
            "D-1",
            Some(("PLT-1", Utc::now() + Duration::hours(2))),
        )
        .unwrap();

    let delivered = fx
        .engine
        .record_plant_delivery(&batch.batch_id, "VEH-1", "PLT-1", "PU-1")
        .expect("到厂交付应成功");

    assert_eq!(delivered.current_status, BatchStatus::AtPlant);
    assert_eq!(delivered.handler.kind, HandlerKind::PlantStaff);

    let vehicle = fx.vehicle_repo.get_by_id("VEH-1").unwrap();
    assert!(vehicle.current_batches.is_empty(), "到厂后批次移出在途清单");
    assert_eq!(vehicle.status, VehicleStatus::Available, "清单清空即回到可用");

    let plant = fx.plant_repo.get_by_id("PLT-1").unwrap();
    assert!((plant.current_stock_l - 80.0).abs() < 1e-9, "厂方库存同事务增加");
    assert!(plant.expected_deliveries.is_empty(), "预期到货已核销");
}

#[test]
fn test_invalid_transition_leaves_state_unchanged() {
    let fx = setup();
    seed_vehicle(&fx.conn, "VEH-1", 500.0, GeoPoint::new(-1.22, 36.82));

    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();
    fx.engine.record_center_delivery(&batch.batch_id, "U-1").unwrap();
    fx.engine
        .record_transfer_to_supplier(&batch.batch_id, "VEH-1", "D-1", None)
        .unwrap();

    // 已在途的批次不能再次发运
    let result = fx
        .engine
        .record_transfer_to_supplier(&batch.batch_id, "VEH-1", "D-2", None);
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })), "重复发运应被状态机拒绝");

    let reread = fx.batch_repo.get_by_id(&batch.batch_id).unwrap();
    assert_eq!(reread.current_status, BatchStatus::InTransit, "非法事件不改变状态");
    assert_eq!(reread.handler.actor_id, "D-1", "保管人不变");
}

#[test]
fn test_apply_event_processes_batch_at_plant() {
    let fx = setup();
    seed_vehicle(&fx.conn, "VEH-1", 500.0, GeoPoint::new(-1.22, 36.82));
    seed_plant(&fx.conn, "PLT-1", GeoPoint::new(-1.3, 36.9), 10_000.0);

    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();
    fx.engine.record_center_delivery(&batch.batch_id, "U-1").unwrap();
    fx.engine
        .record_transfer_to_supplier(&batch.batch_id, "VEH-1", "D-1", None)
        .unwrap();
    fx.engine
        .record_plant_delivery(&batch.batch_id, "VEH-1", "PLT-1", "PU-1")
        .unwrap();

    let next = fx
        .engine
        .apply_event(&batch.batch_id, BatchEvent::Process, CustodyHolder::plant_staff("PU-1"))
        .expect("到厂批次可进入加工");
    assert_eq!(next, BatchStatus::Processed);
}

#[test]
fn test_spoil_broadcasts_and_reaches_terminal_state() {
    let fx = setup();
    let batch = fx
        .engine
        .record_collection("F-1", "CEN-1", 80.0, sample_metrics(3.8, 0.12), Utc::now())
        .unwrap();

    fx.engine.spoil(&batch.batch_id, "酸度超标").expect("判废应成功");

    let reread = fx.batch_repo.get_by_id(&batch.batch_id).unwrap();
    assert_eq!(reread.current_status, BatchStatus::Spoiled);

    let broadcasts = fx.dispatcher.broadcasts.lock().unwrap();
    assert_eq!(broadcasts.len(), 1, "判废应广播告警");
    assert!(broadcasts[0].message.contains(&batch.batch_id));

    // 终态封闭: 任何后续事件都被拒绝
    drop(broadcasts);
    let result = fx.engine.apply_event(
        &batch.batch_id,
        BatchEvent::Process,
        CustodyHolder::center_staff("U-1"),
    );
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })), "终态不接受任何事件");
    let result = fx.engine.spoil(&batch.batch_id, "重复判废");
    assert!(result.is_err(), "终态不可再判废");
}
