// ==========================================
// 冷链温度监控引擎集成测试
// ==========================================
// 测试目标: 防抖确认、回正解除、指令下发、冷链记录落库
// ==========================================


use chrono::{Duration, Utc};
use maziwa_chain::config::MonitorSettings;
use maziwa_chain::domain::GeoPoint;
use maziwa_chain::engine::events::RecordingDispatcher;
use maziwa_chain::engine::{EngineError, TemperatureMonitor};
use maziwa_chain::repository::{
    CollectionRepository, CoolingViolationRepository, IotDeviceRepository,
    TemperatureReadingRepository,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::{create_test_db, make_stop, open_shared, seed_center, seed_device, seed_pending_collection};

struct Fixture {
    _temp_file: tempfile::NamedTempFile,
    conn: Arc<Mutex<Connection>>,
    monitor: TemperatureMonitor,
    dispatcher: Arc<RecordingDispatcher>,
    reading_repo: Arc<TemperatureReadingRepository>,
    violation_repo: Arc<CoolingViolationRepository>,
}

fn setup() -> Fixture {
    let (temp_file, db_path) = create_test_db().expect("测试库创建失败");
    let conn = open_shared(&db_path).expect("连接打开失败");
    let dispatcher = RecordingDispatcher::new();

    let device_repo = Arc::new(IotDeviceRepository::from_connection(Arc::clone(&conn)));
    let reading_repo = Arc::new(TemperatureReadingRepository::from_connection(Arc::clone(&conn)));
    let violation_repo = Arc::new(CoolingViolationRepository::from_connection(Arc::clone(&conn)));
    let collection_repo = Arc::new(CollectionRepository::from_connection(Arc::clone(&conn)));

    let monitor = TemperatureMonitor::new(
        MonitorSettings::default(),
        device_repo,
        Arc::clone(&reading_repo),
        Arc::clone(&violation_repo),
        collection_repo,
        dispatcher.clone(),
        dispatcher.clone(),
    );

    Fixture {
        _temp_file: temp_file,
        conn,
        monitor,
        dispatcher,
        reading_repo,
        violation_repo,
    }
}

#[test]
fn test_unknown_device_reported_not_silently_dropped() {
    let mut fx = setup();
    let result = fx.monitor.process_reading("DEV-GHOST", 9.0, Utc::now());
    assert!(matches!(result, Err(EngineError::NotFound { .. })), "未知设备应显式上报");
    assert!(
        fx.reading_repo.recent_for_device("DEV-GHOST", 10).unwrap().is_empty(),
        "未知设备不落读数"
    );
}

#[test]
fn test_single_abnormal_reading_does_not_alert_immediately() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-1", None, false);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-1", 9.0, now).unwrap();
    assert_eq!(fx.monitor.pending_timers(), 1);

    // 防抖窗口未到, 不触发
    let fired = fx.monitor.poll(now + Duration::seconds(299)).unwrap();
    assert_eq!(fired, 0, "窗口内不应告警");
    assert!(fx.dispatcher.broadcasts.lock().unwrap().is_empty());

    // 窗口到期, 恰好一次告警
    let fired = fx.monitor.poll(now + Duration::seconds(301)).unwrap();
    assert_eq!(fired, 1);
    let broadcasts = fx.dispatcher.broadcasts.lock().unwrap();
    assert_eq!(broadcasts.len(), 1, "到期后恰好一次告警");
    assert_eq!(broadcasts[0].priority.to_string(), "high", "critical_* 为高优先级");
    assert_eq!(fx.monitor.pending_timers(), 0, "计时器一次性移除");
}

#[test]
fn test_normal_reading_within_window_cancels_alert() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-1", None, false);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-1", 9.0, now).unwrap();
    fx.monitor
        .process_reading("DEV-1", 4.0, now + Duration::seconds(120))
        .unwrap();
    assert_eq!(fx.monitor.pending_timers(), 0, "回正应撤销在途计时器");

    let fired = fx.monitor.poll(now + Duration::seconds(600)).unwrap();
    assert_eq!(fired, 0, "取消后不得再告警");
    assert!(fx.dispatcher.broadcasts.lock().unwrap().is_empty());

    // 未结违规已被落上 end_time
    assert!(fx.violation_repo.find_open_by_device("DEV-1").unwrap().is_empty());
}

#[test]
fn test_repeated_same_kind_readings_keep_single_timer() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-1", None, false);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-1", 9.0, now).unwrap();
    fx.monitor
        .process_reading("DEV-1", 9.5, now + Duration::seconds(60))
        .unwrap();
    fx.monitor
        .process_reading("DEV-1", 10.0, now + Duration::seconds(120))
        .unwrap();
    assert_eq!(fx.monitor.pending_timers(), 1, "同键至多一个计时器");

    // 首条读数起算的窗口到期才触发 (计时器不被重复读数重置)
    let fired = fx.monitor.poll(now + Duration::seconds(301)).unwrap();
    assert_eq!(fired, 1);
    assert_eq!(fx.dispatcher.broadcasts.lock().unwrap().len(), 1);
}

#[test]
fn test_distinct_kinds_arm_distinct_timers() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-1", None, false);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-1", 7.0, now).unwrap(); // warning_high
    fx.monitor
        .process_reading("DEV-1", 9.0, now + Duration::seconds(30))
        .unwrap(); // critical_high
    assert_eq!(fx.monitor.pending_timers(), 2, "不同等级各自一个计时器");

    let fired = fx.monitor.poll(now + Duration::seconds(400)).unwrap();
    assert_eq!(fired, 2);
    let broadcasts = fx.dispatcher.broadcasts.lock().unwrap();
    assert_eq!(broadcasts.len(), 2);
}

#[test]
fn test_auto_adjust_device_receives_corrective_command() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-AUTO", None, true);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-AUTO", 9.0, now).unwrap();
    fx.monitor.poll(now + Duration::seconds(301)).unwrap();

    let commands = fx.dispatcher.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "devices/DEV-AUTO/control");
    assert_eq!(commands[0].1["command"], "set_temperature");
    assert!((commands[0].1["value"].as_f64().unwrap() - 4.0).abs() < 1e-9, "目标为理想温度");
}

#[test]
fn test_non_capable_device_gets_no_command() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-PLAIN", None, false);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-PLAIN", 9.0, now).unwrap();
    fx.monitor.poll(now + Duration::seconds(301)).unwrap();
    assert!(fx.dispatcher.commands.lock().unwrap().is_empty());
}

#[test]
fn test_initialize_rearms_open_violations_after_restart() {
    let mut fx = setup();
    seed_device(&fx.conn, "DEV-1", None, false);
    let now = Utc::now();

    // 异常读数落下开放违规行后, 进程"崩溃"
    fx.monitor.process_reading("DEV-1", 9.0, now).unwrap();
    assert_eq!(fx.monitor.pending_timers(), 1);

    // 新引擎实例: 内存到期表为空, 从存储恢复
    let device_repo = Arc::new(IotDeviceRepository::from_connection(Arc::clone(&fx.conn)));
    let collection_repo = Arc::new(CollectionRepository::from_connection(Arc::clone(&fx.conn)));
    let mut restarted = TemperatureMonitor::new(
        MonitorSettings::default(),
        device_repo,
        Arc::clone(&fx.reading_repo),
        Arc::clone(&fx.violation_repo),
        collection_repo,
        fx.dispatcher.clone(),
        fx.dispatcher.clone(),
    );
    assert_eq!(restarted.pending_timers(), 0);

    let rearmed = restarted.initialize().unwrap();
    assert_eq!(rearmed, 1, "未解除违规重新挂起");

    // 窗口按原违规起点计算, 到期即触发
    let fired = restarted.poll(now + Duration::seconds(301)).unwrap();
    assert_eq!(fired, 1, "重启不丢告警");
    assert_eq!(fx.dispatcher.broadcasts.lock().unwrap().len(), 1);
    assert_eq!(restarted.pending_timers(), 0);
}

#[test]
fn test_collection_cooling_record_accumulates_logs_and_violations() {
    let mut fx = setup();
    seed_center(&fx.conn, "CEN-1", GeoPoint::new(-1.2, 36.8), 0.0);
    seed_pending_collection(
        &fx.conn,
        "COL-1",
        "CEN-1",
        vec![make_stop("MB-1", "F-1", 40.0, GeoPoint::new(-1.21, 36.81))],
        Utc::now(),
    );
    seed_device(&fx.conn, "DEV-1", Some("COL-1"), false);
    let now = Utc::now();

    fx.monitor.process_reading("DEV-1", 5.0, now).unwrap();
    fx.monitor
        .process_reading("DEV-1", 9.0, now + Duration::seconds(60))
        .unwrap();
    fx.monitor.poll(now + Duration::seconds(400)).unwrap();

    let collection_repo = CollectionRepository::from_connection(Arc::clone(&fx.conn));
    let collection = collection_repo.get_by_id("COL-1").unwrap();
    assert_eq!(collection.cooling.temperature_logs.len(), 2, "每条读数入冷链日志");
    assert_eq!(collection.cooling.initial_temperature, Some(5.0));
    assert_eq!(collection.cooling.final_temperature, Some(9.0));
    assert_eq!(collection.cooling.violations.len(), 1, "确认违规追加到冷链记录");
    assert_eq!(collection.cooling.violations[0].temperature, 9.0);
}
