// ==========================================
// 交奶聚合引擎集成测试
// ==========================================
// 测试目标: 加权合并公式、窗口超龄换批、零量拒绝、事务原子性
// ==========================================


use chrono::{Duration, Utc};
use maziwa_chain::config::AggregatorSettings;
use maziwa_chain::domain::{CustodyHolder, GeoPoint};
use maziwa_chain::engine::{CollectionAggregator, EngineError};
use maziwa_chain::repository::AggregateBatchRepository;
use std::sync::Arc;
use test_helpers::{create_test_db, open_shared, sample_metrics, seed_center};

fn setup() -> (tempfile::NamedTempFile, CollectionAggregator, Arc<AggregateBatchRepository>) {
    let (temp_file, db_path) = create_test_db().expect("测试库创建失败");
    let conn = open_shared(&db_path).expect("连接打开失败");
    seed_center(&conn, "CEN-1", GeoPoint::new(-1.2, 36.8), 50.0);
    let repo = Arc::new(AggregateBatchRepository::from_connection(conn));
    let aggregator = CollectionAggregator::new(AggregatorSettings::default(), Arc::clone(&repo));
    (temp_file, aggregator, repo)
}

#[test]
fn test_two_deliveries_weighted_average() {
    let (_tmp, aggregator, repo) = setup();
    let now = Utc::now();
    let staff = CustodyHolder::center_staff("U-1");

    let (first, _) = aggregator
        .add_delivery("CEN-1", "F-1", 100.0, 45.0, sample_metrics(3.0, 0.10), staff.clone(), now)
        .expect("首笔交奶应成功");
    assert!((first.total_quantity_l - 100.0).abs() < 1e-9);
    assert!((first.quality.fat_content - 3.0).abs() < 1e-9);

    let (second, _) = aggregator
        .add_delivery("CEN-1", "F-2", 50.0, 50.0, sample_metrics(5.0, 0.16), staff, now)
        .expect("第二笔交奶应成功");

    assert_eq!(second.batch_number, first.batch_number, "窗口内应合入同一批次");
    assert!((second.total_quantity_l - 150.0).abs() < 1e-9);
    // (3.0×100 + 5.0×50) / 150
    assert!((second.quality.fat_content - 550.0 / 150.0).abs() < 1e-9, "脂肪率应按量加权");
    assert!((second.quality.acidity - (0.10 * 100.0 + 0.16 * 50.0) / 150.0).abs() < 1e-9);
    // 总成本 = 100×45 + 50×50
    assert!((second.total_cost - 7_000.0).abs() < 1e-9);

    assert_eq!(repo.count_deliveries(&second.batch_number).unwrap(), 2);
}

#[test]
fn test_adulteration_flag_is_or() {
    let (_tmp, aggregator, _repo) = setup();
    let now = Utc::now();
    let staff = CustodyHolder::center_staff("U-1");

    let mut tainted = sample_metrics(3.5, 0.11);
    tainted.adulteration_test = true;

    aggregator
        .add_delivery("CEN-1", "F-1", 60.0, 45.0, sample_metrics(3.5, 0.11), staff.clone(), now)
        .unwrap();
    let (agg, _) = aggregator
        .add_delivery("CEN-1", "F-2", 20.0, 45.0, tainted, staff.clone(), now)
        .unwrap();
    assert!(agg.quality.adulteration_test, "任何一笔掺假应污染聚合");

    let (agg, _) = aggregator
        .add_delivery("CEN-1", "F-3", 40.0, 45.0, sample_metrics(3.5, 0.11), staff, now)
        .unwrap();
    assert!(agg.quality.adulteration_test, "后续清白交奶不可洗白标记");
}

#[test]
fn test_zero_quantity_rejected_before_persistence() {
    let (_tmp, aggregator, repo) = setup();
    let result = aggregator.add_delivery(
        "CEN-1",
        "F-1",
        0.0,
        45.0,
        sample_metrics(3.5, 0.11),
        CustodyHolder::center_staff("U-1"),
        Utc::now(),
    );
    assert!(matches!(result, Err(EngineError::Validation(_))), "零量交奶应被拒绝");
    assert!(
        repo.find_open_for_center("CEN-1").unwrap().is_none(),
        "拒绝发生在任何持久化之前"
    );
}

#[test]
fn test_expired_window_opens_new_batch() {
    let (_tmp, aggregator, _repo) = setup();
    let staff = CustodyHolder::center_staff("U-1");
    let past = Utc::now() - Duration::hours(25);

    let (old, _) = aggregator
        .add_delivery("CEN-1", "F-1", 80.0, 45.0, sample_metrics(3.2, 0.12), staff.clone(), past)
        .unwrap();

    // 25 小时后的交奶应开新批次, 不并入旧窗口
    let (fresh, _) = aggregator
        .add_delivery("CEN-1", "F-2", 30.0, 45.0, sample_metrics(4.0, 0.10), staff, Utc::now())
        .unwrap();

    assert_ne!(fresh.batch_number, old.batch_number, "超龄窗口应换新批次号");
    assert!((fresh.total_quantity_l - 30.0).abs() < 1e-9, "新批次从零累计");
    assert!((fresh.quality.fat_content - 4.0).abs() < 1e-9);
}

#[test]
fn test_delivery_visible_only_with_aggregate() {
    // 单事务保证: 聚合可见则交奶记录也可见
    let (_tmp, aggregator, repo) = setup();
    let (agg, delivery) = aggregator
        .add_delivery(
            "CEN-1",
            "F-1",
            25.0,
            48.0,
            sample_metrics(3.9, 0.09),
            CustodyHolder::center_staff("U-1"),
            Utc::now(),
        )
        .unwrap();

    let reread = repo.find_by_number(&agg.batch_number).unwrap().expect("聚合应已落库");
    assert_eq!(reread.revision, 0, "新批次初始版本为 0");
    assert_eq!(repo.count_deliveries(&delivery.batch_number).unwrap(), 1);
}

#[test]
fn test_revision_increments_per_merge() {
    let (_tmp, aggregator, repo) = setup();
    let now = Utc::now();
    let staff = CustodyHolder::center_staff("U-1");
    for i in 0..3 {
        aggregator
            .add_delivery(
                "CEN-1",
                &format!("F-{}", i),
                10.0,
                45.0,
                sample_metrics(3.5, 0.11),
                staff.clone(),
                now,
            )
            .unwrap();
    }
    let agg = repo.find_open_for_center("CEN-1").unwrap().unwrap();
    assert_eq!(agg.revision, 2, "首笔建档后每次合并版本 +1");
}
