// ==========================================
// 牛奶冷链物流系统 - 服务主入口
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批次溯源与冷链物流协调引擎
// ==========================================

use chrono::Utc;
use maziwa_chain::config::ConfigManager;
use maziwa_chain::db::{init_schema, open_sqlite_connection};
use maziwa_chain::engine::{
    CollectionOptimizer, HaversineDirections, NoOpDispatcher, RoutePlanner, TemperatureMonitor,
};
use maziwa_chain::repository::{
    CollectionCenterRepository, CollectionRepository, CoolingViolationRepository,
    IotDeviceRepository, TemperatureReadingRepository, VehicleRepository,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认数据库路径: ~/.local/share/maziwa-chain/maziwa.db (或平台等价目录)
fn get_default_db_path() -> String {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    let dir = base.join("maziwa-chain");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(error = %e, "数据目录创建失败, 退回当前目录");
        return "maziwa.db".to_string();
    }
    dir.join("maziwa.db").to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    maziwa_chain::logging::init();

    tracing::info!("==================================================");
    tracing::info!("牛奶冷链物流系统 - 调度与监控服务");
    tracing::info!("系统版本: {}", maziwa_chain::VERSION);
    tracing::info!("==================================================");

    // 数据库路径 (可用 MAZIWA_DB 覆盖)
    let db_path = std::env::var("MAZIWA_DB").unwrap_or_else(|_| get_default_db_path());
    tracing::info!("使用数据库: {}", db_path);

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;
    let conn = Arc::new(Mutex::new(conn));

    // 配置加载 (config_kv 覆写 + 出厂默认)
    let config = ConfigManager::from_connection(Arc::clone(&conn))
        .map_err(|e| anyhow::anyhow!("配置管理器初始化失败: {}", e))?;
    let settings = config
        .load_settings()
        .map_err(|e| anyhow::anyhow!("配置加载失败: {}", e))?;

    // 仓储
    let collection_repo = Arc::new(CollectionRepository::from_connection(Arc::clone(&conn)));
    let vehicle_repo = Arc::new(VehicleRepository::from_connection(Arc::clone(&conn)));
    let center_repo = Arc::new(CollectionCenterRepository::from_connection(Arc::clone(&conn)));
    let device_repo = Arc::new(IotDeviceRepository::from_connection(Arc::clone(&conn)));
    let reading_repo = Arc::new(TemperatureReadingRepository::from_connection(Arc::clone(&conn)));
    let violation_repo = Arc::new(CoolingViolationRepository::from_connection(Arc::clone(&conn)));

    // 外部协作者: 未接入网关时使用空实现
    let dispatcher = Arc::new(NoOpDispatcher);

    // 引擎
    let route_planner = Arc::new(RoutePlanner::new(
        settings.route,
        Arc::new(HaversineDirections::new(settings.route.fallback_speed_kmh)),
    ));
    let mut optimizer = CollectionOptimizer::new(
        settings.optimizer,
        Arc::clone(&collection_repo),
        vehicle_repo,
        center_repo,
        route_planner,
        dispatcher.clone(),
    );
    let mut monitor = TemperatureMonitor::new(
        settings.monitor,
        device_repo,
        reading_repo,
        violation_repo,
        collection_repo,
        dispatcher.clone(),
        dispatcher,
    );

    let loaded = optimizer
        .initialize(Utc::now())
        .map_err(|e| anyhow::anyhow!("调度队列装载失败: {}", e))?;
    let rearmed = monitor
        .initialize()
        .map_err(|e| anyhow::anyhow!("违规计时恢复失败: {}", e))?;
    tracing::info!(loaded, rearmed, "服务启动完成");

    let stop = optimizer.stop_handle();
    tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("收到停止信号, 当前批次收尾后退出");
                stop.store(true, Ordering::Relaxed);
            }
        }
    });

    // 主循环: 每分钟一轮调度 + 每 10 秒一次违规到期巡检
    let mut optimize_tick = tokio::time::interval(Duration::from_secs(60));
    let mut poll_tick = tokio::time::interval(Duration::from_secs(10));
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        tokio::select! {
            _ = optimize_tick.tick() => {
                let now = Utc::now();
                match optimizer.optimize(now).await {
                    Ok(outcome) => {
                        if outcome.assigned + outcome.rescheduled > 0 {
                            tracing::info!(
                                assigned = outcome.assigned,
                                rescheduled = outcome.rescheduled,
                                "调度轮完成"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "调度轮失败"),
                }
            }
            _ = poll_tick.tick() => {
                match monitor.poll(Utc::now()) {
                    Ok(fired) if fired > 0 => tracing::info!(fired, "违规确认触发"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "违规巡检失败"),
                }
            }
        }
    }

    tracing::info!("服务已退出");
    Ok(())
}
