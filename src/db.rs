// ==========================================
// 牛奶冷链物流系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为, 避免部分模块外键开启/部分不开启
// - 统一 busy_timeout, 减少并发写入时的偶发 busy 错误
// - 提供幂等的 schema 初始化 (测试与首次启动共用)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout (毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要每个连接单独开启
/// - busy_timeout 需要每个连接单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version (若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化全部表结构 (幂等)
///
/// 复杂嵌套结构 (站点列表/路线/冷链记录/在途批次) 以 JSON 文本列存储,
/// 枚举一律存 snake_case 字面值
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS collection_center (
            center_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            village TEXT NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            storage_capacity_l REAL NOT NULL,
            current_stock_l REAL NOT NULL DEFAULT 0,
            village_demand_l REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'open'
        );

        CREATE TABLE IF NOT EXISTS farmer (
            farmer_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            center_id TEXT NOT NULL REFERENCES collection_center(center_id),
            lat REAL NOT NULL,
            lng REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS milk_batch (
            batch_id TEXT PRIMARY KEY,
            farmer_id TEXT NOT NULL REFERENCES farmer(farmer_id),
            center_id TEXT NOT NULL REFERENCES collection_center(center_id),
            quantity_l REAL NOT NULL CHECK (quantity_l > 0),
            fat_content REAL NOT NULL,
            acidity REAL NOT NULL,
            temperature_at_collection REAL NOT NULL,
            lactometer_reading REAL NOT NULL,
            adulteration_test INTEGER NOT NULL DEFAULT 0,
            current_status TEXT NOT NULL DEFAULT 'collected',
            handler_kind TEXT NOT NULL,
            handler_id TEXT NOT NULL,
            handler_model TEXT NOT NULL,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            expiry_time TEXT,
            collected_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_milk_batch_status ON milk_batch(current_status);

        CREATE TABLE IF NOT EXISTS aggregate_batch (
            batch_number TEXT PRIMARY KEY,
            center_id TEXT NOT NULL REFERENCES collection_center(center_id),
            total_quantity_l REAL NOT NULL DEFAULT 0,
            total_cost REAL NOT NULL DEFAULT 0,
            fat_content REAL NOT NULL DEFAULT 0,
            acidity REAL NOT NULL DEFAULT 0,
            temperature_at_collection REAL NOT NULL DEFAULT 0,
            lactometer_reading REAL NOT NULL DEFAULT 0,
            adulteration_test INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'collected',
            window_started_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_aggregate_center_status
            ON aggregate_batch(center_id, status, window_started_at);

        CREATE TABLE IF NOT EXISTS delivery (
            delivery_id TEXT PRIMARY KEY,
            batch_number TEXT NOT NULL REFERENCES aggregate_batch(batch_number),
            farmer_id TEXT NOT NULL,
            center_id TEXT NOT NULL,
            quantity_l REAL NOT NULL CHECK (quantity_l > 0),
            price_per_liter REAL NOT NULL,
            fat_content REAL NOT NULL,
            acidity REAL NOT NULL,
            temperature_at_collection REAL NOT NULL,
            lactometer_reading REAL NOT NULL,
            adulteration_test INTEGER NOT NULL DEFAULT 0,
            handler_kind TEXT NOT NULL,
            handler_id TEXT NOT NULL,
            handler_model TEXT NOT NULL,
            collected_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS collection (
            collection_id TEXT PRIMARY KEY,
            center_id TEXT NOT NULL REFERENCES collection_center(center_id),
            status TEXT NOT NULL DEFAULT 'pending',
            planned_date TEXT NOT NULL,
            actual_date TEXT,
            vehicle_id TEXT,
            urgency_score REAL NOT NULL DEFAULT 0,
            stops_json TEXT NOT NULL DEFAULT '[]',
            route_json TEXT,
            cooling_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_collection_status ON collection(status, planned_date);

        CREATE TABLE IF NOT EXISTS vehicle (
            vehicle_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            plate_number TEXT NOT NULL,
            vehicle_type TEXT NOT NULL DEFAULT 'truck',
            capacity_l REAL NOT NULL,
            committed_l REAL NOT NULL DEFAULT 0,
            driver_name TEXT NOT NULL,
            driver_contact TEXT NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            located_at TEXT,
            status TEXT NOT NULL DEFAULT 'available',
            current_batches_json TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_vehicle_status ON vehicle(status);

        CREATE TABLE IF NOT EXISTS processing_plant (
            plant_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            processing_capacity_l REAL NOT NULL,
            current_stock_l REAL NOT NULL DEFAULT 0,
            expected_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS iot_device (
            device_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            collection_id TEXT,
            capabilities_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS temperature_reading (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL REFERENCES iot_device(device_id),
            temperature REAL NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reading_device ON temperature_reading(device_id, recorded_at);

        CREATE TABLE IF NOT EXISTS cooling_violation (
            violation_id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES iot_device(device_id),
            collection_id TEXT,
            temperature REAL NOT NULL,
            status TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_violation_open
            ON cooling_violation(device_id, end_time);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // 第二次不应报错
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }
}
