//! 스키마 마이그레이션.
//!
//! 버전 기반 SQLite 스키마 관리.

use rusqlite::Connection;
use tracing::{debug, info};

/// 현재 스키마 버전
const CURRENT_VERSION: u32 = 3;

/// 스키마 마이그레이션 실행
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = get_version(conn)?;
    info!("현재 스키마 버전: {current}, 목표: {CURRENT_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    if current < 2 {
        migrate_v2(conn)?;
    }

    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// 현재 스키마 버전 조회
fn get_version(conn: &Connection) -> Result<u32, rusqlite::Error> {
    let result: Result<u32, _> = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    );
    result.or(Ok(0))
}

/// V1: 인벤토리 (clusters, nodes, templates)
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    debug!("마이그레이션 V1 실행: 인벤토리 테이블");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS clusters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            host TEXT NOT NULL,
            port INTEGER NOT NULL DEFAULT 8006,
            token_id TEXT NOT NULL,
            token_secret TEXT NOT NULL,
            verify_tls INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            max_vms_per_node INTEGER NOT NULL,
            max_concurrent_sessions INTEGER NOT NULL,
            cpu_overcommit_ratio REAL NOT NULL DEFAULT 1.0,
            memory_overcommit_ratio REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS nodes (
            cluster_id INTEGER NOT NULL REFERENCES clusters(id),
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            max_vms INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (cluster_id, name)
        );

        CREATE TABLE IF NOT EXISTS templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            os_type TEXT NOT NULL,
            protocol TEXT NOT NULL,
            hypervisor_template_id INTEGER NOT NULL,
            cpu_cores INTEGER NOT NULL,
            memory_mb INTEGER NOT NULL,
            disk_gb INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            guest_username TEXT,
            guest_password TEXT,
            port_override INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    info!("마이그레이션 V1 완료");
    Ok(())
}

/// V2: sessions 테이블
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    debug!("마이그레이션 V2 실행: sessions 테이블");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            template_id INTEGER NOT NULL REFERENCES templates(id),
            cluster_id INTEGER NOT NULL REFERENCES clusters(id),
            node TEXT NOT NULL,
            vm_id INTEGER,
            guest_ip TEXT,
            gateway_connection_id TEXT,
            status TEXT NOT NULL,
            session_type TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            status_note TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user_status ON sessions(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_sessions_node_status ON sessions(cluster_id, node, status);
        CREATE INDEX IF NOT EXISTS idx_sessions_status_expires ON sessions(status, expires_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_cluster_vm ON sessions(cluster_id, vm_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;

    info!("마이그레이션 V2 완료");
    Ok(())
}

/// V3: tasks 작업 큐 테이블
fn migrate_v3(conn: &Connection) -> Result<(), rusqlite::Error> {
    debug!("마이그레이션 V3 실행: tasks 테이블");

    conn.execute_batch(
        "
        -- 상태: queued → running → done | failed (재시도 시 running → queued)
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'queued',
            attempt INTEGER NOT NULL DEFAULT 1,
            run_at TEXT NOT NULL,
            exclusivity_key TEXT,
            leased_by TEXT,
            lease_expires_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            finished_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_state_run_at ON tasks(state, run_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_key_state ON tasks(exclusivity_key, state);
        CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )?;

    info!("마이그레이션 V3 완료");
    Ok(())
}
