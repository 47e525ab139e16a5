use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::{thread, time::Duration};

use crate::settings::SettingsStore;

/** \brief 默认数据库文件名，可通过 WATCHBRIDGE_DB 覆盖。 */
pub const DEFAULT_DB_PATH: &str = "watchbridge.db";

/**
 * \brief 解析数据库路径。
 */
pub fn default_db_path() -> String {
    std::env::var("WATCHBRIDGE_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/**
 * \brief 打开默认数据库文件。
 */
pub fn open_default_db() -> Result<Connection> {
    open_db(&default_db_path())
}

/**
 * \brief 打开指定路径的数据库并设置忙等待。
 */
pub fn open_db(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, if value { "1" } else { "0" }],
        )
    })?;
    Ok(())
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

/**
 * \brief 读取全部设置键值。
 */
pub fn load_settings_entries(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key ASC")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

/**
 * \brief 写入单个设置键。
 */
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

/**
 * \brief 删除单个设置键。
 */
pub fn remove_setting(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM settings WHERE key=?1", params![key]))?;
    Ok(())
}

/**
 * \brief 基于 SQLite `settings` 表的设置存储。
 */
pub struct SqliteSettingsStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingsStore {
    /**
     * \brief 包装已打开的连接并执行迁移。
     */
    pub fn new(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /**
     * \brief 打开默认路径的数据库。
     */
    pub fn open_default() -> Result<Self> {
        Self::new(open_default_db()?)
    }

    pub fn telemetry_enabled(&self) -> Result<bool> {
        self.with_conn(get_telemetry_enabled)
    }

    pub fn set_telemetry_enabled(&self, enabled: bool) -> Result<()> {
        self.with_conn(|conn| set_telemetry_enabled(conn, enabled))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection poisoned"))?;
        f(&guard)
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn entries(&self) -> Result<BTreeMap<String, String>> {
        self.with_conn(load_settings_entries)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| set_setting(conn, key, value))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| remove_setting(conn, key))
    }
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并进行线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{self, Settings, KEY_API_KEY, KEY_PROVIDER};

    fn mem_store() -> SqliteSettingsStore {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        SqliteSettingsStore::new(conn).expect("migrate")
    }

    #[test]
    fn test_set_and_remove_settings() {
        let store = mem_store();
        store.set(KEY_PROVIDER, "gemini").expect("set provider");
        store.set(KEY_API_KEY, "AIza-1").expect("set key");
        store.set(KEY_API_KEY, "AIza-2").expect("overwrite key");

        let entries = store.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get(KEY_API_KEY).map(String::as_str), Some("AIza-2"));

        store.remove(KEY_API_KEY).expect("remove");
        store.remove("missing").expect("remove missing is a no-op");
        let entries = store.entries().expect("entries");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_settings_round_trip_through_sqlite() {
        let store = mem_store();
        let snapshot = Settings {
            provider: Some("openai".into()),
            api_key: Some("sk-1".into()),
            model: Some("gpt-4o".into()),
            ..Settings::default()
        };
        settings::save(&store, &snapshot).expect("save");
        assert_eq!(settings::load(&store).expect("load"), snapshot);

        settings::clear(&store).expect("clear");
        assert_eq!(settings::load(&store).expect("load"), Settings::default());
    }

    #[test]
    fn test_telemetry_flag_is_separate_from_settings() {
        let store = mem_store();
        assert!(!store.telemetry_enabled().expect("default flag"));
        store.set_telemetry_enabled(true).expect("enable");
        assert!(store.telemetry_enabled().expect("flag"));
        assert!(store.entries().expect("entries").is_empty());
    }
}
