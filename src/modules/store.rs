//! SQLite-backed persistence for monitors, private keys, logs, the token
//! metadata cache and process configuration.
//!
//! All cross-component references go through record ids; the store is the
//! single serialization point for persisted state. Constraint violations
//! surface as `Validation`, everything else as `Storage`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, SqlitePool};
use std::str::FromStr;

use crate::modules::error_handling::{map_db_err, SentinelError, SentinelResult};

// ---------------------------------------------------------------------------
// Typed columns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MonitorKind {
    Sell,
    Buy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionMode {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MonitorStatus {
    Stopped,
    Monitoring,
    Error,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PriceType {
    Price,
    MarketCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MonitorType {
    Normal,
    Swing,
}

impl Default for MonitorType {
    fn default() -> Self {
        MonitorType::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ConfigType {
    String,
    Number,
    Boolean,
    Json,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PrivateKeyRecord {
    pub id: i64,
    pub nickname: String,
    pub secret: String,
    pub public_key: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub id: i64,
    pub name: String,
    pub private_key_id: i64,
    pub token_address: String,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub token_logo_uri: Option<String>,
    pub token_decimals: Option<i64>,
    pub kind: MonitorKind,
    pub threshold: f64,
    pub percentage: f64,
    pub execution_mode: ExecutionMode,
    pub minimum_hold_usd: f64,
    pub pre_sniper: bool,
    pub max_buy_usd: f64,
    pub accumulated_buy_usd: f64,
    pub webhook_url: String,
    pub check_interval_seconds: i64,
    pub status: MonitorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_price: Option<f64>,
    pub last_market_cap: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SwingMonitorRecord {
    pub id: i64,
    pub name: String,
    pub private_key_id: i64,
    pub watch_token_address: String,
    pub watch_token_name: Option<String>,
    pub watch_token_symbol: Option<String>,
    pub watch_token_logo_uri: Option<String>,
    pub watch_token_decimals: Option<i64>,
    pub trade_token_address: String,
    pub trade_token_name: Option<String>,
    pub trade_token_symbol: Option<String>,
    pub trade_token_logo_uri: Option<String>,
    pub trade_token_decimals: Option<i64>,
    pub price_type: PriceType,
    pub sell_threshold: f64,
    pub buy_threshold: f64,
    pub sell_percentage: f64,
    pub buy_percentage: f64,
    pub all_in_threshold_usd: f64,
    pub webhook_url: String,
    pub check_interval_seconds: i64,
    pub status: MonitorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_watch_price: Option<f64>,
    pub last_watch_market_cap: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonitorLogRecord {
    pub id: i64,
    pub monitor_record_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub threshold_reached: bool,
    pub action_taken: Option<String>,
    pub tx_hash: Option<String>,
    pub monitor_type: MonitorType,
    pub price_type: Option<PriceType>,
    pub current_value: Option<f64>,
    pub sell_threshold: Option<f64>,
    pub buy_threshold: Option<f64>,
    pub action_type: Option<String>,
    pub watch_token_address: Option<String>,
    pub trade_token_address: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub config_type: ConfigType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Insert / update parameter bundles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MonitorParams {
    pub name: String,
    pub private_key_id: i64,
    pub token_address: String,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
    pub token_logo_uri: Option<String>,
    pub token_decimals: Option<i64>,
    pub kind: MonitorKind,
    pub threshold: f64,
    pub percentage: f64,
    pub execution_mode: ExecutionMode,
    pub minimum_hold_usd: f64,
    pub pre_sniper: bool,
    pub max_buy_usd: f64,
    pub webhook_url: String,
    pub check_interval_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SwingMonitorParams {
    pub name: String,
    pub private_key_id: i64,
    pub watch_token_address: String,
    pub watch_token_name: Option<String>,
    pub watch_token_symbol: Option<String>,
    pub watch_token_logo_uri: Option<String>,
    pub watch_token_decimals: Option<i64>,
    pub trade_token_address: String,
    pub trade_token_name: Option<String>,
    pub trade_token_symbol: Option<String>,
    pub trade_token_logo_uri: Option<String>,
    pub trade_token_decimals: Option<i64>,
    pub price_type: PriceType,
    pub sell_threshold: f64,
    pub buy_threshold: f64,
    pub sell_percentage: f64,
    pub buy_percentage: f64,
    pub all_in_threshold_usd: f64,
    pub webhook_url: String,
    pub check_interval_seconds: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewMonitorLog {
    pub monitor_record_id: Option<i64>,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub threshold_reached: bool,
    pub action_taken: Option<String>,
    pub tx_hash: Option<String>,
    pub monitor_type: MonitorType,
    pub price_type: Option<PriceType>,
    pub current_value: Option<f64>,
    pub sell_threshold: Option<f64>,
    pub buy_threshold: Option<f64>,
    pub action_type: Option<String>,
    pub watch_token_address: Option<String>,
    pub trade_token_address: Option<String>,
}

/// Filter for the paginated log read.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub monitor_record_id: Option<i64>,
    pub monitor_type: Option<MonitorType>,
    pub action_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub logs: Vec<MonitorLogRecord>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS private_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nickname TEXT NOT NULL,
    secret TEXT NOT NULL,
    public_key TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monitor_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    private_key_id INTEGER NOT NULL REFERENCES private_keys(id),
    token_address TEXT NOT NULL,
    token_name TEXT,
    token_symbol TEXT,
    token_logo_uri TEXT,
    token_decimals INTEGER,
    kind TEXT NOT NULL DEFAULT 'sell',
    threshold REAL NOT NULL,
    percentage REAL NOT NULL,
    execution_mode TEXT NOT NULL DEFAULT 'single',
    minimum_hold_usd REAL NOT NULL DEFAULT 50.0,
    pre_sniper INTEGER NOT NULL DEFAULT 0,
    max_buy_usd REAL NOT NULL DEFAULT 0.0,
    accumulated_buy_usd REAL NOT NULL DEFAULT 0.0,
    webhook_url TEXT NOT NULL,
    check_interval_seconds INTEGER NOT NULL DEFAULT 5,
    status TEXT NOT NULL DEFAULT 'stopped',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_check_at TEXT,
    last_price REAL,
    last_market_cap REAL
);

CREATE TABLE IF NOT EXISTS swing_monitor_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    private_key_id INTEGER NOT NULL REFERENCES private_keys(id),
    watch_token_address TEXT NOT NULL,
    watch_token_name TEXT,
    watch_token_symbol TEXT,
    watch_token_logo_uri TEXT,
    watch_token_decimals INTEGER,
    trade_token_address TEXT NOT NULL,
    trade_token_name TEXT,
    trade_token_symbol TEXT,
    trade_token_logo_uri TEXT,
    trade_token_decimals INTEGER,
    price_type TEXT NOT NULL DEFAULT 'market_cap',
    sell_threshold REAL NOT NULL,
    buy_threshold REAL NOT NULL,
    sell_percentage REAL NOT NULL,
    buy_percentage REAL NOT NULL,
    all_in_threshold_usd REAL NOT NULL DEFAULT 50.0,
    webhook_url TEXT NOT NULL,
    check_interval_seconds INTEGER NOT NULL DEFAULT 5,
    status TEXT NOT NULL DEFAULT 'stopped',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_check_at TEXT,
    last_watch_price REAL,
    last_watch_market_cap REAL
);

CREATE TABLE IF NOT EXISTS monitor_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    monitor_record_id INTEGER,
    timestamp TEXT NOT NULL,
    price REAL,
    market_cap REAL,
    threshold_reached INTEGER NOT NULL DEFAULT 0,
    action_taken TEXT,
    tx_hash TEXT,
    monitor_type TEXT NOT NULL DEFAULT 'normal',
    price_type TEXT,
    current_value REAL,
    sell_threshold REAL,
    buy_threshold REAL,
    action_type TEXT,
    watch_token_address TEXT,
    trade_token_address TEXT
);
CREATE INDEX IF NOT EXISTS idx_monitor_logs_record ON monitor_logs(monitor_record_id);
CREATE INDEX IF NOT EXISTS idx_monitor_logs_timestamp ON monitor_logs(timestamp);

CREATE TABLE IF NOT EXISTS token_meta_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    updated_at REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL,
    description TEXT,
    config_type TEXT NOT NULL DEFAULT 'string',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists.
    pub async fn connect(url: &str) -> SentinelResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(SentinelError::Storage)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database on a single pooled connection. Used by tests.
    pub async fn open_in_memory() -> SentinelResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(SentinelError::Storage)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> SentinelResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Private keys
    // -----------------------------------------------------------------------

    pub async fn create_private_key(
        &self,
        nickname: &str,
        secret: &str,
        public_key: &str,
    ) -> SentinelResult<PrivateKeyRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO private_keys (nickname, secret, public_key, deleted, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(nickname)
        .bind(secret)
        .bind(public_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        self.get_private_key(result.last_insert_rowid())
            .await?
            .ok_or_else(|| SentinelError::NotFound("私钥记录不存在".into()))
    }

    pub async fn update_private_key(
        &self,
        id: i64,
        nickname: &str,
        secret: &str,
        public_key: &str,
    ) -> SentinelResult<()> {
        sqlx::query(
            "UPDATE private_keys SET nickname = ?, secret = ?, public_key = ?, updated_at = ? \
             WHERE id = ? AND deleted = 0",
        )
        .bind(nickname)
        .bind(secret)
        .bind(public_key)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Undeleted key by id.
    pub async fn get_private_key(&self, id: i64) -> SentinelResult<Option<PrivateKeyRecord>> {
        let record = sqlx::query_as::<_, PrivateKeyRecord>(
            "SELECT * FROM private_keys WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_private_keys(&self) -> SentinelResult<Vec<PrivateKeyRecord>> {
        let records = sqlx::query_as::<_, PrivateKeyRecord>(
            "SELECT * FROM private_keys WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Nickname uniqueness check over the undeleted rows, optionally
    /// excluding one id (for updates).
    pub async fn find_private_key_by_nickname(
        &self,
        nickname: &str,
        exclude_id: Option<i64>,
    ) -> SentinelResult<Option<PrivateKeyRecord>> {
        let record = sqlx::query_as::<_, PrivateKeyRecord>(
            "SELECT * FROM private_keys WHERE nickname = ? AND deleted = 0 AND id != ?",
        )
        .bind(nickname)
        .bind(exclude_id.unwrap_or(-1))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn find_private_key_by_secret(
        &self,
        secret: &str,
    ) -> SentinelResult<Option<PrivateKeyRecord>> {
        let record = sqlx::query_as::<_, PrivateKeyRecord>(
            "SELECT * FROM private_keys WHERE secret = ? AND deleted = 0",
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Live monitor rows (both families) still referencing this key.
    pub async fn monitors_using_key(&self, private_key_id: i64) -> SentinelResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM monitor_records WHERE private_key_id = ?) \
                  + (SELECT COUNT(*) FROM swing_monitor_records WHERE private_key_id = ?)",
        )
        .bind(private_key_id)
        .bind(private_key_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Logical delete; the row stays for audit purposes.
    pub async fn mark_private_key_deleted(&self, id: i64) -> SentinelResult<()> {
        sqlx::query("UPDATE private_keys SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Simple monitors
    // -----------------------------------------------------------------------

    pub async fn create_monitor(&self, params: &MonitorParams) -> SentinelResult<MonitorRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO monitor_records (name, private_key_id, token_address, token_name, \
             token_symbol, token_logo_uri, token_decimals, kind, threshold, percentage, \
             execution_mode, minimum_hold_usd, pre_sniper, max_buy_usd, accumulated_buy_usd, \
             webhook_url, check_interval_seconds, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0.0, ?, ?, 'stopped', ?, ?)",
        )
        .bind(&params.name)
        .bind(params.private_key_id)
        .bind(&params.token_address)
        .bind(&params.token_name)
        .bind(&params.token_symbol)
        .bind(&params.token_logo_uri)
        .bind(params.token_decimals)
        .bind(params.kind)
        .bind(params.threshold)
        .bind(params.percentage)
        .bind(params.execution_mode)
        .bind(params.minimum_hold_usd)
        .bind(params.pre_sniper)
        .bind(params.max_buy_usd)
        .bind(&params.webhook_url)
        .bind(params.check_interval_seconds)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        self.get_monitor(result.last_insert_rowid())
            .await?
            .ok_or_else(|| SentinelError::NotFound("监控记录不存在".into()))
    }

    pub async fn update_monitor(&self, id: i64, params: &MonitorParams) -> SentinelResult<()> {
        sqlx::query(
            "UPDATE monitor_records SET name = ?, private_key_id = ?, token_address = ?, \
             token_name = ?, token_symbol = ?, token_logo_uri = ?, token_decimals = ?, \
             kind = ?, threshold = ?, percentage = ?, execution_mode = ?, minimum_hold_usd = ?, \
             pre_sniper = ?, max_buy_usd = ?, webhook_url = ?, check_interval_seconds = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&params.name)
        .bind(params.private_key_id)
        .bind(&params.token_address)
        .bind(&params.token_name)
        .bind(&params.token_symbol)
        .bind(&params.token_logo_uri)
        .bind(params.token_decimals)
        .bind(params.kind)
        .bind(params.threshold)
        .bind(params.percentage)
        .bind(params.execution_mode)
        .bind(params.minimum_hold_usd)
        .bind(params.pre_sniper)
        .bind(params.max_buy_usd)
        .bind(&params.webhook_url)
        .bind(params.check_interval_seconds)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    pub async fn get_monitor(&self, id: i64) -> SentinelResult<Option<MonitorRecord>> {
        let record =
            sqlx::query_as::<_, MonitorRecord>("SELECT * FROM monitor_records WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    pub async fn list_monitors(&self) -> SentinelResult<Vec<MonitorRecord>> {
        let records =
            sqlx::query_as::<_, MonitorRecord>("SELECT * FROM monitor_records ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(records)
    }

    pub async fn list_monitors_by_status(
        &self,
        status: MonitorStatus,
    ) -> SentinelResult<Vec<MonitorRecord>> {
        let records = sqlx::query_as::<_, MonitorRecord>(
            "SELECT * FROM monitor_records WHERE status = ? ORDER BY id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn update_monitor_status(
        &self,
        id: i64,
        status: MonitorStatus,
    ) -> SentinelResult<()> {
        sqlx::query("UPDATE monitor_records SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomic last-seen update written once per worker iteration.
    pub async fn update_monitor_observation(
        &self,
        id: i64,
        price: f64,
        market_cap: f64,
    ) -> SentinelResult<()> {
        sqlx::query(
            "UPDATE monitor_records SET last_check_at = ?, last_price = ?, last_market_cap = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(price)
        .bind(market_cap)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The persisted column is the authoritative cumulative-buy counter; the
    /// add happens in the database so concurrent readers never see a torn
    /// value.
    pub async fn add_accumulated_buy_usd(&self, id: i64, delta_usd: f64) -> SentinelResult<()> {
        sqlx::query(
            "UPDATE monitor_records SET accumulated_buy_usd = accumulated_buy_usd + ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(delta_usd)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_monitor(&self, id: i64) -> SentinelResult<bool> {
        let result = sqlx::query("DELETE FROM monitor_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Swing monitors
    // -----------------------------------------------------------------------

    pub async fn create_swing_monitor(
        &self,
        params: &SwingMonitorParams,
    ) -> SentinelResult<SwingMonitorRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO swing_monitor_records (name, private_key_id, watch_token_address, \
             watch_token_name, watch_token_symbol, watch_token_logo_uri, watch_token_decimals, \
             trade_token_address, trade_token_name, trade_token_symbol, trade_token_logo_uri, \
             trade_token_decimals, price_type, sell_threshold, buy_threshold, sell_percentage, \
             buy_percentage, all_in_threshold_usd, webhook_url, check_interval_seconds, status, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'stopped', ?, ?)",
        )
        .bind(&params.name)
        .bind(params.private_key_id)
        .bind(&params.watch_token_address)
        .bind(&params.watch_token_name)
        .bind(&params.watch_token_symbol)
        .bind(&params.watch_token_logo_uri)
        .bind(params.watch_token_decimals)
        .bind(&params.trade_token_address)
        .bind(&params.trade_token_name)
        .bind(&params.trade_token_symbol)
        .bind(&params.trade_token_logo_uri)
        .bind(params.trade_token_decimals)
        .bind(params.price_type)
        .bind(params.sell_threshold)
        .bind(params.buy_threshold)
        .bind(params.sell_percentage)
        .bind(params.buy_percentage)
        .bind(params.all_in_threshold_usd)
        .bind(&params.webhook_url)
        .bind(params.check_interval_seconds)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        self.get_swing_monitor(result.last_insert_rowid())
            .await?
            .ok_or_else(|| SentinelError::NotFound("波段监控记录不存在".into()))
    }

    pub async fn update_swing_monitor(
        &self,
        id: i64,
        params: &SwingMonitorParams,
    ) -> SentinelResult<()> {
        sqlx::query(
            "UPDATE swing_monitor_records SET name = ?, private_key_id = ?, \
             watch_token_address = ?, watch_token_name = ?, watch_token_symbol = ?, \
             watch_token_logo_uri = ?, watch_token_decimals = ?, trade_token_address = ?, \
             trade_token_name = ?, trade_token_symbol = ?, trade_token_logo_uri = ?, \
             trade_token_decimals = ?, price_type = ?, sell_threshold = ?, buy_threshold = ?, \
             sell_percentage = ?, buy_percentage = ?, all_in_threshold_usd = ?, webhook_url = ?, \
             check_interval_seconds = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&params.name)
        .bind(params.private_key_id)
        .bind(&params.watch_token_address)
        .bind(&params.watch_token_name)
        .bind(&params.watch_token_symbol)
        .bind(&params.watch_token_logo_uri)
        .bind(params.watch_token_decimals)
        .bind(&params.trade_token_address)
        .bind(&params.trade_token_name)
        .bind(&params.trade_token_symbol)
        .bind(&params.trade_token_logo_uri)
        .bind(params.trade_token_decimals)
        .bind(params.price_type)
        .bind(params.sell_threshold)
        .bind(params.buy_threshold)
        .bind(params.sell_percentage)
        .bind(params.buy_percentage)
        .bind(params.all_in_threshold_usd)
        .bind(&params.webhook_url)
        .bind(params.check_interval_seconds)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    pub async fn get_swing_monitor(&self, id: i64) -> SentinelResult<Option<SwingMonitorRecord>> {
        let record = sqlx::query_as::<_, SwingMonitorRecord>(
            "SELECT * FROM swing_monitor_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_swing_monitors(&self) -> SentinelResult<Vec<SwingMonitorRecord>> {
        let records = sqlx::query_as::<_, SwingMonitorRecord>(
            "SELECT * FROM swing_monitor_records ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_swing_monitors_by_status(
        &self,
        status: MonitorStatus,
    ) -> SentinelResult<Vec<SwingMonitorRecord>> {
        let records = sqlx::query_as::<_, SwingMonitorRecord>(
            "SELECT * FROM swing_monitor_records WHERE status = ? ORDER BY id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn update_swing_monitor_status(
        &self,
        id: i64,
        status: MonitorStatus,
    ) -> SentinelResult<()> {
        sqlx::query("UPDATE swing_monitor_records SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_swing_observation(
        &self,
        id: i64,
        watch_price: f64,
        watch_market_cap: f64,
    ) -> SentinelResult<()> {
        sqlx::query(
            "UPDATE swing_monitor_records SET last_check_at = ?, last_watch_price = ?, \
             last_watch_market_cap = ?, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(watch_price)
        .bind(watch_market_cap)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_swing_monitor(&self, id: i64) -> SentinelResult<bool> {
        let result = sqlx::query("DELETE FROM swing_monitor_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Decimals lookup across every monitor table referencing the token.
    /// Used by the trader before touching the network.
    pub async fn find_token_decimals(&self, token_address: &str) -> SentinelResult<Option<i64>> {
        let decimals: Option<i64> = sqlx::query_scalar(
            "SELECT token_decimals FROM monitor_records \
             WHERE token_address = ? AND token_decimals IS NOT NULL \
             UNION ALL \
             SELECT watch_token_decimals FROM swing_monitor_records \
             WHERE watch_token_address = ? AND watch_token_decimals IS NOT NULL \
             UNION ALL \
             SELECT trade_token_decimals FROM swing_monitor_records \
             WHERE trade_token_address = ? AND trade_token_decimals IS NOT NULL \
             LIMIT 1",
        )
        .bind(token_address)
        .bind(token_address)
        .bind(token_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(decimals)
    }

    /// Token addresses watched by the given running monitor ids; feeds the
    /// change-filter cleanup.
    pub async fn token_addresses_for_monitors(
        &self,
        simple_ids: &[i64],
        swing_ids: &[i64],
    ) -> SentinelResult<Vec<String>> {
        let mut addresses = Vec::new();
        for id in simple_ids {
            if let Some(record) = self.get_monitor(*id).await? {
                addresses.push(record.token_address);
            }
        }
        for id in swing_ids {
            if let Some(record) = self.get_swing_monitor(*id).await? {
                addresses.push(record.watch_token_address);
            }
        }
        Ok(addresses)
    }

    // -----------------------------------------------------------------------
    // Monitor logs
    // -----------------------------------------------------------------------

    pub async fn append_log(&self, log: &NewMonitorLog) -> SentinelResult<i64> {
        let result = sqlx::query(
            "INSERT INTO monitor_logs (monitor_record_id, timestamp, price, market_cap, \
             threshold_reached, action_taken, tx_hash, monitor_type, price_type, current_value, \
             sell_threshold, buy_threshold, action_type, watch_token_address, trade_token_address) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.monitor_record_id)
        .bind(Utc::now())
        .bind(log.price)
        .bind(log.market_cap)
        .bind(log.threshold_reached)
        .bind(&log.action_taken)
        .bind(&log.tx_hash)
        .bind(log.monitor_type)
        .bind(log.price_type)
        .bind(log.current_value)
        .bind(log.sell_threshold)
        .bind(log.buy_threshold)
        .bind(&log.action_type)
        .bind(&log.watch_token_address)
        .bind(&log.trade_token_address)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    fn push_log_filter(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: &LogFilter) {
        if let Some(record_id) = filter.monitor_record_id {
            qb.push(" AND monitor_record_id = ").push_bind(record_id);
        }
        if let Some(monitor_type) = filter.monitor_type {
            qb.push(" AND monitor_type = ").push_bind(monitor_type);
        }
        if let Some(action_types) = &filter.action_types {
            if !action_types.is_empty() {
                qb.push(" AND action_type IN (");
                let mut separated = qb.separated(", ");
                for action_type in action_types {
                    separated.push_bind(action_type.clone());
                }
                qb.push(")");
            }
        }
    }

    /// Newest-first page of logs matching the filter.
    pub async fn logs_page(
        &self,
        filter: &LogFilter,
        page: i64,
        per_page: i64,
    ) -> SentinelResult<LogPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM monitor_logs WHERE 1=1");
        Self::push_log_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM monitor_logs WHERE 1=1");
        Self::push_log_filter(&mut qb, filter);
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind((page - 1) * per_page);
        let logs = qb
            .build_query_as::<MonitorLogRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(LogPage {
            logs,
            total,
            page,
            per_page,
        })
    }

    /// Deletes this record's logs, or every log when `monitor_record_id` is
    /// None. Returns the number of deleted rows.
    pub async fn clear_logs(&self, monitor_record_id: Option<i64>) -> SentinelResult<u64> {
        let result = match monitor_record_id {
            Some(id) => {
                sqlx::query("DELETE FROM monitor_logs WHERE monitor_record_id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM monitor_logs").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    /// Deletes the normal-monitor logs of one record (record deletion path).
    pub async fn clear_monitor_logs(&self, monitor_record_id: i64) -> SentinelResult<u64> {
        let result = sqlx::query(
            "DELETE FROM monitor_logs WHERE monitor_record_id = ? AND monitor_type = 'normal'",
        )
        .bind(monitor_record_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes the swing logs of one swing record. Simple and swing ids live
    /// in different tables, so the type qualifier keeps them apart.
    pub async fn clear_swing_logs(&self, monitor_record_id: i64) -> SentinelResult<u64> {
        let result = sqlx::query(
            "DELETE FROM monitor_logs WHERE monitor_record_id = ? AND monitor_type = 'swing'",
        )
        .bind(monitor_record_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------------
    // Token metadata cache
    // -----------------------------------------------------------------------

    pub async fn meta_cache_get(&self, address: &str) -> SentinelResult<Option<String>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM token_meta_cache WHERE address = ?")
                .bind(address)
                .fetch_optional(&self.pool)
                .await?;
        Ok(data)
    }

    pub async fn meta_cache_put(&self, address: &str, data: &str) -> SentinelResult<()> {
        sqlx::query(
            "INSERT INTO token_meta_cache (address, data, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(address) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(address)
        .bind(data)
        .bind(Utc::now().timestamp() as f64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Config rows
    // -----------------------------------------------------------------------

    pub async fn config_get(&self, key: &str) -> SentinelResult<Option<ConfigRecord>> {
        let record = sqlx::query_as::<_, ConfigRecord>("SELECT * FROM configs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn config_set(
        &self,
        key: &str,
        value: &str,
        description: &str,
        config_type: ConfigType,
    ) -> SentinelResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO configs (key, value, description, config_type, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             description = excluded.description, config_type = excluded.config_type, \
             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(config_type)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seeding helper; never overwrites an operator-set value.
    pub async fn config_put_if_absent(
        &self,
        key: &str,
        value: &str,
        description: &str,
        config_type: ConfigType,
    ) -> SentinelResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO configs (key, value, description, config_type, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(config_type)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn config_all(&self) -> SentinelResult<Vec<ConfigRecord>> {
        let records = sqlx::query_as::<_, ConfigRecord>("SELECT * FROM configs ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn config_delete(&self, key: &str) -> SentinelResult<bool> {
        let result = sqlx::query("DELETE FROM configs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
