//! CRUD passthrough for monitors and private keys.
//!
//! Every mutation is validated before any state changes; invalid input never
//! produces notifications or partial writes. Token metadata is fetched (and
//! permanently cached) when a record is created or its token address
//! changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::signature::Signer;
use tracing::info;

use crate::modules::error_handling::{SentinelError, SentinelResult};
use crate::modules::market_data::{MarketDataClient, TokenMeta};
use crate::modules::native_mint::normalize_native_mint;
use crate::modules::store::{
    ExecutionMode, LogFilter, LogPage, MonitorKind, MonitorParams, MonitorRecord, PriceType,
    PrivateKeyRecord, Store, SwingMonitorParams, SwingMonitorRecord,
};
use crate::modules::trader::parse_private_key;

/// Create/update input for a simple monitor.
#[derive(Debug, Clone)]
pub struct NewSimpleMonitor {
    pub name: String,
    pub private_key_id: i64,
    pub token_address: String,
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

impl Default for NewSimpleMonitor {
    fn default() -> Self {
        Self {
            name: String::new(),
            private_key_id: 0,
            token_address: String::new(),
            kind: MonitorKind::Sell,
            threshold: 0.0,
            percentage: 0.0,
            execution_mode: ExecutionMode::Single,
            minimum_hold_usd: 50.0,
            pre_sniper: false,
            max_buy_usd: 0.0,
            webhook_url: String::new(),
            check_interval_seconds: 5,
        }
    }
}

/// Create/update input for a swing monitor.
#[derive(Debug, Clone)]
pub struct NewSwingMonitor {
    pub name: String,
    pub private_key_id: i64,
    pub watch_token_address: String,
    pub trade_token_address: String,
    pub price_type: PriceType,
    pub sell_threshold: f64,
    pub buy_threshold: f64,
    pub sell_percentage: f64,
    pub buy_percentage: f64,
    pub all_in_threshold_usd: f64,
    pub webhook_url: String,
    pub check_interval_seconds: i64,
}

impl Default for NewSwingMonitor {
    fn default() -> Self {
        Self {
            name: String::new(),
            private_key_id: 0,
            watch_token_address: String::new(),
            trade_token_address: String::new(),
            price_type: PriceType::MarketCap,
            sell_threshold: 0.0,
            buy_threshold: 0.0,
            sell_percentage: 0.0,
            buy_percentage: 0.0,
            all_in_threshold_usd: 50.0,
            webhook_url: String::new(),
            check_interval_seconds: 5,
        }
    }
}

/// Listing view of a private key; the secret never leaves in full.
#[derive(Debug, Clone, Serialize)]
pub struct PrivateKeyInfo {
    pub id: i64,
    pub nickname: String,
    pub public_key: String,
    pub secret_preview: String,
    pub created_at: DateTime<Utc>,
}

pub struct MonitorService {
    store: Store,
    market: Arc<MarketDataClient>,
}

impl MonitorService {
    pub fn new(store: Store, market: Arc<MarketDataClient>) -> Self {
        Self { store, market }
    }

    // -----------------------------------------------------------------------
    // Simple monitors
    // -----------------------------------------------------------------------

    fn validate_simple(params: &NewSimpleMonitor) -> SentinelResult<()> {
        if params.percentage <= 0.0 || params.percentage > 1.0 {
            let message = match params.kind {
                MonitorKind::Sell => "出售比例必须在0-1之间",
                MonitorKind::Buy => "购买比例必须在0-1之间",
            };
            return Err(SentinelError::Validation(message.into()));
        }
        if params.kind == MonitorKind::Buy && params.max_buy_usd < 0.0 {
            return Err(SentinelError::Validation("累计购买上限必须大于等于0".into()));
        }
        if params.threshold <= 0.0 {
            return Err(SentinelError::Validation("阈值必须大于0".into()));
        }
        if params.check_interval_seconds < 1 {
            return Err(SentinelError::Validation("检查间隔必须大于等于1秒".into()));
        }
        if params.minimum_hold_usd < 0.0 {
            return Err(SentinelError::Validation("最低持仓金额必须大于等于0".into()));
        }
        Ok(())
    }

    async fn require_private_key(&self, id: i64) -> SentinelResult<PrivateKeyRecord> {
        self.store
            .get_private_key(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("私钥不存在或已删除".into()))
    }

    async fn fetch_token_meta(&self, token_address: &str) -> Option<TokenMeta> {
        self.market
            .token_meta(normalize_native_mint(token_address))
            .await
    }

    fn monitor_params(params: &NewSimpleMonitor, meta: &TokenMeta) -> MonitorParams {
        MonitorParams {
            name: params.name.clone(),
            private_key_id: params.private_key_id,
            token_address: params.token_address.clone(),
            token_name: meta.name.clone(),
            token_symbol: meta.symbol.clone(),
            token_logo_uri: meta.logo_uri.clone(),
            token_decimals: meta.decimals,
            kind: params.kind,
            threshold: params.threshold,
            percentage: params.percentage,
            execution_mode: params.execution_mode,
            minimum_hold_usd: params.minimum_hold_usd,
            // pre-sniper only means something on the sell branch
            pre_sniper: params.pre_sniper && params.kind == MonitorKind::Sell,
            max_buy_usd: if params.kind == MonitorKind::Buy {
                params.max_buy_usd
            } else {
                0.0
            },
            webhook_url: params.webhook_url.clone(),
            check_interval_seconds: params.check_interval_seconds,
        }
    }

    pub async fn create_simple(&self, params: NewSimpleMonitor) -> SentinelResult<MonitorRecord> {
        Self::validate_simple(&params)?;
        self.require_private_key(params.private_key_id).await?;

        let meta = self.fetch_token_meta(&params.token_address).await.ok_or_else(|| {
            SentinelError::Validation("无法获取Token信息，请检查Token地址是否正确".into())
        })?;

        let record = self
            .store
            .create_monitor(&Self::monitor_params(&params, &meta))
            .await?;
        info!(
            "监控记录创建成功，类型: {:?}，Token: {} ({})",
            record.kind,
            record.token_name.as_deref().unwrap_or("Unknown"),
            record.token_symbol.as_deref().unwrap_or("N/A")
        );
        Ok(record)
    }

    pub async fn update_simple(
        &self,
        id: i64,
        params: NewSimpleMonitor,
    ) -> SentinelResult<MonitorRecord> {
        Self::validate_simple(&params)?;
        let existing = self
            .store
            .get_monitor(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("监控记录不存在".into()))?;
        self.require_private_key(params.private_key_id).await?;

        // Metadata is refetched only when the watched token changed.
        let meta = if existing.token_address != params.token_address {
            self.fetch_token_meta(&params.token_address).await.ok_or_else(|| {
                SentinelError::Validation("无法获取新Token信息，请检查Token地址是否正确".into())
            })?
        } else {
            TokenMeta {
                address: Some(existing.token_address.clone()),
                name: existing.token_name.clone(),
                symbol: existing.token_symbol.clone(),
                logo_uri: existing.token_logo_uri.clone(),
                decimals: existing.token_decimals,
            }
        };

        self.store
            .update_monitor(id, &Self::monitor_params(&params, &meta))
            .await?;
        self.store
            .get_monitor(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("监控记录不存在".into()))
    }

    /// Deletes the record and its logs.
    pub async fn delete_simple(&self, id: i64) -> SentinelResult<()> {
        if self.store.get_monitor(id).await?.is_none() {
            return Err(SentinelError::NotFound("监控记录不存在".into()));
        }
        self.store.clear_monitor_logs(id).await?;
        self.store.delete_monitor(id).await?;
        Ok(())
    }

    pub async fn get_simple(&self, id: i64) -> SentinelResult<Option<MonitorRecord>> {
        self.store.get_monitor(id).await
    }

    pub async fn list_simple(&self) -> SentinelResult<Vec<MonitorRecord>> {
        self.store.list_monitors().await
    }

    // -----------------------------------------------------------------------
    // Swing monitors
    // -----------------------------------------------------------------------

    fn validate_swing(params: &NewSwingMonitor) -> SentinelResult<()> {
        if params.sell_threshold <= params.buy_threshold {
            return Err(SentinelError::Validation("卖出阈值必须大于买入阈值".into()));
        }
        if params.sell_percentage <= 0.0 || params.sell_percentage > 1.0 {
            return Err(SentinelError::Validation("卖出比例必须在0-1之间".into()));
        }
        if params.buy_percentage <= 0.0 || params.buy_percentage > 1.0 {
            return Err(SentinelError::Validation("买入比例必须在0-1之间".into()));
        }
        if params.check_interval_seconds < 1 {
            return Err(SentinelError::Validation("检查间隔必须大于等于1秒".into()));
        }
        if params.all_in_threshold_usd < 0.0 {
            return Err(SentinelError::Validation("全仓阈值必须大于等于0".into()));
        }
        Ok(())
    }

    fn swing_params(
        params: &NewSwingMonitor,
        watch_meta: &TokenMeta,
        trade_meta: &TokenMeta,
    ) -> SwingMonitorParams {
        SwingMonitorParams {
            name: params.name.clone(),
            private_key_id: params.private_key_id,
            watch_token_address: params.watch_token_address.clone(),
            watch_token_name: watch_meta.name.clone(),
            watch_token_symbol: watch_meta.symbol.clone(),
            watch_token_logo_uri: watch_meta.logo_uri.clone(),
            watch_token_decimals: watch_meta.decimals,
            trade_token_address: params.trade_token_address.clone(),
            trade_token_name: trade_meta.name.clone(),
            trade_token_symbol: trade_meta.symbol.clone(),
            trade_token_logo_uri: trade_meta.logo_uri.clone(),
            trade_token_decimals: trade_meta.decimals,
            price_type: params.price_type,
            sell_threshold: params.sell_threshold,
            buy_threshold: params.buy_threshold,
            sell_percentage: params.sell_percentage,
            buy_percentage: params.buy_percentage,
            all_in_threshold_usd: params.all_in_threshold_usd,
            webhook_url: params.webhook_url.clone(),
            check_interval_seconds: params.check_interval_seconds,
        }
    }

    pub async fn create_swing(&self, params: NewSwingMonitor) -> SentinelResult<SwingMonitorRecord> {
        Self::validate_swing(&params)?;
        self.require_private_key(params.private_key_id).await?;

        let watch_meta = self
            .fetch_token_meta(&params.watch_token_address)
            .await
            .ok_or_else(|| {
                SentinelError::Validation("无法获取监听代币信息，请检查Token地址是否正确".into())
            })?;
        let trade_meta = self
            .fetch_token_meta(&params.trade_token_address)
            .await
            .ok_or_else(|| {
                SentinelError::Validation("无法获取交易代币信息，请检查Token地址是否正确".into())
            })?;

        let record = self
            .store
            .create_swing_monitor(&Self::swing_params(&params, &watch_meta, &trade_meta))
            .await?;
        info!("波段监控记录创建成功: {}", record.name);
        Ok(record)
    }

    pub async fn update_swing(
        &self,
        id: i64,
        params: NewSwingMonitor,
    ) -> SentinelResult<SwingMonitorRecord> {
        Self::validate_swing(&params)?;
        let existing = self
            .store
            .get_swing_monitor(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("波段监控记录不存在".into()))?;
        self.require_private_key(params.private_key_id).await?;

        let watch_meta = if existing.watch_token_address != params.watch_token_address {
            self.fetch_token_meta(&params.watch_token_address)
                .await
                .ok_or_else(|| {
                    SentinelError::Validation("无法获取监听代币信息，请检查Token地址是否正确".into())
                })?
        } else {
            TokenMeta {
                address: Some(existing.watch_token_address.clone()),
                name: existing.watch_token_name.clone(),
                symbol: existing.watch_token_symbol.clone(),
                logo_uri: existing.watch_token_logo_uri.clone(),
                decimals: existing.watch_token_decimals,
            }
        };
        let trade_meta = if existing.trade_token_address != params.trade_token_address {
            self.fetch_token_meta(&params.trade_token_address)
                .await
                .ok_or_else(|| {
                    SentinelError::Validation("无法获取交易代币信息，请检查Token地址是否正确".into())
                })?
        } else {
            TokenMeta {
                address: Some(existing.trade_token_address.clone()),
                name: existing.trade_token_name.clone(),
                symbol: existing.trade_token_symbol.clone(),
                logo_uri: existing.trade_token_logo_uri.clone(),
                decimals: existing.trade_token_decimals,
            }
        };

        self.store
            .update_swing_monitor(id, &Self::swing_params(&params, &watch_meta, &trade_meta))
            .await?;
        self.store
            .get_swing_monitor(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("波段监控记录不存在".into()))
    }

    pub async fn delete_swing(&self, id: i64) -> SentinelResult<()> {
        if self.store.get_swing_monitor(id).await?.is_none() {
            return Err(SentinelError::NotFound("波段监控记录不存在".into()));
        }
        self.store.clear_swing_logs(id).await?;
        self.store.delete_swing_monitor(id).await?;
        Ok(())
    }

    pub async fn get_swing(&self, id: i64) -> SentinelResult<Option<SwingMonitorRecord>> {
        self.store.get_swing_monitor(id).await
    }

    pub async fn list_swing(&self) -> SentinelResult<Vec<SwingMonitorRecord>> {
        self.store.list_swing_monitors().await
    }

    // -----------------------------------------------------------------------
    // Private keys
    // -----------------------------------------------------------------------

    /// Derives the base58 public key from an ed25519 secret, rejecting
    /// malformed input.
    pub fn derive_public_key(secret: &str) -> SentinelResult<String> {
        parse_private_key(secret)
            .map(|keypair| keypair.pubkey().to_string())
            .map_err(|e| SentinelError::Validation(format!("私钥格式错误: {e}")))
    }

    pub async fn create_private_key(
        &self,
        nickname: &str,
        secret: &str,
    ) -> SentinelResult<PrivateKeyRecord> {
        let public_key = Self::derive_public_key(secret)?;

        if self
            .store
            .find_private_key_by_nickname(nickname, None)
            .await?
            .is_some()
        {
            return Err(SentinelError::Validation("私钥昵称已存在".into()));
        }
        if self.store.find_private_key_by_secret(secret).await?.is_some() {
            return Err(SentinelError::Validation("该私钥已存在".into()));
        }

        let record = self
            .store
            .create_private_key(nickname, secret, &public_key)
            .await?;
        info!("私钥添加成功: {nickname}");
        Ok(record)
    }

    pub async fn update_private_key(
        &self,
        id: i64,
        nickname: &str,
        secret: &str,
    ) -> SentinelResult<PrivateKeyRecord> {
        let existing = self.store.get_private_key(id).await?;
        if existing.is_none() {
            return Err(SentinelError::NotFound("私钥记录不存在或已删除".into()));
        }

        let public_key = Self::derive_public_key(secret)?;

        if self
            .store
            .find_private_key_by_nickname(nickname, Some(id))
            .await?
            .is_some()
        {
            return Err(SentinelError::Validation("私钥昵称已存在".into()));
        }

        self.store
            .update_private_key(id, nickname, secret, &public_key)
            .await?;
        self.store
            .get_private_key(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("私钥记录不存在或已删除".into()))
    }

    /// Logical delete, refused while any monitor still references the key.
    pub async fn delete_private_key(&self, id: i64) -> SentinelResult<()> {
        if self.store.get_private_key(id).await?.is_none() {
            return Err(SentinelError::NotFound("私钥记录不存在或已删除".into()));
        }

        let using = self.store.monitors_using_key(id).await?;
        if using > 0 {
            return Err(SentinelError::Validation(format!(
                "该私钥正被 {using} 个监控记录使用，无法删除"
            )));
        }

        self.store.mark_private_key_deleted(id).await?;
        info!("私钥已删除（逻辑删除）: {id}");
        Ok(())
    }

    pub async fn get_private_key(&self, id: i64) -> SentinelResult<Option<PrivateKeyRecord>> {
        self.store.get_private_key(id).await
    }

    pub async fn list_private_keys(&self) -> SentinelResult<Vec<PrivateKeyInfo>> {
        let records = self.store.list_private_keys().await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let preview: String = record.secret.chars().take(4).collect();
                PrivateKeyInfo {
                    id: record.id,
                    nickname: record.nickname,
                    public_key: record.public_key,
                    secret_preview: format!("{preview}..."),
                    created_at: record.created_at,
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    pub async fn logs(
        &self,
        filter: LogFilter,
        page: i64,
        per_page: i64,
    ) -> SentinelResult<LogPage> {
        self.store.logs_page(&filter, page, per_page).await
    }

    pub async fn clear_logs(&self, monitor_record_id: Option<i64>) -> SentinelResult<u64> {
        self.store.clear_logs(monitor_record_id).await
    }
}
