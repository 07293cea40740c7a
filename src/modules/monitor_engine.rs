//! The monitor scheduler and execution engine.
//!
//! A process-wide registry owns one worker task per running monitor. Workers
//! are cancelled cooperatively: the engine flips the monitor's alive flag and
//! the worker observes it at the top of its loop and inside every sleep. The
//! registry mutex is never held across I/O.
//!
//! Lifecycle: `initialize` builds the engine and runs recovery exactly once,
//! reinstating every record persisted as `monitoring`. Workers demote their
//! own record to `stopped` when they exit without having completed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ConfigRegistry;
use crate::modules::change_filter::ChangeFilter;
use crate::modules::error_handling::{SentinelError, SentinelResult};
use crate::modules::market_data::{MarketDataClient, TokenMarketData};
use crate::modules::native_mint::{normalize_native_mint, NATIVE_MINT};
use crate::modules::notifier::{Notifier, TradeSide};
use crate::modules::store::{
    ExecutionMode, MonitorKind, MonitorRecord, MonitorStatus, MonitorType, NewMonitorLog,
    PriceType, Store, SwingMonitorRecord,
};
use crate::modules::trader::{SolanaTrader, SwapOutcome, RENT_RESERVE_SOL};

/// Post-trade wait shared by the swing cooldown gate and the multiple-mode
/// continuation sleep.
pub const TRADE_COOLDOWN: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Decision arithmetic
//
// The trigger policies are pure functions so the literal trade scenarios can
// be tested without a chain or an HTTP server in sight.
// ---------------------------------------------------------------------------

/// Sell-side dust promotion: in multiple mode a position worth less than the
/// minimum hold is exited completely instead of leaving unsellable dust.
pub fn effective_sell_percentage(
    configured: f64,
    mode: ExecutionMode,
    token_balance: f64,
    price: f64,
    minimum_hold_usd: f64,
) -> f64 {
    if mode != ExecutionMode::Single && token_balance * price < minimum_hold_usd {
        1.0
    } else {
        configured
    }
}

/// Buy-side top-up promotion: in multiple mode, when the SOL left after the
/// buy would be worth less than the minimum hold, go all in.
pub fn effective_buy_percentage(
    configured: f64,
    mode: ExecutionMode,
    sol_balance: f64,
    sol_usd_price: f64,
    minimum_hold_usd: f64,
) -> f64 {
    if mode != ExecutionMode::Single && sol_usd_price > 0.0 {
        let min_hold_sol = minimum_hold_usd / sol_usd_price;
        if sol_balance - sol_balance * configured < min_hold_sol {
            return 1.0;
        }
    }
    configured
}

/// SOL spent by a buy at `percentage`; a full-balance buy keeps the rent
/// reserve back.
pub fn candidate_buy_amount(sol_balance: f64, percentage: f64) -> f64 {
    let reserve = if percentage == 1.0 { RENT_RESERVE_SOL } else { 0.0 };
    sol_balance * percentage - reserve
}

/// Accumulated-spend cap admission; a cap of 0 means unlimited.
pub fn buy_cap_exceeded(max_buy_usd: f64, accumulated_buy_usd: f64, estimated_usd: f64) -> bool {
    max_buy_usd > 0.0 && accumulated_buy_usd + estimated_usd > max_buy_usd
}

/// All-in promotion for swing trades: once the source position is worth no
/// more than the threshold, trade all of it.
pub fn all_in_percentage(
    configured: f64,
    all_in_threshold_usd: f64,
    balance: f64,
    price: f64,
) -> f64 {
    if all_in_threshold_usd > 0.0 && balance * price <= all_in_threshold_usd {
        1.0
    } else {
        configured
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingSignal {
    Sell,
    Buy,
    Hold,
}

pub fn swing_signal(current_value: f64, sell_threshold: f64, buy_threshold: f64) -> SwingSignal {
    if current_value >= sell_threshold {
        SwingSignal::Sell
    } else if current_value <= buy_threshold {
        SwingSignal::Buy
    } else {
        SwingSignal::Hold
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct WorkerHandle {
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    simple: std::collections::HashMap<i64, WorkerHandle>,
    swing: std::collections::HashMap<i64, WorkerHandle>,
}

struct EngineInner {
    store: Store,
    market: Arc<MarketDataClient>,
    config: Arc<ConfigRegistry>,
    change_filter: ChangeFilter,
    registry: Mutex<Registry>,
    recovery_done: AtomicBool,
}

#[derive(Clone)]
pub struct MonitorEngine {
    inner: Arc<EngineInner>,
}

enum WorkerStep {
    Continue,
    Finished,
}

impl MonitorEngine {
    /// Builds the engine and runs recovery once: every record persisted as
    /// `monitoring` is reinstated; a record that fails to reinstate is
    /// demoted to `stopped` without affecting the others.
    pub async fn initialize(
        store: Store,
        market: Arc<MarketDataClient>,
        config: Arc<ConfigRegistry>,
    ) -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner {
                store,
                market,
                config,
                change_filter: ChangeFilter::new(),
                registry: Mutex::new(Registry::default()),
                recovery_done: AtomicBool::new(false),
            }),
        };
        engine.recover_all().await;
        engine
    }

    pub fn change_filter(&self) -> &ChangeFilter {
        &self.inner.change_filter
    }

    // -- lifecycle ----------------------------------------------------------

    pub async fn start_simple(&self, record_id: i64) -> SentinelResult<()> {
        if self.is_running_simple(record_id) {
            return Err(SentinelError::Validation("监控已在运行中".into()));
        }

        let record = self
            .inner
            .store
            .get_monitor(record_id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("监控记录不存在".into()))?;

        self.inner
            .store
            .update_monitor_status(record_id, MonitorStatus::Monitoring)
            .await?;

        let notifier = Notifier::new(&record.webhook_url);
        notifier.send_startup_notification(&record.name).await;

        let alive = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(simple_worker(
            self.inner.clone(),
            record_id,
            alive.clone(),
        ));
        self.register(record_id, alive, task, false)?;
        info!("监控启动成功: {} (ID: {record_id})", record.name);
        Ok(())
    }

    pub async fn stop_simple(&self, record_id: i64) -> SentinelResult<()> {
        let handle = {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.simple.remove(&record_id)
        };
        if let Some(handle) = handle {
            handle.alive.store(false, Ordering::SeqCst);
        }
        self.inner
            .store
            .update_monitor_status(record_id, MonitorStatus::Stopped)
            .await?;
        info!("监控已停止 (ID: {record_id})");
        Ok(())
    }

    pub async fn start_swing(&self, record_id: i64) -> SentinelResult<()> {
        if self.is_running_swing(record_id) {
            return Err(SentinelError::Validation("波段监控已在运行中".into()));
        }

        let record = self
            .inner
            .store
            .get_swing_monitor(record_id)
            .await?
            .ok_or_else(|| SentinelError::NotFound("波段监控记录不存在".into()))?;

        self.inner
            .store
            .update_swing_monitor_status(record_id, MonitorStatus::Monitoring)
            .await?;

        let notifier = Notifier::new(&record.webhook_url);
        notifier.send_startup_notification(&record.name).await;

        let alive = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(swing_worker(self.inner.clone(), record_id, alive.clone()));
        self.register(record_id, alive, task, true)?;
        info!("波段监控启动成功: {} (ID: {record_id})", record.name);
        Ok(())
    }

    pub async fn stop_swing(&self, record_id: i64) -> SentinelResult<()> {
        let handle = {
            let mut registry = self.inner.registry.lock().unwrap();
            registry.swing.remove(&record_id)
        };
        if let Some(handle) = handle {
            handle.alive.store(false, Ordering::SeqCst);
        }
        self.inner
            .store
            .update_swing_monitor_status(record_id, MonitorStatus::Stopped)
            .await?;
        info!("波段监控已停止 (ID: {record_id})");
        Ok(())
    }

    /// Inserts the freshly spawned worker, losing gracefully to a concurrent
    /// start of the same record.
    fn register(
        &self,
        record_id: i64,
        alive: Arc<AtomicBool>,
        task: JoinHandle<()>,
        swing: bool,
    ) -> SentinelResult<()> {
        let mut registry = self.inner.registry.lock().unwrap();
        let map = if swing {
            &mut registry.swing
        } else {
            &mut registry.simple
        };
        if let Some(existing) = map.get(&record_id) {
            if existing.alive.load(Ordering::SeqCst) {
                alive.store(false, Ordering::SeqCst);
                task.abort();
                return Err(SentinelError::Validation("监控已在运行中".into()));
            }
        }
        map.insert(record_id, WorkerHandle { alive, task });
        Ok(())
    }

    pub fn is_running_simple(&self, record_id: i64) -> bool {
        self.inner
            .registry
            .lock()
            .unwrap()
            .simple
            .get(&record_id)
            .map(|h| h.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn is_running_swing(&self, record_id: i64) -> bool {
        self.inner
            .registry
            .lock()
            .unwrap()
            .swing
            .get(&record_id)
            .map(|h| h.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .simple
            .values()
            .chain(registry.swing.values())
            .filter(|h| h.alive.load(Ordering::SeqCst))
            .count()
    }

    pub fn swing_running_count(&self) -> usize {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .swing
            .values()
            .filter(|h| h.alive.load(Ordering::SeqCst))
            .count()
    }

    /// Stops every live worker and clears the change filter.
    pub async fn stop_all(&self) {
        let (simple_ids, swing_ids) = {
            let registry = self.inner.registry.lock().unwrap();
            (
                registry.simple.keys().copied().collect::<Vec<_>>(),
                registry.swing.keys().copied().collect::<Vec<_>>(),
            )
        };
        for record_id in simple_ids {
            if let Err(e) = self.stop_simple(record_id).await {
                error!("停止监控失败 (ID: {record_id}): {e}");
            }
        }
        for record_id in swing_ids {
            if let Err(e) = self.stop_swing(record_id).await {
                error!("停止波段监控失败 (ID: {record_id}): {e}");
            }
        }
        self.inner.change_filter.clear();
    }

    /// Startup recovery, guarded by a once-flag. Safe to call again; later
    /// calls do nothing.
    pub async fn recover_all(&self) {
        if self.inner.recovery_done.swap(true, Ordering::SeqCst) {
            debug!("自动恢复已完成，跳过重复执行");
            return;
        }
        info!("正在自动恢复监控任务...");

        let mut recovered = 0usize;
        match self
            .inner
            .store
            .list_monitors_by_status(MonitorStatus::Monitoring)
            .await
        {
            Ok(records) => {
                for record in records {
                    match self.start_simple(record.id).await {
                        Ok(()) => {
                            recovered += 1;
                            info!("已恢复普通监控任务: {} (ID: {})", record.name, record.id);
                        }
                        Err(e) => {
                            error!("恢复普通监控任务失败 {} (ID: {}): {e}", record.name, record.id);
                            if let Err(e) = self
                                .inner
                                .store
                                .update_monitor_status(record.id, MonitorStatus::Stopped)
                                .await
                            {
                                error!("更新监控记录状态失败: {e}");
                            }
                        }
                    }
                }
            }
            Err(e) => error!("自动恢复监控任务时出错: {e}"),
        }

        let mut swing_recovered = 0usize;
        match self
            .inner
            .store
            .list_swing_monitors_by_status(MonitorStatus::Monitoring)
            .await
        {
            Ok(records) => {
                for record in records {
                    match self.start_swing(record.id).await {
                        Ok(()) => {
                            swing_recovered += 1;
                            info!("已恢复波段监控任务: {} (ID: {})", record.name, record.id);
                        }
                        Err(e) => {
                            error!("恢复波段监控任务失败 {} (ID: {}): {e}", record.name, record.id);
                            if let Err(e) = self
                                .inner
                                .store
                                .update_swing_monitor_status(record.id, MonitorStatus::Stopped)
                                .await
                            {
                                error!("更新波段监控记录状态失败: {e}");
                            }
                        }
                    }
                }
            }
            Err(e) => error!("自动恢复波段监控任务时出错: {e}"),
        }

        let total = recovered + swing_recovered;
        if total > 0 {
            info!("成功恢复 {recovered} 个普通监控任务，{swing_recovered} 个波段监控任务，共 {total} 个");
        } else {
            info!("没有需要恢复的监控任务");
        }
    }

    /// Drops change-filter entries for tokens no running monitor watches.
    pub async fn cleanup_change_filter(&self) {
        let (simple_ids, swing_ids) = {
            let registry = self.inner.registry.lock().unwrap();
            (
                registry
                    .simple
                    .iter()
                    .filter(|(_, h)| h.alive.load(Ordering::SeqCst))
                    .map(|(id, _)| *id)
                    .collect::<Vec<_>>(),
                registry
                    .swing
                    .iter()
                    .filter(|(_, h)| h.alive.load(Ordering::SeqCst))
                    .map(|(id, _)| *id)
                    .collect::<Vec<_>>(),
            )
        };
        match self
            .inner
            .store
            .token_addresses_for_monitors(&simple_ids, &swing_ids)
            .await
        {
            Ok(addresses) => {
                let active: HashSet<String> = addresses.into_iter().collect();
                self.inner.change_filter.cleanup_unused(&active);
            }
            Err(e) => warn!("清理市值缓存失败: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker plumbing
// ---------------------------------------------------------------------------

/// Sleeps in short slices so cancellation is observed promptly. Returns
/// whether the worker is still alive afterwards.
async fn cancellable_sleep(alive: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !alive.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return alive.load(Ordering::SeqCst);
        }
        sleep((deadline - now).min(Duration::from_secs(1))).await;
    }
}

fn check_interval(seconds: i64) -> Duration {
    Duration::from_secs(seconds.max(1) as u64)
}

/// Marks the record completed, notifies, and clears the alive flag so the
/// worker exits cleanly. The status commit always precedes the notification.
async fn complete_monitor(
    inner: &EngineInner,
    alive: &AtomicBool,
    record: &MonitorRecord,
    notifier: &Notifier,
    reason: &str,
    title: &str,
    content: &str,
) -> anyhow::Result<()> {
    info!("{reason}: {}", record.name);
    inner
        .store
        .update_monitor_status(record.id, MonitorStatus::Completed)
        .await?;
    notifier.send_completion(title, content).await;
    alive.store(false, Ordering::SeqCst);
    Ok(())
}

async fn log_observation(inner: &EngineInner, record: &MonitorRecord, market: &TokenMarketData) {
    let below = market.market_cap < record.threshold;
    let log = NewMonitorLog {
        monitor_record_id: Some(record.id),
        price: Some(market.price),
        market_cap: Some(market.market_cap),
        threshold_reached: !below,
        action_taken: Some(if below { "monitoring" } else { "阈值达到" }.to_string()),
        monitor_type: MonitorType::Normal,
        ..Default::default()
    };
    if let Err(e) = inner.store.append_log(&log).await {
        warn!("记录监控日志失败: {e}");
    }
}

async fn log_trade(inner: &EngineInner, record: &MonitorRecord, market: &TokenMarketData, action: &str, tx_hash: &str) {
    let log = NewMonitorLog {
        monitor_record_id: Some(record.id),
        price: Some(market.price),
        market_cap: Some(market.market_cap),
        threshold_reached: true,
        action_taken: Some(action.to_string()),
        tx_hash: Some(tx_hash.to_string()),
        monitor_type: MonitorType::Normal,
        ..Default::default()
    };
    if let Err(e) = inner.store.append_log(&log).await {
        warn!("记录交易日志失败: {e}");
    }
}

// ---------------------------------------------------------------------------
// Simple worker
// ---------------------------------------------------------------------------

async fn simple_worker(inner: Arc<EngineInner>, record_id: i64, alive: Arc<AtomicBool>) {
    let record = match inner.store.get_monitor(record_id).await {
        Ok(Some(record)) => record,
        _ => {
            error!("监控记录不存在，工作任务退出 (ID: {record_id})");
            finish_simple_worker(&inner, record_id, &alive).await;
            return;
        }
    };
    let notifier = Notifier::new(&record.webhook_url);

    let secret = match inner.store.get_private_key(record.private_key_id).await {
        Ok(Some(key)) => key.secret,
        _ => {
            error!("私钥不存在或已删除，监控无法启动: {}", record.name);
            notifier
                .send_error_notification("私钥不存在或已删除，监控无法启动", Some(&record.name))
                .await;
            finish_simple_worker(&inner, record_id, &alive).await;
            return;
        }
    };
    let trader = match SolanaTrader::connect(
        &secret,
        inner.store.clone(),
        inner.config.clone(),
        inner.market.clone(),
    )
    .await
    {
        Ok(trader) => trader,
        Err(e) => {
            error!("初始化钱包失败: {e}");
            notifier
                .send_error_notification(&format!("初始化钱包失败: {e}"), Some(&record.name))
                .await;
            finish_simple_worker(&inner, record_id, &alive).await;
            return;
        }
    };

    let mut record = record;
    while alive.load(Ordering::SeqCst) {
        match simple_iteration(&inner, &alive, &mut record, &trader, &notifier).await {
            Ok(WorkerStep::Continue) => {}
            Ok(WorkerStep::Finished) => break,
            Err(e) => {
                error!("监控 {} 过程中出错: {e}", record.name);
                if let Err(e) = inner
                    .store
                    .update_monitor_status(record.id, MonitorStatus::Error)
                    .await
                {
                    error!("更新监控记录状态失败: {e}");
                }
                cancellable_sleep(&alive, check_interval(record.check_interval_seconds)).await;
            }
        }
    }

    finish_simple_worker(&inner, record_id, &alive).await;
}

async fn simple_iteration(
    inner: &EngineInner,
    alive: &AtomicBool,
    record: &mut MonitorRecord,
    trader: &SolanaTrader,
    notifier: &Notifier,
) -> anyhow::Result<WorkerStep> {
    let interval = check_interval(record.check_interval_seconds);

    let market = match inner
        .market
        .market_data(normalize_native_mint(&record.token_address))
        .await
    {
        Some(market) => market,
        None => {
            cancellable_sleep(alive, interval).await;
            return Ok(WorkerStep::Continue);
        }
    };

    inner
        .store
        .update_monitor_observation(record.id, market.price, market.market_cap)
        .await?;
    record.last_price = Some(market.price);
    record.last_market_cap = Some(market.market_cap);

    log_observation(inner, record, &market).await;

    match record.kind {
        MonitorKind::Buy => {
            simple_buy_iteration(inner, alive, record, trader, notifier, &market, interval).await
        }
        MonitorKind::Sell => {
            simple_sell_iteration(inner, alive, record, trader, notifier, &market, interval).await
        }
    }
}

async fn simple_sell_iteration(
    inner: &EngineInner,
    alive: &AtomicBool,
    record: &MonitorRecord,
    trader: &SolanaTrader,
    notifier: &Notifier,
    market: &TokenMarketData,
    interval: Duration,
) -> anyhow::Result<WorkerStep> {
    if market.market_cap < record.threshold {
        debug!(
            "监控 {} 市值未达到阈值。当前: ${:.2}, 阈值: ${:.2}",
            record.name, market.market_cap, record.threshold
        );
        let (notify, percent_change) = inner
            .change_filter
            .observe(&record.token_address, market.market_cap);
        if notify {
            notifier
                .send_price_alert(market, &record.name, false, TradeSide::Sell, percent_change)
                .await;
        }
        cancellable_sleep(alive, interval).await;
        return Ok(WorkerStep::Continue);
    }

    info!(
        "监控 {} 市值达到阈值！当前: ${:.2}, 阈值: ${:.2}",
        record.name, market.market_cap, record.threshold
    );
    notifier
        .send_price_alert(market, &record.name, true, TradeSide::Sell, None)
        .await;

    let token_balance = trader.token_balance(&record.token_address).await;
    if token_balance <= 0.0 {
        if record.pre_sniper {
            info!("余额不足，预抢购模式开启，跳过本次监控: {}", record.name);
            cancellable_sleep(alive, interval).await;
            return Ok(WorkerStep::Continue);
        }
        complete_monitor(
            inner,
            alive,
            record,
            notifier,
            "代币余额为0，停止监控任务",
            &format!("⚠️ 【{}】余额不足", record.name),
            &format!("【{}】代币余额为0，监控任务自动停止。", record.name),
        )
        .await?;
        return Ok(WorkerStep::Finished);
    }

    let effective = effective_sell_percentage(
        record.percentage,
        record.execution_mode,
        token_balance,
        market.price,
        record.minimum_hold_usd,
    );

    let result = trader
        .sell_token_for_native(&record.token_address, effective)
        .await;
    if !result.success {
        let error_msg = result.error.unwrap_or_else(|| "交易执行失败".to_string());
        error!("交易执行失败: {error_msg}");
        notifier
            .send_error_notification(&format!("交易执行失败: {error_msg}"), Some(&record.name))
            .await;
        cancellable_sleep(alive, interval).await;
        return Ok(WorkerStep::Continue);
    }

    let tx_hash = result.tx_hash.unwrap_or_default();
    info!("交易成功: {tx_hash}");
    log_trade(inner, record, market, "自动出售", &tx_hash).await;

    let sell_amount = token_balance * effective;
    notifier
        .send_trade_notification(
            &tx_hash,
            sell_amount,
            sell_amount * market.price,
            &record.name,
            record.token_symbol.as_deref(),
            TradeSide::Sell,
        )
        .await;

    if record.execution_mode == ExecutionMode::Single {
        complete_monitor(
            inner,
            alive,
            record,
            notifier,
            "单次执行模式完成，停止监控任务",
            &format!("🎯 【{}】单次执行完成", record.name),
            &format!(
                "【{}】单次执行模式已完成交易（出售{:.1}%），监控任务自动停止。",
                record.name,
                effective * 100.0
            ),
        )
        .await?;
        return Ok(WorkerStep::Finished);
    }
    if effective >= 1.0 {
        complete_monitor(
            inner,
            alive,
            record,
            notifier,
            "已100%出售完毕，停止监控任务",
            &format!("🎯 【{}】监控任务完成", record.name),
            &format!("【{}】已100%出售完毕，监控任务自动停止。", record.name),
        )
        .await?;
        return Ok(WorkerStep::Finished);
    }

    info!("交易完成，继续监控等待下一次达到阈值...");
    cancellable_sleep(alive, TRADE_COOLDOWN).await;
    Ok(WorkerStep::Continue)
}

async fn simple_buy_iteration(
    inner: &EngineInner,
    alive: &AtomicBool,
    record: &mut MonitorRecord,
    trader: &SolanaTrader,
    notifier: &Notifier,
    market: &TokenMarketData,
    interval: Duration,
) -> anyhow::Result<WorkerStep> {
    if market.market_cap >= record.threshold {
        debug!(
            "监控 {} 市值未低于阈值。当前: ${:.2}, 阈值: ${:.2}",
            record.name, market.market_cap, record.threshold
        );
        let (notify, percent_change) = inner
            .change_filter
            .observe(&record.token_address, market.market_cap);
        if notify {
            notifier
                .send_price_alert(market, &record.name, false, TradeSide::Buy, percent_change)
                .await;
        }
        cancellable_sleep(alive, interval).await;
        return Ok(WorkerStep::Continue);
    }

    info!(
        "监控 {} 市值低于阈值，尝试买入。当前: ${:.2}, 阈值: ${:.2}",
        record.name, market.market_cap, record.threshold
    );
    notifier
        .send_price_alert(market, &record.name, true, TradeSide::Buy, None)
        .await;

    let sol_balance = trader.native_balance().await;
    let candidate = candidate_buy_amount(sol_balance, record.percentage);
    if sol_balance <= 0.0 || candidate <= 0.0 {
        complete_monitor(
            inner,
            alive,
            record,
            notifier,
            "SOL余额不足，停止买入监控任务",
            &format!("⚠️ 【{}】SOL余额不足", record.name),
            &format!("【{}】SOL余额为0，监控任务自动停止。", record.name),
        )
        .await?;
        return Ok(WorkerStep::Finished);
    }

    let sol_usd = inner
        .market
        .market_data(NATIVE_MINT)
        .await
        .map(|m| m.price)
        .unwrap_or(0.0);
    let estimated_usd = candidate * sol_usd;

    if buy_cap_exceeded(record.max_buy_usd, record.accumulated_buy_usd, estimated_usd) {
        complete_monitor(
            inner,
            alive,
            record,
            notifier,
            "累计买入金额已达上限，停止监控任务",
            &format!("🎯 【{}】累计买入上限已达", record.name),
            &format!(
                "【{}】累计买入金额已达上限（{} USD），监控任务自动停止。",
                record.name, record.max_buy_usd
            ),
        )
        .await?;
        return Ok(WorkerStep::Finished);
    }

    let effective = effective_buy_percentage(
        record.percentage,
        record.execution_mode,
        sol_balance,
        sol_usd,
        record.minimum_hold_usd,
    );

    let result = trader
        .buy_token_for_native(&record.token_address, effective)
        .await;
    if !result.success {
        let error_msg = result.error.unwrap_or_else(|| "买入交易执行失败".to_string());
        error!("买入交易失败: {error_msg}");
        notifier
            .send_error_notification(&format!("买入交易失败: {error_msg}"), Some(&record.name))
            .await;
        cancellable_sleep(alive, interval).await;
        return Ok(WorkerStep::Continue);
    }

    let tx_hash = result.tx_hash.unwrap_or_default();
    info!("买入交易成功: {tx_hash}");
    log_trade(inner, record, market, "自动买入", &tx_hash).await;

    let executed_amount = candidate_buy_amount(sol_balance, effective);
    notifier
        .send_trade_notification(
            &tx_hash,
            executed_amount,
            executed_amount * sol_usd,
            &record.name,
            record.token_symbol.as_deref(),
            TradeSide::Buy,
        )
        .await;

    // The persisted column stays authoritative for the spend cap.
    inner
        .store
        .add_accumulated_buy_usd(record.id, estimated_usd)
        .await?;
    record.accumulated_buy_usd += estimated_usd;

    if record.execution_mode == ExecutionMode::Single || effective >= 1.0 {
        complete_monitor(
            inner,
            alive,
            record,
            notifier,
            "买入任务完成，停止监控任务",
            &format!("🎯 【{}】买入任务完成", record.name),
            &format!("【{}】买入任务已完成，监控任务自动停止。", record.name),
        )
        .await?;
        return Ok(WorkerStep::Finished);
    }

    info!("买入完成，继续监控等待下一次低于阈值...");
    cancellable_sleep(alive, TRADE_COOLDOWN).await;
    Ok(WorkerStep::Continue)
}

async fn finish_simple_worker(inner: &EngineInner, record_id: i64, alive: &Arc<AtomicBool>) {
    alive.store(false, Ordering::SeqCst);
    {
        let mut registry = inner.registry.lock().unwrap();
        if let Some(handle) = registry.simple.get(&record_id) {
            if Arc::ptr_eq(&handle.alive, alive) {
                registry.simple.remove(&record_id);
            }
        }
    }

    // A worker that exits while still marked monitoring was not stopped or
    // completed through the engine; reconcile the persisted status.
    if let Ok(Some(record)) = inner.store.get_monitor(record_id).await {
        if record.status == MonitorStatus::Monitoring {
            if let Err(e) = inner
                .store
                .update_monitor_status(record_id, MonitorStatus::Stopped)
                .await
            {
                error!("更新监控记录状态失败: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Swing worker
// ---------------------------------------------------------------------------

async fn swing_worker(inner: Arc<EngineInner>, record_id: i64, alive: Arc<AtomicBool>) {
    let record = match inner.store.get_swing_monitor(record_id).await {
        Ok(Some(record)) => record,
        _ => {
            error!("波段监控记录不存在，工作任务退出 (ID: {record_id})");
            finish_swing_worker(&inner, record_id, &alive).await;
            return;
        }
    };
    let notifier = Notifier::new(&record.webhook_url);

    let secret = match inner.store.get_private_key(record.private_key_id).await {
        Ok(Some(key)) => key.secret,
        _ => {
            error!("私钥不存在或已删除，波段监控无法启动: {}", record.name);
            notifier
                .send_error_notification("私钥不存在或已删除，波段监控无法启动", Some(&record.name))
                .await;
            finish_swing_worker(&inner, record_id, &alive).await;
            return;
        }
    };
    let trader = match SolanaTrader::connect(
        &secret,
        inner.store.clone(),
        inner.config.clone(),
        inner.market.clone(),
    )
    .await
    {
        Ok(trader) => trader,
        Err(e) => {
            error!("初始化钱包失败: {e}");
            notifier
                .send_error_notification(&format!("初始化钱包失败: {e}"), Some(&record.name))
                .await;
            finish_swing_worker(&inner, record_id, &alive).await;
            return;
        }
    };

    let mut record = record;
    let mut last_trade_at: Option<Instant> = None;
    while alive.load(Ordering::SeqCst) {
        match swing_iteration(
            &inner,
            &alive,
            &mut record,
            &trader,
            &notifier,
            &mut last_trade_at,
        )
        .await
        {
            Ok(()) => {}
            Err(e) => {
                error!("波段监控 {} 过程中出错: {e}", record.name);
                if let Err(e) = inner
                    .store
                    .update_swing_monitor_status(record.id, MonitorStatus::Error)
                    .await
                {
                    error!("更新波段监控记录状态失败: {e}");
                }
                cancellable_sleep(&alive, check_interval(record.check_interval_seconds)).await;
            }
        }
    }

    finish_swing_worker(&inner, record_id, &alive).await;
}

async fn swing_iteration(
    inner: &EngineInner,
    alive: &AtomicBool,
    record: &mut SwingMonitorRecord,
    trader: &SolanaTrader,
    notifier: &Notifier,
    last_trade_at: &mut Option<Instant>,
) -> anyhow::Result<()> {
    let interval = check_interval(record.check_interval_seconds);

    // Trade-cooldown gate.
    if let Some(traded_at) = *last_trade_at {
        let elapsed = traded_at.elapsed();
        if elapsed < TRADE_COOLDOWN {
            let remaining = TRADE_COOLDOWN - elapsed;
            info!(
                "波段监控 {} 交易冷却中，剩余 {:.1} 秒",
                record.name,
                remaining.as_secs_f64()
            );
            cancellable_sleep(alive, remaining.min(interval)).await;
            return Ok(());
        }
    }

    let watch_market = match inner
        .market
        .market_data(normalize_native_mint(&record.watch_token_address))
        .await
    {
        Some(market) => market,
        None => {
            cancellable_sleep(alive, interval).await;
            return Ok(());
        }
    };

    inner
        .store
        .update_swing_observation(record.id, watch_market.price, watch_market.market_cap)
        .await?;
    record.last_watch_price = Some(watch_market.price);
    record.last_watch_market_cap = Some(watch_market.market_cap);

    let current_value = match record.price_type {
        PriceType::Price => watch_market.price,
        PriceType::MarketCap => watch_market.market_cap,
    };
    debug!(
        "波段监控 {} 当前值: ${:.2}, 卖出阈值: ${:.2}, 买入阈值: ${:.2}",
        record.name, current_value, record.sell_threshold, record.buy_threshold
    );

    log_swing(
        inner,
        record,
        &watch_market,
        current_value,
        "monitoring",
        None,
        None,
    )
    .await;

    match swing_signal(current_value, record.sell_threshold, record.buy_threshold) {
        SwingSignal::Sell => {
            info!(
                "波段监控 {} 达到卖出条件！当前值: ${:.2}, 卖出阈值: ${:.2}",
                record.name, current_value, record.sell_threshold
            );

            let watch_balance = trader.token_balance(&record.watch_token_address).await;
            if watch_balance <= 0.0 {
                info!("波段监控 {} 监听代币余额为0，跳过卖出", record.name);
                cancellable_sleep(alive, interval).await;
                return Ok(());
            }

            notifier
                .send_price_alert(&watch_market, &record.name, true, TradeSide::Sell, None)
                .await;

            let mut percentage = record.sell_percentage;
            if record.all_in_threshold_usd > 0.0 {
                if let Some(market) = inner
                    .market
                    .market_data(normalize_native_mint(&record.watch_token_address))
                    .await
                {
                    if market.price > 0.0 {
                        let promoted = all_in_percentage(
                            percentage,
                            record.all_in_threshold_usd,
                            watch_balance,
                            market.price,
                        );
                        if promoted > percentage {
                            info!("波段监控 {} 资产价值低于全仓阈值，全仓卖出", record.name);
                        }
                        percentage = promoted;
                    }
                }
            }

            let traded = execute_swing_trade(
                inner,
                trader,
                notifier,
                record,
                &record.watch_token_address,
                &record.trade_token_address,
                percentage,
                TradeSide::Sell,
            )
            .await;

            if traded {
                info!("波段监控 {} 卖出交易完成，进入冷却期", record.name);
                *last_trade_at = Some(Instant::now());
                cancellable_sleep(alive, TRADE_COOLDOWN).await;
            } else {
                cancellable_sleep(alive, interval).await;
            }
        }
        SwingSignal::Buy => {
            info!(
                "波段监控 {} 达到买入条件！当前值: ${:.2}, 买入阈值: ${:.2}",
                record.name, current_value, record.buy_threshold
            );

            let trade_balance = trader.token_balance(&record.trade_token_address).await;
            if trade_balance <= 0.0 {
                info!("波段监控 {} 交易代币余额为0，跳过买入", record.name);
                cancellable_sleep(alive, interval).await;
                return Ok(());
            }

            notifier
                .send_price_alert(&watch_market, &record.name, true, TradeSide::Buy, None)
                .await;

            let mut percentage = record.buy_percentage;
            if record.all_in_threshold_usd > 0.0 {
                if let Some(market) = inner
                    .market
                    .market_data(normalize_native_mint(&record.trade_token_address))
                    .await
                {
                    if market.price > 0.0 {
                        let promoted = all_in_percentage(
                            percentage,
                            record.all_in_threshold_usd,
                            trade_balance,
                            market.price,
                        );
                        if promoted > percentage {
                            info!("波段监控 {} 资产价值低于全仓阈值，全仓买入", record.name);
                        }
                        percentage = promoted;
                    }
                }
            }

            let traded = execute_swing_trade(
                inner,
                trader,
                notifier,
                record,
                &record.trade_token_address,
                &record.watch_token_address,
                percentage,
                TradeSide::Buy,
            )
            .await;

            if traded {
                info!("波段监控 {} 买入交易完成，进入冷却期", record.name);
                *last_trade_at = Some(Instant::now());
                cancellable_sleep(alive, TRADE_COOLDOWN).await;
            } else {
                cancellable_sleep(alive, interval).await;
            }
        }
        SwingSignal::Hold => {
            debug!("波段监控 {} 当前值在正常范围内，继续监控", record.name);
            let (notify, percent_change) = inner
                .change_filter
                .observe(&record.watch_token_address, current_value);
            if notify {
                notifier
                    .send_price_alert(
                        &watch_market,
                        &record.name,
                        false,
                        TradeSide::Swing,
                        percent_change,
                    )
                    .await;
            }
            cancellable_sleep(alive, interval).await;
        }
    }

    Ok(())
}

async fn log_swing(
    inner: &EngineInner,
    record: &SwingMonitorRecord,
    watch_market: &TokenMarketData,
    current_value: f64,
    action_type: &str,
    action_taken: Option<String>,
    tx_hash: Option<String>,
) {
    let log = NewMonitorLog {
        monitor_record_id: Some(record.id),
        price: Some(watch_market.price),
        market_cap: Some(watch_market.market_cap),
        threshold_reached: false,
        action_taken,
        tx_hash,
        monitor_type: MonitorType::Swing,
        price_type: Some(record.price_type),
        current_value: Some(current_value),
        sell_threshold: Some(record.sell_threshold),
        buy_threshold: Some(record.buy_threshold),
        action_type: Some(action_type.to_string()),
        watch_token_address: Some(record.watch_token_address.clone()),
        trade_token_address: Some(record.trade_token_address.clone()),
    };
    if let Err(e) = inner.store.append_log(&log).await {
        warn!("记录波段监控日志失败: {e}");
    }
}

/// One swing leg: size from the source balance, quote, swap, log and notify.
/// Returns whether a trade actually landed.
async fn execute_swing_trade(
    inner: &EngineInner,
    trader: &SolanaTrader,
    notifier: &Notifier,
    record: &SwingMonitorRecord,
    from_token: &str,
    to_token: &str,
    percentage: f64,
    side: TradeSide,
) -> bool {
    let action_name = if side == TradeSide::Buy { "买入" } else { "卖出" };
    let action_type = if side == TradeSide::Buy { "buy" } else { "sell" };

    let from_balance = trader.token_balance(from_token).await;
    if from_balance <= 0.0 {
        warn!("波段监控 {} {action_name} 源代币余额为0", record.name);
        return false;
    }

    let trade_amount = from_balance * percentage;
    let estimated_usd = inner
        .market
        .market_data(normalize_native_mint(from_token))
        .await
        .map(|m| trade_amount * m.price)
        .unwrap_or(0.0);

    let decimals = trader.token_decimals(from_token).await;
    let raw_amount = (trade_amount * 10f64.powi(decimals as i32)) as u64;

    let quote = match trader
        .quote(
            normalize_native_mint(from_token),
            normalize_native_mint(to_token),
            raw_amount,
        )
        .await
    {
        Ok(quote) => quote,
        Err(e) => {
            error!("波段监控 {} {action_name} 报价失败: {e}", record.name);
            notifier
                .send_error_notification(&format!("波段{action_name}报价失败: {e}"), Some(&record.name))
                .await;
            return false;
        }
    };

    match trader.swap(&quote).await {
        SwapOutcome::Success { tx_hash } => {
            info!("波段监控 {} {action_name} 交易成功: {tx_hash}", record.name);

            let from_symbol = if from_token == record.watch_token_address {
                record.watch_token_symbol.as_deref().unwrap_or("未知")
            } else {
                record.trade_token_symbol.as_deref().unwrap_or("未知")
            };
            let to_symbol = if to_token == record.trade_token_address {
                record.trade_token_symbol.as_deref().unwrap_or("未知")
            } else {
                record.watch_token_symbol.as_deref().unwrap_or("未知")
            };
            notifier
                .send_trade_notification(
                    &tx_hash,
                    trade_amount,
                    estimated_usd,
                    &record.name,
                    Some(&format!("{from_symbol}→{to_symbol}")),
                    side,
                )
                .await;

            if let Some(watch_market) = inner
                .market
                .market_data(normalize_native_mint(&record.watch_token_address))
                .await
            {
                let current_value = match record.price_type {
                    PriceType::Price => watch_market.price,
                    PriceType::MarketCap => watch_market.market_cap,
                };
                log_swing(
                    inner,
                    record,
                    &watch_market,
                    current_value,
                    action_type,
                    Some(format!("执行{action_name}交易成功")),
                    Some(tx_hash),
                )
                .await;
            }
            true
        }
        SwapOutcome::Failure { error, .. } => {
            error!("波段监控 {} {action_name} 交易失败: {error}", record.name);
            notifier
                .send_error_notification(
                    &format!("波段{action_name}交易失败: {error}"),
                    Some(&record.name),
                )
                .await;
            false
        }
    }
}

async fn finish_swing_worker(inner: &EngineInner, record_id: i64, alive: &Arc<AtomicBool>) {
    alive.store(false, Ordering::SeqCst);
    {
        let mut registry = inner.registry.lock().unwrap();
        if let Some(handle) = registry.swing.get(&record_id) {
            if Arc::ptr_eq(&handle.alive, alive) {
                registry.swing.remove(&record_id);
            }
        }
    }

    if let Ok(Some(record)) = inner.store.get_swing_monitor(record_id).await {
        if record.status == MonitorStatus::Monitoring {
            if let Err(e) = inner
                .store
                .update_swing_monitor_status(record_id, MonitorStatus::Stopped)
                .await
            {
                error!("更新波段监控记录状态失败: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario: sell trigger in single mode keeps the configured percentage.
    #[test]
    fn sell_percentage_not_promoted_in_single_mode_or_above_minimum_hold() {
        // 100 tokens at $0.02 = $2 position, minimum hold $0 -> no promotion
        let pct = effective_sell_percentage(0.5, ExecutionMode::Single, 100.0, 0.02, 0.0);
        assert_eq!(pct, 0.5);

        // multiple mode but holding value above the minimum
        let pct = effective_sell_percentage(0.5, ExecutionMode::Multiple, 10_000.0, 0.04, 50.0);
        assert_eq!(pct, 0.5);
    }

    // Scenario: 1 000 tokens at $0.04 = $40 < $50 minimum hold in multiple
    // mode -> full exit to avoid dust.
    #[test]
    fn sell_percentage_promoted_to_full_exit_below_minimum_hold() {
        let pct = effective_sell_percentage(0.5, ExecutionMode::Multiple, 1_000.0, 0.04, 50.0);
        assert_eq!(pct, 1.0);
    }

    #[test]
    fn buy_percentage_promoted_when_remaining_sol_below_minimum_hold() {
        // 2 SOL at $80: buying 90% leaves 0.2 SOL = $16 < $50 -> all in
        let pct = effective_buy_percentage(0.9, ExecutionMode::Multiple, 2.0, 80.0, 50.0);
        assert_eq!(pct, 1.0);

        // leaving 1 SOL = $80 >= $50 -> keep configured
        let pct = effective_buy_percentage(0.5, ExecutionMode::Multiple, 2.0, 80.0, 50.0);
        assert_eq!(pct, 0.5);

        // single mode never promotes
        let pct = effective_buy_percentage(0.9, ExecutionMode::Single, 2.0, 80.0, 50.0);
        assert_eq!(pct, 0.9);

        // unknown SOL price skips the promotion
        let pct = effective_buy_percentage(0.9, ExecutionMode::Multiple, 2.0, 0.0, 50.0);
        assert_eq!(pct, 0.9);
    }

    #[test]
    fn full_balance_buy_keeps_the_rent_reserve() {
        let amount = candidate_buy_amount(2.0, 1.0);
        assert!((amount - (2.0 - RENT_RESERVE_SOL)).abs() < 1e-12);

        let amount = candidate_buy_amount(2.0, 0.5);
        assert!((amount - 1.0).abs() < 1e-12);
    }

    // Scenario: accumulated 90 + estimated 160 > cap 100 -> no swap.
    #[test]
    fn cumulative_buy_cap_blocks_trades_past_the_budget() {
        // 2 SOL * $80 = $160 estimated
        let estimated = candidate_buy_amount(2.0, 1.0) * 80.0;
        assert!(buy_cap_exceeded(100.0, 90.0, estimated));

        // cap of 0 = unlimited
        assert!(!buy_cap_exceeded(0.0, 1_000_000.0, estimated));

        // inside the budget
        assert!(!buy_cap_exceeded(1_000.0, 90.0, estimated));
    }

    // Scenario: price path 1.5 -> 2.1 -> 1.8 -> 0.9 around thresholds
    // sell=2.0 / buy=1.0.
    #[test]
    fn swing_signal_covers_both_thresholds_and_the_band_between() {
        assert_eq!(swing_signal(1.5, 2.0, 1.0), SwingSignal::Hold);
        assert_eq!(swing_signal(2.1, 2.0, 1.0), SwingSignal::Sell);
        assert_eq!(swing_signal(2.0, 2.0, 1.0), SwingSignal::Sell);
        assert_eq!(swing_signal(1.8, 2.0, 1.0), SwingSignal::Hold);
        assert_eq!(swing_signal(0.9, 2.0, 1.0), SwingSignal::Buy);
        assert_eq!(swing_signal(1.0, 2.0, 1.0), SwingSignal::Buy);
    }

    #[test]
    fn all_in_promotion_triggers_at_or_below_the_threshold() {
        // position worth $40 <= $50 threshold -> all in
        assert_eq!(all_in_percentage(0.5, 50.0, 1_000.0, 0.04), 1.0);
        // worth $80 -> keep configured
        assert_eq!(all_in_percentage(0.5, 50.0, 2_000.0, 0.04), 0.5);
        // threshold 0 disables the promotion
        assert_eq!(all_in_percentage(0.5, 0.0, 1.0, 0.000001), 0.5);
    }
}
