//! Wallet-scoped trade execution.
//!
//! Every running monitor owns one `SolanaTrader` bound to its private key.
//! Swaps go through the Jupiter quote/swap API and land on chain as signed
//! versioned transactions; transfers are built locally. The RPC endpoint,
//! quote API URL and slippage are cached from the config registry and
//! re-read on `refresh`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::{json, Value};
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigRegistry, ConfigSubscriber};
use crate::modules::error_handling::extract_program_logs;
use crate::modules::market_data::MarketDataClient;
use crate::modules::native_mint::{is_native_mint, normalize_native_mint, NATIVE_MINT};
use crate::modules::store::Store;

/// Flat fee assumed when the simulator does not report one.
pub const SERVICE_FEE_SOL: f64 = 0.000896;

/// Kept back on a 100% buy so the wallet can still pay token-account rent.
/// Once the token is fully sold the reserve is withdrawable again.
pub const RENT_RESERVE_SOL: f64 = 0.0021;

const LAMPORTS_PER_SOL: f64 = 1e9;
const SWAP_SEND_ATTEMPTS: u32 = 5;
const SWAP_RETRY_DELAY: Duration = Duration::from_secs(5);
const TRANSFER_ATTEMPTS: u32 = 3;
const RETRYABLE_TRANSFER_ERRORS: &[&str] = &[
    "blockhash not found",
    "timeout",
    "connection error",
    "network error",
    "rpc error",
    "insufficient compute budget",
];

/// Parses a private key from the Solana CLI JSON-array format or base58.
pub fn parse_private_key(private_key: &str) -> Result<Keypair> {
    if private_key.starts_with('[') && private_key.ends_with(']') {
        let bytes: Vec<u8> = serde_json::from_str(private_key)
            .context("Failed to parse private key as JSON array")?;
        if bytes.len() != 64 {
            return Err(anyhow!("Private key must be 64 bytes, got {}", bytes.len()));
        }
        return Keypair::from_bytes(&bytes).context("Failed to create keypair from bytes");
    }

    if let Ok(bytes) = bs58::decode(private_key).into_vec() {
        if bytes.len() == 64 {
            return Keypair::from_bytes(&bytes).context("Failed to create keypair from base58");
        }
    }

    Err(anyhow!("Unsupported private key format"))
}

/// Outcome of one swap submission.
#[derive(Debug, Clone)]
pub enum SwapOutcome {
    Success { tx_hash: String },
    Failure { error: String, program_logs: Vec<String> },
}

impl SwapOutcome {
    fn failure(message: impl Into<String>) -> Self {
        let error = message.into();
        let program_logs = extract_program_logs(&error);
        SwapOutcome::Failure {
            error,
            program_logs,
        }
    }
}

/// Result of a percentage sell/buy round trip.
#[derive(Debug, Clone)]
pub struct TradeResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl TradeResult {
    fn ok(tx_hash: String) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            error: None,
        }
    }

    fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferPreview {
    pub amount: f64,
    pub amount_usd: f64,
    pub fee: f64,
    pub after_balance: f64,
    pub to: Option<String>,
    pub err: Option<String>,
    pub logs: Option<Vec<String>>,
    pub program_logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferResult {
    pub amount: f64,
    pub amount_usd: f64,
    pub fee: f64,
    pub after_balance: f64,
    pub tx_hash: Option<String>,
    pub err: Option<String>,
    pub program_logs: Vec<String>,
}

struct TraderEndpoints {
    rpc: Arc<RpcClient>,
    jupiter_url: String,
    slippage_bps: u16,
}

pub struct SolanaTrader {
    wallet: Keypair,
    store: Store,
    config: Arc<ConfigRegistry>,
    market: Arc<MarketDataClient>,
    http: reqwest::Client,
    endpoints: RwLock<TraderEndpoints>,
}

impl SolanaTrader {
    pub async fn connect(
        private_key: &str,
        store: Store,
        config: Arc<ConfigRegistry>,
        market: Arc<MarketDataClient>,
    ) -> Result<Arc<Self>> {
        let wallet = parse_private_key(private_key)?;
        info!("钱包地址: {}", wallet.pubkey());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("Failed to create HTTP client");

        let endpoints = Self::load_endpoints(&config).await;
        let trader = Arc::new(Self {
            wallet,
            store,
            config: config.clone(),
            market,
            http,
            endpoints: RwLock::new(endpoints),
        });
        config.register(trader.clone());
        Ok(trader)
    }

    async fn load_endpoints(config: &ConfigRegistry) -> TraderEndpoints {
        let rpc_url = config
            .get_string("RPC_URL")
            .await
            .unwrap_or_else(|| "https://api.mainnet-beta.solana.com".to_string());
        let jupiter_url = config
            .get_string("JUPITER_API_URL")
            .await
            .unwrap_or_else(|| "https://quote-api.jup.ag/v6".to_string());
        let slippage_bps = config.get_number("SLIPPAGE_BPS").await.unwrap_or(100.0) as u16;

        TraderEndpoints {
            rpc: Arc::new(RpcClient::new_with_commitment(
                rpc_url,
                CommitmentConfig::confirmed(),
            )),
            jupiter_url,
            slippage_bps,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    async fn rpc(&self) -> Arc<RpcClient> {
        self.endpoints.read().await.rpc.clone()
    }

    async fn jupiter_url(&self) -> String {
        self.endpoints.read().await.jupiter_url.clone()
    }

    async fn slippage_bps(&self) -> u16 {
        self.endpoints.read().await.slippage_bps
    }

    /// Decimals for a mint: monitor tables first, then cached metadata,
    /// then the Solana default of 9.
    pub async fn token_decimals(&self, token_address: &str) -> u8 {
        match self.store.find_token_decimals(token_address).await {
            Ok(Some(decimals)) => {
                debug!("从数据库获取token decimals: {decimals}");
                return decimals as u8;
            }
            Ok(None) => {}
            Err(e) => error!("查询token decimals失败: {e}"),
        }

        if let Some(meta) = self
            .market
            .token_meta(normalize_native_mint(token_address))
            .await
        {
            if let Some(decimals) = meta.decimals {
                debug!("从API获取token decimals: {decimals}");
                return decimals as u8;
            }
        }

        warn!("未找到token decimals，使用默认值9");
        9
    }

    pub async fn native_balance(&self) -> f64 {
        let rpc = self.rpc().await;
        match rpc.get_balance(&self.wallet.pubkey()) {
            Ok(lamports) => lamports as f64 / LAMPORTS_PER_SOL,
            Err(e) => {
                error!("获取SOL余额失败: {e}");
                0.0
            }
        }
    }

    /// Balance of `token_address` in UI units. The native mint (either
    /// spelling) delegates to `native_balance`; a missing token account
    /// reads as 0.
    pub async fn token_balance(&self, token_address: &str) -> f64 {
        let normalized = normalize_native_mint(token_address);
        if normalized == NATIVE_MINT {
            debug!("检测到SOL地址，直接读取SOL余额");
            return self.native_balance().await;
        }

        let mint = match Pubkey::from_str(normalized) {
            Ok(mint) => mint,
            Err(e) => {
                error!("无效的token地址 [{token_address}]: {e}");
                return 0.0;
            }
        };

        let rpc = self.rpc().await;
        let owner = self.wallet.pubkey();

        // Associated token account under the mint's owning token program.
        match rpc.get_account(&mint) {
            Ok(mint_account) => {
                let ata = get_associated_token_address_with_program_id(
                    &owner,
                    &mint,
                    &mint_account.owner,
                );
                if let Ok(balance) = rpc.get_token_account_balance(&ata) {
                    return balance.ui_amount.unwrap_or_else(|| {
                        balance
                            .amount
                            .parse::<f64>()
                            .map(|raw| raw / 10f64.powi(balance.decimals as i32))
                            .unwrap_or(0.0)
                    });
                }
            }
            Err(e) => debug!("无法获取mint账户，尝试其他方法: {e}"),
        }

        // Fallback: scan the owner's token accounts for this mint.
        if let Ok(accounts) = rpc.get_token_accounts_by_owner(&owner, TokenAccountsFilter::Mint(mint))
        {
            for keyed in accounts {
                let Ok(account_pubkey) = Pubkey::from_str(&keyed.pubkey) else {
                    continue;
                };
                if let Ok(balance) = rpc.get_token_account_balance(&account_pubkey) {
                    return balance.ui_amount.unwrap_or_else(|| {
                        balance
                            .amount
                            .parse::<f64>()
                            .map(|raw| raw / 10f64.powi(balance.decimals as i32))
                            .unwrap_or(0.0)
                    });
                }
            }
        }

        0.0
    }

    /// Jupiter quote. A JSON `error` body from the provider is surfaced
    /// verbatim as the Err value.
    pub async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<Value, String> {
        let url = format!("{}/quote", self.jupiter_url().await);
        let slippage_bps = self.slippage_bps().await;

        let response = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("获取交易报价失败: {e}"))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("获取交易报价失败: {e}"))?;

        if let Some(err) = body.get("error") {
            let message = err
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            error!("获取交易报价失败: {message}");
            return Err(message);
        }

        Ok(body)
    }

    /// Signs and submits the swap described by a quote. Sends with preflight
    /// commitment `processed`; retries up to 5 times at 5 s spacing except
    /// on `insufficient lamports`, which is terminal immediately.
    pub async fn swap(&self, quote: &Value) -> SwapOutcome {
        // Some callers hand over the whole quote envelope.
        let quote_response = quote.get("quote").unwrap_or(quote);

        let url = format!("{}/swap", self.jupiter_url().await);
        let payload = json!({
            "quoteResponse": quote_response,
            "userPublicKey": self.wallet.pubkey().to_string(),
            "wrapAndUnwrapSol": true
        });

        let response = match self.http.post(&url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => return SwapOutcome::failure(format!("交易失败: {e}")),
        };
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return SwapOutcome::failure(format!("交易失败: {e}")),
        };
        debug!("Jupiter API响应: {body}");

        let Some(tx_base64) = body.get("swapTransaction").and_then(Value::as_str) else {
            error!("响应中未找到swapTransaction字段");
            let detail = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("响应中未找到swapTransaction字段");
            return SwapOutcome::failure(format!("交易失败: {detail}"));
        };

        let tx_bytes = match general_purpose::STANDARD.decode(tx_base64) {
            Ok(bytes) => bytes,
            Err(e) => return SwapOutcome::failure(format!("交易失败: base64解码失败: {e}")),
        };
        let versioned: VersionedTransaction = match bincode::deserialize(&tx_bytes) {
            Ok(tx) => tx,
            Err(e) => return SwapOutcome::failure(format!("交易失败: 交易反序列化失败: {e}")),
        };

        let rpc = self.rpc().await;
        let blockhash = match rpc.get_latest_blockhash() {
            Ok(hash) => hash,
            Err(e) => return SwapOutcome::failure(format!("交易失败: 获取区块哈希失败: {e}")),
        };
        let mut message = versioned.message;
        message.set_recent_blockhash(blockhash);

        let signed = match VersionedTransaction::try_new(message, &[&self.wallet]) {
            Ok(tx) => tx,
            Err(e) => return SwapOutcome::failure(format!("交易失败: 交易签名失败: {e}")),
        };

        for attempt in 1..=SWAP_SEND_ATTEMPTS {
            let send_config = RpcSendTransactionConfig {
                skip_preflight: false,
                preflight_commitment: Some(CommitmentLevel::Processed),
                ..Default::default()
            };
            match rpc.send_transaction_with_config(&signed, send_config) {
                Ok(signature) => {
                    info!("交易成功发送，ID: {signature}");
                    return SwapOutcome::Success {
                        tx_hash: signature.to_string(),
                    };
                }
                Err(e) => {
                    let err_str = e.to_string();
                    if err_str.contains("insufficient lamports") {
                        error!("交易失败: {err_str}");
                        return SwapOutcome::failure(format!("交易失败: {err_str}"));
                    }
                    if attempt < SWAP_SEND_ATTEMPTS {
                        warn!("第{attempt}次尝试失败，5秒后重试... [原因: {err_str}]");
                        sleep(SWAP_RETRY_DELAY).await;
                        continue;
                    }
                    let program_logs = extract_program_logs(&err_str);
                    if !program_logs.is_empty() {
                        let detail = program_logs.join("\n");
                        error!("所有重试尝试都失败了，链上日志：{detail}");
                        return SwapOutcome::Failure {
                            error: format!("交易失败，链上日志：\n{detail}"),
                            program_logs,
                        };
                    }
                    error!("所有重试尝试都失败了");
                    return SwapOutcome::failure(format!("交易失败: {err_str}"));
                }
            }
        }

        SwapOutcome::failure("交易失败")
    }

    /// Sells `sell_percentage` of the wallet's balance of `token_address`
    /// into native SOL.
    pub async fn sell_token_for_native(
        &self,
        token_address: &str,
        sell_percentage: f64,
    ) -> TradeResult {
        let token_balance = self.token_balance(token_address).await;
        if token_balance <= 0.0 {
            warn!("代币余额为0，无法出售");
            return TradeResult::err("代币余额为0，无法出售");
        }

        let sell_amount = token_balance * sell_percentage;
        let decimals = self.token_decimals(token_address).await;
        let raw_amount = (sell_amount * 10f64.powi(decimals as i32)) as u64;
        info!("准备出售 {sell_amount} 个代币 (decimals: {decimals})");

        let quote = match self
            .quote(normalize_native_mint(token_address), NATIVE_MINT, raw_amount)
            .await
        {
            Ok(quote) => quote,
            Err(e) => return TradeResult::err(format!("获取交易报价失败: {e}")),
        };

        match self.swap(&quote).await {
            SwapOutcome::Success { tx_hash } => {
                info!("成功出售代币，交易哈希: {tx_hash}");
                TradeResult::ok(tx_hash)
            }
            SwapOutcome::Failure { error, .. } => {
                error!("交易执行失败: {error}");
                TradeResult::err(format!("交易执行失败: {error}"))
            }
        }
    }

    /// Buys `token_address` with `buy_percentage` of the wallet's SOL. A
    /// full-balance buy keeps back the rent reserve.
    pub async fn buy_token_for_native(
        &self,
        token_address: &str,
        buy_percentage: f64,
    ) -> TradeResult {
        let sol_balance = self.native_balance().await;
        let reserve = if buy_percentage == 1.0 {
            RENT_RESERVE_SOL
        } else {
            0.0
        };
        let buy_amount = sol_balance * buy_percentage - reserve;
        if sol_balance <= 0.0 || buy_amount <= 0.0 {
            warn!("SOL余额不足，无法买入");
            return TradeResult::err("SOL余额不足，无法买入");
        }

        let raw_amount = (buy_amount * LAMPORTS_PER_SOL) as u64;
        info!("准备用 {buy_amount} SOL 买入代币 {token_address}");

        let quote = match self
            .quote(NATIVE_MINT, normalize_native_mint(token_address), raw_amount)
            .await
        {
            Ok(quote) => quote,
            Err(e) => return TradeResult::err(format!("获取买入交易报价失败: {e}")),
        };

        match self.swap(&quote).await {
            SwapOutcome::Success { tx_hash } => {
                info!("成功买入代币，花费 {buy_amount} SOL，交易哈希: {tx_hash}");
                TradeResult::ok(tx_hash)
            }
            SwapOutcome::Failure { error, .. } => {
                error!("买入交易执行失败: {error}");
                TradeResult::err(format!("买入交易执行失败: {error}"))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    async fn validate_balance(&self, token_address: &str, amount: f64) -> Result<()> {
        let (current_balance, token_name) = if is_native_mint(token_address) {
            (self.native_balance().await, "SOL")
        } else {
            (self.token_balance(token_address).await, "Token")
        };
        if amount > current_balance {
            return Err(anyhow!("{token_name}余额不足，当前余额: {current_balance}"));
        }
        Ok(())
    }

    fn build_native_transfer(&self, to: &Pubkey, amount: f64, blockhash: Hash) -> Transaction {
        let instruction = system_instruction::transfer(
            &self.wallet.pubkey(),
            to,
            (amount * LAMPORTS_PER_SOL) as u64,
        );
        Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.wallet.pubkey()),
            &[&self.wallet],
            blockhash,
        )
    }

    async fn build_token_transfer(
        &self,
        token_address: &str,
        to_owner: &Pubkey,
        amount: f64,
        blockhash: Hash,
    ) -> Result<Transaction> {
        let decimals = self.token_decimals(token_address).await;
        let mint = Pubkey::from_str(token_address).context("无效的token地址")?;
        let owner = self.wallet.pubkey();
        let rpc = self.rpc().await;

        let mint_program_id = rpc.get_account(&mint).context("无法获取mint账户")?.owner;
        let source_ata = get_associated_token_address_with_program_id(&owner, &mint, &mint_program_id);
        let dest_ata =
            get_associated_token_address_with_program_id(to_owner, &mint, &mint_program_id);

        let mut instructions = Vec::new();
        let dest_exists = rpc
            .get_account_with_commitment(&dest_ata, CommitmentConfig::confirmed())
            .context("无法查询目标token账户")?
            .value
            .is_some();
        if !dest_exists {
            instructions.push(create_associated_token_account_idempotent(
                &owner,
                to_owner,
                &mint,
                &mint_program_id,
            ));
        }
        instructions.push(spl_token::instruction::transfer_checked(
            &mint_program_id,
            &source_ata,
            &mint,
            &dest_ata,
            &owner,
            &[],
            (amount * 10f64.powi(decimals as i32)) as u64,
            decimals,
        )?);

        Ok(Transaction::new_signed_with_payer(
            &instructions,
            Some(&owner),
            &[&self.wallet],
            blockhash,
        ))
    }

    async fn transfer_valuation(&self, token_address: &str, amount: f64, fee: f64) -> (f64, f64) {
        let price = self
            .market
            .market_data(normalize_native_mint(token_address))
            .await
            .map(|m| m.price)
            .unwrap_or(0.0);
        let amount_usd = amount * price;

        let sol_balance = self.native_balance().await;
        let after_balance = if is_native_mint(token_address) {
            sol_balance - amount - fee
        } else {
            sol_balance - fee
        };
        (amount_usd, after_balance)
    }

    async fn try_transfer_preview(
        &self,
        token_address: &str,
        to_address: &str,
        amount: f64,
    ) -> Result<TransferPreview> {
        self.validate_balance(token_address, amount).await?;
        let to = Pubkey::from_str(to_address).context("目标地址无效")?;

        let rpc = self.rpc().await;
        let blockhash = rpc.get_latest_blockhash().context("获取区块哈希失败")?;
        let transaction = if is_native_mint(token_address) {
            self.build_native_transfer(&to, amount, blockhash)
        } else {
            self.build_token_transfer(token_address, &to, amount, blockhash)
                .await?
        };

        let simulation = rpc
            .simulate_transaction(&transaction)
            .context("模拟交易失败")?;
        let err = simulation.value.err.map(|e| e.to_string());
        let logs = simulation.value.logs;

        if err.is_some() {
            return Ok(TransferPreview {
                err,
                logs,
                ..Default::default()
            });
        }

        let fee = SERVICE_FEE_SOL;
        let (amount_usd, after_balance) = self.transfer_valuation(token_address, amount, fee).await;
        Ok(TransferPreview {
            amount,
            amount_usd,
            fee,
            after_balance,
            to: Some(to_address.to_string()),
            err: None,
            logs,
            program_logs: Vec::new(),
        })
    }

    /// Builds the transfer, simulates it and reports the projected effect
    /// without sending anything.
    pub async fn transfer_preview(
        &self,
        token_address: &str,
        to_address: &str,
        amount: f64,
    ) -> TransferPreview {
        match self.try_transfer_preview(token_address, to_address, amount).await {
            Ok(preview) => preview,
            Err(e) => {
                let err_str = e.to_string();
                error!("转账预览失败: {err_str}");
                TransferPreview {
                    program_logs: extract_program_logs(&err_str),
                    err: Some(err_str),
                    ..Default::default()
                }
            }
        }
    }

    async fn try_transfer(
        &self,
        token_address: &str,
        to_address: &str,
        amount: f64,
    ) -> Result<TransferResult> {
        self.validate_balance(token_address, amount).await?;
        let to = Pubkey::from_str(to_address).context("目标地址无效")?;

        let rpc = self.rpc().await;
        let blockhash = rpc.get_latest_blockhash().context("获取区块哈希失败")?;
        let transaction = if is_native_mint(token_address) {
            self.build_native_transfer(&to, amount, blockhash)
        } else {
            self.build_token_transfer(token_address, &to, amount, blockhash)
                .await?
        };

        let send_config = RpcSendTransactionConfig {
            skip_preflight: true,
            ..Default::default()
        };
        let signature = rpc.send_transaction_with_config(&transaction, send_config)?;
        let tx_hash = signature.to_string();

        let token_name = if is_native_mint(token_address) {
            "SOL"
        } else {
            "Token"
        };
        info!("{token_name}转账成功，交易哈希: {tx_hash}");

        let fee = SERVICE_FEE_SOL;
        let (amount_usd, after_balance) = self.transfer_valuation(token_address, amount, fee).await;
        Ok(TransferResult {
            amount,
            amount_usd,
            fee,
            after_balance,
            tx_hash: Some(tx_hash),
            err: None,
            program_logs: Vec::new(),
        })
    }

    /// Sends the transfer with `skip_preflight = true`; retries transient
    /// failures up to 3 times with exponential back-off.
    pub async fn transfer(
        &self,
        token_address: &str,
        to_address: &str,
        amount: f64,
    ) -> TransferResult {
        for attempt in 0..TRANSFER_ATTEMPTS {
            match self.try_transfer(token_address, to_address, amount).await {
                Ok(result) => return result,
                Err(e) => {
                    let err_str = e.to_string();
                    error!("转账失败: {err_str}");

                    let lowered = err_str.to_lowercase();
                    let retryable = RETRYABLE_TRANSFER_ERRORS
                        .iter()
                        .any(|cause| lowered.contains(cause));
                    if attempt + 1 < TRANSFER_ATTEMPTS && retryable {
                        warn!("转账第{}次尝试失败，将重试: {err_str}", attempt + 1);
                        sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return TransferResult {
                        program_logs: extract_program_logs(&err_str),
                        err: Some(err_str),
                        ..Default::default()
                    };
                }
            }
        }

        TransferResult {
            err: Some("所有重试尝试都失败了".to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConfigSubscriber for SolanaTrader {
    async fn refresh(&self) -> Result<()> {
        *self.endpoints.write().await = Self::load_endpoints(&self.config).await;
        info!("SolanaTrader配置已刷新");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::store::ConfigType;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_secret() -> String {
        bs58::encode(Keypair::new().to_bytes()).into_string()
    }

    async fn test_trader(jupiter_url: &str) -> Arc<SolanaTrader> {
        let store = Store::open_in_memory().await.unwrap();
        let config = ConfigRegistry::new(store.clone());
        config
            .set("JUPITER_API_URL", jupiter_url, "", ConfigType::String)
            .await
            .unwrap();
        config
            .set("RPC_URL", "http://127.0.0.1:9", "", ConfigType::String)
            .await
            .unwrap();
        let market = MarketDataClient::with_base_urls(
            store.clone(),
            config.clone(),
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
        )
        .await;
        SolanaTrader::connect(&test_secret(), store, config, market)
            .await
            .unwrap()
    }

    #[test]
    fn parses_base58_and_json_array_keys_to_the_same_pubkey() {
        let keypair = Keypair::new();
        let bytes = keypair.to_bytes();

        let base58 = bs58::encode(bytes).into_string();
        let parsed = parse_private_key(&base58).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());

        let json_array = serde_json::to_string(&bytes.to_vec()).unwrap();
        let parsed = parse_private_key(&json_array).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());

        assert!(parse_private_key("not-a-key").is_err());
    }

    #[tokio::test]
    async fn quote_surfaces_provider_error_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "Could not find any route"
            })))
            .mount(&server)
            .await;

        let trader = test_trader(&server.uri()).await;
        let err = trader.quote("mint-a", NATIVE_MINT, 1_000_000).await.unwrap_err();
        assert_eq!(err, "Could not find any route");
    }

    #[tokio::test]
    async fn quote_sends_configured_slippage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("inputMint", "mint-a"))
            .and(query_param("slippageBps", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inputMint": "mint-a",
                "outAmount": "12345"
            })))
            .mount(&server)
            .await;

        let trader = test_trader(&server.uri()).await;
        let quote = trader.quote("mint-a", NATIVE_MINT, 1_000_000).await.unwrap();
        assert_eq!(quote["outAmount"], "12345");
    }

    #[tokio::test]
    async fn swap_without_transaction_field_is_a_failure_with_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "no route for swap"
            })))
            .mount(&server)
            .await;

        let trader = test_trader(&server.uri()).await;
        let outcome = trader.swap(&json!({"inputMint": "mint-a"})).await;
        match outcome {
            SwapOutcome::Failure { error, program_logs } => {
                assert!(error.contains("no route for swap"));
                assert!(program_logs.is_empty());
            }
            SwapOutcome::Success { .. } => panic!("swap should not succeed"),
        }
    }
}
