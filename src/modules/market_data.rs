//! Birdeye market-data client.
//!
//! Price/market-cap observations are fetched live on every call; token
//! metadata is cached forever in the store (no TTL, no invalidation), so a
//! cache hit never touches the network. Auth headers come from the config
//! registry and are re-read on `refresh`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::{ConfigRegistry, ConfigSubscriber};
use crate::modules::store::Store;

const DEFI_BASE_URL: &str = "https://public-api.birdeye.so/defi/v3";
const WALLET_BASE_URL: &str = "https://public-api.birdeye.so/v1";

#[derive(Debug, Deserialize)]
struct BirdeyeEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMarketData {
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub total_supply: f64,
    #[serde(default)]
    pub circulating_supply: f64,
    #[serde(default)]
    pub fdv: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMeta {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub logo_uri: Option<String>,
    pub decimals: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPortfolio {
    pub wallet: String,
    #[serde(default)]
    pub total_usd: f64,
    #[serde(default)]
    pub items: Vec<WalletTokenItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTokenItem {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    #[serde(default)]
    pub ui_amount: f64,
    #[serde(default)]
    pub price_usd: f64,
    #[serde(default)]
    pub value_usd: f64,
    #[serde(rename = "logoURI", default)]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ApiHeaders {
    api_key: String,
    chain: String,
}

pub struct MarketDataClient {
    http: reqwest::Client,
    store: Store,
    config: Arc<ConfigRegistry>,
    defi_base_url: String,
    wallet_base_url: String,
    headers: RwLock<ApiHeaders>,
}

impl MarketDataClient {
    pub async fn new(store: Store, config: Arc<ConfigRegistry>) -> Arc<Self> {
        Self::with_base_urls(store, config, DEFI_BASE_URL, WALLET_BASE_URL).await
    }

    /// Same client pointed at explicit base URLs; tests use this with a mock
    /// server.
    pub async fn with_base_urls(
        store: Store,
        config: Arc<ConfigRegistry>,
        defi_base_url: &str,
        wallet_base_url: &str,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        let client = Arc::new(Self {
            http,
            store,
            config: config.clone(),
            defi_base_url: defi_base_url.trim_end_matches('/').to_string(),
            wallet_base_url: wallet_base_url.trim_end_matches('/').to_string(),
            headers: RwLock::new(ApiHeaders::default()),
        });
        client.reload_headers().await;
        config.register(client.clone());
        client
    }

    async fn reload_headers(&self) {
        let api_key = self.config.get_string("API_KEY").await.unwrap_or_default();
        let chain = self
            .config
            .get_string("CHAIN_HEADER")
            .await
            .unwrap_or_else(|| "solana".to_string());
        *self.headers.write().await = ApiHeaders { api_key, chain };
        info!("BirdEye配置已刷新");
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let headers = self.headers.read().await.clone();
        let response = self
            .http
            .get(url)
            .header("X-API-KEY", headers.api_key)
            .header("x-chain", headers.chain)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Live market observation, or None on not-found / transport failure.
    /// Workers treat None as "try again next interval".
    pub async fn market_data(&self, address: &str) -> Option<TokenMarketData> {
        let url = format!("{}/token/market-data", self.defi_base_url);
        let body = match self.get_json(&url, &[("address", address)]).await {
            Ok(body) => body,
            Err(e) => {
                error!("获取市场数据网络请求失败 [{address}]: {e}");
                return None;
            }
        };

        match serde_json::from_value::<BirdeyeEnvelope<TokenMarketData>>(body) {
            Ok(envelope) if envelope.success => envelope.data,
            Ok(_) => {
                error!("获取市场数据API返回失败 [{address}]");
                None
            }
            Err(e) => {
                error!("解析市场数据失败 [{address}]: {e}");
                None
            }
        }
    }

    /// Token metadata, served from the permanent cache when present.
    pub async fn token_meta(&self, address: &str) -> Option<TokenMeta> {
        match self.store.meta_cache_get(address).await {
            Ok(Some(cached)) => {
                if let Ok(meta) = serde_json::from_str::<TokenMeta>(&cached) {
                    return Some(meta);
                }
                warn!("token元数据缓存损坏，重新拉取: {address}");
            }
            Ok(None) => {}
            Err(e) => warn!("读取token元数据缓存失败 [{address}]: {e}"),
        }

        let url = format!("{}/token/meta-data/single", self.defi_base_url);
        let body = match self.get_json(&url, &[("address", address)]).await {
            Ok(body) => body,
            Err(e) => {
                error!("获取token元数据网络请求失败 [{address}]: {e}");
                return None;
            }
        };

        let envelope: BirdeyeEnvelope<Value> = match serde_json::from_value(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("解析token元数据失败 [{address}]: {e}");
                return None;
            }
        };
        if !envelope.success {
            error!("获取token元数据API返回失败 [{address}]");
            return None;
        }
        let data = envelope.data?;
        let meta: TokenMeta = match serde_json::from_value(data.clone()) {
            Ok(meta) => meta,
            Err(e) => {
                error!("解析token元数据失败 [{address}]: {e}");
                return None;
            }
        };

        if let Err(e) = self.store.meta_cache_put(address, &data.to_string()).await {
            warn!("写入token元数据缓存失败 [{address}]: {e}");
        }
        info!("成功获取token元数据: {address}");
        Some(meta)
    }

    /// Wallet holdings with USD valuation.
    pub async fn wallet_token_list(&self, wallet_address: &str) -> Option<WalletPortfolio> {
        let url = format!("{}/wallet/token_list", self.wallet_base_url);
        let body = match self.get_json(&url, &[("wallet", wallet_address)]).await {
            Ok(body) => body,
            Err(e) => {
                error!("获取钱包token列表网络请求失败 [{wallet_address}]: {e}");
                return None;
            }
        };

        match serde_json::from_value::<BirdeyeEnvelope<WalletPortfolio>>(body) {
            Ok(envelope) if envelope.success => envelope.data,
            Ok(_) => {
                error!("获取钱包token列表API返回失败 [{wallet_address}]");
                None
            }
            Err(e) => {
                error!("解析钱包token列表失败 [{wallet_address}]: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ConfigSubscriber for MarketDataClient {
    async fn refresh(&self) -> Result<()> {
        self.reload_headers().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::store::ConfigType;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_client(server: &MockServer) -> (Arc<MarketDataClient>, Store) {
        let store = Store::open_in_memory().await.unwrap();
        let config = ConfigRegistry::new(store.clone());
        config
            .set("API_KEY", "test-key", "", ConfigType::String)
            .await
            .unwrap();
        config
            .set("CHAIN_HEADER", "solana", "", ConfigType::String)
            .await
            .unwrap();
        let client =
            MarketDataClient::with_base_urls(store.clone(), config, &server.uri(), &server.uri())
                .await;
        (client, store)
    }

    #[tokio::test]
    async fn market_data_sends_auth_headers_and_parses_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token/market-data"))
            .and(query_param("address", "mint-a"))
            .and(header("X-API-KEY", "test-key"))
            .and(header("x-chain", "solana"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "price": 0.02,
                    "market_cap": 1_100_000.0,
                    "liquidity": 50_000.0,
                    "total_supply": 1e9,
                    "circulating_supply": 9e8,
                    "fdv": 1_200_000.0
                }
            })))
            .mount(&server)
            .await;

        let (client, _store) = test_client(&server).await;
        let data = client.market_data("mint-a").await.unwrap();
        assert!((data.price - 0.02).abs() < 1e-12);
        assert!((data.market_cap - 1_100_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn market_data_is_none_on_unsuccessful_or_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token/market-data"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": false, "data": null})),
            )
            .mount(&server)
            .await;

        let (client, _store) = test_client(&server).await;
        assert!(client.market_data("mint-a").await.is_none());

        // unreachable server
        let store = Store::open_in_memory().await.unwrap();
        let config = ConfigRegistry::new(store.clone());
        let dead = MarketDataClient::with_base_urls(
            store,
            config,
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
        )
        .await;
        assert!(dead.market_data("mint-a").await.is_none());
    }

    #[tokio::test]
    async fn token_meta_is_cached_forever() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token/meta-data/single"))
            .and(query_param("address", "mint-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "address": "mint-a",
                    "name": "Test Meme",
                    "symbol": "MEME",
                    "decimals": 6,
                    "logo_uri": "https://example.com/logo.png"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = test_client(&server).await;

        let first = client.token_meta("mint-a").await.unwrap();
        assert_eq!(first.symbol.as_deref(), Some("MEME"));
        assert_eq!(first.decimals, Some(6));
        assert!(store.meta_cache_get("mint-a").await.unwrap().is_some());

        // Second call must be served from the cache; wiremock's expect(1)
        // fails the test if the network is hit again.
        let second = client.token_meta("mint-a").await.unwrap();
        assert_eq!(second.name.as_deref(), Some("Test Meme"));
    }

    #[tokio::test]
    async fn wallet_token_list_parses_camel_case_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet/token_list"))
            .and(query_param("wallet", "wallet-pubkey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "wallet": "wallet-pubkey",
                    "totalUsd": 123.45,
                    "items": [{
                        "address": "mint-a",
                        "name": "Test Meme",
                        "symbol": "MEME",
                        "uiAmount": 1000.0,
                        "priceUsd": 0.02,
                        "valueUsd": 20.0,
                        "logoURI": "https://example.com/logo.png"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let (client, _store) = test_client(&server).await;
        let portfolio = client.wallet_token_list("wallet-pubkey").await.unwrap();
        assert!((portfolio.total_usd - 123.45).abs() < 1e-9);
        assert_eq!(portfolio.items.len(), 1);
        assert!((portfolio.items[0].ui_amount - 1000.0).abs() < 1e-9);
        assert_eq!(portfolio.items[0].logo_uri.as_deref(), Some("https://example.com/logo.png"));
    }

    #[tokio::test]
    async fn refresh_picks_up_new_headers_without_restart() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token/market-data"))
            .and(header("X-API-KEY", "rotated-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"price": 1.0, "market_cap": 2.0}
            })))
            .mount(&server)
            .await;

        let store = Store::open_in_memory().await.unwrap();
        let config = ConfigRegistry::new(store.clone());
        config
            .set("API_KEY", "old-key", "", ConfigType::String)
            .await
            .unwrap();
        let client =
            MarketDataClient::with_base_urls(store, config.clone(), &server.uri(), &server.uri())
                .await;

        // old key does not match the mock
        assert!(client.market_data("mint-a").await.is_none());

        config
            .set("API_KEY", "rotated-key", "", ConfigType::String)
            .await
            .unwrap();
        assert_eq!(config.refresh_all().await, 1);
        assert!(client.market_data("mint-a").await.is_some());
    }
}
