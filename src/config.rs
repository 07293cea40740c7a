//! Process configuration backed by the store, with an explicit refresh
//! fan-out to subscribed services.
//!
//! There is no reactive invalidation: services cache what they read, and an
//! operator action calls [`ConfigRegistry::refresh_all`] to push new values
//! into every registered subscriber.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::modules::error_handling::SentinelResult;
use crate::modules::store::{ConfigRecord, ConfigType, Store};

/// Recognized keys seeded on first run.
const DEFAULT_CONFIGS: &[(&str, &str, &str, ConfigType)] = &[
    ("API_KEY", "xxx", "Birdeye API密钥", ConfigType::String),
    ("CHAIN_HEADER", "solana", "区块链类型", ConfigType::String),
    (
        "RPC_URL",
        "https://api.mainnet-beta.solana.com",
        "Solana RPC节点地址",
        ConfigType::String,
    ),
    (
        "JUPITER_API_URL",
        "https://quote-api.jup.ag/v6",
        "Jupiter API地址",
        ConfigType::String,
    ),
    ("SLIPPAGE_BPS", "100", "滑点设置（100 = 1%）", ConfigType::Number),
];

/// A typed view of one config row, coerced per its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Json(Value),
}

/// Services that cache configuration register themselves here and expose
/// `refresh` so an operator can re-read everything without a restart.
#[async_trait]
pub trait ConfigSubscriber: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

pub struct ConfigRegistry {
    store: Store,
    subscribers: Mutex<Vec<Arc<dyn ConfigSubscriber>>>,
}

impl ConfigRegistry {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self {
            store,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Writes the default rows that do not exist yet.
    pub async fn seed_defaults(&self) -> SentinelResult<()> {
        for (key, value, description, config_type) in DEFAULT_CONFIGS {
            self.store
                .config_put_if_absent(key, value, description, *config_type)
                .await?;
        }
        Ok(())
    }

    /// Reads a key coerced per its declared type. Unparseable values read as
    /// absent, matching the lenient get-with-default contract.
    pub async fn get(&self, key: &str) -> Option<ConfigValue> {
        let record = self.store.config_get(key).await.ok().flatten()?;
        coerce(&record)
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key).await? {
            ConfigValue::String(s) => Some(s),
            ConfigValue::Number(n) => Some(n.to_string()),
            ConfigValue::Boolean(b) => Some(b.to_string()),
            ConfigValue::Json(v) => Some(v.to_string()),
        }
    }

    pub async fn get_number(&self, key: &str) -> Option<f64> {
        match self.get(key).await? {
            ConfigValue::Number(n) => Some(n),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub async fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key).await? {
            ConfigValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub async fn get_json(&self, key: &str) -> Option<Value> {
        match self.get(key).await? {
            ConfigValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        description: &str,
        config_type: ConfigType,
    ) -> SentinelResult<()> {
        self.store
            .config_set(key, value, description, config_type)
            .await
    }

    pub async fn all(&self) -> SentinelResult<Vec<ConfigRecord>> {
        self.store.config_all().await
    }

    pub async fn delete(&self, key: &str) -> SentinelResult<bool> {
        self.store.config_delete(key).await
    }

    /// Registers a service for refresh fan-out. Registration happens at
    /// service construction and is never undone.
    pub fn register(&self, subscriber: Arc<dyn ConfigSubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    /// Pushes fresh configuration into every subscriber; returns how many
    /// refreshed successfully.
    pub async fn refresh_all(&self) -> usize {
        let subscribers: Vec<Arc<dyn ConfigSubscriber>> =
            self.subscribers.lock().unwrap().clone();

        let mut refreshed = 0;
        for subscriber in subscribers {
            match subscriber.refresh().await {
                Ok(()) => refreshed += 1,
                Err(e) => error!("刷新服务配置失败: {e}"),
            }
        }
        info!("已刷新 {refreshed} 个服务的配置");
        refreshed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

fn coerce(record: &ConfigRecord) -> Option<ConfigValue> {
    match record.config_type {
        ConfigType::String => Some(ConfigValue::String(record.value.clone())),
        ConfigType::Number => record.value.parse::<f64>().ok().map(ConfigValue::Number),
        ConfigType::Boolean => {
            let truthy = matches!(
                record.value.to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            );
            Some(ConfigValue::Boolean(truthy))
        }
        ConfigType::Json => serde_json::from_str(&record.value).ok().map(ConfigValue::Json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ConfigSubscriber for CountingSubscriber {
        async fn refresh(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("refresh failed"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn seeds_defaults_without_clobbering_operator_values() {
        let store = Store::open_in_memory().await.unwrap();
        let registry = ConfigRegistry::new(store.clone());

        registry
            .set("SLIPPAGE_BPS", "250", "滑点设置", ConfigType::Number)
            .await
            .unwrap();
        registry.seed_defaults().await.unwrap();

        assert_eq!(registry.get_number("SLIPPAGE_BPS").await, Some(250.0));
        assert_eq!(
            registry.get_string("CHAIN_HEADER").await.as_deref(),
            Some("solana")
        );
        assert_eq!(registry.all().await.unwrap().len(), DEFAULT_CONFIGS.len());
    }

    #[tokio::test]
    async fn coerces_values_by_declared_type() {
        let store = Store::open_in_memory().await.unwrap();
        let registry = ConfigRegistry::new(store);

        registry
            .set("MAX_RETRIES", "5", "", ConfigType::Number)
            .await
            .unwrap();
        registry
            .set("FEATURE_ON", "Yes", "", ConfigType::Boolean)
            .await
            .unwrap();
        registry
            .set("FEATURE_OFF", "nope", "", ConfigType::Boolean)
            .await
            .unwrap();
        registry
            .set("ENDPOINTS", r#"{"primary": "a"}"#, "", ConfigType::Json)
            .await
            .unwrap();
        registry
            .set("BROKEN_NUMBER", "not-a-number", "", ConfigType::Number)
            .await
            .unwrap();

        assert_eq!(registry.get_number("MAX_RETRIES").await, Some(5.0));
        assert_eq!(registry.get_bool("FEATURE_ON").await, Some(true));
        assert_eq!(registry.get_bool("FEATURE_OFF").await, Some(false));
        assert_eq!(
            registry.get_json("ENDPOINTS").await.unwrap()["primary"],
            "a"
        );
        assert_eq!(registry.get_number("BROKEN_NUMBER").await, None);
        assert_eq!(registry.get_number("MISSING").await, None);
    }

    #[tokio::test]
    async fn refresh_all_counts_only_successes() {
        let store = Store::open_in_memory().await.unwrap();
        let registry = ConfigRegistry::new(store);

        let good = Arc::new(CountingSubscriber {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let bad = Arc::new(CountingSubscriber {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        registry.register(good.clone());
        registry.register(bad.clone());

        assert_eq!(registry.refresh_all().await, 1);
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);

        // fan-out hits every subscriber again on the next operator action
        assert_eq!(registry.refresh_all().await, 1);
        assert_eq!(good.calls.load(Ordering::SeqCst), 2);
    }
}
