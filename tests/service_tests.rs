// Service-layer tests: input validation before any state change, token
// metadata enrichment on create/update, and the private-key lifecycle with
// public-key derivation.

use std::sync::Arc;

use serde_json::json;
use solana_sdk::signature::{Keypair, Signer};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use meme_sentinel::modules::error_handling::SentinelError;
use meme_sentinel::modules::monitor_service::{NewSimpleMonitor, NewSwingMonitor};
use meme_sentinel::modules::store::{ConfigType, MonitorKind, PriceType};
use meme_sentinel::{ConfigRegistry, MarketDataClient, MonitorService, Store};

fn meta_body(symbol: &str, decimals: u8) -> serde_json::Value {
    json!({
        "success": true,
        "data": {
            "address": "whatever",
            "name": format!("{symbol} Token"),
            "symbol": symbol,
            "decimals": decimals,
            "logo_uri": "https://example.com/logo.png"
        }
    })
}

async fn service_with_mock(server: &MockServer) -> (MonitorService, Store) {
    let store = Store::open_in_memory().await.unwrap();
    let config = ConfigRegistry::new(store.clone());
    config
        .set("API_KEY", "k", "", ConfigType::String)
        .await
        .unwrap();
    let market =
        MarketDataClient::with_base_urls(store.clone(), config, &server.uri(), &server.uri()).await;
    (MonitorService::new(store.clone(), market), store)
}

fn test_secret() -> String {
    bs58::encode(Keypair::new().to_bytes()).into_string()
}

fn simple_params(key_id: i64) -> NewSimpleMonitor {
    NewSimpleMonitor {
        name: "mon-a".to_string(),
        private_key_id: key_id,
        token_address: "mint-a".to_string(),
        kind: MonitorKind::Sell,
        threshold: 1_000_000.0,
        percentage: 0.5,
        webhook_url: "http://127.0.0.1:9/hook".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_simple_fetches_and_stores_token_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .and(query_param("address", "mint-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("MEME", 6)))
        .mount(&server)
        .await;

    let (service, _store) = service_with_mock(&server).await;
    let key = service
        .create_private_key("trading", &test_secret())
        .await
        .unwrap();

    let record = service.create_simple(simple_params(key.id)).await.unwrap();
    assert_eq!(record.token_symbol.as_deref(), Some("MEME"));
    assert_eq!(record.token_decimals, Some(6));
    assert_eq!(record.kind, MonitorKind::Sell);
    // sell monitors never carry a buy cap
    assert_eq!(record.max_buy_usd, 0.0);
}

#[tokio::test]
async fn validation_rejects_bad_input_before_any_state_change() {
    let server = MockServer::start().await;
    let (service, store) = service_with_mock(&server).await;
    let key = service
        .create_private_key("trading", &test_secret())
        .await
        .unwrap();

    let cases: Vec<(NewSimpleMonitor, &str)> = vec![
        (
            NewSimpleMonitor {
                percentage: 0.0,
                ..simple_params(key.id)
            },
            "percentage low",
        ),
        (
            NewSimpleMonitor {
                percentage: 1.5,
                ..simple_params(key.id)
            },
            "percentage high",
        ),
        (
            NewSimpleMonitor {
                threshold: 0.0,
                ..simple_params(key.id)
            },
            "threshold",
        ),
        (
            NewSimpleMonitor {
                check_interval_seconds: 0,
                ..simple_params(key.id)
            },
            "interval",
        ),
        (
            NewSimpleMonitor {
                minimum_hold_usd: -1.0,
                ..simple_params(key.id)
            },
            "minimum hold",
        ),
        (
            NewSimpleMonitor {
                kind: MonitorKind::Buy,
                max_buy_usd: -5.0,
                ..simple_params(key.id)
            },
            "buy cap",
        ),
    ];

    for (params, label) in cases {
        let err = service.create_simple(params).await.unwrap_err();
        assert!(
            matches!(err, SentinelError::Validation(_)),
            "expected validation error for {label}"
        );
    }

    // nothing was created, and no metadata was ever requested
    assert!(store.list_monitors().await.unwrap().is_empty());

    // an unknown private key is NotFound, still with no state change
    let err = service
        .create_simple(simple_params(9999))
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::NotFound(_)));
}

#[tokio::test]
async fn buy_kind_normalizes_pre_sniper_and_sell_kind_zeroes_the_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("MEME", 6)))
        .mount(&server)
        .await;

    let (service, _store) = service_with_mock(&server).await;
    let key = service
        .create_private_key("trading", &test_secret())
        .await
        .unwrap();

    let record = service
        .create_simple(NewSimpleMonitor {
            kind: MonitorKind::Buy,
            pre_sniper: true,
            max_buy_usd: 100.0,
            ..simple_params(key.id)
        })
        .await
        .unwrap();
    assert!(!record.pre_sniper, "pre-sniper is a sell-branch option");
    assert_eq!(record.max_buy_usd, 100.0);

    let record = service
        .create_simple(NewSimpleMonitor {
            kind: MonitorKind::Sell,
            pre_sniper: true,
            max_buy_usd: 100.0,
            name: "mon-b".to_string(),
            ..simple_params(key.id)
        })
        .await
        .unwrap();
    assert!(record.pre_sniper);
    assert_eq!(record.max_buy_usd, 0.0, "sell monitors carry no buy cap");
}

#[tokio::test]
async fn update_refetches_metadata_only_when_the_address_changes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .and(query_param("address", "mint-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("MEME", 6)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .and(query_param("address", "mint-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("OTHER", 9)))
        .mount(&server)
        .await;

    let (service, _store) = service_with_mock(&server).await;
    let key = service
        .create_private_key("trading", &test_secret())
        .await
        .unwrap();
    let record = service.create_simple(simple_params(key.id)).await.unwrap();

    // same address: metadata untouched
    let updated = service
        .update_simple(
            record.id,
            NewSimpleMonitor {
                threshold: 2_000_000.0,
                ..simple_params(key.id)
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.token_symbol.as_deref(), Some("MEME"));
    assert_eq!(updated.threshold, 2_000_000.0);

    // changed address: metadata follows the new token
    let updated = service
        .update_simple(
            record.id,
            NewSimpleMonitor {
                token_address: "mint-b".to_string(),
                ..simple_params(key.id)
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.token_symbol.as_deref(), Some("OTHER"));
    assert_eq!(updated.token_decimals, Some(9));
}

#[tokio::test]
async fn swing_validation_enforces_threshold_ordering_and_percentages() {
    let server = MockServer::start().await;
    let (service, _store) = service_with_mock(&server).await;
    let key = service
        .create_private_key("trading", &test_secret())
        .await
        .unwrap();

    let base = NewSwingMonitor {
        name: "swing-a".to_string(),
        private_key_id: key.id,
        watch_token_address: "watch-mint".to_string(),
        trade_token_address: "trade-mint".to_string(),
        price_type: PriceType::Price,
        sell_threshold: 2.0,
        buy_threshold: 1.0,
        sell_percentage: 1.0,
        buy_percentage: 1.0,
        webhook_url: "http://127.0.0.1:9/hook".to_string(),
        ..Default::default()
    };

    let err = service
        .create_swing(NewSwingMonitor {
            sell_threshold: 1.0,
            buy_threshold: 2.0,
            ..base.clone()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    let err = service
        .create_swing(NewSwingMonitor {
            sell_percentage: 0.0,
            ..base.clone()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    let err = service
        .create_swing(NewSwingMonitor {
            buy_percentage: 1.2,
            ..base.clone()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    let err = service
        .create_swing(NewSwingMonitor {
            all_in_threshold_usd: -1.0,
            ..base
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));
}

#[tokio::test]
async fn swing_create_populates_both_token_metas() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .and(query_param("address", "watch-mint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("WAT", 6)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .and(query_param("address", "trade-mint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("TRD", 9)))
        .mount(&server)
        .await;

    let (service, _store) = service_with_mock(&server).await;
    let key = service
        .create_private_key("trading", &test_secret())
        .await
        .unwrap();

    let record = service
        .create_swing(NewSwingMonitor {
            name: "swing-a".to_string(),
            private_key_id: key.id,
            watch_token_address: "watch-mint".to_string(),
            trade_token_address: "trade-mint".to_string(),
            price_type: PriceType::MarketCap,
            sell_threshold: 2_000_000.0,
            buy_threshold: 1_000_000.0,
            sell_percentage: 0.5,
            buy_percentage: 0.5,
            webhook_url: "http://127.0.0.1:9/hook".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.watch_token_symbol.as_deref(), Some("WAT"));
    assert_eq!(record.trade_token_symbol.as_deref(), Some("TRD"));
    assert_eq!(record.watch_token_decimals, Some(6));
    assert_eq!(record.trade_token_decimals, Some(9));
}

#[tokio::test]
async fn private_key_lifecycle_derivation_uniqueness_and_in_use_guard() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token/meta-data/single"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body("MEME", 6)))
        .mount(&server)
        .await;

    let (service, _store) = service_with_mock(&server).await;

    // public key is derived, never taken on faith
    let keypair = Keypair::new();
    let secret = bs58::encode(keypair.to_bytes()).into_string();
    let record = service.create_private_key("main", &secret).await.unwrap();
    assert_eq!(record.public_key, keypair.pubkey().to_string());

    // malformed secrets are rejected
    let err = service
        .create_private_key("bad", "not-a-key")
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    // nickname and secret are unique among live keys
    let err = service
        .create_private_key("main", &test_secret())
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));
    let err = service
        .create_private_key("other", &secret)
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    // in-use keys cannot be deleted
    service
        .create_simple(simple_params(record.id))
        .await
        .unwrap();
    let err = service.delete_private_key(record.id).await.unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    // the listing shows a preview only
    let listed = service.list_private_keys().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].secret_preview.len(), 7); // 4 chars + "..."
    assert!(secret.starts_with(listed[0].secret_preview.trim_end_matches("...")));

    // updating re-derives the public key
    let next = Keypair::new();
    let next_secret = bs58::encode(next.to_bytes()).into_string();
    let updated = service
        .update_private_key(record.id, "renamed", &next_secret)
        .await
        .unwrap();
    assert_eq!(updated.public_key, next.pubkey().to_string());

    // a deleted nickname becomes reusable
    let free = service.create_private_key("spare", &test_secret()).await.unwrap();
    service.delete_private_key(free.id).await.unwrap();
    service
        .create_private_key("spare", &test_secret())
        .await
        .unwrap();
}
