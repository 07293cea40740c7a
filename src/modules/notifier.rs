//! Outbound webhook notifications.
//!
//! One notifier per monitor, bound to that record's webhook URL. Delivery
//! failures are logged and swallowed; notification must never affect monitor
//! state.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::modules::market_data::TokenMarketData;

/// Which side of the book a notification talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
    Swing,
}

pub struct Notifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl Notifier {
    pub fn new(webhook_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            webhook_url: webhook_url.to_string(),
        }
    }

    /// Posts one text message. Returns whether the webhook acknowledged it
    /// with `code: 0`; callers are free to ignore the result.
    pub async fn send_message(&self, title: &str, content: &str) -> bool {
        if self.webhook_url.is_empty() {
            warn!("未设置Webhook URL，无法发送通知");
            return false;
        }

        let mut payload = json!({
            "msg_type": "text",
            "content": { "text": content }
        });
        if !title.is_empty() {
            payload["content"]["title"] = json!(title);
        }

        let response = match self.http.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("发送通知时出错: {e}");
                return false;
            }
        };

        match response.json::<Value>().await {
            Ok(body) if body.get("code").and_then(Value::as_i64) == Some(0) => {
                info!("通知发送成功");
                true
            }
            Ok(body) => {
                error!("通知发送失败: {body}");
                false
            }
            Err(e) => {
                error!("发送通知时出错: {e}");
                false
            }
        }
    }

    /// Threshold-reached alert, or a market-move report admitted by the
    /// change filter (`percent_change` signed).
    pub async fn send_price_alert(
        &self,
        market: &TokenMarketData,
        name: &str,
        threshold_reached: bool,
        side: TradeSide,
        percent_change: Option<f64>,
    ) -> bool {
        let (title, content) = if threshold_reached {
            let action = match side {
                TradeSide::Buy => "系统准备执行自动买入操作...",
                _ => "系统准备执行自动出售操作...",
            };
            let title = format!("【{name}】市值阈值已达到！");
            let content = format!(
                "【{name}】市值阈值已达到！\n当前价格: ${:.8}\n当前市值: ${:.2}\n\n{action}",
                market.price, market.market_cap
            );
            (title, content)
        } else if let Some(pct) = percent_change {
            let direction = if pct > 0.0 { "激增" } else { "骤降" };
            let title = format!("【{name}】市值{direction}{:.2}%", pct.abs());
            let content = format!(
                "{title}\n\n当前价格: ${:.8}\n当前市值: ${:.2}\n与上次相比{direction}{:.2}%",
                market.price,
                market.market_cap,
                pct.abs()
            );
            (title, content)
        } else {
            let title = format!("【{name}】市值变化通知");
            let content = format!(
                "当前价格: ${:.8}\n当前市值: ${:.2}",
                market.price, market.market_cap
            );
            (title, content)
        };

        self.send_message(&title, &content).await
    }

    pub async fn send_trade_notification(
        &self,
        tx_hash: &str,
        amount: f64,
        estimated_usd_value: f64,
        name: &str,
        token_symbol: Option<&str>,
        side: TradeSide,
    ) -> bool {
        let symbol = token_symbol.unwrap_or("代币");
        let (title, verb) = match side {
            TradeSide::Buy => (format!("【{name}】自动买入交易已完成！"), "买入"),
            _ => (format!("【{name}】自动出售交易已完成！"), "出售"),
        };
        let content = format!(
            "{title}\n{verb}数量: {amount:.6} {symbol}\n估算价值: ${estimated_usd_value:.2} USD\n\
             交易哈希: {tx_hash}\n查看交易: https://solscan.io/tx/{tx_hash}"
        );
        self.send_message(&title, &content).await
    }

    pub async fn send_error_notification(&self, error_msg: &str, name: Option<&str>) -> bool {
        let (title, content) = match name {
            Some(name) => (
                format!("❌ 【{name}】系统错误"),
                format!("【{name}】监控系统遇到错误: {error_msg}"),
            ),
            None => (
                "❌ 系统错误".to_string(),
                format!("监控系统遇到错误: {error_msg}"),
            ),
        };
        self.send_message(&title, &content).await
    }

    pub async fn send_startup_notification(&self, name: &str) -> bool {
        let title = format!("🚀 【{name}】监控系统启动");
        let content = format!("【{name}】币价监控系统已启动，开始监控市值变化...");
        self.send_message(&title, &content).await
    }

    /// Free-form terminal notification used when a monitor completes.
    pub async fn send_completion(&self, title: &str, content: &str) -> bool {
        self.send_message(title, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_text_envelope_and_detects_code_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "msg_type": "text",
                "content": { "text": "body", "title": "title" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .mount(&server)
            .await;

        let notifier = Notifier::new(&format!("{}/hook", server.uri()));
        assert!(notifier.send_message("title", "body").await);
    }

    #[tokio::test]
    async fn non_zero_code_and_transport_failure_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 19001, "msg": "bad"})),
            )
            .mount(&server)
            .await;

        let notifier = Notifier::new(&server.uri());
        assert!(!notifier.send_message("", "body").await);

        let dead = Notifier::new("http://127.0.0.1:9/hook");
        assert!(!dead.send_error_notification("boom", Some("mon")).await);

        let unset = Notifier::new("");
        assert!(!unset.send_startup_notification("mon").await);
    }

    #[tokio::test]
    async fn alert_variants_render_expected_titles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "content": { "title": "【mon】市值骤降12.50%" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&server.uri());
        let market = TokenMarketData {
            price: 0.5,
            market_cap: 900_000.0,
            ..Default::default()
        };
        assert!(
            notifier
                .send_price_alert(&market, "mon", false, TradeSide::Sell, Some(-12.5))
                .await
        );
    }
}
