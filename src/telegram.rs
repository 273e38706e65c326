use crate::types::{ExitReason, Side};
use serde::Serialize;

const API_ROOT: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Operator chat for trade notifications.
#[derive(Clone)]
pub struct TelegramBot {
    http: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramBot {
    pub fn new(token: &str, chat_id: String) -> Self {
        TelegramBot {
            http: reqwest::Client::new(),
            endpoint: format!("{API_ROOT}/bot{token}/sendMessage"),
            chat_id,
        }
    }

    /// TELEGRAM_TOKEN and TELEGRAM_CHAT_ID; notifications are off when either is unset.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").ok().filter(|t| !t.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|c| !c.is_empty())?;
        Some(Self::new(&token, chat_id))
    }

    /// Best effort: failures are logged, never returned.
    pub async fn send(&self, text: &str) {
        let msg = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let status = match self.http.post(&self.endpoint).json(&msg).send().await {
            Ok(resp) => resp.status(),
            Err(e) => {
                log::warn!("telegram: request failed: {}", e);
                return;
            }
        };
        if status.is_success() {
            let first_line = text.lines().next().unwrap_or_default();
            log::debug!("telegram: sent \"{}\"", first_line);
        } else {
            log::warn!("telegram: rejected with HTTP {}", status);
        }
    }

    // ── Notifications ─────────────────────────────────────────────────────────

    pub async fn notify_start(&self, symbol: &str, interval: &str) {
        self.send(&format!("🤖 <b>Cycle trader started</b>\nPair: {symbol} | TF: {interval}"))
            .await;
    }

    pub async fn notify_trade_open(&self, symbol: &str, side: Side, qty: f64, entry: f64, sl: f64, tp1: Option<f64>) {
        self.send(&format_open(symbol, side, qty, entry, sl, tp1)).await;
    }

    pub async fn notify_trade_close(&self, symbol: &str, side: Side, exit: f64, pnl: f64, reason: ExitReason, partial: bool) {
        self.send(&format_close(symbol, side, exit, pnl, reason, partial)).await;
    }

    pub async fn notify_error(&self, symbol: &str, message: &str) {
        self.send(&format!("⚠️ <b>{symbol}</b>\n{message}")).await;
    }
}

fn price_or_dash(p: Option<f64>) -> String {
    p.map(|v| format!("{v:.2}")).unwrap_or_else(|| "—".to_string())
}

pub fn format_open(symbol: &str, side: Side, qty: f64, entry: f64, sl: f64, tp1: Option<f64>) -> String {
    let emoji = if side == Side::Long { "🟢" } else { "🔴" };
    let tp1 = price_or_dash(tp1);
    [
        format!("{emoji} <b>{side} {symbol}</b> opened"),
        format!("qty <code>{qty:.4}</code> @ <code>{entry:.2}</code>"),
        format!("sl <code>{sl:.2}</code> · tp1 <code>{tp1}</code>"),
    ]
    .join("\n")
}

pub fn format_close(symbol: &str, side: Side, exit: f64, pnl: f64, reason: ExitReason, partial: bool) -> String {
    let emoji = if pnl >= 0.0 { "✅" } else { "❌" };
    let what = if partial { "partially closed" } else { "closed" };
    [
        format!("{emoji} <b>{side} {symbol}</b> {what} ({reason})"),
        format!("exit <code>{exit:.2}</code> · pnl <code>{pnl:+.2} USDT</code>"),
    ]
    .join("\n")
}
