use crate::config::TelegramConfig;
use crate::metrics::Metrics;
use crate::state::AlertRequest;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use tracing::{debug, warn};

/// Sends critical-node alerts to the configured Telegram chats. Delivery is
/// fire-and-forget: `dispatch` returns immediately and the poll loop never
/// learns whether a message arrived.
#[derive(Clone)]
pub struct Notifier {
    bot: Bot,
    cfg: TelegramConfig,
    metrics: Arc<Metrics>,
}

impl Notifier {
    pub fn new(bot: Bot, cfg: TelegramConfig, metrics: Arc<Metrics>) -> Self {
        Self { bot, cfg, metrics }
    }

    /// Hands the batch to a detached task. Send failures are logged and
    /// dropped; there is no retry.
    pub fn dispatch(&self, alerts: Vec<AlertRequest>) {
        if alerts.is_empty() || self.cfg.allowed_chat_ids.is_empty() {
            return;
        }

        let notifier = self.clone();
        tokio::spawn(async move {
            for alert in &alerts {
                notifier.send_alert(alert).await;
            }
        });
    }

    async fn send_alert(&self, alert: &AlertRequest) {
        let text = alert_text(alert);
        for chat_id in &self.cfg.allowed_chat_ids {
            match self
                .bot
                .send_message(ChatId(*chat_id), text.clone())
                .parse_mode(ParseMode::Html)
                .await
            {
                Ok(_) => {
                    self.metrics.inc_alert_sent("critical");
                    debug!(chat_id = *chat_id, subject = %alert.subject, "alert delivered");
                }
                Err(err) => {
                    warn!(chat_id = *chat_id, error = %err, "failed to deliver critical alert");
                }
            }
        }
    }
}

fn alert_text(alert: &AlertRequest) -> String {
    format!(
        "⚠ <b>{}</b>\n{}",
        escape_html(&alert.subject),
        escape_html(&alert.body)
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
