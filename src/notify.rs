//! Notification sinks for run summaries and out-of-band errors
//!
//! Every sink is independently enabled. Delivery failures are logged and
//! swallowed: a failed notification never turns into a failed run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{resolve_credential, NotificationConfig};
use crate::summary::RunSummary;

type HmacSha256 = Hmac<Sha256>;

/// Failures listed individually in a Slack message
const SLACK_FAILURE_LIMIT: usize = 5;

/// Receives the result of every live run, plus errors raised outside any task
#[async_trait]
pub trait SummaryReporter: Send + Sync {
    async fn send_backup_summary(&self, summary: &RunSummary);

    async fn send_error_notification(&self, message: &str);
}

/// Slack, generic webhook and email delivery
pub struct NotificationManager {
    config: NotificationConfig,
    client: reqwest::Client,
    timeout: Duration,
}

impl NotificationManager {
    pub fn new(config: &NotificationConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build notification HTTP client")?;

        Ok(Self {
            config: config.clone(),
            client,
            timeout,
        })
    }

    fn email_enabled(&self) -> bool {
        let email = &self.config.email;
        email.enabled && !email.smtp_server.is_empty() && !email.recipients.is_empty()
    }

    /// HTML message from the configured sender to every recipient
    pub fn email_message(&self, subject: &str, html: String) -> Result<Message> {
        let email = &self.config.email;
        let from = email.from_address.as_deref().unwrap_or(&email.username);

        let mut builder = Message::builder()
            .from(
                from.parse::<Mailbox>()
                    .with_context(|| format!("Invalid sender address: {}", from))?,
            )
            .subject(subject)
            .header(ContentType::TEXT_HTML);

        for recipient in &email.recipients {
            builder = builder.to(recipient
                .parse::<Mailbox>()
                .with_context(|| format!("Invalid recipient address: {}", recipient))?);
        }

        builder.body(html).context("Failed to build email message")
    }

    async fn send_email(&self, subject: &str, html: String) -> Result<()> {
        let email = &self.config.email;
        let message = self.email_message(subject, html)?;

        let builder = if email.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.smtp_server)
                .with_context(|| format!("Invalid SMTP server: {}", email.smtp_server))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&email.smtp_server)
        };
        let mut transport = builder.port(email.smtp_port).timeout(Some(self.timeout));

        if !email.username.is_empty() {
            transport = transport.credentials(Credentials::new(
                email.username.clone(),
                resolve_credential(&email.password),
            ));
        }

        transport
            .build()
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }

    fn slack_url(&self) -> Option<String> {
        let slack = &self.config.slack;
        if !slack.enabled {
            return None;
        }
        Some(resolve_credential(&slack.webhook_url)).filter(|url| !url.is_empty())
    }

    fn webhook_url(&self) -> Option<String> {
        let webhook = &self.config.webhook;
        if !webhook.enabled {
            return None;
        }
        Some(resolve_credential(&webhook.url)).filter(|url| !url.is_empty())
    }

    async fn post_slack(&self, url: &str, message: &Value) -> Result<()> {
        self.client
            .post(url)
            .json(message)
            .send()
            .await
            .context("Slack request failed")?
            .error_for_status()
            .context("Slack rejected the message")?;
        Ok(())
    }

    async fn post_webhook(&self, url: &str, payload: &Value) -> Result<()> {
        let body = serde_json::to_vec(payload).context("Failed to encode webhook payload")?;

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = self.config.webhook.secret.as_deref() {
            let secret = resolve_credential(secret);
            if !secret.is_empty() {
                request = request.header("X-Webhook-Signature", sign_payload(&secret, &body)?);
            }
        }

        request
            .body(body)
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook endpoint rejected the payload")?;
        Ok(())
    }
}

#[async_trait]
impl SummaryReporter for NotificationManager {
    async fn send_backup_summary(&self, summary: &RunSummary) {
        if let Some(url) = self.slack_url() {
            let message = slack_summary_message(summary, &self.config.slack.channel);
            match self.post_slack(&url, &message).await {
                Ok(()) => info!("Slack notification sent successfully"),
                Err(e) => error!("Failed to send Slack notification: {:#}", e),
            }
        }

        if let Some(url) = self.webhook_url() {
            match webhook_payload("backup_summary", summary) {
                Ok(payload) => match self.post_webhook(&url, &payload).await {
                    Ok(()) => info!("Webhook notification sent successfully"),
                    Err(e) => error!("Failed to send webhook notification: {:#}", e),
                },
                Err(e) => error!("Failed to build webhook payload: {:#}", e),
            }
        }

        if self.email_enabled() {
            let subject = format!(
                "Organization Backup Summary - {}",
                summary.finished_at.format("%Y-%m-%d %H:%M:%S")
            );
            match self.send_email(&subject, email_summary_html(summary)).await {
                Ok(()) => info!("Email notification sent successfully"),
                Err(e) => error!("Failed to send email notification: {:#}", e),
            }
        }
    }

    async fn send_error_notification(&self, message: &str) {
        let error_data = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "error": message,
        });

        if let Some(url) = self.slack_url() {
            let slack = slack_error_message(message, &self.config.slack.channel);
            match self.post_slack(&url, &slack).await {
                Ok(()) => info!("Slack error notification sent successfully"),
                Err(e) => error!("Failed to send Slack error notification: {:#}", e),
            }
        }

        if let Some(url) = self.webhook_url() {
            match webhook_payload("backup_error", &error_data) {
                Ok(payload) => match self.post_webhook(&url, &payload).await {
                    Ok(()) => info!("Webhook error notification sent successfully"),
                    Err(e) => error!("Failed to send webhook error notification: {:#}", e),
                },
                Err(e) => error!("Failed to build webhook payload: {:#}", e),
            }
        }

        if self.email_enabled() {
            let now = Utc::now();
            let subject = format!("Organization Backup Error - {}", now.format("%Y-%m-%d %H:%M:%S"));
            match self.send_email(&subject, email_error_html(message, &now.to_rfc3339())).await {
                Ok(()) => info!("Email error notification sent successfully"),
                Err(e) => error!("Failed to send email error notification: {:#}", e),
            }
        }

        debug!("Error notification dispatched: {}", message);
    }
}

/// `sha256=<hex>` HMAC of the exact request body
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid webhook secret: {}", e))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// `{timestamp, type, data}` envelope sent to the generic webhook
pub fn webhook_payload<T: serde::Serialize>(kind: &str, data: &T) -> Result<Value> {
    Ok(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "type": kind,
        "data": serde_json::to_value(data).context("Failed to encode notification data")?,
    }))
}

/// Slack attachment: green when nothing failed, red when nothing succeeded
pub fn slack_summary_message(summary: &RunSummary, channel: &str) -> Value {
    let color = if summary.failed == 0 {
        "good"
    } else if summary.successful == 0 {
        "danger"
    } else {
        "warning"
    };

    let mut fields = vec![
        json!({"title": "Total Backups", "value": summary.total.to_string(), "short": true}),
        json!({"title": "Successful", "value": summary.successful.to_string(), "short": true}),
        json!({"title": "Failed", "value": summary.failed.to_string(), "short": true}),
        json!({
            "title": "Duration",
            "value": format!("{:.2} seconds", summary.duration_seconds),
            "short": true
        }),
    ];

    if summary.dry_run > 0 {
        fields.push(json!({"title": "Dry Run", "value": summary.dry_run.to_string(), "short": true}));
    }

    if !summary.per_target.is_empty() {
        let breakdown: String = summary
            .per_target
            .iter()
            .map(|(target, stats)| format!("• {}: {}✓ {}✗\n", target, stats.success, stats.failed))
            .collect();
        fields.push(json!({"title": "Target Breakdown", "value": breakdown, "short": false}));
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        let mut text: String = failures
            .iter()
            .take(SLACK_FAILURE_LIMIT)
            .map(|o| {
                format!(
                    "• {} → {}: {}\n",
                    o.repository,
                    o.target,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if failures.len() > SLACK_FAILURE_LIMIT {
            text.push_str(&format!("... and {} more", failures.len() - SLACK_FAILURE_LIMIT));
        }
        fields.push(json!({"title": "Failed Backups", "value": text, "short": false}));
    }

    json!({
        "channel": channel,
        "attachments": [{
            "color": color,
            "title": "Organization Backup Summary",
            "text": format!("Backup completed at {}", summary.finished_at.to_rfc3339()),
            "fields": fields,
            "footer": "orgbackup",
        }]
    })
}

pub fn slack_error_message(message: &str, channel: &str) -> Value {
    json!({
        "channel": channel,
        "attachments": [{
            "color": "danger",
            "title": "Backup Error",
            "text": format!("Error occurred at {}", Utc::now().to_rfc3339()),
            "fields": [{"title": "Error", "value": message, "short": false}],
            "footer": "orgbackup",
        }]
    })
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

const EMAIL_STYLE: &str = "<style>\n\
body { font-family: Arial, sans-serif; margin: 20px; }\n\
.header { background-color: #f0f0f0; padding: 20px; border-radius: 5px; }\n\
.error { color: #dc3545; }\n\
table { border-collapse: collapse; width: 100%; }\n\
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }\n\
</style>\n";

/// HTML body with totals, the per-target table and every failure
pub fn email_summary_html(summary: &RunSummary) -> String {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n{}</head>\n<body>\n\
<div class=\"header\">\n<h1>Organization Backup Summary</h1>\n\
<p><strong>Completed:</strong> {}</p>\n\
<p><strong>Duration:</strong> {:.2} seconds</p>\n</div>\n\
<h2>Overall Statistics</h2>\n<ul>\n\
<li>Total: {}</li>\n<li>Successful: {}</li>\n<li class=\"error\">Failed: {}</li>\n",
        EMAIL_STYLE,
        summary.finished_at.to_rfc3339(),
        summary.duration_seconds,
        summary.total,
        summary.successful,
        summary.failed,
    );
    if summary.dry_run > 0 {
        html.push_str(&format!("<li>Dry Run: {}</li>\n", summary.dry_run));
    }
    html.push_str("</ul>\n");

    if !summary.per_target.is_empty() {
        html.push_str(
            "<h2>Target Breakdown</h2>\n<table>\n\
<tr><th>Target</th><th>Successful</th><th>Failed</th><th>Dry Run</th></tr>\n",
        );
        for (target, stats) in &summary.per_target {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"error\">{}</td><td>{}</td></tr>\n",
                escape_html(target),
                stats.success,
                stats.failed,
                stats.dry_run
            ));
        }
        html.push_str("</table>\n");
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        html.push_str(&format!("<h2>Failed Backups ({})</h2>\n<ul>\n", failures.len()));
        for outcome in failures {
            html.push_str(&format!(
                "<li><strong>{}</strong> -&gt; {}: {}</li>\n",
                escape_html(&outcome.repository),
                escape_html(&outcome.target),
                escape_html(outcome.error.as_deref().unwrap_or("unknown error"))
            ));
        }
        html.push_str("</ul>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

pub fn email_error_html(message: &str, timestamp: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n{}</head>\n<body>\n\
<div class=\"header\">\n<h1>Organization Backup Error</h1>\n\
<p><strong>Timestamp:</strong> {}</p>\n</div>\n\
<h2>Error Details</h2>\n<p class=\"error\"><strong>Error:</strong> {}</p>\n\
</body>\n</html>\n",
        EMAIL_STYLE,
        escape_html(timestamp),
        escape_html(message)
    )
}
