//! Outbound mail queue and message composers.
//!
//! Lifecycle requests enqueue a `MailMessage` and return immediately. A background
//! worker drains the unbounded channel and hands each message to a `MailTransport`,
//! retrying failures with exponential backoff and jitter until the attempt budget is
//! spent. Delivery failures are logged and never reach the caller that enqueued.
//!
//! The default transport is `LogMailTransport`, which logs the message and returns
//! `Ok(())`.

use anyhow::Result;
use chrono::Duration as TimeDelta;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use tracing::{error, info, warn};

use crate::account::Principal;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailMessage {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
    pub recipients: Vec<String>,
    pub sender: String,
    pub reply_to: Vec<String>,
}

/// Delivery backend used by the queue worker.
pub trait MailTransport: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &MailMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogMailTransport;

impl MailTransport for LogMailTransport {
    fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            recipients = ?message.recipients,
            sender = %message.sender,
            subject = %message.subject,
            body = %message.plain_body,
            "mail send stub"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    app_name: String,
    sender: String,
    reply_to: Vec<String>,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl MailConfig {
    /// Defaults: 5 attempts with 5s->5m exponential backoff.
    #[must_use]
    pub fn new(app_name: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            sender: sender.into(),
            reply_to: Vec::new(),
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: Vec<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = self.backoff_max.max(backoff_base);
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
            ..self
        }
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn reply_to(&self) -> &[String] {
        &self.reply_to
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), "no-reply@localhost")
    }
}

/// Handle for enqueueing mail; cheap to clone.
#[derive(Clone, Debug)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<MailMessage>,
}

impl MailQueue {
    /// Spawn the delivery worker and return the queue feeding it.
    #[must_use]
    pub fn spawn(
        transport: Arc<dyn MailTransport>,
        config: &MailConfig,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<MailMessage>();
        let config = config.clone().normalize();

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                // Retries run on their own task.
                tokio::spawn(deliver(transport.clone(), message, config.clone()));
            }
        });

        (Self { tx }, handle)
    }

    /// A queue with no worker, for tests that inspect what was enqueued.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MailMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget.
    pub fn enqueue(&self, message: MailMessage) {
        if self.tx.send(message).is_err() {
            warn!("mail queue closed, message dropped");
        }
    }
}

async fn deliver(transport: Arc<dyn MailTransport>, message: MailMessage, config: MailConfig) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match transport.send(&message) {
            Ok(()) => return,
            Err(err) if attempt >= config.max_attempts => {
                error!(
                    attempts = attempt,
                    subject = %message.subject,
                    "mail delivery failed permanently: {err}"
                );
                return;
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config.backoff_base, config.backoff_max);
                warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "mail delivery failed, retrying: {err}"
                );
                sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(1u32 << exponent);
    jitter_delay(scaled.min(max))
}

// Uniform in [delay/2, delay].
fn jitter_delay(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let half = millis / 2;
    let jitter = rand::thread_rng().gen_range(0..=millis - half);
    Duration::from_millis(half + jitter)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn describe_window(window: TimeDelta) -> String {
    let minutes = window.num_minutes();
    if minutes >= 60 && minutes % 60 == 0 {
        let hours = minutes / 60;
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{hours} hours")
        }
    } else if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}

fn greeting(principal: &Principal) -> String {
    principal
        .short_name()
        .map_or_else(|| "Hello,".to_string(), |name| format!("Hello {name},"))
}

fn message(config: &MailConfig, principal: &Principal, subject: String) -> MailMessage {
    MailMessage {
        subject,
        plain_body: String::new(),
        html_body: String::new(),
        recipients: vec![principal.email.clone()],
        sender: config.sender.clone(),
        reply_to: config.reply_to.clone(),
    }
}

/// Verification code mail. The welcome paragraph is only included for newbies.
#[must_use]
pub fn compose_verification(
    config: &MailConfig,
    principal: &Principal,
    code: &str,
    valid_for: TimeDelta,
    newbie: bool,
) -> MailMessage {
    let app = &config.app_name;
    let greeting = greeting(principal);
    let validity = describe_window(valid_for);
    let welcome = format!("Welcome to {app}! We are glad to have you on board.");

    let mut plain = format!("{greeting}\n\n");
    let mut html = format!("<p>{}</p>", escape_html(&greeting));
    if newbie {
        plain.push_str(&format!("{welcome}\n\n"));
        html.push_str(&format!("<p>{}</p>", escape_html(&welcome)));
    }
    plain.push_str(&format!(
        "Your {app} account verification code is: {code}\n\nThe code expires in {validity}.\n"
    ));
    html.push_str(&format!(
        "<p>Your {} account verification code is: <strong>{}</strong></p><p>The code expires in {validity}.</p>",
        escape_html(app),
        escape_html(code),
    ));

    let mut mail = message(config, principal, format!("{app} account verification"));
    mail.plain_body = plain;
    mail.html_body = html;
    mail
}

/// Temporary password mail for a forgotten-password request.
#[must_use]
pub fn compose_password_reset(
    config: &MailConfig,
    principal: &Principal,
    temporary_password: &str,
    valid_for: TimeDelta,
) -> MailMessage {
    let app = &config.app_name;
    let greeting = greeting(principal);
    let validity = describe_window(valid_for);

    let plain = format!(
        "{greeting}\n\nUse this temporary password to reset your {app} password: {temporary_password}\n\n\
         It expires in {validity}. If you did not request a password reset, you can ignore this email.\n"
    );
    let html = format!(
        "<p>{}</p><p>Use this temporary password to reset your {} password: <strong>{}</strong></p>\
         <p>It expires in {validity}. If you did not request a password reset, you can ignore this email.</p>",
        escape_html(&greeting),
        escape_html(app),
        escape_html(temporary_password),
    );

    let mut mail = message(config, principal, format!("{app} password reset"));
    mail.plain_body = plain;
    mail.html_body = html;
    mail
}

/// Queue plus the settings composers need.
#[derive(Clone, Debug)]
pub struct Mailer {
    queue: MailQueue,
    config: MailConfig,
}

impl Mailer {
    #[must_use]
    pub fn new(queue: MailQueue, config: MailConfig) -> Self {
        Self { queue, config }
    }

    pub fn send_verification(
        &self,
        principal: &Principal,
        code: &str,
        valid_for: TimeDelta,
        newbie: bool,
    ) {
        self.queue.enqueue(compose_verification(
            &self.config,
            principal,
            code,
            valid_for,
            newbie,
        ));
    }

    pub fn send_password_reset(&self, principal: &Principal, temporary_password: &str, valid_for: TimeDelta) {
        self.queue.enqueue(compose_password_reset(
            &self.config,
            principal,
            temporary_password,
            valid_for,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn principal() -> Principal {
        let mut principal = Principal::new("jane@example.com");
        principal.first_name = Some("jane".to_string());
        principal
    }

    #[test]
    fn verification_mail_welcomes_newbies_only() {
        let config = MailConfig::new("Xently", "no-reply@xently.dev")
            .with_reply_to(vec!["support@xently.dev".to_string()]);

        let newbie = compose_verification(&config, &principal(), "123456", TimeDelta::hours(1), true);
        assert!(newbie.plain_body.contains("Welcome to Xently"));
        assert!(newbie.plain_body.contains("123456"));
        assert!(newbie.plain_body.contains("1 hour"));
        assert!(newbie.html_body.contains("<strong>123456</strong>"));
        assert_eq!(newbie.recipients, vec!["jane@example.com".to_string()]);
        assert_eq!(newbie.reply_to, vec!["support@xently.dev".to_string()]);
        assert_eq!(newbie.subject, "Xently account verification");

        let regular =
            compose_verification(&config, &principal(), "123456", TimeDelta::hours(1), false);
        assert!(!regular.plain_body.contains("Welcome"));
        assert!(regular.plain_body.starts_with("Hello Jane,"));
    }

    #[test]
    fn reset_mail_carries_temporary_password() {
        let config = MailConfig::default();
        let mail =
            compose_password_reset(&config, &principal(), "Ab3<xyz", TimeDelta::minutes(30));
        assert!(mail.plain_body.contains("Ab3<xyz"));
        assert!(mail.html_body.contains("Ab3&lt;xyz"));
        assert!(mail.plain_body.contains("30 minutes"));
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        for attempt in 1..20 {
            let delay = backoff_delay(attempt, base, max);
            assert!(delay <= max);
            assert!(delay >= Duration::from_millis(2500));
        }
    }

    #[test]
    fn config_normalizes_zero_values() {
        let config = MailConfig::default()
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn channel_queue_receives_enqueued_messages() {
        let (queue, mut rx) = MailQueue::channel();
        let mailer = Mailer::new(queue, MailConfig::default());
        mailer.send_password_reset(&principal(), "temp", TimeDelta::minutes(30));
        let received = rx.recv().await;
        assert!(received.is_some_and(|m| m.plain_body.contains("temp")));
    }

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl MailTransport for Flaky {
        fn send(&self, _message: &MailMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                anyhow::bail!("transient failure {call}");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_retries_until_delivered() {
        let transport = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let config = MailConfig::default().with_backoff_base_seconds(1);
        let (queue, _handle) = MailQueue::spawn(transport.clone(), &config);
        queue.enqueue(compose_password_reset(
            &config,
            &principal(),
            "temp",
            TimeDelta::minutes(30),
        ));

        for _ in 0..100 {
            if transport.calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }
}
