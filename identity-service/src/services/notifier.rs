//! Reviewer notifications for new role requests. Best-effort: callers log
//! failures and carry on.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::NotificationConfig;
use crate::models::{Organization, RoleRequest};

#[async_trait]
pub trait ReviewerNotifier: Send + Sync {
    async fn notify_role_request(
        &self,
        request: &RoleRequest,
        organization: &Organization,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_address: String,
    reviewer_address: String,
}

impl SmtpNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::starttls_relay(&config.smtp_host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.smtp_host, e))?
            .credentials(creds)
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(relay = %config.smtp_host, "Reviewer notifier initialized");

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
            reviewer_address: config.reviewer_address.clone(),
        })
    }
}

#[async_trait]
impl ReviewerNotifier for SmtpNotifier {
    async fn notify_role_request(
        &self,
        request: &RoleRequest,
        organization: &Organization,
    ) -> Result<(), anyhow::Error> {
        let subject = format!(
            "Role request #{}: {} for {}",
            request.request_id, request.requested_position, organization.organization_label
        );
        let body = format!(
            "A member has requested the {} position in {}.\n\n\
             Request: #{}\nJustification: {}\n\n\
             Review it from the role request queue.",
            request.requested_position,
            organization.organization_label,
            request.request_id,
            request.justification.as_deref().unwrap_or("(none)"),
        );

        let email = Message::builder()
            .from(self.from_address.parse()?)
            .to(self.reviewer_address.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        // SmtpTransport blocks; keep it off the async workers.
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await?
            .map_err(|e| anyhow::anyhow!("SMTP send failed: {}", e))?;

        tracing::info!(request_id = request.request_id, "Reviewer notification sent");
        Ok(())
    }
}

/// Used when notifications are disabled.
pub struct NoopNotifier;

#[async_trait]
impl ReviewerNotifier for NoopNotifier {
    async fn notify_role_request(
        &self,
        request: &RoleRequest,
        _organization: &Organization,
    ) -> Result<(), anyhow::Error> {
        tracing::debug!(request_id = request.request_id, "Notifications disabled, skipping");
        Ok(())
    }
}

/// Records notified request ids; can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notified: Mutex<Vec<i64>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn notified_ids(&self) -> Vec<i64> {
        self.notified
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReviewerNotifier for RecordingNotifier {
    async fn notify_role_request(
        &self,
        request: &RoleRequest,
        _organization: &Organization,
    ) -> Result<(), anyhow::Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mail relay unreachable"));
        }
        if let Ok(mut ids) = self.notified.lock() {
            ids.push(request.request_id);
        }
        Ok(())
    }
}
