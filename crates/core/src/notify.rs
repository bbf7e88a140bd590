use crate::config::{env_or, Settings};
use crate::http;
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// Not asked yet.
    Default,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub sound: bool,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    async fn request_permission(&self) -> Permission;

    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Wraps a [`Notifier`] so delivery never fails the caller.
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    sound: bool,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>, sound: bool) -> Self {
        Self { notifier, sound }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_settings(settings)? {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::new(notifier, true))
    }

    /// Asks for permission when it has not been decided yet. Call once at startup.
    pub async fn init(&self) -> Permission {
        let permission = match self.notifier.permission() {
            Permission::Default => self.notifier.request_permission().await,
            decided => decided,
        };
        tracing::info!(?permission, "notification permission");
        permission
    }

    pub async fn notify(&self, title: impl Into<String>, body: impl Into<String>) {
        let permission = self.notifier.permission();
        if permission != Permission::Granted {
            tracing::debug!(?permission, "notification skipped");
            return;
        }

        let notification = Notification {
            title: title.into(),
            body: body.into(),
            sound: self.sound,
        };
        if let Err(err) = self.notifier.notify(&notification).await {
            tracing::warn!(
                title = %notification.title,
                error = %err,
                "notification delivery failed"
            );
        }
    }
}

/// Emits notifications as log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            title = %notification.title,
            body = %notification.body,
            sound = notification.sound,
            "notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    fn permission(&self) -> Permission {
        Permission::Unsupported
    }

    async fn request_permission(&self) -> Permission {
        Permission::Unsupported
    }

    async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
        Ok(())
    }
}

/// POSTs each notification as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        let Some(url) = settings.notify_webhook_url.clone() else {
            return Ok(None);
        };
        let timeout =
            Duration::from_millis(env_or("NOTIFY_TIMEOUT_MS", DEFAULT_WEBHOOK_TIMEOUT_MS));
        Ok(Some(Self::new(url, timeout)?))
    }

    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let res = self
            .http
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("notification webhook request failed")?;

        let status = res.status();
        if !status.is_success() {
            anyhow::bail!("notification webhook HTTP {status}");
        }
        Ok(())
    }
}
