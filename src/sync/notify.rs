use crate::config::NotifyConfig;
use crate::{Result, SyncError};
use futures::future::{BoxFuture, FutureExt};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    StartupSuccess,
    ReloadSuccess,
    ReloadError,
}

impl NotificationEvent {
    /// Key of the message template in the config.
    pub fn key(&self) -> &'static str {
        match self {
            NotificationEvent::StartupSuccess => "first-init-success",
            NotificationEvent::ReloadSuccess => "nginx-reload-success",
            NotificationEvent::ReloadError => "nginx-reload-error",
        }
    }

    fn default_template(&self) -> &'static str {
        match self {
            NotificationEvent::StartupSuccess => "nginx configuration initialised and reloaded",
            NotificationEvent::ReloadSuccess => "nginx reloaded after instance change: %s",
            NotificationEvent::ReloadError => "nginx reload failed for %s\n```\n%s\n```",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkdownMessage {
    pub msgtype: String,
    pub markdown: MarkdownContent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkdownContent {
    pub content: String,
}

impl MarkdownMessage {
    pub fn new(content: String) -> MarkdownMessage {
        MarkdownMessage {
            msgtype: "markdown".to_owned(),
            markdown: MarkdownContent { content },
        }
    }
}

pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: MarkdownMessage) -> BoxFuture<'_, Result<()>>;
}

/// Posts messages as JSON to a chat webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<WebhookSink> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SyncError::Notify)?;

        Ok(WebhookSink {
            client,
            url: url.into(),
        })
    }
}

impl MessageSink for WebhookSink {
    fn deliver(&self, message: MarkdownMessage) -> BoxFuture<'_, Result<()>> {
        async move {
            self.client.post(&self.url)
                .json(&message)
                .send()
                .await
                .and_then(|res| res.error_for_status())
                .map_err(SyncError::Notify)?;

            Ok(())
        }
        .boxed()
    }
}

pub struct Notifier {
    enabled: bool,
    title: String,
    messages: HashMap<String, String>,
    sink: Arc<dyn MessageSink>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig, sink: Arc<dyn MessageSink>) -> Notifier {
        Notifier {
            enabled: config.enabled,
            title: config.title.clone(),
            messages: config.messages.clone(),
            sink,
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Notifier> {
        let sink = WebhookSink::new(config.url.clone(), Duration::from_secs(config.timeout_secs.max(1)))?;
        Ok(Notifier::new(config, Arc::new(sink)))
    }

    /// Fills the template of `event` with `params`, one per `%s`, in order.
    pub fn format(&self, event: NotificationEvent, params: &[&str]) -> String {
        let template = self.messages.get(event.key())
            .map(String::as_str)
            .unwrap_or_else(|| event.default_template());

        let mut params = params.iter();
        let mut pieces = template.split("%s");
        let mut out = pieces.next().unwrap_or_default().to_owned();
        for piece in pieces {
            out.push_str(params.next().copied().unwrap_or_default());
            out.push_str(piece);
        }

        out
    }

    pub fn compose(&self, text: &str, timestamp: &str) -> MarkdownMessage {
        MarkdownMessage::new(format!(
            "{} \n<font color=\"comment\">{}</font>\n{}",
            self.title, timestamp, text
        ))
    }

    /// Best effort. Delivery failures are logged and dropped.
    pub async fn notify(&self, event: NotificationEvent, params: &[&str]) {
        let text = self.format(event, params);
        info!("Notification {}: {}", event.key(), text);

        if !self.enabled {
            return;
        }

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        if let Err(e) = self.sink.deliver(self.compose(&text, &timestamp)).await {
            warn!("Notification {} not delivered: {}", event.key(), e);
        }
    }
}
