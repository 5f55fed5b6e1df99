mod subscription;
pub use subscription::{ServiceSubscription, SubscriptionMap};

mod address;
pub use address::{resolve_addresses, ServiceAddress, ServiceAddressMap};

mod template;
pub use template::{ConfigTemplate, RenderContext};

mod render;
pub use render::{CommittedBatch, ConfigRenderer, RenderBatch};

mod reload;
pub use reload::{CommandOutput, NginxControl, ProxyControl, ReloadController, ReloadOutcome, ReloadStage};

mod notify;
pub use notify::{MarkdownMessage, MessageSink, NotificationEvent, Notifier, WebhookSink};

mod orchestrator;
pub use orchestrator::{Orchestrator, SyncOptions};
