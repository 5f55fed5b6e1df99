mod identity;
pub use identity::{ServiceIdentity, IDENTITY_DELIMITER};

mod instance;
pub use instance::Instance;

mod watch;
pub use watch::{Registry, WatchEvent, WatchEventKind};

mod nacos;
pub use nacos::NacosRegistry;
