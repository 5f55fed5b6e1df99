use crate::{Result, SyncError};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub notify: NotifyConfig,
    pub nginx: NginxConfig,
    pub registry: RegistryConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub url: String,
    pub title: String,
    pub timeout_secs: u64,
    // event key -> message template with positional %s
    pub messages: HashMap<String, String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            enabled: false,
            url: String::new(),
            title: "### Nginx runtime notification".to_owned(),
            timeout_secs: 10,
            messages: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NginxConfig {
    pub nginx_bin: String,
    pub conf_path: PathBuf,
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    #[serde(default = "default_validate_args")]
    pub validate_args: Vec<String>,
    #[serde(default = "default_reload_args")]
    pub reload_args: Vec<String>,
    #[serde(default = "default_true")]
    pub rollback_on_invalid: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    pub discovery: DiscoveryConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_context_path")]
    pub context_path: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_group")]
    pub group_name: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_startup_wait")]
    pub startup_wait_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    pub subscribe_services: Vec<SubscribeService>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SubscribeService {
    pub service_name: String,
    #[serde(default)]
    pub group_name: Option<String>,
    pub nginx_server_name: String,
    pub nginx_port: u16,
    pub nginx_upstream_name: String,
}

/// Values taken from `UPSTREAM_SYNC_*` environment variables, applied on top
/// of the file.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverrides {
    pub nginx_bin: Option<String>,
    pub conf_path: Option<PathBuf>,
    pub registry_ip: Option<String>,
    pub registry_port: Option<u16>,
    pub registry_namespace: Option<String>,
    pub notify_url: Option<String>,
    pub notify_enabled: Option<bool>,
}

impl ConfigOverrides {
    pub fn from_envvar() -> Result<ConfigOverrides> {
        envy::prefixed("UPSTREAM_SYNC_").from_env().map_err(SyncError::ConfigEnv)
    }
}

fn default_validate_args() -> Vec<String> {
    vec!["-t".to_owned()]
}

fn default_reload_args() -> Vec<String> {
    vec!["-s".to_owned(), "reload".to_owned()]
}

fn default_true() -> bool {
    true
}

fn default_context_path() -> String {
    "/nacos".to_owned()
}

fn default_group() -> String {
    "DEFAULT_GROUP".to_owned()
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_startup_wait() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    64
}

impl Config {
    /// Reads the YAML file at `path`, applies environment overrides and validates the result.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
            path: path.to_owned(),
            source,
        })?;

        let mut config = Config::from_yaml(&content)?;
        config.apply_overrides(ConfigOverrides::from_envvar()?);
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Config> {
        serde_yaml::from_str(content).map_err(SyncError::ConfigParse)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bin) = overrides.nginx_bin {
            self.nginx.nginx_bin = bin;
        }
        if let Some(path) = overrides.conf_path {
            self.nginx.conf_path = path;
        }
        if let Some(ip) = overrides.registry_ip {
            self.registry.discovery.ip = ip;
        }
        if let Some(port) = overrides.registry_port {
            self.registry.discovery.port = port;
        }
        if let Some(namespace) = overrides.registry_namespace {
            self.registry.discovery.namespace = namespace;
        }
        if let Some(url) = overrides.notify_url {
            self.notify.url = url;
        }
        if let Some(enabled) = overrides.notify_enabled {
            self.notify.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let services = &self.registry.discovery.subscribe_services;
        if services.is_empty() {
            return SyncError::ConfigValidation("no subscribe-services configured".to_owned()).into();
        }

        let mut names = HashSet::new();
        let mut upstreams = HashSet::new();
        for svc in services {
            if svc.service_name.is_empty() {
                return SyncError::ConfigValidation("service-name must not be empty".to_owned()).into();
            }
            if !names.insert(svc.service_name.as_str()) {
                return SyncError::ConfigValidation(format!("duplicate service-name {}", svc.service_name)).into();
            }
            if !is_safe_file_stem(&svc.nginx_upstream_name) {
                return SyncError::ConfigValidation(format!(
                    "nginx-upstream-name {:?} of {} is not usable as a file name",
                    svc.nginx_upstream_name, svc.service_name
                ))
                .into();
            }
            if !upstreams.insert(svc.nginx_upstream_name.as_str()) {
                return SyncError::ConfigValidation(format!("duplicate nginx-upstream-name {}", svc.nginx_upstream_name)).into();
            }
            if svc.nginx_port == 0 {
                return SyncError::ConfigValidation(format!("nginx-port of {} must not be 0", svc.service_name)).into();
            }
        }

        if self.registry.discovery.port == 0 {
            return SyncError::ConfigValidation("registry port must not be 0".to_owned()).into();
        }
        if self.registry.discovery.queue_capacity == 0 {
            return SyncError::ConfigValidation("queue-capacity must be positive".to_owned()).into();
        }
        if self.notify.enabled && self.notify.url.is_empty() {
            return SyncError::ConfigValidation("notify.url is required when notify is enabled".to_owned()).into();
        }

        Ok(())
    }
}

fn is_safe_file_stem(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| c == '/' || c == '\\' || c == '\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
notify:
  enabled: true
  url: "http://hooks.local/send"
  messages:
    nginx-reload-success: "reloaded: %s"
nginx:
  nginx-bin: /usr/sbin/nginx
  conf-path: /etc/nginx/conf.d/upstreams
registry:
  discovery:
    ip: 127.0.0.1
    port: 8848
    namespace: dev
    subscribe-services:
      - service-name: svc1
        nginx-server-name: svc1.local
        nginx-port: 80
        nginx-upstream-name: svc1-up
      - service-name: svc2
        group-name: OTHER
        nginx-server-name: svc2.local
        nginx-port: 8080
        nginx-upstream-name: svc2-up
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.nginx.validate_args, vec!["-t"]);
        assert_eq!(config.nginx.reload_args, vec!["-s", "reload"]);
        assert!(config.nginx.rollback_on_invalid);
        assert_eq!(config.notify.timeout_secs, 10);

        let discovery = &config.registry.discovery;
        assert_eq!(discovery.group_name, "DEFAULT_GROUP");
        assert_eq!(discovery.context_path, "/nacos");
        assert_eq!(discovery.max_backoff_ms, 60_000);
        assert_eq!(discovery.subscribe_services.len(), 2);
        assert_eq!(discovery.subscribe_services[1].group_name.as_deref(), Some("OTHER"));
    }

    #[test]
    fn rejects_duplicate_upstream() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.registry.discovery.subscribe_services[1].nginx_upstream_name = "svc1-up".to_owned();

        assert!(matches!(config.validate(), Err(SyncError::ConfigValidation(_))));
    }

    #[test]
    fn rejects_path_like_upstream() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.registry.discovery.subscribe_services[0].nginx_upstream_name = "../evil".to_owned();

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_enabled_notify_without_url() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.notify.url.clear();

        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.apply_overrides(ConfigOverrides {
            nginx_bin: Some("/opt/nginx/sbin/nginx".to_owned()),
            registry_port: Some(9848),
            notify_enabled: Some(false),
            ..Default::default()
        });

        assert_eq!(config.nginx.nginx_bin, "/opt/nginx/sbin/nginx");
        assert_eq!(config.registry.discovery.port, 9848);
        assert!(!config.notify.enabled);
        assert_eq!(config.registry.discovery.ip, "127.0.0.1");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, SyncError::ConfigRead { .. }));
    }
}
