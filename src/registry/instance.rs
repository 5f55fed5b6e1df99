use serde::Deserialize;

/// One endpoint as reported by the registry.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default, alias = "enable")]
    pub enabled: bool,
    // Composite identity, group@@service
    pub service_name: String,
}

fn default_weight() -> f64 {
    1.0
}

impl Instance {
    pub fn is_eligible(&self) -> bool {
        self.healthy && self.enabled
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
