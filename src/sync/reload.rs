use crate::config::NginxConfig;
use futures::future::{BoxFuture, FutureExt};
use log::{error, info};
use std::fmt;
use std::sync::Arc;
use tokio::process::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadStage {
    Validate,
    Apply,
}

impl fmt::Display for ReloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadStage::Validate => write!(f, "validate"),
            ReloadStage::Apply => write!(f, "apply"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Text worth showing to an operator, stderr first since nginx reports there.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

/// Runs one stage of a reload against the proxy process.
pub trait ProxyControl: Send + Sync {
    fn run(&self, stage: ReloadStage) -> BoxFuture<'_, std::io::Result<CommandOutput>>;
}

pub struct NginxControl {
    bin: String,
    validate_args: Vec<String>,
    reload_args: Vec<String>,
}

impl NginxControl {
    pub fn new(bin: impl Into<String>, validate_args: Vec<String>, reload_args: Vec<String>) -> NginxControl {
        NginxControl {
            bin: bin.into(),
            validate_args,
            reload_args,
        }
    }

    pub fn from_config(config: &NginxConfig) -> NginxControl {
        NginxControl::new(config.nginx_bin.clone(), config.validate_args.clone(), config.reload_args.clone())
    }
}

impl ProxyControl for NginxControl {
    fn run(&self, stage: ReloadStage) -> BoxFuture<'_, std::io::Result<CommandOutput>> {
        let args = match stage {
            ReloadStage::Validate => &self.validate_args,
            ReloadStage::Apply => &self.reload_args,
        };

        async move {
            let output = Command::new(&self.bin).args(args).output().await?;

            Ok(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        .boxed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    Succeeded,
    Failed { stage: ReloadStage, output: String },
}

#[cfg(test)]
impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReloadOutcome::Succeeded)
    }
}

/// Validate, then apply. Nothing is retried and a failed validate never reaches apply.
pub struct ReloadController {
    control: Arc<dyn ProxyControl>,
}

impl ReloadController {
    pub fn new(control: Arc<dyn ProxyControl>) -> ReloadController {
        ReloadController { control }
    }

    pub async fn reload(&self) -> ReloadOutcome {
        for stage in [ReloadStage::Validate, ReloadStage::Apply] {
            match self.control.run(stage).await {
                Ok(output) if output.success => {
                    info!("nginx {} succeeded", stage);
                }
                Ok(output) => {
                    let output = output.diagnostic();
                    error!("nginx {} failed: {}", stage, output);
                    return ReloadOutcome::Failed { stage, output };
                }
                Err(e) => {
                    error!("Could not run nginx {}: {}", stage, e);
                    return ReloadOutcome::Failed {
                        stage,
                        output: format!("failed to run proxy binary: {}", e),
                    };
                }
            }
        }

        ReloadOutcome::Succeeded
    }
}
