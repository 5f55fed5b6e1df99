use crate::registry::{Instance, Registry, ServiceIdentity, WatchEvent, WatchEventKind};
use crate::sync::{
    resolve_addresses, ConfigRenderer, ConfigTemplate, NginxControl, NotificationEvent, Notifier, ReloadController,
    ReloadOutcome, ReloadStage, ServiceAddress, ServiceAddressMap, SubscriptionMap,
};
use crate::{Config, Result, SyncError};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Clone, Debug)]
pub struct SyncOptions {
    // Restore the previous files when validation rejects a new batch
    pub rollback_on_invalid: bool,
    pub startup_wait: Duration,
    pub queue_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            rollback_on_invalid: true,
            startup_wait: Duration::from_secs(10),
            queue_capacity: 64,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> SyncOptions {
        SyncOptions {
            rollback_on_invalid: config.nginx.rollback_on_invalid,
            startup_wait: Duration::from_secs(config.registry.discovery.startup_wait_secs),
            queue_capacity: config.registry.discovery.queue_capacity,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Startup,
    Running,
}

/// Drives resolve, render, reload and notify for every registry event.
///
/// At most one pipeline runs at a time, whichever service the event came from.
pub struct Orchestrator {
    subscriptions: Arc<SubscriptionMap>,
    renderer: ConfigRenderer,
    reload: ReloadController,
    notifier: Notifier,
    options: SyncOptions,
    phase: RwLock<Phase>,
    // Held for the whole pipeline. Guards the address sets that were
    // rejected by validation and still wait to be applied.
    pipeline: Mutex<ServiceAddressMap>,
    // service -> addresses currently live on disk
    rendered: RwLock<BTreeMap<String, Vec<ServiceAddress>>>,
}

impl Orchestrator {
    pub fn new(
        subscriptions: Arc<SubscriptionMap>,
        renderer: ConfigRenderer,
        reload: ReloadController,
        notifier: Notifier,
        options: SyncOptions,
    ) -> Orchestrator {
        Orchestrator {
            subscriptions,
            renderer,
            reload,
            notifier,
            options,
            phase: RwLock::new(Phase::Startup),
            pipeline: Mutex::new(ServiceAddressMap::new()),
            rendered: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Orchestrator> {
        let subscriptions = Arc::new(SubscriptionMap::from_discovery(&config.registry.discovery));

        let template = match &config.nginx.template_path {
            Some(path) => ConfigTemplate::from_file(path)?,
            None => ConfigTemplate::default(),
        };
        let renderer = ConfigRenderer::new(config.nginx.conf_path.clone(), template);
        let reload = ReloadController::new(Arc::new(NginxControl::from_config(&config.nginx)));
        let notifier = Notifier::from_config(&config.notify)?;

        Ok(Orchestrator::new(subscriptions, renderer, reload, notifier, SyncOptions::from_config(config)))
    }

    pub fn is_started(&self) -> bool {
        *self.phase.read() == Phase::Running
    }

    pub fn rendered_services(&self) -> Vec<String> {
        self.rendered.read().keys().cloned().collect()
    }

    pub fn addresses_of(&self, service: &str) -> Option<Vec<ServiceAddress>> {
        self.rendered.read().get(service).cloned()
    }

    /// Runs until a watch reports its connection as lost or every watch stops.
    pub async fn run<R: Registry>(&self, registry: &R) -> Result<()> {
        self.prepare()?;

        let mut events = self.establish_watches(registry)?;
        self.await_initial_events(&mut events).await?;
        self.complete_startup().await;

        while let Some(event) = events.recv().await {
            self.handle_event(event).await?;
        }

        SyncError::RegistryLost("every watch has stopped".to_owned()).into()
    }

    pub fn prepare(&self) -> Result<()> {
        self.renderer.reset_output_dir()
    }

    fn establish_watches<R: Registry>(&self, registry: &R) -> Result<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(self.options.queue_capacity);

        for subscription in self.subscriptions.iter() {
            registry.subscribe(subscription, tx.clone())?;
        }

        info!("Established {} watches", self.subscriptions.len());
        Ok(rx)
    }

    async fn await_initial_events(&self, events: &mut mpsc::Receiver<WatchEvent>) -> Result<()> {
        let mut waiting: BTreeSet<String> = self.subscriptions.iter().map(|s| s.name.clone()).collect();
        let deadline = tokio::time::Instant::now() + self.options.startup_wait;

        while !waiting.is_empty() {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return SyncError::RegistryLost("every watch stopped during startup".to_owned()).into(),
                Err(_) => break,
            };

            if let WatchEventKind::Instances(_) = &event.kind {
                waiting.remove(&event.service);
            }
            self.handle_event(event).await?;
        }

        if !waiting.is_empty() {
            warn!(
                "Startup reload proceeds without initial state for: {}",
                waiting.into_iter().collect::<Vec<String>>().join(", ")
            );
        }

        Ok(())
    }

    /// The single startup reload. Events handled after this run their own reload.
    ///
    /// The startup notification goes out whatever the reload outcome; a failed
    /// reload is reported separately before it.
    pub async fn complete_startup(&self) {
        let _guard = self.pipeline.lock().await;

        match self.reload.reload().await {
            ReloadOutcome::Succeeded => info!("Startup reload finished"),
            ReloadOutcome::Failed { stage, output } => {
                error!("Startup reload failed at {}", stage);
                self.notifier.notify(NotificationEvent::ReloadError, &["startup", &output]).await;
            }
        }
        self.notifier.notify(NotificationEvent::StartupSuccess, &[]).await;

        *self.phase.write() = Phase::Running;
    }

    /// Handles one registry event. Only a lost registry connection is returned as an error.
    pub async fn handle_event(&self, event: WatchEvent) -> Result<()> {
        match event.kind {
            WatchEventKind::Instances(instances) => {
                let mut deferred = self.pipeline.lock().await;
                self.process(&event.service, &instances, &mut deferred).await;
                Ok(())
            }

            WatchEventKind::TransportError(e) => {
                warn!("Skipping event for {}, registry error: {}", event.service, e);
                Ok(())
            }

            WatchEventKind::ConnectionLost(e) => SyncError::RegistryLost(e).into(),
        }
    }

    async fn process(&self, source: &str, instances: &[Instance], deferred: &mut ServiceAddressMap) {
        let mut resolved = match resolve_addresses(instances) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Dropping event from {}: {}", source, e);
                return;
            }
        };

        if resolved.is_empty() {
            debug!("Event from {} carried no instances", source);
            return;
        }

        // Sets rolled back earlier go out again with this batch unless the
        // event carries a newer one.
        for (name, addresses) in deferred.iter() {
            if !resolved.contains_key(name) {
                info!("Retrying rejected address set of {}", name);
                resolved.insert(name.clone(), addresses.clone());
            }
        }

        let items: Vec<_> = resolved.iter()
            .filter_map(|(name, addresses)| match self.subscriptions.get(name) {
                Some(subscription) => {
                    info!("Service {} has {} eligible addresses", name, addresses.len());
                    Some((name.as_str(), addresses.as_slice(), subscription))
                }
                None => {
                    warn!("No subscription configured for service {}, not rendering it", name);
                    None
                }
            })
            .collect();

        if items.is_empty() {
            return;
        }

        let batch = match self.renderer.stage(items) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Dropping event from {}: {}", source, e);
                return;
            }
        };
        debug!("Committing {} files for event from {}: {:?}", batch.len(), source, batch.targets());
        let committed = match batch.commit() {
            Ok(committed) => committed,
            Err(e) => {
                error!("Dropping event from {}: {}", source, e);
                return;
            }
        };

        if !self.is_started() {
            committed.finalize();
            self.record(&resolved);
            return;
        }

        let changed = describe_instances(instances);
        match self.reload.reload().await {
            ReloadOutcome::Succeeded => {
                committed.finalize();
                self.record(&resolved);
                deferred.clear();
                self.notifier.notify(NotificationEvent::ReloadSuccess, &[&changed]).await;
            }

            ReloadOutcome::Failed { stage, output } => {
                if stage == ReloadStage::Validate && self.options.rollback_on_invalid {
                    if let Err(e) = committed.rollback() {
                        error!("Could not restore previous configuration: {}", e);
                    }
                    *deferred = resolved.into_iter()
                        .filter(|(name, _)| self.subscriptions.contains(name))
                        .collect();
                } else {
                    committed.finalize();
                    self.record(&resolved);
                    deferred.clear();
                }

                self.notifier.notify(NotificationEvent::ReloadError, &[&changed, &output]).await;
            }
        }
    }

    fn record(&self, resolved: &ServiceAddressMap) {
        let mut rendered = self.rendered.write();

        for (name, addresses) in resolved {
            if self.subscriptions.contains(name) {
                rendered.insert(name.clone(), addresses.clone());
            }
        }
    }
}

// ip:port@service for every instance in the event
fn describe_instances(instances: &[Instance]) -> String {
    instances.iter()
        .map(|instance| {
            let service = ServiceIdentity::parse(&instance.service_name)
                .map(|id| id.service)
                .unwrap_or_else(|_| instance.service_name.clone());
            format!("{}@{}", instance.endpoint(), service)
        })
        .collect::<Vec<String>>()
        .join(", ")
}
