//! # Fleet Orchestrator
//!
//! Wires the registry, prober, and scheduler together and owns their
//! periodic loops:
//!
//! - dispatch tick every `scheduler.poll_interval_seconds`
//! - stale-job sweep every `scheduler.stale_check_interval_seconds`
//! - health probe every `health.check_interval_seconds`
//!
//! Each loop runs its cycle on a fresh task, so a panic inside one cycle is
//! logged and the loop carries on with the next one.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::health::SchedulerHealth;
use super::queue_scheduler::QueueScheduler;
use crate::config::{FleetConfig, StartupMode};
use crate::error::Result;
use crate::fleet::{FleetStatistics, HealthProber, ProbeSummary, WorkerClient, WorkerRegistry};
use crate::store::SchedulerStore;

pub struct FleetOrchestrator {
    config: FleetConfig,
    registry: Arc<WorkerRegistry>,
    prober: Arc<HealthProber>,
    scheduler: QueueScheduler,
    shutdown_notify: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    running: AtomicBool,
    loops: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for FleetOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetOrchestrator")
            .field("running", &self.is_running())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl FleetOrchestrator {
    pub fn new(config: FleetConfig, store: Arc<dyn SchedulerStore>, client: Arc<dyn WorkerClient>) -> Self {
        let registry = Arc::new(WorkerRegistry::new(store.clone()));
        let prober = Arc::new(HealthProber::new(
            registry.clone(),
            client.clone(),
            config.health.max_concurrent_probes,
        ));
        let scheduler = QueueScheduler::new(&config, store, registry.clone(), client);

        Self {
            config,
            registry,
            prober,
            scheduler,
            shutdown_notify: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            loops: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Populate the registry per the startup mode, then start the loops
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Fleet orchestrator already running");
            return Ok(());
        }
        self.stopping.store(false, Ordering::SeqCst);

        let populated = match self.config.health.startup_mode {
            StartupMode::Discovery => self.registry.load_all().await,
            StartupMode::TrustCache => self.registry.load_healthy().await,
        };
        if let Err(e) = populated {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        if self.config.health.startup_mode == StartupMode::Discovery {
            self.prober.probe_all().await;
        }

        let scheduler = self.scheduler.clone();
        let dispatch_loop = self.spawn_loop("dispatch", self.config.scheduler.poll_interval(), move || {
            let scheduler = scheduler.clone();
            async move {
                if let Err(e) = scheduler.run_tick().await {
                    error!(error = %e, "Scheduler tick failed");
                }
            }
        });

        let scheduler = self.scheduler.clone();
        let sweep_loop = self.spawn_loop(
            "stale_sweep",
            self.config.scheduler.stale_check_interval(),
            move || {
                let scheduler = scheduler.clone();
                async move {
                    if let Err(e) = scheduler.sweep_stale_jobs().await {
                        error!(error = %e, "Stale job sweep failed");
                    }
                }
            },
        );

        let prober = self.prober.clone();
        let probe_loop = self.spawn_loop("health_probe", self.config.health.check_interval(), move || {
            let prober = prober.clone();
            async move {
                prober.probe_all().await;
            }
        });

        self.loops.lock().extend([dispatch_loop, sweep_loop, probe_loop]);

        info!(
            startup_mode = ?self.config.health.startup_mode,
            workers = self.registry.workers().len(),
            max_concurrent_jobs = self.config.scheduler.max_concurrent_jobs,
            "Fleet orchestrator started"
        );
        Ok(())
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, interval: Duration, cycle: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown_notify = self.shutdown_notify.clone();
        let stopping = self.stopping.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = tokio::spawn(cycle()).await {
                            if e.is_panic() {
                                error!(loop_name = name, "Cycle panicked, continuing with next cycle");
                            }
                        }
                    }
                    _ = shutdown_notify.notified() => {
                        info!(loop_name = name, "Loop shutting down");
                        break;
                    }
                }
                if stopping.load(Ordering::SeqCst) {
                    info!(loop_name = name, "Loop shutting down");
                    break;
                }
            }
        })
    }

    /// Stop the loops and wait up to `timeout` for running slice calls.
    ///
    /// Returns whether every in-flight job finished in time.
    #[instrument(skip(self))]
    pub async fn stop(&self, timeout: Duration) -> Result<bool> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Fleet orchestrator already stopped");
            return Ok(true);
        }

        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();

        let loops: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Loop task ended abnormally");
            }
        }

        let drained = self.scheduler.drain(timeout).await;
        if drained {
            info!("Fleet orchestrator stopped");
        } else {
            warn!(
                in_flight = self.scheduler.in_flight_count(),
                "Fleet orchestrator stopped with jobs still in flight"
            );
        }
        Ok(drained)
    }

    pub fn scheduler(&self) -> &QueueScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub async fn probe_now(&self) -> ProbeSummary {
        self.prober.probe_all().await
    }

    pub async fn health(&self) -> Result<SchedulerHealth> {
        self.scheduler.health().await
    }

    pub fn fleet_statistics(&self) -> FleetStatistics {
        self.registry.fleet_statistics()
    }
}
