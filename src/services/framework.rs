//! Background task lifecycle
//!
//! The ingestion worker and the aggregation cycle implement [`Service`]. A
//! [`ServiceManager`] spawns them in registration order on the tokio runtime,
//! stops them with one broadcast signal, and can spawn them again afterwards.
//!
//! A task that is still running when the shutdown timeout elapses is
//! cancelled, and `shutdown` returns only after it is gone. A restart can
//! therefore never overlap a previous generation of the same service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Long-running task driven by a [`ServiceManager`]
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run until `shutdown` fires
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Name used for registration and logging
    fn name(&self) -> &'static str;

    /// Current lifecycle state
    fn status(&self) -> ServiceStatus;
}

/// Lifecycle state a service reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Inside its main loop
    Running,
    /// Not started, or returned from `start`
    Stopped,
}

impl ServiceStatus {
    /// Whether the service is inside its main loop
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

/// Service lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// `start_all` called while services are running
    #[error("Services already running")]
    AlreadyRunning,

    /// Two services registered under one name
    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),
}

/// Service manager timing
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Time all services get to return after the shutdown signal
    pub shutdown_timeout: Duration,

    /// How long `start_all` waits for each service to report Running
    pub startup_wait: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            startup_wait: Duration::from_millis(100),
        }
    }
}

struct Slot {
    service: Arc<dyn Service>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
}

/// Spawns registered services and stops them together
pub struct ServiceManager {
    config: ServiceConfig,
    slots: Mutex<Vec<Slot>>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

impl ServiceManager {
    /// Create a manager with no services
    pub fn new(config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            slots: Mutex::new(Vec::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Add a service; names must be unique
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = service.name();
        let mut slots = self.slots.lock();

        if slots.iter().any(|slot| slot.service.name() == name) {
            return Err(ServiceError::AlreadyRegistered(name.to_string()));
        }
        slots.push(Slot {
            service,
            task: None,
        });

        tracing::debug!(service = name, "Service registered");
        Ok(())
    }

    /// Spawn every registered service in registration order
    ///
    /// Each service gets up to `startup_wait` to report Running before the
    /// next one is spawned.
    pub async fn start_all(&self) -> Result<(), ServiceError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServiceError::AlreadyRunning);
        }

        let count = self.slots.lock().len();
        for i in 0..count {
            let service = self.spawn(i);
            self.wait_until_running(service.as_ref()).await;
            tracing::debug!(service = service.name(), "Service started");
        }

        Ok(())
    }

    fn spawn(&self, index: usize) -> Arc<dyn Service> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[index];

        let service = slot.service.clone();
        let shutdown = self.shutdown_tx.subscribe();
        slot.task = Some(tokio::spawn(async move { service.start(shutdown).await }));

        slot.service.clone()
    }

    async fn wait_until_running(&self, service: &dyn Service) {
        let deadline = Instant::now() + self.config.startup_wait;
        while !service.status().is_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Signal every service to stop and wait for them
    ///
    /// Services still running after `shutdown_timeout` are aborted. Returns
    /// once every task has either finished or been cancelled.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<(&'static str, JoinHandle<Result<(), ServiceError>>)> = self
            .slots
            .lock()
            .iter_mut()
            .filter_map(|slot| slot.task.take().map(|task| (slot.service.name(), task)))
            .collect();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        for (name, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(Ok(()))) => {
                    tracing::debug!(service = name, "Service stopped");
                },
                Ok(Ok(Err(e))) => {
                    tracing::warn!(service = name, error = %e, "Service returned an error");
                },
                Ok(Err(e)) => {
                    tracing::error!(service = name, error = %e, "Service task panicked");
                },
                Err(_) => {
                    tracing::warn!(service = name, "Service ignored shutdown, aborting");
                    task.abort();
                    let _ = task.await;
                },
            }
        }

        self.running.store(false, Ordering::Release);
    }

    /// Whether `start_all` has run without a matching `shutdown`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::atomic::AtomicU32;

    struct Echo {
        name: &'static str,
        status: RwLock<ServiceStatus>,
        runs: AtomicU32,
    }

    impl Echo {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                status: RwLock::new(ServiceStatus::Stopped),
                runs: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Service for Echo {
        async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
            *self.status.write() = ServiceStatus::Running;
            self.runs.fetch_add(1, Ordering::SeqCst);
            let _ = shutdown.recv().await;
            *self.status.write() = ServiceStatus::Stopped;
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn status(&self) -> ServiceStatus {
            self.status.read().clone()
        }
    }

    /// Never looks at the shutdown signal; counts live generations
    struct Deaf {
        live: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
    }

    struct LiveGuard(Arc<AtomicU32>);

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Service for Deaf {
        async fn start(&self, _shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
            self.live.fetch_add(1, Ordering::SeqCst);
            let _guard = LiveGuard(self.live.clone());
            loop {
                self.ticks.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn name(&self) -> &'static str {
            "deaf"
        }

        fn status(&self) -> ServiceStatus {
            if self.live.load(Ordering::SeqCst) > 0 {
                ServiceStatus::Running
            } else {
                ServiceStatus::Stopped
            }
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let manager = ServiceManager::new(ServiceConfig::default());
        let service = Arc::new(Echo::new("echo"));
        manager.register(service.clone()).unwrap();

        manager.start_all().await.unwrap();
        assert!(manager.is_running());
        assert_eq!(service.status(), ServiceStatus::Running);

        manager.shutdown().await;
        assert!(!manager.is_running());
        assert_eq!(service.status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let manager = ServiceManager::new(ServiceConfig::default());
        let service = Arc::new(Echo::new("echo"));
        manager.register(service.clone()).unwrap();

        manager.start_all().await.unwrap();
        assert!(matches!(
            manager.start_all().await,
            Err(ServiceError::AlreadyRunning)
        ));
        manager.shutdown().await;

        manager.start_all().await.unwrap();
        assert!(service.status().is_running());
        manager.shutdown().await;

        assert_eq!(service.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_registration() {
        let manager = ServiceManager::new(ServiceConfig::default());
        manager.register(Arc::new(Echo::new("echo"))).unwrap();

        let result = manager.register(Arc::new(Echo::new("echo")));
        assert!(matches!(result, Err(ServiceError::AlreadyRegistered(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_timeout_aborts_task() {
        let manager = ServiceManager::new(ServiceConfig {
            shutdown_timeout: Duration::from_millis(50),
            ..ServiceConfig::default()
        });
        let live = Arc::new(AtomicU32::new(0));
        let ticks = Arc::new(AtomicU32::new(0));
        manager
            .register(Arc::new(Deaf {
                live: live.clone(),
                ticks: ticks.clone(),
            }))
            .unwrap();

        manager.start_all().await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        manager.shutdown().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);

        let after_shutdown = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);

        // A restart runs exactly one generation
        manager.start_all().await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        manager.shutdown().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
