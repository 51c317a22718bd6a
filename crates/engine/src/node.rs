//! Process roles.
//!
//! A [`WriterNode`] owns the RAW log of a root and flushes it in the
//! background. A [`ManagerNode`] owns everything downstream: the dealer,
//! the optimizer (discovery and worker), the cleaner and the read path.
//! Both may run in one process against the same root.
//!
//! Starting a writer takes the writer lock of the root, and starting a
//! manager takes its dealer and cleaner locks; a second node of either role
//! on the same root fails with `AlreadyLocked`.

use crate::background::{Cycle, WorkerConfig, WorkerHandle};
use crate::cleaner::LogCleaner;
use crate::dealer::LogDealer;
use crate::optimizer::{LogOptimizer, OptimizationQueue};
use crate::service::{ManagerService, WriterService};
use doclog_core::Result;
use doclog_durability::root::WRITER_LOCK;
use doclog_durability::{IndexRegistry, LogConfig, LogRoot, ProcessLock, RawLog};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn load_config(path: &Path) -> Result<LogConfig> {
    let root = LogRoot::open(path)?;
    LogConfig::load_or_default(&root.paths().config_file())
}

/// Writer process role
pub struct WriterNode {
    raw: Arc<RawLog>,
    service: WriterService,
    flusher: Option<WorkerHandle>,
    lock: Option<ProcessLock>,
}

impl WriterNode {
    /// Start a writer on the root at `path`, configured by its `doclog.toml`.
    pub fn start(path: impl AsRef<Path>) -> Result<Self> {
        let config = load_config(path.as_ref())?;
        Self::start_with_config(path, config)
    }

    /// Start a writer with an explicit configuration.
    ///
    /// Fails if another writer holds the root.
    pub fn start_with_config(path: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        config.validate()?;
        let root = Arc::new(LogRoot::open(path)?);
        let lock = root.lock_role(WRITER_LOCK)?;
        let raw = Arc::new(RawLog::open(root, &config));

        let flush_raw = Arc::clone(&raw);
        let flusher = WorkerHandle::spawn(
            WorkerConfig::new("doclog-flush", config.flush_interval_ms, config.error_backoff_ms),
            move || {
                flush_raw.flush()?;
                Ok(Cycle::Idle)
            },
        )?;

        info!(target: "doclog::raw", "Writer node started");
        Ok(WriterNode {
            service: WriterService::new(Arc::clone(&raw)),
            raw,
            flusher: Some(flusher),
            lock: Some(lock),
        })
    }

    /// The write surface
    pub fn service(&self) -> &WriterService {
        &self.service
    }

    /// The RAW log
    pub fn raw(&self) -> &Arc<RawLog> {
        &self.raw
    }

    /// Stop the flusher and close the write head.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut flusher) = self.flusher.take() {
            flusher.stop();
            let closed = self.raw.close_head();
            self.lock.take();
            closed?;
            info!(target: "doclog::raw", "Writer node stopped");
        }
        Ok(())
    }
}

impl Drop for WriterNode {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Manager process role
pub struct ManagerNode {
    raw: Arc<RawLog>,
    registry: Arc<IndexRegistry>,
    service: ManagerService,
    workers: Vec<WorkerHandle>,
}

impl ManagerNode {
    /// Start a manager on the root at `path`, configured by its `doclog.toml`.
    pub fn start(path: impl AsRef<Path>) -> Result<Self> {
        let config = load_config(path.as_ref())?;
        Self::start_with_config(path, config)
    }

    /// Start a manager with an explicit configuration.
    ///
    /// Fails if another dealer or cleaner holds the root.
    pub fn start_with_config(path: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        config.validate()?;
        let root = Arc::new(LogRoot::open(path)?);
        let raw = Arc::new(RawLog::open(Arc::clone(&root), &config));
        let registry = Arc::new(IndexRegistry::new(Arc::clone(&root), config.clone()));
        let queue = Arc::new(OptimizationQueue::new());

        let dealer = LogDealer::open(Arc::clone(&root), Arc::clone(&raw), Arc::clone(&registry))?;
        let (mut cleaner, deletes) = LogCleaner::open(Arc::clone(&registry), Arc::clone(&queue))?;
        let optimizer = Arc::new(LogOptimizer::new(Arc::clone(&registry), Arc::clone(&queue)));
        let backoff = config.error_backoff_ms;

        let dealer_worker = WorkerHandle::spawn(
            WorkerConfig::new("doclog-dealer", config.dealer_interval_ms, backoff),
            move || {
                dealer.deal_once()?;
                Ok(Cycle::Idle)
            },
        )?;

        let worker_optimizer = Arc::clone(&optimizer);
        let optimizer_worker = WorkerHandle::spawn(
            WorkerConfig::new("doclog-optimizer", config.optimizer_interval_ms, backoff),
            move || match worker_optimizer.optimize_next()? {
                Some(_) => Ok(Cycle::Busy),
                None => Ok(Cycle::Idle),
            },
        )?;

        let optimizer_waker = optimizer_worker.waker();
        let discovery_worker = WorkerHandle::spawn(
            WorkerConfig::new("doclog-discovery", config.discovery_interval_ms, backoff),
            move || {
                if optimizer.discover()? > 0 {
                    optimizer_waker.wake();
                }
                Ok(Cycle::Idle)
            },
        )?;

        let cleaner_worker = WorkerHandle::spawn(
            WorkerConfig::new("doclog-cleaner", config.cleaner_interval_ms, backoff),
            move || {
                cleaner.clean_once()?;
                Ok(Cycle::Idle)
            },
        )?;

        let service = ManagerService::new(Arc::clone(&raw), Arc::clone(&registry), queue, deletes)
            .with_wakers(optimizer_worker.waker(), cleaner_worker.waker());

        info!(target: "doclog::dealer", role = ?config.role, "Manager node started");
        Ok(ManagerNode {
            raw,
            registry,
            service,
            workers: vec![dealer_worker, discovery_worker, optimizer_worker, cleaner_worker],
        })
    }

    /// The read and administration surface
    pub fn service(&self) -> &ManagerService {
        &self.service
    }

    /// Tenant logs of this root
    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    /// The RAW log as seen by the dealer
    pub fn raw(&self) -> &Arc<RawLog> {
        &self.raw
    }

    /// Names of the running background workers
    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    /// Stop all background workers, waiting for running cycles to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &mut self.workers {
            worker.stop();
        }
        self.workers.clear();
        info!(target: "doclog::dealer", "Manager node stopped");
    }
}

impl Drop for ManagerNode {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::WriterApi;
    use doclog_core::Error;
    use tempfile::tempdir;

    #[test]
    fn test_start_reads_config_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("doclog.toml"), "page_size = 0\n").unwrap();
        assert!(matches!(WriterNode::start(dir.path()), Err(Error::Config(_))));
        assert!(matches!(ManagerNode::start(dir.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_second_manager_is_refused() {
        let dir = tempdir().unwrap();
        let first = ManagerNode::start_with_config(dir.path(), LogConfig::for_testing()).unwrap();
        assert_eq!(
            first.worker_names(),
            vec!["doclog-dealer", "doclog-discovery", "doclog-optimizer", "doclog-cleaner"]
        );
        assert!(matches!(
            ManagerNode::start_with_config(dir.path(), LogConfig::for_testing()),
            Err(Error::AlreadyLocked { .. })
        ));
        first.shutdown();
        let second = ManagerNode::start_with_config(dir.path(), LogConfig::for_testing()).unwrap();
        second.shutdown();
    }

    #[test]
    fn test_second_writer_is_refused() {
        let dir = tempdir().unwrap();
        let first = WriterNode::start_with_config(dir.path(), LogConfig::for_testing()).unwrap();
        assert!(matches!(
            WriterNode::start_with_config(dir.path(), LogConfig::for_testing()),
            Err(Error::AlreadyLocked { .. })
        ));

        first
            .service()
            .send_batch(vec![doclog_core::Record::new("t", "a").with_field("x", "1")])
            .unwrap();
        first.shutdown().unwrap();

        let second = WriterNode::start_with_config(dir.path(), LogConfig::for_testing()).unwrap();
        second
            .service()
            .send_batch(vec![doclog_core::Record::new("t", "b").with_field("x", "1")])
            .unwrap();
        second.shutdown().unwrap();

        let raw = RawLog::open(
            Arc::new(LogRoot::open(dir.path()).unwrap()),
            &LogConfig::for_testing(),
        );
        let segments = raw.live_segments().unwrap();
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert!(!segment.is_locked().unwrap());
        }
    }

    #[test]
    fn test_writer_shutdown_closes_head() {
        let dir = tempdir().unwrap();
        let writer = WriterNode::start_with_config(dir.path(), LogConfig::for_testing()).unwrap();
        writer
            .raw()
            .write(doclog_core::Record::new("t", "a").with_field("x", "1"))
            .unwrap();
        let raw = Arc::clone(writer.raw());
        writer.shutdown().unwrap();
        let segments = raw.live_segments().unwrap();
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_locked().unwrap());
    }
}
