// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::persist::Persistence;
use crate::portal::PortalTransport;
use crate::task::{SharedTaskStore, Task, TaskStore};

use super::RuntimeOptions;
use super::scheduler::Scheduler;

/// Drives the [`Scheduler`] on a timer and persists what it changes.
///
/// This is the IO shell around the scheduler: sleeping, shutdown signals
/// and disk writes happen here; task semantics live in the scheduler.
///
/// The task file can also be edited by manual commands while the runtime
/// is up. The runtime remembers the list as it last read or wrote it and
/// merges anything that changed on disk before each tick and each save.
pub struct Runtime<T: PortalTransport> {
    scheduler: Scheduler<T>,
    store: SharedTaskStore,
    persistence: Arc<dyn Persistence>,
    shutdown_rx: watch::Receiver<bool>,
    options: RuntimeOptions,
    /// Task list as last seen on disk.
    on_disk: Option<Vec<Task>>,
}

impl<T: PortalTransport> fmt::Debug for Runtime<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: PortalTransport> Runtime<T> {
    pub fn new(
        scheduler: Scheduler<T>,
        store: SharedTaskStore,
        persistence: Arc<dyn Persistence>,
        shutdown_rx: watch::Receiver<bool>,
        options: RuntimeOptions,
    ) -> Self {
        let on_disk = match persistence.load_tasks() {
            Ok(tasks) => Some(tasks),
            Err(err) => {
                warn!(error = %err, "task file unreadable; external edits merge after the first save");
                None
            }
        };
        Self {
            scheduler,
            store,
            persistence,
            shutdown_rx,
            options,
            on_disk,
        }
    }

    pub fn scheduler(&self) -> &Scheduler<T> {
        &self.scheduler
    }

    /// Main loop.
    ///
    /// - Merges task edits made on disk since the last look.
    /// - Runs one tick with the task store locked.
    /// - Saves tasks and cookies when they changed.
    /// - Sleeps for the adaptive interval, waking early on shutdown.
    pub async fn run(mut self) -> Result<Scheduler<T>> {
        info!("punchclock runtime started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let store_handle = self.store.clone();
            let wait = {
                let mut store = store_handle.lock().await;
                self.merge_disk_edits(&mut store);
                let report = self.scheduler.tick(&mut store).await;
                debug!(?report, "tick finished");
                self.persist(&mut store);
                self.scheduler.next_wake(&store)
            };

            if self.options.exit_after_tick {
                info!("single pass requested; stopping runtime");
                break;
            }

            debug!(?wait, "sleeping until next tick");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
            }
        }

        self.scheduler.shutdown().await;
        {
            let store_handle = self.store.clone();
            let mut store = store_handle.lock().await;
            store.mark_dirty();
            self.persist(&mut store);
        }
        info!(stats = ?self.scheduler.stats(), "runtime exiting");
        Ok(self.scheduler)
    }

    /// Fold in changes another process wrote to the task file.
    fn merge_disk_edits(&mut self, store: &mut TaskStore) {
        let disk = match self.persistence.load_tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "reading task file failed; keeping in-memory tasks");
                return;
            }
        };
        if let Some(seen) = &self.on_disk {
            if *seen != disk {
                store.merge_external(seen, &disk);
            }
        }
        self.on_disk = Some(disk);
    }

    /// Write tasks and cookies if they changed. Failures are logged; the
    /// next tick tries again.
    fn persist(&mut self, store: &mut TaskStore) {
        if store.take_dirty() {
            self.merge_disk_edits(store);
            match self.persistence.save_tasks(store.tasks()) {
                Ok(()) => self.on_disk = Some(store.snapshot()),
                Err(err) => {
                    warn!(error = %err, "saving tasks failed");
                    store.mark_dirty();
                }
            }
        }

        let session = self.scheduler.session_mut();
        if session.take_cookies_changed() {
            if let Err(err) = self.persistence.save_cookies(&session.cookies()) {
                warn!(error = %err, "saving cookies failed");
            }
        }
    }
}
