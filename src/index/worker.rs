//! Background execution of the tree indexer.
//!
//! At most one worker runs per index. The worker commits once per
//! iteration, re-entering the write context around every step, then
//! emits signals and checks the stop flag outside the transaction.
//! That boundary is where interactive writers pre-empt the scan and
//! where cancellation takes effect; a stop never lands mid-transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::db::IndexDb;
use crate::error::Result;
use crate::index::core::IndexCore;
use crate::index::tree::TreeIndexer;

struct Shared {
    stop: AtomicBool,
    finished: Mutex<bool>,
    condvar: Condvar,
}

/// Handle to a running (or finished) worker thread.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

/// Waitable view on a worker, detached from the facade's worker slot
/// so waiting does not block stop requests.
pub(crate) struct Waiter {
    shared: Arc<Shared>,
}

impl Waiter {
    /// Block until the worker finishes, or until the timeout passes.
    /// Returns true iff the worker is still running.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut finished = self.shared.finished.lock();
        match timeout {
            None => {
                while !*finished {
                    self.shared.condvar.wait(&mut finished);
                }
                false
            }
            Some(timeout) => {
                if !*finished {
                    self.shared
                        .condvar
                        .wait_for(&mut finished, timeout);
                }
                !*finished
            }
        }
    }
}

impl Worker {
    /// Spawn the worker thread running the tree indexer until the
    /// queue drains or a stop is requested.
    pub fn spawn(db: IndexDb, core: Arc<IndexCore>) -> Result<Self> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            finished: Mutex::new(false),
            condvar: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("notedex-indexer".into())
            .spawn(move || {
                run(&db, &core, &thread_shared.stop);
                *thread_shared.finished.lock() = true;
                thread_shared.condvar.notify_all();
            })?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn is_alive(&self) -> bool {
        !*self.shared.finished.lock()
    }

    pub fn waiter(&self) -> Waiter {
        Waiter {
            shared: self.shared.clone(),
        }
    }

    /// Ask the worker to stop at the next iteration boundary and wait
    /// for it to exit.
    pub fn stop_and_join(mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(db: &IndexDb, core: &Arc<IndexCore>, stop: &AtomicBool) {
    let indexer = TreeIndexer::new(core.clone());
    let ctx = db.change_context();
    info!("starting background index update");

    loop {
        if stop.load(Ordering::Acquire) {
            debug!("index update interrupted");
            break;
        }

        let step = ctx.with(|conn| match indexer.step(conn)? {
            Some(item) => {
                core.before_commit(conn)?;
                Ok(Some(item))
            }
            None => Ok(None),
        });

        match step {
            Ok(Some(_)) => core.after_commit(),
            Ok(None) => {
                core.after_commit();
                break;
            }
            Err(err) => {
                core.discard_queued();
                error!(error = %err, "background index update aborted");
                break;
            }
        }
    }
}
