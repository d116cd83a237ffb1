//! Background sweeper thread.
//!
//! The thread ticks on a fixed period and calls back into its target through
//! a weak reference, so it never keeps the knowledge base alive. Dropping the
//! [`Sweeper`] closes the shutdown channel and joins the thread.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::debug;

use crate::error::{KbError, KbResult};

/// Something the sweeper runs on every tick.
pub trait SweepTarget: Send + Sync + 'static {
    /// One sweep. Errors are the target's to log.
    fn sweep_tick(&self);
}

/// Handle of a running sweeper thread.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Starts a named thread calling `target` every `period` until the
    /// handle is dropped or the target is gone.
    pub fn spawn<T: SweepTarget>(name: impl Into<String>, period: Duration, target: Weak<T>) -> KbResult<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(period);
        let name = name.into();
        let thread_name = name.clone();

        let join = thread::Builder::new()
            .name(name)
            .spawn(move || {
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(target) = target.upgrade() else {
                                break;
                            };
                            target.sweep_tick();
                        }
                    }
                }
                debug!(thread = %thread_name, "sweeper stopped");
            })
            .map_err(|e| KbError::internal(format!("failed to spawn sweeper thread: {e}")))?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the worker's select.
        drop(self.shutdown.take());
        if let Some(handle) = self.join.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
