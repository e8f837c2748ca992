//! Background driver
//!
//! Pumps the MAC engine on a dedicated thread at a bounded interval. The
//! interval wait doubles as the stop signal, so teardown wakes the thread
//! immediately instead of waiting out the delay.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error};

/// Name of the driver thread
pub const DRIVER_THREAD_NAME: &str = "ttn-driver";

/// Handle to a running background driver
#[derive(Debug)]
pub struct BackgroundDriver {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundDriver {
    /// Spawn a driver calling `tick` every `interval` until stopped
    pub fn spawn<F>(interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(DRIVER_THREAD_NAME.into())
            .spawn(move || {
                debug!("Background driver started, interval {:?}", interval);
                loop {
                    tick();
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Background driver stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Whether the driver thread is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Whether the caller runs on the driver thread
    pub fn is_current(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |h| h.thread().id() == thread::current().id())
    }

    /// Stop the driver and wait for the current tick to finish.
    ///
    /// Called from the driver thread itself, only signals; the thread exits
    /// once the running tick returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Background driver panicked");
        }
    }
}

impl Drop for BackgroundDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
