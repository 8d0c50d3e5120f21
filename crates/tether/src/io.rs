//! The I/O thread.
//!
//! Every peer pump, every outbound send and every reply runs on one current-thread tokio
//! runtime that lives on its own named OS thread. Namespace work is pushed from there onto the
//! runtime's blocking pool, so a slow script never stalls message delivery.

use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Error;
use crate::error::Result;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub struct IoThread {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Starts the runtime thread and waits until it is accepting work.
    pub fn spawn(name: &str) -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .thread_name("tether-worker")
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                let _ = runtime.block_on(shutdown_rx);
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })?;

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(msg)) => return Err(Error::Io(msg)),
            Err(_) => return Err(Error::Io("I/O thread exited during startup".into())),
        };

        debug!(thread = name, "I/O thread started");
        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// A handle for spawning work onto the I/O runtime from any thread.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
