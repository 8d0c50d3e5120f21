//! # Page
//!
//! The far side of a bridge: a script engine on its own thread, holding the object registry
//! that host proxies point into.
//!
//! ## Philosophy
//!
//! - **One Thread Owns the Engine**: Registry operations, host-call completions, loads and
//!   script execution all arrive as `PageEvent`s and run in order on the page thread.
//! - **Host Calls Never Block the Page**: A host call made by page code returns a promise.
//!   The reply is queued as an event, so the page keeps serving registry operations while
//!   the host works, including operations the host issues on the page's behalf.

mod engine;
mod preload;

pub use preload::PreloadScript;

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tetherrpc::CallFrame;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::bindings::PageBinding;
use crate::config::Budget;
use crate::correlator::Outcome;
use crate::error::Error;
use crate::error::Result;
use crate::peer::Dispatcher;
use crate::peer::Peer;
use crate::peer::Responder;
use crate::transport::Transport;
use engine::Engine;

/// Load lifecycle notifications. Called on the page thread.
pub trait PageObserver: Send + Sync + 'static {
    fn on_load(&self) {}

    fn on_title_change(&self, _title: &str) {}

    fn on_load_error(&self, _error: &Error) {}
}

/// Ignores every notification.
pub struct NullObserver;

impl PageObserver for NullObserver {}

type Ack = std_mpsc::Sender<Result<()>>;

pub(crate) enum PageEvent {
    Call(CallFrame, Responder),
    Completion { generation: u64, call_id: String, outcome: Outcome },
    Load { document: Option<String>, done: Ack },
    Reload { done: Ack },
    Execute { code: String, done: Ack },
    Collect { done: Ack },
    Shutdown,
}

/// Forwards registry operations from the I/O thread to the page thread.
struct PageDispatcher {
    events: UnboundedSender<PageEvent>,
}

impl Dispatcher for PageDispatcher {
    fn dispatch(&self, call: CallFrame, responder: Responder) {
        // If the page is gone the responder drops with the event and answers with an error.
        if self.events.send(PageEvent::Call(call, responder)).is_err() {
            debug!("page thread has stopped");
        }
    }
}

pub(crate) struct PageConfig {
    pub name: String,
    pub budget: Budget,
    pub preloads: Vec<PreloadScript>,
    pub bindings: Vec<PageBinding>,
    pub observer: Arc<dyn PageObserver>,
}

pub struct Page {
    name: String,
    events: UnboundedSender<PageEvent>,
    thread: Option<JoinHandle<()>>,
}

impl Page {
    /// Starts the page thread with no document loaded.
    pub(crate) fn spawn(
        config: PageConfig,
        transport: Box<dyn Transport>,
        runtime: Handle,
    ) -> Result<Self> {
        let (events, inbox) = mpsc::unbounded_channel();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(PageDispatcher { events: events.clone() });
        let label = format!("{}-page", config.name);
        let peer = Arc::new(Peer::new(label, transport, runtime, Some(dispatcher)));

        let name = config.name.clone();
        let engine_events = events.clone();
        let thread = std::thread::Builder::new()
            .name(format!("{}-page", name))
            .spawn(move || {
                let engine = Engine::new(
                    config.name,
                    config.budget,
                    config.preloads,
                    config.bindings,
                    config.observer,
                    peer,
                    engine_events,
                );
                run(engine, inbox);
            })?;

        Ok(Self { name, events, thread: Some(thread) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loads a new document and waits until it has run.
    pub fn load(&self, document: Option<String>) -> Result<()> {
        self.request(|done| PageEvent::Load { document, done })
    }

    /// Loads the current document again from scratch.
    pub fn reload(&self) -> Result<()> {
        self.request(|done| PageEvent::Reload { done })
    }

    /// Evaluates a global script in the current document.
    pub fn execute(&self, code: impl Into<String>) -> Result<()> {
        let code = code.into();
        self.request(|done| PageEvent::Execute { code, done })
    }

    /// Runs a full garbage collection, then any finalizer jobs it queued.
    pub fn collect_garbage(&self) -> Result<()> {
        self.request(|done| PageEvent::Collect { done })
    }

    fn request(&self, event: impl FnOnce(Ack) -> PageEvent) -> Result<()> {
        let (done, wait) = std_mpsc::channel();
        let stopped = || Error::Script(format!("{} has stopped", self.name));
        self.events.send(event(done)).map_err(|_| stopped())?;
        wait.recv().map_err(|_| stopped())?
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        let _ = self.events.send(PageEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(mut engine: Engine, mut inbox: UnboundedReceiver<PageEvent>) {
    while let Some(event) = inbox.blocking_recv() {
        match event {
            PageEvent::Call(call, responder) => {
                let status = engine.dispatch(&call.op, &call.args);
                responder.reply(status);
            }
            PageEvent::Completion { generation, call_id, outcome } => {
                engine.complete(generation, call_id, outcome);
            }
            PageEvent::Load { document, done } => {
                let _ = done.send(engine.load(document));
            }
            PageEvent::Reload { done } => {
                let _ = done.send(engine.reload());
            }
            PageEvent::Execute { code, done } => {
                let _ = done.send(engine.execute(&code));
            }
            PageEvent::Collect { done } => {
                engine.collect_garbage();
                let _ = done.send(Ok(()));
            }
            PageEvent::Shutdown => break,
        }
        engine.drain_jobs();
    }
}
