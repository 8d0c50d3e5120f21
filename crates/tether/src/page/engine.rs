//! The script engine behind a page.
//!
//! Owned by the page thread and never touched from anywhere else. Each load builds a fresh
//! runtime and context, so nothing a document stored survives navigation.

use std::sync::Arc;

use rquickjs::CatchResultExt;
use rquickjs::Context;
use rquickjs::Ctx;
use rquickjs::Function;
use rquickjs::Object;
use rquickjs::Runtime;
use tetherpack::Handle;
use tetherpack::WireValue;
use tetherrpc::Args;
use tetherrpc::ErrorPayload;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use tracing::warn;

use super::PageEvent;
use super::PageObserver;
use super::preload;
use super::preload::PreloadScript;
use crate::bindings::PageBinding;
use crate::config::Budget;
use crate::correlator::Outcome;
use crate::error::Error;
use crate::error::Result;
use crate::json;
use crate::peer::Peer;

/// Promise jobs run after one event before the page yields to the next.
const MAX_JOBS_PER_EVENT: usize = 10_000;

struct Loaded {
    context: Context,
    runtime: Runtime,
}

pub(crate) struct Engine {
    name: String,
    budget: Budget,
    preloads: Vec<PreloadScript>,
    bindings: Vec<PageBinding>,
    observer: Arc<dyn PageObserver>,
    peer: Arc<Peer>,
    events: UnboundedSender<PageEvent>,
    document: Option<String>,
    /// Bumped on every load. Completions for an older document are dropped.
    generation: u64,
    loaded: Option<Loaded>,
}

impl Engine {
    pub(crate) fn new(
        name: String,
        budget: Budget,
        preloads: Vec<PreloadScript>,
        bindings: Vec<PageBinding>,
        observer: Arc<dyn PageObserver>,
        peer: Arc<Peer>,
        events: UnboundedSender<PageEvent>,
    ) -> Self {
        Self {
            name,
            budget,
            preloads,
            bindings,
            observer,
            peer,
            events,
            document: None,
            generation: 0,
            loaded: None,
        }
    }

    /// Replaces the current document.
    ///
    /// Setup failures (engine creation, built-in glue, bindings) leave the page unloaded.
    /// A failing document leaves the page loaded with whatever the document managed to do.
    pub(crate) fn load(&mut self, document: Option<String>) -> Result<()> {
        self.loaded = None;
        self.generation += 1;
        self.document = document;

        let runtime = Runtime::new()?;
        self.budget.apply(&runtime);
        let context = Context::full(&runtime)?;
        if let Err(e) = context.with(|ctx| self.prepare(&ctx)) {
            warn!(page = %self.name, error = %e, "page setup failed");
            self.observer.on_load_error(&e);
            return Err(e);
        }
        self.loaded = Some(Loaded { context, runtime });

        let result = match self.document.clone() {
            Some(document) => self.eval("document", &document),
            None => Ok(()),
        };
        self.drain_jobs();

        match &result {
            Ok(()) => {
                debug!(page = %self.name, generation = self.generation, "page loaded");
                self.observer.on_load();
            }
            Err(e) => {
                warn!(page = %self.name, error = %e, "document failed");
                self.observer.on_load_error(e);
            }
        }
        result
    }

    pub(crate) fn reload(&mut self) -> Result<()> {
        let document = self.document.clone();
        self.load(document)
    }

    /// Evaluates `code` as a global script in the current document.
    pub(crate) fn execute(&self, code: &str) -> Result<()> {
        self.eval("execute", code)
    }

    fn prepare(&self, ctx: &Ctx<'_>) -> Result<()> {
        self.install_natives(ctx)?;
        for script in preload::builtins() {
            eval(ctx, script.name(), script.source())?;
        }
        for script in &self.preloads {
            if let Err(e) = eval(ctx, script.name(), script.source()) {
                let script = script.name();
                warn!(page = %self.name, script, error = %e, "preload script failed");
            }
        }

        let glue: Object = ctx.globals().get("__tether")?;
        for binding in &self.bindings {
            let result = match binding {
                PageBinding::Property { name, value } => {
                    let bind: Function = glue.get("bindProperty")?;
                    bind.call::<_, ()>((name.as_str(), json::to_json(value).to_string()))
                }
                PageBinding::Function { name, callback } => {
                    let bind: Function = glue.get("bindFunction")?;
                    bind.call::<_, ()>((name.as_str(), callback.to_string()))
                }
            };
            result.catch(ctx).map_err(|e| Error::Script(format!("binding failed: {}", e)))?;
        }
        Ok(())
    }

    /// `__tether_send(id, op, payload)` issues a host call; `__tether_uuid()` mints handle
    /// ids; `__tether_title(title)` reports title changes.
    fn install_natives(&self, ctx: &Ctx<'_>) -> Result<()> {
        let globals = ctx.globals();

        let peer = self.peer.clone();
        let events = self.events.clone();
        let generation = self.generation;
        let send = Function::new(ctx.clone(), move |call_id: String, op: String, payload: String| {
            send_host_call(&peer, &events, generation, call_id, &op, &payload);
        })?;
        globals.set("__tether_send", send)?;

        let uuid = Function::new(ctx.clone(), || Handle::new().to_string())?;
        globals.set("__tether_uuid", uuid)?;

        let observer = self.observer.clone();
        let title = Function::new(ctx.clone(), move |title: String| {
            observer.on_title_change(&title);
        })?;
        globals.set("__tether_title", title)?;
        Ok(())
    }

    fn eval(&self, name: &str, code: &str) -> Result<()> {
        let Some(loaded) = &self.loaded else {
            return Err(Error::Script(format!("{} has no document", self.name)));
        };
        loaded.context.with(|ctx| eval(&ctx, name, code))
    }

    /// Serves one registry operation.
    pub(crate) fn dispatch(
        &self,
        op: &str,
        args: &Args,
    ) -> std::result::Result<WireValue, ErrorPayload> {
        let Some(loaded) = &self.loaded else {
            let message = format!("{} has no document", self.name);
            return Err(ErrorPayload::new("PageNotLoaded", message));
        };
        let payload = json::args_to_json(args).to_string();
        let reply = loaded.context.with(|ctx| -> Result<String> {
            let glue: Object = ctx.globals().get("__tether")?;
            let dispatch: Function = glue.get("dispatch")?;
            dispatch
                .call::<_, String>((op, payload))
                .catch(&ctx)
                .map_err(|e| Error::Script(e.to_string()))
        });
        match reply.and_then(|text| json::outcome_from_json(&text)) {
            Ok(status) => status,
            Err(e) => Err(e.to_payload()),
        }
    }

    /// Resolves a host call the page made earlier.
    pub(crate) fn complete(&self, generation: u64, call_id: String, outcome: Outcome) {
        if generation != self.generation {
            debug!(page = %self.name, call_id, "dropping completion for a previous document");
            return;
        }
        let Some(loaded) = &self.loaded else { return };
        let text = json::outcome_to_json(&outcome.map_err(|e| e.to_payload()));
        let result = loaded.context.with(|ctx| -> Result<()> {
            let glue: Object = ctx.globals().get("__tether")?;
            let complete: Function = glue.get("complete")?;
            complete
                .call::<_, ()>((call_id, text))
                .catch(&ctx)
                .map_err(|e| Error::Script(e.to_string()))
        });
        if let Err(e) = result {
            warn!(page = %self.name, error = %e, "could not deliver host reply");
        }
    }

    pub(crate) fn collect_garbage(&self) {
        if let Some(loaded) = &self.loaded {
            loaded.runtime.run_gc();
        }
    }

    /// Runs queued promise jobs.
    pub(crate) fn drain_jobs(&self) {
        let Some(loaded) = &self.loaded else { return };
        for _ in 0..MAX_JOBS_PER_EVENT {
            match loaded.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => return,
                Err(_) => warn!(page = %self.name, "uncaught exception in promise job"),
            }
        }
        warn!(page = %self.name, "promise jobs still pending after {} runs", MAX_JOBS_PER_EVENT);
    }
}

fn eval(ctx: &Ctx<'_>, name: &str, code: &str) -> Result<()> {
    ctx.eval::<(), _>(code)
        .catch(ctx)
        .map_err(|e| Error::Script(format!("{}: {}", name, e)))
}

fn send_host_call(
    peer: &Peer,
    events: &UnboundedSender<PageEvent>,
    generation: u64,
    call_id: String,
    op: &str,
    payload: &str,
) {
    let args = serde_json::from_str(payload).map_err(Error::from).and_then(json::args_from_json);
    let args = match args {
        Ok(args) => args,
        Err(e) => {
            let _ = events.send(PageEvent::Completion { generation, call_id, outcome: Err(e) });
            return;
        }
    };
    let events = events.clone();
    peer.call(
        op,
        args,
        Box::new(move |outcome| {
            let _ = events.send(PageEvent::Completion { generation, call_id, outcome });
        }),
    );
}
