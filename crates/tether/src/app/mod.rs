//! # Application Loop
//!
//! Runs any number of page-backed applications from one thread.
//!
//! ## Philosophy
//!
//! - **Two Threads Matter**: The I/O thread delivers replies and page notifications. The main
//!   thread pumps surfaces and runs application hooks. The only way from the first to the
//!   second is an app's `UpdateQueue`.
//! - **Apps Fail Alone**: An error or panic in one application's tick closes that application.
//!   The loop keeps running the others.

mod queue;
mod surface;
mod webapp;

pub use queue::Action;
pub use queue::UpdateQueue;
pub use surface::FrameStatus;
pub use surface::HeadlessSurface;
pub use surface::Surface;
pub use surface::SurfaceCloser;
pub use webapp::AppContext;
pub use webapp::WebApp;
pub use webapp::WebAppHooks;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::bindings::Bindings;
use crate::bridge::Bridge;
use crate::config::Budget;
use crate::config::ProxyConfig;
use crate::error::Error;
use crate::error::Result;
use crate::namespace::CreateMode;
use crate::namespace::NamespaceRegistry;
use queue::AppEvent;
use queue::QueueObserver;

/// Prefix of the namespace each application gets.
pub const SCOPE_PREFIX: &str = "SCOPE_";

#[derive(Debug, Clone)]
pub struct AppManagerConfig {
    /// Minimum time between two ticks of `mainloop`.
    pub update_interval: Duration,
    pub proxy: ProxyConfig,
    pub budget: Budget,
}

impl Default for AppManagerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(50),
            proxy: ProxyConfig::default(),
            budget: Budget::default(),
        }
    }
}

impl AppManagerConfig {
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }
}

struct PendingApp {
    key: String,
    app: WebApp,
    surface: Box<dyn Surface>,
}

struct RunningApp {
    ctx: AppContext,
    hooks: Box<dyn WebAppHooks>,
    surface: Box<dyn Surface>,
    inbox: UnboundedReceiver<AppEvent>,
}

impl RunningApp {
    /// One tick. `Ok(false)` means the app is done.
    fn step(&mut self) -> Result<bool> {
        if self.surface.pump() == FrameStatus::Closed {
            return Ok(false);
        }
        loop {
            match self.inbox.try_recv() {
                Ok(AppEvent::Loaded) => self.hooks.on_load(&mut self.ctx)?,
                Ok(AppEvent::TitleChanged(title)) => {
                    self.surface.set_title(&title);
                    self.ctx.set_title(title);
                }
                Ok(AppEvent::LoadFailed(message)) => {
                    return Err(Error::Script(format!("page failed to load: {}", message)));
                }
                Ok(AppEvent::Action(action)) => action(&mut self.ctx)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(false),
            }
        }
        self.hooks.update(&mut self.ctx)?;
        Ok(!self.ctx.close_requested())
    }

    fn close(mut self, namespaces: &NamespaceRegistry) {
        self.hooks.on_close(&mut self.ctx);
        let _ = namespaces.destroy(self.ctx.scope_key());
        debug!(app = %self.ctx.key(), "app closed");
    }
}

/// Stops `mainloop` from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Owns every running application. Lives on, and is only used from, the main thread.
pub struct AppManager {
    config: AppManagerConfig,
    namespaces: Arc<NamespaceRegistry>,
    pending: Vec<PendingApp>,
    apps: Vec<RunningApp>,
    running: Arc<AtomicBool>,
}

impl AppManager {
    pub fn new(config: AppManagerConfig) -> Result<Self> {
        let namespaces = Arc::new(NamespaceRegistry::new(config.budget));
        namespaces.init()?;
        Ok(Self::with_namespaces(config, namespaces))
    }

    /// Shares a namespace registry with code outside the manager.
    pub fn with_namespaces(config: AppManagerConfig, namespaces: Arc<NamespaceRegistry>) -> Self {
        Self {
            config,
            namespaces,
            pending: Vec::new(),
            apps: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn namespaces(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    /// Queues an application. It starts at the beginning of the next step.
    pub fn add_webapp(
        &mut self,
        key: impl Into<String>,
        app: WebApp,
        surface: impl Surface + 'static,
    ) -> Result<()> {
        let key = key.into();
        if self.contains(&key) {
            return Err(Error::DuplicateApp(key));
        }
        self.pending.push(PendingApp { key, app, surface: Box::new(surface) });
        Ok(())
    }

    /// Closes an application. Returns false if no app has the key.
    pub fn remove_webapp(&mut self, key: &str) -> bool {
        if let Some(index) = self.pending.iter().position(|p| p.key == key) {
            self.pending.remove(index);
            return true;
        }
        match self.apps.iter().position(|a| a.ctx.key() == key) {
            Some(index) => {
                self.apps.remove(index).close(&self.namespaces);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.iter().any(|p| p.key == key) || self.apps.iter().any(|a| a.ctx.key() == key)
    }

    /// Keys of the running applications, in start order.
    pub fn keys(&self) -> Vec<&str> {
        self.apps.iter().map(|a| a.ctx.key()).collect()
    }

    pub fn app(&self, key: &str) -> Option<&AppContext> {
        self.apps.iter().map(|a| &a.ctx).find(|ctx| ctx.key() == key)
    }

    /// True until stopped or until there is nothing left to run.
    pub fn should_run(&self) -> bool {
        self.running.load(Ordering::Acquire) && !(self.apps.is_empty() && self.pending.is_empty())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { running: self.running.clone() }
    }

    /// Ticks every `update_interval` until `should_run` turns false, then shuts down.
    pub fn mainloop(&mut self) {
        info!(interval = ?self.config.update_interval, "main loop started");
        while self.should_run() {
            let deadline = Instant::now() + self.config.update_interval;
            self.mainloop_step();
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        self.shutdown();
    }

    /// Starts queued applications, then ticks each running one once.
    pub fn mainloop_step(&mut self) {
        for pending in std::mem::take(&mut self.pending) {
            let key = pending.key.clone();
            match self.launch(pending) {
                Ok(app) => self.apps.push(app),
                Err(e) => error!(app = %key, error = %e, "app failed to start"),
            }
        }

        let mut index = 0;
        while index < self.apps.len() {
            let app = &mut self.apps[index];
            let keep = match std::panic::catch_unwind(AssertUnwindSafe(|| app.step())) {
                Ok(Ok(keep)) => keep,
                Ok(Err(e)) => {
                    error!(app = %app.ctx.key(), error = %e, "app failed");
                    false
                }
                Err(_) => {
                    error!(app = %app.ctx.key(), "app panicked");
                    false
                }
            };
            if keep {
                index += 1;
            } else {
                let app = self.apps.remove(index);
                let closed = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    app.close(&self.namespaces)
                }));
                if closed.is_err() {
                    warn!("app panicked while closing");
                }
            }
        }
    }

    /// Closes every application and stops the loop.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.pending.clear();
        for app in self.apps.drain(..) {
            app.close(&self.namespaces);
        }
        debug!("app manager shut down");
    }

    fn launch(&self, pending: PendingApp) -> Result<RunningApp> {
        let PendingApp { key, app, surface } = pending;
        let scope_key = format!("{}{}", SCOPE_PREFIX, key);
        self.namespaces.create(Some(&scope_key), CreateMode::IfAbsent)?;

        let (queue, inbox) = UpdateQueue::new();
        let bindings: Bindings = app
            .bindings
            .to_builder()
            .property("app_manager_key", key.as_str())
            .property("app_scope_key", scope_key.as_str())
            .rebind();

        let mut builder = Bridge::builder(key.clone())
            .config(self.config.proxy.clone())
            .budget(self.config.budget)
            .bindings(bindings)
            .namespaces(self.namespaces.clone())
            .observer(Arc::new(QueueObserver { queue: queue.clone() }))
            .document(app.document);
        for script in app.preloads {
            builder = builder.preload(script);
        }
        let bridge = match builder.build() {
            Ok(bridge) => bridge,
            Err(e) => {
                let _ = self.namespaces.destroy(&scope_key);
                return Err(e);
            }
        };

        debug!(app = %key, scope = %scope_key, "app started");
        Ok(RunningApp {
            ctx: AppContext::new(key, scope_key, bridge, queue),
            hooks: app.hooks,
            surface,
            inbox,
        })
    }
}

impl Drop for AppManager {
    fn drop(&mut self) {
        if !self.apps.is_empty() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for AppManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppManager")
            .field("apps", &self.keys())
            .field("pending", &self.pending.len())
            .finish()
    }
}
