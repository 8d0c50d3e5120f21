//! Applications and the state they see on every tick.

use std::sync::Arc;

use crate::bindings::Bindings;
use crate::bridge::Bridge;
use crate::error::Result;
use crate::namespace::Namespace;
use crate::page::PreloadScript;
use crate::variants::Window;

use super::queue::UpdateQueue;

/// Application callbacks. All run on the main thread.
///
/// An error returned from any hook closes the application.
pub trait WebAppHooks: 'static {
    /// The document finished loading. Runs again after every navigation.
    fn on_load(&mut self, _ctx: &mut AppContext) -> Result<()> {
        Ok(())
    }

    /// Runs once per tick, after queued events.
    fn update(&mut self, _ctx: &mut AppContext) -> Result<()> {
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut AppContext) {}
}

struct NoHooks;

impl WebAppHooks for NoHooks {}

/// Everything needed to start one application.
pub struct WebApp {
    pub(crate) document: String,
    pub(crate) preloads: Vec<PreloadScript>,
    pub(crate) bindings: Bindings,
    pub(crate) hooks: Box<dyn WebAppHooks>,
}

impl WebApp {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            preloads: Vec::new(),
            bindings: Bindings::default(),
            hooks: Box::new(NoHooks),
        }
    }

    pub fn preload(mut self, script: PreloadScript) -> Self {
        self.preloads.push(script);
        self
    }

    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn hooks(mut self, hooks: impl WebAppHooks) -> Self {
        self.hooks = Box::new(hooks);
        self
    }
}

impl std::fmt::Debug for WebApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebApp")
            .field("document", &self.document.len())
            .field("preloads", &self.preloads.len())
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Per-application state owned by the main thread. Never leaves it.
pub struct AppContext {
    key: String,
    scope_key: String,
    bridge: Bridge,
    queue: UpdateQueue,
    title: String,
    close_requested: bool,
    user_data: anymap::Map<dyn anymap::any::Any + Send + Sync>,
}

impl AppContext {
    pub(crate) fn new(key: String, scope_key: String, bridge: Bridge, queue: UpdateQueue) -> Self {
        Self {
            key,
            scope_key,
            bridge,
            queue,
            title: String::new(),
            close_requested: false,
            user_data: anymap::Map::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key of the namespace created for this application.
    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn scope(&self) -> Result<Arc<Namespace>> {
        self.bridge.namespaces().get(&self.scope_key)
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn window(&self) -> Result<Window> {
        self.bridge.window()
    }

    /// A queue other threads can use to reach this application.
    pub fn queue(&self) -> UpdateQueue {
        self.queue.clone()
    }

    /// The last title the page set.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
    }

    /// Closes the application at the end of the current tick.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.user_data.insert(val);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.user_data.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.user_data.get_mut::<T>()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("key", &self.key)
            .field("scope_key", &self.scope_key)
            .field("title", &self.title)
            .finish()
    }
}
