//! # Bridge
//!
//! One host/page connection with everything it needs: the I/O thread, both peers, the page
//! thread, the host's scope service and the manager that mints proxies into the page.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use crate::bindings::Bindings;
use crate::callbacks::CallbackRegistry;
use crate::channel::ChannelEnd;
use crate::config::Budget;
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::io::IoThread;
use crate::namespace::NamespaceRegistry;
use crate::page::NullObserver;
use crate::page::Page;
use crate::page::PageConfig;
use crate::page::PageObserver;
use crate::page::PreloadScript;
use crate::peer::Dispatcher;
use crate::peer::Peer;
use crate::proxy::Proxy;
use crate::proxy::RemoteObjectManager;
use crate::service::ScopeService;
use crate::variants::Window;

pub struct BridgeBuilder {
    name: String,
    config: ProxyConfig,
    budget: Budget,
    preloads: Vec<PreloadScript>,
    bindings: Bindings,
    namespaces: Option<Arc<NamespaceRegistry>>,
    observer: Arc<dyn PageObserver>,
    runtime: Option<Handle>,
    document: Option<String>,
    auto_convert: bool,
}

impl BridgeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ProxyConfig::default(),
            budget: Budget::default(),
            preloads: Vec::new(),
            bindings: Bindings::default(),
            namespaces: None,
            observer: Arc::new(NullObserver),
            runtime: None,
            document: None,
            auto_convert: true,
        }
    }

    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Adds a script run before every document, after the built-in glue.
    pub fn preload(mut self, script: PreloadScript) -> Self {
        self.preloads.push(script);
        self
    }

    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Shares an existing namespace registry. By default the bridge gets its own.
    pub fn namespaces(mut self, namespaces: Arc<NamespaceRegistry>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs the peers on an existing runtime instead of a dedicated I/O thread. The runtime
    /// must keep driving tasks while callers block on proxy operations.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The document loaded by `build`. Without one the page starts empty.
    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn auto_convert(mut self, enabled: bool) -> Self {
        self.auto_convert = enabled;
        self
    }

    pub fn build(self) -> Result<Bridge> {
        let (io, runtime) = match self.runtime {
            Some(runtime) => (None, runtime),
            None => {
                let io = IoThread::spawn(&format!("{}-io", self.name))?;
                let runtime = io.handle().clone();
                (Some(io), runtime)
            }
        };

        let namespaces = match self.namespaces {
            Some(namespaces) => namespaces,
            None => {
                let namespaces = Arc::new(NamespaceRegistry::new(self.budget));
                namespaces.init()?;
                namespaces
            }
        };
        let callbacks = Arc::new(CallbackRegistry::new());
        let service = ScopeService::new(namespaces.clone(), callbacks.clone(), runtime.clone())
            .auto_convert(self.auto_convert);

        let (host_end, page_end) = ChannelEnd::pair();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(service.clone());
        let label = format!("{}-host", self.name);
        let host =
            Arc::new(Peer::new(label, Box::new(host_end), runtime.clone(), Some(dispatcher)));
        let objects = RemoteObjectManager::new(host, callbacks.clone(), self.config);
        service.attach(&objects);

        let page = Page::spawn(
            PageConfig {
                name: self.name.clone(),
                budget: self.budget,
                preloads: self.preloads,
                bindings: self.bindings.install(&callbacks),
                observer: self.observer,
            },
            Box::new(page_end),
            runtime,
        )?;

        let bridge = Bridge {
            page,
            objects,
            service,
            namespaces,
            callbacks,
            name: self.name,
            _io: io,
        };
        debug!(bridge = %bridge.name, "bridge started");
        bridge.page.load(self.document)?;
        Ok(bridge)
    }
}

/// A running host/page connection.
///
/// Dropping the bridge stops the page thread, then the I/O thread. Proxies that outlive it
/// fail with a transport error.
pub struct Bridge {
    page: Page,
    objects: Arc<RemoteObjectManager>,
    service: ScopeService,
    namespaces: Arc<NamespaceRegistry>,
    callbacks: Arc<CallbackRegistry>,
    name: String,
    _io: Option<IoThread>,
}

impl Bridge {
    pub fn builder(name: impl Into<String>) -> BridgeBuilder {
        BridgeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the document. Page state and transient callbacks do not survive.
    pub fn navigate(&self, document: impl Into<String>) -> Result<()> {
        self.callbacks.clear_transient();
        self.page.load(Some(document.into()))
    }

    pub fn reload(&self) -> Result<()> {
        self.callbacks.clear_transient();
        self.page.reload()
    }

    /// Evaluates a global script in the current document.
    pub fn execute(&self, code: impl Into<String>) -> Result<()> {
        self.page.execute(code)
    }

    pub fn global(&self) -> Result<Proxy> {
        self.objects.global()
    }

    pub fn window(&self) -> Result<Window> {
        self.objects.window()
    }

    pub fn objects(&self) -> &Arc<RemoteObjectManager> {
        &self.objects
    }

    pub fn namespaces(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn service(&self) -> &ScopeService {
        &self.service
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge").field("name", &self.name).field("objects", &self.objects).finish()
    }
}
