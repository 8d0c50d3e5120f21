//! # Remote Object Proxies
//!
//! A `Proxy` is a local stand-in for a value that lives in a page's object registry. Every
//! operation is synchronous for the caller: marshal, send, correlate, wait, unwrap.
//!
//! ## Philosophy
//!
//! - **Handles, Not Pointers**: The registry owns the value. A proxy holds nothing but a
//!   handle and the manager that knows where to send requests.
//! - **Requester Allocates**: Operations that produce a new remote value send the handle the
//!   result must be stored under. The proxy exists before the reply arrives, and a reply that
//!   arrives too late can still be cleaned up.
//!
//! ## Invariants
//! - **Single Owner**: At most one owning proxy exists per handle. `as_subtype` moves
//!   ownership; `share` hands out non-owning views.
//! - **Release Once**: `destroy` clears the handle before notifying the registry, so no code
//!   path releases twice.
//! - **Fail Fast**: An operation on a destroyed proxy never reaches the transport.
//!
//! Never call a blocking proxy operation from the I/O thread: the reply it waits for is
//! delivered by that same thread.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tetherpack::Handle;
use tetherpack::WireValue;
use tetherrpc::Args;
use tracing::warn;

use crate::callbacks::CallbackRegistry;
use crate::config::CallPolicy;
use crate::config::ProxyConfig;
use crate::correlator::PendingCall;
use crate::error::Error;
use crate::error::Result;
use crate::marshal::Marshaller;
use crate::ops;
use crate::peer::Peer;
use crate::schema::OBJECT;
use crate::schema::Schema;
use crate::value::Value;
use crate::variants::ProxyVariant;
use crate::variants::Window;

static NEXT_MANAGER: AtomicU64 = AtomicU64::new(1);

/// Identifies the registry a proxy points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

impl std::fmt::Display for ManagerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "objects-{}", self.0)
    }
}

/// Issues object operations to one page registry and mints the proxies that refer into it.
pub struct RemoteObjectManager {
    id: ManagerId,
    peer: Arc<Peer>,
    callbacks: Arc<CallbackRegistry>,
    config: ProxyConfig,
}

impl RemoteObjectManager {
    pub fn new(
        peer: Arc<Peer>,
        callbacks: Arc<CallbackRegistry>,
        config: ProxyConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ManagerId(NEXT_MANAGER.fetch_add(1, Ordering::Relaxed)),
            peer,
            callbacks,
            config,
        })
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// A proxy to the page's global object.
    pub fn global(self: &Arc<Self>) -> Result<Proxy> {
        self.construct("return globalThis;", Vec::new())
    }

    /// The global object, typed as a window.
    pub fn window(self: &Arc<Self>) -> Result<Window> {
        self.global()?.as_subtype()
    }

    /// Runs `code` as a function body on the page, with each param bound by name, and stores
    /// what it returns.
    pub fn construct(self: &Arc<Self>, code: &str, params: Vec<(&str, Value)>) -> Result<Proxy> {
        let args = Args::new().with("code", code).with("params", self.marshal_params(params));
        self.create_with("construct".into(), ops::CONSTRUCT, args, &OBJECT)
    }

    /// Builds `value` on the page in a single round trip.
    pub fn create(self: &Arc<Self>, value: impl Into<Value>) -> Result<Proxy> {
        let args = Args::new().with("value", self.marshal(&value.into()));
        self.create_with("create".into(), ops::ASSEMBLE, args, &OBJECT)
    }

    /// Wraps a handle and takes responsibility for releasing it.
    pub fn adopt(self: &Arc<Self>, handle: Handle) -> Proxy {
        Proxy::new(self.clone(), Some(handle), true, &OBJECT)
    }

    /// Wraps a handle owned by someone else. The proxy never releases it.
    pub fn borrow(self: &Arc<Self>, handle: Handle) -> Proxy {
        Proxy::new(self.clone(), Some(handle), false, &OBJECT)
    }

    /// Tells the registry to drop the value behind `handle`. Fire and forget.
    pub fn release(&self, handle: Handle) {
        self.peer.notify(ops::RELEASE, Args::new().with("handle", handle.to_string()));
    }

    pub fn marshal(&self, value: &Value) -> WireValue {
        Marshaller::new(self).to_wire(value)
    }

    fn marshal_params(&self, params: Vec<(&str, Value)>) -> WireValue {
        WireValue::Map(
            params
                .into_iter()
                .map(|(name, value)| (name.to_owned(), self.marshal(&value)))
                .collect(),
        )
    }

    fn marshal_list(&self, values: &[Value]) -> WireValue {
        WireValue::List(values.iter().map(|value| self.marshal(value)).collect())
    }

    /// The value returned in place of a proxy when sentinels are enabled.
    pub fn sentinel(self: &Arc<Self>) -> Proxy {
        Proxy::new(self.clone(), None, false, &OBJECT)
    }

    /// Sends an operation whose result is stored under a fresh handle and wraps that handle.
    fn create_with(
        self: &Arc<Self>,
        label: String,
        op: &str,
        mut args: Args,
        schema: &'static Schema,
    ) -> Result<Proxy> {
        let target = Handle::new();
        args.insert("target", target.to_string());
        match self.request(label, op, args, Some(target), &self.config.read_policy())? {
            Some(_) => Ok(Proxy::new(self.clone(), Some(target), true, schema)),
            None => Ok(self.sentinel()),
        }
    }

    /// Sends one request and blocks until it resolves.
    ///
    /// `creates` names the handle the request stores its result under. If the reply arrives
    /// after the caller gave up, that value is released instead of leaking in the registry.
    pub(crate) fn request(
        &self,
        label: String,
        op: &str,
        args: Args,
        creates: Option<Handle>,
        policy: &CallPolicy,
    ) -> Result<Option<WireValue>> {
        let call = Arc::new(PendingCall::new(label, policy));
        let waiter = call.clone();
        let peer = Arc::downgrade(&self.peer);

        self.peer.call(
            op,
            args,
            Box::new(move |outcome| {
                let stored = outcome.is_ok();
                if waiter.complete(outcome) || !stored {
                    return;
                }
                let Some(handle) = creates else { return };
                warn!(label = %waiter.label(), %handle, "releasing value whose call was abandoned");
                if let Some(peer) = peer.upgrade() {
                    peer.notify(ops::RELEASE, Args::new().with("handle", handle.to_string()));
                }
            }),
        );
        call.resolve(policy)
    }
}

impl std::fmt::Debug for RemoteObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectManager")
            .field("id", &self.id)
            .field("peer", &self.peer.peer_name())
            .finish()
    }
}

/// A handle to a value on the page.
pub struct Proxy {
    objects: Arc<RemoteObjectManager>,
    handle: Option<Handle>,
    owned: bool,
    schema: &'static Schema,
    cached_type: OnceLock<String>,
}

impl Proxy {
    fn new(
        objects: Arc<RemoteObjectManager>,
        handle: Option<Handle>,
        owned: bool,
        schema: &'static Schema,
    ) -> Self {
        Self { objects, handle, owned, schema, cached_type: OnceLock::new() }
    }

    /// `None` once destroyed.
    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    /// True if dropping this proxy releases the remote value.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn manager_id(&self) -> ManagerId {
        self.objects.id()
    }

    pub fn objects(&self) -> &Arc<RemoteObjectManager> {
        &self.objects
    }

    /// The live handle, or the destroyed-reference policy's answer: an error in strict mode,
    /// `None` (meaning "return a sentinel") otherwise.
    fn live(&self, label: &str) -> Result<Option<Handle>> {
        match self.handle {
            Some(handle) => Ok(Some(handle)),
            None if self.objects.config.strict_destroyed => {
                Err(Error::Destroyed { label: label.to_owned() })
            }
            None => Ok(None),
        }
    }

    fn target(handle: Handle) -> Args {
        Args::new().with("handle", handle.to_string())
    }

    /// Reads a property. The child proxy carries the schema this proxy declares for `name`.
    pub fn get_attribute(&self, name: &str) -> Result<Proxy> {
        let Some(handle) = self.live("get_attribute")? else {
            return Ok(self.objects.sentinel());
        };
        let args = Self::target(handle).with("name", name);
        let label = format!("get_attribute({})", name);
        self.objects.create_with(label, ops::GET_ATTR, args, self.schema.child(name))
    }

    /// Writes a property. Waits as long as the write policy allows, unbounded by default.
    ///
    /// Returns `false` when a sentinel was produced instead of an acknowledgement.
    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let Some(handle) = self.live("set_attribute")? else {
            return Ok(false);
        };
        let value = self.objects.marshal(&value.into());
        let args = Self::target(handle).with("name", name).with("value", value);
        let policy = self.objects.config.write_policy();
        let label = format!("set_attribute({})", name);
        let ack = self.objects.request(label, ops::SET_ATTR, args, None, &policy)?;
        Ok(ack.is_some())
    }

    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        let Some(handle) = self.live("has_attribute")? else {
            return Ok(false);
        };
        let args = Self::target(handle).with("name", name);
        let policy = self.objects.config.read_policy();
        let label = format!("has_attribute({})", name);
        let reply = self.objects.request(label, ops::HAS_ATTR, args, None, &policy)?;
        Ok(reply.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Removes a property and returns a proxy to the value it held.
    pub fn delete_attribute(&self, name: &str) -> Result<Proxy> {
        let Some(handle) = self.live("delete_attribute")? else {
            return Ok(self.objects.sentinel());
        };
        let args = Self::target(handle).with("name", name);
        let label = format!("delete_attribute({})", name);
        self.objects.create_with(label, ops::DEL_ATTR, args, &OBJECT)
    }

    /// Calls the referenced value as a function.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Proxy> {
        let Some(handle) = self.live("invoke")? else {
            return Ok(self.objects.sentinel());
        };
        let args = Self::target(handle).with("args", self.objects.marshal_list(&args));
        self.objects.create_with("invoke".into(), ops::CALL, args, &OBJECT)
    }

    /// Calls a member of the referenced value with the value as receiver.
    pub fn invoke_method(&self, name: &str, args: Vec<Value>) -> Result<Proxy> {
        let Some(handle) = self.live("invoke_method")? else {
            return Ok(self.objects.sentinel());
        };
        let args = self.objects.marshal_list(&args);
        let args = Self::target(handle).with("name", name).with("args", args);
        let label = format!("invoke_method({})", name);
        self.objects.create_with(label, ops::CALL_METHOD, args, &OBJECT)
    }

    /// Runs `code` as a function body with the referenced value bound to `self`.
    pub fn access(&self, code: &str, params: Vec<(&str, Value)>) -> Result<Proxy> {
        let Some(handle) = self.live("access")? else {
            return Ok(self.objects.sentinel());
        };
        let params = self.objects.marshal_params(params);
        let args = Self::target(handle).with("code", code).with("params", params);
        self.objects.create_with("access".into(), ops::ACCESS, args, &OBJECT)
    }

    /// Pulls the value across. Objects come back as a structural copy; nested values that
    /// cannot be copied arrive as proxies borrowed from the registry.
    pub fn materialize(&self) -> Result<Value> {
        let Some(handle) = self.live("materialize")? else {
            return Ok(Value::Undefined);
        };
        let policy = self.objects.config.read_policy();
        let target = Self::target(handle);
        match self.objects.request("materialize".into(), ops::MATERIALIZE, target, None, &policy)? {
            Some(wire) => Ok(Value::from_wire(wire, Some(&self.objects))),
            None => Ok(Value::Undefined),
        }
    }

    /// The page's `typeof` for the referenced value. Cached after the first answer.
    pub fn query_type(&self) -> Result<String> {
        if let Some(cached) = self.cached_type.get() {
            return Ok(cached.clone());
        }
        let Some(handle) = self.live("query_type")? else {
            return Ok("undefined".into());
        };
        let policy = self.objects.config.read_policy();
        let target = Self::target(handle);
        match self.objects.request("query_type".into(), ops::TYPE_OF, target, None, &policy)? {
            Some(WireValue::String(name)) => Ok(self.cached_type.get_or_init(|| name).clone()),
            Some(other) => Err(Error::Protocol(format!("type_of returned {:?}", other))),
            None => Ok("undefined".into()),
        }
    }

    /// A diagnostic description. Booleans, numbers and strings show their value; everything
    /// else is opaque.
    pub fn describe(&self) -> String {
        if self.is_destroyed() {
            return "Proxy(destroyed)".into();
        }
        let kind = match self.query_type() {
            Ok(kind) => kind,
            Err(e) => return format!("Proxy(<{}>)", e.name()),
        };
        if !matches!(kind.as_str(), "boolean" | "number" | "string") {
            return format!("Proxy({})", kind);
        }
        match self.materialize() {
            Ok(Value::Bool(b)) => format!("Proxy({}: {})", kind, b),
            Ok(Value::Number(n)) => format!("Proxy({}: {})", kind, n),
            Ok(Value::String(s)) => format!("Proxy({}: {:?})", kind, s),
            _ => format!("Proxy({})", kind),
        }
    }

    /// Moves the handle into a typed variant. This proxy is left destroyed and releases
    /// nothing; the variant now owns the handle.
    pub fn as_subtype<V: ProxyVariant>(&mut self) -> Result<V> {
        let Some(handle) = self.live("as_subtype")? else {
            return Ok(V::from_proxy(Proxy::new(self.objects.clone(), None, false, V::schema())));
        };
        self.handle = None;
        let proxy = Proxy {
            objects: self.objects.clone(),
            handle: Some(handle),
            owned: std::mem::replace(&mut self.owned, false),
            schema: V::schema(),
            cached_type: std::mem::take(&mut self.cached_type),
        };
        Ok(V::from_proxy(proxy))
    }

    /// A non-owning view of the same remote value.
    pub fn share(&self) -> Proxy {
        Proxy::new(self.objects.clone(), self.handle, false, self.schema)
    }

    /// Idempotent. An owning proxy notifies the registry the first time.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.owned {
                self.objects.release(handle);
            }
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("handle", &self.handle)
            .field("schema", &self.schema.name)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use std::time::Instant;

    use dashmap::DashMap;
    use tetherrpc::CallFrame;
    use tetherrpc::ErrorPayload;

    use super::*;
    use crate::channel::ChannelEnd;
    use crate::io::IoThread;
    use crate::peer::Dispatcher;
    use crate::peer::Responder;

    /// A registry that stores wire values instead of script values.
    #[derive(Default)]
    struct FakePage {
        store: DashMap<String, WireValue>,
        calls: AtomicUsize,
        releases: AtomicUsize,
        parked: Mutex<Vec<Responder>>,
    }

    impl FakePage {
        fn lookup(&self, args: &Args) -> std::result::Result<WireValue, ErrorPayload> {
            let id = args.str("handle").map_err(|e| ErrorPayload::new("TypeError", e.to_string()))?;
            self.store
                .get(id)
                .map(|v| v.value().clone())
                .ok_or_else(|| ErrorPayload::new("InvalidHandleError", id))
        }

        fn put(
            &self,
            args: &Args,
            value: WireValue,
        ) -> std::result::Result<WireValue, ErrorPayload> {
            let target =
                args.str("target").map_err(|e| ErrorPayload::new("TypeError", e.to_string()))?;
            self.store.insert(target.to_owned(), value);
            Ok(WireValue::Undefined)
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn unpark(&self) {
            for responder in self.parked.lock().unwrap().drain(..) {
                responder.reply(Ok(WireValue::Undefined));
            }
        }
    }

    impl Dispatcher for FakePage {
        fn dispatch(&self, call: CallFrame, responder: Responder) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let args = call.args;
            let reply = match call.op.as_str() {
                ops::RELEASE => {
                    self.releases.fetch_add(1, Ordering::SeqCst);
                    if let Ok(id) = args.str("handle") {
                        self.store.remove(id);
                    }
                    Ok(WireValue::Undefined)
                }
                ops::CONSTRUCT if args.str("code") == Ok("park") => {
                    let target = args.str("target").unwrap().to_owned();
                    self.store.insert(target, WireValue::Null);
                    self.parked.lock().unwrap().push(responder);
                    return;
                }
                ops::CONSTRUCT => self.put(&args, WireValue::Map(Vec::new())),
                ops::ASSEMBLE => {
                    let value = args.get("value").cloned().unwrap_or(WireValue::Undefined);
                    self.put(&args, value)
                }
                ops::MATERIALIZE => self.lookup(&args),
                ops::TYPE_OF => self.lookup(&args).map(|v| {
                    WireValue::from(match v {
                        WireValue::Bool(_) => "boolean",
                        WireValue::Number(_) => "number",
                        WireValue::String(_) => "string",
                        WireValue::Undefined => "undefined",
                        _ => "object",
                    })
                }),
                ops::GET_ATTR => self.lookup(&args).and_then(|v| {
                    let name = args.str("name").unwrap_or_default();
                    match v.get(name) {
                        Some(found) => self.put(&args, found.clone()),
                        None => {
                            let message = format!("{} is not defined", name);
                            Err(ErrorPayload::new("ReferenceError", message))
                        }
                    }
                }),
                ops::HAS_ATTR => self.lookup(&args).map(|v| {
                    WireValue::Bool(v.get(args.str("name").unwrap_or_default()).is_some())
                }),
                other => Err(ErrorPayload::new("TypeError", format!("unsupported {}", other))),
            };
            responder.reply(reply);
        }
    }

    // Drop order matters: proxies and peers go before the I/O thread.
    struct Harness {
        objects: Arc<RemoteObjectManager>,
        _page_peer: Peer,
        page: Arc<FakePage>,
        _io: IoThread,
    }

    fn connect(config: ProxyConfig) -> Harness {
        let io = IoThread::spawn("proxy-test").unwrap();
        let (host, remote) = ChannelEnd::pair();
        let page = Arc::new(FakePage::default());
        let dispatcher = Some(page.clone() as Arc<dyn Dispatcher>);
        let page_peer = Peer::new("page", Box::new(remote), io.handle().clone(), dispatcher);
        let host_peer = Arc::new(Peer::new("host", Box::new(host), io.handle().clone(), None));
        let callbacks = Arc::new(CallbackRegistry::new());
        let objects = RemoteObjectManager::new(host_peer, callbacks, config);
        Harness { objects, _page_peer: page_peer, page, _io: io }
    }

    fn eventually(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    // --- Test 1: Primitive Round Trip ---
    #[test]
    fn test_materialize_round_trip() {
        let h = connect(ProxyConfig::default());
        for value in [Value::from(42), Value::from("text"), Value::from(true)] {
            let proxy = h.objects.create(value_copy(&value)).unwrap();
            assert_eq!(proxy.materialize().unwrap(), value);
        }
        let list = h.objects.create(vec![1, 2, 3]).unwrap();
        assert_eq!(list.materialize().unwrap(), Value::from(vec![1, 2, 3]));
    }

    fn value_copy(value: &Value) -> Value {
        Value::from_wire(value.to_native().unwrap(), None)
    }

    // --- Test 2: Destroy Is Idempotent ---
    #[test]
    fn test_destroy_releases_once() {
        let h = connect(ProxyConfig::default());
        let mut proxy = h.objects.create(5).unwrap();
        proxy.destroy();
        proxy.destroy();
        drop(proxy);
        eventually("release", || h.page.releases() == 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(h.page.releases(), 1);
        assert!(h.page.store.is_empty());
    }

    // --- Test 3: Destroyed Proxies Fail Fast ---
    #[test]
    fn test_destroyed_proxy_never_reaches_transport() {
        let h = connect(ProxyConfig::default());
        let mut proxy = h.objects.create(5).unwrap();
        proxy.destroy();
        eventually("release", || h.page.releases() == 1);
        let before = h.page.calls();

        assert!(matches!(proxy.get_attribute("x"), Err(Error::Destroyed { .. })));
        assert!(matches!(proxy.materialize(), Err(Error::Destroyed { .. })));
        assert!(matches!(proxy.set_attribute("x", 1), Err(Error::Destroyed { .. })));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(h.page.calls(), before);
    }

    // --- Test 4: Sentinel Mode ---
    #[test]
    fn test_destroyed_proxy_sentinels() {
        let h = connect(ProxyConfig::default().strict_destroyed(false));
        let mut proxy = h.objects.create(5).unwrap();
        proxy.destroy();
        assert!(!proxy.has_attribute("x").unwrap());
        assert!(!proxy.set_attribute("x", 1).unwrap());
        assert_eq!(proxy.materialize().unwrap(), Value::Undefined);
        assert_eq!(proxy.query_type().unwrap(), "undefined");
        assert!(proxy.get_attribute("x").unwrap().is_destroyed());
        assert_eq!(proxy.describe(), "Proxy(destroyed)");
    }

    // --- Test 5: Subtyping Moves Ownership ---
    #[test]
    fn test_as_subtype_invalidates_source() {
        let h = connect(ProxyConfig::default());
        let mut source = h.objects.create(Value::map([("document", Value::Null)])).unwrap();
        let handle = source.handle();
        let window: Window = source.as_subtype().unwrap();

        assert!(source.is_destroyed());
        assert!(matches!(source.materialize(), Err(Error::Destroyed { .. })));
        assert_eq!(window.handle(), handle);
        assert!(window.has_attribute("document").unwrap());

        drop(source);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(h.page.releases(), 0);
        drop(window);
        eventually("release", || h.page.releases() == 1);
    }

    // --- Test 6: Remote Errors Surface ---
    #[test]
    fn test_missing_attribute_is_remote_error() {
        let h = connect(ProxyConfig::default());
        let proxy = h.objects.create(Value::map([("present", Value::from(1))])).unwrap();
        match proxy.get_attribute("absent") {
            Err(Error::Remote(payload)) => assert_eq!(payload.name, "ReferenceError"),
            other => panic!("unexpected {:?}", other.map(|p| p.handle())),
        }
        let present = proxy.get_attribute("present").unwrap();
        assert_eq!(present.materialize().unwrap(), Value::from(1));
    }

    // --- Test 7: Timeouts and Orphans ---
    #[test]
    fn test_timeout_raises() {
        let h = connect(ProxyConfig::default().read_timeout(Some(Duration::from_millis(20))));
        assert!(matches!(h.objects.construct("park", Vec::new()), Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_late_completion_releases_orphan() {
        let config = ProxyConfig::default()
            .read_timeout(Some(Duration::from_millis(20)))
            .raise_on_timeout(false);
        let h = connect(config);
        let proxy = h.objects.construct("park", Vec::new()).unwrap();
        assert!(proxy.is_destroyed());
        assert_eq!(h.page.store.len(), 1);

        h.page.unpark();
        eventually("orphan release", || h.page.releases() == 1);
        assert!(h.page.store.is_empty());
    }

    // --- Test 8: Describe ---
    #[test]
    fn test_describe() {
        let h = connect(ProxyConfig::default());
        assert_eq!(h.objects.create(3).unwrap().describe(), "Proxy(number: 3)");
        assert_eq!(h.objects.create("hi").unwrap().describe(), "Proxy(string: \"hi\")");
        assert_eq!(h.objects.create(vec![1]).unwrap().describe(), "Proxy(object)");
    }

    // --- Test 9: Marshalling ---
    #[test]
    fn test_marshal_paths() {
        let fast = connect(ProxyConfig::default());
        let value = Value::map([("a", Value::from(1))]);
        assert_eq!(
            fast.objects.marshal(&value),
            WireValue::Map(vec![("a".into(), WireValue::from(1))])
        );

        let slow = connect(ProxyConfig::default().fast_path(false));
        assert_eq!(
            slow.objects.marshal(&value),
            WireValue::Pairs(vec![WireValue::from("a")], vec![WireValue::from(1)])
        );

        let callable =
            fast.objects.marshal(&Value::List(vec![Value::callable(|_| Ok(Value::Null))]));
        let WireValue::List(items) = callable else { panic!("expected a list") };
        let WireValue::Callable(id) = &items[0] else { panic!("expected a callable") };
        assert!(fast.objects.callbacks().get(id).is_some());
    }

    #[test]
    fn test_marshal_proxies() {
        let home = connect(ProxyConfig::default());
        let foreign = connect(ProxyConfig::default());

        let local = home.objects.create(1).unwrap();
        assert_eq!(
            home.objects.marshal(&Value::from(&local)),
            WireValue::Handle(local.handle().unwrap())
        );

        let remote = foreign.objects.create(vec![7, 8]).unwrap();
        assert_eq!(
            home.objects.marshal(&Value::from(&remote)),
            WireValue::List(vec![WireValue::from(7), WireValue::from(8)])
        );

        let mut gone = home.objects.create(2).unwrap();
        gone.destroy();
        assert_eq!(
            home.objects.marshal(&Value::List(vec![Value::from(&gone)])),
            WireValue::List(vec![WireValue::Undefined])
        );
    }
}
