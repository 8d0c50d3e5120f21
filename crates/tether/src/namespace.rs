//! # Execution Namespaces
//!
//! Named, independently lifecycled script scopes on the host. Page code reaches them through
//! the `scope.*` operations; host code may use them directly.
//!
//! ## Invariants
//! - **Absent, Created, Destroyed**: A key is either registered or not. Every operation other
//!   than `create` fails with `NamespaceNotFound` on an absent key, never silently.
//! - **Unique Keys**: Generated keys are drawn at random from `n-1..=n-100000` and
//!   step upward on collision. Insertion is atomic, so concurrent creators never share a key.
//! - **Ambient Trust**: Any caller may use or destroy any namespace by key.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rquickjs::CatchResultExt;
use rquickjs::Context;
use rquickjs::Ctx;
use rquickjs::Function;
use rquickjs::Object;
use rquickjs::Runtime;
use rquickjs::Value as JsValue;
use serde_json::Value as Json;
use serde_json::json;
use tetherpack::WireValue;
use tracing::debug;
use tracing::warn;

use crate::config::Budget;
use crate::error::Error;
use crate::error::Result;
use crate::json::outcome_from_json;
use crate::json::to_json;

const RUNTIME_JS: &str = include_str!("../js/namespace_runtime.js");

const MAX_JOBS: usize = 10_000;

/// Size of the generated key space.
const KEY_SPACE: u32 = 100_000;

/// The namespace installed by `init`.
pub const MAIN: &str = "main";

/// Where `exec` puts the variables a snippet declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Declarations persist in the namespace.
    #[default]
    Global,
    /// Declarations and params live only for the duration of one `exec`.
    CallLocal,
}

/// What `create` does when the key is, or is not, already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Return the existing namespace or create a new one.
    #[default]
    IfAbsent,
    /// Fail if the key is registered.
    Strict,
    /// Fail if the key is not registered.
    MustExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub key: String,
    pub is_new: bool,
}

/// One execution scope, backed by its own script runtime.
pub struct Namespace {
    key: String,
    visibility: Visibility,
    context: Context,
    runtime: Runtime,
}

impl Namespace {
    pub fn new(key: impl Into<String>, visibility: Visibility, budget: Budget) -> Result<Self> {
        let runtime = Runtime::new()?;
        budget.apply(&runtime);
        let context = Context::full(&runtime)?;
        context.with(|ctx| -> Result<()> {
            install_script_runner(&ctx)?;
            ctx.eval::<(), _>(RUNTIME_JS)
                .catch(&ctx)
                .map_err(|e| Error::Script(format!("namespace runtime: {}", e)))
        })?;
        Ok(Self { key: key.into(), visibility, context, runtime })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Runs `code` with `params` bound by name. Returns the variable `return_name` if given,
    /// otherwise the snippet's completion value (global visibility) or return value
    /// (call-local visibility).
    pub fn exec(
        &self,
        code: &str,
        return_name: Option<&str>,
        params: &[(String, WireValue)],
    ) -> Result<WireValue> {
        self.dispatch(
            "exec",
            json!({
                "code": code,
                "return_name": return_name,
                "params": params_json(params),
                "local": self.visibility == Visibility::CallLocal,
            }),
        )
    }

    /// Runs `code` once as an anonymous function body. Nothing it declares persists.
    pub fn run_function(&self, code: &str, params: &[(String, WireValue)]) -> Result<WireValue> {
        self.dispatch("run_function", json!({ "code": code, "params": params_json(params) }))
    }

    /// Compiles `code` into a function taking `params` and binds it in the namespace.
    /// Returns the name it was bound under, generated when `name` is `None`.
    pub fn define_function(
        &self,
        name: Option<&str>,
        code: &str,
        params: &[String],
    ) -> Result<String> {
        match self.dispatch("define", json!({ "name": name, "code": code, "params": params }))? {
            WireValue::String(name) => Ok(name),
            other => Err(Error::Protocol(format!("define returned {:?}", other))),
        }
    }

    /// Fails with a remote `ReferenceError` if `name` is not bound.
    pub fn get_var(&self, name: &str) -> Result<WireValue> {
        self.dispatch("get", json!({ "name": name }))
    }

    pub fn set_var(&self, name: &str, value: &WireValue) -> Result<()> {
        self.dispatch("set", json!({ "name": name, "value": to_json(value) }))?;
        Ok(())
    }

    pub fn has_var(&self, name: &str) -> Result<bool> {
        Ok(self.dispatch("has", json!({ "name": name }))?.as_bool().unwrap_or(false))
    }

    /// Returns whether a binding was removed.
    pub fn delete_var(&self, name: &str) -> Result<bool> {
        Ok(self.dispatch("del", json!({ "name": name }))?.as_bool().unwrap_or(false))
    }

    /// Calls a bound function. Non-empty `kwargs` are passed as a trailing object argument.
    pub fn invoke(
        &self,
        name: &str,
        args: &[WireValue],
        kwargs: &[(String, WireValue)],
    ) -> Result<WireValue> {
        let args: Vec<Json> = args.iter().map(to_json).collect();
        self.dispatch(
            "invoke",
            json!({ "name": name, "args": args, "kwargs": params_json(kwargs) }),
        )
    }

    fn dispatch(&self, op: &str, payload: Json) -> Result<WireValue> {
        let payload = payload.to_string();
        let reply = self.context.with(|ctx| -> Result<String> {
            let scope: Object = ctx.globals().get("__scope")?;
            let dispatch: Function = scope.get("dispatch")?;
            dispatch
                .call::<_, String>((op, payload))
                .catch(&ctx)
                .map_err(|e| Error::Script(e.to_string()))
        })?;
        self.drain_jobs();
        outcome_from_json(&reply)?.map_err(Error::Remote)
    }

    fn drain_jobs(&self) {
        for _ in 0..MAX_JOBS {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => return,
                Err(_) => warn!(namespace = %self.key, "uncaught exception in promise job"),
            }
        }
        warn!(namespace = %self.key, "promise jobs still pending after {} runs", MAX_JOBS);
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("key", &self.key)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// `__scope_script(code)` evaluates `code` as a global script and returns its completion value.
/// Top-level `let`, `const` and `class` declarations land in the global lexical scope and
/// outlive the call.
fn install_script_runner<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let run = Function::new(
        ctx.clone(),
        |ctx: Ctx<'js>, code: String| -> rquickjs::Result<JsValue<'js>> { ctx.eval(code) },
    )?;
    ctx.globals().set("__scope_script", run)
}

fn params_json(params: &[(String, WireValue)]) -> Json {
    to_json(&WireValue::Map(params.to_vec()))
}

/// The process-wide table of namespaces.
///
/// Shared behind `Arc` and handed to whoever needs it; there is no global instance.
pub struct NamespaceRegistry {
    namespaces: DashMap<String, Arc<Namespace>>,
    budget: Budget,
}

impl NamespaceRegistry {
    pub fn new(budget: Budget) -> Self {
        Self { namespaces: DashMap::new(), budget }
    }

    /// Installs the `main` namespace if it is missing.
    pub fn init(&self) -> Result<()> {
        self.create(Some(MAIN), CreateMode::IfAbsent)?;
        Ok(())
    }

    /// Drops every namespace and runs `init` again.
    pub fn reset(&self) -> Result<()> {
        self.namespaces.clear();
        debug!("namespace registry reset");
        self.init()
    }

    pub fn create(&self, key: Option<&str>, mode: CreateMode) -> Result<Created> {
        self.create_with(key, mode, Visibility::Global)
    }

    pub fn create_with(
        &self,
        key: Option<&str>,
        mode: CreateMode,
        visibility: Visibility,
    ) -> Result<Created> {
        let Some(key) = key else {
            if mode == CreateMode::MustExist {
                return Err(Error::NamespaceNotFound("<unnamed>".into()));
            }
            return self.create_generated(visibility);
        };

        match self.namespaces.entry(key.to_owned()) {
            Entry::Occupied(_) if mode == CreateMode::Strict => {
                Err(Error::NamespaceExists(key.to_owned()))
            }
            Entry::Occupied(_) => Ok(Created { key: key.to_owned(), is_new: false }),
            Entry::Vacant(_) if mode == CreateMode::MustExist => {
                Err(Error::NamespaceNotFound(key.to_owned()))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Namespace::new(key, visibility, self.budget)?));
                debug!(namespace = key, "namespace created");
                Ok(Created { key: key.to_owned(), is_new: true })
            }
        }
    }

    fn create_generated(&self, visibility: Visibility) -> Result<Created> {
        let start = rand::thread_rng().gen_range(1..=KEY_SPACE);
        // Past the end of the key space probing keeps counting upward.
        for n in (start..=KEY_SPACE).chain(1..start).chain(KEY_SPACE + 1..) {
            let key = format!("n-{}", n);
            if let Entry::Vacant(slot) = self.namespaces.entry(key.clone()) {
                slot.insert(Arc::new(Namespace::new(&key, visibility, self.budget)?));
                debug!(namespace = %key, "namespace created");
                return Ok(Created { key, is_new: true });
            }
        }
        Err(Error::NamespaceExists("n-*".into()))
    }

    pub fn destroy(&self, key: &str) -> Result<()> {
        match self.namespaces.remove(key) {
            Some(_) => {
                debug!(namespace = key, "namespace destroyed");
                Ok(())
            }
            None => Err(Error::NamespaceNotFound(key.to_owned())),
        }
    }

    pub fn get(&self, key: &str) -> Result<Arc<Namespace>> {
        self.namespaces
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NamespaceNotFound(key.to_owned()))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.namespaces.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> =
            self.namespaces.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Replaces a namespace with a fresh one under the same key and visibility.
    pub fn reset_namespace(&self, key: &str) -> Result<()> {
        let mut entry = self
            .namespaces
            .get_mut(key)
            .ok_or_else(|| Error::NamespaceNotFound(key.to_owned()))?;
        let visibility = entry.visibility();
        *entry = Arc::new(Namespace::new(key, visibility, self.budget)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, WireValue)]) -> Vec<(String, WireValue)> {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_global_exec_persists() {
        let ns = Namespace::new("test", Visibility::Global, Budget::default()).unwrap();
        ns.exec("var total = base * 2;", None, &params(&[("base", WireValue::from(21))])).unwrap();
        assert_eq!(ns.get_var("total").unwrap(), WireValue::from(42));
        assert_eq!(ns.get_var("base").unwrap(), WireValue::from(21));
        assert_eq!(ns.exec("total + 1", None, &[]).unwrap(), WireValue::from(43));
        assert_eq!(ns.exec("let label = 'x';", Some("label"), &[]).unwrap(), WireValue::from("x"));
    }

    #[test]
    fn test_lexical_declarations_persist() {
        let ns = Namespace::new("test", Visibility::Global, Budget::default()).unwrap();
        let code = "let a = 1; const b = 2; class Point { constructor(x) { this.x = x; } }";
        ns.exec(code, None, &[]).unwrap();
        assert!(ns.has_var("a").unwrap());
        assert!(ns.has_var("b").unwrap());
        assert!(ns.has_var("Point").unwrap());
        assert_eq!(ns.exec("a + b", None, &[]).unwrap(), WireValue::from(3));
        assert_eq!(ns.exec("new Point(a + b).x", None, &[]).unwrap(), WireValue::from(3));
        assert_eq!(ns.get_var("b").unwrap(), WireValue::from(2));

        // Params assign into an existing lexical binding.
        ns.exec("a * 10", None, &params(&[("a", WireValue::from(4))])).unwrap();
        assert_eq!(ns.get_var("a").unwrap(), WireValue::from(4));

        // Lexical bindings cannot be deleted.
        assert!(!ns.delete_var("a").unwrap());
        match ns.exec("throw new RangeError('nope')", None, &[]) {
            Err(Error::Remote(e)) => {
                assert_eq!(e.name, "RangeError");
                assert_eq!(e.message, "nope");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!ns.has_var("__scope_script").unwrap());
    }

    #[test]
    fn test_call_local_exec_forgets() {
        let ns = Namespace::new("test", Visibility::CallLocal, Budget::default()).unwrap();
        let n = params(&[("n", WireValue::from(4))]);
        let result = ns.exec("var doubled = n * 2;", Some("doubled"), &n).unwrap();
        assert_eq!(result, WireValue::from(8));
        assert!(!ns.has_var("doubled").unwrap());
        assert!(!ns.has_var("n").unwrap());
    }

    #[test]
    fn test_variables() {
        let ns = Namespace::new("test", Visibility::Global, Budget::default()).unwrap();
        assert!(!ns.has_var("x").unwrap());
        match ns.get_var("x") {
            Err(Error::Remote(e)) => assert_eq!(e.name, "ReferenceError"),
            other => panic!("unexpected {:?}", other),
        }
        ns.set_var("x", &WireValue::List(vec![WireValue::from(1), WireValue::Null])).unwrap();
        assert!(ns.has_var("x").unwrap());
        assert_eq!(
            ns.get_var("x").unwrap(),
            WireValue::List(vec![WireValue::from(1), WireValue::Null])
        );
        assert!(ns.delete_var("x").unwrap());
        assert!(!ns.delete_var("x").unwrap());
        assert!(matches!(ns.set_var("not a name", &WireValue::Null), Err(Error::Remote(_))));
    }

    #[test]
    fn test_functions() {
        let ns = Namespace::new("test", Visibility::Global, Budget::default()).unwrap();
        let name =
            ns.define_function(Some("add"), "return a + b;", &["a".into(), "b".into()]).unwrap();
        assert_eq!(name, "add");
        let sum = ns.invoke("add", &[WireValue::from(2), WireValue::from(3)], &[]).unwrap();
        assert_eq!(sum, WireValue::from(5));

        let generated = ns
            .define_function(None, "return opts.scale * v;", &["v".into(), "opts".into()])
            .unwrap();
        assert!(generated.starts_with("__fn_"));
        let kwargs = params(&[("scale", WireValue::from(10))]);
        assert_eq!(
            ns.invoke(&generated, &[WireValue::from(4)], &kwargs).unwrap(),
            WireValue::from(40)
        );

        assert_eq!(
            ns.run_function("return [x, typeof y];", &params(&[("x", WireValue::Undefined)]))
                .unwrap(),
            WireValue::List(vec![WireValue::Undefined, WireValue::from("undefined")])
        );
        match ns.invoke("missing", &[], &[]) {
            Err(Error::Remote(e)) => assert_eq!(e.name, "ReferenceError"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_handles_round_trip() {
        let ns = Namespace::new("test", Visibility::Global, Budget::default()).unwrap();
        let handle = tetherpack::Handle::new();
        let held = params(&[("held", WireValue::Handle(handle))]);
        let result = ns.exec("held", None, &held).unwrap();
        assert_eq!(result, WireValue::Handle(handle));
        assert_eq!(ns.exec("typeof held.$handle", None, &[]).unwrap(), WireValue::from("string"));
    }

    #[test]
    fn test_create_if_absent_keeps_state() {
        let registry = NamespaceRegistry::new(Budget::default());
        let first = registry.create(Some("scopeA"), CreateMode::IfAbsent).unwrap();
        assert!(first.is_new);
        registry.get("scopeA").unwrap().set_var("kept", &WireValue::from(1)).unwrap();

        let second = registry.create(Some("scopeA"), CreateMode::IfAbsent).unwrap();
        assert_eq!(second, Created { key: "scopeA".into(), is_new: false });
        assert_eq!(registry.get("scopeA").unwrap().get_var("kept").unwrap(), WireValue::from(1));

        registry.destroy("scopeA").unwrap();
        assert!(matches!(registry.get("scopeA"), Err(Error::NamespaceNotFound(_))));
        assert!(matches!(registry.destroy("scopeA"), Err(Error::NamespaceNotFound(_))));
    }

    #[test]
    fn test_create_modes() {
        let registry = NamespaceRegistry::new(Budget::default());
        registry.init().unwrap();
        assert_eq!(registry.keys(), vec![MAIN.to_string()]);
        assert!(matches!(
            registry.create(Some(MAIN), CreateMode::Strict),
            Err(Error::NamespaceExists(_))
        ));
        assert!(matches!(
            registry.create(Some("other"), CreateMode::MustExist),
            Err(Error::NamespaceNotFound(_))
        ));
        assert!(!registry.create(Some(MAIN), CreateMode::MustExist).unwrap().is_new);
        assert!(matches!(
            registry.create(None, CreateMode::MustExist),
            Err(Error::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let registry = NamespaceRegistry::new(Budget::default());
        let keys: Vec<String> =
            (0..5).map(|_| registry.create(None, CreateMode::IfAbsent).unwrap().key).collect();
        let mut unique = keys.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert!(keys.iter().all(|k| k.starts_with("n-")));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_reset() {
        let registry = NamespaceRegistry::new(Budget::default());
        registry.init().unwrap();
        registry.create(Some("extra"), CreateMode::IfAbsent).unwrap();
        registry.get(MAIN).unwrap().set_var("v", &WireValue::from(1)).unwrap();

        registry.reset_namespace(MAIN).unwrap();
        assert!(!registry.get(MAIN).unwrap().has_var("v").unwrap());

        registry.reset().unwrap();
        assert_eq!(registry.keys(), vec![MAIN.to_string()]);
    }
}
