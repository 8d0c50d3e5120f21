//! # Host Scope Service
//!
//! Serves the operations a page sends to the host: `scope.*` against the namespace registry,
//! `callback.*` against the callback registry.
//!
//! Every call is executed on a blocking worker. Namespace code may run for a long time and a
//! callback may itself issue proxy calls, which block until the I/O thread delivers their
//! replies, so none of this work may run on the I/O thread.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use tetherpack::WireValue;
use tetherrpc::Args;
use tetherrpc::CallFrame;
use tokio::runtime::Handle;
use tracing::debug;
use tracing::warn;

use crate::callbacks::CallbackRegistry;
use crate::error::Error;
use crate::error::Result;
use crate::namespace::CreateMode;
use crate::namespace::Namespace;
use crate::namespace::NamespaceRegistry;
use crate::namespace::Visibility;
use crate::ops;
use crate::peer::Dispatcher;
use crate::peer::Responder;
use crate::proxy::RemoteObjectManager;
use crate::value::Value;

/// Page value types that `auto_convert` copies into a namespace by value.
const COPIED_TYPES: [&str; 3] = ["boolean", "number", "string"];

#[derive(Clone)]
pub struct ScopeService {
    namespaces: Arc<NamespaceRegistry>,
    callbacks: Arc<CallbackRegistry>,
    objects: Arc<OnceLock<Weak<RemoteObjectManager>>>,
    runtime: Handle,
    auto_convert: bool,
}

impl ScopeService {
    pub fn new(
        namespaces: Arc<NamespaceRegistry>,
        callbacks: Arc<CallbackRegistry>,
        runtime: Handle,
    ) -> Self {
        Self {
            namespaces,
            callbacks,
            objects: Arc::new(OnceLock::new()),
            runtime,
            auto_convert: true,
        }
    }

    /// Whether page handles of primitive type are materialized before they enter a namespace.
    pub fn auto_convert(mut self, enabled: bool) -> Self {
        self.auto_convert = enabled;
        self
    }

    /// Connects the service to the manager for the page it serves. Only the first call has
    /// an effect.
    pub fn attach(&self, objects: &Arc<RemoteObjectManager>) {
        if self.objects.set(Arc::downgrade(objects)).is_err() {
            warn!("scope service already attached to an object manager");
        }
    }

    pub fn namespaces(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    fn objects(&self) -> Option<Arc<RemoteObjectManager>> {
        self.objects.get().and_then(Weak::upgrade)
    }

    /// Performs one operation. Blocks; never call from the I/O thread.
    pub fn execute(&self, op: &str, args: &Args) -> Result<WireValue> {
        match op {
            ops::SCOPE_CREATE => self.create(args),
            ops::SCOPE_DESTROY => {
                self.namespaces.destroy(args.str("scope")?)?;
                Ok(WireValue::Undefined)
            }
            ops::SCOPE_EXEC => {
                let params = self.params(args)?;
                self.scope(args)?.exec(args.str("code")?, args.opt_str("return_name")?, &params)
            }
            ops::SCOPE_RUN_FUNCTION => {
                let params = self.params(args)?;
                self.scope(args)?.run_function(args.str("code")?, &params)
            }
            ops::SCOPE_DEFINE_FUNCTION => {
                let params = names(args.list("params")?)?;
                let name = self.scope(args)?.define_function(
                    args.opt_str("function")?,
                    args.str("code")?,
                    &params,
                )?;
                Ok(WireValue::String(name))
            }
            ops::SCOPE_GET_VAR => self.scope(args)?.get_var(args.str("var")?),
            ops::SCOPE_SET_VAR => {
                let value = args.get("value").cloned().unwrap_or(WireValue::Undefined);
                let value = self.convert(value);
                self.scope(args)?.set_var(args.str("var")?, &value)?;
                Ok(WireValue::Undefined)
            }
            ops::SCOPE_HAS_VAR => {
                Ok(WireValue::Bool(self.scope(args)?.has_var(args.str("var")?)?))
            }
            ops::SCOPE_DEL_VAR => {
                Ok(WireValue::Bool(self.scope(args)?.delete_var(args.str("var")?)?))
            }
            ops::SCOPE_INVOKE => {
                let call_args: Vec<WireValue> =
                    args.list("args")?.iter().cloned().map(|v| self.convert(v)).collect();
                let kwargs = self.converted(args.map("kwargs")?);
                self.scope(args)?.invoke(args.str("function")?, &call_args, &kwargs)
            }
            ops::CALLBACK_INVOKE => self.invoke_callback(args),
            ops::CALLBACK_RELEASE => {
                let released = self.callbacks.release(&args.handle("callback")?);
                Ok(WireValue::Bool(released))
            }
            other => Err(Error::Protocol(format!("unknown operation {}", other))),
        }
    }

    fn create(&self, args: &Args) -> Result<WireValue> {
        let mode = match (args.bool_or("allow_new", true)?, args.bool_or("strict", false)?) {
            (false, _) => CreateMode::MustExist,
            (true, true) => CreateMode::Strict,
            (true, false) => CreateMode::IfAbsent,
        };
        let visibility = match args.bool_or("local", false)? {
            true => Visibility::CallLocal,
            false => Visibility::Global,
        };
        let created = self.namespaces.create_with(args.opt_str("scope")?, mode, visibility)?;
        Ok(WireValue::Map(vec![
            ("name".into(), WireValue::String(created.key)),
            ("is_new".into(), WireValue::Bool(created.is_new)),
        ]))
    }

    fn scope(&self, args: &Args) -> Result<Arc<Namespace>> {
        self.namespaces.get(args.str("scope")?)
    }

    fn params(&self, args: &Args) -> Result<Vec<(String, WireValue)>> {
        Ok(self.converted(args.map("params")?))
    }

    fn converted(&self, entries: &[(String, WireValue)]) -> Vec<(String, WireValue)> {
        entries.iter().map(|(name, value)| (name.clone(), self.convert(value.clone()))).collect()
    }

    /// Replaces a page handle of primitive type with its value. Anything else is kept as is.
    fn convert(&self, value: WireValue) -> WireValue {
        let WireValue::Handle(handle) = value else { return value };
        if !self.auto_convert {
            return value;
        }
        let Some(objects) = self.objects() else { return value };

        let proxy = objects.borrow(handle);
        let copied = match proxy.query_type() {
            Ok(kind) if COPIED_TYPES.contains(&kind.as_str()) => {
                proxy.materialize().ok().and_then(|v| v.to_native())
            }
            Ok(_) => None,
            Err(e) => {
                debug!(%handle, error = %e, "handle parameter left unconverted");
                None
            }
        };
        copied.unwrap_or(value)
    }

    fn invoke_callback(&self, args: &Args) -> Result<WireValue> {
        let handle = args.handle("callback")?;
        let callback = self
            .callbacks
            .get(&handle)
            .ok_or_else(|| Error::Protocol(format!("no callback registered under {}", handle)))?;

        let objects = self.objects();
        let call_args = args
            .list("args")?
            .iter()
            .cloned()
            .map(|v| Value::from_wire(v, objects.as_ref()))
            .collect();
        let result = callback(call_args)?;
        Ok(match &objects {
            Some(objects) => objects.marshal(&result),
            None => result.to_native().unwrap_or(WireValue::Undefined),
        })
    }
}

impl Dispatcher for ScopeService {
    fn dispatch(&self, call: CallFrame, responder: Responder) {
        let service = self.clone();
        self.runtime.spawn_blocking(move || {
            let status = service.execute(&call.op, &call.args).map_err(|e| {
                debug!(op = %call.op, error = %e, "host operation failed");
                e.to_payload()
            });
            responder.reply(status);
        });
    }
}

impl std::fmt::Debug for ScopeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeService")
            .field("namespaces", &self.namespaces.len())
            .field("callbacks", &self.callbacks.len())
            .field("auto_convert", &self.auto_convert)
            .finish()
    }
}

fn names(values: &[WireValue]) -> Result<Vec<String>> {
    values
        .iter()
        .map(|v| match v {
            WireValue::String(s) => Ok(s.clone()),
            other => {
                Err(Error::Protocol(format!("parameter names must be strings, got {:?}", other)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Budget;

    fn service() -> (tokio::runtime::Runtime, ScopeService) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let registry = Arc::new(NamespaceRegistry::new(Budget::default()));
        registry.init().unwrap();
        let callbacks = Arc::new(CallbackRegistry::new());
        let service = ScopeService::new(registry, callbacks, runtime.handle().clone());
        (runtime, service)
    }

    #[test]
    fn test_scope_operations() {
        let (_rt, service) = service();
        let created = service.execute(ops::SCOPE_CREATE, &Args::new().with("scope", "s")).unwrap();
        assert_eq!(created.get("is_new"), Some(&WireValue::Bool(true)));

        let scope = |args: Args| args.with("scope", "s");
        let params = WireValue::Map(vec![("a".into(), WireValue::from(2))]);
        let exec = scope(Args::new().with("code", "var b = a + 1;").with("params", params));
        service.execute(ops::SCOPE_EXEC, &exec).unwrap();
        let var_b = || scope(Args::new().with("var", "b"));
        assert_eq!(service.execute(ops::SCOPE_GET_VAR, &var_b()).unwrap(), WireValue::from(3));

        let define = scope(
            Args::new()
                .with("code", "return x * b;")
                .with("params", WireValue::List(vec![WireValue::from("x")]))
                .with("function", "times"),
        );
        assert_eq!(
            service.execute(ops::SCOPE_DEFINE_FUNCTION, &define).unwrap(),
            WireValue::from("times")
        );
        let five = WireValue::List(vec![WireValue::from(5)]);
        let invoke = scope(Args::new().with("function", "times").with("args", five));
        assert_eq!(service.execute(ops::SCOPE_INVOKE, &invoke).unwrap(), WireValue::from(15));

        assert_eq!(service.execute(ops::SCOPE_DEL_VAR, &var_b()).unwrap(), WireValue::Bool(true));
        assert_eq!(service.execute(ops::SCOPE_HAS_VAR, &var_b()).unwrap(), WireValue::Bool(false));

        service.execute(ops::SCOPE_DESTROY, &scope(Args::new())).unwrap();
        let err =
            service.execute(ops::SCOPE_EXEC, &scope(Args::new().with("code", "1"))).unwrap_err();
        assert_eq!(err.name(), "NamespaceNotFoundError");
    }

    #[test]
    fn test_create_flags() {
        let (_rt, service) = service();
        let strict = Args::new().with("scope", "main").with("strict", true);
        assert_eq!(
            service.execute(ops::SCOPE_CREATE, &strict).unwrap_err().name(),
            "NamespaceExistsError"
        );
        let existing = Args::new().with("scope", "absent").with("allow_new", false);
        assert_eq!(
            service.execute(ops::SCOPE_CREATE, &existing).unwrap_err().name(),
            "NamespaceNotFoundError"
        );

        let unnamed = service.execute(ops::SCOPE_CREATE, &Args::new().with("local", true)).unwrap();
        let key = unnamed.get("name").and_then(WireValue::as_str).unwrap().to_owned();
        assert!(key.starts_with("n-"));
        assert_eq!(service.namespaces().get(&key).unwrap().visibility(), Visibility::CallLocal);
    }

    #[test]
    fn test_callbacks_without_page() {
        let (_rt, service) = service();
        let handle = service.callbacks.register(Arc::new(|args: Vec<Value>| {
            let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
            Ok::<_, Error>(Value::from(sum))
        }));
        let args = Args::new()
            .with("callback", handle.to_string())
            .with("args", WireValue::List(vec![WireValue::from(1), WireValue::from(2)]));
        assert_eq!(service.execute(ops::CALLBACK_INVOKE, &args).unwrap(), WireValue::from(3));

        let release = Args::new().with("callback", handle.to_string());
        assert_eq!(
            service.execute(ops::CALLBACK_RELEASE, &release).unwrap(),
            WireValue::Bool(true)
        );
        let stale = service.execute(ops::CALLBACK_INVOKE, &args).unwrap_err();
        assert_eq!(stale.name(), "ProtocolError");
        let unknown = service.execute("scope.bogus", &Args::new()).unwrap_err();
        assert_eq!(unknown.name(), "ProtocolError");
    }
}
