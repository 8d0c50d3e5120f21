//! Operation names spoken over the envelope.
//!
//! `object.*` operations are served by the page's object registry. `scope.*` and
//! `callback.*` operations are served by the host.

pub const CONSTRUCT: &str = "object.construct";
pub const ASSEMBLE: &str = "object.assemble";
pub const RELEASE: &str = "object.release";
pub const MATERIALIZE: &str = "object.materialize";
pub const TYPE_OF: &str = "object.type_of";
pub const GET_ATTR: &str = "object.get_attr";
pub const SET_ATTR: &str = "object.set_attr";
pub const HAS_ATTR: &str = "object.has_attr";
pub const DEL_ATTR: &str = "object.del_attr";
pub const CALL: &str = "object.call";
pub const CALL_METHOD: &str = "object.call_method";
pub const ACCESS: &str = "object.access";

pub const SCOPE_CREATE: &str = "scope.create";
pub const SCOPE_DESTROY: &str = "scope.destroy";
pub const SCOPE_EXEC: &str = "scope.exec";
pub const SCOPE_RUN_FUNCTION: &str = "scope.run_function";
pub const SCOPE_DEFINE_FUNCTION: &str = "scope.define_function";
pub const SCOPE_GET_VAR: &str = "scope.get_var";
pub const SCOPE_SET_VAR: &str = "scope.set_var";
pub const SCOPE_HAS_VAR: &str = "scope.has_var";
pub const SCOPE_DEL_VAR: &str = "scope.del_var";
pub const SCOPE_INVOKE: &str = "scope.invoke";

pub const CALLBACK_INVOKE: &str = "callback.invoke";
pub const CALLBACK_RELEASE: &str = "callback.release";
