//! # Tether
//!
//! Drive a script-engine page from Rust through synchronous proxies, and let the page drive
//! named execution namespaces on the host in return.
//!
//! A `Bridge` connects one host to one page. Host code reaches page values through `Proxy`
//! handles minted by the bridge's `RemoteObjectManager`; page code reaches the host through
//! the `HostScope` client and through host functions installed as `Bindings`. `AppManager`
//! runs several bridges from one main thread.

pub mod app;
pub mod bindings;
pub mod bridge;
pub mod callbacks;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod error;
pub mod io;
pub mod json;
pub mod marshal;
pub mod namespace;
pub mod ops;
pub mod page;
pub mod peer;
pub mod proxy;
pub mod schema;
pub mod service;
pub mod transport;
pub mod value;
pub mod variants;

pub use bindings::Bindings;
pub use bindings::BindingsBuilder;
pub use bridge::Bridge;
pub use bridge::BridgeBuilder;
pub use config::Budget;
pub use config::ProxyConfig;
pub use error::Error;
pub use error::Result;
pub use namespace::NamespaceRegistry;
pub use proxy::Proxy;
pub use proxy::RemoteObjectManager;
pub use value::Value;
pub use variants::ProxyVariant;

pub use tetherpack::Handle;
pub use tetherpack::WireValue;
