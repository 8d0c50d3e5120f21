//! Configuration for proxies, calls and script engines.

use std::time::Duration;

/// Resource limits applied to every script engine runtime.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub memory_bytes: usize,
    pub stack_bytes: usize,
}

impl Budget {
    pub fn new() -> Self {
        Self {
            memory_bytes: 64 * 1024 * 1024,
            stack_bytes: 1024 * 1024,
        }
    }

    /// Applies the limits to a freshly created runtime.
    pub(crate) fn apply(&self, runtime: &rquickjs::Runtime) {
        runtime.set_memory_limit(self.memory_bytes);
        runtime.set_max_stack_size(self.stack_bytes);
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new()
    }
}

/// How a single request waits for its reply.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// `None` or zero waits forever.
    pub timeout: Option<Duration>,
    /// On timeout: error when true, sentinel when false.
    pub raise_on_timeout: bool,
    pub log_completions: bool,
    pub poll_interval: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            raise_on_timeout: true,
            log_completions: false,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Behaviour of every proxy created by one `RemoteObjectManager`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Ceiling for operations that read or create remote values.
    pub read_timeout: Option<Duration>,
    /// Ceiling for attribute writes. Unbounded by default.
    pub write_timeout: Option<Duration>,
    pub raise_on_timeout: bool,
    /// Using a destroyed proxy is an error when true, a sentinel result when false.
    pub strict_destroyed: bool,
    /// Send natively representable values without rewriting them.
    pub fast_path: bool,
    pub log_completions: bool,
    pub poll_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: None,
            raise_on_timeout: true,
            strict_destroyed: true,
            fast_path: true,
            log_completions: false,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl ProxyConfig {
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn raise_on_timeout(mut self, raise: bool) -> Self {
        self.raise_on_timeout = raise;
        self
    }

    pub fn strict_destroyed(mut self, strict: bool) -> Self {
        self.strict_destroyed = strict;
        self
    }

    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    pub fn log_completions(mut self, enabled: bool) -> Self {
        self.log_completions = enabled;
        self
    }

    pub(crate) fn read_policy(&self) -> CallPolicy {
        self.policy(self.read_timeout)
    }

    pub(crate) fn write_policy(&self) -> CallPolicy {
        self.policy(self.write_timeout)
    }

    fn policy(&self, timeout: Option<Duration>) -> CallPolicy {
        CallPolicy {
            timeout,
            raise_on_timeout: self.raise_on_timeout,
            log_completions: self.log_completions,
            poll_interval: self.poll_interval,
        }
    }
}
