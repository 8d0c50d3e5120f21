//! # Call Correlator
//!
//! Turns an asynchronous reply into a synchronous result without ever blocking the thread
//! that delivers replies.
//!
//! ## Invariants
//! - **Exactly One Winner**: A call finishes at most once. Completion and timeout race through
//!   a single compare-and-swap on the state byte; whoever loses is ignored.
//! - **Never Blocks Delivery**: `complete` only stores and flips state. The waiting side polls.
//! - **Late Is Harmless**: A completion that arrives after the timeout fired is reported as
//!   rejected so the caller can clean up whatever the late reply created.

use std::sync::OnceLock;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tetherpack::WireValue;
use tracing::debug;

use crate::config::CallPolicy;
use crate::error::Error;
use crate::error::Result;

const WAITING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Spins before falling back to sleeping between polls.
const SPIN_ROUNDS: u32 = 64;

/// What a reply resolved to.
pub type Outcome = Result<WireValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Waiting,
    Completed,
    TimedOut,
}

/// One outstanding request.
pub struct PendingCall {
    label: String,
    started: Instant,
    timeout: Option<Duration>,
    poll_interval: Duration,
    log_completions: bool,
    state: AtomicU8,
    outcome: OnceLock<Outcome>,
}

impl PendingCall {
    /// A zero timeout means "wait forever", same as `None`.
    pub fn new(label: impl Into<String>, policy: &CallPolicy) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
            timeout: policy.timeout.filter(|t| !t.is_zero()),
            poll_interval: policy.poll_interval,
            log_completions: policy.log_completions,
            state: AtomicU8::new(WAITING),
            outcome: OnceLock::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> CallState {
        match self.state.load(Ordering::Acquire) {
            WAITING => CallState::Waiting,
            COMPLETED => CallState::Completed,
            _ => CallState::TimedOut,
        }
    }

    /// Records the reply. Returns `false` if the call already completed or timed out, in which
    /// case the outcome is dropped.
    pub fn complete(&self, outcome: Outcome) -> bool {
        if self.state.load(Ordering::Acquire) != WAITING {
            return false;
        }
        // The outcome is published before the state flips, so a waiter that observes
        // COMPLETED always finds it.
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        let won = self
            .state
            .compare_exchange(WAITING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won && self.log_completions {
            debug!(label = %self.label, elapsed = ?self.started.elapsed(), "call completed");
        }
        won
    }

    /// Polls until the call completes or its timeout elapses.
    pub fn wait(&self) -> CallState {
        let mut spins = 0u32;
        loop {
            match self.state() {
                CallState::Waiting => {}
                done => return done,
            }

            if let Some(timeout) = self.timeout {
                if self.started.elapsed() >= timeout {
                    let expired = self
                        .state
                        .compare_exchange(WAITING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    if expired {
                        debug!(label = %self.label, ?timeout, "call timed out");
                        return CallState::TimedOut;
                    }
                    // Lost the race to a completion; the next pass returns it.
                    continue;
                }
            }

            if spins < SPIN_ROUNDS {
                spins += 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.poll_interval);
            }
        }
    }

    /// Waits and converts the outcome per `policy`.
    ///
    /// Returns `Ok(None)` when the call timed out and the policy asks for a sentinel instead of
    /// an error.
    pub fn resolve(&self, policy: &CallPolicy) -> Result<Option<WireValue>> {
        match self.wait() {
            CallState::Completed => match self.outcome.get() {
                Some(Ok(value)) => Ok(Some(value.clone())),
                Some(Err(e)) => Err(e.clone()),
                None => {
                    Err(Error::Protocol(format!("{} completed without an outcome", self.label)))
                }
            },
            CallState::TimedOut | CallState::Waiting if policy.raise_on_timeout => {
                Err(Error::Timeout {
                    label: self.label.clone(),
                    timeout: self.timeout.unwrap_or_default(),
                })
            }
            CallState::TimedOut | CallState::Waiting => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn policy(timeout: Option<Duration>) -> CallPolicy {
        CallPolicy { timeout, ..CallPolicy::default() }
    }

    #[test]
    fn test_completion_before_wait() {
        let call = PendingCall::new("early", &policy(None));
        assert!(call.complete(Ok(WireValue::from(1))));
        assert_eq!(call.wait(), CallState::Completed);
        assert_eq!(call.resolve(&policy(None)).unwrap(), Some(WireValue::from(1)));
    }

    #[test]
    fn test_second_completion_is_rejected() {
        let call = PendingCall::new("twice", &policy(None));
        assert!(call.complete(Ok(WireValue::from(1))));
        assert!(!call.complete(Ok(WireValue::from(2))));
        assert_eq!(call.resolve(&policy(None)).unwrap(), Some(WireValue::from(1)));
    }

    #[test]
    fn test_completion_from_another_thread() {
        let call = Arc::new(PendingCall::new("threaded", &policy(Some(Duration::from_secs(5)))));
        let remote = call.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.complete(Ok(WireValue::from("done")))
        });
        assert_eq!(call.wait(), CallState::Completed);
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_timeout_then_late_completion() {
        let p = policy(Some(Duration::from_millis(10)));
        let call = PendingCall::new("slow", &p);
        assert_eq!(call.wait(), CallState::TimedOut);
        assert!(!call.complete(Ok(WireValue::Null)));
        assert_eq!(call.state(), CallState::TimedOut);
        assert!(matches!(call.resolve(&p), Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_timeout_sentinel() {
        let p = CallPolicy {
            timeout: Some(Duration::from_millis(5)),
            raise_on_timeout: false,
            ..CallPolicy::default()
        };
        let call = PendingCall::new("quiet", &p);
        assert_eq!(call.resolve(&p).unwrap(), None);
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let call = Arc::new(PendingCall::new("patient", &policy(Some(Duration::ZERO))));
        let remote = call.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.complete(Ok(WireValue::Null));
        });
        assert_eq!(call.wait(), CallState::Completed);
        worker.join().unwrap();
    }

    #[test]
    fn test_remote_error_is_returned() {
        let call = PendingCall::new("failing", &policy(None));
        call.complete(Err(Error::Remote(crate::error::RemoteError::new("TypeError", "nope"))));
        match call.resolve(&policy(None)) {
            Err(Error::Remote(e)) => assert_eq!(e.name, "TypeError"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
