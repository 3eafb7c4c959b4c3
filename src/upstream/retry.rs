//! Retry policy for upstream connection failures

/// When, relative to the response, an upstream attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// Connection could not be established or was reset before any response
    /// bytes arrived. Nothing has reached the caller yet.
    Connect,
    /// The request timed out
    Timeout,
    /// Response headers or body bytes were already received
    AfterFirstByte,
}

/// Bounded transparent retry.
///
/// Only pre-data connection failures are retried; once bytes have been
/// received a retry could duplicate partial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed on top of the first attempt
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single()
    }
}

impl RetryPolicy {
    /// One retry on connection establishment failure
    pub const fn single() -> Self {
        Self { max_retries: 1 }
    }

    /// Never retry
    pub const fn none() -> Self {
        Self { max_retries: 0 }
    }

    /// Whether another attempt may follow `retries_done` retries that ended in `phase`
    pub fn should_retry(&self, retries_done: u32, phase: FailurePhase) -> bool {
        phase == FailurePhase::Connect && retries_done < self.max_retries
    }
}
