//! Small helpers shared by the filesystem controller and the supervisor.

use std::iter::Rev;
use std::slice::Iter;

/// Traverse an ordered sequence from its last element to its first.
///
/// Teardown always mirrors setup, so both mounts and services are torn down
/// through this.
pub fn in_reverse<T>(items: &[T]) -> Rev<Iter<'_, T>> {
    items.iter().rev()
}

/// Accumulates the outcome of a best-effort batch.
///
/// Every step is attempted; only the most recent failure is kept and handed
/// back to the caller, earlier ones are expected to have been logged already.
#[derive(Debug)]
pub struct LastError<E> {
    last: Option<E>,
    failures: usize,
}

impl<E> LastError<E> {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            last: None,
            failures: 0,
        }
    }

    /// Record the outcome of one step.
    pub fn record<T>(&mut self, result: Result<T, E>) {
        if let Err(e) = result {
            self.failures += 1;
            self.last = Some(e);
        }
    }

    /// Number of failed steps seen so far.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// `Ok` if every step succeeded, otherwise the last failure.
    pub fn into_result(self) -> Result<(), E> {
        match self.last {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<E> Default for LastError<E> {
    fn default() -> Self {
        Self::new()
    }
}
