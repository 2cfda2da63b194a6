use std::any::Any;
use std::fmt;
use std::panic;

/// Payload of a failure captured from a task body.
///
/// This is the payload type produced by [`std::panic::catch_unwind`]; the
/// runtime carries it across suspension boundaries instead of letting the
/// unwind escape onto an I/O completion thread.
pub type Failure = Box<dyn Any + Send + 'static>;

/// The outcome of a driven task: a value, a captured failure, or nothing yet.
///
/// An `Outcome` is produced exactly once per task, by the runtime when the
/// task completes (or by the synchronous bridge on its behalf), and is meant
/// to be consumed exactly once by whoever observed the completion.
///
/// ```
/// use sable::Outcome;
///
/// let out = Outcome::from_value(7);
/// assert!(out.available());
/// assert_eq!(out.value(), 7);
/// ```
pub struct Outcome<T> {
    inner: Option<std::result::Result<T, Failure>>,
}

impl<T> Outcome<T> {
    /// An outcome holding nothing. Reading its value is a logic error.
    pub fn empty() -> Self {
        Outcome { inner: None }
    }

    /// An outcome holding a completed value.
    pub fn from_value(value: T) -> Self {
        Outcome {
            inner: Some(Ok(value)),
        }
    }

    /// An outcome holding a captured failure.
    pub fn from_failure(failure: Failure) -> Self {
        Outcome {
            inner: Some(Err(failure)),
        }
    }

    /// Whether this outcome holds anything at all (value or failure).
    pub fn available(&self) -> bool {
        self.inner.is_some()
    }

    /// Whether this outcome holds a captured failure.
    pub fn has_error(&self) -> bool {
        matches!(self.inner, Some(Err(_)))
    }

    /// Consume the outcome, yielding its value.
    ///
    /// # Panics
    ///
    /// Re-raises the captured failure if one is held, and panics with a logic
    /// error if the outcome is empty. Callers that cannot tolerate a re-raise
    /// must check [`has_error`](Self::has_error) first.
    pub fn value(self) -> T {
        match self.inner {
            Some(Ok(value)) => value,
            Some(Err(failure)) => panic::resume_unwind(failure),
            None => panic!("empty Outcome holds no value"),
        }
    }

    /// Consume the outcome, yielding the captured failure if one is held.
    pub fn into_error(self) -> Option<Failure> {
        match self.inner {
            Some(Err(failure)) => Some(failure),
            _ => None,
        }
    }

    /// Consume the outcome as an ordinary `Result`.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is empty.
    pub fn into_result(self) -> std::result::Result<T, Failure> {
        self.inner.expect("empty Outcome holds no result")
    }
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Outcome::empty()
    }
}

impl<T> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            None => "empty",
            Some(Ok(_)) => "value",
            Some(Err(_)) => "failure",
        };
        f.debug_struct("Outcome").field("state", &state).finish()
    }
}

/// Render a failure payload for logging. Panic payloads are almost always
/// `&str` or `String`; anything else is reported opaquely.
pub fn describe_failure(failure: &Failure) -> &str {
    if let Some(s) = failure.downcast_ref::<&str>() {
        s
    } else if let Some(s) = failure.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
