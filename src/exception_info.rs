//! Captured panic payloads and the weak-keyed table that preserves their
//! original capture location across re-raise boundaries.

use std::any::Any;
use std::collections::HashMap;
use std::panic::Location;
use std::sync::{Arc, Mutex, OnceLock, Weak};

struct Record {
    message: String,
    location: &'static Location<'static>,
}

/// An exception value paired with the source location it was originally
/// captured at, so a later re-raise can report where the failure actually
/// happened rather than where it was last rethrown.
///
/// Cloning is an `Arc` clone: as long as any clone is alive, the weak
/// association table (see [`ExceptionDispatchInfo::restore`]) can recover
/// this same info from the original panic payload's identity.
#[derive(Clone)]
pub struct ExceptionDispatchInfo(Arc<Record>);

impl ExceptionDispatchInfo {
    /// Captures a panic payload produced by `std::panic::catch_unwind`.
    #[track_caller]
    pub fn from_panic(payload: &Box<dyn Any + Send>) -> Self {
        let message = describe_panic_payload(payload);
        let info = ExceptionDispatchInfo(Arc::new(Record {
            message,
            location: Location::caller(),
        }));
        associate(payload, &info);
        info
    }

    /// Wraps a crate-level [`crate::error::Error`] as an exception value,
    /// used when a bridge adapts a `Result`-returning external API into the
    /// continuation model.
    #[track_caller]
    pub fn from_error(err: crate::error::Error) -> Self {
        ExceptionDispatchInfo(Arc::new(Record {
            message: err.to_string(),
            location: Location::caller(),
        }))
    }

    #[track_caller]
    pub fn from_message(message: impl Into<String>) -> Self {
        ExceptionDispatchInfo(Arc::new(Record {
            message: message.into(),
            location: Location::caller(),
        }))
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.0.location
    }

    /// Looks up preserved capture info for a panic payload previously
    /// captured via [`ExceptionDispatchInfo::from_panic`], by pointer
    /// identity. Returns `None` if the payload was never captured here, or
    /// if every clone of the originally captured info has since been
    /// dropped (the table is weak-keyed, so it never outlives the info it
    /// describes).
    pub fn restore(payload: &Box<dyn Any + Send>) -> Option<ExceptionDispatchInfo> {
        let key = payload_identity(payload);
        table()
            .lock()
            .unwrap()
            .get(&key)
            .and_then(Weak::upgrade)
            .map(ExceptionDispatchInfo)
    }
}

impl std::fmt::Debug for ExceptionDispatchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionDispatchInfo")
            .field("message", &self.0.message)
            .field("location", &self.0.location)
            .finish()
    }
}

impl std::fmt::Display for ExceptionDispatchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at {})", self.0.message, self.0.location)
    }
}

impl std::error::Error for ExceptionDispatchInfo {}

fn describe_panic_payload(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn payload_identity(payload: &Box<dyn Any + Send>) -> usize {
    let raw: *const (dyn Any + Send) = payload.as_ref();
    raw as *const () as usize
}

fn table() -> &'static Mutex<HashMap<usize, Weak<Record>>> {
    static TABLE: OnceLock<Mutex<HashMap<usize, Weak<Record>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Associates a panic payload's pointer identity with its capture info,
/// storing only a `Weak` reference so the table never keeps a capture alive
/// past its last strong owner. Opportunistically drops dead entries first
/// so the table does not grow unbounded across a long-running process.
fn associate(payload: &Box<dyn Any + Send>, info: &ExceptionDispatchInfo) {
    let key = payload_identity(payload);
    let mut guard = table().lock().unwrap();
    guard.retain(|_, weak| weak.strong_count() > 0);
    guard.insert(key, Arc::downgrade(&info.0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_location() {
        let info = ExceptionDispatchInfo::from_message("boom");
        let rendered = info.to_string();
        assert!(rendered.contains("boom"));
    }

    #[test]
    fn restores_by_identity_while_alive() {
        let payload: Box<dyn Any + Send> = Box::new("kaboom");
        let info = ExceptionDispatchInfo::from_panic(&payload);
        let restored = ExceptionDispatchInfo::restore(&payload).expect("still alive");
        assert_eq!(restored.message(), info.message());
    }

    #[test]
    fn association_disappears_once_dropped() {
        let payload: Box<dyn Any + Send> = Box::new("transient");
        {
            let _info = ExceptionDispatchInfo::from_panic(&payload);
        }
        assert!(ExceptionDispatchInfo::restore(&payload).is_none());
    }
}
