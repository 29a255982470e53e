//! Crate-level error type.
//!
//! Follows the teacher's own manual, hand-rolled error shape
//! (`examples/juliusl-lifec/lifec/src/error.rs`) rather than reaching for
//! `thiserror`: a public `Error` wrapping a private `Category` enum, with a
//! `Display` impl that formats the category's `Debug` form.

use std::fmt::Display;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::exception_info::ExceptionDispatchInfo;

/// Crate-level error type.
#[derive(Debug, Clone)]
pub struct Error {
    category: Category,
}

impl Error {
    /// A computation raised a user exception (a caught panic, in this
    /// crate).
    pub fn user(info: ExceptionDispatchInfo) -> Self {
        Error {
            category: Category::User(info),
        }
    }

    /// A computation observed cancellation on `token`.
    pub fn cancelled(token: CancellationToken) -> Self {
        Error {
            category: Category::Cancelled(token),
        }
    }

    /// A synchronous wait exceeded its deadline.
    pub fn timeout(elapsed: Duration) -> Self {
        Error {
            category: Category::Timeout(elapsed),
        }
    }

    /// An invariant of this crate was violated by the caller (double
    /// invocation of a one-shot continuation, a rejected pool submission,
    /// ...). These are expected to be unrecoverable — most call sites
    /// surface them as a hard failure (`panic!`) rather than returning this
    /// variant, but it exists so bridges that *can* report misuse through a
    /// `Result` have somewhere to put it.
    pub fn misuse(message: &'static str) -> Self {
        Error {
            category: Category::Misuse(message),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self.category, Category::User(..))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.category, Category::Cancelled(..))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.category, Category::Timeout(..))
    }

    pub fn is_misuse(&self) -> bool {
        matches!(self.category, Category::Misuse(..))
    }

    /// Returns the preserved exception info, if this is a user-exception
    /// error.
    pub fn exception_info(&self) -> Option<&ExceptionDispatchInfo> {
        match &self.category {
            Category::User(info) => Some(info),
            _ => None,
        }
    }

    /// Returns the cancelling token, if this is a cancellation error.
    pub fn cancelling_token(&self) -> Option<&CancellationToken> {
        match &self.category {
            Category::Cancelled(token) => Some(token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Category {
    /// A user computation raised an exception; carries the preserved
    /// capture info.
    User(ExceptionDispatchInfo),
    /// The computation observed cancellation on this token.
    Cancelled(CancellationToken),
    /// A synchronous wait exceeded its deadline.
    Timeout(Duration),
    /// A library invariant was violated.
    Misuse(&'static str),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.category {
            Category::User(info) => write!(f, "cpsync error - user exception: {info}"),
            Category::Cancelled(_) => write!(f, "cpsync error - cancelled"),
            Category::Timeout(d) => write!(f, "cpsync error - timed out after {d:?}"),
            Category::Misuse(msg) => write!(f, "cpsync error - misuse: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_misuse() {
        let e = Error::misuse("double invocation of a one-shot continuation");
        assert!(e.to_string().contains("double invocation"));
        assert!(e.is_misuse());
    }
}
