//! Fault and configuration error types for faultline

use std::any::{Any, TypeId};
use std::error::Error;

/// A fault routed through the interception layer.
///
/// Faults are ordinary error types with two extra capabilities the mapping
/// registry needs: concrete-type access for exact matching, and an optional
/// ancestor list so a single binding registered for a base category can catch
/// every subtype that declares it.
///
/// # Example
///
/// ```rust,ignore
/// use faultline::Fault;
/// use std::any::{Any, TypeId};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("order {0} not found")]
/// struct NotFoundError(u64);
///
/// impl Fault for NotFoundError {
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("validation failed: {0}")]
/// struct ValidationError(String);
///
/// impl Fault for ValidationError {
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
///
///     // ValidationError belongs to the DomainError category, so a binding
///     // registered for DomainError also catches it.
///     fn ancestors(&self) -> &'static [TypeId] {
///         static IDS: std::sync::OnceLock<Vec<TypeId>> = std::sync::OnceLock::new();
///         IDS.get_or_init(|| vec![TypeId::of::<DomainError>()])
///     }
/// }
/// ```
pub trait Fault: Error + Send + Sync + 'static {
    /// Concrete-type access for exact matching and payload type guards.
    fn as_any(&self) -> &dyn Any;

    /// Ancestor categories this fault belongs to, nearest first.
    ///
    /// This is the manually maintained type-hierarchy tag consulted by the
    /// registry's ancestor pass. The concrete type is implied and must not
    /// appear in the list. Defaults to no ancestors.
    fn ancestors(&self) -> &'static [TypeId] {
        &[]
    }
}

/// A boxed fault, the pipeline's error currency.
pub type BoxFault = Box<dyn Fault>;

impl dyn Fault {
    /// Returns true if the concrete type of this fault is `T`.
    pub fn is<T: Fault>(&self) -> bool {
        self.as_any().type_id() == TypeId::of::<T>()
    }

    /// Downcast to a concrete fault type.
    pub fn downcast_ref<T: Fault>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

// Stream failures surface during body writes and flushes; letting them flow
// through the pipeline means hosts can bind them like any other fault.
impl Fault for std::io::Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Setup-time configuration errors.
///
/// Reported when options are built, never during request handling.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required message template is empty or unset.
    #[error("message template `{0}` cannot be empty")]
    EmptyTemplate(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    impl Fault for Boom {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_downcast_matches_concrete_type() {
        let fault: BoxFault = Box::new(Boom);
        assert!(fault.is::<Boom>());
        assert!(fault.downcast_ref::<Boom>().is_some());
        assert!(!fault.is::<std::io::Error>());
    }

    #[test]
    fn test_ancestors_default_empty() {
        let fault: BoxFault = Box::new(Boom);
        assert!(fault.ancestors().is_empty());
    }

    #[test]
    fn test_io_error_is_a_fault() {
        let fault: BoxFault = Box::new(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe closed",
        ));
        assert!(fault.is::<std::io::Error>());
        assert_eq!(fault.to_string(), "pipe closed");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::EmptyTemplate("not_resolved");
        assert_eq!(
            err.to_string(),
            "message template `not_resolved` cannot be empty"
        );
    }
}
