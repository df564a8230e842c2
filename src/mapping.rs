//! Fault-to-response mapping registry
//!
//! A [`FaultRegistry`] is an ordered list of [`FaultBinding`]s built once at
//! configuration time and read-only while serving traffic. Resolution is a
//! two-pass scan in registration order: exact concrete-type match first, then
//! first declared ancestor. Binding order is part of the configuration
//! contract: "most specific wins only if registered separately, otherwise
//! first-registered ancestor wins".

use crate::error::Fault;
use http::StatusCode;
use serde::Serialize;
use std::any::TypeId;
use tracing::Level;

type PayloadFactory = Box<dyn Fn(&dyn Fault) -> Option<serde_json::Value> + Send + Sync>;

/// One fault category bound to a response shape, status code, and log policy.
///
/// Immutable once registered with a [`FaultRegistry`]. Built with either
/// [`FaultBinding::for_type`] (typed factory, exact-type bindings) or
/// [`FaultBinding::for_category`] (erased factory, base-category bindings
/// that must also build payloads for subtypes caught via the ancestor rule).
///
/// # Example
///
/// ```rust,ignore
/// use faultline::FaultBinding;
/// use http::StatusCode;
/// use serde_json::json;
/// use tracing::Level;
///
/// let binding = FaultBinding::for_type::<NotFoundError, _, _>(|e| {
///     json!({ "error": "not_found", "id": e.0 })
/// })
/// .status(StatusCode::NOT_FOUND)
/// .level(Level::WARN);
/// ```
pub struct FaultBinding {
    type_id: TypeId,
    type_name: &'static str,
    status: StatusCode,
    level: Level,
    log_stack_trace: bool,
    log_request_body: bool,
    log_response_body: bool,
    factory: PayloadFactory,
}

impl FaultBinding {
    /// Bind the concrete fault type `T` with a typed payload factory.
    ///
    /// The downcast inside the factory is the binding's type guard: if the
    /// binding is ever asked to build a payload for a fault of a different
    /// concrete type, it yields no payload instead of failing.
    pub fn for_type<T, F, R>(factory: F) -> Self
    where
        T: Fault,
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: Serialize,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            status: StatusCode::OK,
            level: Level::INFO,
            log_stack_trace: false,
            log_request_body: false,
            log_response_body: false,
            factory: Box::new(move |fault| {
                let concrete = fault.downcast_ref::<T>()?;
                serde_json::to_value(factory(concrete)).ok()
            }),
        }
    }

    /// Bind the fault category `T` with an erased payload factory.
    ///
    /// The factory receives the fault as `&dyn Fault`, so it also produces
    /// payloads for subtypes matched through the ancestor rule.
    pub fn for_category<T, F, R>(factory: F) -> Self
    where
        T: Fault,
        F: Fn(&dyn Fault) -> R + Send + Sync + 'static,
        R: Serialize,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            status: StatusCode::OK,
            level: Level::INFO,
            log_stack_trace: false,
            log_request_body: false,
            log_response_body: false,
            factory: Box::new(move |fault| serde_json::to_value(factory(fault)).ok()),
        }
    }

    /// Set the response status code written on the handled-fault path.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set the level the handled-fault log record is emitted at.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Attach the fault's detail (Debug representation) to the log record.
    pub fn log_stack_trace(mut self, enabled: bool) -> Self {
        self.log_stack_trace = enabled;
        self
    }

    /// Capture and tag the request body when this binding handles a fault.
    pub fn log_request_body(mut self, enabled: bool) -> Self {
        self.log_request_body = enabled;
        self
    }

    /// Tag the written payload as the response body when this binding handles a fault.
    pub fn log_response_body(mut self, enabled: bool) -> Self {
        self.log_response_body = enabled;
        self
    }

    /// The declared fault type.
    pub fn fault_type(&self) -> TypeId {
        self.type_id
    }

    /// Name of the declared fault type, for diagnostics.
    pub fn fault_type_name(&self) -> &'static str {
        self.type_name
    }

    /// The status code written when this binding handles a fault.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// The level the handled-fault record is emitted at.
    pub fn log_level(&self) -> Level {
        self.level
    }

    pub(crate) fn wants_stack_trace(&self) -> bool {
        self.log_stack_trace
    }

    pub(crate) fn wants_request_body(&self) -> bool {
        self.log_request_body
    }

    pub(crate) fn wants_response_body(&self) -> bool {
        self.log_response_body
    }

    /// Build the JSON payload for a resolved fault.
    ///
    /// Returns `None` when the type guard rejects the fault or the factory
    /// yields an absent (`null`) payload; in both cases no body is written.
    /// Never fails; a panicking factory is a configuration defect and is
    /// allowed to propagate.
    pub fn build_payload(&self, fault: &dyn Fault) -> Option<String> {
        let value = (self.factory)(fault)?;
        if value.is_null() {
            return None;
        }
        Some(value.to_string())
    }
}

impl std::fmt::Debug for FaultBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultBinding")
            .field("fault_type", &self.type_name)
            .field("status", &self.status)
            .field("level", &self.level)
            .finish()
    }
}

/// Ordered collection of fault bindings.
///
/// Registration order is significant: resolution scans in that order, and
/// for duplicate declared types only the first registered binding is ever
/// matched. Safe for unsynchronized concurrent reads once built.
#[derive(Debug, Default)]
pub struct FaultRegistry {
    bindings: Vec<FaultBinding>,
}

impl FaultRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Register a binding. Order of registration is the order of resolution.
    pub fn register(&mut self, binding: FaultBinding) {
        self.bindings.push(binding);
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if no bindings are registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// True if any binding requests request-body capture.
    pub(crate) fn any_wants_request_body(&self) -> bool {
        self.bindings.iter().any(|b| b.log_request_body)
    }

    /// Resolve a fault to at most one binding.
    ///
    /// Pass 1: first binding whose declared type equals the fault's concrete
    /// type. Pass 2: first binding whose declared type is a strict ancestor
    /// of the concrete type. `None` means the fault is unhandled, a normal
    /// outcome, not a failure. Resolution never mutates the registry.
    pub fn resolve(&self, fault: &dyn Fault) -> Option<&FaultBinding> {
        let concrete = fault.as_any().type_id();
        self.bindings
            .iter()
            .find(|b| b.type_id == concrete)
            .or_else(|| {
                let ancestors = fault.ancestors();
                self.bindings
                    .iter()
                    .find(|b| b.type_id != concrete && ancestors.contains(&b.type_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxFault;
    use proptest::prelude::*;
    use serde_json::json;
    use std::any::Any;
    use std::sync::OnceLock;

    #[derive(Debug, thiserror::Error)]
    #[error("domain failure: {0}")]
    struct DomainError(String);

    impl Fault for DomainError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("validation failed: {0}")]
    struct ValidationError(String);

    impl Fault for ValidationError {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn ancestors(&self) -> &'static [TypeId] {
            static IDS: OnceLock<Vec<TypeId>> = OnceLock::new();
            IDS.get_or_init(|| vec![TypeId::of::<DomainError>()])
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("not found: {0}")]
    struct NotFoundError(String);

    impl Fault for NotFoundError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn binding_for<T: Fault>(status: StatusCode) -> FaultBinding {
        FaultBinding::for_category::<T, _, _>(|f| json!({ "error": f.to_string() }))
            .status(status)
    }

    #[test]
    fn test_exact_match_wins_over_earlier_ancestor() {
        let mut registry = FaultRegistry::new();
        registry.register(binding_for::<DomainError>(StatusCode::BAD_REQUEST));
        registry.register(binding_for::<ValidationError>(StatusCode::UNPROCESSABLE_ENTITY));

        let fault: BoxFault = Box::new(ValidationError("bad email".into()));
        let binding = registry.resolve(&*fault).unwrap();
        assert_eq!(binding.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_first_registered_ancestor_wins() {
        let mut registry = FaultRegistry::new();
        registry.register(binding_for::<NotFoundError>(StatusCode::NOT_FOUND));
        registry.register(binding_for::<DomainError>(StatusCode::BAD_REQUEST));
        registry.register(
            binding_for::<DomainError>(StatusCode::INTERNAL_SERVER_ERROR),
        );

        let fault: BoxFault = Box::new(ValidationError("bad email".into()));
        let binding = registry.resolve(&*fault).unwrap();
        assert_eq!(binding.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_duplicate_exact_bindings_first_wins() {
        let mut registry = FaultRegistry::new();
        registry.register(binding_for::<NotFoundError>(StatusCode::NOT_FOUND));
        registry.register(binding_for::<NotFoundError>(StatusCode::GONE));

        let fault: BoxFault = Box::new(NotFoundError("x".into()));
        let binding = registry.resolve(&*fault).unwrap();
        assert_eq!(binding.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_no_binding_resolves_to_none() {
        let mut registry = FaultRegistry::new();
        registry.register(binding_for::<NotFoundError>(StatusCode::NOT_FOUND));

        let fault: BoxFault = Box::new(DomainError("boom".into()));
        assert!(registry.resolve(&*fault).is_none());
    }

    #[test]
    fn test_empty_registry_resolves_to_none() {
        let registry = FaultRegistry::new();
        let fault: BoxFault = Box::new(NotFoundError("x".into()));
        assert!(registry.resolve(&*fault).is_none());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut registry = FaultRegistry::new();
        registry.register(binding_for::<DomainError>(StatusCode::BAD_REQUEST));

        let fault: BoxFault = Box::new(ValidationError("bad".into()));
        let first = registry.resolve(&*fault).unwrap() as *const FaultBinding;
        let second = registry.resolve(&*fault).unwrap() as *const FaultBinding;
        assert_eq!(first, second);
    }

    #[test]
    fn test_typed_factory_builds_payload() {
        let binding = FaultBinding::for_type::<NotFoundError, _, _>(|e| {
            json!({ "error": "not_found", "detail": e.0.clone() })
        })
        .status(StatusCode::NOT_FOUND);

        let fault: BoxFault = Box::new(NotFoundError("order 9".into()));
        let payload = binding.build_payload(&*fault).unwrap();
        assert_eq!(
            payload,
            r#"{"detail":"order 9","error":"not_found"}"#
        );
    }

    #[test]
    fn test_type_guard_rejects_foreign_fault() {
        let binding = FaultBinding::for_type::<NotFoundError, _, _>(|_| json!({"error": "x"}));

        let fault: BoxFault = Box::new(DomainError("boom".into()));
        assert!(binding.build_payload(&*fault).is_none());
    }

    #[test]
    fn test_null_payload_means_no_body() {
        let binding = FaultBinding::for_type::<NotFoundError, _, _>(|_| serde_json::Value::Null);

        let fault: BoxFault = Box::new(NotFoundError("x".into()));
        assert!(binding.build_payload(&*fault).is_none());
    }

    #[test]
    fn test_category_factory_sees_subtype_message() {
        let binding =
            FaultBinding::for_category::<DomainError, _, _>(|f| json!({ "error": f.to_string() }));

        let fault: BoxFault = Box::new(ValidationError("bad email".into()));
        let payload = binding.build_payload(&*fault).unwrap();
        assert_eq!(payload, r#"{"error":"validation failed: bad email"}"#);
    }

    proptest! {
        // Resolution always returns the first matching binding by
        // registration order, regardless of how many bindings surround it.
        #[test]
        fn prop_resolution_honors_registration_order(
            decoys_before in 0usize..5,
            decoys_after in 0usize..5,
        ) {
            let mut registry = FaultRegistry::new();
            for _ in 0..decoys_before {
                registry.register(binding_for::<NotFoundError>(StatusCode::NOT_FOUND));
            }
            registry.register(binding_for::<DomainError>(StatusCode::BAD_REQUEST));
            for _ in 0..decoys_after {
                registry.register(binding_for::<DomainError>(StatusCode::CONFLICT));
            }

            let fault: BoxFault = Box::new(ValidationError("v".into()));
            let binding = registry.resolve(&*fault).unwrap();
            prop_assert_eq!(binding.status_code(), StatusCode::BAD_REQUEST);
        }
    }
}
