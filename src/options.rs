//! Pipeline configuration
//!
//! [`ErrorHandlingOptions`] is built once at startup and frozen before the
//! pipeline serves traffic, which is what makes its unsynchronized concurrent
//! reads safe. It holds the fault registry, the three message templates, the
//! log-level selector, and the two body-logging predicates. Missing or empty
//! required fields are reported here, at setup time, never during a request.

use crate::context::RequestContext;
use crate::error::{ConfigError, Fault};
use crate::mapping::{FaultBinding, FaultRegistry};
use tracing::Level;

const DEFAULT_SUCCESS_TEMPLATE: &str = "{ResolvedAction} OK ({RequestPath})";
const DEFAULT_FAILURE_TEMPLATE: &str = "{ResolvedAction} Fail: {ErrorMessage} ({RequestPath})";
const DEFAULT_NOT_RESOLVED_TEMPLATE: &str =
    "{RequestMethod} {RequestPath} responded {StatusCode} in {Elapsed} ms";

/// Selects the level of the per-request log record.
///
/// Receives the context, the elapsed milliseconds, and the fault when the
/// request is on an unhandled-failure path.
pub type LevelSelector =
    Box<dyn Fn(&RequestContext, f64, Option<&dyn Fault>) -> Level + Send + Sync>;

/// Decides whether a body should be logged for a non-exceptional request.
pub type BodyPredicate = Box<dyn Fn(&RequestContext, f64) -> bool + Send + Sync>;

fn default_level(ctx: &RequestContext, _elapsed_ms: f64, fault: Option<&dyn Fault>) -> Level {
    if fault.is_none() && ctx.response().status().as_u16() <= 499 {
        Level::INFO
    } else {
        Level::ERROR
    }
}

/// Immutable pipeline configuration.
///
/// Construct with [`ErrorHandlingOptions::builder`]; all fields have working
/// defaults, so `builder().build()` yields a pipeline that logs every request
/// at the default levels and maps no faults.
pub struct ErrorHandlingOptions {
    registry: FaultRegistry,
    success_template: String,
    failure_template: String,
    not_resolved_template: String,
    level_selector: LevelSelector,
    request_body_predicate: BodyPredicate,
    response_body_predicate: BodyPredicate,
    capture_enabled: bool,
}

impl ErrorHandlingOptions {
    /// Start building a configuration.
    pub fn builder() -> ErrorHandlingOptionsBuilder {
        ErrorHandlingOptionsBuilder::new()
    }

    /// The ordered fault registry.
    pub fn registry(&self) -> &FaultRegistry {
        &self.registry
    }

    /// Template for requests that resolved to an action and succeeded.
    pub fn success_template(&self) -> &str {
        &self.success_template
    }

    /// Template for requests that failed (handled or unhandled).
    pub fn failure_template(&self) -> &str {
        &self.failure_template
    }

    /// Template for requests that did not resolve to an action.
    pub fn not_resolved_template(&self) -> &str {
        &self.not_resolved_template
    }

    /// Whether body capture is armed for every request.
    ///
    /// True when either body predicate was customized or any binding asks for
    /// the request body.
    pub fn capture_enabled(&self) -> bool {
        self.capture_enabled
    }

    /// Evaluate the log-level selector.
    pub fn level_for(
        &self,
        ctx: &RequestContext,
        elapsed_ms: f64,
        fault: Option<&dyn Fault>,
    ) -> Level {
        (self.level_selector)(ctx, elapsed_ms, fault)
    }

    /// Evaluate the request-body logging predicate.
    pub fn should_log_request_body(&self, ctx: &RequestContext, elapsed_ms: f64) -> bool {
        (self.request_body_predicate)(ctx, elapsed_ms)
    }

    /// Evaluate the response-body logging predicate.
    pub fn should_log_response_body(&self, ctx: &RequestContext, elapsed_ms: f64) -> bool {
        (self.response_body_predicate)(ctx, elapsed_ms)
    }
}

impl std::fmt::Debug for ErrorHandlingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlingOptions")
            .field("bindings", &self.registry.len())
            .field("capture_enabled", &self.capture_enabled)
            .finish()
    }
}

/// Builder for [`ErrorHandlingOptions`].
///
/// # Example
///
/// ```rust,ignore
/// use faultline::{ErrorHandlingOptions, FaultBinding};
/// use http::StatusCode;
/// use serde_json::json;
/// use tracing::Level;
///
/// let options = ErrorHandlingOptions::builder()
///     .add_binding(
///         FaultBinding::for_type::<NotFoundError, _, _>(|_| json!({ "error": "not_found" }))
///             .status(StatusCode::NOT_FOUND)
///             .level(Level::WARN),
///     )
///     .with_level_selector(|_, elapsed_ms, fault| {
///         if fault.is_some() || elapsed_ms > 1_000.0 {
///             Level::ERROR
///         } else {
///             Level::INFO
///         }
///     })
///     .build()?;
/// ```
pub struct ErrorHandlingOptionsBuilder {
    registry: FaultRegistry,
    success_template: String,
    failure_template: String,
    not_resolved_template: String,
    level_selector: LevelSelector,
    request_body_predicate: Option<BodyPredicate>,
    response_body_predicate: Option<BodyPredicate>,
}

impl ErrorHandlingOptionsBuilder {
    fn new() -> Self {
        Self {
            registry: FaultRegistry::new(),
            success_template: DEFAULT_SUCCESS_TEMPLATE.to_string(),
            failure_template: DEFAULT_FAILURE_TEMPLATE.to_string(),
            not_resolved_template: DEFAULT_NOT_RESOLVED_TEMPLATE.to_string(),
            level_selector: Box::new(default_level),
            request_body_predicate: None,
            response_body_predicate: None,
        }
    }

    /// Register a fault binding. Registration order is resolution order.
    pub fn add_binding(mut self, binding: FaultBinding) -> Self {
        self.registry.register(binding);
        self
    }

    /// Replace the resolved+success message template.
    pub fn with_success_template(mut self, template: impl Into<String>) -> Self {
        self.success_template = template.into();
        self
    }

    /// Replace the failure message template.
    pub fn with_failure_template(mut self, template: impl Into<String>) -> Self {
        self.failure_template = template.into();
        self
    }

    /// Replace the not-resolved message template.
    pub fn with_not_resolved_template(mut self, template: impl Into<String>) -> Self {
        self.not_resolved_template = template.into();
        self
    }

    /// Replace the log-level selector.
    pub fn with_level_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&RequestContext, f64, Option<&dyn Fault>) -> Level + Send + Sync + 'static,
    {
        self.level_selector = Box::new(selector);
        self
    }

    /// Log the request body for non-exceptional requests matching the
    /// predicate. Customizing this arms body capture for every request.
    pub fn with_request_body_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestContext, f64) -> bool + Send + Sync + 'static,
    {
        self.request_body_predicate = Some(Box::new(predicate));
        self
    }

    /// Log the response body for non-exceptional requests matching the
    /// predicate. Customizing this arms body capture for every request.
    pub fn with_response_body_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestContext, f64) -> bool + Send + Sync + 'static,
    {
        self.response_body_predicate = Some(Box::new(predicate));
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<ErrorHandlingOptions, ConfigError> {
        if self.success_template.is_empty() {
            return Err(ConfigError::EmptyTemplate("success"));
        }
        if self.failure_template.is_empty() {
            return Err(ConfigError::EmptyTemplate("failure"));
        }
        if self.not_resolved_template.is_empty() {
            return Err(ConfigError::EmptyTemplate("not_resolved"));
        }

        let predicates_customized =
            self.request_body_predicate.is_some() || self.response_body_predicate.is_some();
        let capture_enabled = predicates_customized || self.registry.any_wants_request_body();

        Ok(ErrorHandlingOptions {
            registry: self.registry,
            success_template: self.success_template,
            failure_template: self.failure_template,
            not_resolved_template: self.not_resolved_template,
            level_selector: self.level_selector,
            request_body_predicate: self
                .request_body_predicate
                .unwrap_or_else(|| Box::new(|_, _| false)),
            response_body_predicate: self
                .response_body_predicate
                .unwrap_or_else(|| Box::new(|_, _| false)),
            capture_enabled,
        })
    }
}

impl Default for ErrorHandlingOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
