//! Request interception and telemetry pipeline
//!
//! [`ErrorHandlingLayer`] wraps every inbound request: it arms body capture
//! when configured, invokes the downstream handler exactly once, classifies
//! the outcome (resolved-success, not-resolved, handled fault, unhandled
//! fault), writes mapped JSON responses for handled faults, and emits exactly
//! one telemetry record per request. Cleanup (flushing any captured response
//! body back to the real output) runs on every exit path, before an
//! unhandled fault is re-raised to the host.

use crate::context::RequestContext;
use crate::error::{BoxFault, Fault};
use crate::options::ErrorHandlingOptions;
use crate::telemetry::tags;
use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::Instant;

/// The downstream request handler invoked by the pipeline.
///
/// Handlers read the request body and write the response through the context;
/// a fault is reported by returning `Err`. The pipeline awaits the handler
/// exactly once per request.
///
/// # Example
///
/// ```rust,ignore
/// struct CreateOrder;
///
/// #[async_trait]
/// impl RequestHandler for CreateOrder {
///     async fn call(&self, ctx: &mut RequestContext) -> Result<(), BoxFault> {
///         let body = ctx.body_mut().read_to_end().await?;
///         let order = parse_order(&body)?;
///         ctx.response_mut().write(b"{\"status\":\"created\"}").await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request.
    async fn call(&self, ctx: &mut RequestContext) -> Result<(), BoxFault>;
}

/// The per-request interception layer.
///
/// Holds the frozen [`ErrorHandlingOptions`]; cheap to clone and safe to
/// share across request tasks.
#[derive(Clone)]
pub struct ErrorHandlingLayer {
    options: Arc<ErrorHandlingOptions>,
}

impl ErrorHandlingLayer {
    /// Create a layer from frozen options.
    pub fn new(options: ErrorHandlingOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    /// The layer's configuration.
    pub fn options(&self) -> &ErrorHandlingOptions {
        &self.options
    }

    /// Intercept one request.
    ///
    /// Returns `Ok(())` when the request succeeded or its fault was handled
    /// by a registered binding, and `Err` when the fault matched no binding;
    /// the host's outer error handling decides the client-visible response in
    /// that case. Exactly one telemetry record is emitted either way, and any
    /// captured response body is flushed to the real output before an error
    /// propagates.
    ///
    /// A host that drops the returned future mid-request does not strand
    /// buffered response bytes: the armed sink finishes the flush when the
    /// context is dropped, and [`crate::ResponseChannel::flush_captured`]
    /// remains available for an explicit recovery flush. No telemetry record
    /// is emitted for a cancelled request, since it has no outcome to
    /// classify.
    pub async fn handle(
        &self,
        ctx: &mut RequestContext,
        downstream: &dyn RequestHandler,
    ) -> Result<(), BoxFault> {
        let start = Instant::now();

        let method = ctx.method().to_string();
        let path = ctx.raw_path().to_string();
        let resolved_action = ctx.resolved_action();

        let trace = ctx.trace_mut();
        trace.add_tag(tags::REQUEST_METHOD, method);
        trace.add_tag(tags::REQUEST_PATH, path);
        if let Some(action) = &resolved_action {
            trace.add_tag(tags::RESOLVED_ACTION, action.clone());
        }

        if self.options.capture_enabled() {
            ctx.body_mut().enable_buffering();
            ctx.response_mut().arm();
        }

        let downstream_result = downstream.call(ctx).await;

        // Elapsed time is computed once at outcome classification and passed
        // consistently to every policy evaluation for this request.
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let outcome = match downstream_result {
            Ok(()) => {
                self.complete_success(ctx, resolved_action.as_deref(), elapsed_ms)
                    .await;
                Ok(())
            }
            Err(fault) => self.complete_fault(ctx, fault, elapsed_ms).await,
        };

        // Cleanup is unconditional: the client must receive the diverted
        // bytes even when a fault is about to re-raise.
        let flush_result = ctx.response_mut().flush_captured().await;

        outcome?;
        flush_result.map_err(|e| Box::new(e) as BoxFault)?;
        Ok(())
    }

    async fn complete_success(
        &self,
        ctx: &mut RequestContext,
        resolved_action: Option<&str>,
        elapsed_ms: f64,
    ) {
        if self.options.should_log_request_body(ctx, elapsed_ms) {
            let text = ctx.body_mut().captured_text().await;
            ctx.trace_mut().add_tag(tags::REQUEST_BODY, text);
        }

        if self.options.should_log_response_body(ctx, elapsed_ms) {
            if let Some(text) = ctx.response().captured_text() {
                if !text.trim().is_empty() {
                    ctx.trace_mut().add_tag(tags::RESPONSE_BODY, text);
                }
            }
        }

        let status = ctx.response().status();
        let level = self.options.level_for(ctx, elapsed_ms, None);

        let trace = ctx.trace_mut();
        trace.add_tag(tags::STATUS_CODE, status.as_u16().to_string());
        trace.add_tag(tags::ELAPSED, format!("{elapsed_ms:.4}"));

        if resolved_action.is_some() {
            trace.add_tag(tags::IS_SUCCESS, "True");
            trace.emit(level, self.options.success_template(), None);
        } else {
            trace.add_tag(tags::IS_SUCCESS, "False");
            trace.emit(level, self.options.not_resolved_template(), None);
        }
    }

    async fn complete_fault(
        &self,
        ctx: &mut RequestContext,
        fault: BoxFault,
        elapsed_ms: f64,
    ) -> Result<(), BoxFault> {
        let message = fault.to_string();
        let trace = ctx.trace_mut();
        trace.add_tag(tags::ELAPSED, format!("{elapsed_ms:.4}"));
        trace.add_tag(tags::IS_SUCCESS, "False");
        trace.add_tag(tags::ERROR_MESSAGE, message);

        match self.options.registry().resolve(&*fault) {
            Some(binding) => {
                ctx.response_mut().set_status(binding.status_code());
                ctx.response_mut()
                    .set_content_type(HeaderValue::from_static("application/json"));

                if binding.wants_request_body() {
                    let text = ctx.body_mut().captured_text().await;
                    ctx.trace_mut().add_tag(tags::REQUEST_BODY, text);
                }

                // A failed payload write must not swallow the telemetry
                // record; the error is surfaced after emission and cleanup.
                let mut write_error = None;
                if let Some(payload) = binding.build_payload(&*fault) {
                    match ctx.response_mut().write(payload.as_bytes()).await {
                        Ok(()) => {
                            if binding.wants_response_body() {
                                ctx.trace_mut().add_tag(tags::RESPONSE_BODY, payload);
                            }
                        }
                        Err(e) => write_error = Some(e),
                    }
                }

                let trace = ctx.trace_mut();
                trace.add_tag(tags::STATUS_CODE, binding.status_code().as_u16().to_string());

                let detail: Option<&dyn Fault> = if binding.wants_stack_trace() {
                    Some(&*fault)
                } else {
                    None
                };
                trace.emit(binding.log_level(), self.options.failure_template(), detail);

                match write_error {
                    Some(e) => Err(Box::new(e) as BoxFault),
                    None => Ok(()),
                }
            }
            None => {
                // Status 500 is tagged for telemetry only; the actual
                // response for an unhandled fault is the host's business.
                ctx.trace_mut().add_tag(
                    tags::STATUS_CODE,
                    StatusCode::INTERNAL_SERVER_ERROR.as_u16().to_string(),
                );
                let level = self.options.level_for(ctx, elapsed_ms, Some(&*fault));
                ctx.trace()
                    .emit(level, self.options.failure_template(), Some(&*fault));
                Err(fault)
            }
        }
    }
}

impl std::fmt::Debug for ErrorHandlingLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlingLayer")
            .field("options", &self.options)
            .finish()
    }
}
