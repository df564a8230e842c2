//! Per-request trace context and telemetry emission
//!
//! A [`RequestTrace`] accumulates key/value tags while a request is handled
//! and is consumed exactly once at request exit, producing a single
//! structured `tracing` event. The event's message is rendered from a
//! configurable template with named placeholders (`{ResolvedAction}`,
//! `{RequestPath}`, ...); the tags also ride along as structured fields.

use crate::error::Fault;
use tracing::Level;

/// Target under which per-request telemetry events are emitted.
pub const TELEMETRY_TARGET: &str = "faultline::request";

/// Well-known tag keys, matching the template placeholder names.
pub mod tags {
    pub const REQUEST_METHOD: &str = "RequestMethod";
    pub const REQUEST_PATH: &str = "RequestPath";
    pub const RESOLVED_ACTION: &str = "ResolvedAction";
    pub const STATUS_CODE: &str = "StatusCode";
    pub const ELAPSED: &str = "Elapsed";
    pub const IS_SUCCESS: &str = "IsSuccess";
    pub const ERROR_MESSAGE: &str = "ErrorMessage";
    pub const REQUEST_BODY: &str = "RequestBody";
    pub const RESPONSE_BODY: &str = "ResponseBody";
}

/// The per-request telemetry record.
///
/// Created at request entry, mutated as fields become known, consumed exactly
/// once by [`RequestTrace::emit`] at request exit. Never outlives its request.
#[derive(Debug, Default)]
pub struct RequestTrace {
    tags: Vec<(&'static str, String)>,
}

impl RequestTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self { tags: Vec::new() }
    }

    /// Attach a tag. Setting a key that is already present overwrites it.
    pub fn add_tag(&mut self, key: &'static str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.tags.push((key, value));
        }
    }

    /// Look up a tag value.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All attached tags in attachment order.
    pub fn tags(&self) -> &[(&'static str, String)] {
        &self.tags
    }

    /// Render a message template, substituting `{Name}` placeholders with tag
    /// values. Placeholders with no matching tag render as empty; an unclosed
    /// brace is kept literally.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    if let Some(value) = self.value(&after[..close]) {
                        out.push_str(value);
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Emit the single telemetry event for this request.
    ///
    /// The message is the rendered template; the tags are attached as
    /// structured fields. `exception` carries the fault's detail when the
    /// outcome's policy asked for it. Emission itself never fails.
    pub fn emit(&self, level: Level, template: &str, exception: Option<&dyn Fault>) {
        let message = self.render(template);
        let method = self.value(tags::REQUEST_METHOD);
        let path = self.value(tags::REQUEST_PATH);
        let resolved_action = self.value(tags::RESOLVED_ACTION);
        let status = self.value(tags::STATUS_CODE);
        let elapsed = self.value(tags::ELAPSED);
        let success = self.value(tags::IS_SUCCESS);
        let error_message = self.value(tags::ERROR_MESSAGE);
        let request_body = self.value(tags::REQUEST_BODY);
        let response_body = self.value(tags::RESPONSE_BODY);
        let exception = exception.map(tracing::field::debug);

        match level {
            Level::TRACE => tracing::trace!(
                target: TELEMETRY_TARGET,
                method,
                path,
                resolved_action,
                status,
                elapsed,
                success,
                error_message,
                request_body,
                response_body,
                exception,
                "{}",
                message
            ),
            Level::DEBUG => tracing::debug!(
                target: TELEMETRY_TARGET,
                method,
                path,
                resolved_action,
                status,
                elapsed,
                success,
                error_message,
                request_body,
                response_body,
                exception,
                "{}",
                message
            ),
            Level::INFO => tracing::info!(
                target: TELEMETRY_TARGET,
                method,
                path,
                resolved_action,
                status,
                elapsed,
                success,
                error_message,
                request_body,
                response_body,
                exception,
                "{}",
                message
            ),
            Level::WARN => tracing::warn!(
                target: TELEMETRY_TARGET,
                method,
                path,
                resolved_action,
                status,
                elapsed,
                success,
                error_message,
                request_body,
                response_body,
                exception,
                "{}",
                message
            ),
            Level::ERROR => tracing::error!(
                target: TELEMETRY_TARGET,
                method,
                path,
                resolved_action,
                status,
                elapsed,
                success,
                error_message,
                request_body,
                response_body,
                exception,
                "{}",
                message
            ),
        }
    }
}
