//! # Faultline
//!
//! Request interception layer for async HTTP services: maps faults raised by
//! downstream handlers to structured JSON responses through an ordered
//! binding registry, and emits exactly one structured telemetry record per
//! request via `tracing`.
//!
//! The entry point is [`ErrorHandlingLayer`], configured once at startup with
//! [`ErrorHandlingOptions`] and invoked with a [`RequestContext`] per inbound
//! request.

mod capture;
mod context;
mod error;
mod layer;
mod mapping;
mod options;
mod telemetry;

// Public API
pub use capture::{BodySink, RequestBody};
pub use context::{RequestContext, ResolvedRoute, ResponseChannel};
pub use error::{BoxFault, ConfigError, Fault};
pub use layer::{ErrorHandlingLayer, RequestHandler};
pub use mapping::{FaultBinding, FaultRegistry};
pub use options::{
    BodyPredicate, ErrorHandlingOptions, ErrorHandlingOptionsBuilder, LevelSelector,
};
pub use telemetry::{tags, RequestTrace, TELEMETRY_TARGET};

// Re-exported so hosts can set binding levels without depending on `tracing`
// directly.
pub use tracing::Level;
