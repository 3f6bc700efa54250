//! # HomeControl Event System Errors
//!
//! [`EventSystemError`] covers failures observed while waiting on dispatched
//! handlers. Publishing and subscribing themselves never fail.
use thiserror::Error;

use crate::event::{BoxError, HandlerId};

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Handler {handler_id} failed while handling '{event_type}': {source}")]
    HandlerFailed {
        event_type: String,
        handler_id: HandlerId,
        #[source]
        source: BoxError,
    },

    #[error("Handler {handler_id} did not complete while handling '{event_type}': {reason}")]
    HandlerPanicked {
        event_type: String,
        handler_id: HandlerId,
        reason: String,
    },

    #[error("No tokio runtime available to schedule event handlers")]
    NoRuntime,
}
