//! Inference domain module.
//!
//! # Module Structure
//!
//! - `types`: request/response shapes shared by every model adapter
//! - `error`: backend failure taxonomy and its mapping onto `CivicError`
//! - `gateway`: `InferenceBackend` trait and the ordered-fallback gateway

mod error;
mod gateway;
mod types;

pub use error::InferenceError;
pub use gateway::{InferenceBackend, InferenceGateway};
pub use types::{
    Attachment, InferenceRequest, InferenceResponse, InlineImage, Modality, ResponseFormat,
};
