//! Internal-fault errors for the EGL kernel.
//!
//! Gate verdicts (refusals, rejections) are never errors; they are values
//! returned to the caller. `EglError` covers malformed structure only, and
//! callers map it to the fail-closed code of the gate that hit it
//! (`INVALID_PERMIT`, `INVALID_HITL_TOKEN`, schema errors).

/// Structural faults raised while decoding or hashing governance inputs.
#[derive(Debug, thiserror::Error)]
pub enum EglError {
    #[error("codec failure: {description}")]
    Codec { description: String },

    #[error("non-finite number rejected by canonical codec: {value}")]
    NonFiniteNumber { value: f64 },

    #[error("malformed intent: {description}")]
    MalformedIntent { description: String },

    #[error("tool surface map invalid: {description}")]
    InvalidRegistry { description: String },

    #[error("malformed permit: {description}")]
    MalformedPermit { description: String },

    #[error("malformed ratification token: {description}")]
    MalformedToken { description: String },

    #[error("malformed tool call envelope: {description}")]
    MalformedEnvelope { description: String },

    #[error("absolute path not allowed in {location}")]
    AbsolutePath { location: String },
}

impl EglError {
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec {
            description: err.to_string(),
        }
    }
}
