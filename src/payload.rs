use serde::de::DeserializeOwned;

use crate::error::ProxyError;

/// A request body with rules beyond its shape.
pub trait Validate {
    /// Name used in error messages ("purchase", "chat", ...).
    const KIND: &'static str;

    fn validate(&self) -> Result<(), String>;
}

/// Decode and check a JSON body in one step.
pub fn parse<T>(body: &[u8]) -> Result<T, ProxyError>
where
    T: DeserializeOwned + Validate,
{
    let invalid = |details: String| ProxyError::InvalidPayload {
        kind: T::KIND,
        details,
    };
    let payload: T = serde_json::from_slice(body).map_err(|e| invalid(e.to_string()))?;
    payload.validate().map_err(invalid)?;
    Ok(payload)
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}
