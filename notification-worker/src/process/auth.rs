//! Authentication email decoding (verification, password reset, OTP).

use serde::{Deserialize, Serialize};

use super::fields::{parse_object, require_str, Scalar};
use crate::error::DecodeError;

/// Request published on the `auth-email` routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEmailRequest {
    pub receiver_email: String,
    pub template: String,
    #[serde(flatten)]
    pub fields: AuthFields,
}

/// Template-specific auth fields; these become the rendering context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_link: Option<String>,
    /// Decoded but never rendered
    #[serde(default, skip_serializing)]
    pub otp: Option<Scalar>,
}

pub fn decode_auth(payload: &[u8]) -> Result<AuthEmailRequest, DecodeError> {
    let map = parse_object(payload)?;
    require_str(&map, "receiverEmail")?;
    require_str(&map, "template")?;

    Ok(serde_json::from_value(serde_json::Value::Object(map))?)
}
