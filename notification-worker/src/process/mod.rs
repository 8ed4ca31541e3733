//! Message decoding and template routing.
//!
//! Turns a raw broker payload into a typed [`DeliveryRequest`] plus the
//! rendering context for it.
//!
//! ## Processing Flow
//!
//! ```text
//! RawMessage → decode() → DecodedMessage { request, context } → templates()
//! ```

pub mod auth;
pub mod fields;
pub mod order;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::DecodeError;
use crate::mail::EmailContext;
use crate::queue::MessageClass;

pub use auth::{decode_auth, AuthEmailRequest, AuthFields};
pub use fields::Scalar;
pub use order::{decode_order, OrderEmailRequest, OrderFields, ORDER_PLACED_TEMPLATE, ORDER_RECEIPT_TEMPLATE};

/// Values injected into every rendering context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLocals {
    pub app_link: String,
    pub app_icon: String,
}

impl AppLocals {
    pub fn new(app_link: impl Into<String>, app_icon: impl Into<String>) -> Self {
        Self {
            app_link: app_link.into(),
            app_icon: app_icon.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.client_url.clone(), config.app_icon_url.clone())
    }
}

/// One notification to send, tagged by message class.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryRequest {
    Auth(AuthEmailRequest),
    Order(OrderEmailRequest),
}

impl DeliveryRequest {
    pub fn receiver_email(&self) -> &str {
        match self {
            DeliveryRequest::Auth(r) => &r.receiver_email,
            DeliveryRequest::Order(r) => &r.receiver_email,
        }
    }

    pub fn template(&self) -> &str {
        match self {
            DeliveryRequest::Auth(r) => &r.template,
            DeliveryRequest::Order(r) => &r.template,
        }
    }

    /// Templates to render for this request, in send order.
    pub fn templates(&self) -> Vec<String> {
        match self {
            DeliveryRequest::Auth(r) => vec![r.template.clone()],
            DeliveryRequest::Order(r) => r.templates(),
        }
    }
}

/// A decoded request together with its rendering context.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub request: DeliveryRequest,
    pub context: EmailContext,
}

/// Decode a raw payload of the given class.
pub fn decode(
    class: MessageClass,
    payload: &[u8],
    locals: &AppLocals,
) -> Result<DecodedMessage, DecodeError> {
    let (request, context) = match class {
        MessageClass::Auth => {
            let request = decode_auth(payload)?;
            let context = build_context(locals, &request.fields)?;
            (DeliveryRequest::Auth(request), context)
        }
        MessageClass::Order => {
            let request = decode_order(payload)?;
            let context = build_context(locals, &request.fields)?;
            (DeliveryRequest::Order(request), context)
        }
    };

    debug!(
        class = class.as_str(),
        template = request.template(),
        context_keys = context.len(),
        "message_decoded"
    );

    Ok(DecodedMessage { request, context })
}

fn build_context<T: Serialize>(locals: &AppLocals, fields: &T) -> Result<EmailContext, DecodeError> {
    let mut context = EmailContext::new();
    context.insert("appLink".to_string(), Value::String(locals.app_link.clone()));
    context.insert("appIcon".to_string(), Value::String(locals.app_icon.clone()));

    match serde_json::to_value(fields)? {
        Value::Object(map) => context.extend(map),
        _ => return Err(DecodeError::NotAnObject),
    }

    Ok(context)
}
