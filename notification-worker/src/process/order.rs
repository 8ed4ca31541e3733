//! Order lifecycle email decoding.

use serde::{Deserialize, Serialize};

use super::fields::{parse_object, require_str, Scalar};
use crate::error::DecodeError;

/// Template that fans out into a confirmation plus a receipt.
pub const ORDER_PLACED_TEMPLATE: &str = "orderPlaced";
pub const ORDER_RECEIPT_TEMPLATE: &str = "orderReceipt";

/// Request published on the `order-email` routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEmailRequest {
    pub receiver_email: String,
    pub template: String,
    #[serde(flatten)]
    pub fields: OrderFields,
}

/// Template-specific order fields; these become the rendering context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_link: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_username: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_username: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_days: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_due: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_url: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_date: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_date: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Scalar>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_fee: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Scalar>,
}

pub fn decode_order(payload: &[u8]) -> Result<OrderEmailRequest, DecodeError> {
    let map = parse_object(payload)?;
    require_str(&map, "receiverEmail")?;
    require_str(&map, "template")?;

    Ok(serde_json::from_value(serde_json::Value::Object(map))?)
}

impl OrderEmailRequest {
    /// Templates to send for this request, in send order.
    pub fn templates(&self) -> Vec<String> {
        if self.template == ORDER_PLACED_TEMPLATE {
            vec![
                ORDER_PLACED_TEMPLATE.to_string(),
                ORDER_RECEIPT_TEMPLATE.to_string(),
            ]
        } else {
            vec![self.template.clone()]
        }
    }
}
