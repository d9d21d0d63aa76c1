pub mod admin;
pub mod auth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::Delivery;

/// Shape of every error body; mirrors `service_core::error::ErrorBody`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Invalid email or password")]
    pub error: String,
    #[schema(example = "invalid_credentials")]
    pub kind: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Email verified successfully")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned by endpoints that send email. `delivery` is `failed` when the
/// token was created but the message could not be handed to SMTP.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeliveryResponse {
    pub message: String,
    pub delivery: Delivery,
}
