//! HTTP handlers for the identity service.

pub mod api_key;
pub mod auth;
pub mod credentials;
pub mod health;
pub mod invitation;
pub mod mfa;
pub mod role;
pub mod session;
pub mod user;

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap, StatusCode},
};
use service_core::middleware::rate_limit::client_ip;
use std::net::SocketAddr;

use crate::services::Delivery;

/// Device label and client address recorded on a new session.
pub(crate) struct ClientContext {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

impl ClientContext {
    /// Prefers an explicit device label from the body over the `User-Agent`.
    pub(crate) fn from_request(
        headers: &HeaderMap,
        peer: Option<ConnectInfo<SocketAddr>>,
        device_info: Option<String>,
    ) -> Self {
        let device_info = device_info.filter(|d| !d.trim().is_empty()).or_else(|| {
            headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|ua| ua.chars().take(255).collect())
        });

        Self {
            device_info,
            ip_address: client_ip(headers, peer.map(|ConnectInfo(addr)| addr))
                .map(|ip| ip.to_string()),
        }
    }
}

/// `202 Accepted` when the record exists but its email could not be sent.
pub(crate) fn status_for(delivery: Delivery, success: StatusCode) -> StatusCode {
    match delivery {
        Delivery::Sent => success,
        Delivery::Failed => StatusCode::ACCEPTED,
    }
}
