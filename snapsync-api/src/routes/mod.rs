use actix_web::HttpRequest;
use serde::{Deserialize, Serialize};

pub mod health_check;
pub mod rate_limit;
pub mod sync;

/// Identity used for callers that cannot be identified.
pub const UNKNOWN_CALLER: &str = "unknown";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

/// Identity a request is rate limited under.
///
/// The first `X-Forwarded-For` entry wins, then `X-Real-IP`, then the peer address.
pub fn caller_identity(req: &HttpRequest) -> String {
    let headers = req.headers();

    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(identity) = forwarded_for {
        return identity.to_owned();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(identity) = real_ip {
        return identity.to_owned();
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CALLER.to_owned())
}
