use actix_web::{Error, dev::ServiceRequest, web::Data};
use actix_web_httpauth::extractors::{
    AuthenticationError,
    bearer::{BearerAuth, Config},
};
use constant_time_eq::constant_time_eq;

use crate::config::ServerConfig;

/// Accepts requests whose bearer token matches one of the configured API keys.
pub async fn auth_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let config = req
        .app_data::<Config>()
        .cloned()
        .unwrap_or_default()
        .scope("v1");

    let Some(server_config) = req.app_data::<Data<ServerConfig>>() else {
        return Err((AuthenticationError::from(config).into(), req));
    };

    let token = credentials.token().as_bytes();
    let authorized = server_config
        .api_keys
        .iter()
        .filter(|key| !key.trim().is_empty())
        .any(|key| constant_time_eq(key.as_bytes(), token));

    if !authorized {
        return Err((AuthenticationError::from(config).into(), req));
    }

    Ok(req)
}
