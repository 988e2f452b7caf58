use actix_web::{Error, dev::ServiceRequest, web::Data};
use actix_web_httpauth::extractors::{
    AuthenticationError,
    bearer::{BearerAuth, Config},
};
use constant_time_eq::constant_time_eq_n;

use crate::config::{ApiConfig, ApiKey};

/// Accepts a request whose bearer token equals one of the configured API keys.
///
/// Every configured key is compared so the time taken does not reveal which one matched.
pub async fn auth_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let config = req
        .app_data::<Config>()
        .cloned()
        .unwrap_or_default()
        .scope("v1");

    let Some(api_config) = req.app_data::<Data<ApiConfig>>() else {
        return Err((AuthenticationError::from(config).into(), req));
    };

    let token: ApiKey = match credentials.token().try_into() {
        Ok(token) => token,
        Err(_) => {
            return Err((AuthenticationError::from(config).into(), req));
        }
    };

    let mut matched = false;
    for api_key in &api_config.api_keys {
        if let Ok(api_key) = ApiKey::try_from(api_key.as_str()) {
            matched |= constant_time_eq_n(&api_key.key, &token.key);
        }
    }

    if !matched {
        return Err((AuthenticationError::from(config).into(), req));
    }

    Ok(req)
}
