use crate::credentials::{Integration, APPLICATION_PRINCIPAL};
use axum::http::HeaderMap;


/// Principal used when the service runs without an authenticating web layer in front.
pub const DEFAULT_PRINCIPAL: &str = "default";

/// Longest principal identifier accepted from the web layer
const MAX_PRINCIPAL_LEN: usize = 128;

/// Resolve the calling user's principal from request headers
///
/// The fronting web layer authenticates the browser session and forwards the
/// user id as `Authorization: Bearer <principal>`. With auth disabled every
/// request acts as [`DEFAULT_PRINCIPAL`].
pub fn extract_principal(headers: &HeaderMap, auth_enabled: bool) -> Result<String, PrincipalError> {
    if !auth_enabled {
        return Ok(DEFAULT_PRINCIPAL.to_string());
    }

    let auth_header = headers
        .get("authorization")
        .ok_or(PrincipalError::Missing)?
        .to_str()
        .map_err(|_| PrincipalError::InvalidFormat)?;

    let principal = parse_bearer(auth_header)?;
    validate_principal(&principal)?;
    Ok(principal)
}

/// Principal that owns the token for `integration` when `user` makes the request
///
/// Application-wide integrations share one token regardless of the caller.
pub fn principal_for(integration: Integration, user: &str) -> String {
    if integration.is_application_wide() {
        APPLICATION_PRINCIPAL.to_string()
    } else {
        user.to_string()
    }
}

/// Parse "Bearer <value>" from an Authorization header value
fn parse_bearer(header_value: &str) -> Result<String, PrincipalError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(PrincipalError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(PrincipalError::InvalidFormat);
    }

    let value = parts[1].trim();

    if value.is_empty() {
        return Err(PrincipalError::Empty);
    }

    Ok(value.to_string())
}

fn validate_principal(principal: &str) -> Result<(), PrincipalError> {
    if principal.len() > MAX_PRINCIPAL_LEN || principal.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(PrincipalError::InvalidFormat);
    }
    // Reserved for application-wide tokens
    if principal == APPLICATION_PRINCIPAL {
        return Err(PrincipalError::Reserved);
    }
    Ok(())
}

/// Principal extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum PrincipalError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <principal>", or the principal contains illegal characters
    InvalidFormat,
    /// Principal is empty string
    Empty,
    /// Caller tried to act as the application principal
    Reserved,
}

impl std::fmt::Display for PrincipalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalError::Missing => write!(f, "Authorization header not provided"),
            PrincipalError::InvalidFormat => write!(f, "Invalid authorization header format"),
            PrincipalError::Empty => write!(f, "Principal is empty"),
            PrincipalError::Reserved => write!(f, "Principal '{}' is reserved", APPLICATION_PRINCIPAL),
        }
    }
}

impl std::error::Error for PrincipalError {}
