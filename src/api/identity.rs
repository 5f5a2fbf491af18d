use axum::http::HeaderMap;

/// Extract the authenticated user id from a gateway-set header
///
/// The upstream gateway authenticates the caller and forwards their numeric
/// user id in `header_name` (default `x-user-id`). Requests that reach the
/// vault without it are rejected.
pub fn extract_user_id(headers: &HeaderMap, header_name: &str) -> Result<i64, IdentityError> {
    let value = headers
        .get(header_name)
        .ok_or(IdentityError::Missing)?
        .to_str()
        .map_err(|_| IdentityError::InvalidFormat)?;

    parse_user_id(value)
}

fn parse_user_id(value: &str) -> Result<i64, IdentityError> {
    match value.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(IdentityError::InvalidFormat),
    }
}

/// Identity extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum IdentityError {
    /// Header not present
    Missing,
    /// Not a positive integer
    InvalidFormat,
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::Missing => write!(f, "missing user identity"),
            IdentityError::InvalidFormat => write!(f, "malformed user identity"),
        }
    }
}
