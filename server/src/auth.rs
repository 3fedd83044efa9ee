use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION};

#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    /// The `Authorization: Basic ...` header value for these credentials.
    pub fn header_value(&self) -> Result<HeaderValue> {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        Ok(HeaderValue::try_from(format!("Basic {encoded}"))?)
    }
}

/// Checks an inbound request's basic auth against the configured
/// credentials. Anything malformed counts as a failure.
pub fn check_basic_auth(headers: &HeaderMap, credentials: &BasicCredentials) -> bool {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((username, password)) = decoded.split_once(':') else {
        return false;
    };
    username == credentials.username && password == credentials.password
}
