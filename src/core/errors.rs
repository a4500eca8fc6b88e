use spin_sdk::http::Response;
use thiserror::Error;

use crate::config::LOGIN_PATH;
use crate::core::helpers::redirect;
use crate::templates;

/// Field-level validation messages, in the order they were found.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FieldErrors(Vec<(String, String)>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.push((field.to_string(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(f, _)| f == field)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(f, m)| (f.as_str(), m.as_str()))
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        ApiError::Validation(errors)
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => 400,
            ApiError::Unauthorized => 401,
            ApiError::Forbidden => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalError(_) => 500,
        }
    }

    /// Response for an error that escaped a handler. `path` is the request path,
    /// used as the login `next` target.
    pub fn into_response(self, path: &str) -> Response {
        match self {
            ApiError::Unauthorized => login_redirect(path),
            ApiError::InternalError(msg) => {
                log::error!("internal error on {}: {}", path, msg);
                templates::error_page(500, path)
            }
            ApiError::NotFound(_) => templates::error_page(404, path),
            other => templates::message_page(other.status(), &other.to_string()),
        }
    }
}

/// `/` stays readable in the `next` value; everything else outside the
/// unreserved set is percent-encoded.
pub fn login_redirect(next: &str) -> Response {
    let encoded: Vec<_> = next.split('/').map(urlencoding::encode).collect();
    redirect(&format!("{}?next={}", LOGIN_PATH, encoded.join("/")))
}

// Implement conversion from anyhow::Error to ApiError for internal errors
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{:#}", err))
    }
}
