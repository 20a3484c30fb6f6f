use thiserror::Error;

/// Tourist Platform SDK errors.
#[derive(Debug, Error)]
pub enum TouristError {
    /// The operation needs a bearer token but the session holds none.
    #[error("Not authenticated.")]
    NotAuthenticated,

    /// The API answered 401 to a request that carried a bearer token.
    /// The session has already been logged out when this is returned.
    #[error("Authentication expired. Please log in again.")]
    AuthenticationExpired,

    /// The token endpoint rejected the submitted credentials.
    #[error("{0}")]
    Authentication(String),

    /// The API returned a non-2xx status code.
    /// `detail` is the explanation the server sent along, if any.
    #[error("{}", describe_failure(.status, .detail))]
    RequestFailed { status: u16, detail: Option<String> },

    /// The current user record could not be fetched.
    #[error("Failed to fetch user: {}", describe_failure(.status, .detail))]
    FetchFailed { status: u16, detail: Option<String> },

    /// Failed to send a request to the API (connection refused, DNS, timeout...).
    #[error("Network error: {0}")]
    Network(String),

    /// Failed to decode an API response.
    #[error("Failed to decode API response: {0}")]
    Decode(String),

    /// Failed to read or write the persisted token.
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Input rejected before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// The base URL provided is not an http(s) URL.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl TouristError {
    /// HTTP status code carried by the error, if the API produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TouristError::AuthenticationExpired => Some(401),
            TouristError::RequestFailed { status, .. } | TouristError::FetchFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// The server-provided explanation of a failed request.
    pub fn detail(&self) -> Option<&str> {
        match self {
            TouristError::RequestFailed { detail, .. } | TouristError::FetchFailed { detail, .. } => {
                detail.as_deref()
            }
            _ => None,
        }
    }
}

fn describe_failure(status: &u16, detail: &Option<String>) -> String {
    match detail {
        Some(detail) => detail.clone(),
        None => format!("HTTP error! status: {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_failures_display_the_server_detail() {
        let err = TouristError::RequestFailed {
            status: 403,
            detail: Some("Access denied. GUIDE role required.".to_string()),
        };
        assert_eq!(err.to_string(), "Access denied. GUIDE role required.");
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.detail(), Some("Access denied. GUIDE role required."));

        let err = TouristError::RequestFailed {
            status: 502,
            detail: None,
        };
        assert_eq!(err.to_string(), "HTTP error! status: 502");
        assert_eq!(err.detail(), None);
    }

    #[test]
    fn fetch_failures_are_prefixed() {
        let err = TouristError::FetchFailed {
            status: 500,
            detail: None,
        };
        assert_eq!(err.to_string(), "Failed to fetch user: HTTP error! status: 500");
        assert_eq!(TouristError::NotAuthenticated.status(), None);
        assert_eq!(TouristError::AuthenticationExpired.status(), Some(401));
    }
}
