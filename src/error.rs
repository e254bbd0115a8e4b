use thiserror::Error;

/// Failures talking to an upstream data or routing provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Missing or placeholder credentials; detected before any request is made.
    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },

    #[error("{provider} response could not be parsed: {reason}")]
    Parse {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} rejected the request: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },
}

impl ProviderError {
    /// Transport errors, rate limits and 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { .. } => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Expected failure modes of a route calculation.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("routing provider unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    #[error("no route found between the given points")]
    NoRoute,
}

impl RouteError {
    /// Stable code carried in the `error` field of a failed calculation.
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::InvalidInput(_) => "invalid_input",
            RouteError::Unavailable(_) => "routing_unavailable",
            RouteError::NoRoute => "no_route",
        }
    }
}
