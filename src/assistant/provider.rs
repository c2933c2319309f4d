//! Provider-specific URL patterns and authentication.
//!
//! Azure hosts the Assistants API under `/openai/` with an `api-version`
//! query parameter and an `api-key` header. `OpenAI` and compatible services
//! use `/v1/` with bearer authentication.

/// API version used when Azure is detected and none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-05-01-preview";

/// Supported agent runtime providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// API version (e.g., "2024-05-01-preview")
        api_version: String,
    },
    /// Generic Assistants-compatible service
    Generic,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let provider = Provider::detect_from_url("https://api.openai.com");
    /// assert_eq!(provider, Provider::OpenAI);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("azure.com") {
            Self::AzureOpenAI {
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            }
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Replace the API version of an Azure provider; no-op otherwise.
    #[must_use]
    pub fn with_api_version(self, version: impl Into<String>) -> Self {
        match self {
            Self::AzureOpenAI { .. } => Self::AzureOpenAI {
                api_version: version.into(),
            },
            other => other,
        }
    }

    /// Whether the API key goes in an `api-key` header instead of a bearer token.
    #[must_use]
    pub fn uses_api_key_header(&self) -> bool {
        matches!(self, Self::AzureOpenAI { .. })
    }

    /// Build the URL of an API resource.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The endpoint (trailing slash optional)
    /// * `path` - Resource path such as `threads/{id}/runs`, optionally with a query
    #[must_use]
    pub fn build_url(&self, base_url: &str, path: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');

        match self {
            Self::AzureOpenAI { api_version } => {
                let sep = if path.contains('?') { '&' } else { '?' };
                format!("{base}/openai/{path}{sep}api-version={api_version}")
            }
            _ if base.ends_with("/v1") => format!("{base}/{path}"),
            _ => format!("{base}/v1/{path}"),
        }
    }
}
