#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Kubernetes API error ({}): {reason}: {message}", status_label(.code))]
    ClusterApiError {
        code: Option<u16>,
        reason: String,
        message: String,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

fn status_label(code: &Option<u16>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no status".to_string(),
    }
}

impl AppError {
    pub fn cluster(code: Option<u16>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ClusterApiError {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// True when the API server rejected a create because the name is taken.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::ClusterApiError { code: Some(409), .. })
    }

    pub fn is_cluster_error(&self) -> bool {
        matches!(self, AppError::ClusterApiError { .. })
    }
}

impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => AppError::ClusterApiError {
                code: Some(response.code),
                reason: response.reason,
                message: response.message,
            },
            other => AppError::ClusterApiError {
                code: None,
                reason: "ClientError".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ConfigurationError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::ConfigurationError(format!("YAML error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ConfigurationError(format!("IO error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
