use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Malformed notification: {message}")]
    NotificationError { message: String },

    #[error("Gateway error: gateway={gateway}, message={message}")]
    GatewayRejected {
        gateway: String,
        message: String,
        gateway_code: Option<String>,
        retryable: bool,
    },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::NotificationError { .. } => false,
            GatewayError::GatewayRejected { retryable, .. } => *retryable,
            GatewayError::ConfigError { .. } => false,
        }
    }

    /// Machine-readable code carried on normalized failure results.
    /// Transport-level failures surface as `"exception"`.
    pub fn error_code(&self) -> String {
        match self {
            GatewayError::ValidationError { .. } => "validation_error".to_string(),
            GatewayError::NetworkError { .. } => "exception".to_string(),
            GatewayError::RateLimitError { .. } => "rate_limited".to_string(),
            GatewayError::NotificationError { .. } => "malformed_notification".to_string(),
            GatewayError::GatewayRejected { gateway_code, .. } => gateway_code
                .clone()
                .unwrap_or_else(|| "gateway_error".to_string()),
            GatewayError::ConfigError { .. } => "config_error".to_string(),
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::NetworkError { .. } => 503,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::NotificationError { .. } => 400,
            GatewayError::GatewayRejected { .. } => 502,
            GatewayError::ConfigError { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            GatewayError::NotificationError { .. } => "Invalid gateway notification".to_string(),
            GatewayError::GatewayRejected { .. } => {
                "Payment gateway returned an error".to_string()
            }
            GatewayError::ConfigError { message } => message.clone(),
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        let kind = match err {
            GatewayError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidInput {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            GatewayError::ConfigError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            GatewayError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment gateway".to_string(),
                retry_after: retry_after_seconds,
            }),
            GatewayError::GatewayRejected {
                gateway,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentGateway {
                gateway,
                message,
                is_retryable: retryable,
            }),
            other => AppErrorKind::External(ExternalError::PaymentGateway {
                gateway: "unknown".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_carry_exception_code() {
        let err = GatewayError::NetworkError {
            message: "connect timeout".to_string(),
        };
        assert_eq!(err.error_code(), "exception");
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_are_permanent() {
        let err = GatewayError::ValidationError {
            message: "amount must be greater than zero".to_string(),
            field: Some("amount".to_string()),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.http_status_code(), 400);
    }

    #[test]
    fn gateway_rejection_keeps_provider_code() {
        let err = GatewayError::GatewayRejected {
            gateway: "midtrans".to_string(),
            message: "transaction denied".to_string(),
            gateway_code: Some("202".to_string()),
            retryable: false,
        };
        assert_eq!(err.error_code(), "202");
        assert_eq!(err.http_status_code(), 502);
    }
}
