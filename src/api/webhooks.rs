use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::payment_repository::PaymentRepository;
use crate::database::webhook_retry_repository::WebhookRetryRepository;
use crate::gateways::types::{
    GatewayName, InboundNotification, NotificationHeaders, REASON_INVALID_CLIENT,
    REASON_INVALID_HEADERS, REASON_INVALID_SIGNATURE,
};
use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
use crate::services::webhook_retry::WebhookRetryService;

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor<PaymentRepository>>,
    pub retry: Arc<WebhookRetryService<PaymentRepository, WebhookRetryRepository>>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn ack(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "success", "message": message})),
    )
}

fn reject(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "error", "message": message})),
    )
}

/// Translates machine rejection reasons into the messages gateway operators
/// see in their delivery logs.
fn rejection_message(err: &WebhookProcessorError) -> String {
    if let WebhookProcessorError::Rejected { reason } = err {
        let human = match reason.as_str() {
            REASON_INVALID_HEADERS => "Missing required headers",
            REASON_INVALID_SIGNATURE => "Invalid signature",
            REASON_INVALID_CLIENT => "Unrecognized client id",
            other => other,
        };
        return human.to_string();
    }
    err.to_string()
}

/// POST /webhooks/payment/{method}
///
/// Always answers 200 for deliveries we have classified, even rejections.
/// Gateways treat non-2xx as undelivered and keep redelivering; a signature
/// mismatch will never verify on redelivery, so rejecting with 200 stops the
/// storm. 500 is reserved for failures to even record the delivery.
pub async fn handle_payment_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(method): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(gateway = %method, bytes = body.len(), "Received payment webhook");

    let notification_headers = NotificationHeaders {
        client_id: header_value(&headers, "client-id"),
        request_id: header_value(&headers, "request-id"),
        request_timestamp: header_value(&headers, "request-timestamp"),
        signature: header_value(&headers, "signature"),
    };

    let notification = InboundNotification {
        payload: &body,
        headers: &notification_headers,
        request_target: uri.path(),
    };

    match state.processor.process_notification(&method, &notification).await {
        Ok(WebhookOutcome::Applied { order_id, status }) => {
            info!(gateway = %method, order_id = %order_id, status = %status.as_str(), "Webhook applied");
            ack("notification processed")
        }
        Ok(WebhookOutcome::Duplicate { order_id, .. }) => {
            info!(gateway = %method, order_id = %order_id, "Webhook already processed");
            ack("notification already processed")
        }
        Ok(WebhookOutcome::Unchanged { order_id }) => {
            info!(gateway = %method, order_id = %order_id, "Non-terminal notification, no change");
            ack("notification acknowledged")
        }
        Err(err) if err.is_retryable() => {
            enqueue_for_retry(&state, &method, &body, &err).await
        }
        Err(err) => {
            warn!(gateway = %method, error = %err, "Webhook rejected");
            reject(&rejection_message(&err))
        }
    }
}

/// Persists a transiently failed delivery so the retry worker can replay it.
async fn enqueue_for_retry(
    state: &WebhookState,
    method: &str,
    body: &[u8],
    err: &WebhookProcessorError,
) -> (StatusCode, Json<serde_json::Value>) {
    let gateway = match GatewayName::from_str(method) {
        Ok(g) => g,
        // Unreachable in practice: unknown gateways are permanent errors.
        Err(_) => return reject("unsupported gateway"),
    };

    let order_id = match err {
        WebhookProcessorError::OrderNotFound(order_id) => Some(order_id.as_str()),
        _ => None,
    };

    match state
        .retry
        .record_failure(gateway, body, order_id, &err.to_string())
        .await
    {
        Ok(attempt) => {
            info!(
                gateway = %method,
                attempt_id = %attempt.id,
                error = %err,
                "Webhook queued for retry"
            );
            ack("notification accepted for retry")
        }
        Err(db_err) => {
            error!(gateway = %method, error = %db_err, "Failed to queue webhook for retry");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "message": "failed to record notification"
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Rejections answer 200 like acks; gateways redeliver on non-2xx and a
    // permanently rejected delivery would never stop otherwise.
    #[test]
    fn ack_and_reject_both_answer_200() {
        let (status, Json(body)) = ack("notification processed");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (status, Json(body)) = reject("Invalid signature");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Invalid signature");
    }

    #[test]
    fn rejection_reasons_read_as_operator_messages() {
        let missing = WebhookProcessorError::Rejected {
            reason: REASON_INVALID_HEADERS.to_string(),
        };
        assert_eq!(rejection_message(&missing), "Missing required headers");

        let forged = WebhookProcessorError::Rejected {
            reason: REASON_INVALID_SIGNATURE.to_string(),
        };
        assert_eq!(rejection_message(&forged), "Invalid signature");

        let malformed = WebhookProcessorError::MalformedPayload("not json".to_string());
        assert_eq!(rejection_message(&malformed), malformed.to_string());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("Client-Id", "BRN-0001".parse().unwrap());
        assert_eq!(header_value(&headers, "client-id").as_deref(), Some("BRN-0001"));
        assert_eq!(header_value(&headers, "request-id"), None);
    }
}
