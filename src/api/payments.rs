use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::payment_service::{InitiatePayment, PaymentService};

pub struct PaymentsState {
    pub payments: Arc<PaymentService>,
}

/// POST /api/payments
pub async fn initiate_payment(
    State(state): State<Arc<PaymentsState>>,
    Json(request): Json<InitiatePayment>,
) -> Result<impl IntoResponse, AppError> {
    let initiated = state.payments.initiate_payment(request).await?;
    info!(order_id = %initiated.order_id, gateway = %initiated.gateway, "Payment initiated");
    Ok(success_response(initiated))
}

/// GET /api/payments/gateways
pub async fn list_gateways(
    State(state): State<Arc<PaymentsState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(success_response(state.payments.available_gateways()))
}

/// GET /api/payments/{order_id}
pub async fn get_payment_status(
    State(state): State<Arc<PaymentsState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.payments.get_payment_status(&order_id).await?;
    Ok(success_response(view))
}

/// POST /api/payments/{order_id}/cancel
pub async fn cancel_payment(
    State(state): State<Arc<PaymentsState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.payments.cancel_payment(&order_id).await?;
    info!(order_id = %order_id, "Payment cancel requested");
    Ok(success_response(view))
}
