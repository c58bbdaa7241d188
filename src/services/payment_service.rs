//! Payment initiation and lookup on top of the gateway adapters.
//!
//! This service owns the transaction record lifecycle up to the point where
//! a gateway notification takes over: it creates the pending record, asks the
//! gateway for a charge, and stores the gateway's reference. Terminal state
//! transitions are applied exclusively by the webhook processor so that the
//! balance mutation happens exactly once.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::payment_repository::{NewTransaction, PaymentRepository, TransactionRecord};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::{
    new_order_id, ChargeRequest, CustomerDetails, GatewayName, LineItem, TransactionStatus,
};
use crate::services::webhook_processor::PaymentStore;

/// Inbound request to start a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePayment {
    pub customer_id: Uuid,
    /// Amount in minor currency units (IDR has no subunit, so rupiah).
    pub amount: i64,
    /// Gateway override; the configured default is used when absent.
    pub gateway: Option<String>,
    pub payment_method: Option<String>,
    pub customer: CustomerDetails,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitiated {
    pub order_id: String,
    pub gateway: String,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub payment_url: Option<String>,
    pub expires_at: Option<String>,
}

/// What one configured gateway supports, for client discovery.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayCapability {
    pub gateway: String,
    pub payment_methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub order_id: String,
    pub gateway: String,
    pub amount: i64,
    /// Status as recorded locally. Gateways are only consulted on explicit
    /// status queries; the record itself moves via notifications.
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    /// Live status reported by the gateway, when it was queried.
    pub gateway_status: Option<TransactionStatus>,
}

impl PaymentStatusView {
    fn from_record(record: TransactionRecord, gateway_status: Option<TransactionStatus>) -> Self {
        let status = record.transaction_status();
        Self {
            order_id: record.order_id,
            gateway: record.gateway,
            amount: record.amount,
            status,
            gateway_reference: record.gateway_transaction_id,
            gateway_status,
        }
    }
}

pub struct PaymentService {
    payments: Arc<PaymentRepository>,
    factory: Arc<GatewayFactory>,
}

impl PaymentService {
    pub fn new(payments: Arc<PaymentRepository>, factory: Arc<GatewayFactory>) -> Self {
        Self { payments, factory }
    }

    /// Creates a pending transaction record and requests a charge from the
    /// selected gateway. The record stays pending until the gateway's
    /// notification arrives; a rejected charge is marked failed immediately.
    pub async fn initiate_payment(&self, request: InitiatePayment) -> AppResult<PaymentInitiated> {
        let gateway = match &request.gateway {
            Some(name) => self.factory.get_gateway(GatewayName::from_str(name)?)?,
            None => self.factory.get_default_gateway()?,
        };
        let gateway_name = gateway.name();

        let order_id = new_order_id();
        let charge = ChargeRequest {
            order_id: order_id.clone(),
            amount: request.amount,
            customer: request.customer,
            payment_method: request.payment_method,
            items: request.items,
            metadata: None,
        };
        charge.validate()?;

        self.payments
            .create(NewTransaction {
                order_id: order_id.clone(),
                customer_id: request.customer_id,
                gateway: gateway_name.clone(),
                amount: request.amount,
            })
            .await?;

        info!(
            order_id = %order_id,
            gateway = %gateway_name,
            amount = request.amount,
            "initiating payment"
        );

        let outcome = match gateway.create_transaction(charge).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // The gateway never accepted the charge, so failing the
                // record here cannot race a notification for it.
                let app_err: AppError = err.into();
                if !app_err.is_retryable() {
                    warn!(order_id = %order_id, error = %app_err, "charge rejected, marking failed");
                    self.payments
                        .apply_terminal_status(
                            &order_id,
                            TransactionStatus::Failed,
                            None,
                            &serde_json::json!({"error": app_err.user_message()}),
                        )
                        .await?;
                }
                return Err(app_err);
            }
        };

        if let Some(reference) = &outcome.gateway_reference {
            self.payments
                .set_gateway_reference(&order_id, reference)
                .await?;
        }

        Ok(PaymentInitiated {
            order_id,
            gateway: gateway_name.to_string(),
            status: outcome.status,
            gateway_reference: outcome.gateway_reference,
            payment_url: outcome.payment_url,
            expires_at: outcome.expires_at,
        })
    }

    /// Returns the locally recorded state plus the gateway's live view.
    pub async fn get_payment_status(&self, order_id: &str) -> AppResult<PaymentStatusView> {
        let record = self.require_record(order_id).await?;

        let gateway_status = match self.query_gateway_status(&record.gateway, order_id).await {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(order_id, error = %err, "gateway status query failed");
                None
            }
        };

        Ok(PaymentStatusView::from_record(record, gateway_status))
    }

    /// Asks the gateway to cancel a pending payment. The local record is not
    /// touched here; the gateway confirms the cancellation through its
    /// notification channel like any other terminal transition.
    pub async fn cancel_payment(&self, order_id: &str) -> AppResult<PaymentStatusView> {
        let record = self.require_record(order_id).await?;

        let current = record.transaction_status();
        if current.is_terminal() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidInput {
                    field: "order_id".to_string(),
                    reason: format!("transaction is already {}", current.as_str()),
                },
            )));
        }

        let gateway_name = GatewayName::from_str(&record.gateway)?;
        let gateway = self.factory.get_gateway(gateway_name)?;
        let outcome = gateway.cancel_transaction(order_id).await?;

        info!(order_id, gateway = %record.gateway, "cancellation requested");

        Ok(PaymentStatusView::from_record(record, Some(outcome.status)))
    }

    /// Lists enabled gateways with their payment methods. Gateways whose
    /// adapters cannot be constructed are skipped with a warning instead of
    /// failing the whole listing.
    pub fn available_gateways(&self) -> Vec<GatewayCapability> {
        self.factory
            .list_available_gateways()
            .into_iter()
            .filter_map(|name| match self.factory.get_gateway(name.clone()) {
                Ok(gateway) => Some(GatewayCapability {
                    gateway: name.to_string(),
                    payment_methods: gateway
                        .payment_methods()
                        .iter()
                        .map(|m| m.to_string())
                        .collect(),
                }),
                Err(err) => {
                    warn!(gateway = %name, error = %err, "gateway unavailable for listing");
                    None
                }
            })
            .collect()
    }

    async fn require_record(&self, order_id: &str) -> AppResult<TransactionRecord> {
        self.payments
            .get_by_order_id(order_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(
                    crate::error::DomainError::TransactionNotFound {
                        order_id: order_id.to_string(),
                    },
                ))
            })
    }

    async fn query_gateway_status(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> AppResult<TransactionStatus> {
        let gateway = self.factory.get_gateway(GatewayName::from_str(gateway)?)?;
        let outcome = gateway.get_transaction_status(order_id).await?;
        Ok(outcome.status)
    }
}
