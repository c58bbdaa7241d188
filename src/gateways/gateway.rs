use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, InboundNotification, NotificationEvent,
    NotificationVerification, StatusOutcome,
};
use async_trait::async_trait;

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn create_transaction(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome>;

    async fn get_transaction_status(&self, order_id: &str) -> GatewayResult<StatusOutcome>;

    async fn cancel_transaction(&self, order_id: &str) -> GatewayResult<StatusOutcome>;

    /// Verifies an inbound notification against the gateway's signature
    /// scheme. Pure header/payload computation, no network.
    fn verify_notification(
        &self,
        notification: &InboundNotification<'_>,
    ) -> GatewayResult<NotificationVerification>;

    /// Extracts the normalized event from a verified notification payload.
    fn parse_notification(&self, payload: &[u8]) -> GatewayResult<NotificationEvent>;

    fn name(&self) -> GatewayName;

    fn payment_methods(&self) -> &'static [&'static str];

    fn required_config_fields(&self) -> &'static [&'static str];

    /// Checks that the adapter holds the credentials it needs before any
    /// call is attempted.
    fn validate_config(&self) -> GatewayResult<()>;
}
