pub mod payment_service;
pub mod webhook_processor;
pub mod webhook_retry;
