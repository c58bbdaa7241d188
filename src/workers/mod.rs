pub mod webhook_retry;
