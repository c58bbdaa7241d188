pub mod doku;
pub mod midtrans;

pub use doku::{DokuConfig, DokuGateway};
pub use midtrans::{MidtransConfig, MidtransGateway};
