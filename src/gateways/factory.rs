use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::GatewayClient;
use crate::gateways::providers::{DokuConfig, DokuGateway, MidtransConfig, MidtransGateway};
use crate::gateways::types::GatewayName;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct GatewayFactoryConfig {
    pub default_gateway: GatewayName,
    pub enabled_gateways: Vec<GatewayName>,
    /// Adapter configs resolved ahead of time, typically from stored
    /// credentials with environment variables as the fallback.
    pub midtrans: Option<MidtransConfig>,
    pub doku: Option<DokuConfig>,
}

impl GatewayFactoryConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let default_gateway =
            std::env::var("DEFAULT_PAYMENT_GATEWAY").unwrap_or_else(|_| "midtrans".to_string());
        let default_gateway = GatewayName::from_str(&default_gateway)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_GATEWAYS")
            .unwrap_or_else(|_| "midtrans,doku".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            enabled_gateways.push(GatewayName::from_str(value)?);
        }

        if !enabled_gateways.contains(&default_gateway) {
            return Err(GatewayError::ConfigError {
                message: "default gateway must be enabled".to_string(),
            });
        }

        Ok(Self {
            default_gateway,
            enabled_gateways,
            midtrans: None,
            doku: None,
        })
    }
}

pub struct GatewayFactory {
    config: GatewayFactoryConfig,
}

impl GatewayFactory {
    pub fn from_env() -> GatewayResult<Self> {
        let config = GatewayFactoryConfig::from_env()?;
        Ok(Self { config })
    }

    pub fn with_config(config: GatewayFactoryConfig) -> Self {
        Self { config }
    }

    pub fn get_gateway(&self, gateway: GatewayName) -> GatewayResult<Box<dyn GatewayClient>> {
        if !self.config.enabled_gateways.contains(&gateway) {
            return Err(GatewayError::ValidationError {
                message: format!("gateway {} is disabled", gateway),
                field: Some("gateway".to_string()),
            });
        }

        let client: Box<dyn GatewayClient> = match gateway {
            GatewayName::Midtrans => match &self.config.midtrans {
                Some(cfg) => Box::new(MidtransGateway::new(cfg.clone())?),
                None => Box::new(MidtransGateway::from_env()?),
            },
            GatewayName::Doku => match &self.config.doku {
                Some(cfg) => Box::new(DokuGateway::new(cfg.clone())?),
                None => Box::new(DokuGateway::from_env()?),
            },
        };
        client.validate_config()?;
        Ok(client)
    }

    pub fn get_default_gateway(&self) -> GatewayResult<Box<dyn GatewayClient>> {
        self.get_gateway(self.config.default_gateway.clone())
    }

    pub fn list_available_gateways(&self) -> Vec<GatewayName> {
        self.config.enabled_gateways.clone()
    }
}
