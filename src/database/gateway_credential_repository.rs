use crate::database::error::{DatabaseError, DbResult};
use crate::gateways::error::GatewayError;
use crate::gateways::factory::GatewayFactoryConfig;
use crate::gateways::providers::{DokuConfig, MidtransConfig};
use crate::gateways::types::GatewayName;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

/// Stored gateway credential. `secrets` holds the named key material
/// (server_key / client_id / secret_key) as a JSON object; immutable for the
/// duration of a processing run once loaded.
#[derive(Debug, Clone, FromRow)]
pub struct GatewayCredential {
    pub gateway: String,
    pub environment: String,
    pub secrets: serde_json::Value,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for gateway credentials
pub struct GatewayCredentialRepository {
    pool: PgPool,
}

impl GatewayCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the active credential for a gateway, if one is stored.
    pub async fn get_active(&self, gateway: &GatewayName) -> DbResult<Option<GatewayCredential>> {
        sqlx::query_as::<_, GatewayCredential>(
            "SELECT gateway, environment, secrets, is_active, created_at, updated_at
             FROM gateway_credentials
             WHERE gateway = $1 AND is_active = true
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .bind(gateway.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Resolves adapter configs from stored credentials for every enabled
    /// gateway. Gateways with no usable stored credential keep the
    /// environment-variable construction path.
    pub async fn resolve_factory_config(&self, factory_config: &mut GatewayFactoryConfig) {
        for gateway in factory_config.enabled_gateways.clone() {
            match self.get_active(&gateway).await {
                Ok(Some(credential)) => {
                    match apply_credential(factory_config, &gateway, &credential) {
                        Ok(()) => {
                            info!(
                                gateway = %gateway,
                                environment = %credential.environment,
                                "Loaded gateway credential from store"
                            );
                        }
                        Err(e) => {
                            warn!(
                                gateway = %gateway,
                                error = %e,
                                "Stored credential is unusable, falling back to environment"
                            );
                        }
                    }
                }
                Ok(None) => {
                    info!(gateway = %gateway, "No stored credential, using environment variables");
                }
                Err(e) => {
                    warn!(
                        gateway = %gateway,
                        error = %e,
                        "Credential lookup failed, using environment variables"
                    );
                }
            }
        }
    }
}

/// Applies one stored credential to the factory configuration. Leaves the
/// config untouched when the secrets cannot build an adapter config.
pub fn apply_credential(
    factory_config: &mut GatewayFactoryConfig,
    gateway: &GatewayName,
    credential: &GatewayCredential,
) -> Result<(), GatewayError> {
    match gateway {
        GatewayName::Midtrans => {
            factory_config.midtrans = Some(MidtransConfig::from_settings(
                &credential.secrets,
                &credential.environment,
            )?);
        }
        GatewayName::Doku => {
            factory_config.doku = Some(DokuConfig::from_settings(
                &credential.secrets,
                &credential.environment,
            )?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(secrets: serde_json::Value) -> GatewayCredential {
        GatewayCredential {
            gateway: "midtrans".to_string(),
            environment: "production".to_string(),
            secrets,
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn empty_factory_config() -> GatewayFactoryConfig {
        GatewayFactoryConfig {
            default_gateway: GatewayName::Midtrans,
            enabled_gateways: vec![GatewayName::Midtrans, GatewayName::Doku],
            midtrans: None,
            doku: None,
        }
    }

    #[test]
    fn stored_secrets_become_adapter_config() {
        let mut config = empty_factory_config();
        let credential = credential(serde_json::json!({"server_key": "sk-stored"}));

        apply_credential(&mut config, &GatewayName::Midtrans, &credential)
            .expect("valid secrets should apply");

        let midtrans = config.midtrans.expect("adapter config should be set");
        assert_eq!(midtrans.server_key, "sk-stored");
        assert!(midtrans.base_url.contains("api.midtrans.com"));
        assert!(config.doku.is_none());
    }

    #[test]
    fn unusable_secrets_leave_the_env_path_intact() {
        let mut config = empty_factory_config();
        let credential = credential(serde_json::json!({}));

        let result = apply_credential(&mut config, &GatewayName::Midtrans, &credential);

        assert!(matches!(result, Err(GatewayError::ConfigError { .. })));
        assert!(config.midtrans.is_none());
    }
}
