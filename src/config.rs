use crate::provider::Provider;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Timeout for outbound OAuth calls. Provider token endpoints are
    /// external; a hung call must not stall the pool read path.
    pub upstream_timeout_secs: u64,
    /// Interval of the background cleanup sweep.
    pub cleanup_interval_secs: u64,
    pub endpoints: ProviderEndpoints,
}

/// Provider token-endpoint URLs. Real endpoints by default; overridable via
/// env so tests can point a mock server at the same code path.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub itau_token_url: String,
    /// Itau uses a distinct STS endpoint for the JWT-bearer grant.
    pub itau_assertion_url: String,
    pub inter_token_url: String,
}

impl ProviderEndpoints {
    pub fn token_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::Itau => &self.itau_token_url,
            Provider::Inter => &self.inter_token_url,
        }
    }

    pub fn assertion_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::Itau => &self.itau_assertion_url,
            Provider::Inter => &self.inter_token_url,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        port: std::env::var("BANKLINK_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://banklink.db".into()),
        upstream_timeout_secs: std::env::var("BANKLINK_UPSTREAM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15),
        cleanup_interval_secs: std::env::var("BANKLINK_CLEANUP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
        endpoints: ProviderEndpoints {
            itau_token_url: std::env::var("BANKLINK_ITAU_TOKEN_URL")
                .unwrap_or_else(|_| "https://sts.itau.com.br/api/oauth/token".into()),
            itau_assertion_url: std::env::var("BANKLINK_ITAU_ASSERTION_URL")
                .unwrap_or_else(|_| "https://sts.itau.com.br/as/token.oauth2".into()),
            inter_token_url: std::env::var("BANKLINK_INTER_TOKEN_URL").unwrap_or_else(|_| {
                "https://cdpj.partners.bancointer.com.br/oauth/v2/token".into()
            }),
        },
    })
}
