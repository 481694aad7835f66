use crate::common::rand_string;
use crate::probe::ReadinessProbe;
use crate::{Config, Error, RunningInstance, Server, ServiceSpec};
use derive_builder::Builder;
use std::collections::HashMap;
use std::time::Duration;

const IMAGE: &str = "oryd/hydra";
const PUBLIC_PORT: u16 = 4444;
const ADMIN_PORT: u16 = 4445;
const READY_PATH: &str = "/health/ready";
const DEFAULT_DSN: &str = "sqlite:///tmp/db.sqlite?_fk=true";

/// Configuration for creating an Ory Hydra server.
///
/// By default the server uses an in-container SQLite database, so no
/// external database is required; the schema migration runs before the
/// server is started. Hydra listens on port 4444 for the public OAuth2 API
/// and on port 4445 for the admin API; both are published to ephemeral host
/// ports.
///
/// The system secret used for encryption is generated unless the
/// `secrets_system` field is set. The login/consent/logout redirect URLs
/// and the advertised issuer can be set through the dedicated fields; any
/// other Hydra setting can be passed through `env`.
///
/// See the [Ory Hydra documentation](https://www.ory.sh/docs/hydra) for the
/// available environment variables.
#[derive(Clone, Default, Builder)]
#[builder(default)]
pub struct HydraServerConfig {
    #[builder(default = "String::from(DEFAULT_DSN)", setter(into))]
    pub dsn: String,
    #[builder(default = "HashMap::new()")]
    pub env: HashMap<String, String>,
    #[builder(default = "crate::spec::new_handle(IMAGE)")]
    pub handle: String,
    #[builder(default = "rand_string(24)", setter(into))]
    pub secrets_system: String,
    #[builder(default = "30")]
    pub timeout: u16,
    #[builder(default)]
    pub urls_consent: Option<String>,
    #[builder(default)]
    pub urls_login: Option<String>,
    #[builder(default)]
    pub urls_logout: Option<String>,
    #[builder(default)]
    pub urls_self_issuer: Option<String>,
    #[builder(default = "String::from(\"v25.4.0\")", setter(into))]
    pub version: String,
}

impl HydraServerConfig {
    pub fn builder() -> HydraServerConfigBuilder {
        HydraServerConfigBuilder::default()
    }
}

impl Config for HydraServerConfig {
    fn into_spec(self) -> ServiceSpec {
        let mut env = self.env;
        env.insert(String::from("DSN"), self.dsn);
        env.insert(String::from("SECRETS_SYSTEM"), self.secrets_system);
        if let Some(url) = self.urls_login {
            env.insert(String::from("URLS_LOGIN"), url);
        }
        if let Some(url) = self.urls_consent {
            env.insert(String::from("URLS_CONSENT"), url);
        }
        if let Some(url) = self.urls_logout {
            env.insert(String::from("URLS_LOGOUT"), url);
        }
        if let Some(url) = self.urls_self_issuer {
            env.insert(String::from("URLS_SELF_ISSUER"), url);
        }

        // The image entrypoint is replaced so the migration runs before the
        // server comes up.
        let entrypoint = vec![
            String::from("sh"),
            String::from("-c"),
            String::from("hydra migrate sql -e --yes && hydra serve all --dev"),
        ];

        ServiceSpec {
            args: Vec::new(),
            backoff: Default::default(),
            entrypoint: Some(entrypoint),
            env,
            handle: self.handle,
            image: IMAGE.into(),
            ports: vec![PUBLIC_PORT, ADMIN_PORT],
            probe: ReadinessProbe::http(ADMIN_PORT, READY_PATH),
            timeout: Duration::from_secs(self.timeout.into()),
            version: self.version,
        }
    }
}

/// A running instance of an Ory Hydra server.
///
/// The public OAuth2 API is reachable at `public_url` and the admin API at
/// `admin_url`; the remaining methods build the well-known endpoints on top
/// of those.
pub struct HydraServer {
    pub public_host: String,
    pub public_port: u16,
    pub admin_host: String,
    pub admin_port: u16,
}

impl HydraServer {
    /// The base URL of the public OAuth2 API.
    pub fn public_url(&self) -> String {
        format!("http://{}:{}", self.public_host, self.public_port)
    }

    /// The base URL of the admin API.
    pub fn admin_url(&self) -> String {
        format!("http://{}:{}", self.admin_host, self.admin_port)
    }

    /// The OAuth2 authorization endpoint.
    pub fn oauth2_auth_url(&self) -> String {
        format!("{}/oauth2/auth", self.public_url())
    }

    /// The OAuth2 token endpoint.
    pub fn oauth2_token_url(&self) -> String {
        format!("{}/oauth2/token", self.public_url())
    }

    /// The OAuth2 token revocation endpoint.
    pub fn oauth2_revoke_url(&self) -> String {
        format!("{}/oauth2/revoke", self.public_url())
    }

    /// The OIDC front/back-channel logout endpoint.
    pub fn oauth2_sessions_logout_url(&self) -> String {
        format!("{}/oauth2/sessions/logout", self.public_url())
    }

    /// The OIDC UserInfo endpoint.
    pub fn userinfo_url(&self) -> String {
        format!("{}/userinfo", self.public_url())
    }

    /// The JWKS discovery document.
    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.public_url())
    }

    /// The OpenID Connect discovery endpoint.
    pub fn openid_configuration_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.public_url())
    }

    /// The OAuth 2.0 Authorization Server Metadata endpoint (RFC 8414).
    pub fn oauth_authorization_server_url(&self) -> String {
        format!("{}/.well-known/oauth-authorization-server", self.public_url())
    }

    /// The admin client management endpoint.
    pub fn admin_clients_url(&self) -> String {
        format!("{}/admin/clients", self.admin_url())
    }

    /// The OAuth 2.0 token introspection endpoint (RFC 7662).
    pub fn admin_introspect_url(&self) -> String {
        format!("{}/admin/oauth2/introspect", self.admin_url())
    }

    /// The admin login request management endpoint.
    pub fn admin_login_request_url(&self) -> String {
        format!("{}/admin/oauth2/auth/requests/login", self.admin_url())
    }

    /// The admin consent request management endpoint.
    pub fn admin_consent_request_url(&self) -> String {
        format!("{}/admin/oauth2/auth/requests/consent", self.admin_url())
    }

    /// The readiness endpoint on the admin API.
    pub fn health_ready_url(&self) -> String {
        format!("{}{}", self.admin_url(), READY_PATH)
    }
}

impl Server for HydraServer {
    type Config = HydraServerConfig;

    fn new(_config: &Self::Config, instance: &RunningInstance) -> Result<Self, Error> {
        let public = instance.endpoint(PUBLIC_PORT)?;
        let admin = instance.endpoint(ADMIN_PORT)?;
        Ok(HydraServer {
            public_host: public.host.clone(),
            public_port: public.port,
            admin_host: admin.host.clone(),
            admin_port: admin.port,
        })
    }
}
