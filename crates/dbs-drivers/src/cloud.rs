//! Cloud provider detection and Postgres connection defaults
//!
//! Managed Postgres hosts are recognized by a substring of their hostname.
//! The matched provider's defaults only fill settings the caller left unset.

use dbs_core::{PostgresConfig, SslConfig, SslMode};

/// Tag sent as `application_name` when the caller did not set one
pub const APPLICATION_NAME: &str = "dbstudio";

/// Managed Postgres providers with known-good connection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    AwsRds,
    Supabase,
    Neon,
    PlanetScale,
    Railway,
    Render,
}

/// Hostname substrings in check order; the first match wins
const PROVIDER_HOSTS: &[(&str, CloudProvider)] = &[
    ("amazonaws.com", CloudProvider::AwsRds),
    ("supabase.co", CloudProvider::Supabase),
    ("neon.tech", CloudProvider::Neon),
    ("planetscale.com", CloudProvider::PlanetScale),
    ("railway.app", CloudProvider::Railway),
    ("render.com", CloudProvider::Render),
];

/// Connection settings applied to unset fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionDefaults {
    pub ssl: SslConfig,
    pub connection_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub pool_max: u32,
}

impl ConnectionDefaults {
    /// Used for hosts that match no provider, including localhost
    pub const GENERIC: ConnectionDefaults = ConnectionDefaults {
        ssl: SslConfig {
            mode: SslMode::Prefer,
            reject_unauthorized: false,
        },
        connection_timeout_ms: 30_000,
        idle_timeout_ms: 30_000,
        pool_max: 10,
    };
}

const REQUIRE_TLS: SslConfig = SslConfig {
    mode: SslMode::Require,
    reject_unauthorized: false,
};

impl CloudProvider {
    pub fn name(&self) -> &'static str {
        match self {
            CloudProvider::AwsRds => "aws-rds",
            CloudProvider::Supabase => "supabase",
            CloudProvider::Neon => "neon",
            CloudProvider::PlanetScale => "planetscale",
            CloudProvider::Railway => "railway",
            CloudProvider::Render => "render",
        }
    }

    pub fn defaults(&self) -> ConnectionDefaults {
        match self {
            CloudProvider::AwsRds => ConnectionDefaults {
                ssl: REQUIRE_TLS,
                connection_timeout_ms: 30_000,
                idle_timeout_ms: 30_000,
                pool_max: 20,
            },
            CloudProvider::Supabase => ConnectionDefaults {
                ssl: REQUIRE_TLS,
                connection_timeout_ms: 10_000,
                idle_timeout_ms: 30_000,
                pool_max: 10,
            },
            // Neon computes may be suspended; allow for cold starts and
            // release idle connections early.
            CloudProvider::Neon => ConnectionDefaults {
                ssl: REQUIRE_TLS,
                connection_timeout_ms: 15_000,
                idle_timeout_ms: 10_000,
                pool_max: 5,
            },
            CloudProvider::PlanetScale => ConnectionDefaults {
                ssl: REQUIRE_TLS,
                connection_timeout_ms: 10_000,
                idle_timeout_ms: 30_000,
                pool_max: 10,
            },
            CloudProvider::Railway | CloudProvider::Render => ConnectionDefaults {
                ssl: REQUIRE_TLS,
                connection_timeout_ms: 30_000,
                idle_timeout_ms: 30_000,
                pool_max: 10,
            },
        }
    }
}

/// Detect the managed provider serving `host`, if any
pub fn detect_provider(host: &str) -> Option<CloudProvider> {
    let host = host.to_ascii_lowercase();
    PROVIDER_HOSTS
        .iter()
        .find(|(needle, _)| host.contains(needle))
        .map(|(_, provider)| *provider)
}

/// Fill unset SSL, timeout, pool and application name settings from the
/// detected provider's defaults, or the generic defaults.
pub fn resolve_cloud_config(mut config: PostgresConfig) -> PostgresConfig {
    let defaults = detect_provider(&config.host)
        .map(|provider| provider.defaults())
        .unwrap_or(ConnectionDefaults::GENERIC);

    config.ssl.get_or_insert(defaults.ssl);
    config
        .connection_timeout_ms
        .get_or_insert(defaults.connection_timeout_ms);
    config.idle_timeout_ms.get_or_insert(defaults.idle_timeout_ms);
    config.pool_max.get_or_insert(defaults.pool_max);
    config
        .application_name
        .get_or_insert_with(|| APPLICATION_NAME.to_string());

    config
}
