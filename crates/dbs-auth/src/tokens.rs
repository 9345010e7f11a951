//! JWT issuing, verification and revocation

use chrono::Utc;
use dashmap::DashMap;
use dbs_core::{AppConfig, Error, Result};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime of password reset tokens
pub const RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

/// JWT payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub role: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| Error::auth_error("Invalid token subject"))
    }
}

/// Access and refresh tokens handed to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Signing settings derived from [`AppConfig`]
#[derive(Clone)]
pub struct TokenSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            access_secret: config.auth.jwt_secret.clone(),
            refresh_secret: config.auth.jwt_refresh_secret.clone(),
            access_ttl: config.access_token_ttl()?,
            refresh_ttl: config.refresh_token_ttl()?,
        })
    }
}

/// Signs and verifies tokens, and remembers revoked token ids until they
/// expire on their own.
#[derive(Debug)]
pub struct TokenIssuer {
    settings: TokenSettings,
    revoked: DashMap<String, i64>,
}

impl TokenIssuer {
    pub fn new(settings: TokenSettings) -> Self {
        Self {
            settings,
            revoked: DashMap::new(),
        }
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Refresh => self.settings.refresh_secret.as_bytes(),
            TokenKind::Access | TokenKind::Reset => self.settings.access_secret.as_bytes(),
        }
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.settings.access_ttl,
            TokenKind::Refresh => self.settings.refresh_ttl,
            TokenKind::Reset => RESET_TOKEN_TTL,
        }
    }

    pub fn issue(&self, kind: TokenKind, user_id: i64, email: &str, role: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(self.ttl(kind).as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| Error::config_error("Token lifetime is too large"))?;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            kind,
            iat: now,
            exp,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(|e| Error::message(format!("Failed to sign token: {}", e)))
    }

    pub fn issue_pair(&self, user_id: i64, email: &str, role: &str) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue(TokenKind::Access, user_id, email, role)?,
            refresh_token: self.issue(TokenKind::Refresh, user_id, email, role)?,
            token_type: "Bearer",
            expires_in: self.settings.access_ttl.as_secs(),
        })
    }

    /// Decode `token`, requiring it to be of `kind` and not revoked
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret(kind)),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            Error::auth_error("Invalid or expired token")
        })?;

        let claims = data.claims;
        if claims.kind != kind {
            return Err(Error::auth_error("Wrong token type"));
        }
        if self.revoked.contains_key(&claims.jti) {
            return Err(Error::auth_error("Token has been revoked"));
        }
        Ok(claims)
    }

    pub fn revoke(&self, claims: &Claims) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp > now);
        self.revoked.insert(claims.jti.clone(), claims.exp);
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }
}
