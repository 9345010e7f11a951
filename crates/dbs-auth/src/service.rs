//! Account operations over the `auth_users` table

use crate::tokens::{Claims, TokenIssuer, TokenKind, TokenPair, TokenSettings};
use chrono::Utc;
use dbs_core::{AppConfig, Error, Result, SqlValue};
use dbs_drivers::Driver;
use dbs_orm::{Condition, Record, Repository, Values};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Public view of an account; never carries the password hash
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// A signed-in user and their tokens
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
}

struct StoredUser {
    user: User,
    password_hash: String,
}

impl StoredUser {
    fn from_record(record: &Record) -> Result<Self> {
        let text = |key: &str| -> Result<String> {
            record
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| Error::invariant(format!("auth_users.{} is missing", key)))
        };
        let id = record
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::invariant("auth_users.id is missing"))?;
        let is_active = match record.get("is_active") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_i64() != Some(0),
            _ => true,
        };

        Ok(Self {
            user: User {
                id,
                name: text("name")?,
                email: text("email")?,
                role: text("role")?,
                is_active,
                created_at: text("created_at").ok(),
            },
            password_hash: text("password_hash")?,
        })
    }
}

/// Registration, login and token lifecycle
#[derive(Debug)]
pub struct AuthService {
    users: Repository,
    tokens: TokenIssuer,
    bcrypt_cost: u32,
    /// Verified against when the email is unknown, so both paths cost a bcrypt round
    dummy_hash: String,
}

impl AuthService {
    /// Bind to `auth_users` on the system database
    pub async fn new(driver: Arc<dyn Driver>, config: &AppConfig) -> Result<Self> {
        let bcrypt_cost = config.auth.bcrypt_rounds;
        let dummy_hash = hash_with_cost(uuid::Uuid::new_v4().to_string(), bcrypt_cost).await?;
        Ok(Self {
            users: Repository::load(driver, "auth_users").await?,
            tokens: TokenIssuer::new(TokenSettings::from_config(config)?),
            bcrypt_cost,
            dummy_hash,
        })
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        hash_with_cost(password.to_string(), self.bcrypt_cost).await
    }

    async fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| Error::message(format!("Hashing task failed: {}", e)))?
            .map_err(|e| Error::message(format!("Failed to verify password: {}", e)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        self.users
            .find_one(vec![Condition::eq("email", normalize_email(email))])
            .await?
            .map(|record| StoredUser::from_record(&record))
            .transpose()
    }

    async fn find_active(&self, id: i64) -> Result<StoredUser> {
        let record = self
            .users
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::auth_error("Account no longer exists"))?;
        let stored = StoredUser::from_record(&record)?;
        if !stored.user.is_active {
            return Err(Error::auth_error("Account is disabled"));
        }
        Ok(stored)
    }

    fn session(&self, user: User) -> Result<Session> {
        let tokens = self.tokens.issue_pair(user.id, &user.email, &user.role)?;
        Ok(Session { user, tokens })
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<Session> {
        let email = normalize_email(&request.email);
        if request.name.trim().is_empty() {
            return Err(Error::validation("Name is required"));
        }
        if !is_plausible_email(&email) {
            return Err(Error::validation("A valid email is required"));
        }
        validate_password(&request.password)?;
        if self.users.exists(&[Condition::eq("email", email.as_str())]).await? {
            return Err(Error::validation("Email is already registered"));
        }

        let hash = self.hash_password(&request.password).await?;
        let values: Values = vec![
            ("name".into(), request.name.trim().into()),
            ("email".into(), email.into()),
            ("password_hash".into(), hash.into()),
            ("role".into(), "user".into()),
        ];
        let record = self.users.insert(&values).await?;
        let stored = StoredUser::from_record(&record)?;

        tracing::info!(user_id = stored.user.id, "Registered user");
        self.session(stored.user)
    }

    pub async fn login(&self, request: LoginRequest) -> Result<Session> {
        let invalid = || Error::auth_error("Invalid email or password");

        let stored = self.find_by_email(&request.email).await?;
        let hash = stored
            .as_ref()
            .map_or(self.dummy_hash.as_str(), |s| s.password_hash.as_str());
        let matches = Self::verify_password(&request.password, hash).await?;

        let stored = stored.ok_or_else(invalid)?;
        if !matches {
            tracing::debug!(user_id = stored.user.id, "Password mismatch");
            return Err(invalid());
        }
        if !stored.user.is_active {
            return Err(Error::auth_error("Account is disabled"));
        }

        tracing::info!(user_id = stored.user.id, "User logged in");
        self.session(stored.user)
    }

    /// Exchange a refresh token for a new pair; the old refresh token is revoked
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.tokens.verify(refresh_token, TokenKind::Refresh)?;
        let stored = self.find_active(claims.user_id()?).await?;
        self.tokens.revoke(&claims);
        self.tokens
            .issue_pair(stored.user.id, &stored.user.email, &stored.user.role)
    }

    /// Revoke the caller's access token and, when given, their refresh token
    pub fn logout(&self, access: &Claims, refresh_token: Option<&str>) {
        self.tokens.revoke(access);
        if let Some(token) = refresh_token {
            match self.tokens.verify(token, TokenKind::Refresh) {
                Ok(claims) if claims.sub == access.sub => self.tokens.revoke(&claims),
                Ok(_) => tracing::warn!(user_id = %access.sub, "Refresh token belongs to another user"),
                Err(e) => tracing::debug!(error = %e, "Ignoring unusable refresh token on logout"),
            }
        }
    }

    /// Issue a reset token for `email`. Unknown addresses yield `None`.
    pub async fn reset_password(&self, email: &str) -> Result<Option<String>> {
        let Some(stored) = self.find_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(None);
        };
        if !stored.user.is_active {
            return Ok(None);
        }

        let token = self.tokens.issue(
            TokenKind::Reset,
            stored.user.id,
            &stored.user.email,
            &stored.user.role,
        )?;
        tracing::info!(user_id = stored.user.id, "Issued password reset token");
        Ok(Some(token))
    }

    pub async fn reset_password_confirm(&self, token: &str, new_password: &str) -> Result<()> {
        let claims = self.tokens.verify(token, TokenKind::Reset)?;
        validate_password(new_password)?;
        let stored = self.find_active(claims.user_id()?).await?;

        let hash = self.hash_password(new_password).await?;
        let values: Values = vec![
            ("password_hash".into(), hash.into()),
            ("updated_at".into(), SqlValue::Timestamp(Utc::now())),
        ];
        self.users.update_by_id(stored.user.id, &values).await?;
        self.tokens.revoke(&claims);

        tracing::info!(user_id = stored.user.id, "Password reset");
        Ok(())
    }

    pub async fn me(&self, claims: &Claims) -> Result<User> {
        Ok(self.find_active(claims.user_id()?).await?.user)
    }

    /// Claims of a valid, unrevoked access token
    pub fn verify_access_token(&self, token: &str) -> Result<Claims> {
        self.tokens.verify(token, TokenKind::Access)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

async fn hash_with_cost(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| Error::message(format!("Hashing task failed: {}", e)))?
        .map_err(|e| Error::message(format!("Failed to hash password: {}", e)))
}
