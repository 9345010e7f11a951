//! Account management for dbstudio
//!
//! Passwords are hashed with bcrypt. Sessions are stateless HS256 JWTs:
//! short-lived access tokens, longer-lived refresh tokens signed with a
//! separate secret, and single-use password reset tokens.

pub mod service;
pub mod tokens;

pub use service::{AuthService, LoginRequest, MIN_PASSWORD_LEN, RegisterRequest, Session, User};
pub use tokens::{Claims, RESET_TOKEN_TTL, TokenIssuer, TokenKind, TokenPair, TokenSettings};
