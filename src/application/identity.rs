//! Session tokens issued by the external identity provider.
//!
//! The provider signs a JWT whose `sub` names the account; this module only
//! verifies it and maps the subject onto a local profile.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::application::users::{UserError, UserService};
use crate::domain::entities::UserRecord;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid identity key: {0}")]
    Key(String),
    #[error("session token expired")]
    Expired,
    #[error("session token rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing session token")]
    Missing,
    #[error("invalid session token")]
    Invalid,
    #[error("expired session token")]
    Expired,
    #[error("profile not onboarded")]
    NotOnboarded,
    #[error(transparent)]
    User(#[from] UserError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub iss: Option<String>,
}

pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn hs256(secret: &str) -> Result<Self, IdentityError> {
        if secret.is_empty() {
            return Err(IdentityError::Key("shared secret is empty".to_string()));
        }
        Ok(Self::with_key(
            DecodingKey::from_secret(secret.as_bytes()),
            Algorithm::HS256,
        ))
    }

    pub fn rs256_pem(pem: &[u8]) -> Result<Self, IdentityError> {
        let key =
            DecodingKey::from_rsa_pem(pem).map_err(|err| IdentityError::Key(err.to_string()))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key, validation }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    pub fn verify(&self, token: &str) -> Result<IdentityClaims, IdentityError> {
        let data = decode::<IdentityClaims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::Rejected(err.to_string()),
            }
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(IdentityError::Rejected("empty subject".to_string()));
        }
        Ok(data.claims)
    }
}

/// The caller behind a verified session. `user` is absent until onboarding.
#[derive(Debug, Clone)]
pub struct Principal {
    pub external_id: String,
    pub user: Option<UserRecord>,
}

impl Principal {
    /// The caller's profile, provided onboarding is complete.
    pub fn onboarded(&self) -> Result<&UserRecord, AuthError> {
        match &self.user {
            Some(user) if user.onboarded => Ok(user),
            _ => Err(AuthError::NotOnboarded),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    verifier: Arc<IdentityVerifier>,
    users: Arc<UserService>,
}

impl AuthService {
    pub fn new(verifier: Arc<IdentityVerifier>, users: Arc<UserService>) -> Self {
        Self { verifier, users }
    }

    pub async fn resolve(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Missing)?;

        let claims = self.verifier.verify(token).map_err(|err| {
            debug!(
                target = "threadline::application::identity",
                error = %err,
                "session token rejected"
            );
            match err {
                IdentityError::Expired => AuthError::Expired,
                _ => AuthError::Invalid,
            }
        })?;

        let user = self.users.fetch_user(&claims.sub).await?;
        Ok(Principal {
            external_id: claims.sub,
            user,
        })
    }
}
