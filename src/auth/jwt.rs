use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRef;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, AccessIdentity, RefreshClaims, TokenKind};
use crate::{config::JwtConfig, state::AppState};

/// Why a presented token was rejected. Callers collapse all of these into one
/// unauthorized outcome; the kind is only for logs and tests.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::ImmatureSignature => TokenError::SignatureInvalid,
            _ => TokenError::Malformed,
        }
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Signing and verification keys for both token kinds. Each kind has its own secret.
#[derive(Clone)]
pub struct JwtKeys {
    access: KeyPair,
    refresh: KeyPair,
    pub issuer: String,
    pub audience: String,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access: KeyPair::new(&cfg.access_secret, cfg.access_ttl),
            refresh: KeyPair::new(&cfg.refresh_secret, cfg.refresh_ttl),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    /// Returns `(iat, exp)` for a token minted now.
    fn window(ttl: Duration) -> anyhow::Result<(usize, usize)> {
        let now = OffsetDateTime::now_utc();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(TimeDuration::seconds(secs)))
            .with_context(|| format!("token ttl of {}s is out of range", ttl.as_secs()))?;
        Ok((now.unix_timestamp() as usize, exp.unix_timestamp() as usize))
    }

    pub fn sign_access(&self, who: AccessIdentity<'_>) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.access.ttl)?;
        let claims = AccessClaims {
            sub: who.id,
            username: who.username.to_owned(),
            email: who.email.to_owned(),
            full_name: who.full_name.to_owned(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &self.access.encoding)?;
        debug!(user_id = %who.id, kind = ?TokenKind::Access, "jwt signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.refresh.ttl)?;
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &self.refresh.encoding)?;
        debug!(user_id = %user_id, kind = ?TokenKind::Refresh, "jwt signed");
        Ok(token)
    }

    fn decode_with<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<T>(token, key, &validation)?;
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode_with(token, &self.access.decoding)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::Malformed);
        }
        debug!(user_id = %claims.sub, "access jwt verified");
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode_with(token, &self.refresh.decoding)?;
        if claims.kind != TokenKind::Refresh {
            return Err(TokenError::Malformed);
        }
        debug!(user_id = %claims.sub, "refresh jwt verified");
        Ok(claims)
    }
}
