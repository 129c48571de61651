use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

/// Argon2id hashing with a fixed iteration count. Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct PasswordService {
    params: Params,
    /// Verified against when a login names an unknown user, so both paths cost the same.
    dummy_hash: Arc<str>,
}

impl PasswordService {
    pub fn new(cost: u32) -> anyhow::Result<Self> {
        let params = Params::new(Params::DEFAULT_M_COST, cost, Params::DEFAULT_P_COST, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        let mut svc = Self {
            params,
            dummy_hash: Arc::from(""),
        };
        let dummy = svc.hash(&uuid::Uuid::new_v4().to_string())?;
        svc.dummy_hash = Arc::from(dummy);
        Ok(svc)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// A malformed stored hash never matches.
    pub fn verify(&self, plain: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        self.argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    pub async fn hash_blocking(&self, plain: String) -> anyhow::Result<String> {
        let svc = self.clone();
        tokio::task::spawn_blocking(move || svc.hash(&plain))
            .await
            .context("hash task panicked")?
    }

    pub async fn verify_blocking(&self, plain: String, hash: String) -> anyhow::Result<bool> {
        let svc = self.clone();
        tokio::task::spawn_blocking(move || svc.verify(&plain, &hash))
            .await
            .context("verify task panicked")
    }

    /// Spends one verification on a throwaway hash.
    pub async fn verify_dummy(&self, plain: String) -> anyhow::Result<()> {
        let hash = self.dummy_hash.to_string();
        self.verify_blocking(plain, hash).await?;
        Ok(())
    }
}
