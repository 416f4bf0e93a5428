use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    claims::Claims,
    proof::{IdentityProofProvider, IssuedProof, ProofTransport},
};
use crate::config::JwtConfig;

/// Stateless bearer tokens signed with HS256.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<(String, OffsetDateTime)> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok((token, exp))
    }

    /// Checks signature, expiry, issuer and audience.
    pub fn verify_claims(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityProofProvider for JwtKeys {
    fn transport(&self) -> ProofTransport {
        ProofTransport::BearerHeader
    }

    async fn issue(&self, user_id: Uuid) -> anyhow::Result<IssuedProof> {
        let (value, expires_at) = self.sign(user_id)?;
        Ok(IssuedProof { value, expires_at })
    }

    async fn verify(&self, proof: &str) -> anyhow::Result<Option<Uuid>> {
        match self.verify_claims(proof) {
            Ok(claims) => Ok(Some(claims.sub)),
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                Ok(None)
            }
        }
    }

    async fn revoke(&self, _proof: &str) -> anyhow::Result<()> {
        // Nothing server-side to forget; the token lives until `exp`.
        debug!("jwt revoke requested; client must discard the token");
        Ok(())
    }
}
