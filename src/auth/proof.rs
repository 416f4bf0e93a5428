use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Where a client carries its identity proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofTransport {
    /// `Authorization: Bearer <proof>`
    BearerHeader,
    /// A cookie holding an opaque session id.
    Cookie,
}

/// A freshly minted proof, ready to hand to the client.
#[derive(Debug, Clone)]
pub struct IssuedProof {
    pub value: String,
    pub expires_at: OffsetDateTime,
}

/// Issues and checks "this request acts as user U until T" credentials.
///
/// Exactly one implementation is active per deployment; proofs from one are
/// meaningless to the other.
#[async_trait]
pub trait IdentityProofProvider: Send + Sync {
    fn transport(&self) -> ProofTransport;

    async fn issue(&self, user_id: Uuid) -> anyhow::Result<IssuedProof>;

    /// `Ok(None)` for any proof that is malformed, forged, unknown or expired.
    async fn verify(&self, proof: &str) -> anyhow::Result<Option<Uuid>>;

    /// Invalidates the proof where the mechanism allows it. Idempotent.
    async fn revoke(&self, proof: &str) -> anyhow::Result<()>;
}
