use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{LoginRequest, SignupRequest},
    password::{hash_password, verify_password},
    proof::{IdentityProofProvider, IssuedProof, ProofTransport},
    repo::UserRepo,
    repo_types::{NewUser, PublicUser},
};
use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

/// A user together with the proof just issued for them.
#[derive(Debug)]
pub struct Authenticated {
    pub user: PublicUser,
    pub proof: IssuedProof,
}

/// Signup, login, logout and profile on top of a user store and a proof provider.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    proofs: Arc<dyn IdentityProofProvider>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepo>, proofs: Arc<dyn IdentityProofProvider>) -> Self {
        Self { users, proofs }
    }

    pub fn transport(&self) -> ProofTransport {
        self.proofs.transport()
    }

    #[instrument(skip_all)]
    pub async fn signup(&self, req: SignupRequest) -> AppResult<Authenticated> {
        let (Some(email), Some(password), Some(name)) =
            (present(req.email), present(req.password), present(req.name))
        else {
            return Err(AppError::validation("Email, password and name are required"));
        };

        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AppError::validation("Invalid email"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::Conflict("Email already exists".into()));
        }

        let password_hash = hash_password(&password)?;
        // a concurrent signup can still lose the race here; the store rejects it
        let user = self
            .users
            .create(NewUser {
                email,
                password_hash,
                name: name.trim().to_string(),
            })
            .await?;

        let proof = self.proofs.issue(user.id).await?;
        info!(user_id = %user.id, "user registered");
        Ok(Authenticated {
            user: user.into(),
            proof,
        })
    }

    #[instrument(skip_all)]
    pub async fn login(&self, req: LoginRequest) -> AppResult<Authenticated> {
        let (Some(email), Some(password)) = (present(req.email), req.password) else {
            return Err(AppError::validation("Email and password are required"));
        };
        let email = normalize_email(&email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!("login unknown email");
            return Err(AppError::invalid_credentials());
        };

        if !verify_password(&password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::invalid_credentials());
        }

        let proof = self.proofs.issue(user.id).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(Authenticated {
            user: user.into(),
            proof,
        })
    }

    /// Revokes the presented proof, if any. Never fails on an unknown proof.
    #[instrument(skip_all)]
    pub async fn logout(&self, proof: Option<&str>) -> AppResult<()> {
        if let Some(proof) = proof {
            self.proofs.revoke(proof).await?;
        }
        info!("user logged out");
        Ok(())
    }

    /// Maps a presented proof onto the user it speaks for.
    pub async fn resolve(&self, proof: &str) -> AppResult<Uuid> {
        self.proofs
            .verify(proof)
            .await?
            .ok_or_else(AppError::not_authenticated)
    }

    #[instrument(skip(self))]
    pub async fn profile(&self, user_id: Uuid) -> AppResult<PublicUser> {
        match self.users.find_by_id(user_id).await? {
            Some(user) => Ok(user.into()),
            None => {
                // valid proof for an account that is gone
                warn!(%user_id, "profile for missing user");
                Err(AppError::not_authenticated())
            }
        }
    }
}
