use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// Argon2id with the crate defaults (19 MiB, 2 passes, 1 lane).
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

/// Produces the PHC string stored in `users.password_hash`.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    hasher()
        .hash_password(plain.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| {
            error!(error = %e, "password hashing failed");
            anyhow::anyhow!("hash password: {e}")
        })
}

/// `Ok(false)` on mismatch. A stored value that is not a PHC string is an
/// error, since it means the users table is damaged.
pub fn verify_password(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let phc = PasswordHash::new(stored).map_err(|e| {
        error!(error = %e, "stored password hash is unreadable");
        anyhow::anyhow!("parse stored hash: {e}")
    })?;
    Ok(hasher().verify_password(plain.as_bytes(), &phc).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_password_verifies_at_login() {
        let stored = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &stored).unwrap());
    }

    #[test]
    fn near_misses_do_not_verify() {
        let stored = hash_password("secret1").unwrap();
        for attempt in ["secret2", "Secret1", "secret1 ", "", "secret"] {
            assert!(!verify_password(attempt, &stored).unwrap(), "{attempt:?}");
        }
    }

    #[test]
    fn same_password_stores_differently() {
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(!a.contains("secret1"));
    }

    #[test]
    fn damaged_stored_hash_is_an_error() {
        let err = verify_password("secret1", "plaintext-by-mistake").unwrap_err();
        assert!(err.to_string().contains("parse stored hash"));
    }
}
