use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::fmt;
use std::sync::OnceLock;

/// Plaintext password. `Debug` is redacted so it cannot end up in logs.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Argon2 PHC string as stored on the user row.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Returns `Ok(true)` on match, `Ok(false)` on mismatch, and an error only when
/// the stored hash is malformed.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok())
}

/// Runs a full Argon2 verify against a throwaway hash, so an unknown account
/// costs as much as a wrong password. Always `false`.
pub fn verify_decoy(password: &Password) -> bool {
    static DECOY: OnceLock<Option<PasswordHashString>> = OnceLock::new();
    let decoy = DECOY.get_or_init(|| {
        let secret = crate::utils::generate_random_token();
        hash_password(&Password::new(secret)).ok()
    });
    if let Some(hash) = decoy {
        let _ = verify_password(password, hash);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let password = Password::new("CorrectHorse9");
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(hash.as_str().starts_with("$argon2"));
        assert!(verify_password(&password, &hash).unwrap());
        assert!(!verify_password(&Password::new("WrongHorse9"), &hash).unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let password = Password::new("CorrectHorse9");
        let hash1 = hash_password(&password).unwrap();
        let hash2 = hash_password(&password).unwrap();
        assert_ne!(hash1.as_str(), hash2.as_str());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let result = verify_password(
            &Password::new("anything"),
            &PasswordHashString::new("not-a-phc-string"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_decoy_never_matches() {
        assert!(!verify_decoy(&Password::new("CorrectHorse9")));
        assert!(!verify_decoy(&Password::new("")));
    }

    #[test]
    fn test_debug_is_redacted() {
        let password = Password::new("CorrectHorse9");
        assert!(!format!("{:?}", password).contains("Horse"));
    }
}
