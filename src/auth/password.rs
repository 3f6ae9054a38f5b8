use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::{error, warn};

lazy_static! {
    /// Stand-in hash verified against when no account matches, so a missing
    /// user costs the same argon2 work as a wrong password.
    static ref DUMMY_HASH: String = hash_password("userbase-absent-account").unwrap_or_default();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "argon2 parse hash error");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Verifies against the stored hash, or the dummy hash when there is none.
pub fn verify_password_or_dummy(plain: &str, hash: Option<&str>) -> bool {
    match hash {
        Some(hash) => verify_password(plain, hash),
        None => {
            verify_password(plain, &DUMMY_HASH);
            false
        }
    }
}

/// Short digest of a stored hash. Changes whenever the password does.
pub fn credential_fingerprint(hash: &str) -> String {
    let digest = format!("{:x}", md5::compute(hash.as_bytes()));
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn same_password_gets_fresh_salt() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("same", &a));
        assert!(verify_password("same", &b));
    }

    #[test]
    fn dummy_hash_is_a_real_argon2_hash() {
        let parsed = PasswordHash::new(&DUMMY_HASH).expect("dummy hash parses");
        assert_eq!(parsed.algorithm, argon2::Algorithm::Argon2id.ident());
        assert!(!verify_password_or_dummy("userbase-absent-account", None));
        assert!(!verify_password_or_dummy("anything", None));
    }

    #[test]
    fn verify_or_dummy_uses_stored_hash_when_present() {
        let hash = hash_password("pw").unwrap();
        assert!(verify_password_or_dummy("pw", Some(&hash)));
        assert!(!verify_password_or_dummy("other", Some(&hash)));
    }

    #[test]
    fn absent_account_costs_a_full_verification() {
        let hash = hash_password("pw").unwrap();
        verify_password_or_dummy("warm", None);

        let start = std::time::Instant::now();
        for _ in 0..3 {
            verify_password_or_dummy("wrong", Some(&hash));
        }
        let known = start.elapsed();

        let start = std::time::Instant::now();
        for _ in 0..3 {
            verify_password_or_dummy("wrong", None);
        }
        let absent = start.elapsed();

        assert!(absent * 4 >= known, "absent={absent:?} known={known:?}");
    }

    #[test]
    fn fingerprint_tracks_the_hash() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_eq!(credential_fingerprint(&a), credential_fingerprint(&a));
        assert_ne!(credential_fingerprint(&a), credential_fingerprint(&b));
        assert_eq!(credential_fingerprint(&a).len(), 16);
    }

    #[test]
    fn verify_is_false_on_malformed_hash() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
        assert!(!verify_password("anything", ""));
    }
}
