use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{rngs::OsRng, seq::SliceRandom};
use tracing::error;

use crate::users::User;

/// Alphabet for generated passwords; look-alike characters (i, l, o, I, O, 0, 1) left out.
const RANDOM_PASSWORD_CHARS: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const RANDOM_PASSWORD_LEN: usize = 10;

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

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Hash-based comparison against the user's stored password.
pub fn check_password(user: &User, plain: &str) -> anyhow::Result<bool> {
    verify_password(plain, &user.password_hash)
}

pub fn make_random_password(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .filter_map(|_| RANDOM_PASSWORD_CHARS.choose(&mut rng))
        .map(|&b| b as char)
        .collect()
}
