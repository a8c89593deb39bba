//! User registration and credential verification.
//!
//! # Security
//! - Passwords hashed with Argon2, never stored or logged in clear text
//! - Failed logins are logged but the response never says whether the
//!   username or the password was wrong

use crate::db::{first_of_next_month, Database, User};
use crate::error::{ApiError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use tracing::{info, warn};

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct Authenticator {
    db: Database,
    default_api_calls_limit: i64,
}

impl Authenticator {
    pub fn new(db: Database, default_api_calls_limit: i64) -> Self {
        Self {
            db,
            default_api_calls_limit,
        }
    }

    /// Hash password with Argon2
    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))?;

        Ok(password_hash.to_string())
    }

    fn verify_password(stored_hash: &str, password: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(stored_hash) else {
            return false;
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    /// Create a new user account. The username is unique across all tenants;
    /// the quota counter starts at zero with the reset date on the first day
    /// of next month.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<User> {
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::BadRequest(
                "Username and password are required".to_string(),
            ));
        }

        if username.len() < MIN_USERNAME_LEN {
            return Err(ApiError::BadRequest(format!(
                "Username must be at least {} characters long",
                MIN_USERNAME_LEN
            )));
        }

        if password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }

        if self.db.find_user_by_username(username).await?.is_some() {
            return Err(ApiError::Conflict("Username already exists".to_string()));
        }

        let password_hash = self.hash_password(password)?;
        let reset_date = first_of_next_month(Utc::now().date_naive()).to_string();

        let id = self
            .db
            .insert_user(
                username,
                &password_hash,
                email,
                self.default_api_calls_limit,
                &reset_date,
            )
            .await?;

        info!("New user registered: {} (id {})", username, id);

        self.db
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| ApiError::Internal("User vanished after insert".to_string()))
    }

    /// Verify login credentials. Both unknown-user and wrong-password paths
    /// produce the same error.
    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::BadRequest(
                "Username and password are required".to_string(),
            ));
        }

        let Some(user) = self.db.find_user_by_username(username).await? else {
            warn!("Failed login attempt - unknown user: {}", username);
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        };

        if !Self::verify_password(&user.password_hash, password) {
            warn!("Failed login attempt - invalid password for {}", username);
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }

        info!("User logged in: {} (id {})", user.username, user.id);
        Ok(user)
    }
}
