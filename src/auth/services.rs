use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, PasswordRecoveryRequest, ProfileUpdate, RegisterRequest,
            TokenRequest,
        },
        password::{
            check_password, hash_password, make_random_password, RANDOM_PASSWORD_LEN,
        },
        tokens::TokenStore,
    },
    error::{ApiError, ApiResult, FieldErrors},
    mail::{recovery::recovery_mail, Mailer},
    users::{
        mask_email, normalize_email, DuplicateEmail, NewUser, ProfileChanges, User, UserStore,
    },
};

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";
pub const EMAIL_TAKEN: &str = "user with this email already exists.";
pub const BAD_CREDENTIALS: &str = "Unable to authenticate with provided credentials.";
pub const WRONG_PASSWORD: &str = "Wrong password.";
pub const PASSWORDS_DIFFER: &str = "Passwords do not match.";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Records "required"/"blank" errors and passes the value through when present.
fn required(errors: &mut FieldErrors, field: &str, value: Option<String>) -> Option<String> {
    match value {
        None => {
            errors.add(field, REQUIRED);
            None
        }
        Some(v) if v.trim().is_empty() => {
            errors.add(field, BLANK);
            None
        }
        Some(v) => Some(v),
    }
}

fn check_email(errors: &mut FieldErrors, field: &str, email: Option<String>) -> Option<String> {
    let email = normalize_email(&required(errors, field, email)?);
    if is_valid_email(&email) {
        Some(email)
    } else {
        errors.add(field, INVALID_EMAIL);
        None
    }
}

/// A concurrent insert can still win the unique index after the lookup above.
fn email_conflict(e: anyhow::Error) -> ApiError {
    if e.is::<DuplicateEmail>() {
        ApiError::field("email", EMAIL_TAKEN)
    } else {
        ApiError::Internal(e)
    }
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str, min: usize) -> bool {
    if value.chars().count() < min {
        errors.add(field, &format!("Ensure this field has at least {min} characters."));
        return false;
    }
    true
}

pub async fn register(
    users: &dyn UserStore,
    min_password_length: usize,
    req: RegisterRequest,
) -> ApiResult<User> {
    let mut errors = FieldErrors::new();
    let email = check_email(&mut errors, "email", req.email);
    let password = required(&mut errors, "password", req.password)
        .filter(|pw| check_length(&mut errors, "password", pw, min_password_length));
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::Validation(errors));
    };

    if users.find_by_email(&email).await?.is_some() {
        warn!(email = %mask_email(&email), "email already registered");
        return Err(ApiError::field("email", EMAIL_TAKEN));
    }

    let user = users
        .create(NewUser {
            email,
            password_hash: hash_password(&password)?,
            first_name: req.first_name.unwrap_or_default(),
            last_name: req.last_name.unwrap_or_default(),
        })
        .await
        .map_err(email_conflict)?;
    info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Unknown email, wrong password and inactive account all give the same error.
pub async fn issue_token(
    users: &dyn UserStore,
    tokens: &dyn TokenStore,
    req: TokenRequest,
) -> ApiResult<String> {
    let mut errors = FieldErrors::new();
    let email = required(&mut errors, "email", req.email);
    let password = required(&mut errors, "password", req.password);
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::Validation(errors));
    };
    let email = normalize_email(&email);

    let Some(user) = users.find_by_email(&email).await? else {
        warn!(email = %mask_email(&email), "login unknown email");
        return Err(ApiError::field("non_field_errors", BAD_CREDENTIALS));
    };
    if !user.is_active || !check_password(&user, &password)? {
        warn!(user_id = %user.id, "login rejected");
        return Err(ApiError::field("non_field_errors", BAD_CREDENTIALS));
    }

    let token = tokens.get_or_create(user.id).await?;
    info!(user_id = %user.id, "token issued");
    Ok(token)
}

pub async fn update_profile(
    users: &dyn UserStore,
    min_password_length: usize,
    user: &User,
    req: ProfileUpdate,
) -> ApiResult<User> {
    let mut errors = FieldErrors::new();
    let email = match req.email {
        Some(email) => check_email(&mut errors, "email", Some(email)),
        None => None,
    };
    let password = match req.password {
        Some(pw) => required(&mut errors, "password", Some(pw))
            .filter(|pw| check_length(&mut errors, "password", pw, min_password_length)),
        None => None,
    };
    errors.into_result()?;

    if let Some(email) = email.as_deref().filter(|e| *e != user.email) {
        if users.find_by_email(email).await?.is_some() {
            return Err(ApiError::field("email", EMAIL_TAKEN));
        }
    }

    let changes = ProfileChanges {
        email,
        first_name: req.first_name,
        last_name: req.last_name,
        password_hash: password.as_deref().map(hash_password).transpose()?,
    };
    if changes.is_empty() {
        return Ok(user.clone());
    }

    let updated = users
        .update_profile(user.id, changes)
        .await
        .map_err(email_conflict)?;
    info!(user_id = %user.id, "profile updated");
    Ok(updated)
}

/// Old password is checked before the new pair, so a wrong old password wins.
pub async fn change_password(
    users: &dyn UserStore,
    user: &User,
    req: ChangePasswordRequest,
) -> ApiResult<()> {
    let mut errors = FieldErrors::new();
    let old = required(&mut errors, "old_password", req.old_password);
    let new = required(&mut errors, "new_password", req.new_password);
    let new2 = required(&mut errors, "new_password2", req.new_password2);
    let (Some(old), Some(new), Some(new2)) = (old, new, new2) else {
        return Err(ApiError::Validation(errors));
    };

    if !check_password(user, &old)? {
        warn!(user_id = %user.id, "password change with wrong old password");
        return Err(ApiError::field("old_password", WRONG_PASSWORD));
    }
    if new != new2 {
        return Err(ApiError::field("new_password", PASSWORDS_DIFFER));
    }

    users.set_password_hash(user.id, &hash_password(&new)?).await?;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

/// Mails a new password to a registered address. Unknown addresses succeed
/// silently. The new password is stored only after the mailer accepts the mail.
pub async fn recover_password(
    users: &dyn UserStore,
    mailer: &dyn Mailer,
    app_name: &str,
    from: &str,
    req: PasswordRecoveryRequest,
) -> ApiResult<()> {
    let mut errors = FieldErrors::new();
    let email = check_email(&mut errors, "email", req.email);
    let Some(email) = email else {
        return Err(ApiError::Validation(errors));
    };

    let Some(user) = users.find_by_email(&email).await? else {
        debug!(email = %mask_email(&email), "password recovery for unknown email");
        return Ok(());
    };

    let new_password = make_random_password(RANDOM_PASSWORD_LEN);
    let new_hash = hash_password(&new_password)?;
    mailer
        .send(&recovery_mail(app_name, from, &user.email, &new_password))
        .await?;

    users.set_password_hash(user.id, &new_hash).await?;
    info!(user_id = %user.id, "password reset by recovery mail");
    Ok(())
}
