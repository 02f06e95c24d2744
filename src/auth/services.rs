use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{AuthResponse, PublicUser, RegisterRequest, SetPasswordRequest},
    jwt::JwtKeys,
    password::{hash_password, verify_password, PASSWORD_MAX_LENGTH, PASSWORD_MIN_LENGTH},
    repo_types::{NewUser, Role, User},
};
use crate::{
    error::{AppError, AppResult, FieldError},
    store::{DuplicateEmail, Store},
};

pub const EMAIL_MIN_LENGTH: usize = 5;
pub const EMAIL_MAX_LENGTH: usize = 50;
pub const NAME_MIN_LENGTH: usize = 2;
pub const NAME_MAX_LENGTH: usize = 50;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    (EMAIL_MIN_LENGTH..=EMAIL_MAX_LENGTH).contains(&email.len()) && EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_phone(phone: &str) -> bool {
    lazy_static! {
        static ref PHONE_RE: Regex = Regex::new(r"^[0-9+\- ]{9,15}$").unwrap();
    }
    PHONE_RE.is_match(phone)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trim optional text; blank becomes `None`.
pub(crate) fn clean(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Shared checks for the profile fields every identity may carry.
pub(crate) fn check_profile(
    prefix: &str,
    first_name: &Option<String>,
    last_name: &Option<String>,
    middle_name: &Option<String>,
    phone_number: &Option<String>,
    errors: &mut Vec<FieldError>,
) {
    for (name, value) in [
        ("first_name", first_name),
        ("last_name", last_name),
        ("middle_name", middle_name),
    ] {
        let Some(len) = value.as_ref().map(|v| v.chars().count()) else {
            continue;
        };
        if !(NAME_MIN_LENGTH..=NAME_MAX_LENGTH).contains(&len) {
            errors.push(FieldError::new(
                format!("{prefix}{name}"),
                format!("must be {NAME_MIN_LENGTH} to {NAME_MAX_LENGTH} characters"),
            ));
        }
    }
    if phone_number.as_deref().is_some_and(|p| !is_valid_phone(p)) {
        errors.push(FieldError::new(
            format!("{prefix}phone_number"),
            "must be 9 to 15 digits, spaces, '+' or '-'",
        ));
    }
}

fn check_password(field: &str, password: &str, errors: &mut Vec<FieldError>) {
    let len = password.chars().count();
    if len < PASSWORD_MIN_LENGTH {
        errors.push(FieldError::new(field, "password too short"));
    }
    if len > PASSWORD_MAX_LENGTH {
        errors.push(FieldError::new(field, "password too long"));
    }
}

/// An insert that lost a unique-email race reads as a duplicate registration.
pub(crate) fn email_taken(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<DuplicateEmail>() {
        Some(dup) => {
            warn!(email = %dup.0, "email already registered");
            AppError::Conflict("Email already registered".into())
        }
        None => AppError::Internal(err),
    }
}

pub fn issue_tokens(keys: &JwtKeys, user: User) -> AppResult<AuthResponse> {
    Ok(AuthResponse {
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id)?,
        user: PublicUser::from(user),
    })
}

pub async fn register(store: &dyn Store, req: RegisterRequest) -> AppResult<User> {
    let email = normalize_email(&req.email);
    let first_name = clean(req.first_name);
    let last_name = clean(req.last_name);
    let middle_name = clean(req.middle_name);
    let phone_number = clean(req.phone_number);

    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "invalid email"));
    }
    check_password("password", &req.password, &mut errors);
    if req.role == Role::Admin {
        errors.push(FieldError::new("role", "must be client or specialist"));
    }
    check_profile(
        "",
        &first_name,
        &last_name,
        &middle_name,
        &phone_number,
        &mut errors,
    );
    if !errors.is_empty() {
        warn!(email = %email, "registration rejected");
        return Err(AppError::Validation(errors));
    }

    if store.find_user_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let user = store
        .create_user(NewUser {
            email,
            password_hash: hash_password(&req.password)?,
            first_name,
            last_name,
            middle_name,
            phone_number,
            role: req.role,
        })
        .await
        .map_err(email_taken)?;

    info!(user_id = %user.id, email = %user.email, role = %user.role, "user registered");
    Ok(user)
}

/// Check credentials; unknown email, wrong password and deactivated
/// accounts are indistinguishable to the caller.
pub async fn authenticate(store: &dyn Store, email: &str, password: &str) -> AppResult<User> {
    let email = normalize_email(email);
    let invalid = || AppError::Unauthorized("Invalid credentials".into());

    let Some(user) = store.find_user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(invalid());
    };
    if !verify_password(password, &user.password_hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(invalid());
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login for deactivated user");
        return Err(invalid());
    }

    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

pub async fn refresh(store: &dyn Store, keys: &JwtKeys, token: &str) -> AppResult<AuthResponse> {
    let claims = keys
        .verify_refresh(token)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;
    let user = active_user(store, claims.sub).await?;
    issue_tokens(keys, user)
}

pub async fn active_user(store: &dyn Store, id: Uuid) -> AppResult<User> {
    match store.find_user(id).await? {
        Some(u) if u.is_active => Ok(u),
        _ => Err(AppError::Unauthorized("User not found".into())),
    }
}

pub async fn deactivate(store: &dyn Store, user: &User) -> AppResult<()> {
    if !store.deactivate_user(user.id).await? {
        return Err(AppError::NotFound);
    }
    info!(user_id = %user.id, "user deactivated");
    Ok(())
}

pub async fn set_password(store: &dyn Store, user: &User, req: SetPasswordRequest) -> AppResult<()> {
    let mut errors = Vec::new();
    if !verify_password(&req.current_password, &user.password_hash)? {
        errors.push(FieldError::new("current_password", "invalid password"));
    }
    check_password("new_password", &req.new_password, &mut errors);
    if !errors.is_empty() {
        warn!(user_id = %user.id, "password change rejected");
        return Err(AppError::Validation(errors));
    }

    if !store
        .set_password_hash(user.id, &hash_password(&req.new_password)?)
        .await?
    {
        return Err(AppError::NotFound);
    }
    info!(user_id = %user.id, "password changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(email: &str, role: Role) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "long-enough-pw".into(),
            role,
            first_name: Some("  Ann ".into()),
            last_name: None,
            middle_name: Some("   ".into()),
            phone_number: None,
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@x.com"));
        assert!(!is_valid_email(&format!("{}@x.com", "a".repeat(60))));
    }

    #[test]
    fn phone_validation() {
        assert!(is_valid_phone("+7 900 123-45"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("phone-number!"));
    }

    #[tokio::test]
    async fn register_normalizes_and_cleans() {
        let store = MemoryStore::new();
        let user = register(&store, request("  Ann@Example.COM ", Role::Client))
            .await
            .unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.first_name.as_deref(), Some("Ann"));
        assert_eq!(user.middle_name, None);
        assert_eq!(user.role, Role::Client);
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_admins() {
        let store = MemoryStore::new();
        register(&store, request("x@y.com", Role::Specialist))
            .await
            .unwrap();

        let dup = register(&store, request("X@y.com", Role::Client)).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));

        let admin = register(&store, request("root@y.com", Role::Admin)).await;
        match admin {
            Err(AppError::Validation(fields)) => assert_eq!(fields[0].field, "role"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deactivated_users_cannot_log_in() {
        let store = MemoryStore::new();
        let user = register(&store, request("gone@y.com", Role::Client))
            .await
            .unwrap();
        assert!(authenticate(&store, "gone@y.com", "long-enough-pw").await.is_ok());
        assert!(matches!(
            authenticate(&store, "gone@y.com", "wrong-password").await,
            Err(AppError::Unauthorized(_))
        ));

        deactivate(&store, &user).await.unwrap();
        assert!(matches!(
            authenticate(&store, "gone@y.com", "long-enough-pw").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(active_user(&store, user.id).await.is_err());
    }

    #[tokio::test]
    async fn set_password_swaps_credentials() {
        let store = MemoryStore::new();
        let user = register(&store, request("pw@y.com", Role::Client))
            .await
            .unwrap();

        let bad = set_password(
            &store,
            &user,
            SetPasswordRequest {
                current_password: "not-the-password".into(),
                new_password: "short".into(),
            },
        )
        .await;
        match bad {
            Err(AppError::Validation(fields)) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, vec!["current_password", "new_password"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(authenticate(&store, "pw@y.com", "long-enough-pw").await.is_ok());

        set_password(
            &store,
            &user,
            SetPasswordRequest {
                current_password: "long-enough-pw".into(),
                new_password: "brand-new-secret".into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            authenticate(&store, "pw@y.com", "long-enough-pw").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(authenticate(&store, "pw@y.com", "brand-new-secret").await.is_ok());
    }

    #[test]
    fn lost_email_race_is_a_conflict() {
        let err = email_taken(DuplicateEmail("a@x.com".into()).into());
        assert!(matches!(err, AppError::Conflict(_)));

        let err = email_taken(anyhow::anyhow!("connection reset"));
        assert!(matches!(err, AppError::Internal(_)));
    }
}
