//! Registration, login and email activation

use crate::auth::{
    extract_bearer, Credential, SignedToken, SubjectId, TokenScope, MIN_SECRET_LEN,
};
use crate::config::AuthConfig;
use crate::service::{log_storage, AuthError, TokenService, ValidationErrors};
use crate::storage::{NewUser, StorageError, User, UserDirectory};
use std::sync::Arc;
use tracing::{error, info, warn};

const MAX_NAME_LEN: usize = 100;
const MIN_EMAIL_LEN: usize = 5;
const MAX_EMAIL_LEN: usize = 255;

/// A newly registered user and the activation token sent to them
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub activation_token: SignedToken,
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserDirectory>,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserDirectory>, tokens: TokenService) -> Self {
        Self { users, tokens }
    }

    /// Validate and store a new user, then issue and store their activation token.
    ///
    /// The user row is written first. If storing the activation token then
    /// fails, the user exists without a token and the call returns the
    /// storage error; [`AccountService::regenerate_activation_token`] issues
    /// a replacement.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        config: &AuthConfig,
    ) -> Result<Registration, AuthError> {
        let name = name.trim();
        let email = email.trim();

        let mut errors = ValidationErrors::new();
        validate_name(&mut errors, name);
        validate_email(&mut errors, email);
        validate_password(&mut errors, password);
        errors.into_result()?;

        let credential = Credential::hash(password)?;
        let user = self
            .users
            .insert_user(NewUser {
                name: name.to_string(),
                email: email.to_string(),
                credential,
            })
            .await
            .map_err(log_storage(None, "register user"))?;

        let activation_token = self
            .tokens
            .issue(user.id, TokenScope::ActivateEmail, config.token_ttl, config.secret())?;
        if let Err(e) = self.tokens.store(&activation_token).await {
            error!(
                subject = user.id,
                "Registered user has no activation token; regenerate it to recover"
            );
            return Err(e.into());
        }

        info!(subject = user.id, "Registered user");
        Ok(Registration {
            user,
            activation_token,
        })
    }

    /// Check the password and replace every access token with a new one
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        config: &AuthConfig,
    ) -> Result<SignedToken, AuthError> {
        let user = self.check_credentials(email, password).await?;
        let token = self
            .tokens
            .rotate(user.id, TokenScope::UserAccess, config.token_ttl, config.secret())
            .await?;

        info!(subject = user.id, "User logged in");
        Ok(token)
    }

    /// Supersede any outstanding activation token with a fresh one
    pub async fn regenerate_activation_token(
        &self,
        email: &str,
        password: &str,
        config: &AuthConfig,
    ) -> Result<SignedToken, AuthError> {
        let user = self.check_credentials(email, password).await?;
        let token = self
            .tokens
            .rotate(user.id, TokenScope::ActivateEmail, config.token_ttl, config.secret())
            .await?;

        info!(subject = user.id, "Regenerated activation token");
        Ok(token)
    }

    /// Confirm an email address with the activation token from an
    /// `Authorization` header. The token is consumed on success.
    ///
    /// If the user cannot be marked activated after the token was consumed,
    /// the token row is put back so the same link can be retried.
    pub async fn activate_email(
        &self,
        authorization: Option<&str>,
        config: &AuthConfig,
    ) -> Result<SubjectId, AuthError> {
        let token = extract_bearer(authorization)?;
        let secret = config.secret();

        let claims = match self
            .tokens
            .validate_for_scope(token, TokenScope::ActivateEmail, secret)
            .await
        {
            Ok(claims) => claims,
            Err(e) => {
                // Tampered tokens were already discarded by validate
                if e.is_expired() {
                    self.tokens.discard(token).await;
                }
                warn!(error = %e, "Rejected activation token");
                return Err(e.into());
            }
        };

        let subject = self.tokens.extract_subject(token, secret)?;

        let outstanding = self.tokens.list(subject, TokenScope::ActivateEmail).await?;
        if outstanding.is_empty() {
            warn!(subject, "No activation token on record");
            return Err(AuthError::Unauthorized("no activation token found"));
        }

        if !self
            .tokens
            .consume_if_member(subject, TokenScope::ActivateEmail, token)
            .await?
        {
            warn!(subject, "Activation token not on record");
            return Err(AuthError::Unauthorized("invalid token"));
        }

        if let Err(e) = self.users.update_activation_status(subject, true).await {
            let e = log_storage(Some(subject), "activate user")(e);
            self.tokens.reinstate(&claims, token).await;
            return Err(e.into());
        }

        info!(subject, "Activated email");
        Ok(subject)
    }

    /// Change the name and/or email of a user.
    ///
    /// The write carries the version that was read, so a concurrent change
    /// surfaces as a `Conflict`, as does an email another user holds.
    pub async fn update_profile(
        &self,
        subject: SubjectId,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, AuthError> {
        let name = name.map(str::trim);
        let email = email.map(str::trim);

        let mut errors = ValidationErrors::new();
        if let Some(name) = name {
            validate_name(&mut errors, name);
        }
        if let Some(email) = email {
            validate_email(&mut errors, email);
        }
        errors.into_result()?;

        let mut user = self.get(subject).await?;
        if let Some(name) = name {
            user.name = name.to_string();
        }
        if let Some(email) = email {
            user.email = email.to_string();
        }

        let user = self
            .users
            .update(&user)
            .await
            .map_err(log_storage(Some(subject), "update user"))?;

        info!(subject, version = user.version, "Updated profile");
        Ok(user)
    }

    /// Replace the credential and sign the user out everywhere
    pub async fn change_password(
        &self,
        subject: SubjectId,
        current: &str,
        new: &str,
    ) -> Result<User, AuthError> {
        let mut user = self.get(subject).await?;
        if !user.credential.verify(current)? {
            return Err(AuthError::InvalidCredentials);
        }

        user.credential = Credential::hash(new)?;
        let user = self
            .users
            .update(&user)
            .await
            .map_err(log_storage(Some(subject), "change password"))?;
        self.tokens.revoke_all(subject, TokenScope::UserAccess).await?;

        info!(subject, "Changed password");
        Ok(user)
    }

    pub async fn get(&self, subject: SubjectId) -> Result<User, AuthError> {
        Ok(self
            .users
            .get_by_id(subject)
            .await
            .map_err(log_storage(Some(subject), "load user"))?)
    }

    async fn check_credentials(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = match self.users.get_by_email(email.trim()).await {
            Ok(user) => user,
            Err(StorageError::NotFound(_)) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(log_storage(None, "look up user by email")(e).into()),
        };

        if !user.credential.verify(password)? {
            warn!(subject = user.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }
}

fn validate_name(errors: &mut ValidationErrors, name: &str) {
    errors.check(!name.is_empty(), "name", "must be provided");
    errors.check(
        name.chars().count() <= MAX_NAME_LEN,
        "name",
        "must not be more than 100 characters long",
    );
    errors.check(
        name.chars().all(|c| c.is_alphabetic() || c == ' '),
        "name",
        "must contain only letters and spaces",
    );
}

fn validate_email(errors: &mut ValidationErrors, email: &str) {
    let len = email.chars().count();
    errors.check(
        (MIN_EMAIL_LEN..=MAX_EMAIL_LEN).contains(&len),
        "email",
        "must be between 5 and 255 characters long",
    );
    errors.check(is_email(email), "email", "must be a valid email address");
}

fn validate_password(errors: &mut ValidationErrors, password: &str) {
    errors.check(
        password.chars().count() >= MIN_SECRET_LEN,
        "password",
        "must be at least 8 characters long",
    );
}

fn is_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}
