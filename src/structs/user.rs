use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::client::RequestOptions;
use super::session::Session;
use super::{User, UserRole};
use crate::errors::TouristError;

/// Sign-up data for `Users::register()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl NewUser {
    pub fn new(email: &str, password: &str, role: UserRole) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            role,
            first_name: None,
            last_name: None,
            phone: None,
        }
    }

    /// Applies the same rules the API enforces, so obvious mistakes never
    /// make a round trip.
    pub fn validate(&self) -> Result<(), TouristError> {
        let email = self.email.trim();
        let valid_email = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
            None => false,
        };
        if !valid_email {
            return Err(TouristError::Validation("Invalid email address".to_string()));
        }

        validate_password(&self.password)?;

        if let Some(phone) = &self.phone {
            validate_phone(phone)?;
        }

        Ok(())
    }
}

/// At least 8 characters with an uppercase letter, a lowercase letter and a digit.
pub fn validate_password(password: &str) -> Result<(), TouristError> {
    let rule = |ok: bool, message: &str| {
        if ok {
            Ok(())
        } else {
            Err(TouristError::Validation(message.to_string()))
        }
    };

    rule(
        password.chars().count() >= 8,
        "Password must be at least 8 characters long",
    )?;
    rule(
        password.chars().any(char::is_uppercase),
        "Password must contain at least one uppercase letter",
    )?;
    rule(
        password.chars().any(char::is_lowercase),
        "Password must contain at least one lowercase letter",
    )?;
    rule(
        password.chars().any(|c| c.is_ascii_digit()),
        "Password must contain at least one digit",
    )
}

/// Digits and `+` only once spaces, dashes and parentheses are stripped; 10 characters minimum.
pub fn validate_phone(phone: &str) -> Result<(), TouristError> {
    let cleaned = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect::<String>();

    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '+')
        || !cleaned.chars().any(|c| c.is_ascii_digit())
    {
        return Err(TouristError::Validation(
            "Phone number must contain only digits and + symbol".to_string(),
        ));
    }

    if cleaned.len() < 10 {
        return Err(TouristError::Validation(
            "Phone number must be at least 10 digits".to_string(),
        ));
    }

    Ok(())
}

/// Changes to the signed-in user's own account. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl UserUpdate {
    pub fn validate(&self) -> Result<(), TouristError> {
        match &self.phone {
            Some(phone) => validate_phone(phone),
            None => Ok(()),
        }
    }
}

/// What an account verification confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Email,
    Phone,
    Identity,
}

impl Verification {
    fn path(self) -> &'static str {
        match self {
            Verification::Email => "email",
            Verification::Phone => "phone",
            Verification::Identity => "identity",
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: String,
}

/// Account endpoints. Sign-up is anonymous; everything else needs a session.
#[derive(Debug, Clone)]
pub struct Users {
    session: Arc<Session>,
}

impl Users {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn authed<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, TouristError> {
        self.session.require_token()?;
        self.session.request_json(endpoint, options)
    }

    /// Creates an account via `POST /users/`. Does not log in.
    pub fn register(&self, user: &NewUser) -> Result<User, TouristError> {
        user.validate()?;

        let created = self.session.api().request_json::<User>(
            "/users/",
            RequestOptions::post(user)?,
            None,
        )?;

        log::info!("registered user {} as {:?}", created.id, created.role);
        Ok(created)
    }

    /// The signed-in user's account, from `GET /users/me`.
    pub fn me(&self) -> Result<User, TouristError> {
        self.authed("/users/me", RequestOptions::get())
    }

    /// Updates the signed-in user's name or phone via `PUT /users/me`.
    ///
    /// The session's cached user is replaced with the server's answer.
    pub fn update_me(&self, update: &UserUpdate) -> Result<User, TouristError> {
        update.validate()?;

        let user: User = self.authed("/users/me", RequestOptions::put(update)?)?;
        self.session.replace_user(&user);

        Ok(user)
    }

    /// Any user by id, from `GET /users/{user_id}`.
    pub fn user(&self, user_id: i64) -> Result<User, TouristError> {
        self.authed(&format!("/users/{}", user_id), RequestOptions::get())
    }

    /// Marks one of a user's verification flags via `POST /users/verify/{kind}/{user_id}`.
    /// Returns the server's confirmation message.
    pub fn verify(&self, user_id: i64, kind: Verification) -> Result<String, TouristError> {
        let response: MessageResponse = self.authed(
            &format!("/users/verify/{}/{}", kind.path(), user_id),
            RequestOptions::empty(Method::POST),
        )?;

        log::info!("user {} {} verified", user_id, kind.path());
        Ok(response.message)
    }

    /// Soft-deletes an account via `DELETE /users/{user_id}`.
    pub fn deactivate(&self, user_id: i64) -> Result<String, TouristError> {
        let response: MessageResponse =
            self.authed(&format!("/users/{}", user_id), RequestOptions::delete())?;

        log::info!("user {} deactivated", user_id);
        Ok(response.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules() {
        assert!(validate_password("Passw0rd").is_ok());

        let message = |pw: &str| validate_password(pw).unwrap_err().to_string();
        assert_eq!(message("Pa0"), "Password must be at least 8 characters long");
        assert_eq!(message("password1"), "Password must contain at least one uppercase letter");
        assert_eq!(message("PASSWORD1"), "Password must contain at least one lowercase letter");
        assert_eq!(message("Password"), "Password must contain at least one digit");
    }

    #[test]
    fn phone_rules() {
        assert!(validate_phone("+81 (90) 1234-5678").is_ok());
        assert!(validate_phone("0901234567").is_ok());
        assert!(validate_phone("090-123").is_err());
        assert!(validate_phone("call me maybe").is_err());
    }

    #[test]
    fn email_must_look_like_one() {
        assert!(NewUser::new("a@b.com", "Passw0rd", UserRole::Tourist).validate().is_ok());
        assert!(NewUser::new("ab.com", "Passw0rd", UserRole::Tourist).validate().is_err());
        assert!(NewUser::new("@b.com", "Passw0rd", UserRole::Tourist).validate().is_err());
        assert!(NewUser::new("a@localhost", "Passw0rd", UserRole::Tourist).validate().is_err());
    }

    #[test]
    fn account_update_checks_the_phone() {
        assert!(UserUpdate::default().validate().is_ok());

        let update = UserUpdate {
            phone: Some("12-34".to_string()),
            ..UserUpdate::default()
        };
        assert_eq!(
            update.validate().unwrap_err().to_string(),
            "Phone number must be at least 10 digits"
        );
    }

    #[test]
    fn optional_fields_are_omitted() {
        let user = NewUser::new("a@b.com", "Passw0rd", UserRole::Guide);
        let json = serde_json::to_value(&user).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"email": "a@b.com", "password": "Passw0rd", "role": "guide"})
        );
    }
}
