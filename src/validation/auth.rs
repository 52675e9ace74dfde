use serde::Deserialize;

use crate::error::{AppError, FieldError, Result};

/// The login form, posted as `application/x-www-form-urlencoded`.
#[derive(Deserialize, Debug, Default)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn check_username(username: &str, errors: &mut Vec<FieldError>) {
    if username.is_empty() {
        errors.push(FieldError::new("username", "Username is required"));
        return;
    }

    if username.len() < 3 {
        errors.push(FieldError::new(
            "username",
            "Username must be at least 3 characters long",
        ));
    } else if username.len() > 255 {
        errors.push(FieldError::new(
            "username",
            "Username must be at most 255 characters",
        ));
    }

    if !username.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        errors.push(FieldError::new(
            "username",
            "Username can only contain letters, numbers, underscores, and hyphens",
        ));
    }
}

fn check_password(password: &str, errors: &mut Vec<FieldError>) {
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else if password.len() < 8 {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters long",
        ));
    } else if password.len() > 128 {
        errors.push(FieldError::new(
            "password",
            "Password must be at most 128 characters",
        ));
    }
}

/// Returns every problem with the login form, in field order.
pub fn login_form_errors(form: &LoginForm) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_username(&form.username, &mut errors);
    check_password(&form.password, &mut errors);
    errors
}

/// Validates a login form.
pub fn validate_login_form(form: &LoginForm) -> Result<()> {
    let errors = login_form_errors(form);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(username: &str, password: &str) -> LoginForm {
        LoginForm {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn accepts_valid_form() {
        assert!(validate_login_form(&form("alice_01", "hunter2hunter2")).is_ok());
    }

    #[test]
    fn reports_every_field() {
        let errors = login_form_errors(&form("", "short"));
        assert_eq!(
            errors,
            vec![
                FieldError::new("username", "Username is required"),
                FieldError::new("password", "Password must be at least 8 characters long"),
            ]
        );
    }

    #[test]
    fn username_rules() {
        let errors = login_form_errors(&form("a!", "longenough"));
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["username", "username"]);

        let errors = login_form_errors(&form(&"x".repeat(256), "longenough"));
        assert_eq!(errors[0].reason, "Username must be at most 255 characters");
    }
}
