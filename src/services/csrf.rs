use http::Method;
use sonic_rs::JsonValueTrait;

use crate::{
    crypto::csrf::{generate_csrf_token, tokens_match},
    error::CsrfError,
    models::session::Session,
};

/// Session value key holding the CSRF token.
pub const CSRF_TOKEN_KEY: &str = "csrf_token";
/// Request header carrying the token.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Form field carrying the token when the header is absent.
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// The session's token after a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub token: String,
    /// Whether the token was generated by this check and still needs saving.
    pub fresh: bool,
}

/// Methods that never change server state and so need no token.
pub fn is_safe_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD || method == Method::OPTIONS
}

/// Returns the session's token, generating and storing one if it has none.
///
/// An existing token is never replaced, so a form rendered before a save
/// still validates when it is submitted.
pub async fn ensure_token(session: &Session) -> CsrfToken {
    session
        .with_state(|state| {
            if let Some(token) = state.values.get(CSRF_TOKEN_KEY).and_then(|v| v.as_str()) {
                return CsrfToken {
                    token: token.to_string(),
                    fresh: false,
                };
            }

            let token = generate_csrf_token();
            state.values.insert(
                CSRF_TOKEN_KEY.to_string(),
                sonic_rs::Value::from(token.as_str()),
            );
            CsrfToken { token, fresh: true }
        })
        .await
}

/// Checks a request against the session's token.
///
/// Safe methods always pass; unsafe methods must present a token equal to the
/// stored one. The token is ensured in both cases.
pub async fn validate(
    session: &Session,
    presented: Option<&str>,
    method: &Method,
) -> Result<CsrfToken, CsrfError> {
    let token = ensure_token(session).await;

    if is_safe_method(method) {
        return Ok(token);
    }

    match presented {
        None | Some("") => Err(CsrfError::Missing),
        Some(presented) if tokens_match(&token.token, presented) => Ok(token),
        Some(_) => Err(CsrfError::Mismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionOptions;

    fn session() -> Session {
        Session::new("session-name", SessionOptions::default())
    }

    #[tokio::test]
    async fn token_is_generated_once() {
        let session = session();
        let first = ensure_token(&session).await;
        let second = ensure_token(&session).await;

        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.token, second.token);
        assert_eq!(
            session.get::<String>(CSRF_TOKEN_KEY).await.as_deref(),
            Some(first.token.as_str())
        );
    }

    #[tokio::test]
    async fn safe_methods_pass_without_token() {
        let session = session();
        let checked = validate(&session, None, &Method::GET).await.unwrap();
        assert!(checked.fresh);
        assert!(session.contains(CSRF_TOKEN_KEY).await);

        assert!(validate(&session, None, &Method::HEAD).await.is_ok());
        assert!(validate(&session, Some("junk"), &Method::OPTIONS).await.is_ok());
    }

    #[tokio::test]
    async fn unsafe_methods_require_matching_token() {
        let session = session();
        let token = ensure_token(&session).await.token;

        assert_eq!(
            validate(&session, None, &Method::POST).await,
            Err(CsrfError::Missing)
        );
        assert_eq!(
            validate(&session, Some(""), &Method::DELETE).await,
            Err(CsrfError::Missing)
        );
        assert_eq!(
            validate(&session, Some("wrong"), &Method::POST).await,
            Err(CsrfError::Mismatch)
        );

        let ok = validate(&session, Some(&token), &Method::PUT).await.unwrap();
        assert_eq!(ok.token, token);
        assert!(!ok.fresh);
    }
}
