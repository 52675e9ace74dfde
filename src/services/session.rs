use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;
use tower_cookies::cookie::time::{Duration, OffsetDateTime};
use tower_cookies::{Cookie, Cookies};

use crate::{
    crypto::{codec::CookieCodec, session_id::generate_session_id},
    error::{AppError, CodecError, Result},
    models::session::{Session, SessionOptions, SessionRecord, SessionState, Values},
    repositories::session::SessionRepository,
};

/// Cookie name used when none is configured.
pub const DEFAULT_SESSION_NAME: &str = "session-name";

/// Sessions already resolved during the current request, keyed by cookie name.
///
/// A fresh registry is inserted into every request by the registry middleware.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Loads, creates, saves and destroys sessions for the request layer.
pub struct SessionManager<R> {
    store: Arc<R>,
    codec: Arc<CookieCodec>,
    defaults: RwLock<SessionOptions>,
}

impl<R: SessionRepository> SessionManager<R> {
    /// Creates a manager. The codec's max age is aligned with `defaults.max_age`.
    pub fn new(store: Arc<R>, codec: Arc<CookieCodec>, defaults: SessionOptions) -> Self {
        codec.set_max_age(defaults.max_age);
        Self {
            store,
            codec,
            defaults: RwLock::new(defaults),
        }
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<CookieCodec> {
        &self.codec
    }

    /// Options copied into every new session.
    pub fn default_options(&self) -> SessionOptions {
        self.defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the default session lifetime and the codec's validity window together.
    pub fn set_max_age(&self, seconds: i64) {
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .max_age = seconds;
        self.codec.set_max_age(seconds);
    }

    /// Restricts the encoded size of cookies and stored session data.
    pub fn set_max_length(&self, bytes: usize) {
        self.codec.set_max_length(bytes);
    }

    /// Returns the session named `name` for this request.
    ///
    /// The first call decodes the cookie and loads the record; later calls in
    /// the same request return the same session. A missing, forged, expired or
    /// unreadable cookie, or a store failure, yields a fresh session.
    pub async fn get(&self, registry: &SessionRegistry, cookies: &Cookies, name: &str) -> Session {
        let mut sessions = registry.sessions.lock().await;
        if let Some(session) = sessions.get(name) {
            return session.clone();
        }

        let session = self.resolve(cookies, name).await;
        sessions.insert(name.to_string(), session.clone());
        session
    }

    /// Returns a brand new session that ignores any existing cookie.
    ///
    /// Used after authentication so the authenticated identity never reuses an
    /// id the client chose or saw beforehand.
    pub async fn new_session(&self, registry: &SessionRegistry, name: &str) -> Session {
        let session = Session::new(name, self.default_options());
        registry
            .sessions
            .lock()
            .await
            .insert(name.to_string(), session.clone());
        session
    }

    /// Persists the session and sets its cookie, or destroys it when its max age is negative.
    pub async fn save(&self, cookies: &Cookies, session: &Session) -> Result<()> {
        let snapshot = session.snapshot().await;

        if snapshot.options.max_age < 0 {
            return self.destroy(cookies, session, &snapshot).await;
        }

        let id = if snapshot.id.is_empty() {
            generate_session_id()
        } else {
            snapshot.id.clone()
        };

        let now = Utc::now();
        let candidate = now + chrono::Duration::seconds(snapshot.options.max_age);
        let expires_on = snapshot
            .expires_on
            .map_or(candidate, |existing| existing.max(candidate));

        let record = SessionRecord {
            key: id.clone(),
            data: self.codec.encode(&snapshot.name, &snapshot.values)?,
            created_on: snapshot.created_on.unwrap_or(now),
            modified_on: now,
            expires_on,
        };
        let encoded_id = self.codec.encode(&snapshot.name, &id)?;

        if snapshot.is_new {
            self.store.insert(&record).await?;
        } else {
            match self.store.update(&record).await {
                Err(AppError::NotFound) => {
                    // Destroyed or swept since it was loaded; never bring it back.
                    tracing::warn!(cookie = %snapshot.name, "Session record gone before update, not saved");
                    session.with_state(reset_to_new).await;
                    return Ok(());
                }
                other => other?,
            }
        }

        session
            .with_state(|state| {
                state.id = id;
                state.is_new = false;
                state.created_on = Some(record.created_on);
                state.expires_on = Some(record.expires_on);
            })
            .await;

        cookies.add(build_cookie(&snapshot.name, encoded_id, &snapshot.options));
        tracing::debug!(cookie = %snapshot.name, "Session saved");
        Ok(())
    }

    async fn destroy(&self, cookies: &Cookies, session: &Session, snapshot: &SessionState) -> Result<()> {
        if !snapshot.id.is_empty() {
            self.store.delete(&snapshot.id).await?;
        }
        session.with_state(reset_to_new).await;

        cookies.add(build_cookie(&snapshot.name, String::new(), &snapshot.options));
        tracing::debug!(cookie = %snapshot.name, "Session destroyed");
        Ok(())
    }

    async fn resolve(&self, cookies: &Cookies, name: &str) -> Session {
        let fresh = || Session::new(name, self.default_options());

        let Some(cookie) = cookies.get(name) else {
            return fresh();
        };

        match self.load(name, cookie.value()).await {
            Ok(state) => Session::from_state(state),
            Err(AppError::Codec(CodecError::InvalidSignature)) => {
                tracing::debug!(cookie = %name, "Session cookie failed verification");
                fresh()
            }
            Err(AppError::NotFound) => {
                tracing::debug!(cookie = %name, "Session record not found");
                fresh()
            }
            Err(e) if e.is_persistence() => {
                tracing::error!(cookie = %name, error = %e, "Unable to load session, starting a new one");
                fresh()
            }
            Err(e) => {
                tracing::warn!(cookie = %name, error = %e, "Unreadable session, starting a new one");
                fresh()
            }
        }
    }

    async fn load(&self, name: &str, cookie_value: &str) -> Result<SessionState> {
        let id: String = self.codec.decode(name, cookie_value)?;
        let record = self.store.load(&id).await?;

        if record.expires_on < Utc::now() {
            return Err(AppError::NotFound);
        }

        let values: Values = self.codec.decode(name, &record.data)?;

        Ok(SessionState {
            name: name.to_string(),
            id,
            values,
            is_new: false,
            options: self.default_options(),
            created_on: Some(record.created_on),
            expires_on: Some(record.expires_on),
        })
    }
}

/// Detaches a handle from its record so a later save starts a new one.
fn reset_to_new(state: &mut SessionState) {
    state.id.clear();
    state.is_new = true;
    state.created_on = None;
    state.expires_on = None;
}

/// Builds the session cookie. A max age of zero or less yields an already expired cookie.
fn build_cookie(name: &str, value: String, options: &SessionOptions) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value);

    cookie.set_path(options.path.clone());
    cookie.set_http_only(options.http_only);
    cookie.set_secure(options.secure);
    cookie.set_same_site(options.same_site);

    if options.max_age > 0 {
        cookie.set_max_age(Duration::seconds(options.max_age));
    } else {
        cookie.set_max_age(Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    }

    cookie
}
