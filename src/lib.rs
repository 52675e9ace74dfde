//! PostgreSQL-backed HTTP sessions: a signed and optionally encrypted cookie
//! codec with key rotation, a session record store, a background expiry
//! sweeper and CSRF protection, wired into an axum router.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod codec;
    pub mod csrf;
    pub mod session_id;
}

pub mod models {
    pub mod session;
}

pub mod repositories {
    pub mod backend;
    pub mod memory;
    pub mod session;
}

pub mod services {
    pub mod csrf;
    pub mod password;
    pub mod session;
    pub mod sweeper;
}

pub mod handlers {
    pub mod auth;
    pub mod cart;
    pub mod response;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod csrf;
    pub mod session;
}

pub mod validation {
    pub mod auth;
}
