//! Anti-forgery protection using the double-submit cookie pattern

pub mod guard;
pub mod token;

pub use guard::{CsrfGuard, csrf_middleware, is_mutating, validate};
pub use token::{CsrfClaims, IssuedToken, TokenService};
