//! Service layer module

pub mod authenticator;
pub mod fetcher;

pub use authenticator::{AuthRequest, AuthSettings, Authenticator, Decision};
pub use fetcher::ReferenceFetcher;
