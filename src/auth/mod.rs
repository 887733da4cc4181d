mod credentials;
mod refresher;

pub use credentials::{Credential, CredentialStore};
pub use refresher::{GcloudRefresher, TokenRefresher};
