//! RPC credentials shared by the launch flags and every RPC call

use super::config::CoinProfile;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Length of generated usernames and passwords
pub const GENERATED_LEN: usize = 32;

/// RPC username/password pair for one coin
///
/// Created once per coin activation and never replaced while the process
/// runs, so a daemon launched with these flags always accepts our calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Random alphanumeric credentials
    pub fn generate() -> Self {
        Self {
            user: random_string(GENERATED_LEN),
            password: random_string(GENERATED_LEN),
        }
    }

    /// Use the profile's fixed credentials when both halves are set,
    /// otherwise generate fresh ones
    pub fn for_profile(profile: &CoinProfile) -> Self {
        match (&profile.rpc_user, &profile.rpc_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Self::new(user.clone(), password.clone())
            }
            _ => Self::generate(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
