//! Credential provider for render-time platform calls.
//!
//! Scheduled runs have no caller to borrow a token from, so the operator
//! surface seeds one here (the handoff) and every execution asks the provider.
//! A seeded token lives for a TTL; after that, or before any handoff, the
//! token configured through the environment is used instead.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{ReportError, Result};

/// Default environment variable for the fallback service token.
pub const DEFAULT_TOKEN_ENV: &str = "REPORTD_SA_TOKEN";

struct Seeded {
    token: String,
    expires_at: Instant,
}

pub struct CredentialProvider {
    seeded: Mutex<Option<Seeded>>,
    ttl: Duration,
    fallback: Option<String>,
}

impl CredentialProvider {
    pub fn new(fallback: Option<String>, ttl: Duration) -> Self {
        Self {
            seeded: Mutex::new(None),
            ttl,
            fallback: fallback.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Fallback token read once from `var`.
    pub fn from_env(var: &str, ttl: Duration) -> Self {
        Self::new(std::env::var(var).ok(), ttl)
    }

    /// Seed (or refresh) the handoff token.
    pub fn seed(&self, token: impl Into<String>) {
        let token = token.into();
        if token.trim().is_empty() {
            tracing::warn!("⚠️ Ignoring empty credential handoff");
            return;
        }
        let mut slot = self.seeded.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Seeded {
            token,
            expires_at: Instant::now() + self.ttl,
        });
        tracing::info!("🔑 Credential handoff received (valid {}s)", self.ttl.as_secs());
    }

    /// Current token: live handoff first, then the environment fallback.
    pub fn token(&self) -> Result<String> {
        {
            let mut slot = self.seeded.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(s) if Instant::now() < s.expires_at => return Ok(s.token.clone()),
                Some(_) => {
                    tracing::debug!("Handoff token expired, using fallback");
                    *slot = None;
                }
                None => {}
            }
        }
        self.fallback.clone().ok_or_else(|| {
            ReportError::MissingCredential(
                "no handoff token and no fallback service token configured".into(),
            )
        })
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_token_wins() {
        let provider = CredentialProvider::new(Some("env-token".into()), Duration::from_secs(3600));
        assert_eq!(provider.token().unwrap(), "env-token");
        provider.seed("handoff");
        assert_eq!(provider.token().unwrap(), "handoff");
        provider.seed("refreshed");
        assert_eq!(provider.token().unwrap(), "refreshed");
    }

    #[test]
    fn test_expired_handoff_falls_back() {
        let provider = CredentialProvider::new(Some("env-token".into()), Duration::ZERO);
        provider.seed("handoff");
        assert_eq!(provider.token().unwrap(), "env-token");
    }

    #[test]
    fn test_missing_everything() {
        let provider = CredentialProvider::new(Some("  ".into()), Duration::from_secs(60));
        assert!(!provider.has_fallback());
        assert!(matches!(
            provider.token(),
            Err(ReportError::MissingCredential(_))
        ));
    }
}
