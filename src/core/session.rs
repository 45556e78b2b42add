use std::path::PathBuf;

use anyhow::Context;

use crate::error::SessionError;

use super::token::{self, Claims, Permission};

/// Persisted bearer token, a single file holding the raw token text.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// A store that holds nothing; sessions opened from it are unrestricted.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn load(&self) -> anyhow::Result<Option<String>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        match std::fs::read_to_string(path) {
            Ok(text) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_owned()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read token {}", path.display())),
        }
    }

    pub fn store(&self, token: &str) -> anyhow::Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No token file configured"))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, token.trim())
            .with_context(|| format!("Failed to write token {}", path.display()))?;
        log::info!("Stored token in {}", path.display());
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => log::info!("Removed token {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Authenticated operator context, opened when a protected surface is entered.
#[derive(Debug, Clone)]
pub struct Session {
    token: Option<String>,
    claims: Option<Claims>,
    enforced: bool,
}

impl Session {
    /// Reads the stored token and validates it.
    ///
    /// With a disabled store the session is unrestricted.
    pub fn open(store: &TokenStore) -> Result<Self, SessionError> {
        if !store.is_enabled() {
            return Ok(Self::unrestricted());
        }

        let token = store.load().unwrap_or_else(|e| {
            log::warn!("Could not read token: {:#}", e);
            None
        });

        Self::from_token(token)
    }

    pub fn from_token(token: Option<String>) -> Result<Self, SessionError> {
        if !token::is_valid(token.as_deref()) {
            return Err(SessionError::NotAuthorized);
        }

        let claims = token.as_deref().and_then(token::decode_claims);
        Ok(Self {
            token,
            claims,
            enforced: true,
        })
    }

    /// An enforced session without a token; every check fails.
    pub fn denied() -> Self {
        Self {
            token: None,
            claims: None,
            enforced: true,
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            token: None,
            claims: None,
            enforced: false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    /// Re-checks expiry, for long-running sessions.
    pub fn check(&self) -> Result<(), SessionError> {
        if self.enforced && !token::is_valid(self.token.as_deref()) {
            return Err(SessionError::NotAuthorized);
        }
        Ok(())
    }

    pub fn require(&self, permission: Permission) -> Result<(), SessionError> {
        self.check()?;
        if !self.enforced {
            return Ok(());
        }

        match &self.claims {
            Some(claims) if claims.grants(permission) => Ok(()),
            _ => Err(SessionError::MissingPermission(permission.name())),
        }
    }
}
