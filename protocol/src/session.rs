//! # Login Session
//!
//! While logged in, the client holds signing-capable key material in memory.
//! That state is time-boxed: [`AUTO_LOGOUT`](crate::config::AUTO_LOGOUT)
//! (777 s) after login the material is zeroized and dropped, and anything
//! that needs it fails with [`SessionError::LoggedOut`].
//!
//! Expiry is enforced in two places. The maintenance task calls
//! [`Session::enforce_expiry`] every tick, which scrubs as soon as the TTL
//! passes. [`Session::require`] checks again on access, so a request racing
//! the tick still never sees stale material.
//!
//! Deriving the address from the material is the wallet's job. The caller
//! hands both in.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;
use zeroize::{Zeroize, Zeroizing};

use crate::codec::Address;
use crate::config::AUTO_LOGOUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in")]
    LoggedOut,

    /// Returned by [`Session::enforce_expiry`] when it scrubs a login.
    #[error("login expired")]
    Expired,

    #[error("key material is empty")]
    EmptyMaterial,
}

/// Signing key material (a WIF string, a raw key). Zeroized on drop.
#[derive(Clone, Zeroize)]
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
        }
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<String> for KeyMaterial {
    fn from(mut s: String) -> Self {
        let out = Self::new(s.as_bytes());
        s.zeroize();
        out
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(***)")
    }
}

struct Login {
    material: KeyMaterial,
    address: Address,
    at: Instant,
}

/// Public view of the current login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginStatus {
    pub address: Address,
    /// Seconds until auto-logout.
    pub expires_in: u64,
}

pub struct Session {
    login: Mutex<Option<Login>>,
    ttl: Duration,
}

impl Session {
    pub fn new() -> Self {
        Self::with_ttl(AUTO_LOGOUT)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            login: Mutex::new(None),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replaces any current login.
    pub fn login(
        &self,
        material: KeyMaterial,
        address: Address,
    ) -> Result<LoginStatus, SessionError> {
        if material.is_empty() {
            return Err(SessionError::EmptyMaterial);
        }
        let mut slot = self.login.lock();
        if let Some(mut old) = slot.take() {
            old.material.zeroize();
        }
        info!(%address, ttl_secs = self.ttl.as_secs(), "logged in");
        *slot = Some(Login {
            material,
            address: address.clone(),
            at: Instant::now(),
        });
        Ok(LoginStatus {
            address,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Scrubs the key material. Returns whether anyone was logged in.
    pub fn logout(&self) -> bool {
        let mut slot = self.login.lock();
        match slot.take() {
            Some(mut login) => {
                login.material.zeroize();
                info!(address = %login.address, "logged out");
                true
            }
            None => false,
        }
    }

    fn expired(&self, login: &Login, now: Instant) -> bool {
        now.duration_since(login.at) >= self.ttl
    }

    /// Drops the login if its TTL has run out. `Err(Expired)` means this call
    /// did the scrubbing.
    pub fn enforce_expiry(&self) -> Result<(), SessionError> {
        let mut slot = self.login.lock();
        let now = Instant::now();
        if slot.as_ref().is_some_and(|l| self.expired(l, now)) {
            if let Some(mut login) = slot.take() {
                login.material.zeroize();
                info!(address = %login.address, "login expired, key material scrubbed");
            }
            return Err(SessionError::Expired);
        }
        Ok(())
    }

    /// Status of a live login, for signing-dependent operations.
    pub fn require(&self) -> Result<LoginStatus, SessionError> {
        self.with_material(|_| ())
            .and_then(|_| self.status().ok_or(SessionError::LoggedOut))
    }

    /// Runs `f` with the key material of a live login.
    pub fn with_material<R>(&self, f: impl FnOnce(&KeyMaterial) -> R) -> Result<R, SessionError> {
        let mut slot = self.login.lock();
        let now = Instant::now();
        if slot.as_ref().is_some_and(|l| self.expired(l, now)) {
            if let Some(mut login) = slot.take() {
                login.material.zeroize();
            }
        }
        match slot.as_ref() {
            Some(login) => Ok(f(&login.material)),
            None => Err(SessionError::LoggedOut),
        }
    }

    /// Address of a live login.
    pub fn address(&self) -> Result<Address, SessionError> {
        self.require().map(|s| s.address)
    }

    /// Current login, if any and not yet expired.
    pub fn status(&self) -> Option<LoginStatus> {
        let slot = self.login.lock();
        let login = slot.as_ref()?;
        let elapsed = Instant::now().duration_since(login.at);
        let remaining = self.ttl.checked_sub(elapsed).filter(|d| !d.is_zero())?;
        Some(LoginStatus {
            address: login.address.clone(),
            expires_in: remaining.as_secs(),
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
