//! Camera permission authority
//!
//! The session controller never manages permission state; the scanning flow
//! asks an authority before configuring the camera.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Camera authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    /// Blocked by policy; the user cannot change it
    Restricted,
    #[default]
    NotDetermined,
}

/// Source of camera authorization
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    /// Current status without prompting
    async fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask for access; `true` if access is granted
    ///
    /// Authorized returns `true` and Denied/Restricted return `false`
    /// without asking again.
    async fn request_permission(&self) -> bool;
}

/// Permission derived from access rights on a device node
pub struct DeviceNodePermissions {
    path: PathBuf,
}

impl DeviceNodePermissions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self) -> AuthorizationStatus {
        let status = match access(&self.path, AccessFlags::R_OK | AccessFlags::W_OK) {
            Ok(()) => AuthorizationStatus::Authorized,
            Err(errno) => status_from_errno(errno),
        };
        debug!("Access to {}: {:?}", self.path.display(), status);
        status
    }
}

/// Map an `access(2)` failure to an authorization status
pub fn status_from_errno(errno: Errno) -> AuthorizationStatus {
    match errno {
        Errno::EACCES => AuthorizationStatus::Denied,
        Errno::EPERM | Errno::EROFS => AuthorizationStatus::Restricted,
        _ => AuthorizationStatus::NotDetermined,
    }
}

#[async_trait]
impl PermissionAuthority for DeviceNodePermissions {
    async fn authorization_status(&self) -> AuthorizationStatus {
        self.check()
    }

    async fn request_permission(&self) -> bool {
        match self.check() {
            AuthorizationStatus::Authorized => true,
            AuthorizationStatus::NotDetermined => {
                // Nothing to prompt on Linux; the node may have appeared since
                info!("Camera node {} not present", self.path.display());
                false
            }
            _ => false,
        }
    }
}

/// Fixed permission answers
///
/// A request while `NotDetermined` resolves to `Authorized` or `Denied`
/// according to `grant_on_request`, like a user answering a prompt.
pub struct StaticPermissions {
    status: Mutex<AuthorizationStatus>,
    grant_on_request: bool,
}

impl StaticPermissions {
    pub fn new(status: AuthorizationStatus, grant_on_request: bool) -> Self {
        Self {
            status: Mutex::new(status),
            grant_on_request,
        }
    }

    /// Already authorized
    pub fn granted() -> Self {
        Self::new(AuthorizationStatus::Authorized, true)
    }

    pub fn set_status(&self, status: AuthorizationStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl PermissionAuthority for StaticPermissions {
    async fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock()
    }

    async fn request_permission(&self) -> bool {
        let mut status = self.status.lock();
        match *status {
            AuthorizationStatus::Authorized => true,
            AuthorizationStatus::NotDetermined => {
                *status = if self.grant_on_request {
                    AuthorizationStatus::Authorized
                } else {
                    AuthorizationStatus::Denied
                };
                self.grant_on_request
            }
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => false,
        }
    }
}
