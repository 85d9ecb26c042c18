//! Optional write access for a third party.

use std::sync::Arc;
use tracing::{info, warn};

use driveup_common::{CancellationGate, Result};
use driveup_storage::{DriveApi, PermissionGrant};

/// What happened when sharing one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    /// No address configured.
    NotRequested,
    /// Write access granted.
    Granted,
    /// The grant failed; the upload itself still counts.
    Failed(String),
}

/// Grants write access to every uploaded item when an address is set.
pub struct SharingPolicy {
    api: Arc<dyn DriveApi>,
    email: Option<String>,
}

impl SharingPolicy {
    /// Share with `email`, or do nothing when it is `None`.
    pub fn new(api: Arc<dyn DriveApi>, email: Option<&str>) -> Self {
        Self {
            api,
            email: email.map(str::to_string),
        }
    }

    /// Grant write access to `item_id` without a notification mail.
    ///
    /// Remote failures are logged and returned as [`ShareOutcome::Failed`];
    /// only cancellation is an error.
    pub async fn share(&self, item_id: &str, gate: &CancellationGate) -> Result<ShareOutcome> {
        let email = match &self.email {
            Some(email) => email,
            None => return Ok(ShareOutcome::NotRequested),
        };

        gate.check(format!("sharing {}", item_id))?;
        match self
            .api
            .grant_permission(item_id, &PermissionGrant::writer(email.as_str()))
            .await
        {
            Ok(()) => {
                info!("Shared {} with {}", item_id, email);
                Ok(ShareOutcome::Granted)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!("Could not share {} with {}: {}", item_id, email, e);
                Ok(ShareOutcome::Failed(e.to_string()))
            }
        }
    }
}
