/*
 * MailPulse SMTP relay
 * Copyright (C) 2024 MailPulse
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use mailpulse_common::project::{Project, ProjectStatus};
use mailpulse_config::log_channel::AUTH;
use mailpulse_store::Storage;

/// Why a credential pair was refused.
///
/// The session surfaces every variant as the same `535` to avoid user
/// enumeration; the audit trail records [`CredentialError::reason`].
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// the username matches no known API key
    #[error("unknown api key")]
    UnknownUser,

    /// the password does not match the stored hash
    #[error("invalid password")]
    InvalidPassword,

    /// credentials match but the project is not active
    #[error("project is not active")]
    NotActive,

    /// the verification task could not run
    #[error("verification failed: {0}")]
    Internal(String),
}

impl CredentialError {
    /// stable identifier recorded in the audit trail.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::UnknownUser => "unknown_user",
            Self::InvalidPassword => "invalid_password",
            Self::NotActive => "project_not_active",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// In-memory snapshot of the active credentials, swapped atomically on
/// [`CredentialStore::reload`]. Readers clone the current pointer and never
/// block the writer.
pub struct CredentialStore {
    storage: std::sync::Arc<dyn Storage>,
    snapshot: arc_swap::ArcSwap<std::collections::HashMap<String, Project>>,
}

impl CredentialStore {
    /// An empty store; call [`CredentialStore::reload`] to populate it.
    #[must_use]
    pub fn new(storage: std::sync::Arc<dyn Storage>) -> Self {
        Self {
            storage,
            snapshot: arc_swap::ArcSwap::from_pointee(std::collections::HashMap::new()),
        }
    }

    /// Rebuild the snapshot from the project table. The new snapshot is
    /// visible to every subsequent lookup once this returns.
    ///
    /// # Errors
    ///
    /// * the project table cannot be read
    pub async fn reload(&self) -> Result<(), mailpulse_store::Error> {
        let projects = self.storage.list_projects().await?;
        let count = projects.len();

        let snapshot = projects
            .into_iter()
            .map(|project| (project.api_key.to_lowercase(), project))
            .collect::<std::collections::HashMap<_, _>>();

        self.snapshot.store(std::sync::Arc::new(snapshot));

        log::info!(target: AUTH, "credential snapshot reloaded, {count} projects");
        Ok(())
    }

    /// Verify a credential pair against the snapshot.
    ///
    /// The API key lookup is case-insensitive and the password is lowercased
    /// before the bcrypt comparison: SMTP gateways are known to upper-case
    /// credentials in transit. A project without a stored hash authenticates
    /// on the API key alone.
    ///
    /// # Errors
    ///
    /// * [`CredentialError`], with the sub-reason for the audit trail
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Project, CredentialError> {
        let snapshot = self.snapshot.load_full();

        let project = snapshot
            .get(&username.to_lowercase())
            .ok_or(CredentialError::UnknownUser)?;

        if let Some(hash) = project.password_hash.clone() {
            let password = password.to_lowercase();
            let valid =
                tokio::task::spawn_blocking(move || pwhash::bcrypt::verify(password, &hash))
                    .await
                    .map_err(|e| CredentialError::Internal(e.to_string()))?;

            if !valid {
                return Err(CredentialError::InvalidPassword);
            }
        }

        if project.status != ProjectStatus::Active {
            return Err(CredentialError::NotActive);
        }

        Ok(project.clone())
    }

    /// number of projects in the current snapshot.
    #[must_use]
    pub fn project_count(&self) -> usize {
        self.snapshot.load().len()
    }
}
