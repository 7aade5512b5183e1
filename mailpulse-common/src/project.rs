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

/// prefix of every API key handed out by the admin surface.
pub const API_KEY_PREFIX: &str = "mp_live_";

/// default per-minute sending quota of a new project.
pub const DEFAULT_QUOTA_PER_MINUTE: i64 = 10;

/// default 24-hour sending quota of a new project.
pub const DEFAULT_QUOTA_DAILY: i64 = 500;

/// Lifecycle status of a project.
///
/// Only `active` projects may authenticate; `deleted` is a tombstone, rows
/// are never physically removed.
#[allow(clippy::module_name_repetitions)]
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(try_from = "String")]
#[serde(into = "String")]
pub enum ProjectStatus {
    /// may authenticate and send
    Active,
    /// kept, but refused at authentication and at the DATA gate
    Inactive,
    /// tombstoned by the admin surface
    Deleted,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Deleted => "deleted",
        })
    }
}

impl From<ProjectStatus> for String {
    fn from(status: ProjectStatus) -> Self {
        format!("{status}")
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "deleted" => Ok(Self::Deleted),
            _ => Err(anyhow::anyhow!("not a valid ProjectStatus: '{}'", s)),
        }
    }
}

impl TryFrom<String> for ProjectStatus {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
    }
}

/// Upstream smart-host coordinates of a project, all fields present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// smart-host fqdn
    pub host: String,
    /// submission port, 587 when the project does not specify one
    pub port: u16,
    /// username at the smart-host
    pub user: String,
    /// AES-256-GCM encrypted password, base64
    pub password_enc: String,
}

/// default submission port of an upstream smart-host.
pub const UPSTREAM_DEFAULT_PORT: u16 = 587;

/// The tenant unit: credentials, quotas and upstream configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// stable opaque identifier
    pub id: String,
    /// human name
    pub name: String,
    /// the SMTP username, `mp_live_…` (decrypted from storage)
    pub api_key: String,
    /// bcrypt hash of the lowercased SMTP password
    pub password_hash: Option<String>,
    /// upstream smart-host fqdn
    pub smtp_host: Option<String>,
    /// upstream submission port
    pub smtp_port: Option<u16>,
    /// upstream username
    pub smtp_user: Option<String>,
    /// upstream password, AES-256-GCM encrypted, base64
    pub smtp_password_enc: Option<String>,
    /// messages allowed in any trailing 24-hour window
    pub quota_daily: i64,
    /// messages allowed in any trailing 60-second window
    pub quota_per_minute: i64,
    /// lifecycle status
    pub status: ProjectStatus,
    /// creation time
    pub created_at: time::OffsetDateTime,
    /// last successful authentication
    pub last_used_at: Option<time::OffsetDateTime>,
}

impl Project {
    /// The upstream coordinates, when the project is fully configured for
    /// real forwarding. Partial configuration counts as absent, which puts
    /// the forwarder in simulation mode.
    #[must_use]
    pub fn upstream(&self) -> Option<UpstreamConfig> {
        match (&self.smtp_host, &self.smtp_user, &self.smtp_password_enc) {
            (Some(host), Some(user), Some(password_enc))
                if !host.is_empty() && !user.is_empty() && !password_enc.is_empty() =>
            {
                Some(UpstreamConfig {
                    host: host.clone(),
                    port: self.smtp_port.unwrap_or(UPSTREAM_DEFAULT_PORT),
                    user: user.clone(),
                    password_enc: password_enc.clone(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn project() -> Project {
        Project {
            id: "prj_1".to_string(),
            name: "test".to_string(),
            api_key: format!("{API_KEY_PREFIX}abc"),
            password_hash: None,
            smtp_host: None,
            smtp_port: None,
            smtp_user: None,
            smtp_password_enc: None,
            quota_daily: DEFAULT_QUOTA_DAILY,
            quota_per_minute: DEFAULT_QUOTA_PER_MINUTE,
            status: ProjectStatus::Active,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
            last_used_at: None,
        }
    }

    #[test]
    fn status_round_trip() {
        for s in <ProjectStatus as strum::IntoEnumIterator>::iter() {
            assert_eq!(ProjectStatus::from_str(&format!("{s}")).unwrap(), s);
        }
        assert!(ProjectStatus::from_str("archived").is_err());
    }

    #[test]
    fn upstream_requires_all_fields() {
        let mut p = project();
        assert_eq!(p.upstream(), None);

        p.smtp_host = Some("smtp.example.com".to_string());
        p.smtp_user = Some("relay@example.com".to_string());
        assert_eq!(p.upstream(), None);

        p.smtp_password_enc = Some("AAAA".to_string());
        let upstream = p.upstream().unwrap();
        assert_eq!(upstream.port, UPSTREAM_DEFAULT_PORT);

        p.smtp_port = Some(2525);
        assert_eq!(p.upstream().unwrap().port, 2525);
    }
}
