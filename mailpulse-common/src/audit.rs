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

/// What happened. The set mirrors every decision point of the relay the
/// dashboard needs to reconstruct a session.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, strum::EnumIter)]
pub enum AuditAction {
    /// a session presented valid credentials
    AuthSuccess,
    /// a session presented invalid credentials (the details carry the
    /// concrete sub-reason, the wire reply does not)
    AuthFailure,
    /// a message was refused at the quota gate
    QuotaRejected,
    /// a message was durably stored and acknowledged with 250
    MessageAccepted,
    /// the forwarder handed the message to the upstream
    ForwardDelivered,
    /// the forwarder gave up on the message
    ForwardFailed,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::QuotaRejected => "quota_rejected",
            Self::MessageAccepted => "message_accepted",
            Self::ForwardDelivered => "forward_delivered",
            Self::ForwardFailed => "forward_failed",
        })
    }
}

impl std::str::FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth_success" => Ok(Self::AuthSuccess),
            "auth_failure" => Ok(Self::AuthFailure),
            "quota_rejected" => Ok(Self::QuotaRejected),
            "message_accepted" => Ok(Self::MessageAccepted),
            "forward_delivered" => Ok(Self::ForwardDelivered),
            "forward_failed" => Ok(Self::ForwardFailed),
            _ => Err(anyhow::anyhow!("not a valid AuditAction: '{}'", s)),
        }
    }
}

/// One audit trail entry, emitted by the core, consumed externally.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// project involved, when one was identified
    pub project_id: Option<String>,
    /// what happened
    pub action: AuditAction,
    /// remote address of the session
    pub ip: String,
    /// HELO identity the client announced, when known
    pub user_agent: Option<String>,
    /// free-form context (sub-reason, message id, error string, …)
    pub details: Option<serde_json::Value>,
    /// when it happened
    pub created_at: time::OffsetDateTime,
}

impl AuditEvent {
    /// A new event stamped now.
    #[must_use]
    pub fn new(action: AuditAction, ip: impl Into<String>) -> Self {
        Self {
            project_id: None,
            action,
            ip: ip.into(),
            user_agent: None,
            details: None,
            created_at: time::OffsetDateTime::now_utc(),
        }
    }

    /// attach the project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// attach the HELO identity.
    #[must_use]
    pub fn with_user_agent(mut self, helo: impl Into<String>) -> Self {
        self.user_agent = Some(helo.into());
        self
    }

    /// attach free-form context.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
