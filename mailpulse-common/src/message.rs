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

/// Delivery status of a persisted email.
///
/// Transitions are monotonically forward, except for the operator-initiated
/// resend (`failed`/`queued` back to `queued`).
#[allow(clippy::module_name_repetitions)]
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(try_from = "String")]
#[serde(into = "String")]
pub enum EmailStatus {
    /// stored, not yet handed to the forwarder
    Processed,
    /// waiting for a (re)forward attempt
    Queued,
    /// the upstream accepted the message
    Delivered,
    /// the last forward attempt failed
    Failed,
    /// the upstream bounced the message
    Bounced,
}

impl std::fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Processed => "processed",
            Self::Queued => "queued",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
        })
    }
}

impl From<EmailStatus> for String {
    fn from(status: EmailStatus) -> Self {
        format!("{status}")
    }
}

impl std::str::FromStr for EmailStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "queued" => Ok(Self::Queued),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "bounced" => Ok(Self::Bounced),
            _ => Err(anyhow::anyhow!("not a valid EmailStatus: '{}'", s)),
        }
    }
}

impl TryFrom<String> for EmailStatus {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
    }
}

/// One accepted email, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailRecord {
    /// internal id, `email_{unix nanoseconds}`
    pub id: String,
    /// globally unique Message-ID, `{unix nanoseconds}@{hostname}`
    pub message_id: String,
    /// owning project
    pub project_id: String,
    /// envelope sender
    pub from: String,
    /// envelope recipients, RCPT TO order preserved
    pub to: Vec<String>,
    /// Subject header extracted from the content
    pub subject: String,
    /// raw bytes as received, headers + body, no terminating `.` line
    pub content: Vec<u8>,
    /// byte length of `content`
    pub size: i64,
    /// delivery status
    pub status: EmailStatus,
    /// error of the last failed forward attempt
    pub error: Option<String>,
    /// number of forward attempts, starts at 1
    pub attempts: i32,
    /// when the message was accepted
    pub sent_at: time::OffsetDateTime,
    /// tracking: first open
    pub opened_at: Option<time::OffsetDateTime>,
    /// tracking: first click
    pub clicked_at: Option<time::OffsetDateTime>,
    /// free-form metadata
    pub metadata: Option<serde_json::Value>,
}

/// Extract the Subject header from a raw RFC-822 message.
///
/// Only the header section (up to the first empty line) is examined; the
/// header name comparison is case-insensitive. Messages without one yield
/// `"No Subject"`.
#[must_use]
pub fn parse_subject(raw: &str) -> String {
    for line in raw.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some(prefix) = line.get(..8) {
            if prefix.eq_ignore_ascii_case("subject:") {
                return line[8..].trim().to_string();
            }
        }
    }
    "No Subject".to_string()
}
