//! MailPulse persistence layer

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

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

use mailpulse_common::audit::AuditEvent;
use mailpulse_common::message::{EmailRecord, EmailStatus};
use mailpulse_common::project::Project;

mod postgres;

pub use postgres::PgStorage;

/// Errors of the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// the underlying database failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// no email carries this id
    #[error("email not found: {0}")]
    EmailNotFound(String),

    /// no project carries this id
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// a stored secret could not be decrypted
    #[error("secret error: {0}")]
    Secret(anyhow::Error),

    /// a stored row does not round-trip into its domain type
    #[error("malformed row: {0}")]
    MalformedRow(anyhow::Error),
}

/// Result type alias of the persistence layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Read filter of [`Storage::list_emails`].
#[derive(Debug, Clone, Default)]
pub struct EmailQuery {
    /// restrict to one project
    pub project_id: Option<String>,
    /// free-text search over sender, recipients and subject
    pub search: Option<String>,
    /// restrict to one delivery status
    pub status: Option<EmailStatus>,
    /// page size
    pub limit: i64,
    /// page start
    pub offset: i64,
}

/// The two sliding-window counters of a project, derived from the email
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCounts {
    /// emails accepted in the trailing 60 seconds
    pub last_minute: i64,
    /// emails accepted in the trailing 24 hours
    pub last_day: i64,
}

/// Durable state consumed and produced by the relay core.
///
/// Implementations must provide read-your-writes visibility: a returned
/// `store_email` is visible to every subsequent read.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Durably insert one accepted email.
    async fn store_email(&self, email: &EmailRecord) -> Result<()>;

    /// Fetch one email by internal id.
    async fn email_by_id(&self, id: &str) -> Result<EmailRecord>;

    /// Atomically transition the status of one email, incrementing its
    /// attempt counter.
    async fn update_email_status(
        &self,
        id: &str,
        status: EmailStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Page through emails, newest first, with the total match count.
    async fn list_emails(&self, query: &EmailQuery) -> Result<(Vec<EmailRecord>, i64)>;

    /// Derive the sliding-window quota counters of a project from the email
    /// table.
    async fn get_quota_counts(&self, project_id: &str) -> Result<QuotaCounts>;

    /// Fetch one project by id, tombstoned projects included.
    async fn project_by_id(&self, id: &str) -> Result<Project>;

    /// Every non-deleted project, newest first.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Append one audit event.
    async fn record_audit(&self, event: &AuditEvent) -> Result<()>;

    /// Page through audit events, newest first.
    async fn list_audit(
        &self,
        project_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>>;
}
