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
use std::str::FromStr;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use mailpulse_common::audit::{AuditAction, AuditEvent};
use mailpulse_common::crypto::EncryptionKey;
use mailpulse_common::message::{EmailRecord, EmailStatus};
use mailpulse_common::project::{Project, ProjectStatus};

use crate::{EmailQuery, Error, QuotaCounts, Result, Storage};

mod log_channels {
    pub const STORE: &str = "store";
}

const EMAIL_COLUMNS: &str = "e.id, e.message_id, e.project_id, e.from_email, e.to_emails, \
     e.subject, e.content_enc, e.size, e.status, e.error_msg, e.attempts, e.sent_at, \
     e.opened_at, e.clicked_at, e.metadata";

/// PostgreSQL-backed [`Storage`].
///
/// API keys are stored encrypted (`api_key_enc`); the pool decrypts them on
/// read so callers always see the plaintext lookup key.
pub struct PgStorage {
    pool: sqlx::PgPool,
    key: EncryptionKey,
}

impl PgStorage {
    /// Connect and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// * the DSN is unreachable
    /// * the schema cannot be created
    pub async fn connect(database_url: &str, key: EncryptionKey) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .connect(database_url)
            .await?;

        let storage = Self { pool, key };
        storage.init_tables().await?;

        log::info!(target: log_channels::STORE, "database connection established");
        Ok(storage)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key_enc TEXT NOT NULL,
                password_hash TEXT,
                smtp_host TEXT,
                smtp_port INTEGER,
                smtp_user TEXT,
                smtp_password_enc TEXT,
                quota_daily BIGINT NOT NULL DEFAULT 500,
                quota_per_minute BIGINT NOT NULL DEFAULT 10,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_used_at TIMESTAMPTZ
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL UNIQUE,
                project_id TEXT NOT NULL REFERENCES projects(id),
                from_email TEXT NOT NULL,
                to_emails TEXT[] NOT NULL,
                subject TEXT NOT NULL,
                content_enc BYTEA NOT NULL,
                size BIGINT NOT NULL,
                status TEXT NOT NULL,
                error_msg TEXT,
                attempts INTEGER NOT NULL DEFAULT 1,
                sent_at TIMESTAMPTZ NOT NULL,
                opened_at TIMESTAMPTZ,
                clicked_at TIMESTAMPTZ,
                metadata JSONB
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // the quota interval scans and the dashboard listing both walk this
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS emails_project_sent_at_idx \
             ON emails (project_id, sent_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id BIGSERIAL PRIMARY KEY,
                project_id TEXT,
                action TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                details JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_email(row: &PgRow) -> Result<EmailRecord> {
        Ok(EmailRecord {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            project_id: row.try_get("project_id")?,
            from: row.try_get("from_email")?,
            to: row.try_get("to_emails")?,
            subject: row.try_get("subject")?,
            content: row.try_get("content_enc")?,
            size: row.try_get("size")?,
            status: EmailStatus::from_str(row.try_get::<&str, _>("status")?)
                .map_err(Error::MalformedRow)?,
            error: row.try_get("error_msg")?,
            attempts: row.try_get("attempts")?,
            sent_at: row.try_get("sent_at")?,
            opened_at: row.try_get("opened_at")?,
            clicked_at: row.try_get("clicked_at")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn row_to_project(&self, row: &PgRow) -> Result<Project> {
        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            api_key: self
                .key
                .decrypt(row.try_get("api_key_enc")?)
                .map_err(Error::Secret)?,
            password_hash: row.try_get("password_hash")?,
            smtp_host: row.try_get("smtp_host")?,
            smtp_port: row
                .try_get::<Option<i32>, _>("smtp_port")?
                .and_then(|port| u16::try_from(port).ok()),
            smtp_user: row.try_get("smtp_user")?,
            smtp_password_enc: row.try_get("smtp_password_enc")?,
            quota_daily: row.try_get("quota_daily")?,
            quota_per_minute: row.try_get("quota_per_minute")?,
            status: ProjectStatus::from_str(row.try_get::<&str, _>("status")?)
                .map_err(Error::MalformedRow)?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }

    fn push_email_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a EmailQuery) {
        if let Some(project_id) = &query.project_id {
            builder.push(" AND e.project_id = ");
            builder.push_bind(project_id);
        }
        if let Some(search) = &query.search {
            let pattern = format!("%{search}%");
            builder.push(" AND (e.from_email ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR e.subject ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR array_to_string(e.to_emails, ',') ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        if let Some(status) = query.status {
            builder.push(" AND e.status = ");
            builder.push_bind(status.to_string());
        }
    }
}

#[async_trait::async_trait]
impl Storage for PgStorage {
    async fn store_email(&self, email: &EmailRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO emails (id, message_id, project_id, from_email, to_emails, subject,
                                content_enc, size, status, error_msg, attempts, sent_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(&email.id)
        .bind(&email.message_id)
        .bind(&email.project_id)
        .bind(&email.from)
        .bind(&email.to)
        .bind(&email.subject)
        .bind(&email.content)
        .bind(email.size)
        .bind(email.status.to_string())
        .bind(&email.error)
        .bind(email.attempts)
        .bind(email.sent_at)
        .bind(&email.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn email_by_id(&self, id: &str) -> Result<EmailRecord> {
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails e WHERE e.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::EmailNotFound(id.to_string()))?;

        Self::row_to_email(&row)
    }

    async fn update_email_status(
        &self,
        id: &str,
        status: EmailStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE emails SET status = $1, error_msg = $2, attempts = attempts + 1 \
             WHERE id = $3",
        )
        .bind(status.to_string())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::EmailNotFound(id.to_string()));
        }

        log::debug!(
            target: log_channels::STORE,
            "email '{id}' transitioned to '{status}'"
        );
        Ok(())
    }

    async fn list_emails(&self, query: &EmailQuery) -> Result<(Vec<EmailRecord>, i64)> {
        let mut count_builder = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM emails e \
             INNER JOIN projects p ON e.project_id = p.id \
             WHERE p.status != 'deleted'",
        );
        Self::push_email_filters(&mut count_builder, query);
        let total: i64 = count_builder.build().fetch_one(&self.pool).await?.get(0);

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EMAIL_COLUMNS} FROM emails e \
             INNER JOIN projects p ON e.project_id = p.id \
             WHERE p.status != 'deleted'"
        ));
        Self::push_email_filters(&mut builder, query);
        builder.push(" ORDER BY e.sent_at DESC LIMIT ");
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let emails = rows
            .iter()
            .map(Self::row_to_email)
            .collect::<Result<Vec<_>>>()?;

        Ok((emails, total))
    }

    async fn get_quota_counts(&self, project_id: &str) -> Result<QuotaCounts> {
        let last_minute: i64 = sqlx::query(
            "SELECT COUNT(*) FROM emails \
             WHERE project_id = $1 AND sent_at > now() - interval '1 minute'",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?
        .get(0);

        let last_day: i64 = sqlx::query(
            "SELECT COUNT(*) FROM emails \
             WHERE project_id = $1 AND sent_at > now() - interval '24 hours'",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?
        .get(0);

        Ok(QuotaCounts {
            last_minute,
            last_day,
        })
    }

    async fn project_by_id(&self, id: &str) -> Result<Project> {
        let row = sqlx::query(
            "SELECT id, name, api_key_enc, password_hash, smtp_host, smtp_port, smtp_user, \
             smtp_password_enc, quota_daily, quota_per_minute, status, created_at, last_used_at \
             FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::ProjectNotFound(id.to_string()))?;

        self.row_to_project(&row)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, api_key_enc, password_hash, smtp_host, smtp_port, smtp_user, \
             smtp_password_enc, quota_daily, quota_per_minute, status, created_at, last_used_at \
             FROM projects WHERE status != 'deleted' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_project(row)).collect()
    }

    async fn record_audit(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs (project_id, action, ip_address, user_agent, details, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.project_id)
        .bind(event.action.to_string())
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit(
        &self,
        project_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>> {
        let rows = match project_id {
            Some(project_id) => {
                sqlx::query(
                    "SELECT project_id, action, ip_address, user_agent, details, created_at \
                     FROM audit_logs WHERE project_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(project_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT project_id, action, ip_address, user_agent, details, created_at \
                     FROM audit_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                Ok(AuditEvent {
                    project_id: row.try_get("project_id")?,
                    action: AuditAction::from_str(row.try_get::<&str, _>("action")?)
                        .map_err(Error::MalformedRow)?,
                    ip: row.try_get("ip_address")?,
                    user_agent: row.try_get("user_agent")?,
                    details: row.try_get("details")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
