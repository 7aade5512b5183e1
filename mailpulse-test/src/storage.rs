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
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use mailpulse_common::audit::AuditEvent;
use mailpulse_common::message::{EmailRecord, EmailStatus};
use mailpulse_common::project::{Project, ProjectStatus, API_KEY_PREFIX};
use mailpulse_store::{EmailQuery, Error, QuotaCounts, Result, Storage};

/// An in-memory [`Storage`] with failure injection, for tests.
#[derive(Default)]
pub struct MemoryStorage {
    emails: Mutex<Vec<EmailRecord>>,
    projects: Mutex<HashMap<String, Project>>,
    audit: Mutex<Vec<AuditEvent>>,
    fail_store: AtomicBool,
}

/// An active project without password or upstream configuration.
#[must_use]
pub fn active_project(id: &str) -> Project {
    Project {
        id: id.to_string(),
        name: id.to_string(),
        api_key: format!("{API_KEY_PREFIX}{id}"),
        password_hash: None,
        smtp_host: None,
        smtp_port: None,
        smtp_user: None,
        smtp_password_enc: None,
        quota_daily: mailpulse_common::project::DEFAULT_QUOTA_DAILY,
        quota_per_minute: mailpulse_common::project::DEFAULT_QUOTA_PER_MINUTE,
        status: ProjectStatus::Active,
        created_at: time::OffsetDateTime::now_utc(),
        last_used_at: None,
    }
}

/// An active project whose `api_key`/`password` pair authenticates.
///
/// # Panics
///
/// * bcrypt rejected the password
#[must_use]
pub fn project_with_password(id: &str, api_key: &str, password: &str) -> Project {
    Project {
        api_key: api_key.to_string(),
        password_hash: Some(
            pwhash::bcrypt::hash(password.to_lowercase()).expect("bcrypt hash of test password"),
        ),
        ..active_project(id)
    }
}

impl MemoryStorage {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// seed one project.
    pub fn insert_project(&self, project: Project) {
        self.projects
            .lock()
            .unwrap()
            .insert(project.id.clone(), project);
    }

    /// seed one email without going through [`Storage::store_email`].
    pub fn insert_email(&self, email: EmailRecord) {
        self.emails.lock().unwrap().push(email);
    }

    /// flip the status of a seeded project, emulating the admin surface.
    ///
    /// # Panics
    ///
    /// * the project does not exist
    pub fn set_project_status(&self, id: &str, status: ProjectStatus) {
        self.projects
            .lock()
            .unwrap()
            .get_mut(id)
            .expect("project must be seeded")
            .status = status;
    }

    /// make every subsequent `store_email` fail until called with `false`.
    pub fn fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    /// fetch one stored email.
    ///
    /// # Panics
    ///
    /// * no email carries this id
    #[must_use]
    pub fn email(&self, id: &str) -> EmailRecord {
        self.emails
            .lock()
            .unwrap()
            .iter()
            .find(|email| email.id == id)
            .cloned()
            .expect("email must be stored")
    }

    /// every stored email, insertion order.
    #[must_use]
    pub fn emails(&self) -> Vec<EmailRecord> {
        self.emails.lock().unwrap().clone()
    }

    /// every recorded audit event, insertion order.
    #[must_use]
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn store_email(&self, email: &EmailRecord) -> Result<()> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolClosed));
        }
        self.emails.lock().unwrap().push(email.clone());
        Ok(())
    }

    async fn email_by_id(&self, id: &str) -> Result<EmailRecord> {
        self.emails
            .lock()
            .unwrap()
            .iter()
            .find(|email| email.id == id)
            .cloned()
            .ok_or_else(|| Error::EmailNotFound(id.to_string()))
    }

    async fn update_email_status(
        &self,
        id: &str,
        status: EmailStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut emails = self.emails.lock().unwrap();
        let email = emails
            .iter_mut()
            .find(|email| email.id == id)
            .ok_or_else(|| Error::EmailNotFound(id.to_string()))?;

        email.status = status;
        email.error = error.map(ToString::to_string);
        email.attempts += 1;
        Ok(())
    }

    async fn list_emails(&self, query: &EmailQuery) -> Result<(Vec<EmailRecord>, i64)> {
        let matches = |email: &EmailRecord| {
            query
                .project_id
                .as_ref()
                .map_or(true, |id| &email.project_id == id)
                && query.status.map_or(true, |status| email.status == status)
                && query.search.as_ref().map_or(true, |needle| {
                    let needle = needle.to_lowercase();
                    email.from.to_lowercase().contains(&needle)
                        || email.subject.to_lowercase().contains(&needle)
                        || email
                            .to
                            .iter()
                            .any(|to| to.to_lowercase().contains(&needle))
                })
        };

        let mut found = self
            .emails
            .lock()
            .unwrap()
            .iter()
            .filter(|email| matches(email))
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        let total = i64::try_from(found.len()).unwrap();
        let page = found
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or_default())
            .take(usize::try_from(query.limit).unwrap_or_default())
            .collect();

        Ok((page, total))
    }

    async fn get_quota_counts(&self, project_id: &str) -> Result<QuotaCounts> {
        let now = time::OffsetDateTime::now_utc();
        let emails = self.emails.lock().unwrap();

        let in_window = |window: time::Duration| {
            emails
                .iter()
                .filter(|email| email.project_id == project_id && now - email.sent_at < window)
                .count() as i64
        };

        Ok(QuotaCounts {
            last_minute: in_window(time::Duration::minutes(1)),
            last_day: in_window(time::Duration::hours(24)),
        })
    }

    async fn project_by_id(&self, id: &str) -> Result<Project> {
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self
            .projects
            .lock()
            .unwrap()
            .values()
            .filter(|project| project.status != ProjectStatus::Deleted)
            .cloned()
            .collect())
    }

    async fn record_audit(&self, event: &AuditEvent) -> Result<()> {
        self.audit.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_audit(
        &self,
        project_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>> {
        let mut events = self
            .audit
            .lock()
            .unwrap()
            .iter()
            .filter(|event| project_id.map_or(true, |id| event.project_id.as_deref() == Some(id)))
            .cloned()
            .collect::<Vec<_>>();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(events
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or_default())
            .take(usize::try_from(limit).unwrap_or_default())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailpulse_common::audit::{AuditAction, AuditEvent};

    fn email(id: &str, project: &str, subject: &str, minutes_ago: i64) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            message_id: format!("{id}@testserver.com"),
            project_id: project.to_string(),
            from: "a@x.org".to_string(),
            to: vec!["b@y.org".to_string()],
            subject: subject.to_string(),
            content: b"body".to_vec(),
            size: 4,
            status: EmailStatus::Processed,
            error: None,
            attempts: 1,
            sent_at: time::OffsetDateTime::now_utc() - time::Duration::minutes(minutes_ago),
            opened_at: None,
            clicked_at: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn email_listing_filters_and_paginates() {
        let storage = MemoryStorage::new();
        storage.insert_email(email("email_1", "prj_1", "welcome aboard", 3));
        storage.insert_email(email("email_2", "prj_1", "invoice", 2));
        storage.insert_email(email("email_3", "prj_2", "welcome back", 1));
        storage
            .update_email_status("email_2", EmailStatus::Failed, Some("boom"))
            .await
            .unwrap();

        // project filter, newest first, total independent of the page size
        let (page, total) = storage
            .list_emails(&EmailQuery {
                project_id: Some("prj_1".to_string()),
                limit: 1,
                offset: 0,
                ..EmailQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "email_2");

        // free-text search spans subjects of every project
        let (page, total) = storage
            .list_emails(&EmailQuery {
                search: Some("welcome".to_string()),
                limit: 10,
                offset: 0,
                ..EmailQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].id, "email_3");

        // status filter
        let (page, _) = storage
            .list_emails(&EmailQuery {
                status: Some(EmailStatus::Failed),
                limit: 10,
                offset: 0,
                ..EmailQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn quota_counts_follow_the_windows() {
        let storage = MemoryStorage::new();
        storage.insert_email(email("email_1", "prj_1", "s", 0));
        storage.insert_email(email("email_2", "prj_1", "s", 30));
        storage.insert_email(email("email_3", "prj_1", "s", 25 * 60));
        storage.insert_email(email("email_4", "prj_2", "s", 0));

        let counts = storage.get_quota_counts("prj_1").await.unwrap();
        assert_eq!(counts.last_minute, 1);
        assert_eq!(counts.last_day, 2);
    }

    #[tokio::test]
    async fn audit_listing_filters_by_project() {
        let storage = MemoryStorage::new();
        for project in ["prj_1", "prj_2", "prj_1"] {
            storage
                .record_audit(
                    &AuditEvent::new(AuditAction::AuthSuccess, "10.0.0.1").with_project(project),
                )
                .await
                .unwrap();
        }

        let events = storage.list_audit(Some("prj_1"), 10, 0).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(storage.list_audit(None, 10, 0).await.unwrap().len(), 3);
        assert_eq!(storage.list_audit(None, 2, 2).await.unwrap().len(), 1);
    }
}
