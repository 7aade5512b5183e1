//! MailPulse upstream forwarding system

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

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use mailpulse_common::audit::{AuditAction, AuditEvent};
use mailpulse_common::crypto::EncryptionKey;
use mailpulse_common::message::{EmailRecord, EmailStatus};
use mailpulse_common::project::{Project, ProjectStatus, UpstreamConfig};
use mailpulse_config::{log_channel::FORWARD, Config};
use mailpulse_store::Storage;

mod message;

pub use message::build_forward_message;

/// Outcome of one upstream submission.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// the upstream configuration cannot be used (undecryptable secret)
    #[error("upstream configuration unusable: {0}")]
    ConfigMissing(String),

    /// the project is not active anymore
    #[error("project '{0}' is not active")]
    ProjectNotActive(String),

    /// the smart-host refused our credentials
    #[error("upstream authentication failed: {0}")]
    AuthFailed(String),

    /// the smart-host could not be reached before the deadline
    #[error("could not reach upstream: {0}")]
    ConnectFailed(String),

    /// the smart-host rejected the message
    #[error("upstream rejected the message: {0}")]
    SubmissionFailed(String),

    /// the persistent store failed
    #[error(transparent)]
    Storage(#[from] mailpulse_store::Error),
}

/// Submits stored messages to their project's smart-host.
///
/// Runs detached from the session that accepted the message: every outcome
/// is reflected in the message store and the audit trail, never on the
/// client socket.
pub struct Forwarder {
    config: std::sync::Arc<Config>,
    storage: std::sync::Arc<dyn Storage>,
    key: EncryptionKey,
}

impl Forwarder {
    ///
    #[must_use]
    pub fn new(
        config: std::sync::Arc<Config>,
        storage: std::sync::Arc<dyn Storage>,
        key: EncryptionKey,
    ) -> Self {
        Self {
            config,
            storage,
            key,
        }
    }

    /// Forward one stored message and record the outcome.
    ///
    /// # Errors
    ///
    /// * the message or its project cannot be loaded
    /// * the submission failed (the message row is flipped to `failed`)
    pub async fn forward(&self, email_id: &str) -> Result<(), Error> {
        let email = self.storage.email_by_id(email_id).await?;
        let project = self.storage.project_by_id(&email.project_id).await?;

        let outcome = self.submit(&email, &project).await;

        match &outcome {
            Ok(()) => {
                self.storage
                    .update_email_status(&email.id, EmailStatus::Delivered, None)
                    .await?;
                log::info!(
                    target: FORWARD,
                    "email '{}' forwarded to upstream",
                    email.id
                );
                self.audit(
                    AuditEvent::new(AuditAction::ForwardDelivered, "-")
                        .with_project(&project.id)
                        .with_details(serde_json::json!({ "message_id": email.message_id })),
                )
                .await;
            }
            Err(error) => {
                let reason = format!("SMTP forwarding failed: {error}");
                self.storage
                    .update_email_status(&email.id, EmailStatus::Failed, Some(&reason))
                    .await?;
                log::warn!(
                    target: FORWARD,
                    "email '{}' forwarding failed: {error}",
                    email.id
                );
                self.audit(
                    AuditEvent::new(AuditAction::ForwardFailed, "-")
                        .with_project(&project.id)
                        .with_details(serde_json::json!({
                            "message_id": email.message_id,
                            "error": reason,
                        })),
                )
                .await;
            }
        }

        outcome
    }

    /// Operator-initiated resend: flip the row back to `queued`, then run a
    /// fresh forward attempt against the same persisted message.
    ///
    /// # Errors
    ///
    /// * same as [`Forwarder::forward`]
    pub async fn resend(&self, email_id: &str) -> Result<(), Error> {
        self.storage
            .update_email_status(email_id, EmailStatus::Queued, None)
            .await?;
        self.forward(email_id).await
    }

    async fn submit(&self, email: &EmailRecord, project: &Project) -> Result<(), Error> {
        if project.status != ProjectStatus::Active {
            return Err(Error::ProjectNotActive(project.id.clone()));
        }

        match project.upstream() {
            None => {
                log::warn!(
                    target: FORWARD,
                    "project '{}' has no upstream configured, simulating the submission of '{}'",
                    project.id,
                    email.id
                );
                simulate(email)
            }
            Some(upstream) => self.submit_upstream(email, &upstream).await,
        }
    }

    async fn submit_upstream(
        &self,
        email: &EmailRecord,
        upstream: &UpstreamConfig,
    ) -> Result<(), Error> {
        let password = self
            .key
            .decrypt(&upstream.password_enc)
            .map_err(|e| Error::ConfigMissing(format!("cannot decrypt upstream password: {e}")))?;

        let envelope = build_envelope(email)?;
        let content = message::build_forward_message(email);
        let transport = self.build_transport(upstream, password)?;

        log::info!(
            target: FORWARD,
            "submitting email '{}' to '{}:{}'",
            email.id,
            upstream.host,
            upstream.port
        );

        match tokio::time::timeout(
            self.config.server.forwarder.deadline,
            transport.send_raw(&envelope, content.as_bytes()),
        )
        .await
        {
            Err(_elapsed) => Err(Error::ConnectFailed(format!(
                "no answer from '{}:{}' within {:?}",
                upstream.host, upstream.port, self.config.server.forwarder.deadline
            ))),
            Ok(Ok(_response)) => Ok(()),
            Ok(Err(error)) => Err(classify(&error)),
        }
    }

    fn build_transport(
        &self,
        upstream: &UpstreamConfig,
        password: String,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, Error> {
        let tls_parameters = TlsParameters::builder(upstream.host.clone())
            .build_rustls()
            .map_err(|e| Error::ConnectFailed(format!("cannot build tls parameters: {e}")))?;

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&upstream.host)
                .port(upstream.port)
                .hello_name(ClientId::Domain(self.config.server.domain.clone()))
                .tls(Tls::Opportunistic(tls_parameters))
                .credentials(Credentials::new(upstream.user.clone(), password))
                .build(),
        )
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(error) = self.storage.record_audit(&event).await {
            log::error!(target: FORWARD, "could not record audit event: {error}");
        }
    }
}

/// build a [lettre] envelope using the stored sender & recipients.
fn build_envelope(email: &EmailRecord) -> Result<lettre::address::Envelope, Error> {
    lettre::address::Envelope::new(
        Some(
            email
                .from
                .parse()
                .map_err(|e| Error::SubmissionFailed(format!("sender address rejected: {e}")))?,
        ),
        email
            .to
            .iter()
            // NOTE: recipients that cannot be converted are silently dropped.
            .flat_map(|to| to.parse::<lettre::Address>())
            .collect(),
    )
    .map_err(|e| Error::SubmissionFailed(e.to_string()))
}

fn classify(error: &lettre::transport::smtp::Error) -> Error {
    let text = error.to_string();

    if error.is_timeout() || error.is_tls() {
        return Error::ConnectFailed(text);
    }

    if error.is_permanent() || error.is_transient() {
        // the 53x replies are the credential/policy class
        if ["530", "534", "535", "538"].iter().any(|code| text.contains(code)) {
            return Error::AuthFailed(text);
        }
        return Error::SubmissionFailed(text);
    }

    Error::ConnectFailed(text)
}

/// Diagnostic mode for projects without an upstream: produce a deterministic
/// success/failure distribution without ever touching the network.
fn simulate(email: &EmailRecord) -> Result<(), Error> {
    if email.subject.to_lowercase().contains("fail") {
        return Err(Error::SubmissionFailed(
            "[simulated] recipient mailbox full".to_string(),
        ));
    }

    if email.to.len() > 5 {
        return Err(Error::SubmissionFailed(
            "[simulated] too many recipients".to_string(),
        ));
    }

    if email.id.ends_with('0') {
        return Err(Error::ConnectFailed(
            "[simulated] connection to upstream timed out".to_string(),
        ));
    }

    if email.id.ends_with('1') {
        return Err(Error::AuthFailed(
            "[simulated] invalid upstream credentials".to_string(),
        ));
    }

    Ok(())
}
