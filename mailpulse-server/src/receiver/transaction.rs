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
use super::connection::Connection;
use crate::quota::{QuotaPermit, QuotaTracker};
use mailpulse_common::address::Address;
use mailpulse_common::audit::{AuditAction, AuditEvent};
use mailpulse_common::code::SMTPReplyCode;
use mailpulse_common::envelop::Envelop;
use mailpulse_common::event::Event;
use mailpulse_common::mail_context::{MailContext, MessageMetadata, MAIL_CAPACITY};
use mailpulse_common::mechanism::Mechanism;
use mailpulse_common::project::ProjectStatus;
use mailpulse_common::state::StateSMTP;
use mailpulse_config::log_channel::RECEIVER;
use mailpulse_store::Storage;

/// One SMTP transaction: the protocol position plus the envelope and body
/// being accumulated. Authentication is connection state, not transaction
/// state, and survives RSET.
pub struct Transaction {
    state: StateSMTP,
    envelop: Envelop,
    body: String,
    body_size: usize,
    oversized: bool,
    metadata: Option<MessageMetadata>,
    permit: Option<QuotaPermit>,
    storage: std::sync::Arc<dyn Storage>,
    quota: std::sync::Arc<QuotaTracker>,
}

/// How one call to [`Transaction::receive`] ended.
#[allow(clippy::module_name_repetitions)]
pub enum TransactionResult {
    /// the connection is closing
    Nothing,
    /// a message passed the DATA gate and was fully received; the quota
    /// permit must be committed once the message is durably stored
    Mail(Box<MailContext>, QuotaPermit),
    /// the client asked for STARTTLS and the stream must be upgraded
    TlsUpgrade,
    /// the client started an AUTH exchange
    Authentication(String, Mechanism, Option<Vec<u8>>),
}

// Generated from a string received
enum ProcessedEvent {
    Nothing,
    Reply(SMTPReplyCode),
    ChangeState(StateSMTP),
    ReplyChangeState(StateSMTP, SMTPReplyCode),
    TransactionCompleted(Box<MailContext>, QuotaPermit),
}

impl Transaction {
    async fn parse_and_apply_and_get_reply<
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    >(
        &mut self,
        conn: &Connection<S>,
        client_message: &str,
    ) -> ProcessedEvent {
        log::trace!(target: RECEIVER, "buffer=\"{}\"", client_message);

        let command_or_code = if self.state == StateSMTP::Data {
            Event::parse_data
        } else {
            Event::parse_cmd
        }(client_message);

        log::trace!(target: RECEIVER, "parsed=\"{:?}\"", command_or_code);

        match command_or_code {
            Ok(event) => self.process_event(conn, event).await,
            Err(code) => ProcessedEvent::Reply(code),
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn process_event<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &Connection<S>,
        event: Event,
    ) -> ProcessedEvent {
        match (&self.state, event) {
            (_, Event::NoopCmd) => ProcessedEvent::Reply(SMTPReplyCode::Code250),

            (_, Event::VrfyCmd(_) | Event::ExpnCmd(_)) => {
                ProcessedEvent::Reply(SMTPReplyCode::Code502)
            }

            (_, Event::QuitCmd) => {
                ProcessedEvent::ReplyChangeState(StateSMTP::Stop, SMTPReplyCode::Code221)
            }

            (_, Event::RsetCmd) => {
                self.reset_transaction();
                ProcessedEvent::ReplyChangeState(StateSMTP::Helo, SMTPReplyCode::Code250)
            }

            (_, Event::HeloCmd(helo)) => {
                self.set_helo(helo);
                ProcessedEvent::ReplyChangeState(StateSMTP::Helo, SMTPReplyCode::Code250Helo)
            }

            (_, Event::EhloCmd(helo)) => {
                self.set_helo(helo);
                ProcessedEvent::ReplyChangeState(
                    StateSMTP::Helo,
                    if conn.is_secured {
                        SMTPReplyCode::Code250SecuredEsmtp
                    } else {
                        SMTPReplyCode::Code250PlainEsmtp
                    },
                )
            }

            (StateSMTP::Helo, Event::StartTls) if conn.is_secured => {
                ProcessedEvent::Reply(SMTPReplyCode::BadSequence)
            }

            (StateSMTP::Helo, Event::StartTls) if conn.config.server.tls.is_none() => {
                ProcessedEvent::Reply(SMTPReplyCode::TlsNotAvailable)
            }

            (StateSMTP::Helo, Event::StartTls) => ProcessedEvent::ReplyChangeState(
                StateSMTP::NegotiationTLS,
                SMTPReplyCode::TlsReady,
            ),

            (StateSMTP::Helo, Event::Auth(..)) if conn.is_authenticated() => {
                ProcessedEvent::Reply(SMTPReplyCode::AlreadyAuthenticated)
            }

            (StateSMTP::Helo, Event::Auth(..))
                if conn.config.server.smtp.tls_required && !conn.is_secured =>
            {
                ProcessedEvent::Reply(SMTPReplyCode::TlsRequired)
            }

            (StateSMTP::Helo, Event::Auth(mechanism, initial_response)) => {
                ProcessedEvent::ChangeState(StateSMTP::Authentication(mechanism, initial_response))
            }

            (StateSMTP::Helo, Event::MailCmd(..))
                if conn.config.server.smtp.tls_required && !conn.is_secured =>
            {
                ProcessedEvent::Reply(SMTPReplyCode::TlsRequired)
            }

            // not an open relay: the envelope opens only after a 235
            (StateSMTP::Helo, Event::MailCmd(..)) if !conn.is_authenticated() => {
                ProcessedEvent::Reply(SMTPReplyCode::AuthRequired)
            }

            (StateSMTP::Helo, Event::MailCmd(_, Some(size)))
                if size > conn.config.server.smtp.message_size_max =>
            {
                ProcessedEvent::Reply(SMTPReplyCode::MessageSizeExceeded)
            }

            (StateSMTP::Helo, Event::MailCmd(mail_from, _)) => {
                self.set_mail_from(&mail_from, conn);
                ProcessedEvent::ReplyChangeState(StateSMTP::MailFrom, SMTPReplyCode::Code250)
            }

            (StateSMTP::MailFrom | StateSMTP::RcptTo, Event::RcptCmd(rcpt_to)) => {
                if self.envelop.rcpt.len() >= conn.config.server.smtp.rcpt_count_max {
                    return ProcessedEvent::Reply(SMTPReplyCode::TooManyRecipients);
                }

                match rcpt_to.parse::<Address>() {
                    Ok(rcpt_to) => {
                        self.envelop.rcpt.push(rcpt_to);
                        ProcessedEvent::ReplyChangeState(StateSMTP::RcptTo, SMTPReplyCode::Code250)
                    }
                    Err(_) => ProcessedEvent::Reply(SMTPReplyCode::Code501),
                }
            }

            (StateSMTP::RcptTo, Event::DataCmd) => self.open_data_gate(conn).await,

            (StateSMTP::Data, Event::DataLine(line)) => {
                if self.body_size + line.len() + 2 > conn.config.server.smtp.message_size_max {
                    self.oversized = true;
                } else {
                    self.body_size += line.len() + 2;
                    self.body.push_str(&line);
                    self.body.push_str("\r\n");
                }
                ProcessedEvent::Nothing
            }

            (StateSMTP::Data, Event::DataEnd) => {
                if self.oversized {
                    self.reset_transaction();
                    return ProcessedEvent::ReplyChangeState(
                        StateSMTP::Helo,
                        SMTPReplyCode::MessageSizeExceeded,
                    );
                }

                let project_id = conn
                    .authenticated_project
                    .as_ref()
                    .map(|project| project.id.clone());

                match (project_id, self.metadata.take(), self.permit.take()) {
                    (Some(project_id), Some(metadata), Some(permit)) => {
                        let mail = MailContext {
                            connection_timestamp: conn.timestamp,
                            client_addr: conn.client_addr,
                            project_id,
                            envelop: std::mem::take(&mut self.envelop),
                            body: std::mem::take(&mut self.body),
                            metadata,
                        };
                        self.body_size = 0;

                        ProcessedEvent::TransactionCompleted(Box::new(mail), permit)
                    }
                    _ => {
                        // the gate state evaporated, treat as a local error
                        self.reset_transaction();
                        ProcessedEvent::ReplyChangeState(StateSMTP::Helo, SMTPReplyCode::Code451)
                    }
                }
            }

            _ => ProcessedEvent::Reply(SMTPReplyCode::BadSequence),
        }
    }

    /// DATA acceptance: the project must still be active and the quota gate
    /// must hand out a permit before the client may stream the body.
    async fn open_data_gate<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &Connection<S>,
    ) -> ProcessedEvent {
        let Some(session_project) = conn.authenticated_project.as_ref() else {
            return ProcessedEvent::Reply(SMTPReplyCode::AuthRequired);
        };

        // re-read the live row: the admin surface may have toggled the
        // project since AUTH
        let project = match self.storage.project_by_id(&session_project.id).await {
            Ok(project) => project,
            Err(mailpulse_store::Error::ProjectNotFound(_)) => {
                return ProcessedEvent::Reply(SMTPReplyCode::ProjectNotActive);
            }
            Err(error) => {
                log::error!(
                    target: RECEIVER,
                    "could not re-check project '{}': {error}",
                    session_project.id
                );
                return ProcessedEvent::Reply(SMTPReplyCode::Code451);
            }
        };

        if project.status != ProjectStatus::Active {
            log::warn!(
                target: RECEIVER,
                "project '{}' is no longer active (status: {}), rejecting DATA",
                project.id,
                project.status
            );
            return ProcessedEvent::Reply(SMTPReplyCode::ProjectNotActive);
        }

        match self
            .quota
            .admit(&project.id, project.quota_per_minute, project.quota_daily)
        {
            Err(rejection) => {
                self.audit(
                    AuditEvent::new(AuditAction::QuotaRejected, conn.client_addr.ip().to_string())
                        .with_project(&project.id)
                        .with_user_agent(&self.envelop.helo)
                        .with_details(serde_json::json!({ "reason": rejection.to_string() })),
                )
                .await;

                ProcessedEvent::Reply(SMTPReplyCode::QuotaExceeded)
            }
            Ok(permit) => {
                self.permit = Some(permit);
                self.body = String::with_capacity(MAIL_CAPACITY);
                self.body_size = 0;
                self.oversized = false;

                ProcessedEvent::ReplyChangeState(StateSMTP::Data, SMTPReplyCode::Code354)
            }
        }
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(error) = self.storage.record_audit(&event).await {
            log::error!(target: RECEIVER, "could not record audit event: {error}");
        }
    }

    fn set_helo(&mut self, helo: String) {
        self.reset_transaction();
        self.envelop.helo = helo;
    }

    fn set_mail_from<S>(&mut self, mail_from: &str, conn: &Connection<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        self.envelop.clear();
        self.envelop.mail_from = mail_from.parse::<Address>().ok();

        let timestamp = time::OffsetDateTime::now_utc();
        self.metadata = Some(MessageMetadata {
            timestamp,
            message_id: format!(
                "{}@{}",
                timestamp.unix_timestamp_nanos(),
                conn.server_name
            ),
        });

        log::trace!(target: RECEIVER, "envelop=\"{:?}\"", self.envelop);
    }

    /// forget the in-flight transaction; an unused quota permit is released.
    fn reset_transaction(&mut self) {
        self.envelop.clear();
        self.body = String::new();
        self.body_size = 0;
        self.oversized = false;
        self.metadata = None;
        self.permit = None;
    }
}

impl Transaction {
    /// Run the command loop until the transaction yields.
    ///
    /// # Errors
    ///
    /// * the stream failed or timed-out (the connection closes silently)
    /// * the client exceeded the hard error limit
    pub async fn receive<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        conn: &mut Connection<S>,
        helo_domain: &Option<String>,
        storage: std::sync::Arc<dyn Storage>,
        quota: std::sync::Arc<QuotaTracker>,
    ) -> anyhow::Result<TransactionResult> {
        let mut transaction = Self {
            state: if helo_domain.is_none() {
                StateSMTP::Connect
            } else {
                StateSMTP::Helo
            },
            envelop: Envelop {
                helo: helo_domain.clone().unwrap_or_default(),
                ..Envelop::default()
            },
            body: String::new(),
            body_size: 0,
            oversized: false,
            metadata: None,
            permit: None,
            storage,
            quota,
        };

        loop {
            match &transaction.state {
                StateSMTP::NegotiationTLS => return Ok(TransactionResult::TlsUpgrade),
                StateSMTP::Authentication(mechanism, initial_response) => {
                    return Ok(TransactionResult::Authentication(
                        transaction.envelop.helo.clone(),
                        *mechanism,
                        initial_response.clone(),
                    ));
                }
                StateSMTP::Stop => {
                    conn.is_alive = false;
                    return Ok(TransactionResult::Nothing);
                }
                _ => match conn.read(read_timeout(conn)).await {
                    Ok(Some(client_message)) => {
                        match transaction
                            .parse_and_apply_and_get_reply(conn, &client_message)
                            .await
                        {
                            ProcessedEvent::Nothing => {}
                            ProcessedEvent::Reply(reply_to_send) => {
                                conn.send_code(reply_to_send).await?;
                            }
                            ProcessedEvent::ChangeState(new_state) => {
                                log::info!(
                                    target: RECEIVER,
                                    "state: /{}/ => /{}/",
                                    transaction.state,
                                    new_state
                                );
                                transaction.state = new_state;
                            }
                            ProcessedEvent::ReplyChangeState(new_state, reply_to_send) => {
                                log::info!(
                                    target: RECEIVER,
                                    "state: /{}/ => /{}/",
                                    transaction.state,
                                    new_state
                                );
                                transaction.state = new_state;
                                conn.send_code(reply_to_send).await?;
                            }
                            ProcessedEvent::TransactionCompleted(mail, permit) => {
                                return Ok(TransactionResult::Mail(mail, permit));
                            }
                        }
                    }
                    Ok(None) => {
                        log::info!(target: RECEIVER, "eof");
                        transaction.state = StateSMTP::Stop;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // the idle timeout closes the connection with no reply
                        anyhow::bail!("client timed out: {e}")
                    }
                    Err(e) => anyhow::bail!(e),
                },
            }
        }
    }
}

fn read_timeout<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
    conn: &Connection<S>,
) -> std::time::Duration {
    if conn.is_authenticated() {
        conn.config.server.smtp.timeout_client.post_auth
    } else {
        conn.config.server.smtp.timeout_client.pre_auth
    }
}
