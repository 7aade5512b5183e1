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
use self::auth_exchange::{on_authentication, AuthExchangeError};
use self::transaction::{Transaction, TransactionResult};
use crate::auth::CredentialStore;
use crate::quota::{AuthAttemptLimiter, QuotaPermit, QuotaTracker};
use mailpulse_common::audit::{AuditAction, AuditEvent};
use mailpulse_common::code::SMTPReplyCode;
use mailpulse_common::mail_context::MailContext;
use mailpulse_common::message::{parse_subject, EmailRecord, EmailStatus};
use mailpulse_config::log_channel::RECEIVER;
use mailpulse_forward::Forwarder;
use mailpulse_store::Storage;

mod auth_exchange;
mod connection;
mod io;
pub(crate) mod transaction;

pub use connection::Connection;
pub use io::AbstractIO;

/// will be executed once the email is received.
#[async_trait::async_trait]
pub trait OnMail {
    /// the server executes this function once the email has been received.
    ///
    /// The permit must be committed after (and only after) the message is
    /// durably stored.
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        mail: Box<MailContext>,
        permit: QuotaPermit,
    ) -> anyhow::Result<()>;
}

/// default mail handler for production: store, commit, forward.
pub struct MailHandler {
    /// persistent store shared with the rest of the relay.
    pub storage: std::sync::Arc<dyn Storage>,
    /// forwarder the accepted messages are handed to.
    pub forwarder: std::sync::Arc<Forwarder>,
}

#[async_trait::async_trait]
impl OnMail for MailHandler {
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        mail: Box<MailContext>,
        permit: QuotaPermit,
    ) -> anyhow::Result<()> {
        let now = time::OffsetDateTime::now_utc();
        let content = mail.body.into_bytes();

        let email = EmailRecord {
            id: format!("email_{}", now.unix_timestamp_nanos()),
            message_id: mail.metadata.message_id,
            project_id: mail.project_id,
            from: mail
                .envelop
                .mail_from
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            to: mail.envelop.rcpt.iter().map(ToString::to_string).collect(),
            subject: parse_subject(&String::from_utf8_lossy(&content)),
            size: content.len() as i64,
            content,
            status: EmailStatus::Processed,
            error: None,
            attempts: 1,
            sent_at: now,
            opened_at: None,
            clicked_at: None,
            metadata: None,
        };

        if let Err(error) = self.storage.store_email(&email).await {
            log::error!(
                target: RECEIVER,
                "could not store email '{}': {error}",
                email.message_id
            );
            // the permit is dropped uncommitted, the reservation is released
            drop(permit);
            conn.send_code(SMTPReplyCode::Code451).await?;
            return Ok(());
        }

        // quota is committed only once the row is durable
        permit.commit();

        if let Err(error) = self
            .storage
            .record_audit(
                &AuditEvent::new(AuditAction::MessageAccepted, conn.client_addr.ip().to_string())
                    .with_project(&email.project_id)
                    .with_user_agent(&mail.envelop.helo)
                    .with_details(serde_json::json!({
                        "message_id": email.message_id.clone(),
                        "size": email.size,
                    })),
            )
            .await
        {
            log::error!(target: RECEIVER, "could not record audit event: {error}");
        }

        log::info!(
            target: RECEIVER,
            "email '{}' accepted for project '{}'",
            email.message_id,
            email.project_id
        );

        // fire-and-forget: the client has its 250, the outcome lives in the
        // store
        let forwarder = self.forwarder.clone();
        let email_id = email.id.clone();
        tokio::spawn(async move {
            if let Err(error) = forwarder.forward(&email_id).await {
                log::warn!(
                    target: RECEIVER,
                    "forwarding of '{email_id}' failed: {error}"
                );
            }
        });

        conn.send_code(SMTPReplyCode::MessageAccepted).await?;
        Ok(())
    }
}

/// Handle the replies and the retry budget of one AUTH exchange.
async fn handle_auth<S>(
    conn: &mut Connection<S>,
    credentials: std::sync::Arc<CredentialStore>,
    limiter: std::sync::Arc<AuthAttemptLimiter>,
    storage: std::sync::Arc<dyn Storage>,
    helo_domain: &mut Option<String>,
    helo_pre_auth: String,
    mechanism: mailpulse_common::mechanism::Mechanism,
    initial_response: Option<Vec<u8>>,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let outcome = on_authentication(
        conn,
        credentials,
        limiter,
        storage,
        &helo_pre_auth,
        mechanism,
        initial_response,
    )
    .await;

    match outcome {
        Ok(()) => {
            *helo_domain = Some(helo_pre_auth);
            Ok(())
        }
        Err(AuthExchangeError::Failed(_) | AuthExchangeError::InvalidBase64) => {
            *helo_domain = Some(helo_pre_auth);
            conn.send_code(SMTPReplyCode::AuthInvalidCredentials).await?;
            bump_auth_attempt(conn)
        }
        Err(AuthExchangeError::Canceled) => {
            *helo_domain = Some(helo_pre_auth);
            conn.send_code(SMTPReplyCode::AuthClientCanceled).await?;
            bump_auth_attempt(conn)
        }
        Err(AuthExchangeError::RateLimited) => {
            conn.send_code(SMTPReplyCode::TooManyAuthAttempts).await?;
            anyhow::bail!("too many authentication attempts, closing")
        }
        Err(AuthExchangeError::Timeout(e)) => {
            anyhow::bail!("client timed out during the AUTH exchange: {e}")
        }
        Err(AuthExchangeError::Other(e)) => Err(e),
    }
}

fn bump_auth_attempt<S>(conn: &mut Connection<S>) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    conn.authentication_attempt += 1;

    let retries_max = conn.config.server.smtp.auth_attempt_count_max;
    if retries_max != -1 && conn.authentication_attempt >= retries_max {
        anyhow::bail!("maximum authentication attempt count reached ({retries_max})")
    }
    Ok(())
}

// NOTE: handle_connection and handle_connection_secured hold the same loop;
// unifying them produces a recursive generic type at the TLS upgrade.

/// Receives the incoming mail of a connection
///
/// # Errors
///
/// * the server failed to send a reply
/// * a transaction failed
/// * the TLS handshake failed
#[allow(clippy::too_many_arguments)]
pub async fn handle_connection<S, M>(
    mut conn: Connection<S>,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    credentials: std::sync::Arc<CredentialStore>,
    limiter: std::sync::Arc<AuthAttemptLimiter>,
    quota: std::sync::Arc<QuotaTracker>,
    storage: std::sync::Arc<dyn Storage>,
    mail_handler: &mut M,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    M: OnMail + Send,
{
    conn.send_code(SMTPReplyCode::Greetings).await?;

    let mut helo_domain = None;

    while conn.is_alive {
        match Transaction::receive(&mut conn, &helo_domain, storage.clone(), quota.clone()).await? {
            TransactionResult::Nothing => {}
            TransactionResult::Mail(mail, permit) => {
                helo_domain = Some(mail.envelop.helo.clone());
                mail_handler.on_mail(&mut conn, mail, permit).await?;
            }
            TransactionResult::TlsUpgrade => {
                let tls_config = tls_config.ok_or_else(|| {
                    anyhow::anyhow!("STARTTLS accepted without a tls configuration")
                })?;
                return handle_connection_secured(
                    conn,
                    tls_config,
                    credentials,
                    limiter,
                    quota,
                    storage,
                    mail_handler,
                )
                .await;
            }
            TransactionResult::Authentication(helo_pre_auth, mechanism, initial_response) => {
                handle_auth(
                    &mut conn,
                    credentials.clone(),
                    limiter.clone(),
                    storage.clone(),
                    &mut helo_domain,
                    helo_pre_auth,
                    mechanism,
                    initial_response,
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn handle_connection_secured<S, M>(
    conn: Connection<S>,
    tls_config: std::sync::Arc<rustls::ServerConfig>,
    credentials: std::sync::Arc<CredentialStore>,
    limiter: std::sync::Arc<AuthAttemptLimiter>,
    quota: std::sync::Arc<QuotaTracker>,
    storage: std::sync::Arc<dyn Storage>,
    mail_handler: &mut M,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    M: OnMail + Send,
{
    let handshake_timeout = conn
        .config
        .server
        .tls
        .as_ref()
        .map_or(std::time::Duration::from_secs(1), |tls| {
            tls.handshake_timeout
        });

    let Connection {
        server_name,
        timestamp,
        config,
        client_addr,
        error_count,
        authenticated_project,
        authentication_attempt,
        inner,
        ..
    } = conn;

    let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
    let tls_stream = tokio::time::timeout(handshake_timeout, acceptor.accept(inner.into_inner()))
        .await
        .map_err(|_| anyhow::anyhow!("tls handshake timed out"))??;

    log::info!(target: RECEIVER, "tls handshake completed with {client_addr}");

    let mut secured_conn = Connection {
        server_name,
        timestamp,
        is_alive: true,
        config,
        client_addr,
        error_count,
        is_secured: true,
        authenticated_project,
        authentication_attempt,
        inner: AbstractIO::new(tls_stream),
    };

    // the pre-handshake EHLO state is discarded: the client must greet
    // again, anything else is answered 503
    let mut helo_domain = None;

    while secured_conn.is_alive {
        match Transaction::receive(
            &mut secured_conn,
            &helo_domain,
            storage.clone(),
            quota.clone(),
        )
        .await?
        {
            TransactionResult::Nothing => {}
            TransactionResult::Mail(mail, permit) => {
                helo_domain = Some(mail.envelop.helo.clone());
                mail_handler.on_mail(&mut secured_conn, mail, permit).await?;
            }
            TransactionResult::TlsUpgrade => {
                anyhow::bail!("STARTTLS requested over an already encrypted channel")
            }
            TransactionResult::Authentication(helo_pre_auth, mechanism, initial_response) => {
                handle_auth(
                    &mut secured_conn,
                    credentials.clone(),
                    limiter.clone(),
                    storage.clone(),
                    &mut helo_domain,
                    helo_pre_auth,
                    mechanism,
                    initial_response,
                )
                .await?;
            }
        }
    }

    Ok(())
}
