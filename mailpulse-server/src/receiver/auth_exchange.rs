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
use super::Connection;
use crate::auth::{CredentialError, CredentialStore};
use crate::quota::AuthAttemptLimiter;
use mailpulse_common::audit::{AuditAction, AuditEvent};
use mailpulse_common::mechanism::Mechanism;
use mailpulse_config::log_channel::AUTH;
use mailpulse_store::Storage;

/// Result of the AUTH command
#[must_use]
pub enum AuthExchangeError {
    /// authentication invalid
    Failed(CredentialError),
    /// the client stopped the exchange with "*"
    Canceled,
    /// a base64 blob did not decode, or the PLAIN payload is malformed
    InvalidBase64,
    /// the client address sent too many AUTH commands
    RateLimited,
    /// the server timed-out waiting for the client
    Timeout(std::io::Error),
    ///
    Other(anyhow::Error),
}

async fn read_exchange_line<S>(conn: &mut Connection<S>) -> Result<String, AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    match conn
        .read(conn.config.server.smtp.timeout_client.pre_auth)
        .await
    {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(AuthExchangeError::Other(anyhow::anyhow!(
            "connection closed during the AUTH exchange"
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(AuthExchangeError::Timeout(e)),
        Err(e) => Err(AuthExchangeError::Other(e.into())),
    }
}

fn decode_base64(blob: &str) -> Result<String, AuthExchangeError> {
    let bytes = base64::decode(blob.trim()).map_err(|_| AuthExchangeError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|_| AuthExchangeError::InvalidBase64)
}

/// Collect the credential pair of one PLAIN exchange:
/// `base64(\0authcid\0password)`, sent either as the initial response or
/// after an empty `334` challenge.
async fn exchange_plain<S>(
    conn: &mut Connection<S>,
    initial_response: Option<Vec<u8>>,
) -> Result<(String, String), AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let payload = match initial_response {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| AuthExchangeError::InvalidBase64)?,
        None => {
            conn.send("334 \r\n")
                .await
                .map_err(AuthExchangeError::Other)?;
            read_exchange_line(conn).await?
        }
    };

    if payload == "*" {
        return Err(AuthExchangeError::Canceled);
    }

    let decoded = decode_base64(&payload)?;
    match decoded.split('\0').collect::<Vec<_>>()[..] {
        // the first field is the (ignored) authorization identity
        [_, authcid, password] => Ok((authcid.to_string(), password.to_string())),
        _ => Err(AuthExchangeError::InvalidBase64),
    }
}

/// Collect the credential pair of one LOGIN exchange: username and password
/// prompted separately, each as a base64 line.
async fn exchange_login<S>(
    conn: &mut Connection<S>,
    initial_response: Option<Vec<u8>>,
) -> Result<(String, String), AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let username_blob = match initial_response {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| AuthExchangeError::InvalidBase64)?,
        None => {
            // base64("Username:")
            conn.send("334 VXNlcm5hbWU6\r\n")
                .await
                .map_err(AuthExchangeError::Other)?;
            read_exchange_line(conn).await?
        }
    };
    if username_blob == "*" {
        return Err(AuthExchangeError::Canceled);
    }
    let username = decode_base64(&username_blob)?;

    // base64("Password:")
    conn.send("334 UGFzc3dvcmQ6\r\n")
        .await
        .map_err(AuthExchangeError::Other)?;
    let password_blob = read_exchange_line(conn).await?;
    if password_blob == "*" {
        return Err(AuthExchangeError::Canceled);
    }
    let password = decode_base64(&password_blob)?;

    Ok((username, password))
}

/// Run one AUTH exchange and verify the collected credentials.
///
/// On success the project is attached to the connection and `235` has been
/// sent; every other outcome is reported to the caller for the reply and
/// the retry accounting.
pub async fn on_authentication<S>(
    conn: &mut Connection<S>,
    credentials: std::sync::Arc<CredentialStore>,
    limiter: std::sync::Arc<AuthAttemptLimiter>,
    storage: std::sync::Arc<dyn Storage>,
    helo: &str,
    mechanism: Mechanism,
    initial_response: Option<Vec<u8>>,
) -> Result<(), AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let ip = conn.client_addr.ip().to_string();

    if !limiter.check_and_record(&ip) {
        log::warn!(target: AUTH, "too many AUTH attempts from {ip}");
        record_audit(
            &*storage,
            AuditEvent::new(AuditAction::AuthFailure, &*ip)
                .with_user_agent(helo)
                .with_details(serde_json::json!({ "reason": "rate_limited" })),
        )
        .await;
        return Err(AuthExchangeError::RateLimited);
    }

    let (username, password) = match mechanism {
        Mechanism::Plain => exchange_plain(conn, initial_response).await?,
        Mechanism::Login => exchange_login(conn, initial_response).await?,
    };

    match credentials.authenticate(&username, &password).await {
        Ok(project) => {
            log::info!(
                target: AUTH,
                "authentication succeeded for project '{}' from {ip}",
                project.id
            );
            record_audit(
                &*storage,
                AuditEvent::new(AuditAction::AuthSuccess, &*ip)
                    .with_project(&project.id)
                    .with_user_agent(helo),
            )
            .await;

            conn.authenticated_project = Some(project);
            conn.send_code(mailpulse_common::code::SMTPReplyCode::AuthSucceeded)
                .await
                .map_err(AuthExchangeError::Other)?;
            Ok(())
        }
        Err(error) => {
            log::warn!(
                target: AUTH,
                "authentication failed for '{username}' from {ip}: {error}"
            );
            record_audit(
                &*storage,
                AuditEvent::new(AuditAction::AuthFailure, &*ip)
                    .with_user_agent(helo)
                    .with_details(serde_json::json!({
                        "reason": error.reason(),
                        "username": username,
                    })),
            )
            .await;
            Err(AuthExchangeError::Failed(error))
        }
    }
}

async fn record_audit(storage: &dyn Storage, event: AuditEvent) {
    if let Err(error) = storage.record_audit(&event).await {
        log::error!(target: AUTH, "could not record audit event: {error}");
    }
}
