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
use super::io::AbstractIO;
use mailpulse_common::code::SMTPReplyCode;
use mailpulse_common::project::Project;
use mailpulse_config::{log_channel::RECEIVER, Config};

/// Instance containing connection to the server's information
pub struct Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// server's domain of the connection
    pub server_name: String,
    /// connection timestamp
    pub timestamp: std::time::SystemTime,
    /// is still alive
    pub is_alive: bool,
    /// server's configuration
    pub config: std::sync::Arc<Config>,
    /// peer socket address
    pub client_addr: std::net::SocketAddr,
    /// number of error the client made so far
    pub error_count: i64,
    /// is under tls
    pub is_secured: bool,
    /// project the session authenticated as, `None` before a 235
    pub authenticated_project: Option<Project>,
    /// number of failed AUTH exchanges on this connection
    pub authentication_attempt: i64,
    /// abstraction of the stream
    pub inner: AbstractIO<S>,
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub fn new(
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<Config>,
        inner: S,
    ) -> Self {
        Self {
            server_name: config.server.domain.clone(),
            timestamp: std::time::SystemTime::now(),
            is_alive: true,
            config,
            client_addr,
            error_count: 0,
            is_secured: false,
            authenticated_project: None,
            authentication_attempt: 0,
            inner: AbstractIO::new(inner),
        }
    }

    /// has completed AUTH
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated_project.is_some()
    }

    /// send a reply code to the client
    ///
    /// Erroneous replies are counted: past the soft limit every error is
    /// delayed, past the hard limit the client is hung up on with an
    /// additional `451 Too many errors` line.
    ///
    /// # Errors
    ///
    /// * the write failed
    /// * the hard error limit was reached
    pub async fn send_code(&mut self, code: SMTPReplyCode) -> anyhow::Result<()> {
        log::info!(target: RECEIVER, "send=\"{code:?}\"");

        let reply_to_send = self.config.server.smtp.codes.get(code).to_string();

        if !code.is_error() {
            return self.send(&reply_to_send).await;
        }

        self.error_count += 1;

        let hard_error = self.config.server.smtp.error.hard_count;
        let soft_error = self.config.server.smtp.error.soft_count;

        if hard_error != -1 && self.error_count >= hard_error {
            let mut response = reply_to_send;
            response.replace_range(3..4, "-");
            response.push_str(
                self.config
                    .server
                    .smtp
                    .codes
                    .get(SMTPReplyCode::TooManyError),
            );
            self.send(&response).await?;

            anyhow::bail!("too many errors")
        }

        self.send(&reply_to_send).await?;

        if soft_error != -1 && self.error_count >= soft_error {
            tokio::time::sleep(self.config.server.smtp.error.delay).await;
        }

        Ok(())
    }

    /// Send a buffer
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send(&mut self, reply: &str) -> anyhow::Result<()> {
        log::trace!(target: RECEIVER, "send=\"{reply:?}\"");

        tokio::io::AsyncWriteExt::write_all(&mut self.inner.inner, reply.as_bytes()).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner.inner).await?;
        Ok(())
    }

    /// read a line from the client
    ///
    /// # Errors
    ///
    /// * timed-out
    /// * stream's error
    pub async fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<String>> {
        self.inner.next_line(Some(timeout)).await
    }
}
