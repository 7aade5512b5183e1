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
use mailpulse_common::code::SMTPReplyCode;
use mailpulse_common::mail_context::MailContext;
use mailpulse_config::Config;
use mailpulse_server::auth::CredentialStore;
use mailpulse_server::quota::{AuthAttemptLimiter, QuotaPermit, QuotaTracker};
use mailpulse_server::{handle_connection, Connection, OnMail};

use crate::storage::MemoryStorage;

/// Everything the server wrote to a [`Mock`], inspectable after the session
/// ended (and while the connection still owns the mock).
#[derive(Clone)]
pub struct Transcript(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl Transcript {
    /// the bytes written so far.
    ///
    /// # Panics
    ///
    /// * a writer panicked while holding the transcript
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

/// A scripted duplex stream emulating one client socket: the reader replays
/// `input` and then signals EOF, the writer appends to a shared
/// [`Transcript`].
pub struct Mock {
    input: Vec<u8>,
    consumed: usize,
    transcript: Transcript,
}

impl Mock {
    /// A mock replaying the given client script.
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into(),
            consumed: 0,
            transcript: Transcript(std::sync::Arc::new(std::sync::Mutex::new(Vec::new()))),
        }
    }

    /// A handle on the write side, kept valid after the mock is moved into
    /// a connection.
    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

impl tokio::io::AsyncRead for Mock {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let pending = &this.input[this.consumed..];

        // an empty fill is how AsyncRead spells EOF
        if !pending.is_empty() {
            let take = pending.len().min(buf.remaining());
            buf.put_slice(&pending[..take]);
            this.consumed += take;
        }

        std::task::Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for Mock {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.transcript.0.lock().unwrap().extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// used for protocol tests: acknowledges the message without storing it.
pub struct DefaultMailHandler;

#[async_trait::async_trait]
impl OnMail for DefaultMailHandler {
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        _mail: Box<MailContext>,
        permit: QuotaPermit,
    ) -> anyhow::Result<()> {
        permit.commit();
        conn.send_code(SMTPReplyCode::MessageAccepted).await?;
        Ok(())
    }
}

/// run a connection against scripted input and assert the transcript
///
/// # Errors
///
/// * the outcome of [`handle_connection`]
///
/// # Panics
///
/// * the transcript does not match `expected_output`
pub async fn test_receiver_inner<M>(
    address: &str,
    mail_handler: &mut M,
    smtp_input: &[u8],
    expected_output: &[u8],
    config: std::sync::Arc<Config>,
    storage: std::sync::Arc<MemoryStorage>,
) -> anyhow::Result<()>
where
    M: OnMail + Send,
{
    let mock = Mock::new(smtp_input);
    let transcript = mock.transcript();
    let conn = Connection::new(address.parse().unwrap(), config.clone(), mock);

    let credentials = std::sync::Arc::new(CredentialStore::new(storage.clone()));
    credentials
        .reload()
        .await
        .expect("reload of the in-memory storage cannot fail");

    let result = handle_connection(
        conn,
        None,
        credentials,
        std::sync::Arc::new(AuthAttemptLimiter::new(
            config.server.smtp.auth_attempts_per_ip,
        )),
        std::sync::Arc::new(QuotaTracker::new()),
        storage,
        mail_handler,
    )
    .await;

    pretty_assertions::assert_eq!(
        std::str::from_utf8(expected_output),
        std::str::from_utf8(&transcript.contents()),
    );

    result
}

/// Call [`test_receiver_inner`]
#[macro_export]
macro_rules! test_receiver {
    ($input:expr, $output:expr) => {
        test_receiver! {
            on_mail => &mut $crate::receiver::DefaultMailHandler {},
            with_storage => std::sync::Arc::new($crate::storage::MemoryStorage::new()),
            with_config => $crate::config::local_test(),
            $input,
            $output
        }
    };
    (on_mail => $handler:expr, $input:expr, $output:expr) => {
        test_receiver! {
            on_mail => $handler,
            with_storage => std::sync::Arc::new($crate::storage::MemoryStorage::new()),
            with_config => $crate::config::local_test(),
            $input,
            $output
        }
    };
    (with_config => $config:expr, $input:expr, $output:expr) => {
        test_receiver! {
            on_mail => &mut $crate::receiver::DefaultMailHandler {},
            with_storage => std::sync::Arc::new($crate::storage::MemoryStorage::new()),
            with_config => $config,
            $input,
            $output
        }
    };
    (with_storage => $storage:expr, $input:expr, $output:expr) => {
        test_receiver! {
            on_mail => &mut $crate::receiver::DefaultMailHandler {},
            with_storage => $storage,
            with_config => $crate::config::local_test(),
            $input,
            $output
        }
    };
    (with_storage => $storage:expr, with_config => $config:expr, $input:expr, $output:expr) => {
        test_receiver! {
            on_mail => &mut $crate::receiver::DefaultMailHandler {},
            with_storage => $storage,
            with_config => $config,
            $input,
            $output
        }
    };
    (on_mail => $handler:expr, with_storage => $storage:expr, $input:expr, $output:expr) => {
        test_receiver! {
            on_mail => $handler,
            with_storage => $storage,
            with_config => $crate::config::local_test(),
            $input,
            $output
        }
    };
    (on_mail => $handler:expr, with_storage => $storage:expr, with_config => $config:expr, $input:expr, $output:expr) => {
        $crate::receiver::test_receiver_inner(
            "127.0.0.1:53844",
            $handler,
            $input.as_bytes(),
            $output.as_bytes(),
            std::sync::Arc::new($config),
            $storage,
        )
        .await
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_then_eof_and_records_writes() {
        let mut mock = Mock::new(b"HELO\r\n".to_vec());
        let transcript = mock.transcript();

        tokio::io::AsyncWriteExt::write_all(&mut mock, b"220 ready\r\n")
            .await
            .unwrap();

        let mut read_back = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut mock, &mut read_back)
            .await
            .unwrap();

        assert_eq!(read_back, b"HELO\r\n");
        assert_eq!(transcript.contents(), b"220 ready\r\n");

        // past the script, every read is a clean EOF
        let mut empty = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut mock, &mut empty)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
