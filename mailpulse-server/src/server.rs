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
use crate::auth::CredentialStore;
use crate::quota::{AuthAttemptLimiter, QuotaTracker};
use crate::receiver::{handle_connection, Connection, MailHandler};
use mailpulse_common::code::SMTPReplyCode;
use mailpulse_config::{get_rustls_config, log_channel::SERVER, Config};
use mailpulse_forward::Forwarder;
use mailpulse_store::Storage;

/// TCP/IP server
pub struct Server {
    listener: tokio::net::TcpListener,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    config: std::sync::Arc<Config>,
    storage: std::sync::Arc<dyn Storage>,
    credentials: std::sync::Arc<CredentialStore>,
    limiter: std::sync::Arc<AuthAttemptLimiter>,
    quota: std::sync::Arc<QuotaTracker>,
    forwarder: std::sync::Arc<Forwarder>,
}

impl Server {
    /// Create a server with the configuration provided, and the socket
    /// already bound
    ///
    /// # Errors
    ///
    /// * cannot convert the socket to [tokio::net::TcpListener]
    /// * cannot initialize the [rustls] config
    pub fn new(
        config: std::sync::Arc<Config>,
        socket: std::net::TcpListener,
        storage: std::sync::Arc<dyn Storage>,
        credentials: std::sync::Arc<CredentialStore>,
        forwarder: std::sync::Arc<Forwarder>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            listener: tokio::net::TcpListener::from_std(socket)?,
            tls_config: config
                .server
                .tls
                .as_ref()
                .map(get_rustls_config)
                .transpose()?
                .map(std::sync::Arc::new),
            limiter: std::sync::Arc::new(AuthAttemptLimiter::new(
                config.server.smtp.auth_attempts_per_ip,
            )),
            quota: std::sync::Arc::new(QuotaTracker::new()),
            config,
            storage,
            credentials,
            forwarder,
        })
    }

    /// Get the local address of the tcp listener
    ///
    /// # Panics
    ///
    /// * the listener has no local address
    #[must_use]
    pub fn addr(&self) -> std::net::SocketAddr {
        self.listener
            .local_addr()
            .expect("cannot retrieve local address")
    }

    /// Rebuild the credential snapshot, for the admin surface to invoke
    /// after any project mutation. Returns once the new snapshot is visible
    /// to every session.
    ///
    /// # Errors
    ///
    /// * the project table cannot be read
    pub async fn reload_projects(&self) -> Result<(), mailpulse_store::Error> {
        self.credentials.reload().await
    }

    /// The forwarder, for the admin surface's resend endpoint.
    #[must_use]
    pub fn forwarder(&self) -> std::sync::Arc<Forwarder> {
        self.forwarder.clone()
    }

    /// Main loop of the relay
    ///
    /// # Errors
    ///
    /// * the listener failed
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        log::info!(
            target: SERVER,
            "SMTP server listening on {} (authentication mandatory)",
            self.addr()
        );

        let client_counter = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));

        loop {
            let (mut stream, client_addr) = self.listener.accept().await?;
            log::info!(target: SERVER, "connection from {client_addr}");

            if self.config.server.client_count_max != -1
                && client_counter.load(std::sync::atomic::Ordering::SeqCst)
                    >= self.config.server.client_count_max
            {
                if let Err(e) = tokio::io::AsyncWriteExt::write_all(
                    &mut stream,
                    self.config
                        .server
                        .smtp
                        .codes
                        .get(SMTPReplyCode::ConnectionMaxReached)
                        .as_bytes(),
                )
                .await
                {
                    log::warn!(target: SERVER, "{e}");
                }

                if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
                    log::warn!(target: SERVER, "{e}");
                }
                continue;
            }

            client_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

            let session = Self::run_session(
                stream,
                client_addr,
                self.config.clone(),
                self.tls_config.clone(),
                self.credentials.clone(),
                self.limiter.clone(),
                self.quota.clone(),
                self.storage.clone(),
                self.forwarder.clone(),
            );
            let client_counter_copy = client_counter.clone();
            tokio::spawn(async move {
                session.await;
                client_counter_copy.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<Config>,
        tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
        credentials: std::sync::Arc<CredentialStore>,
        limiter: std::sync::Arc<AuthAttemptLimiter>,
        quota: std::sync::Arc<QuotaTracker>,
        storage: std::sync::Arc<dyn Storage>,
        forwarder: std::sync::Arc<Forwarder>,
    ) {
        let begin = std::time::SystemTime::now();

        let conn = Connection::new(client_addr, config, stream);
        let mut mail_handler = MailHandler { storage: storage.clone(), forwarder };

        match handle_connection(
            conn,
            tls_config,
            credentials,
            limiter,
            quota,
            storage,
            &mut mail_handler,
        )
        .await
        {
            Ok(()) => {
                log::info!(
                    target: SERVER,
                    "{{ elapsed: {:?} }} connection {client_addr} closed cleanly",
                    begin.elapsed()
                );
            }
            Err(error) => {
                log::warn!(
                    target: SERVER,
                    "{{ elapsed: {:?} }} connection {client_addr} closed with an error: {error}",
                    begin.elapsed()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailpulse_common::crypto::EncryptionKey;
    use mailpulse_test::storage::{active_project, MemoryStorage};

    #[tokio::test]
    async fn init_server_valid() {
        let config = std::sync::Arc::new(mailpulse_test::config::local_test());
        let storage = std::sync::Arc::new(MemoryStorage::new());
        storage.insert_project(active_project("prj_1"));

        let credentials = std::sync::Arc::new(CredentialStore::new(storage.clone()));
        let forwarder = std::sync::Arc::new(Forwarder::new(
            config.clone(),
            storage.clone(),
            EncryptionKey::new("test-key"),
        ));

        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        let bound = socket.local_addr().unwrap();

        let server = Server::new(config, socket, storage, credentials.clone(), forwarder).unwrap();
        assert_eq!(server.addr(), bound);

        // the reload hook publishes the seeded project
        assert_eq!(credentials.project_count(), 0);
        server.reload_projects().await.unwrap();
        assert_eq!(credentials.project_count(), 1);
    }
}
