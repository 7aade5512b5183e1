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
use anyhow::Context;

use crate::auth::CredentialStore;
use crate::server::Server;
use mailpulse_common::crypto::EncryptionKey;
use mailpulse_config::{log_channel::SERVER, Config};
use mailpulse_forward::Forwarder;
use mailpulse_store::{PgStorage, Storage};

/// Start the relay's runtime: connect the store, load the credential
/// snapshot, and serve the socket until the process is stopped.
///
/// # Errors
///
/// * `database_url` is missing or unreachable
/// * the listener or the TLS configuration cannot be initialized
#[allow(clippy::module_name_repetitions)]
pub fn start_runtime(
    config: std::sync::Arc<Config>,
    socket: std::net::TcpListener,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mailpulse-relay")
        .build()?;

    runtime.block_on(async move {
        anyhow::ensure!(
            !config.server.database_url.is_empty(),
            "DATABASE_URL is required"
        );

        let key = EncryptionKey::from_env();

        let storage: std::sync::Arc<dyn Storage> = std::sync::Arc::new(
            PgStorage::connect(&config.server.database_url, key.clone())
                .await
                .context("could not initialize the storage")?,
        );

        let credentials = std::sync::Arc::new(CredentialStore::new(storage.clone()));
        credentials
            .reload()
            .await
            .context("could not load the projects")?;
        log::info!(
            target: SERVER,
            "{} project(s) loaded",
            credentials.project_count()
        );

        let forwarder = std::sync::Arc::new(Forwarder::new(
            config.clone(),
            storage.clone(),
            key,
        ));

        let server = Server::new(config, socket, storage, credentials, forwarder)?;
        server.listen_and_serve().await
    })
}
