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

use crate::config::ConfigServerTls;

struct TlsLogger;
impl rustls::KeyLog for TlsLogger {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        log::trace!("{} {:?} {:?}", label, client_random, secret);
    }
}

fn load_certificates(path: &std::path::Path) -> anyhow::Result<Vec<rustls::Certificate>> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(path)
            .with_context(|| format!("failed to open certificate '{}'", path.display()))?,
    );

    let certs = rustls_pemfile::certs(&mut reader)
        .with_context(|| format!("failed to parse certificate '{}'", path.display()))?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

    if certs.is_empty() {
        anyhow::bail!("no certificate found in '{}'", path.display());
    }
    Ok(certs)
}

fn load_private_key(path: &std::path::Path) -> anyhow::Result<rustls::PrivateKey> {
    let mut reader = std::io::BufReader::new(
        std::fs::File::open(path)
            .with_context(|| format!("failed to open private key '{}'", path.display()))?,
    );

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .with_context(|| format!("failed to parse private key '{}'", path.display()))?
        {
            Some(
                rustls_pemfile::Item::RSAKey(key)
                | rustls_pemfile::Item::PKCS8Key(key)
                | rustls_pemfile::Item::ECKey(key),
            ) => return Ok(rustls::PrivateKey(key)),
            Some(_) => continue,
            None => anyhow::bail!("no private key found in '{}'", path.display()),
        }
    }
}

/// Assemble the STARTTLS server configuration.
///
/// # Errors
///
/// * the certificate or key file is missing or unparsable
/// * the certificate and key do not match
pub fn get_rustls_config(config: &ConfigServerTls) -> anyhow::Result<rustls::ServerConfig> {
    let mut out = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(
            load_certificates(&config.certificate)?,
            load_private_key(&config.private_key)?,
        )
        .context("certificate and private key do not form a valid pair")?;

    out.key_log = std::sync::Arc::new(TlsLogger {});

    Ok(out)
}
