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
#![allow(clippy::module_name_repetitions)]
#![allow(missing_docs)]
use mailpulse_common::code::SMTPReplyCode;

/// Root of the relay configuration.
///
/// Defaults are production-ready except for `database_url`, which has no
/// sensible default. A TOML file may override everything; the environment
/// variables of the deployment (`DATABASE_URL`, `SMTP_PORT`,
/// `SMTP_TLS_REQUIRED`, `HOSTNAME`) take precedence over both.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ConfigServer,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServer {
    /// hostname used in the greeting and in Message-ID synthesis.
    #[serde(default = "ConfigServer::hostname")]
    pub domain: String,
    #[serde(default = "ConfigServer::default_addr")]
    pub addr: std::net::SocketAddr,
    #[serde(default = "ConfigServer::default_client_count_max")]
    pub client_count_max: i64,
    /// DSN of the persistent store, `DATABASE_URL`.
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub logs: ConfigServerLogs,
    pub tls: Option<ConfigServerTls>,
    #[serde(default)]
    pub smtp: ConfigServerSMTP,
    #[serde(default)]
    pub forwarder: ConfigForwarder,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerLogs {
    #[serde(default = "ConfigServerLogs::default_filepath")]
    pub filepath: std::path::PathBuf,
    #[serde(default = "ConfigServerLogs::default_format")]
    pub format: String,
    #[serde(default = "ConfigServerLogs::default_level")]
    pub level: std::collections::BTreeMap<String, log::LevelFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerTls {
    /// PEM encoded certificate chain.
    pub certificate: std::path::PathBuf,
    /// PEM encoded pkcs8 or rsa private key.
    pub private_key: std::path::PathBuf,
    #[serde(
        default = "ConfigServerTls::default_handshake_timeout",
        with = "humantime_serde"
    )]
    pub handshake_timeout: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSMTPError {
    pub soft_count: i64,
    pub hard_count: i64,
    #[serde(with = "humantime_serde")]
    pub delay: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSMTPTimeoutClient {
    /// idle-read timeout before a successful AUTH.
    #[serde(with = "humantime_serde")]
    pub pre_auth: std::time::Duration,
    /// idle-read timeout once the session is authenticated.
    #[serde(with = "humantime_serde")]
    pub post_auth: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSMTP {
    /// when true the session must not accept AUTH before STARTTLS,
    /// `SMTP_TLS_REQUIRED`.
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default = "ConfigServerSMTP::default_rcpt_count_max")]
    pub rcpt_count_max: usize,
    /// advertised with `SIZE`; one byte over is refused with 552.
    #[serde(default = "ConfigServerSMTP::default_message_size_max")]
    pub message_size_max: usize,
    /// failed AUTH exchanges tolerated on one connection, -1 to disable.
    #[serde(default = "ConfigServerSMTP::default_auth_attempt_count_max")]
    pub auth_attempt_count_max: i64,
    /// AUTH attempts allowed per client address in a trailing minute.
    #[serde(default = "ConfigServerSMTP::default_auth_attempts_per_ip")]
    pub auth_attempts_per_ip: usize,
    #[serde(default)]
    pub error: ConfigServerSMTPError,
    #[serde(default)]
    pub timeout_client: ConfigServerSMTPTimeoutClient,
    #[serde(default)]
    pub codes: Codes,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigForwarder {
    /// end-to-end deadline of one upstream submission.
    #[serde(default = "ConfigForwarder::default_deadline", with = "humantime_serde")]
    pub deadline: std::time::Duration,
}

/// Text sent for each reply code. `{domain}` placeholders are substituted
/// once, when the configuration is finalized.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct Codes {
    pub codes: std::collections::HashMap<SMTPReplyCode, String>,
}

impl Codes {
    /// return the message associated with a [`SMTPReplyCode`].
    ///
    /// # Panics
    ///
    /// * the code has no text, meaning the config escaped [`Config::finalize`]
    #[must_use]
    pub fn get(&self, code: SMTPReplyCode) -> &str {
        self.codes
            .get(&code)
            .unwrap_or_else(|| panic!("ill-formed config: no text for code {code:?}"))
    }
}

impl Config {
    /// Parse a [`Config`] with TOML format.
    ///
    /// The result still carries `{domain}` placeholders: callers apply their
    /// environment overrides, then [`Config::finalize`].
    ///
    /// # Errors
    ///
    /// * data is not a valid TOML, or one field is unknown
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        toml::from_str::<Self>(input).map_err(anyhow::Error::new)
    }

    /// Default configuration with the deployment environment applied.
    ///
    /// # Errors
    ///
    /// * `SMTP_PORT` is not a valid port number
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config.finalize())
    }

    /// Override fields from the deployment environment.
    ///
    /// # Errors
    ///
    /// * `SMTP_PORT` is not a valid port number
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.server.database_url = url;
        }
        if let Ok(port) = std::env::var("SMTP_PORT") {
            self.server.addr.set_port(
                port.parse()
                    .map_err(|e| anyhow::anyhow!("SMTP_PORT is not a port number: {}", e))?,
            );
        }
        if let Ok(required) = std::env::var("SMTP_TLS_REQUIRED") {
            self.server.smtp.tls_required =
                matches!(required.to_ascii_lowercase().as_str(), "true" | "yes" | "1");
        }
        if let Ok(domain) = std::env::var("HOSTNAME") {
            if !domain.is_empty() {
                self.server.domain = domain;
            }
        }
        Ok(())
    }

    /// Substitute `{domain}` in every reply text and check completeness.
    ///
    /// # Panics
    ///
    /// * a reply code has no associated text
    #[must_use]
    pub fn finalize(mut self) -> Self {
        let domain = self.server.domain.clone();

        for code in <SMTPReplyCode as strum::IntoEnumIterator>::iter() {
            assert!(
                self.server.smtp.codes.codes.contains_key(&code),
                "ill-formed config: no text for code {code:?}"
            );
        }

        for text in self.server.smtp.codes.codes.values_mut() {
            *text = text.replace("{domain}", &domain);
        }

        self
    }
}
