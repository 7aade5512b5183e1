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
use crate::config::{
    Codes, Config, ConfigForwarder, ConfigServer, ConfigServerLogs, ConfigServerSMTP,
    ConfigServerSMTPError, ConfigServerSMTPTimeoutClient, ConfigServerTls,
};
use mailpulse_common::code::SMTPReplyCode;

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ConfigServer::default(),
        }
    }
}

impl Default for ConfigServer {
    fn default() -> Self {
        Self {
            domain: Self::hostname(),
            addr: Self::default_addr(),
            client_count_max: Self::default_client_count_max(),
            database_url: String::default(),
            logs: ConfigServerLogs::default(),
            tls: None,
            smtp: ConfigServerSMTP::default(),
            forwarder: ConfigForwarder::default(),
        }
    }
}

impl ConfigServer {
    pub(crate) fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "mailpulse".to_string())
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        64
    }

    pub(crate) fn default_addr() -> std::net::SocketAddr {
        "0.0.0.0:2525".parse().expect("valid address")
    }
}

impl Default for ConfigServerLogs {
    fn default() -> Self {
        Self {
            filepath: Self::default_filepath(),
            format: Self::default_format(),
            level: Self::default_level(),
        }
    }
}

impl ConfigServerLogs {
    pub(crate) fn default_filepath() -> std::path::PathBuf {
        "/var/log/mailpulse/relay.log".into()
    }

    pub(crate) fn default_format() -> String {
        "{d} {h({l:<5})} {t} - {m}{n}".to_string()
    }

    pub(crate) fn default_level() -> std::collections::BTreeMap<String, log::LevelFilter> {
        std::collections::BTreeMap::from([("default".to_string(), log::LevelFilter::Warn)])
    }
}

impl ConfigServerTls {
    pub(crate) const fn default_handshake_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(1)
    }
}

impl Default for ConfigServerSMTPError {
    fn default() -> Self {
        Self {
            soft_count: 10,
            hard_count: 20,
            delay: std::time::Duration::from_millis(5000),
        }
    }
}

impl Default for ConfigServerSMTPTimeoutClient {
    fn default() -> Self {
        Self {
            pre_auth: std::time::Duration::from_secs(60),
            post_auth: std::time::Duration::from_secs(5 * 60),
        }
    }
}

impl Default for ConfigServerSMTP {
    fn default() -> Self {
        Self {
            tls_required: false,
            rcpt_count_max: Self::default_rcpt_count_max(),
            message_size_max: Self::default_message_size_max(),
            auth_attempt_count_max: Self::default_auth_attempt_count_max(),
            auth_attempts_per_ip: Self::default_auth_attempts_per_ip(),
            error: ConfigServerSMTPError::default(),
            timeout_client: ConfigServerSMTPTimeoutClient::default(),
            codes: Codes::default(),
        }
    }
}

impl ConfigServerSMTP {
    pub(crate) const fn default_rcpt_count_max() -> usize {
        100
    }

    // advertised in the EHLO capability list, keep in sync
    pub(crate) const fn default_message_size_max() -> usize {
        52_428_800
    }

    pub(crate) const fn default_auth_attempt_count_max() -> i64 {
        3
    }

    pub(crate) const fn default_auth_attempts_per_ip() -> usize {
        5
    }
}

impl Default for ConfigForwarder {
    fn default() -> Self {
        Self {
            deadline: Self::default_deadline(),
        }
    }
}

impl ConfigForwarder {
    pub(crate) const fn default_deadline() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}

impl Default for Codes {
    fn default() -> Self {
        let codes: std::collections::HashMap<SMTPReplyCode, &'static str> =
            std::collections::HashMap::from([
                (
                    SMTPReplyCode::Greetings,
                    "220 {domain} SMTP Server Ready\r\n",
                ),
                (SMTPReplyCode::TlsReady, "220 Ready to start TLS\r\n"),
                (SMTPReplyCode::Code221, "221 Goodbye\r\n"),
                (
                    SMTPReplyCode::AuthSucceeded,
                    "235 Authentication successful\r\n",
                ),
                (SMTPReplyCode::Code250, "250 OK\r\n"),
                (SMTPReplyCode::Code250Helo, "250 {domain} Hello\r\n"),
                (
                    SMTPReplyCode::Code250PlainEsmtp,
                    "250-{domain} Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
                ),
                (
                    SMTPReplyCode::Code250SecuredEsmtp,
                    "250-{domain} Hello\r\n250-AUTH PLAIN LOGIN\r\n250 SIZE 52428800\r\n",
                ),
                (
                    SMTPReplyCode::MessageAccepted,
                    "250 OK: Message accepted\r\n",
                ),
                (
                    SMTPReplyCode::Code354,
                    "354 End data with <CR><LF>.<CR><LF>\r\n",
                ),
                (
                    SMTPReplyCode::TooManyAuthAttempts,
                    "421 Too many authentication attempts\r\n",
                ),
                (SMTPReplyCode::Code451, "451 Temporary server error\r\n"),
                (
                    SMTPReplyCode::TooManyError,
                    "451 Too many errors from the client\r\n",
                ),
                (
                    SMTPReplyCode::TooManyRecipients,
                    "452 Too many recipients\r\n",
                ),
                (
                    SMTPReplyCode::QuotaExceeded,
                    "452 Sending quota exceeded\r\n",
                ),
                (SMTPReplyCode::Code500, "500 Command not recognized\r\n"),
                (SMTPReplyCode::Code501, "501 Syntax error\r\n"),
                (SMTPReplyCode::Code502, "502 Command not implemented\r\n"),
                (SMTPReplyCode::TlsNotAvailable, "502 TLS not available\r\n"),
                (
                    SMTPReplyCode::BadSequence,
                    "503 Bad sequence of commands\r\n",
                ),
                (
                    SMTPReplyCode::AlreadyAuthenticated,
                    "503 Already authenticated\r\n",
                ),
                (
                    SMTPReplyCode::AuthMechanismNotSupported,
                    "504 Authentication mechanism not supported\r\n",
                ),
                (
                    SMTPReplyCode::AuthClientCanceled,
                    "501 Authentication canceled by client\r\n",
                ),
                (
                    SMTPReplyCode::AuthRequired,
                    "530 Authentication required\r\n",
                ),
                (
                    SMTPReplyCode::TlsRequired,
                    "530 Must issue a STARTTLS command first\r\n",
                ),
                (
                    SMTPReplyCode::AuthInvalidCredentials,
                    "535 Authentication failed\r\n",
                ),
                (
                    SMTPReplyCode::MessageSizeExceeded,
                    "552 Message size exceeds maximum permitted\r\n",
                ),
                (
                    SMTPReplyCode::ProjectNotActive,
                    "554 Transaction failed: Project not active\r\n",
                ),
                (
                    SMTPReplyCode::ConnectionMaxReached,
                    "554 Cannot process connection, closing.\r\n",
                ),
            ]);

        Self {
            codes: codes
                .into_iter()
                .map(|(k, v)| (k, v.to_string()))
                .collect(),
        }
    }
}
