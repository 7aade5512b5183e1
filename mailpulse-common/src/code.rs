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
/// 2yz  Positive Completion reply
/// 3yz  Positive Intermediate reply
/// 4yz  Transient Negative Completion reply
/// 5yz  Permanent Negative Completion reply
///
/// The text associated with each code lives in the server configuration
/// (`Codes`); the code is the contract, the text is advisory.
#[allow(clippy::module_name_repetitions)]
#[derive(
    Debug,
    Ord,
    PartialOrd,
    PartialEq,
    Eq,
    Hash,
    Copy,
    Clone,
    serde::Serialize,
    serde::Deserialize,
    strum::EnumIter,
)]
#[serde(untagged)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub enum SMTPReplyCode {
    /// 220 service ready
    Greetings,
    /// 220 ready to start tls
    TlsReady,
    /// 221 service closing transmission channel
    Code221,
    /// 235 2.7.0 authentication succeeded
    AuthSucceeded,
    /// 250 requested mail action okay
    Code250,
    /// 250 helo reply
    Code250Helo,
    /// 250 ehlo reply, plain text capabilities
    Code250PlainEsmtp,
    /// 250 ehlo reply once the channel is encrypted
    Code250SecuredEsmtp,
    /// 250 end-of-data reply, the message is durably stored
    MessageAccepted,
    /// 354 start mail input
    Code354,
    /// 421 too many authentication attempts from one address
    TooManyAuthAttempts,
    /// 451 requested action aborted: local error in processing
    Code451,
    /// 451 the client sent too many erroneous commands
    TooManyError,
    /// 452 the recipient list is full
    TooManyRecipients,
    /// 452 a sending quota is exhausted
    QuotaExceeded,
    /// 500 syntax error, command unrecognized
    Code500,
    /// 501 syntax error in parameters or arguments
    Code501,
    /// 502 command not implemented
    Code502,
    /// 502 starttls received but tls is not configured
    TlsNotAvailable,
    /// 503 bad sequence of commands
    BadSequence,
    /// 503 a second AUTH after a successful one
    AlreadyAuthenticated,
    /// 504 5.5.4 mechanism not supported
    AuthMechanismNotSupported,
    /// 501 the client canceled the exchange with "*"
    AuthClientCanceled,
    /// 530 5.7.0 authentication required
    AuthRequired,
    /// 530 must issue a STARTTLS command first
    TlsRequired,
    /// 535 5.7.8 authentication credentials invalid
    AuthInvalidCredentials,
    /// 552 message size exceeds the advertised maximum
    MessageSizeExceeded,
    /// 554 the authenticated project is no longer active
    ProjectNotActive,
    /// 554 connection refused, server full
    ConnectionMaxReached,
}

impl SMTPReplyCode {
    /// Is the code considered as an error
    #[must_use]
    pub const fn is_error(self) -> bool {
        match self {
            Self::Greetings
            | Self::TlsReady
            | Self::Code221
            | Self::AuthSucceeded
            | Self::Code250
            | Self::Code250Helo
            | Self::Code250PlainEsmtp
            | Self::Code250SecuredEsmtp
            | Self::MessageAccepted
            | Self::Code354 => false,
            Self::TooManyAuthAttempts
            | Self::Code451
            | Self::TooManyError
            | Self::TooManyRecipients
            | Self::QuotaExceeded
            | Self::Code500
            | Self::Code501
            | Self::Code502
            | Self::TlsNotAvailable
            | Self::BadSequence
            | Self::AlreadyAuthenticated
            | Self::AuthMechanismNotSupported
            | Self::AuthClientCanceled
            | Self::AuthRequired
            | Self::TlsRequired
            | Self::AuthInvalidCredentials
            | Self::MessageSizeExceeded
            | Self::ProjectNotActive
            | Self::ConnectionMaxReached => true,
        }
    }
}

impl std::fmt::Display for SMTPReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Greetings => "Greetings",
            Self::TlsReady => "TlsReady",
            Self::Code221 => "Code221",
            Self::AuthSucceeded => "AuthSucceeded",
            Self::Code250 => "Code250",
            Self::Code250Helo => "Code250Helo",
            Self::Code250PlainEsmtp => "Code250PlainEsmtp",
            Self::Code250SecuredEsmtp => "Code250SecuredEsmtp",
            Self::MessageAccepted => "MessageAccepted",
            Self::Code354 => "Code354",
            Self::TooManyAuthAttempts => "TooManyAuthAttempts",
            Self::Code451 => "Code451",
            Self::TooManyError => "TooManyError",
            Self::TooManyRecipients => "TooManyRecipients",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::Code500 => "Code500",
            Self::Code501 => "Code501",
            Self::Code502 => "Code502",
            Self::TlsNotAvailable => "TlsNotAvailable",
            Self::BadSequence => "BadSequence",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::AuthMechanismNotSupported => "AuthMechanismNotSupported",
            Self::AuthClientCanceled => "AuthClientCanceled",
            Self::AuthRequired => "AuthRequired",
            Self::TlsRequired => "TlsRequired",
            Self::AuthInvalidCredentials => "AuthInvalidCredentials",
            Self::MessageSizeExceeded => "MessageSizeExceeded",
            Self::ProjectNotActive => "ProjectNotActive",
            Self::ConnectionMaxReached => "ConnectionMaxReached",
        })
    }
}

impl From<SMTPReplyCode> for String {
    fn from(code: SMTPReplyCode) -> Self {
        format!("{code}")
    }
}

impl std::str::FromStr for SMTPReplyCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Greetings" => Ok(Self::Greetings),
            "TlsReady" => Ok(Self::TlsReady),
            "Code221" => Ok(Self::Code221),
            "AuthSucceeded" => Ok(Self::AuthSucceeded),
            "Code250" => Ok(Self::Code250),
            "Code250Helo" => Ok(Self::Code250Helo),
            "Code250PlainEsmtp" => Ok(Self::Code250PlainEsmtp),
            "Code250SecuredEsmtp" => Ok(Self::Code250SecuredEsmtp),
            "MessageAccepted" => Ok(Self::MessageAccepted),
            "Code354" => Ok(Self::Code354),
            "TooManyAuthAttempts" => Ok(Self::TooManyAuthAttempts),
            "Code451" => Ok(Self::Code451),
            "TooManyError" => Ok(Self::TooManyError),
            "TooManyRecipients" => Ok(Self::TooManyRecipients),
            "QuotaExceeded" => Ok(Self::QuotaExceeded),
            "Code500" => Ok(Self::Code500),
            "Code501" => Ok(Self::Code501),
            "Code502" => Ok(Self::Code502),
            "TlsNotAvailable" => Ok(Self::TlsNotAvailable),
            "BadSequence" => Ok(Self::BadSequence),
            "AlreadyAuthenticated" => Ok(Self::AlreadyAuthenticated),
            "AuthMechanismNotSupported" => Ok(Self::AuthMechanismNotSupported),
            "AuthClientCanceled" => Ok(Self::AuthClientCanceled),
            "AuthRequired" => Ok(Self::AuthRequired),
            "TlsRequired" => Ok(Self::TlsRequired),
            "AuthInvalidCredentials" => Ok(Self::AuthInvalidCredentials),
            "MessageSizeExceeded" => Ok(Self::MessageSizeExceeded),
            "ProjectNotActive" => Ok(Self::ProjectNotActive),
            "ConnectionMaxReached" => Ok(Self::ConnectionMaxReached),
            _ => Err(anyhow::anyhow!("not a valid SMTPReplyCode: '{}'", s)),
        }
    }
}

impl TryFrom<String> for SMTPReplyCode {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <Self as std::str::FromStr>::from_str(&value)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::SMTPReplyCode;

    #[test]
    fn error() {
        assert_eq!(
            format!("{}", SMTPReplyCode::from_str("foobar").unwrap_err()),
            "not a valid SMTPReplyCode: 'foobar'"
        );
    }

    #[test]
    fn same() {
        for s in <SMTPReplyCode as strum::IntoEnumIterator>::iter() {
            assert_eq!(SMTPReplyCode::from_str(&format!("{s}")).unwrap(), s);
            assert_eq!(String::try_from(s).unwrap(), format!("{s}"));
        }
    }
}
