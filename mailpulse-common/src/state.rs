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
use crate::mechanism::Mechanism;

/// State of the SMTP transaction
///
/// Whether the peer is authenticated is carried by the connection, not by
/// this enum: RSET (and a fresh EHLO) rewind the protocol position but do
/// not revoke a completed AUTH.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub enum StateSMTP {
    /// TCP/IP socket accepted, no HELO/EHLO seen yet
    Connect,
    /// HELO/EHLO received
    Helo,
    /// STARTTLS received, the stream is about to be upgraded
    NegotiationTLS,
    /// AUTH received, an exchange is about to run
    Authentication(Mechanism, Option<Vec<u8>>),
    /// MAIL FROM received
    MailFrom,
    /// at least one RCPT TO received
    RcptTo,
    /// DATA accepted, accumulating the message body
    Data,
    /// QUIT received or the connection is being torn down
    Stop,
}

impl std::fmt::Display for StateSMTP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Helo => "helo",
            Self::NegotiationTLS => "starttls",
            Self::Authentication(..) => "auth",
            Self::MailFrom => "mail",
            Self::RcptTo => "rcpt",
            Self::Data => "data",
            Self::Stop => "stop",
        })
    }
}
