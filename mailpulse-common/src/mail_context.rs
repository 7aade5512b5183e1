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
use crate::envelop::Envelop;

/// average size of a mail
pub const MAIL_CAPACITY: usize = 10_000_000; // 10MB

/// metadata
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    /// instant when the message entered the DATA phase.
    pub timestamp: time::OffsetDateTime,
    /// unique id synthesized when the message is accepted.
    /// format: `{unix nanoseconds}@{hostname}`
    pub message_id: String,
}

/// Representation of one mail obtained by a SMTP transaction
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub struct MailContext {
    /// time of connection by the client.
    pub connection_timestamp: std::time::SystemTime,
    /// emitter of the mail
    pub client_addr: std::net::SocketAddr,
    /// project the session authenticated as
    pub project_id: String,
    /// envelop of the message
    pub envelop: Envelop,
    /// raw content of the message as received, final `.` line excluded
    pub body: String,
    /// metadata
    pub metadata: MessageMetadata,
}
