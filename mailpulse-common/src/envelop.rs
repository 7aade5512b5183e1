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
use crate::address::Address;

/// Data received during a smtp transaction.
///
/// `mail_from` and `rcpt` only hold values between a successful MAIL FROM
/// and the end of the transaction (final `.`, RSET or QUIT).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelop {
    /// result of the HELO/EHLO command.
    pub helo: String,
    /// the sender of the email received using the MAIL FROM command.
    pub mail_from: Option<Address>,
    /// recipients in RCPT TO reception order.
    pub rcpt: Vec<Address>,
}

impl Envelop {
    /// forget the in-flight transaction, keeping the HELO identity.
    pub fn clear(&mut self) {
        self.mail_from = None;
        self.rcpt.clear();
    }
}
