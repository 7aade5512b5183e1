//! MailPulse SMTP receiver

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

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

mod receiver;
mod runtime;
mod server;

/// project credential snapshot and verification.
pub mod auth;
/// sliding-window sending quotas and AUTH attempt limiting.
pub mod quota;

pub use receiver::{handle_connection, Connection, MailHandler, OnMail};
pub use runtime::start_runtime;
pub use server::Server;

/// re-exported module
pub mod re {
    pub use tokio;
}
