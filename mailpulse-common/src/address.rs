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

/// A validated SMTP mailbox, kept byte-for-byte as the client sent it.
///
/// The relay never routes on the mailbox itself (the upstream smart-host
/// does), so the address is validated once at the MAIL/RCPT boundary and
/// carried as an opaque string from there on: into the stored envelope and
/// back out to the forwarder, unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl std::str::FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match addr::parse_email_address(s) {
            Ok(_) => Ok(Self(s.to_string())),
            Err(error) => anyhow::bail!("'{}' is not a valid address: {}", s, error),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Address {
    /// the mailbox as received.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn accepted_as_sent() {
        let parsed = "Hello@Domain.com".parse::<Address>().unwrap();
        // no normalization: the envelope is the client's, verbatim
        assert_eq!(parsed.full(), "Hello@Domain.com");
        assert_eq!(parsed.to_string(), "Hello@Domain.com");
    }

    #[test]
    fn invalid() {
        assert!("not an address".parse::<Address>().is_err());
        assert!("@no-local-part.com".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn equality_is_byte_wise() {
        let lower = "a@x.org".parse::<Address>().unwrap();
        let upper = "A@X.org".parse::<Address>().unwrap();
        assert_ne!(lower, upper);
    }
}
