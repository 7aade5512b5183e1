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
use crate::code::SMTPReplyCode;
use crate::mechanism::Mechanism;

/// maximum length of a command line, CRLF excluded.
/// See <https://datatracker.ietf.org/doc/html/rfc5321#section-4.5.3.1.4>
pub const COMMAND_MAX_LENGTH: usize = 512;

/// maximum length of a text line received during DATA, CRLF excluded.
pub const DATA_LINE_MAX_LENGTH: usize = 998;

/// Command SMTPs sent and received by servers and clients
/// See "Simple Mail Transfer Protocol"
/// <https://datatracker.ietf.org/doc/html/rfc5321>
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// Used to identify the SMTP client to the SMTP server.
    /// Syntax = `"HELO" SP ( Domain / address-literal ) CRLF`
    HeloCmd(String),
    /// Used to identify the SMTP client to the SMTP server and request smtp
    /// extensions.
    /// Syntax = `"EHLO" SP ( Domain / address-literal ) CRLF`
    EhloCmd(String),
    /// Initiate a mail transaction.
    /// Syntax = `"MAIL FROM:" Reverse-path [SP Mail-parameters] CRLF`
    ///
    /// The second field is the SIZE declaration of the message, when the
    /// client sent one.
    MailCmd(String, Option<usize>),
    /// Identify an individual recipient of the mail data.
    /// Syntax = `"RCPT TO:" Forward-path [SP Rcpt-parameters] CRLF`
    RcptCmd(String),
    /// Causes the mail data to be appended to the mail data buffer.
    /// Syntax = `"DATA" CRLF`
    DataCmd,
    /// Lines ended by CRLF sent between [`Event::DataCmd`] and
    /// [`Event::DataEnd`], dot-unstuffed.
    DataLine(String),
    /// The mail data are terminated by a line containing only a period.
    /// Syntax = `"." CRLF`
    DataEnd,
    /// Abort the current mail transaction; sender, recipients and mail data
    /// are discarded.
    /// Syntax = `"RSET" CRLF`
    RsetCmd,
    /// Confirm that the argument identifies a user or mailbox.
    /// Syntax = `"VRFY" SP String CRLF`
    VrfyCmd(String),
    /// Confirm that the argument identifies a mailing list.
    /// Syntax = `"EXPN" SP String CRLF`
    ExpnCmd(String),
    /// No-op.
    /// Syntax = `"NOOP" [ SP String ] CRLF`
    NoopCmd,
    /// The receiver MUST send a "221" reply and close the channel.
    /// Syntax = `"QUIT" CRLF`
    QuitCmd,
    /// See "Transport Layer Security"
    /// <https://datatracker.ietf.org/doc/html/rfc3207>
    /// Syntax = `"STARTTLS" CRLF`
    StartTls,
    /// Authentication with SASL protocol
    /// <https://datatracker.ietf.org/doc/html/rfc4954>
    /// Syntax = `"AUTH" mechanism [initial-response] CRLF`
    Auth(Mechanism, Option<Vec<u8>>),
}

impl Event {
    /// Create a valid SMTP command (or event) from a string OR return a SMTP
    /// error code.
    /// See <https://datatracker.ietf.org/doc/html/rfc5321#section-4.1>
    ///
    /// # Errors
    ///
    /// * the line is empty, too long, or not a well formed command
    pub fn parse_cmd(input: &str) -> Result<Self, SMTPReplyCode> {
        if input.len() > COMMAND_MAX_LENGTH || input.is_empty() {
            return Err(SMTPReplyCode::Code500);
        }

        let words = input.split_whitespace().collect::<Vec<&str>>();

        let mut smtp_args = words.iter();
        let smtp_verb = match smtp_args.next() {
            // NOTE: if the first word is not the beginning of the input
            // (whitespace before)
            Some(first_word) if &input[..first_word.len()] != *first_word => {
                return Err(SMTPReplyCode::Code501);
            }
            Some(smtp_verb) => smtp_verb,
            None => return Err(SMTPReplyCode::Code500),
        };

        match (
            smtp_verb.to_ascii_uppercase().as_str(),
            smtp_args.as_slice(),
        ) {
            ("HELO", args) => Self::parse_arg_helo(args),
            ("EHLO", args) => Self::parse_arg_ehlo(args),
            ("MAIL", args) => Self::parse_arg_mail_from(args),
            ("RCPT", args) => Self::parse_arg_rcpt_to(args),

            ("VRFY", [user_or_mailbox]) => Ok(Self::VrfyCmd((*user_or_mailbox).to_string())),
            ("EXPN", [mailing_list]) => Ok(Self::ExpnCmd((*mailing_list).to_string())),

            ("DATA", []) => Ok(Self::DataCmd),
            ("QUIT", []) => Ok(Self::QuitCmd),
            ("RSET", []) => Ok(Self::RsetCmd),
            ("NOOP", [..]) => Ok(Self::NoopCmd),

            ("STARTTLS", []) => Ok(Self::StartTls),
            ("AUTH", [mechanism]) => Self::parse_arg_auth(mechanism, None),
            ("AUTH", [mechanism, initial_response]) => {
                Self::parse_arg_auth(mechanism, Some(initial_response))
            }

            ("VRFY" | "EXPN" | "DATA" | "QUIT" | "RSET" | "STARTTLS" | "AUTH", _) => {
                Err(SMTPReplyCode::Code501)
            }
            _ => Err(SMTPReplyCode::Code500),
        }
    }

    fn parse_domain_or_address_literal(args: &[&str]) -> anyhow::Result<String> {
        match args {
            [ip] if ip.starts_with('[') && ip.ends_with(']') => Ok(ip[1..ip.len() - 1]
                .parse::<std::net::IpAddr>()
                .map_err(|e| anyhow::anyhow!(e))?
                .to_string()),
            [domain] => Ok(addr::parse_domain_name(domain)
                .map_err(|e| anyhow::anyhow!(e.input().to_string()))?
                .to_string()),
            _ => anyhow::bail!("no domain or ip found in arguments"),
        }
    }

    fn parse_arg_helo(args: &[&str]) -> Result<Self, SMTPReplyCode> {
        match Self::parse_domain_or_address_literal(args) {
            Ok(out) => Ok(Self::HeloCmd(out)),
            Err(_) => Err(SMTPReplyCode::Code501),
        }
    }

    fn parse_arg_ehlo(args: &[&str]) -> Result<Self, SMTPReplyCode> {
        match Self::parse_domain_or_address_literal(args) {
            Ok(out) => Ok(Self::EhloCmd(out)),
            Err(_) => Err(SMTPReplyCode::Code501),
        }
    }

    fn from_path(input: &str, may_be_empty: bool) -> Result<String, SMTPReplyCode> {
        if input.starts_with('<') && input.ends_with('>') {
            match &input[1..input.len() - 1] {
                "" if may_be_empty => Ok(String::new()),
                mailbox => match addr::parse_email_address(mailbox) {
                    Ok(mailbox) => Ok(mailbox.to_string()),
                    Err(_) => Err(SMTPReplyCode::Code501),
                },
            }
        } else {
            Err(SMTPReplyCode::Code501)
        }
    }

    fn parse_arg_mail_from(args: &[&str]) -> Result<Self, SMTPReplyCode> {
        fn parse_esmtp_args(path: String, args: &[&str]) -> Result<Event, SMTPReplyCode> {
            let mut size_declared = None;

            for arg in args {
                if let Some(raw) = arg.strip_prefix("SIZE=") {
                    if size_declared.is_none() {
                        size_declared =
                            Some(raw.parse::<usize>().map_err(|_| SMTPReplyCode::Code501)?);
                    } else {
                        return Err(SMTPReplyCode::Code501);
                    }
                } else if *arg == "SMTPUTF8"
                    || arg.starts_with("BODY=")
                    || arg.starts_with("AUTH=")
                {
                    // accepted and ignored: the relay stores and forwards the
                    // message verbatim.
                } else {
                    return Err(SMTPReplyCode::Code501);
                }
            }

            Ok(Event::MailCmd(path, size_declared))
        }

        match args {
            // note: separated word, "MAIL FROM: <a@b>"
            [from, reverse_path, ..] if from.to_ascii_uppercase() == "FROM:" => {
                parse_esmtp_args(Self::from_path(reverse_path, true)?, &args[2..])
            }
            [from_and_reverse_path, ..] => match from_and_reverse_path
                .to_ascii_uppercase()
                .strip_prefix("FROM:")
            {
                Some("") | None => Err(SMTPReplyCode::Code501),
                Some(_) => parse_esmtp_args(
                    Self::from_path(&from_and_reverse_path["FROM:".len()..], true)?,
                    &args[1..],
                ),
            },
            _ => Err(SMTPReplyCode::Code501),
        }
    }

    fn parse_arg_rcpt_to(args: &[&str]) -> Result<Self, SMTPReplyCode> {
        fn parse_esmtp_args(path: String, args: &[&str]) -> Result<Event, SMTPReplyCode> {
            if args.is_empty() {
                Ok(Event::RcptCmd(path))
            } else {
                Err(SMTPReplyCode::Code501)
            }
        }

        match args {
            [to, forward_path, ..] if to.to_ascii_uppercase() == "TO:" => {
                parse_esmtp_args(Self::from_path(forward_path, false)?, &args[2..])
            }
            [to_and_forward_path, ..] => {
                match to_and_forward_path.to_ascii_uppercase().strip_prefix("TO:") {
                    Some("") | None => Err(SMTPReplyCode::Code501),
                    Some(_) => parse_esmtp_args(
                        Self::from_path(&to_and_forward_path["TO:".len()..], false)?,
                        &args[1..],
                    ),
                }
            }
            _ => Err(SMTPReplyCode::Code501),
        }
    }

    fn parse_arg_auth(
        mechanism: &str,
        initial_response: Option<&str>,
    ) -> Result<Self, SMTPReplyCode> {
        Ok(Self::Auth(
            <Mechanism as std::str::FromStr>::from_str(mechanism)
                .map_err(|_| SMTPReplyCode::AuthMechanismNotSupported)?,
            initial_response.map(|s| s.as_bytes().to_vec()),
        ))
    }

    /// Parse a smtp input received between DATA and `<CRLF>.<CRLF>` (DATA END)
    /// and handle dot-stuffing
    ///
    /// # Errors
    ///
    /// * input line is too long (> 998)
    pub fn parse_data(input: &str) -> Result<Self, SMTPReplyCode> {
        match input {
            "." => Ok(Self::DataEnd),
            too_long if too_long.len() > DATA_LINE_MAX_LENGTH => Err(SMTPReplyCode::Code500),
            dot_string if dot_string.starts_with('.') => {
                // https://www.rfc-editor.org/rfc/rfc5321#section-4.5.2
                Ok(Self::DataLine(dot_string[1..].to_string()))
            }
            _ => Ok(Self::DataLine(input.to_string())),
        }
    }
}
