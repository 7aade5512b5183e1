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
use mailpulse_common::message::EmailRecord;

/// Assemble the RFC-822 message submitted to the smart-host: a canonical
/// header block followed by the body extracted from the stored content.
#[must_use]
pub fn build_forward_message(email: &EmailRecord) -> String {
    let mut message = String::new();
    message.push_str(&format!("From: {}\r\n", email.from));
    message.push_str(&format!("To: {}\r\n", email.to.join(", ")));
    message.push_str(&format!("Subject: {}\r\n", email.subject));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=UTF-8\r\n");
    message.push_str("\r\n");

    if email.content.is_empty() {
        message.push_str("This email was forwarded through the MailPulse SMTP relay.\r\n");
    } else {
        message.push_str(&extract_body(&String::from_utf8_lossy(&email.content)));
    }

    message
}

/// Extract just the body from raw SMTP DATA content: everything past the
/// first empty line, or the whole content when there is no header section.
fn extract_body(raw: &str) -> String {
    let body = raw
        .split_once("\r\n\r\n")
        .or_else(|| raw.split_once("\n\n"))
        .map_or(raw, |(_, body)| body);

    clean_body(body)
}

/// Strip the SMTP artifacts (a trailing lone-dot terminator some clients
/// leave in) and normalize line endings to CRLF.
fn clean_body(content: &str) -> String {
    let mut content = content.trim().to_string();

    if let Some(stripped) = content
        .strip_suffix("\r\n.")
        .or_else(|| content.strip_suffix("\n."))
    {
        content = stripped.trim_end().to_string();
    } else if content == "." {
        content = String::new();
    }

    let mut normalized = content.replace("\r\n", "\n").replace('\n', "\r\n");
    normalized.push_str("\r\n");
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailpulse_common::message::EmailStatus;

    fn email(content: &str) -> EmailRecord {
        EmailRecord {
            id: "email_42".to_string(),
            message_id: "42@testserver.com".to_string(),
            project_id: "prj_1".to_string(),
            from: "a@x.org".to_string(),
            to: vec!["b@y.org".to_string(), "c@z.org".to_string()],
            subject: "Greetings".to_string(),
            content: content.as_bytes().to_vec(),
            size: content.len() as i64,
            status: EmailStatus::Processed,
            error: None,
            attempts: 1,
            sent_at: time::OffsetDateTime::UNIX_EPOCH,
            opened_at: None,
            clicked_at: None,
            metadata: None,
        }
    }

    #[test]
    fn canonical_header_block() {
        let message = build_forward_message(&email(
            "Subject: original\r\nFrom: someone\r\n\r\nthe body\r\n",
        ));

        assert!(message.starts_with(
            "From: a@x.org\r\n\
             To: b@y.org, c@z.org\r\n\
             Subject: Greetings\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=UTF-8\r\n\
             \r\n"
        ));
        assert!(message.ends_with("the body\r\n"));
        // the stored headers are not repeated after the canonical block
        assert_eq!(message.matches("Subject:").count(), 1);
    }

    #[test]
    fn body_without_headers_is_kept_whole() {
        let message = build_forward_message(&email("just a body, no header section"));
        assert!(message.ends_with("\r\n\r\njust a body, no header section\r\n"));
    }

    #[test]
    fn trailing_terminator_is_stripped() {
        for raw in [
            "Subject: s\r\n\r\nbody text\r\n.",
            "Subject: s\n\nbody text\n.",
        ] {
            let message = build_forward_message(&email(raw));
            assert!(message.ends_with("\r\nbody text\r\n"), "raw: {raw:?}");
            assert!(!message.contains("\r\n.\r\n"));
        }
    }

    #[test]
    fn line_endings_are_normalized() {
        let message = build_forward_message(&email("Subject: s\n\nline one\nline two\n"));
        assert!(message.ends_with("line one\r\nline two\r\n"));
        assert!(!message.contains("\r\r"));
    }

    #[test]
    fn empty_content_gets_a_placeholder() {
        let message = build_forward_message(&email(""));
        assert!(message.ends_with("forwarded through the MailPulse SMTP relay.\r\n"));
    }
}
