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
use super::{mail_handler, plain_response};
use mailpulse_server::quota::QuotaPermit;
use mailpulse_server::{Connection, OnMail};
use mailpulse_common::audit::AuditAction;
use mailpulse_common::mail_context::MailContext;
use mailpulse_test::storage::{project_with_password, MemoryStorage};
use mailpulse_test::test_receiver;

// see https://datatracker.ietf.org/doc/html/rfc5321#section-4.3.2

#[tokio::test]
async fn fully_authenticated_send() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));
    let config = mailpulse_test::config::local_test();
    let mut handler = mail_handler(storage.clone(), &config);

    assert!(test_receiver! {
        on_mail => &mut handler,
        with_storage => storage.clone(),
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org>\r\n",
            "RCPT TO:<b@y.org>\r\n",
            "RCPT TO:<c@z.org>\r\n",
            "DATA\r\n",
            "From: a@x.org\r\n",
            "Subject: Greetings\r\n",
            "\r\n",
            "a body line\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "235 Authentication successful\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "250 OK: Message accepted\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());

    let emails = storage.emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].project_id, "prj_1");
    assert_eq!(emails[0].from, "a@x.org");
    assert_eq!(emails[0].to, vec!["b@y.org", "c@z.org"]);
    assert_eq!(emails[0].subject, "Greetings");
    assert_eq!(
        emails[0].content,
        b"From: a@x.org\r\nSubject: Greetings\r\n\r\na body line\r\n".to_vec()
    );
    assert_eq!(emails[0].size, emails[0].content.len() as i64);
    assert!(emails[0].message_id.ends_with("@testserver.com"));

    let actions = storage
        .audit_events()
        .iter()
        .map(|event| event.action)
        .collect::<Vec<_>>();
    assert!(actions.contains(&AuditAction::AuthSuccess));
    assert!(actions.contains(&AuditAction::MessageAccepted));
}

#[tokio::test]
async fn mail_requires_authentication() {
    let storage = std::sync::Arc::new(MemoryStorage::new());

    assert!(test_receiver! {
        with_storage => storage.clone(),
        ["EHLO client.example.com\r\n", "MAIL FROM:<a@x.org>\r\n", "QUIT\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "530 Authentication required\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());

    assert!(storage.emails().is_empty());
}

#[tokio::test]
async fn mail_before_greeting_is_a_bad_sequence() {
    assert!(test_receiver! {
        ["MAIL FROM:<a@x.org>\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "503 Bad sequence of commands\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn rcpt_before_mail_is_a_bad_sequence() {
    assert!(test_receiver! {
        ["HELO client.example.com\r\n", "RCPT TO:<b@y.org>\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250 testserver.com Hello\r\n",
            "503 Bad sequence of commands\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn unknown_commands() {
    assert!(test_receiver! {
        ["foo\r\n", "HELP\r\n", "NOOP\r\n", "VRFY postmaster\r\n", "QUIT\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "500 Command not recognized\r\n",
            "500 Command not recognized\r\n",
            "250 OK\r\n",
            "502 Command not implemented\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn over_long_command_line() {
    assert!(test_receiver! {
        [format!("NOOP {}\r\n", "x".repeat(600)).as_str(), "QUIT\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "500 Command not recognized\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn body_dots_are_unstuffed() {
    struct T;

    #[async_trait::async_trait]
    impl OnMail for T {
        async fn on_mail<
            S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
        >(
            &mut self,
            conn: &mut Connection<S>,
            mail: Box<MailContext>,
            permit: QuotaPermit,
        ) -> anyhow::Result<()> {
            assert_eq!(
                mail.body,
                "a first line\r\n.leading dot kept\r\nnot the end: .\r\n"
            );
            assert_eq!(mail.envelop.helo, "client.example.com");
            assert_eq!(mail.envelop.mail_from.as_ref().unwrap().full(), "a@x.org");
            permit.commit();
            conn.send_code(mailpulse_common::code::SMTPReplyCode::MessageAccepted)
                .await
        }
    }

    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        on_mail => &mut T,
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org>\r\n",
            "RCPT TO:<b@y.org>\r\n",
            "DATA\r\n",
            "a first line\r\n",
            "..leading dot kept\r\n",
            "not the end: .\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "235 Authentication successful\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "250 OK: Message accepted\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn recipient_list_is_capped() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    let mut config = mailpulse_test::config::local_test();
    config.server.smtp.rcpt_count_max = 2;

    assert!(test_receiver! {
        with_storage => storage,
        with_config => config,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org>\r\n",
            "RCPT TO:<b@y.org>\r\n",
            "RCPT TO:<c@y.org>\r\n",
            "RCPT TO:<d@y.org>\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "235 Authentication successful\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "452 Too many recipients\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn oversized_message_is_refused_at_end_of_data() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    let mut config = mailpulse_test::config::local_test();
    config.server.smtp.message_size_max = 16;

    assert!(test_receiver! {
        with_storage => storage.clone(),
        with_config => config,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org>\r\n",
            "RCPT TO:<b@y.org>\r\n",
            "DATA\r\n",
            "a line well beyond sixteen bytes\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "235 Authentication successful\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "552 Message size exceeds maximum permitted\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());

    assert!(storage.emails().is_empty());
}

#[tokio::test]
async fn declared_size_is_checked_at_mail_from() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org> SIZE=52428801\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "235 Authentication successful\r\n",
            "552 Message size exceeds maximum permitted\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}
