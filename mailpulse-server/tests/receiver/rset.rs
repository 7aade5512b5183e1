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
use mailpulse_test::storage::{project_with_password, MemoryStorage};
use mailpulse_test::test_receiver;

#[tokio::test]
async fn rset_clears_the_envelope() {
    assert!(test_receiver! {
        [
            "HELO client.example.com\r\n",
            "RSET\r\n",
            "DATA\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250 testserver.com Hello\r\n",
            "250 OK\r\n",
            "503 Bad sequence of commands\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn rset_survives_authentication() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));
    let config = mailpulse_test::config::local_test();
    let mut handler = mail_handler(storage.clone(), &config);

    // the envelope is dropped by RSET, the authentication is not: the second
    // MAIL FROM goes through without a new AUTH
    assert!(test_receiver! {
        on_mail => &mut handler,
        with_storage => storage.clone(),
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org>\r\n",
            "RCPT TO:<b@y.org>\r\n",
            "RSET\r\n",
            "MAIL FROM:<other@x.org>\r\n",
            "RCPT TO:<c@z.org>\r\n",
            "DATA\r\n",
            "a body\r\n",
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
    // only the post-RSET envelope was used
    assert_eq!(emails[0].from, "other@x.org");
    assert_eq!(emails[0].to, vec!["c@z.org"]);
}
