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
use super::plain_response;
use mailpulse_test::test_receiver;

#[tokio::test]
async fn starttls_without_tls_configuration() {
    assert!(test_receiver! {
        ["EHLO client.example.com\r\n", "STARTTLS\r\n", "QUIT\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "502 TLS not available\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn starttls_before_ehlo_is_a_bad_sequence() {
    assert!(test_receiver! {
        ["STARTTLS\r\n", "QUIT\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "503 Bad sequence of commands\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn auth_and_mail_refused_in_clair_when_tls_is_required() {
    let mut config = mailpulse_test::config::local_test();
    config.server.smtp.tls_required = true;

    assert!(test_receiver! {
        with_config => config,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "MAIL FROM:<a@x.org>\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "530 Must issue a STARTTLS command first\r\n",
            "530 Must issue a STARTTLS command first\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}
