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
use super::{mail_handler, plain_response, run_session_with_credentials};
use mailpulse_server::auth::CredentialStore;
use mailpulse_common::audit::AuditAction;
use mailpulse_common::project::ProjectStatus;
use mailpulse_test::storage::{project_with_password, MemoryStorage};
use mailpulse_test::test_receiver;

#[tokio::test]
async fn per_minute_quota_exhaustion() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    let mut project = project_with_password("prj_1", "mp_live_X", "pw");
    project.quota_per_minute = 2;
    storage.insert_project(project);

    let config = mailpulse_test::config::local_test();
    let mut handler = mail_handler(storage.clone(), &config);

    let one_send = [
        "MAIL FROM:<a@x.org>\r\n",
        "RCPT TO:<b@y.org>\r\n",
        "DATA\r\n",
        "a body\r\n",
        ".\r\n",
    ]
    .concat();
    let one_accept = [
        "250 OK\r\n",
        "250 OK\r\n",
        "354 End data with <CR><LF>.<CR><LF>\r\n",
        "250 OK: Message accepted\r\n",
    ]
    .concat();

    assert!(test_receiver! {
        on_mail => &mut handler,
        with_storage => storage.clone(),
        [
            "EHLO client.example.com\r\n".to_string(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")),
            one_send.clone(),
            one_send.clone(),
            // the third send trips the per-minute gate at DATA
            "MAIL FROM:<a@x.org>\r\n".to_string(),
            "RCPT TO:<b@y.org>\r\n".to_string(),
            "DATA\r\n".to_string(),
            "QUIT\r\n".to_string(),
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n".to_string(),
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n"
                .to_string(),
            "235 Authentication successful\r\n".to_string(),
            one_accept.clone(),
            one_accept,
            "250 OK\r\n".to_string(),
            "250 OK\r\n".to_string(),
            "452 Sending quota exceeded\r\n".to_string(),
            "221 Goodbye\r\n".to_string(),
        ]
        .concat()
    }
    .is_ok());

    // exactly the two admitted messages reached the store
    assert_eq!(storage.emails().len(), 2);
    assert!(storage
        .audit_events()
        .iter()
        .any(|event| event.action == AuditAction::QuotaRejected));
}

#[tokio::test]
async fn storage_failure_answers_451_and_commits_nothing() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    let mut project = project_with_password("prj_1", "mp_live_X", "pw");
    // one message in the minute window: a leaked commit would trip the gate
    project.quota_per_minute = 1;
    storage.insert_project(project);

    let config = mailpulse_test::config::local_test();
    let mut handler = mail_handler(storage.clone(), &config);
    storage.fail_store(true);

    assert!(test_receiver! {
        on_mail => &mut handler,
        with_storage => storage.clone(),
        [
            "EHLO client.example.com\r\n".to_string(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")),
            "MAIL FROM:<a@x.org>\r\n".to_string(),
            "RCPT TO:<b@y.org>\r\n".to_string(),
            "DATA\r\n".to_string(),
            "a body\r\n".to_string(),
            ".\r\n".to_string(),
            // the failed attempt must not have consumed the quota slot
            "MAIL FROM:<a@x.org>\r\n".to_string(),
            "RCPT TO:<b@y.org>\r\n".to_string(),
            "DATA\r\n".to_string(),
            "a body\r\n".to_string(),
            ".\r\n".to_string(),
            "QUIT\r\n".to_string(),
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n".to_string(),
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n"
                .to_string(),
            "235 Authentication successful\r\n".to_string(),
            "250 OK\r\n".to_string(),
            "250 OK\r\n".to_string(),
            "354 End data with <CR><LF>.<CR><LF>\r\n".to_string(),
            "451 Temporary server error\r\n".to_string(),
            "250 OK\r\n".to_string(),
            "250 OK\r\n".to_string(),
            "354 End data with <CR><LF>.<CR><LF>\r\n".to_string(),
            "451 Temporary server error\r\n".to_string(),
            "221 Goodbye\r\n".to_string(),
        ]
        .concat()
    }
    .is_ok());

    assert!(storage.emails().is_empty());
    assert!(!storage
        .audit_events()
        .iter()
        .any(|event| event.action == AuditAction::MessageAccepted));
}

#[tokio::test]
async fn project_deactivated_mid_session_is_refused_at_data() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    // snapshot taken while the project is active
    let credentials = std::sync::Arc::new(CredentialStore::new(storage.clone()));
    credentials.reload().await.unwrap();

    // the admin surface flips the live row before the client reaches DATA
    storage.set_project_status("prj_1", ProjectStatus::Inactive);

    let config = std::sync::Arc::new(mailpulse_test::config::local_test());
    let mut handler = mail_handler(storage.clone(), &config);

    assert!(run_session_with_credentials(
        &mut handler,
        credentials,
        storage.clone(),
        config,
        &[
            "EHLO client.example.com\r\n".to_string(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")),
            "MAIL FROM:<a@x.org>\r\n".to_string(),
            "RCPT TO:<b@y.org>\r\n".to_string(),
            "DATA\r\n".to_string(),
            "QUIT\r\n".to_string(),
        ]
        .concat(),
        &[
            "220 testserver.com SMTP Server Ready\r\n",
            "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n",
            "235 Authentication successful\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "554 Transaction failed: Project not active\r\n",
            "221 Goodbye\r\n",
        ]
        .concat(),
    )
    .await
    .is_ok());

    assert!(storage.emails().is_empty());
}
