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
use crate::plain_response;
use mailpulse_common::audit::AuditAction;
use mailpulse_common::project::ProjectStatus;
use mailpulse_test::storage::{project_with_password, MemoryStorage};
use mailpulse_test::test_receiver;

const EHLO_REPLY: &str =
    "250-testserver.com Hello\r\n250-AUTH PLAIN LOGIN\r\n250-STARTTLS\r\n250 SIZE 52428800\r\n";

#[tokio::test]
async fn plain_with_initial_response() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "235 Authentication successful\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn plain_with_challenge() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            "AUTH PLAIN\r\n",
            format!("{}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "334 \r\n",
            "235 Authentication successful\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn login_exchange() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            "AUTH LOGIN\r\n",
            format!("{}\r\n", base64::encode("mp_live_X")).as_str(),
            format!("{}\r\n", base64::encode("pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 Authentication successful\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn password_case_is_ignored() {
    // the stored hash is of "password"; gateways upper-casing the credential
    // must still authenticate
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "password"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "PASSWORD")).as_str(),
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "235 Authentication successful\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn invalid_credentials_are_one_opaque_535() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    let mut inactive = project_with_password("prj_2", "mp_live_Y", "pw");
    inactive.status = ProjectStatus::Inactive;
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));
    storage.insert_project(inactive);

    // unknown user, wrong password, inactive project: same reply text
    assert!(test_receiver! {
        with_storage => storage.clone(),
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_nobody", "pw")).as_str(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "wrong")).as_str(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_Y", "pw")).as_str(),
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "535 Authentication failed\r\n",
            "535 Authentication failed\r\n",
            "535 Authentication failed\r\n",
        ]
        .concat()
    }
    // the third failure exhausts the per-connection retry budget
    .is_err());

    // the audit trail keeps the concrete sub-reasons
    let reasons = storage
        .audit_events()
        .iter()
        .filter(|event| event.action == AuditAction::AuthFailure)
        .map(|event| event.details.as_ref().unwrap()["reason"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert!(reasons.contains(&"unknown_user".to_string()));
    assert!(reasons.contains(&"invalid_password".to_string()));
    assert!(reasons.contains(&"project_not_active".to_string()));
}

#[tokio::test]
async fn malformed_plain_payloads() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            // not base64
            "AUTH PLAIN !!!!\r\n",
            // base64, but only two NUL separated fields
            format!("AUTH PLAIN {}\r\n", base64::encode("mp_live_X\0pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "535 Authentication failed\r\n",
            "535 Authentication failed\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn exchange_can_be_canceled() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            "AUTH LOGIN\r\n",
            "*\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "334 VXNlcm5hbWU6\r\n",
            "501 Authentication canceled by client\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn auth_after_auth_is_refused() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    assert!(test_receiver! {
        with_storage => storage,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "235 Authentication successful\r\n",
            "503 Already authenticated\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn unsupported_mechanism() {
    assert!(test_receiver! {
        ["EHLO client.example.com\r\n", "AUTH CRAM-MD5\r\n", "QUIT\r\n"].concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "504 Authentication mechanism not supported\r\n",
            "221 Goodbye\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn auth_attempts_are_rate_limited_per_address() {
    let storage = std::sync::Arc::new(MemoryStorage::new());
    storage.insert_project(project_with_password("prj_1", "mp_live_X", "pw"));

    let mut config = mailpulse_test::config::local_test();
    // keep the per-connection budget out of the way
    config.server.smtp.auth_attempt_count_max = -1;
    config.server.smtp.auth_attempts_per_ip = 2;

    assert!(test_receiver! {
        with_storage => storage.clone(),
        with_config => config,
        [
            "EHLO client.example.com\r\n",
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "wrong")).as_str(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "wrong")).as_str(),
            format!("AUTH PLAIN {}\r\n", plain_response("mp_live_X", "pw")).as_str(),
        ]
        .concat(),
        [
            "220 testserver.com SMTP Server Ready\r\n",
            EHLO_REPLY,
            "535 Authentication failed\r\n",
            "535 Authentication failed\r\n",
            "421 Too many authentication attempts\r\n",
        ]
        .concat()
    }
    .is_err());

    assert!(storage
        .audit_events()
        .iter()
        .any(|event| event.details.as_ref().map_or(false, |details| {
            details["reason"] == "rate_limited"
        })));
}
