//! Registration, login, and token verification over HTTP.

mod common;

use axum::http::StatusCode;
use common::{member_identity, roles_of, TestApp, MEMBER_SECRET};
use identity_service::crypto::FieldCipher;
use identity_service::models::{AccountKind, IdentityEncoding};
use serde_json::json;

#[tokio::test]
async fn registered_member_logs_in_with_member_role_only() {
    let app = TestApp::spawn().await;

    let (status, body) = app.register("202211223").await;
    assert_eq!(status, StatusCode::CREATED);
    let member_id = body["memberId"].as_i64().unwrap();

    let (status, body) = app.login("202211223@wmsu.edu.ph", MEMBER_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["token"].as_str().unwrap().len() > 20);
    assert_eq!(body["principal"]["id"], member_id);
    assert_eq!(body["principal"]["kind"], "member");
    assert_eq!(roles_of(&body["principal"]), vec!["member"]);
    assert!(body["principal"]["organization"].is_null());
}

#[tokio::test]
async fn identity_is_stored_encrypted_and_indexed() {
    let app = TestApp::spawn().await;
    let (member_id, _) = app.member("202211223").await;

    let stored = app
        .store
        .credential_snapshot(AccountKind::Member, member_id)
        .await
        .unwrap();
    assert!(FieldCipher::looks_like_ciphertext(&stored.identity));
    assert_eq!(stored.identity_encoding, Some(IdentityEncoding::Encrypted));
    assert!(stored.identity_index.is_some());
    assert!(stored.password_hash.starts_with("$argon2id$"));
}

#[tokio::test]
async fn login_is_case_and_whitespace_insensitive_on_identity() {
    let app = TestApp::spawn().await;
    app.member("202211223").await;

    let (status, _) = app.login("  202211223@WMSU.EDU.PH ", MEMBER_SECRET).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_secret_and_unknown_identity_are_indistinguishable() {
    let app = TestApp::spawn().await;
    app.member("202211223").await;

    let (wrong_status, wrong_body) = app.login("202211223@wmsu.edu.ph", "not-the-secret").await;
    let (unknown_status, unknown_body) =
        app.login("209999999@wmsu.edu.ph", MEMBER_SECRET).await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
    assert_eq!(wrong_body["error"], "Invalid identity or secret");
}

#[tokio::test]
async fn login_with_missing_fields_is_a_bad_request() {
    let app = TestApp::spawn().await;

    let (status, _) = app.post("/login", None, json!({ "identity": "x@y" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post("/login", None, json!({ "secret": "whatever" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_identity_is_rejected_at_registration() {
    let app = TestApp::spawn().await;

    for identity in ["20221122@wmsu.edu.ph", "202211223@gmail.com", "abcdefghi@wmsu.edu.ph"] {
        let (status, body) = app
            .post(
                "/register",
                None,
                json!({
                    "externalId": "202211223",
                    "identity": identity,
                    "secret": MEMBER_SECRET,
                    "firstName": "Maria",
                    "lastName": "Santos"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} accepted: {}", identity, body);
    }
}

#[tokio::test]
async fn short_secret_is_rejected_at_registration() {
    let app = TestApp::spawn().await;
    let (status, _) = app
        .post(
            "/register",
            None,
            json!({
                "externalId": "202211223",
                "identity": member_identity("202211223"),
                "secret": "short",
                "firstName": "Maria",
                "lastName": "Santos"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::spawn().await;
    app.member("202211223").await;

    let (status, body) = app.register("202211223").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "External id already registered");

    let (status, body) = app
        .post(
            "/register",
            None,
            json!({
                "externalId": "202211224",
                "identity": member_identity("202211223"),
                "secret": MEMBER_SECRET,
                "firstName": "Maria",
                "lastName": "Santos"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Identity already registered");
}

#[tokio::test]
async fn verify_returns_normalized_principal() {
    let app = TestApp::spawn().await;
    let (member_id, token) = app.member("202211223").await;

    let (status, body) = app.verify(&token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], member_id);
    assert_eq!(body["identity"], "202211223@wmsu.edu.ph");
    assert_eq!(roles_of(&body), vec!["member"]);
}

#[tokio::test]
async fn legacy_plaintext_account_can_log_in_and_is_upgraded() {
    let app = TestApp::spawn().await;
    let (_, _) = app.member("202200001").await;

    // A row written before encryption: plaintext identity, no index.
    let hash = app
        .store
        .credential_snapshot(AccountKind::Member, 1)
        .await
        .unwrap()
        .password_hash;
    let legacy_id = app
        .store
        .insert_legacy_credential(
            AccountKind::Member,
            "202211999@wmsu.edu.ph",
            Some(IdentityEncoding::Plaintext),
            &hash,
        )
        .await;

    let (status, body) = app.login("202211999@wmsu.edu.ph", MEMBER_SECRET).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["principal"]["id"], legacy_id);

    let upgraded = app
        .store
        .credential_snapshot(AccountKind::Member, legacy_id)
        .await
        .unwrap();
    assert_eq!(upgraded.identity_encoding, Some(IdentityEncoding::Encrypted));
    assert!(upgraded.identity_index.is_some());
}

#[tokio::test]
async fn privacy_acceptance_is_recorded_once() {
    let app = TestApp::spawn().await;
    let (_, token) = app.member("202211223").await;

    let (status, first) = app
        .request(axum::http::Method::POST, "/me/privacy-acceptance", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = app
        .request(axum::http::Method::POST, "/me/privacy-acceptance", Some(&token), None)
        .await;
    assert_eq!(first["privacyAcceptedUtc"], second["privacyAcceptedUtc"]);
}
