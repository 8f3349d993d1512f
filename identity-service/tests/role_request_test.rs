//! Officer role request workflow end to end.

mod common;

use axum::http::{Method, StatusCode};
use common::{roles_of, TestApp};
use identity_service::services::RecordingNotifier;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn submission_creates_pending_request_and_notifies_reviewer() {
    let app = TestApp::spawn().await;
    let org = app.organization("Computer Science Society").await;
    let (member_id, token) = app.member("202211223").await;

    let (status, body) = app
        .post(
            "/roles/request",
            Some(&token),
            json!({
                "organizationId": org,
                "requestedPosition": "secretary",
                "justification": "Elected this term"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["requesterId"], member_id);
    assert_eq!(body["organizationId"], org);

    let request_id = body["requestId"].as_i64().unwrap();
    for _ in 0..50 {
        if app.notifier.notified_ids().contains(&request_id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.notifier.notified_ids(), vec![request_id]);
}

#[tokio::test]
async fn failing_notifier_does_not_fail_submission() {
    let app = TestApp::spawn_with_notifier(
        common::test_config(),
        Arc::new(RecordingNotifier::failing()),
    )
    .await;
    let org = app.organization("Chess Club").await;
    let (_, token) = app.member("202211223").await;

    app.submit_request(&token, org).await;
}

#[tokio::test]
async fn duplicate_pending_submission_is_rejected() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (_, token) = app.member("202211223").await;
    app.submit_request(&token, org).await;

    let (status, body) = app
        .post("/roles/request", Some(&token), json!({ "organizationId": org }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        "A pending role request already exists for this organization"
    );
}

#[tokio::test]
async fn unknown_organization_is_a_bad_request() {
    let app = TestApp::spawn().await;
    let (_, token) = app.member("202211223").await;

    let (status, _) = app
        .post("/roles/request", Some(&token), json!({ "organizationId": 999 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn administrators_cannot_submit() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let admin = app.admin_token().await;

    let (status, _) = app
        .post("/roles/request", Some(&admin), json!({ "organizationId": org }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn approval_grants_officer_without_relogin() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (member_id, token) = app.member("202211223").await;
    let admin = app.admin_token().await;

    let (_, before) = app.verify(&token).await;
    assert_eq!(roles_of(&before), vec!["member"]);

    let request_id = app.submit_request(&token, org).await;
    let (status, body) = app
        .post(
            &format!("/roles/approve/{}", request_id),
            Some(&admin),
            json!({ "reviewNotes": "Confirmed with adviser" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["request"]["status"], "approved");
    assert_eq!(body["request"]["reviewNotes"], "Confirmed with adviser");
    assert_eq!(body["membership"]["memberId"], member_id);
    assert_eq!(body["membership"]["organizationId"], org);
    assert_eq!(body["membership"]["position"], "secretary");
    assert_eq!(body["membership"]["activeFlag"], true);

    let (status, after) = app.verify(&token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roles_of(&after), vec!["member", "officer"]);
    assert_eq!(after["organization"]["organizationId"], org);
    assert_eq!(after["organization"]["position"], "secretary");
}

#[tokio::test]
async fn approval_without_body_is_accepted() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (_, token) = app.member("202211223").await;
    let admin = app.admin_token().await;
    let request_id = app.submit_request(&token, org).await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/roles/approve/{}", request_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["request"]["reviewNotes"].is_null());
}

#[tokio::test]
async fn second_approval_conflicts_and_creates_no_membership() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (member_id, token) = app.member("202211223").await;
    let admin = app.admin_token().await;
    let request_id = app.submit_request(&token, org).await;
    let uri = format!("/roles/approve/{}", request_id);

    let (first, second) = tokio::join!(
        app.post(&uri, Some(&admin), json!({})),
        app.post(&uri, Some(&admin), json!({}))
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let conflict = if first.0 == StatusCode::CONFLICT { first.1 } else { second.1 };
    assert_eq!(conflict["error"], "Role request already approved");
    assert_eq!(app.store.memberships_for(member_id).await.len(), 1);
}

#[tokio::test]
async fn rejection_creates_no_membership_and_is_terminal() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (member_id, token) = app.member("202211223").await;
    let admin = app.admin_token().await;
    let request_id = app.submit_request(&token, org).await;

    let (status, body) = app
        .post(
            &format!("/roles/reject/{}", request_id),
            Some(&admin),
            json!({ "reviewNotes": "Not on the roster" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert!(app.store.memberships_for(member_id).await.is_empty());

    let (status, body) = app
        .post(&format!("/roles/approve/{}", request_id), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Role request already rejected");

    let (status, _) = app
        .post(&format!("/roles/reject/{}", request_id), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // A new request is allowed once the old one is terminal.
    app.submit_request(&token, org).await;
}

#[tokio::test]
async fn reviewing_unknown_request_is_not_found() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;

    let (status, _) = app.post("/roles/approve/4242", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.post("/roles/reject/4242", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn existing_membership_blocks_new_request() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (member_id, token) = app.member("202211223").await;
    app.store.insert_membership(member_id, org, "treasurer").await;

    let (status, _) = app
        .post("/roles/request", Some(&token), json!({ "organizationId": org }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn listing_filters_and_paginates() {
    let app = TestApp::spawn().await;
    let admin = app.admin_token().await;
    let orgs = [
        app.organization("A").await,
        app.organization("B").await,
        app.organization("C").await,
    ];
    let (_, token) = app.member("202211223").await;
    let mut ids = Vec::new();
    for org in orgs {
        ids.push(app.submit_request(&token, org).await);
    }
    app.post(&format!("/roles/reject/{}", ids[0]), Some(&admin), json!({}))
        .await;

    let (status, body) = app
        .get("/roles/requests?status=pending&page=1&per_page=1", Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["perPage"], 1);

    let (_, body) = app.get("/roles/requests", Some(&admin)).await;
    assert_eq!(body["total"], 3);

    let (status, _) = app.get("/roles/requests?status=bogus", Some(&admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/roles/requests/mine", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn deactivation_strips_officer_on_next_request() {
    let app = TestApp::spawn().await;
    let org = app.organization("Chess Club").await;
    let (_, token) = app.member("202211223").await;
    let admin = app.admin_token().await;
    let request_id = app.submit_request(&token, org).await;

    let (_, approved) = app
        .post(&format!("/roles/approve/{}", request_id), Some(&admin), json!({}))
        .await;
    let membership_id = approved["membership"]["membershipId"].as_i64().unwrap();

    // Token minted while the member is an officer.
    let officer_token = app
        .token_for(&common::member_identity("202211223"), common::MEMBER_SECRET)
        .await;
    let (_, body) = app.verify(&officer_token).await;
    assert_eq!(roles_of(&body), vec!["member", "officer"]);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/memberships/{}/deactivate", membership_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeFlag"], false);

    let (_, body) = app.verify(&officer_token).await;
    assert_eq!(roles_of(&body), vec!["member"]);
    assert!(body["organization"].is_null());

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/memberships/{}/deactivate", membership_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
