//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tally_core::models::Issuer;
use tally_core::TransactionFilter;
use tower::ServiceExt;

const BOUNDARY: &str = "tally-test-boundary";

const CARD_EXPORT: &str = "\"Kreditkarte:\";\"4930********1234 VISA Card\";\n\
\n\
\"Umsatz abgerechnet\";\"Wertstellung\";\"Belegdatum\";\"Beschreibung\";\"Betrag (EUR)\";\n\
\"Ja\";\"04.12.2017\";\"04.12.2017\";\"Einzahlung\";\"500,00\";\n\
\"Ja\";\"05.10.2017\";\"05.10.2017\";\"SPOTIFY AB\";\"-9,99\";\n\
\"Ja\";\"05.11.2017\";\"05.11.2017\";\"SPOTIFY AB\";\"-9,99\";\n\
\"Ja\";\"05.12.2017\";\"05.12.2017\";\"SPOTIFY AB\";\"-9,99\";\n";

struct TestApp {
    app: Router,
    db: Database,
    card: i64,
}

fn setup_test_app() -> TestApp {
    let db = Database::in_memory().unwrap();
    let tally = TallyConfig::embedded();
    db.seed_categories(&tally.seed_categories, &tally.transfer_category)
        .unwrap();
    let card = db.upsert_account("Visa", Issuer::Card).unwrap();
    let app = create_router(db.clone(), None, &tally, ServerConfig::default());
    TestApp { app, db, card }
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_request(file: Option<(&str, &str)>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    if let Some((filename, content)) = file {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method("POST")
        .uri("/api/statements")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Upload the card export and import every draft it produced
async fn upload_and_import(test: &TestApp) -> (i64, serde_json::Value) {
    let account = test.card.to_string();
    let response = test
        .app
        .clone()
        .oneshot(multipart_request(
            Some(("visa.csv", CARD_EXPORT)),
            &[("account_id", account.as_str())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let upload = get_body_json(response).await;
    let job_id = upload["import_job_id"].as_i64().unwrap();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/imports",
            serde_json::json!({
                "account_id": test.card,
                "import_job_id": job_id,
                "transactions": upload["statement"]["transactions"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    (job_id, get_body_json(response).await)
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let test = setup_test_app();

    let response = test.app.oneshot(get_request("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
}

// ========== Accounts / Categories ==========

#[tokio::test]
async fn test_create_and_list_accounts() {
    let test = setup_test_app();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/accounts",
            serde_json::json!({ "name": "Girokonto", "issuer": "giro" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["name"], "Girokonto");
    assert_eq!(json["issuer"], "giro");

    let response = test.app.oneshot(get_request("/api/accounts")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_account_unknown_issuer() {
    let test = setup_test_app();

    let response = test
        .app
        .oneshot(json_request(
            "POST",
            "/api/accounts",
            serde_json::json!({ "name": "Depot", "issuer": "broker" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_categories_has_one_transfer_category() {
    let test = setup_test_app();

    let response = test.app.oneshot(get_request("/api/categories")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let categories = json.as_array().unwrap();
    assert!(categories.len() > 1);
    let transfers: Vec<_> = categories
        .iter()
        .filter(|c| c["is_transfer"] == true)
        .collect();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0]["name"], "Transfer");
}

// ========== Statement Upload ==========

#[tokio::test]
async fn test_upload_statement_opens_job_without_writing_rows() {
    let test = setup_test_app();
    let account = test.card.to_string();

    let response = test
        .app
        .clone()
        .oneshot(multipart_request(
            Some(("visa.csv", CARD_EXPORT)),
            &[("account_id", account.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["format"]["issuer"], "card");
    assert_eq!(json["format"]["layout"], "delimited");
    assert_eq!(json["statement"]["transactions"].as_array().unwrap().len(), 4);

    // Nothing reaches the ledger until the drafts are imported
    let response = test
        .app
        .oneshot(get_request("/api/transactions"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_unrecognized_format_names_issuers() {
    let test = setup_test_app();
    let account = test.card.to_string();

    let response = test
        .app
        .oneshot(multipart_request(
            Some(("notes.txt", "hello world\n")),
            &[("account_id", account.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "unrecognized_format");
    let issuers = json["expected_issuers"].as_array().unwrap();
    assert!(issuers.contains(&serde_json::json!("giro")));
    assert!(issuers.contains(&serde_json::json!("card")));
}

#[tokio::test]
async fn test_upload_with_issuer_hint() {
    let test = setup_test_app();
    let account = test.card.to_string();

    // No card signature; the hint selects the parser
    let text = "\"Belegdatum\";\"Beschreibung\";\"Betrag (EUR)\";\n\
\"05.12.2017\";\"NETFLIX.COM\";\"-12,99\";\n";
    let response = test
        .app
        .oneshot(multipart_request(
            Some(("export.csv", text)),
            &[("account_id", account.as_str()), ("issuer", "card")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["format"]["issuer"], "card");
}

#[tokio::test]
async fn test_upload_unsupported_file_type() {
    let test = setup_test_app();
    let account = test.card.to_string();

    let response = test
        .app
        .oneshot(multipart_request(
            Some(("statement.docx", "not really a document")),
            &[("account_id", account.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_missing_fields() {
    let test = setup_test_app();

    let response = test
        .app
        .clone()
        .oneshot(multipart_request(Some(("visa.csv", CARD_EXPORT)), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("account_id"));

    let account = test.card.to_string();
    let response = test
        .app
        .oneshot(multipart_request(None, &[("account_id", account.as_str())]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_unknown_account() {
    let test = setup_test_app();

    let response = test
        .app
        .oneshot(multipart_request(
            Some(("visa.csv", CARD_EXPORT)),
            &[("account_id", "999")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Imports ==========

#[tokio::test]
async fn test_import_returns_counts() {
    let test = setup_test_app();

    let (job_id, counts) = upload_and_import(&test).await;

    assert_eq!(counts["total"], 4);
    assert_eq!(counts["inserted"], 4);
    assert_eq!(counts["duplicates"], 0);

    let response = test
        .app
        .oneshot(get_request(&format!("/api/imports/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = get_body_json(response).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["counts"]["inserted"], 4);
}

#[tokio::test]
async fn test_import_into_completed_job_is_rejected() {
    let test = setup_test_app();
    let (job_id, _) = upload_and_import(&test).await;

    let response = test
        .app
        .oneshot(json_request(
            "POST",
            "/api/imports",
            serde_json::json!({
                "account_id": test.card,
                "import_job_id": job_id,
                "transactions": [],
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_second_upload_counts_duplicates() {
    let test = setup_test_app();
    upload_and_import(&test).await;

    let (_, counts) = upload_and_import(&test).await;

    assert_eq!(counts["inserted"], 0);
    assert_eq!(counts["duplicates"], 4);
}

#[tokio::test]
async fn test_list_imports() {
    let test = setup_test_app();
    upload_and_import(&test).await;

    let response = test
        .app
        .oneshot(get_request(&format!(
            "/api/imports?account_id={}&limit=5000",
            test.card
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_import_not_found() {
    let test = setup_test_app();

    let response = test
        .app
        .oneshot(get_request("/api/imports/999"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rollback_import() {
    let test = setup_test_app();
    let (job_id, _) = upload_and_import(&test).await;

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/imports/{}/rollback", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["deleted"], 4);
    assert_eq!(json["unlinked"], 0);

    let response = test
        .app
        .oneshot(get_request(&format!("/api/imports/{}", job_id)))
        .await
        .unwrap();
    let job = get_body_json(response).await;
    assert_eq!(job["status"], "rolled_back");
}

// ========== Transactions / Corrections ==========

#[tokio::test]
async fn test_list_transactions_needing_review() {
    let test = setup_test_app();
    upload_and_import(&test).await;

    let response = test
        .app
        .oneshot(get_request(&format!(
            "/api/transactions?account_id={}&needs_review=true",
            test.card
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let rows = json.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|tx| tx["needs_review"] == true));
}

#[tokio::test]
async fn test_corrections_teach_a_rule() {
    let test = setup_test_app();
    upload_and_import(&test).await;
    let music = test.db.upsert_category("Music").unwrap();

    let mut spotify: Vec<_> = test
        .db
        .list_transactions(&TransactionFilter::new().account_id(Some(test.card)))
        .unwrap()
        .into_iter()
        .filter(|tx| tx.raw_vendor == "SPOTIFY AB")
        .collect();
    spotify.sort_by_key(|tx| tx.date);
    assert_eq!(spotify.len(), 3);

    let body = serde_json::json!({ "category_id": music, "actor": "api-test" });

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/transactions/{}/category", spotify[0].id),
            body.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["override"]["new_category_id"], music);
    assert_eq!(json["learned"]["outcome"], "not_enough_evidence");

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/transactions/{}/category", spotify[1].id),
            body,
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["learned"]["outcome"], "rule_created");
    assert_eq!(json["learned"]["reclassified"], 1);

    let response = test
        .app
        .clone()
        .oneshot(get_request(&format!(
            "/api/transactions/{}/overrides",
            spotify[0].id
        )))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["actor"], "api-test");

    let response = test.app.oneshot(get_request("/api/rules")).await.unwrap();
    let json = get_body_json(response).await;
    let rules = json.as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["source"], "learned");
    assert_eq!(rules[0]["category_id"], music);
}

#[tokio::test]
async fn test_correct_missing_transaction() {
    let test = setup_test_app();
    let music = test.db.upsert_category("Music").unwrap();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/transactions/999/category",
            serde_json::json!({ "category_id": music }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = test
        .app
        .oneshot(get_request("/api/transactions/999/overrides"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Rules ==========

#[tokio::test]
async fn test_create_and_list_rules() {
    let test = setup_test_app();
    let groceries = test.db.get_category_by_name("Groceries").unwrap().unwrap();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/rules",
            serde_json::json!({
                "match_pattern": "REWE",
                "match_type": "contains",
                "normalized_vendor": "REWE",
                "category_id": groceries.id,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["match_pattern"], "REWE");
    assert_eq!(json["source"], "manual");
    assert_eq!(json["priority"], 50);
    assert_eq!(json["active"], true);

    let response = test
        .app
        .oneshot(get_request("/api/rules?active=true"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_rule_validation() {
    let test = setup_test_app();
    let groceries = test.db.get_category_by_name("Groceries").unwrap().unwrap();

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/rules",
            serde_json::json!({
                "match_pattern": "([",
                "match_type": "pattern",
                "category_id": groceries.id,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = test
        .app
        .oneshot(json_request(
            "POST",
            "/api/rules",
            serde_json::json!({
                "match_pattern": "REWE",
                "match_type": "contains",
                "category_id": 999,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
