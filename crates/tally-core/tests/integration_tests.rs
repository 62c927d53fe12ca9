//! Integration tests for tally-core
//!
//! These tests exercise the full upload → import → correct → learn workflow
//! against a database file on disk.

use tally_core::{
    correct_category,
    db::TransactionFilter,
    models::{
        Confidence, Direction, ImportStatus, Issuer, Layout, MatchType, NewVendorRule, RuleSource,
    },
    AIClient, CorrectionLearner, Database, Error, ErrorKind, ImportOrchestrator, LearnOutcome,
    TallyConfig,
};
use tempfile::TempDir;

/// Giro account statement as extracted from the PDF
const GIRO_STATEMENT: &str = "Kontoauszug Girokonto Nr. 12/2017 vom 01.12.2017 bis 31.12.2017\n\
Buchungstag Vorgang Betrag\n\
Alter Kontostand 2.492,21\n\
01.12.2017 Lastschrift ALTE LEIPZIGER BAUSPAR AG   -484,55\n\
Mandatsreferenz: ML-4711\n\
Gläubiger-ID: DE12ZZZ00000012345\n\
Bausparvertrag 123456\n\
01.12.2017 Umbuchung Kreditkarte   -500,00\n\
02.12.2017 Kartenzahlung REWE Markt Berlin   -23,10\n\
Neuer Kontostand 1.484,56\n";

/// Card export; the deposit is the other side of the giro transfer
const CARD_EXPORT: &str = "\"Kreditkarte:\";\"4930********1234 VISA Card\";\n\
\n\
\"Umsatz abgerechnet\";\"Wertstellung\";\"Belegdatum\";\"Beschreibung\";\"Betrag (EUR)\";\n\
\"Ja\";\"04.12.2017\";\"04.12.2017\";\"Einzahlung\";\"500,00\";\n\
\"Ja\";\"05.10.2017\";\"05.10.2017\";\"SPOTIFY AB\";\"-9,99\";\n\
\"Ja\";\"05.11.2017\";\"05.11.2017\";\"SPOTIFY AB\";\"-9,99\";\n\
\"Ja\";\"05.12.2017\";\"05.12.2017\";\"SPOTIFY AB\";\"-9,99\";\n";

struct Workspace {
    // Keeps the database directory alive
    _dir: TempDir,
    db: Database,
    orchestrator: ImportOrchestrator,
    giro: i64,
    card: i64,
}

fn workspace(ai: Option<AIClient>) -> Workspace {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("tally.db");
    let db = Database::new(&path.to_string_lossy()).expect("Failed to open database");

    let config = TallyConfig::embedded();
    db.seed_categories(&config.seed_categories, &config.transfer_category)
        .expect("Failed to seed categories");
    let giro = db.upsert_account("Girokonto", Issuer::Giro).unwrap();
    let card = db.upsert_account("Visa", Issuer::Card).unwrap();
    let orchestrator = ImportOrchestrator::new(db.clone(), ai, &config);

    Workspace {
        _dir: dir,
        db,
        orchestrator,
        giro,
        card,
    }
}

// =============================================================================
// Import Workflow Tests
// =============================================================================

#[tokio::test]
async fn test_giro_and_card_statements_pair_transfer() {
    let ws = workspace(None);

    let (giro_upload, giro_counts) = ws
        .orchestrator
        .import_file(ws.giro, "kontoauszug.txt", GIRO_STATEMENT.as_bytes(), None)
        .await
        .expect("giro import");
    assert_eq!(giro_upload.format.issuer, Issuer::Giro);
    assert_eq!(giro_upload.format.layout, Layout::FreeText);
    assert_eq!(giro_counts.inserted, 3);
    assert_eq!(giro_counts.transfers, 0);

    let (card_upload, card_counts) = ws
        .orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .expect("card import");
    assert_eq!(card_upload.format.layout, Layout::Delimited);
    assert_eq!(card_counts.total_seen, 4);
    assert_eq!(card_counts.inserted, 4);
    assert_eq!(card_counts.transfers, 1);

    let transfers: Vec<_> = ws
        .db
        .list_transactions(&TransactionFilter::new())
        .unwrap()
        .into_iter()
        .filter(|tx| tx.is_transfer)
        .collect();
    assert_eq!(transfers.len(), 2);
    assert!(transfers.iter().all(|tx| tx.amount == 50000));
    assert_eq!(transfers[0].transfer_group, transfers[1].transfer_group);
    assert_ne!(transfers[0].direction, transfers[1].direction);
    assert!(transfers.iter().all(|tx| !tx.needs_review));
}

#[tokio::test]
async fn test_bauspar_row_keeps_reference_metadata() {
    let ws = workspace(None);
    ws.orchestrator
        .import_file(ws.giro, "kontoauszug.txt", GIRO_STATEMENT.as_bytes(), None)
        .await
        .unwrap();

    let bauspar = ws
        .db
        .list_transactions(&TransactionFilter::new().account_id(Some(ws.giro)))
        .unwrap()
        .into_iter()
        .find(|tx| tx.amount == 48455)
        .expect("bauspar row");
    assert_eq!(bauspar.direction, Direction::Debit);
    assert_eq!(bauspar.raw_vendor, "ALTE LEIPZIGER BAUSPAR AG");
    assert_eq!(
        bauspar.metadata.get("mandate_reference").map(String::as_str),
        Some("ML-4711")
    );
    assert!(bauspar.needs_review);
}

#[tokio::test]
async fn test_repeated_upload_only_counts_duplicates() {
    let ws = workspace(None);
    let (_, first) = ws
        .orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();
    let (upload, second) = ws
        .orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();

    assert!(upload.previous_import.is_some());
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, first.inserted);
    assert_eq!(ws.db.list_import_jobs(Some(ws.card), 10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unrecognized_document_needs_hint() {
    let ws = workspace(None);
    let err = ws
        .orchestrator
        .prepare_upload(ws.giro, "notes.txt", b"hello world", None)
        .unwrap_err();
    assert!(matches!(err, Error::UnrecognizedFormat { .. }));
    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(ws.db.list_import_jobs(None, 10).unwrap().is_empty());

    let err = ws
        .orchestrator
        .prepare_upload(ws.giro, "statement.xlsx", b"PK\x03\x04", None)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFileType(_)));
}

#[tokio::test]
async fn test_rollback_and_reimport() {
    let ws = workspace(None);
    ws.orchestrator
        .import_file(ws.giro, "kontoauszug.txt", GIRO_STATEMENT.as_bytes(), None)
        .await
        .unwrap();
    let (card_upload, _) = ws
        .orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();

    let summary = ws.db.rollback_import(card_upload.import_job_id).unwrap();
    assert_eq!(summary.deleted, 4);
    assert_eq!(summary.unlinked, 1);
    assert_eq!(
        ws.db
            .get_import_job(card_upload.import_job_id)
            .unwrap()
            .unwrap()
            .status,
        ImportStatus::RolledBack
    );
    assert!(ws
        .db
        .list_transactions(&TransactionFilter::new())
        .unwrap()
        .iter()
        .all(|tx| !tx.is_transfer));

    // The same file imports cleanly again and pairs again
    let (_, counts) = ws
        .orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();
    assert_eq!(counts.inserted, 4);
    assert_eq!(counts.transfers, 1);
}

// =============================================================================
// Correction Learning Tests
// =============================================================================

#[tokio::test]
async fn test_two_corrections_teach_a_rule() {
    let ws = workspace(None);
    ws.orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();
    let music = ws.db.upsert_category("Music").unwrap();
    let learner = CorrectionLearner::from_config(&TallyConfig::embedded());

    let mut spotify: Vec<_> = ws
        .db
        .list_transactions(&TransactionFilter::new().account_id(Some(ws.card)))
        .unwrap()
        .into_iter()
        .filter(|tx| tx.raw_vendor == "SPOTIFY AB")
        .collect();
    spotify.sort_by_key(|tx| tx.date);
    assert_eq!(spotify.len(), 3);

    let first = correct_category(&ws.db, &learner, spotify[0].id, music, "test").unwrap();
    assert_eq!(
        first.learned,
        Some(LearnOutcome::NotEnoughEvidence { count: 1 })
    );

    let second = correct_category(&ws.db, &learner, spotify[1].id, music, "test").unwrap();
    let Some(LearnOutcome::RuleCreated {
        rule_id,
        reclassified,
        ..
    }) = second.learned
    else {
        panic!("expected a learned rule, got {:?}", second.learned);
    };
    assert_eq!(reclassified, 1);

    // The third one was never touched by hand
    let third = ws.db.get_transaction(spotify[2].id).unwrap().unwrap();
    assert_eq!(third.category_id, Some(music));
    assert_eq!(third.confidence, Some(Confidence::High));
    assert!(!third.is_reviewed);
    assert!(!third.needs_review);
    assert!(ws.db.list_overrides_for_transaction(third.id).unwrap().is_empty());

    let rule = ws.db.get_rule(rule_id).unwrap().unwrap();
    assert_eq!(rule.category_id, music);
    assert_eq!(rule.priority, 10);
}

#[tokio::test]
async fn test_learned_rule_classifies_future_imports() {
    let ws = workspace(None);
    ws.orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();
    let music = ws.db.upsert_category("Music").unwrap();
    let learner = CorrectionLearner::default();

    let spotify: Vec<_> = ws
        .db
        .list_transactions(&TransactionFilter::new().account_id(Some(ws.card)))
        .unwrap()
        .into_iter()
        .filter(|tx| tx.raw_vendor == "SPOTIFY AB")
        .collect();
    for tx in spotify.iter().take(2) {
        correct_category(&ws.db, &learner, tx.id, music, "test").unwrap();
    }

    let next_month = "\"Kreditkarte:\";\"4930********1234 VISA Card\";\n\
\n\
\"Umsatz abgerechnet\";\"Wertstellung\";\"Belegdatum\";\"Beschreibung\";\"Betrag (EUR)\";\n\
\"Ja\";\"05.01.2018\";\"05.01.2018\";\"SPOTIFY AB\";\"-9,99\";\n";
    let (_, counts) = ws
        .orchestrator
        .import_file(ws.card, "visa-januar.csv", next_month.as_bytes(), None)
        .await
        .unwrap();
    assert_eq!(counts.inserted, 1);
    assert_eq!(counts.classified, 1);
}

#[tokio::test]
async fn test_corrections_overrule_conflicting_exact_rule() {
    let ws = workspace(None);
    let subscriptions = ws.db.get_category_by_name("Subscriptions").unwrap().unwrap().id;
    let music = ws.db.upsert_category("Music").unwrap();
    let manual = ws
        .db
        .create_rule(&NewVendorRule {
            match_pattern: "SPOTIFY".into(),
            match_type: MatchType::Exact,
            normalized_vendor: String::new(),
            category_id: subscriptions,
            priority: 5,
            source: RuleSource::Manual,
        })
        .unwrap();
    ws.orchestrator
        .import_file(ws.card, "visa.csv", CARD_EXPORT.as_bytes(), None)
        .await
        .unwrap();
    let learner = CorrectionLearner::default();

    let mut spotify: Vec<_> = ws
        .db
        .list_transactions(&TransactionFilter::new().account_id(Some(ws.card)))
        .unwrap()
        .into_iter()
        .filter(|tx| tx.raw_vendor == "SPOTIFY AB")
        .collect();
    spotify.sort_by_key(|tx| tx.date);
    assert!(spotify.iter().all(|tx| tx.category_id == Some(subscriptions)));

    let outcomes: Vec<_> = spotify
        .iter()
        .map(|tx| {
            correct_category(&ws.db, &learner, tx.id, music, "test")
                .unwrap()
                .learned
        })
        .collect();
    assert_eq!(outcomes[0], Some(LearnOutcome::NotEnoughEvidence { count: 1 }));
    let Some(LearnOutcome::RuleCreated {
        rule_id, retired, ..
    }) = outcomes[1].clone()
    else {
        panic!("expected a learned rule, got {:?}", outcomes[1]);
    };
    assert_eq!(retired, vec![manual]);
    assert_eq!(outcomes[2], Some(LearnOutcome::AlreadyCovered { rule_id }));

    let active = ws.db.list_active_rules().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, rule_id);
    assert_eq!(active[0].category_id, music);

    let next_month = "\"Kreditkarte:\";\"4930********1234 VISA Card\";\n\
\n\
\"Umsatz abgerechnet\";\"Wertstellung\";\"Belegdatum\";\"Beschreibung\";\"Betrag (EUR)\";\n\
\"Ja\";\"05.01.2018\";\"05.01.2018\";\"SPOTIFY AB\";\"-9,99\";\n";
    let (upload, _) = ws
        .orchestrator
        .import_file(ws.card, "visa-januar.csv", next_month.as_bytes(), None)
        .await
        .unwrap();
    let january = ws
        .db
        .list_transactions(&TransactionFilter::new().import_job_id(Some(upload.import_job_id)))
        .unwrap();
    assert_eq!(january[0].category_id, Some(music));
}

#[tokio::test]
async fn test_correction_of_missing_transaction() {
    let ws = workspace(None);
    let learner = CorrectionLearner::default();
    let music = ws.db.upsert_category("Music").unwrap();
    let err = correct_category(&ws.db, &learner, 4242, music, "test").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// =============================================================================
// Fallback Tests
// =============================================================================

#[tokio::test]
async fn test_mock_fallback_only_touches_rule_misses() {
    let ws = workspace(Some(AIClient::mock()));
    let (_, counts) = ws
        .orchestrator
        .import_file(ws.giro, "kontoauszug.txt", GIRO_STATEMENT.as_bytes(), None)
        .await
        .unwrap();
    // REWE comes back as Groceries; the other vendors as "Other", which is unknown
    assert_eq!(counts.classified, 1);

    let rewe = ws
        .db
        .list_transactions(&TransactionFilter::new())
        .unwrap()
        .into_iter()
        .find(|tx| tx.normalized_vendor == "REWE")
        .unwrap();
    assert_eq!(rewe.confidence, Some(Confidence::Low));
}
