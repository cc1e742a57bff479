//! Scan pipeline behaviour against fake mailboxes.

mod common;

use common::{
    access_code_email, account, household_email, newsletter_email, FakeClicker, FakeMailSource,
    Harness, RejectingStore, HOUSEHOLD_LINK,
};
use household_watch::{
    AccountStore, ActivityLog, EmailKind, Error, LogLevel, LogQuery, LogStore, Monitor,
    MonitoringConfig, RecordStatus,
};
use reqwest::StatusCode;
use std::sync::Arc;

#[tokio::test]
async fn test_scanning_twice_records_each_message_once() {
    let h = Harness::new(FakeClicker::status(StatusCode::FOUND));
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver("a", household_email(1, Some("<h1@netflix.com>")));
    h.source.deliver("a", access_code_email(2, Some("<c1@netflix.com>")));
    h.source.deliver("a", household_email(3, None));

    let first = h.monitor.check_now().await.unwrap();
    let second = h.monitor.check_now().await.unwrap();

    assert_eq!(first.messages.recorded, 3);
    assert_eq!(second.messages.recorded, 0);
    assert_eq!(second.messages.duplicates, 3);
    assert_eq!(h.store.totals().await.unwrap().total, 3);
    // Duplicates are skipped before any click
    assert_eq!(h.clicker.clicked().len(), 2);
    assert_eq!(h.monitor.counters().emails_processed, 3);
}

#[tokio::test]
async fn test_redirect_marks_record_clicked() {
    let h = Harness::new(FakeClicker::status(StatusCode::FOUND));
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver("a", household_email(1, Some("<h1@netflix.com>")));

    h.monitor.check_now().await.unwrap();

    let records = h.monitor.records(LogQuery::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.kind, EmailKind::HouseholdUpdate);
    assert_eq!(record.status, RecordStatus::Clicked);
    assert_eq!(record.verification_link.as_deref(), Some(HOUSEHOLD_LINK));
    assert_eq!(record.click_response.as_deref(), Some("Success: Status 302"));
    assert_eq!(record.recipient, "Sam");
    assert_eq!(record.message_id.as_deref(), Some("<h1@netflix.com>"));

    let counters = h.monitor.counters();
    assert_eq!(counters.links_clicked, 1);
    assert_eq!(counters.errors, 0);
    assert_eq!(h.clicker.clicked(), vec![HOUSEHOLD_LINK.to_string()]);
}

#[tokio::test]
async fn test_server_error_marks_record_error() {
    let h = Harness::new(FakeClicker::status(StatusCode::INTERNAL_SERVER_ERROR));
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver("a", household_email(1, Some("<h1@netflix.com>")));

    h.monitor.check_now().await.unwrap();

    let record = &h.monitor.records(LogQuery::default()).await.unwrap()[0];
    assert_eq!(record.status, RecordStatus::Error);
    assert_eq!(record.click_response.as_deref(), Some("Failed: Status 500"));

    let counters = h.monitor.counters();
    assert_eq!(counters.links_clicked, 0);
    assert_eq!(counters.errors, 1);
}

#[tokio::test]
async fn test_transport_error_marks_record_error() {
    let h = Harness::new(FakeClicker::transport_error());
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver("a", household_email(1, Some("<h1@netflix.com>")));

    h.monitor.check_now().await.unwrap();

    let record = &h.monitor.records(LogQuery::default()).await.unwrap()[0];
    assert_eq!(record.status, RecordStatus::Error);
    assert!(record
        .click_response
        .as_deref()
        .is_some_and(|note| note.starts_with("Error: ")));

    let counters = h.monitor.counters();
    assert_eq!(counters.links_clicked, 0);
    assert_eq!(counters.errors, 1);

    let activity = h.monitor.activity(10).await.unwrap();
    assert!(activity.iter().any(|e| e.level == LogLevel::Warning));
}

#[tokio::test]
async fn test_auto_click_disabled_leaves_record_detected() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor
        .set_monitoring_config(MonitoringConfig {
            auto_click: false,
            ..MonitoringConfig::default()
        })
        .await
        .unwrap();
    h.monitor.save_account(account("a")).await.unwrap();
    // Per-account override wins over the global flag
    h.monitor
        .save_account(account("b").to_builder().auto_click(true).build().unwrap())
        .await
        .unwrap();
    h.source.deliver("a", household_email(1, Some("<h1@netflix.com>")));
    h.source.deliver("b", household_email(1, Some("<h1@netflix.com>")));

    h.monitor.check_now().await.unwrap();

    let records = h.monitor.records(LogQuery::default()).await.unwrap();
    assert_eq!(records.len(), 2);
    let by_account = |id: &str| records.iter().find(|r| r.account_id == id).unwrap();
    assert_eq!(by_account("a").status, RecordStatus::Detected);
    assert!(by_account("a").click_response.is_none());
    assert_eq!(by_account("b").status, RecordStatus::Clicked);
    assert_eq!(h.clicker.clicked().len(), 1);
}

#[tokio::test]
async fn test_access_code_email_is_recorded_without_click() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver("a", access_code_email(7, Some("<c1@netflix.com>")));

    h.monitor.check_now().await.unwrap();

    let records = h
        .monitor
        .records(LogQuery {
            limit: 10,
            kind: Some(EmailKind::TemporaryAccess),
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.access_code.as_deref(), Some("482913"));
    assert_eq!(record.device_info.as_deref(), Some("Living Room TV"));
    assert_eq!(record.recipient, "Alex");
    assert_eq!(record.status, RecordStatus::Detected);
    assert!(h.clicker.clicked().is_empty());

    let stats = h.monitor.stats().await.unwrap();
    assert_eq!(stats.access_code_emails, 1);
    assert_eq!(stats.household_emails, 0);
}

#[tokio::test]
async fn test_other_messages_are_not_persisted() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver("a", newsletter_email(1, Some("<n1@netflix.com>")));

    let summary = h.monitor.check_now().await.unwrap();

    assert_eq!(summary.messages.fetched, 1);
    assert_eq!(summary.messages.irrelevant, 1);
    assert!(h.store.records(LogQuery::default()).await.unwrap().is_empty());
    assert_eq!(h.monitor.counters().emails_processed, 0);
}

#[tokio::test]
async fn test_failing_account_does_not_stop_the_cycle() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor.save_account(account("broken")).await.unwrap();
    h.monitor.save_account(account("ok")).await.unwrap();
    h.source.fail("broken");
    h.source.deliver("ok", household_email(1, Some("<h1@netflix.com>")));

    let summary = h.monitor.check_now().await.unwrap();

    assert_eq!(summary.accounts_failed, 1);
    assert_eq!(summary.accounts_scanned, 1);
    assert_eq!(summary.messages.recorded, 1);
    let counters = h.monitor.counters();
    assert_eq!(counters.errors, 1);
    assert!(counters.last_check.is_some());

    let errors: Vec<_> = h
        .store
        .entries(20)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.level == LogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("broken account"));
}

#[tokio::test]
async fn test_undecodable_body_is_classified_as_other() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor.save_account(account("a")).await.unwrap();
    h.source.deliver(
        "a",
        household_watch::RawMessage {
            uid: 1,
            bytes: b"Subject: broken\r\nContent-Type: multipart/mixed; boundary=\"x\"\r\n\r\n--x\r\nContent-Type: text/html\r\nContent-Transfer-Encoding: base64\r\n\r\n@@@@\r\n--x--\r\n".to_vec(),
        },
    );
    h.source.deliver("a", household_email(2, Some("<h2@netflix.com>")));

    let summary = h.monitor.check_now().await.unwrap();

    assert_eq!(summary.messages.fetched, 2);
    assert_eq!(summary.messages.irrelevant, 1);
    assert_eq!(summary.messages.failed, 0);
    assert_eq!(summary.messages.recorded, 1);
    assert_eq!(summary.accounts_failed, 0);
}

#[tokio::test]
async fn test_failed_message_is_logged_and_scan_continues() {
    let store = Arc::new(RejectingStore::new("<c1@netflix.com>"));
    let source = Arc::new(FakeMailSource::new());
    let clicker = Arc::new(FakeClicker::status(StatusCode::OK));
    let monitor = Monitor::new(store.clone(), source.clone(), clicker);
    monitor.save_account(account("a")).await.unwrap();
    source.deliver("a", access_code_email(1, Some("<c1@netflix.com>")));
    source.deliver("a", access_code_email(2, Some("<c2@netflix.com>")));

    let summary = monitor.check_now().await.unwrap();

    assert_eq!(summary.messages.fetched, 2);
    assert_eq!(summary.messages.failed, 1);
    assert_eq!(summary.messages.recorded, 1);
    assert_eq!(summary.accounts_failed, 0);
    assert_eq!(summary.accounts_scanned, 1);

    let counters = monitor.counters();
    assert_eq!(counters.errors, 1);
    assert_eq!(counters.emails_processed, 1);

    let errors: Vec<_> = store
        .entries(20)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.level == LogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .starts_with("Error processing message 1 for a account"));

    let records = store.records(LogQuery::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_id.as_deref(), Some("<c2@netflix.com>"));
}

#[tokio::test]
async fn test_injected_sender_pattern_is_rejected() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    let result = h
        .monitor
        .set_monitoring_config(MonitoringConfig {
            sender_patterns: vec!["netflix.com\"\r\nA1 DELETE INBOX".into()],
            ..MonitoringConfig::default()
        })
        .await;

    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    assert_eq!(
        h.monitor.monitoring_config().await.unwrap(),
        MonitoringConfig::default()
    );
}

#[tokio::test]
async fn test_inactive_accounts_are_not_scanned() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.store
        .upsert_account(account("idle").to_builder().active(false).build().unwrap())
        .await
        .unwrap();
    h.source.deliver("idle", household_email(1, Some("<h1@netflix.com>")));

    let summary = h.monitor.check_now().await.unwrap();

    assert_eq!(summary.accounts_scanned, 0);
    assert_eq!(h.source.fetches(), 0);
}

#[tokio::test]
async fn test_max_messages_bounds_each_scan() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor
        .set_monitoring_config(MonitoringConfig {
            max_messages: 2,
            ..MonitoringConfig::default()
        })
        .await
        .unwrap();
    h.monitor.save_account(account("a")).await.unwrap();
    for uid in 1..=5 {
        h.source
            .deliver("a", access_code_email(uid, Some(&format!("<c{uid}@netflix.com>"))));
    }

    let summary = h.monitor.check_now().await.unwrap();
    assert_eq!(summary.messages.fetched, 2);
    assert_eq!(summary.messages.recorded, 2);
}

#[tokio::test]
async fn test_connection_test_writes_activity() {
    let h = Harness::new(FakeClicker::status(StatusCode::OK));
    h.monitor.save_account(account("a")).await.unwrap();
    h.monitor.save_account(account("b")).await.unwrap();
    h.source.fail("b");

    h.monitor.test_connection("a").await.unwrap();
    assert!(h.monitor.test_connection("b").await.is_err());
    assert!(matches!(
        h.monitor.test_connection("missing").await,
        Err(Error::AccountNotFound { .. })
    ));

    let activity = h.monitor.activity(10).await.unwrap();
    assert!(activity[0].message.starts_with("Connection test failed for b@example.com"));
    assert_eq!(activity[0].level, LogLevel::Error);
    assert!(activity[1].message.starts_with("Connection test successful for a@example.com"));
}
