//! Check orchestration against an in-memory database and fake gateways.

mod common;

use std::time::Duration;

use common::{FakeApi, FakeDevice, Harness};
use spamwatch::Error;
use spamwatch::config::SettingKey;
use spamwatch::database::models::GatewayStatus;
use spamwatch::resource::ResourceKind;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_clean_phone_on_one_gateway() {
    let h = Harness::new().await;
    let phone = h.add_phone("+15550100001").await;
    let gateway = h.add_gateway("tc-1", "truecaller").await;

    let outcome = h.checker.check_one(&phone.id).await.unwrap();
    assert_eq!(outcome.succeeded(), 1);
    assert!(!outcome.is_spam());

    let results = h.repos.results.latest_per_service(&phone.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].service_code, "truecaller");
    assert_eq!(results[0].gateway_id.as_deref(), Some(gateway.id.as_str()));
    assert!(!results[0].is_spam);
    assert_eq!(results[0].keywords(), Vec::<String>::new());
}

#[tokio::test]
async fn test_keyword_hit_marks_spam_and_counts_statistics() {
    let device = FakeDevice::default().with_text("truecaller", "Likely SPAM - 214 reports");
    let h = Harness::with_device(device).await;
    let phone = h.add_phone("+15550100002").await;
    h.add_gateway("tc-1", "truecaller").await;

    let outcome = h.checker.check_one(&phone.id).await.unwrap();
    assert!(outcome.is_spam());
    let hits = outcome.spam_hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "truecaller");
    assert_eq!(hits[0].1, &["spam".to_string()][..]);

    h.checker.check_one(&phone.id).await.unwrap();
    let stats = h.repos.results.statistics_for_phone(&phone.id).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_checks, 2);
    assert_eq!(stats[0].spam_count, 2);
    assert!(stats[0].first_spam_at.is_some());
}

#[tokio::test]
async fn test_partial_failure_still_succeeds() {
    let device = FakeDevice::default().failing_on("hiya-1");
    let h = Harness::with_device(device).await;
    let phone = h.add_phone("+15550100003").await;
    h.add_gateway("tc-1", "truecaller").await;
    h.add_gateway("hiya-1", "hiya").await;

    let outcome = h.checker.check_one(&phone.id).await.unwrap();
    assert_eq!(outcome.succeeded(), 1);
    assert_eq!(outcome.failed(), 1);
    assert_eq!(h.count("check_results").await, 1);
}

#[tokio::test]
async fn test_total_failure_is_an_error() {
    let device = FakeDevice::default().failing_on("tc-1").failing_on("hiya-1");
    let h = Harness::with_device(device).await;
    let phone = h.add_phone("+15550100004").await;
    h.add_gateway("tc-1", "truecaller").await;
    h.add_gateway("hiya-1", "hiya").await;

    let err = h.checker.check_one(&phone.id).await.unwrap_err();
    assert!(
        matches!(err, Error::TotalFailure { attempted: 2, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(h.count("check_results").await, 0);
}

#[tokio::test]
async fn test_no_gateways_means_no_candidates() {
    let h = Harness::new().await;
    let phone = h.add_phone("+15550100005").await;

    let err = h.checker.check_one(&phone.id).await.unwrap_err();
    assert!(err.is_no_candidates(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unknown_phone_is_not_found() {
    let h = Harness::new().await;
    let err = h.checker.check_one("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_gateway_runs_one_check_at_a_time() {
    let device = FakeDevice::default().holding(Duration::from_millis(50));
    let h = Harness::with_device(device).await;
    h.add_gateway("tc-1", "truecaller").await;
    let mut phones = Vec::new();
    for i in 0..4 {
        phones.push(h.add_phone(&format!("+1555010010{i}")).await);
    }

    let checks = phones.iter().map(|p| {
        let checker = h.checker.clone();
        let id = p.id.clone();
        tokio::spawn(async move { checker.check_one(&id).await })
    });
    let results = futures::future::join_all(checks).await;

    let mut succeeded = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(e.is_busy(), "unexpected error: {e}"),
        }
    }
    assert!(succeeded >= 1);
    assert_eq!(h.device.peak_in_flight(), 1);
    assert_eq!(h.count("check_results").await, succeeded);
    assert!(h.resources.busy_ids(ResourceKind::Gateway).is_empty());
    assert!(h.resources.busy_ids(ResourceKind::Phone).is_empty());
}

#[tokio::test]
async fn test_check_on_busy_gateway_is_rejected() {
    let h = Harness::new().await;
    let phone = h.add_phone("+15550100006").await;
    let gateway = h.add_gateway("tc-1", "truecaller").await;

    let held = h
        .resources
        .try_acquire(ResourceKind::Gateway, &gateway.id)
        .unwrap();
    let err = h
        .checker
        .check_on_gateway(&phone.id, &gateway.id)
        .await
        .unwrap_err();
    assert!(err.is_busy());

    let statuses = h.checker.gateway_statuses().await.unwrap();
    assert_eq!(statuses[0].status, GatewayStatus::Checking);

    drop(held);
    let result = h
        .checker
        .check_on_gateway(&phone.id, &gateway.id)
        .await
        .unwrap();
    assert_eq!(result.gateway_id.as_deref(), Some(gateway.id.as_str()));
}

#[tokio::test]
async fn test_refresh_gateway_statuses_persists_probe() {
    let device = FakeDevice::default().failing_on("hiya-1");
    let h = Harness::with_device(device).await;
    let online = h.add_gateway("tc-1", "truecaller").await;
    let offline = h.add_gateway("hiya-1", "hiya").await;

    let views = h.checker.refresh_gateway_statuses().await.unwrap();
    assert_eq!(views.len(), 2);

    let stored = h.repos.gateways.get_gateway(&offline.id).await.unwrap();
    assert_eq!(stored.status(), GatewayStatus::Offline);
    assert!(stored.last_status_at.is_some());
    let stored = h.repos.gateways.get_gateway(&online.id).await.unwrap();
    assert_eq!(stored.status(), GatewayStatus::Online);
}

#[tokio::test]
async fn test_api_labels_match_keywords() {
    let api = FakeApi::default().with_labels("hiya", &["Fraud", "Debt collector"]);
    let h = Harness::with_fakes(FakeDevice::default(), api).await;
    h.set(SettingKey::CheckMode, "api_only").await;
    let phone = h.add_phone("+15550100007").await;
    let service = h.add_api("hiya-lookup", "hiya").await;

    let outcome = h.checker.check_one(&phone.id).await.unwrap();
    assert!(outcome.is_spam());

    let results = h.repos.results.latest_per_service(&phone.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].api_service_id.as_deref(), Some(service.id.as_str()));
    assert_eq!(results[0].keywords(), vec!["fraud".to_string()]);
    assert_eq!(h.device.calls(), 0);
}

#[tokio::test]
async fn test_both_modes_over_three_clean_phones() {
    let h = Harness::new().await;
    h.set(SettingKey::CheckMode, "both").await;
    h.set(SettingKey::MaxConcurrentChecks, "1").await;
    for i in 1..=3 {
        h.add_phone(&format!("+1555020000{i}")).await;
    }
    h.add_gateway("tc-1", "truecaller").await;
    h.add_api("hiya-lookup", "hiya").await;

    let summary = h.checker.check_all().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded(), 3);
    assert_eq!(summary.spam_count(), 0);
    assert_eq!(h.count("check_results").await, 6);
    assert_eq!(h.count("statistics").await, 6);

    let report = h
        .runner(Duration::from_secs(30))
        .run("manual", &CancellationToken::new())
        .await;
    assert_eq!(report.checked, 3);
    assert!(report.spam.is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_batch_with_spam_sends_one_summary() {
    let device = FakeDevice::default().with_text("truecaller", "Suspected scam caller");
    let h = Harness::with_device(device).await;
    h.add_phone("+15550300001").await;
    h.add_phone("+15550300002").await;
    h.add_gateway("tc-1", "truecaller").await;

    let report = h
        .runner(Duration::from_secs(30))
        .run("nightly", &CancellationToken::new())
        .await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.spam_numbers(), 2);

    let notifier = h.notifier.clone();
    assert!(common::eventually(|| {
        let notifier = notifier.clone();
        async move { notifier.sent().len() == 1 }
    })
    .await);
    let (subject, body) = &h.notifier.sent()[0];
    assert!(subject.contains("2 number(s)"));
    assert!(body.contains("+15550300001 on truecaller [scam]"));
}

#[tokio::test]
async fn test_cancelled_batch_stops_early() {
    let h = Harness::new().await;
    h.add_phone("+15550400001").await;
    h.add_gateway("tc-1", "truecaller").await;

    let token = CancellationToken::new();
    token.cancel();
    let report = h.runner(Duration::from_secs(30)).run("manual", &token).await;
    assert!(report.cancelled);
    assert_eq!(report.checked, 0);
    assert_eq!(h.device.calls(), 0);
}

#[tokio::test]
async fn test_queue_runs_submitted_checks() {
    let h = Harness::new().await;
    let phone = h.add_phone("+15550500001").await;
    h.add_gateway("tc-1", "truecaller").await;

    let token = CancellationToken::new();
    let queue = spamwatch::checker::CheckQueue::start(h.checker.clone(), 2, 8, token.clone());
    queue.submit_one(&phone.id).unwrap();

    let pool = h.pool.clone();
    assert!(common::eventually(|| {
        let pool = pool.clone();
        async move {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM check_results")
                .fetch_one(&pool)
                .await
                .unwrap();
            count == 1
        }
    })
    .await);

    token.cancel();
    queue.join().await;
    assert!(queue.submit_all().is_err());
}

#[tokio::test]
async fn test_timed_out_check_still_ends_its_call() {
    let device = FakeDevice::default().holding(Duration::from_millis(400));
    let h = Harness::with_device(device).await;
    let phone = h.add_phone("+15550400002").await;
    h.add_gateway("tc-1", "truecaller").await;

    let report = h
        .runner(Duration::from_millis(100))
        .run("nightly", &CancellationToken::new())
        .await;
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.checked, 0);
    assert_eq!(h.device.ended(), 0);

    let device = h.device.clone();
    assert!(common::eventually(|| {
        let device = device.clone();
        async move { device.ended() == 1 }
    })
    .await);
    let repos = h.repos.clone();
    let id = phone.id.clone();
    assert!(common::eventually(|| {
        let repos = repos.clone();
        let id = id.clone();
        async move {
            repos
                .results
                .latest_per_service(&id)
                .await
                .map(|r| r.len() == 1)
                .unwrap_or(false)
        }
    })
    .await);
    assert!(h.resources.busy_ids(ResourceKind::Gateway).is_empty());
    assert!(h.resources.busy_ids(ResourceKind::Phone).is_empty());
}

#[tokio::test]
async fn test_check_all_with_oversized_stored_limit() {
    let h = Harness::new().await;
    h.repos
        .settings
        .set_setting("max_concurrent_checks", &u64::MAX.to_string())
        .await
        .unwrap();
    h.settings.invalidate_all();
    assert!(
        h.settings
            .set(SettingKey::MaxConcurrentChecks, &u64::MAX.to_string())
            .await
            .is_err()
    );
    h.add_phone("+15550200011").await;
    h.add_gateway("tc-1", "truecaller").await;

    let summary = h.checker.check_all().await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.succeeded(), 1);
}
