use chrono::NaiveDate;
use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use trade_balance_etl::adapters::{CensusAdapter, ComtradeAdapter, EurostatAdapter};
use trade_balance_etl::config::toml_config::ResolvedSource;
use trade_balance_etl::config::Credential;
use trade_balance_etl::core::context::CallBudget;
use trade_balance_etl::core::http::{RateLimitedClient, RetryPolicy};
use trade_balance_etl::core::orchestrator::SourceOutcome;
use trade_balance_etl::domain::model::{AggregateRow, Currency, SectorCode};
use trade_balance_etl::domain::ports::SourceAdapter;
use trade_balance_etl::domain::source::{SourceGroup, SourceId};
use trade_balance_etl::{
    EtlConfig, LocalStorage, Orchestrator, RunContext, RunMode, RunStatus, SourceSelection, TableStore,
};

fn context(mode: RunMode) -> RunContext {
    RunContext::new(mode, NaiveDate::from_ymd_opt(2025, 2, 14).unwrap())
}

fn fast_client(id: SourceId) -> RateLimitedClient {
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    RateLimitedClient::new(id, Duration::from_secs(5), retry, Duration::ZERO).unwrap()
}

fn settings(id: SourceId, base_url: &str, earliest: &str, reporters: &[&str]) -> ResolvedSource {
    let toml = format!(
        "[sources.{}]\nbase_url = \"{}\"\nearliest_period = \"{}\"\nreporters = {:?}\n",
        id, base_url, earliest, reporters
    );
    EtlConfig::from_toml_str(&toml).unwrap().source(id).unwrap()
}

fn store(dir: &TempDir) -> TableStore<LocalStorage> {
    TableStore::new(LocalStorage::new(dir.path().to_str().unwrap().to_string()))
}

fn census_adapter(server: &MockServer, key: Option<&str>) -> Box<dyn SourceAdapter> {
    Box::new(CensusAdapter::new(
        &settings(SourceId::Census, &server.url("/intltrade"), "2024-12", &["US"]),
        fast_client(SourceId::Census),
        Credential::with_value("CENSUS_API_KEY", key),
    ))
}

fn comtrade_adapter(server: &MockServer, key: Option<&str>) -> Box<dyn SourceAdapter> {
    Box::new(ComtradeAdapter::new(
        &settings(SourceId::Comtrade, &server.url("/comtrade"), "2024-12", &["JP"]),
        fast_client(SourceId::Comtrade),
        Credential::with_value("COMTRADE_API_KEY", key),
    ))
}

/// December 2024 for the US: TOTAL and sector 0 in both directions, China
/// as the only partner.
fn mount_census(server: &MockServer) -> Vec<httpmock::Mock<'_>> {
    let sectors = |path: &'static str, column: &'static str, total: &'static str, food: &'static str| {
        server.mock(move |when, then| {
            when.method(GET).path(path).query_param("get", format!("{},SITC,COMM_LVL", column));
            then.status(200).json_body(json!([
                [column, "SITC", "COMM_LVL", "time"],
                [total, "-", "SITC1", "2024-12"],
                [food, "0", "SITC1", "2024-12"]
            ]));
        })
    };
    let partners = |path: &'static str, column: &'static str, value: &'static str| {
        server.mock(move |when, then| {
            when.method(GET).path(path).query_param("get", format!("{},CTY_CODE", column));
            then.status(200).json_body(json!([
                [column, "CTY_CODE", "SITC", "time"],
                [value, "5700", "-", "2024-12"]
            ]));
        })
    };

    vec![
        sectors("/intltrade/exports/sitc", "ALL_VAL_MO", "1000", "300"),
        sectors("/intltrade/imports/sitc", "GEN_VAL_MO", "1400", "250"),
        partners("/intltrade/exports/sitc", "ALL_VAL_MO", "50"),
        partners("/intltrade/imports/sitc", "GEN_VAL_MO", "120"),
    ]
}

#[tokio::test]
async fn test_second_incremental_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    let mocks = mount_census(&server);

    let orchestrator = Orchestrator::new(store(&dir)).with_adapters(vec![census_adapter(&server, Some("k"))]);

    let report = orchestrator.run(&mut context(RunMode::Incremental), &SourceSelection::all()).await;
    assert_eq!(report.status(), RunStatus::AllSucceeded);
    // aggregate: TOTAL and 0; bilateral: CN
    assert_eq!(report.sources[0].outcome, SourceOutcome::Success { new_rows: 3 });

    let aggregate_path = dir.path().join("us").join("aggregate.csv");
    let bilateral_path = dir.path().join("us").join("bilateral.csv");
    let aggregate_before = std::fs::read(&aggregate_path).unwrap();
    let bilateral_before = std::fs::read(&bilateral_path).unwrap();

    let text = String::from_utf8(aggregate_before.clone()).unwrap();
    assert!(text.contains("2024-12-01,US,TOTAL,1000.0,1400.0,-400.0,USD"));
    assert!(text.contains("2024-12-01,US,0,300.0,250.0,50.0,USD"));

    let report = orchestrator.run(&mut context(RunMode::Incremental), &SourceSelection::all()).await;
    assert_eq!(report.sources[0].outcome, SourceOutcome::UpToDate);
    assert_eq!(report.sources[0].calls, 0);

    for mock in &mocks {
        mock.assert_hits(1);
    }
    assert_eq!(std::fs::read(&aggregate_path).unwrap(), aggregate_before);
    assert_eq!(std::fs::read(&bilateral_path).unwrap(), bilateral_before);
}

#[tokio::test]
async fn test_failing_source_leaves_its_tables_untouched() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    mount_census(&server);
    let eurostat_down = server.mock(|when, then| {
        when.method(GET).path_contains("/eurostat/");
        then.status(503);
    });

    let existing = vec![AggregateRow::new(
        "2024-10".parse().unwrap(),
        "DE",
        SectorCode::Total,
        90.0,
        80.0,
        Currency::Eur,
    )];
    store(&dir).save_aggregate("DE", &existing).await.unwrap();
    let de_path = dir.path().join("de").join("aggregate.csv");
    let de_before = std::fs::read(&de_path).unwrap();

    let eurostat: Box<dyn SourceAdapter> = Box::new(EurostatAdapter::new(
        &settings(SourceId::Eurostat, &server.url("/eurostat"), "2024-11", &["DE"]),
        fast_client(SourceId::Eurostat),
    ));
    let orchestrator =
        Orchestrator::new(store(&dir)).with_adapters(vec![census_adapter(&server, Some("k")), eurostat]);

    let report = orchestrator.run(&mut context(RunMode::Incremental), &SourceSelection::all()).await;

    assert_eq!(report.status(), RunStatus::PartiallySucceeded);
    assert!(matches!(
        report.source(SourceId::Eurostat).unwrap().outcome,
        SourceOutcome::Failed { .. }
    ));
    assert!(matches!(
        report.source(SourceId::Census).unwrap().outcome,
        SourceOutcome::Success { .. }
    ));
    // two attempts for the first request, then the source is abandoned
    eurostat_down.assert_hits(2);
    assert_eq!(std::fs::read(&de_path).unwrap(), de_before);
    assert!(!dir.path().join("de").join("bilateral.csv").exists());
}

#[tokio::test]
async fn test_comtrade_unclassified_chapters_are_counted_and_total_is_derived() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(GET).path("/comtrade").query_param("cmdCode", "AG2");
        then.status(200).json_body(json!({"data": [
            {"period": "202412", "flowCode": "X", "cmdCode": "27", "partnerCode": 0, "primaryValue": 100.0,
             "motCode": 0, "partner2Code": 0, "customsCode": "C00"},
            {"period": "202412", "flowCode": "X", "cmdCode": "99", "partnerCode": 0, "primaryValue": 5.0,
             "motCode": 0, "partner2Code": 0, "customsCode": "C00"},
            {"period": "202412", "flowCode": "M", "cmdCode": "01", "partnerCode": 0, "primaryValue": 20.0,
             "motCode": 1000, "partner2Code": 0, "customsCode": "C00"},
            {"period": "202412", "flowCode": "M", "cmdCode": "01", "partnerCode": 0, "primaryValue": 5.0,
             "motCode": 2100, "partner2Code": 0, "customsCode": "C00"}
        ]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/comtrade").query_param("cmdCode", "TOTAL");
        then.status(200).json_body(json!({"data": [
            {"period": "202412", "flowCode": "X", "cmdCode": "TOTAL", "partnerCode": 842, "primaryValue": 30.0}
        ]}));
    });

    let orchestrator = Orchestrator::new(store(&dir)).with_adapters(vec![comtrade_adapter(&server, Some("k"))]);
    let report = orchestrator.run(&mut context(RunMode::Incremental), &SourceSelection::all()).await;

    let comtrade = report.source(SourceId::Comtrade).unwrap();
    assert_eq!(comtrade.unclassified, 1);
    assert_eq!(comtrade.calls, 2);

    let rows = store(&dir).load_aggregate("JP").await.unwrap();
    let row = |sector: SectorCode| rows.iter().find(|r| r.sector_code == sector).unwrap();
    assert_eq!(row(SectorCode::Sitc(3)).export_value, 100.0);
    assert_eq!(row(SectorCode::Sitc(0)).import_value, 25.0);
    assert_eq!(row(SectorCode::Total).export_value, 105.0);
    assert_eq!(row(SectorCode::Total).balance, 80.0);
    assert!(rows.iter().all(|r| r.currency == Currency::Usd));

    let partners = store(&dir).load_bilateral("JP").await.unwrap();
    assert_eq!(partners.len(), 1);
    assert_eq!(partners[0].partner, "US");
    assert_eq!(partners[0].export_value, 30.0);
}

#[tokio::test]
async fn test_comtrade_budget_keeps_the_years_fetched_before_it_ran_out() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();

    let sectors = server.mock(|when, then| {
        when.method(GET).path("/comtrade").query_param("cmdCode", "AG2");
        then.status(200).json_body(json!({"data": [
            {"period": "202301", "flowCode": "X", "cmdCode": "27", "partnerCode": 0, "primaryValue": 100.0}
        ]}));
    });
    let partners = server.mock(|when, then| {
        when.method(GET).path("/comtrade").query_param("cmdCode", "TOTAL");
        then.status(200).json_body(json!({"data": [
            {"period": "202301", "flowCode": "X", "cmdCode": "TOTAL", "partnerCode": 842, "primaryValue": 30.0}
        ]}));
    });

    let adapter: Box<dyn SourceAdapter> = Box::new(ComtradeAdapter::new(
        &settings(SourceId::Comtrade, &server.url("/comtrade"), "2023-01", &["JP"]),
        fast_client(SourceId::Comtrade),
        Credential::with_value("COMTRADE_API_KEY", Some("k")),
    ));
    let orchestrator = Orchestrator::new(store(&dir)).with_adapters(vec![adapter]);

    // 2023 takes two calls, the third is the 2024 sector query
    let mut ctx = context(RunMode::Incremental).with_budget(SourceId::Comtrade, CallBudget::limited(3));
    let report = orchestrator.run(&mut ctx, &SourceSelection::all()).await;

    let comtrade = report.source(SourceId::Comtrade).unwrap();
    match &comtrade.outcome {
        SourceOutcome::Failed { reason } => assert!(reason.contains("budget")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(comtrade.calls, 3);
    assert_eq!(comtrade.persisted_rows, 3);
    sectors.assert_hits(2);
    partners.assert_hits(1);

    let rows = store(&dir).load_aggregate("JP").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.period.year() == 2023));
    assert_eq!(store(&dir).load_bilateral("JP").await.unwrap().len(), 1);

    let plan = orchestrator
        .plan(&context(RunMode::Incremental), &SourceSelection::all())
        .await
        .unwrap();
    assert_eq!(plan[0].ranges, vec![("2023-02".to_string(), "2024-12".to_string())]);
}

#[tokio::test]
async fn test_missing_key_fails_only_that_source() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    let comtrade_calls = server.mock(|when, then| {
        when.method(GET).path("/comtrade");
        then.status(200).json_body(json!({"data": []}));
    });

    let orchestrator = Orchestrator::new(store(&dir)).with_adapters(vec![comtrade_adapter(&server, None)]);
    let report = orchestrator.run(&mut context(RunMode::Incremental), &SourceSelection::all()).await;

    assert_eq!(report.status(), RunStatus::AllFailed);
    match &report.sources[0].outcome {
        SourceOutcome::Failed { reason } => assert!(reason.contains("COMTRADE_API_KEY")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    comtrade_calls.assert_hits(0);
    assert!(!dir.path().join("jp").exists());
}

#[tokio::test]
async fn test_stored_period_is_only_replaced_by_force_refresh() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    mount_census(&server);

    let stale = vec![AggregateRow::new(
        "2024-12".parse().unwrap(),
        "US",
        SectorCode::Total,
        1.0,
        1.0,
        Currency::Usd,
    )];
    store(&dir).save_aggregate("US", &stale).await.unwrap();

    let orchestrator = Orchestrator::new(store(&dir)).with_adapters(vec![census_adapter(&server, Some("k"))]);

    // the bilateral table is still empty, so December is fetched once more
    orchestrator.run(&mut context(RunMode::Incremental), &SourceSelection::all()).await;
    let rows = store(&dir).load_aggregate("US").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].export_value, 1.0);

    orchestrator.run(&mut context(RunMode::Force), &SourceSelection::all()).await;
    let rows = store(&dir).load_aggregate("US").await.unwrap();
    let totals: Vec<_> = rows.iter().filter(|r| r.sector_code == SectorCode::Total).collect();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].export_value, 1000.0);
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_only_selected_groups_run() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start();
    let census_mocks = mount_census(&server);
    let comtrade_calls = server.mock(|when, then| {
        when.method(GET).path("/comtrade");
        then.status(200).json_body(json!({"data": []}));
    });

    let orchestrator = Orchestrator::new(store(&dir)).with_adapters(vec![
        census_adapter(&server, Some("k")),
        comtrade_adapter(&server, Some("k")),
    ]);
    let selection = SourceSelection {
        only: vec![SourceGroup::Un],
        skip: vec![],
    };
    let report = orchestrator.run(&mut context(RunMode::Incremental), &selection).await;

    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].source, SourceId::Comtrade);
    assert_eq!(report.sources[0].outcome, SourceOutcome::UpToDate);
    comtrade_calls.assert_hits(2);
    for mock in &census_mocks {
        mock.assert_hits(0);
    }
}
