mod common;

use std::sync::Arc;

use common::{pg_options, register_fakes, Counters};
use sqldesk::commands;
use sqldesk::models::{NewProfile, ProfileUpdate, QueryOptions, TableDataOptions};
use sqldesk::{AppConfig, AppState, ErrorKind};

fn state_with_fakes(dir: &std::path::Path) -> (AppState, Arc<Counters>) {
    let state = AppState::new(AppConfig {
        data_dir: dir.to_path_buf(),
        ..AppConfig::default()
    });
    let counters = Arc::new(Counters::default());
    register_fakes(&state.registry, &counters, true);
    (state, counters)
}

#[tokio::test]
async fn test_profile_lifecycle_through_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (state, counters) = state_with_fakes(dir.path());

    assert!(commands::list_adapters(&state).contains(&"mysql".to_string()));

    let profile = commands::create_profile(
        &state,
        NewProfile {
            name: "local".into(),
            options: pg_options("localhost"),
        },
    )
    .unwrap();

    let status = commands::connect_profile(&state, &profile.id).await.unwrap();
    assert_eq!(status.adapter_type, "postgres");
    assert!(!status.sql_capable);

    let result = commands::run_query(
        &state,
        &profile.id,
        "SELECT * FROM users",
        Some(QueryOptions {
            limit: Some(50),
            offset: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(result.limit, Some(50));

    let renamed = commands::update_profile(
        &state,
        &profile.id,
        ProfileUpdate {
            name: Some("renamed".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(commands::get_profile(&state, &profile.id).unwrap(), renamed);

    commands::delete_profile(&state, &profile.id).await.unwrap();
    assert!(!state.manager.is_connected(&profile.id));
    assert_eq!(counters.disconnects(), 1);
    assert!(commands::list_profiles(&state).is_empty());

    let err = commands::get_profile(&state, &profile.id).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    commands::shutdown(&state).await;
}

#[tokio::test]
async fn test_schema_commands_require_sql_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _) = state_with_fakes(dir.path());

    let err = commands::get_schemas(&state, "missing").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let profile = commands::create_profile(
        &state,
        NewProfile {
            name: "basic".into(),
            options: pg_options("localhost"),
        },
    )
    .unwrap();
    commands::connect_profile(&state, &profile.id).await.unwrap();

    let err = commands::fetch_table_data(
        &state,
        &profile.id,
        TableDataOptions {
            schema: "public".into(),
            table: "users".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    commands::disconnect_profile(&state, &profile.id).await.unwrap();
    let err = commands::run_query(&state, &profile.id, "SELECT 1", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    commands::shutdown(&state).await;
}

#[tokio::test]
async fn test_invalid_profile_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let (state, counters) = state_with_fakes(dir.path());

    let err = commands::create_profile(
        &state,
        NewProfile {
            name: "broken".into(),
            options: pg_options("  "),
        },
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(counters.created(), 0);
}

#[tokio::test]
async fn test_connect_failure_surfaces_connection_kind() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(AppConfig {
        data_dir: dir.path().to_path_buf(),
        ..AppConfig::default()
    });
    let counters = Arc::new(Counters::default());
    register_fakes(&state.registry, &counters, false);
    state.registry.register_adapter(
        "postgres",
        state.registry.get_factory("failing").unwrap(),
    );

    let profile = commands::create_profile(
        &state,
        NewProfile {
            name: "down".into(),
            options: pg_options("db.invalid"),
        },
    )
    .unwrap();
    let err = commands::connect_profile(&state, &profile.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Connection);
    assert!(!state.manager.is_connected(&profile.id));
    assert!(state.manager.get_profile(&profile.id).unwrap().last_connected_at.is_none());

    commands::shutdown(&state).await;
}
