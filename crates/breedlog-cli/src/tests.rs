use std::path::{Path, PathBuf};

use breedlog_core::auth::{AuthError, AuthSession, AuthUser, SignUpOutcome};
use breedlog_core::capture::{CaptureError, PrecomputedClassifier};
use breedlog_core::sync::SyncFailure;
use breedlog_core::{SyncOutcome, SyncStatus, UserId};
use pretty_assertions::assert_eq;

use crate::auth::{clear_stored_session, store_session_for_tests};
use clap::Parser;

use crate::cli::{AuthCommands, Cli, Commands, CompletionShell};
use crate::commands::add::add_prediction;
use crate::commands::auth_cmd::describe_sign_up;
use crate::commands::clear::{clear_history, run_clear};
use crate::commands::common::{
    format_record_lines, format_relative_time, record_to_list_item, signed_in_user,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::config::{describe_profile, init_profile, ProfileValues};
use crate::commands::list::list_records;
use crate::commands::sync::{report_outcome, session_after_restore};
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

fn user(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

fn write_image(dir: &Path, name: &str, breed: &str, confidence: f64) -> PathBuf {
    let image = dir.join(name);
    std::fs::write(&image, b"\xFF\xD8\xFFjpeg").unwrap();
    let prediction = serde_json::json!({
        "top_prediction": {"breed": breed, "confidence": confidence},
        "top_k": [{"breed": breed, "confidence": confidence}],
    });
    std::fs::write(
        PrecomputedClassifier::sidecar_path(&image),
        prediction.to_string(),
    )
    .unwrap();
    image
}

#[test]
fn format_relative_time_buckets() {
    let now = 1_000_000_000_000;
    assert_eq!(format_relative_time(now - 10_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now + 10_000, now), "just now");
}

#[tokio::test(flavor = "current_thread")]
async fn add_records_pending_prediction_from_sidecar() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("data").join("breedlog.db");
    let image = write_image(tmp.path(), "cow.jpg", "Gir", 0.91);
    let alice = user("alice");

    let record = add_prediction(&image, None, &db_path, &alice).await.unwrap();
    assert_eq!(record.status, SyncStatus::PendingSync);
    assert_eq!(record.prediction_result.top_prediction.breed, "Gir");
    assert!(record.image_uri.starts_with("file://"));

    let records = list_records(10, &db_path, &alice).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, record.id);
}

#[tokio::test(flavor = "current_thread")]
async fn add_uses_explicit_result_path() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("breedlog.db");
    let image = tmp.path().join("photo.png");
    std::fs::write(&image, b"png").unwrap();
    let result = tmp.path().join("model-output.json");
    std::fs::write(
        &result,
        r#"{"top_k": [{"breed": "Sahiwal", "confidence": 0.7}, {"breed": "Gir", "confidence": 0.2}]}"#,
    )
    .unwrap();

    let record = add_prediction(&image, Some(&result), &db_path, &user("alice"))
        .await
        .unwrap();
    assert_eq!(record.prediction_result.top_prediction.breed, "Sahiwal");
    assert_eq!(record.prediction_result.top_k.len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn add_rejects_low_confidence_without_saving() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("breedlog.db");
    let image = write_image(tmp.path(), "blurry.jpg", "Ongole", 0.1);
    let alice = user("alice");

    let error = add_prediction(&image, None, &db_path, &alice)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CliError::Capture(CaptureError::LowConfidence { .. })
    ));
    assert!(list_records(10, &db_path, &alice).await.unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn add_reports_missing_image() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("breedlog.db");

    let error = add_prediction(
        &tmp.path().join("absent.jpg"),
        None,
        &db_path,
        &user("alice"),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        error,
        CliError::Capture(CaptureError::ImageNotFound(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn list_is_newest_first_and_limited() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("breedlog.db");
    let alice = user("alice");

    for (name, breed) in [("a.jpg", "Gir"), ("b.jpg", "Sahiwal"), ("c.jpg", "Tharparkar")] {
        let image = write_image(tmp.path(), name, breed, 0.8);
        add_prediction(&image, None, &db_path, &alice).await.unwrap();
    }

    let records = list_records(2, &db_path, &alice).await.unwrap();
    let breeds = records
        .iter()
        .map(|record| record.prediction_result.top_prediction.breed.as_str())
        .collect::<Vec<_>>();
    assert_eq!(breeds, vec!["Tharparkar", "Sahiwal"]);
}

#[tokio::test(flavor = "current_thread")]
async fn clear_only_touches_the_given_user() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("breedlog.db");
    let alice = user("alice");
    let bob = user("bob");

    let image = write_image(tmp.path(), "cow.jpg", "Gir", 0.9);
    add_prediction(&image, None, &db_path, &alice).await.unwrap();
    add_prediction(&image, None, &db_path, &bob).await.unwrap();

    clear_history(&db_path, &alice).await.unwrap();

    assert!(list_records(10, &db_path, &alice).await.unwrap().is_empty());
    assert_eq!(list_records(10, &db_path, &bob).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn clear_requires_confirmation() {
    let tmp = tempfile::tempdir().unwrap();
    let error = run_clear(false, &tmp.path().join("breedlog.db"), Some("unused"))
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::ConfirmationRequired));
}

#[tokio::test(flavor = "current_thread")]
async fn record_rendering_includes_breed_and_status() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("breedlog.db");
    let image = write_image(tmp.path(), "cow.jpg", "Red Sindhi", 0.875);
    let record = add_prediction(&image, None, &db_path, &user("alice"))
        .await
        .unwrap();

    let lines = format_record_lines(std::slice::from_ref(&record));
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Red Sindhi"));
    assert!(lines[0].contains("87.5%"));
    assert!(lines[0].contains("pending_sync"));

    let item = record_to_list_item(&record);
    assert_eq!(item.id, record.id.to_string());
    assert_eq!(item.status, "pending_sync");
    assert_eq!(item.relative_time, "just now");
}

fn session(id: &str) -> AuthSession {
    AuthSession {
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
        expires_at: 4_102_444_800,
        user: AuthUser {
            id: user(id),
            email: None,
        },
    }
}

fn transport_error() -> AuthError {
    AuthError::Http(
        reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err(),
    )
}

#[test]
fn signed_in_user_reads_profile_session() {
    let session = session("farmer-7");
    store_session_for_tests("tests-signed-in", &session).unwrap();

    assert_eq!(signed_in_user("tests-signed-in").unwrap(), user("farmer-7"));
    assert!(matches!(
        signed_in_user("tests-signed-out"),
        Err(CliError::NotSignedIn(name)) if name == "tests-signed-out"
    ));

    clear_stored_session("tests-signed-in").unwrap();
}

#[test]
fn report_outcome_maps_failure_to_error() {
    assert!(report_outcome(&SyncOutcome::completed(2, 1), false).is_ok());

    let error = report_outcome(&SyncOutcome::failed(SyncFailure::NoConnection), true).unwrap_err();
    assert_eq!(error.to_string(), "No internet connection.");
}

#[test]
fn init_profile_merges_explicit_values_and_activates() {
    let mut config = CliProfilesConfig {
        active_profile: Some("default".to_string()),
        ..CliProfilesConfig::default()
    };

    let name = init_profile(
        &mut config,
        Some("farm"),
        ProfileValues {
            supabase_url: Some("https://farm.supabase.co/".to_string()),
            supabase_anon_key: Some("anon-key-123".to_string()),
            storage_bucket: Some("herd-photos".to_string()),
        },
        false,
    )
    .unwrap();

    assert_eq!(name, "farm");
    assert_eq!(config.active_profile.as_deref(), Some("farm"));
    let profile = config.profile("farm").unwrap();
    assert_eq!(
        profile.supabase_url.as_deref(),
        Some("https://farm.supabase.co")
    );
    assert_eq!(profile.storage_bucket.as_deref(), Some("herd-photos"));
}

#[test]
fn init_profile_no_activate_keeps_active_profile() {
    let mut config = CliProfilesConfig {
        active_profile: Some("default".to_string()),
        ..CliProfilesConfig::default()
    };

    init_profile(
        &mut config,
        Some("staging"),
        ProfileValues {
            supabase_url: Some("https://staging.supabase.co".to_string()),
            supabase_anon_key: Some("anon".to_string()),
            storage_bucket: None,
        },
        true,
    )
    .unwrap();

    assert_eq!(config.active_profile.as_deref(), Some("default"));
    assert!(config.profile("staging").is_some());
}

#[test]
fn init_profile_rejects_non_http_url() {
    let mut config = CliProfilesConfig::default();
    let error = init_profile(
        &mut config,
        Some("broken"),
        ProfileValues {
            supabase_url: Some("farm.supabase.co".to_string()),
            supabase_anon_key: Some("anon".to_string()),
            storage_bucket: None,
        },
        false,
    )
    .unwrap_err();
    assert!(matches!(error, CliError::Config(_)));
    assert!(config.profile("broken").is_none());
}

#[test]
fn describe_profile_masks_anon_key() {
    let profile = CliProfile {
        supabase_url: Some("https://farm.supabase.co".to_string()),
        supabase_anon_key: Some("eyJhbGciOiJIUzI1NiJ9.secret".to_string()),
        storage_bucket: None,
    };
    let rendered = describe_profile("farm", &profile).join("\n");
    assert!(rendered.contains("https://farm.supabase.co"));
    assert!(rendered.contains("eyJhbG..."));
    assert!(!rendered.contains("secret"));
    assert!(rendered.contains("prediction-images (default)"));
}

#[test]
fn completions_are_generated_for_each_shell() {
    for shell in [
        CompletionShell::Bash,
        CompletionShell::Zsh,
        CompletionShell::Fish,
    ] {
        let rendered = String::from_utf8(render_completions(shell)).unwrap();
        assert!(rendered.contains("breedlog"));
    }
}

#[test]
fn completions_can_be_written_to_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("breedlog.bash");
    run_completions(CompletionShell::Bash, Some(&path)).unwrap();
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("sync"));
}

#[test]
fn sync_falls_back_to_stored_session_when_restore_cannot_reach_server() {
    let stored = session("farmer-7");
    let chosen = session_after_restore(Err(transport_error()), || Ok(Some(stored.clone()))).unwrap();
    assert_eq!(chosen, Some(stored));

    let chosen = session_after_restore(Err(transport_error()), || Ok(None)).unwrap();
    assert_eq!(chosen, None);
}

#[test]
fn sync_treats_rejected_session_as_signed_out() {
    let rejected = AuthError::Rejected {
        status: reqwest::StatusCode::BAD_REQUEST,
        message: "Invalid Refresh Token (invalid_grant)".to_string(),
    };
    let chosen = session_after_restore(Err(rejected), || Ok(Some(session("farmer-7")))).unwrap();
    assert_eq!(chosen, None);
}

#[test]
fn sync_aborts_on_keychain_failure() {
    let error = session_after_restore(
        Err(AuthError::SecureStorage("locked".to_string())),
        || Ok(Some(session("farmer-7"))),
    )
    .unwrap_err();
    assert!(matches!(error, CliError::Auth(message) if message.contains("locked")));
}

#[test]
fn auth_signup_parses_credentials() {
    let cli = Cli::try_parse_from([
        "breedlog",
        "auth",
        "signup",
        "--email",
        "farmer@example.com",
        "--password",
        "hunter2",
    ])
    .unwrap();
    match cli.command {
        Some(Commands::Auth {
            command:
                AuthCommands::Signup {
                    profile,
                    email,
                    password,
                },
        }) => {
            assert_eq!(profile, None);
            assert_eq!(email, "farmer@example.com");
            assert_eq!(password, "hunter2");
        }
        _ => panic!("expected auth signup"),
    }
}

#[test]
fn sign_up_messages_cover_both_outcomes() {
    let mut signed_in = session("farmer-7");
    signed_in.user.email = Some("farmer@example.com".to_string());
    assert_eq!(
        describe_sign_up("farm", &SignUpOutcome::SignedIn(signed_in)),
        "Signed up and signed in profile 'farm' as farmer@example.com"
    );
    assert!(describe_sign_up("farm", &SignUpOutcome::ConfirmationRequired)
        .contains("breedlog auth login --profile farm"));
}
