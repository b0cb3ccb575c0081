use deputy::config::secrets::ExposeSecret;
use deputy::config::{Config, Settings};
use std::path::PathBuf;

// Env vars are process-global, so every env scenario lives in one test.
#[test]
fn config_from_env_requires_vault_path_and_applies_defaults() {
    unsafe {
        std::env::remove_var("VAULT_PATH");
        std::env::remove_var("DROP_FOLDER_PATH");
        std::env::remove_var("DEPUTY_HOOKS_DIR");
        std::env::remove_var("DEPUTY_SETTINGS");
        std::env::remove_var("DEPUTY_HOOK_TOKEN");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("VAULT_PATH", "/tmp/vault");
        std::env::set_var("DEPUTY_HOOK_TOKEN", "");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.vault_path, PathBuf::from("/tmp/vault"));
    assert_eq!(config.drop_folder, PathBuf::from("/tmp/vault/Drop_Folder"));
    assert_eq!(config.hooks_dir, PathBuf::from("hooks"));
    assert!(config.hook_token.is_none());
    assert!(!config.log_level.is_empty());
    assert_eq!(
        config.load_settings().unwrap().schedule.dispatch_secs,
        Settings::default().schedule.dispatch_secs
    );

    unsafe {
        std::env::set_var("DROP_FOLDER_PATH", "/srv/drop");
        std::env::set_var("DEPUTY_HOOK_TOKEN", "tok-123");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.drop_folder, PathBuf::from("/srv/drop"));
    assert_eq!(
        config.hook_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("tok-123".to_string())
    );
    // The token must not leak through Debug.
    assert!(!format!("{config:?}").contains("tok-123"));

    unsafe {
        std::env::remove_var("VAULT_PATH");
        std::env::remove_var("DROP_FOLDER_PATH");
        std::env::remove_var("DEPUTY_HOOK_TOKEN");
    }
}

#[test]
fn settings_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deputy.toml");
    std::fs::write(
        &path,
        r#"
[schedule]
dispatch_secs = 5

[retry]
max_retries = 5

[approval]
ttl_hours = 2

[[approval.rules]]
name = "big_payment"
item_types = ["ledger_action"]
condition = { kind = "amount_over", field = "amount", limit = 500.0 }
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.schedule.dispatch_secs, 5);
    assert_eq!(settings.schedule.retry_sweep_secs, 60);
    assert_eq!(settings.retry_policy().max_retries, 5);

    let gate = settings.approval_gate();
    assert_eq!(gate.ttl, chrono::Duration::hours(2));
    assert_eq!(gate.policy.rules.len(), 1);
    assert_eq!(gate.policy.rules[0].name, "big_payment");
}

#[test]
fn unknown_settings_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deputy.toml");
    std::fs::write(&path, "[schedule]\ndispach_secs = 5\n").unwrap();
    assert!(Settings::load(&path).is_err());
}
