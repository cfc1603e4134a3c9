use std::env;
use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::load_config;
use super::settings::Settings;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.logging.level, "info");
    assert_eq!(settings.broker.request_timeout_ms, 5000);
    assert_eq!(settings.broker.reply_topic_prefix, "_reply");
    assert_eq!(settings.broker.host_app_symbolic_name, "host");
    assert!(settings.applications.is_empty());
}

#[test]
#[serial]
fn test_load_config_without_sources_uses_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let cfg = temp_env::with_vars_unset(
        [
            "APPBUS__BROKER__REQUEST_TIMEOUT_MS",
            "APPBUS__LOGGING__LEVEL",
        ],
        load_config,
    );

    env::set_current_dir(orig).expect("restore cwd");
    assert_eq!(cfg.expect("load_config failed"), Settings::default());
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [logging]
        level = "debug"

        [broker]
        request_timeout_ms = 750

        [[applications]]
        symbolic_name = "contacts"
        scope_check_disabled = true

        [[applications.capabilities]]
        type = "view"
        qualifier = { entity = "contact", id = "*" }
        private = false

        [[applications]]
        symbolic_name = "crm"

        [[applications.intentions]]
        type = "view"
        qualifier = { entity = "contact", id = "*" }
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.broker.request_timeout_ms, 750);
    // untouched keys keep their defaults
    assert_eq!(cfg.broker.reply_topic_prefix, "_reply");

    assert_eq!(cfg.applications.len(), 2);
    let contacts = &cfg.applications[0];
    assert_eq!(contacts.symbolic_name, "contacts");
    assert!(contacts.scope_check_disabled);
    assert!(!contacts.intention_check_disabled);
    assert_eq!(contacts.capabilities.len(), 1);
    assert_eq!(contacts.capabilities[0].capability_type, "view");
    assert_eq!(contacts.capabilities[0].private, Some(false));
    let qualifier = contacts.capabilities[0]
        .qualifier
        .as_ref()
        .expect("qualifier");
    assert_eq!(qualifier.get("id"), Some("*"));

    assert_eq!(cfg.applications[1].intentions.len(), 1);
}

#[test]
#[serial]
fn test_environment_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let cfg = temp_env::with_vars(
        [
            ("APPBUS__BROKER__REQUEST_TIMEOUT_MS", Some("250")),
            ("APPBUS__BROKER__HOST_APP_SYMBOLIC_NAME", Some("workbench")),
        ],
        load_config,
    );

    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.broker.request_timeout_ms, 250);
    assert_eq!(cfg.broker.host_app_symbolic_name, "workbench");
    assert_eq!(cfg.logging.level, "info");
}
