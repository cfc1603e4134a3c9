use super::error::RouteError;
use super::logging;

#[test]
fn test_level_filter_parses_configured_levels() {
    use tracing_subscriber::filter::LevelFilter;

    assert_eq!(logging::level_filter("debug"), LevelFilter::DEBUG);
    assert_eq!(logging::level_filter(" WARNING "), LevelFilter::WARN);
    assert_eq!(logging::level_filter("off"), LevelFilter::OFF);
    assert_eq!(logging::level_filter("loud"), LevelFilter::INFO);
}

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn test_error_display_carries_stable_identifier() {
    let err = RouteError::null_provider("no capability for 'view'");
    assert_eq!(err.to_string(), "[NullProviderError] no capability for 'view'");
    assert_eq!(err.kind(), "NullProviderError");

    let err = RouteError::request_reply("no replier");
    assert!(err.to_string().contains("RequestReplyError"));
}

#[test]
fn test_intercepted_error_is_not_wrapped() {
    let err = RouteError::intercepted("body must not be empty");
    assert_eq!(err.to_string(), "body must not be empty");
}

#[test]
fn test_error_survives_wire_encoding() {
    let err = RouteError::not_qualified("app 'b' has no intention");
    let json = serde_json::to_string(&err).unwrap();
    let decoded: RouteError = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, err);
}
