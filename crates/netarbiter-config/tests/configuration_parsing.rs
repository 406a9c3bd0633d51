//! Command-line parsing behaviour for the arbiter configuration.

use clap::error::ErrorKind;
use netarbiter_config::{Config, DEFAULT_BIND_HOST, DEFAULT_LOG_FILTER, LogFormat};
use rstest::rstest;

#[test]
fn endpoint_port_alone_selects_outbound_only_mode() {
    let config =
        Config::load_from(["netarbiter", "--endpointPort=4000"]).expect("config should parse");
    assert_eq!(config.endpoint_port(), 4000);
    assert_eq!(config.listen_port(), None);
    assert!(!config.accepts_peers());
    assert_eq!(config.bind_host(), DEFAULT_BIND_HOST);
    assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[test]
fn listen_port_enables_peer_listener() {
    let config = Config::load_from(["netarbiter", "--endpointPort=4000", "--listenPort=4001"])
        .expect("config should parse");
    assert_eq!(config.listen_port(), Some(4001));
    assert!(config.accepts_peers());
}

#[test]
fn separate_value_form_is_accepted() {
    let config = Config::load_from(["netarbiter", "--endpointPort", "4000", "--listenPort", "9"])
        .expect("config should parse");
    assert_eq!(config.endpoint_port(), 4000);
    assert_eq!(config.listen_port(), Some(9));
}

#[test]
fn missing_endpoint_port_is_a_usage_error() {
    let error = Config::load_from(["netarbiter", "--listenPort=4001"])
        .expect_err("endpoint port is required");
    assert_eq!(error.kind(), ErrorKind::MissingRequiredArgument);
}

#[rstest]
#[case("--endpointPort=70000")]
#[case("--endpointPort=-1")]
#[case("--endpointPort=port")]
fn out_of_range_ports_are_rejected(#[case] argument: &str) {
    let error = Config::load_from(["netarbiter", argument]).expect_err("port should be rejected");
    assert_eq!(error.kind(), ErrorKind::ValueValidation);
}

#[test]
fn unknown_arguments_are_rejected() {
    let error = Config::load_from(["netarbiter", "--endpointPort=1", "--serverPort=2"])
        .expect_err("unknown flag should be rejected");
    assert_eq!(error.kind(), ErrorKind::UnknownArgument);
}

#[rstest]
#[case("json", LogFormat::Json)]
#[case("compact", LogFormat::Compact)]
fn log_format_is_selectable(#[case] value: &str, #[case] expected: LogFormat) {
    let flag = format!("--log-format={value}");
    let config = Config::load_from(["netarbiter", "--endpointPort=1", flag.as_str()])
        .expect("config should parse");
    assert_eq!(config.log_format(), expected);
}

#[test]
fn timing_flags_feed_validated_timing() {
    let config = Config::load_from([
        "netarbiter",
        "--endpointPort=1",
        "--heartbeat-interval-ms=50",
        "--liveness-timeout-ms=400",
    ])
    .expect("config should parse");
    let timing = config.timing().expect("timing should validate");
    assert_eq!(timing.heartbeat_interval().as_millis(), 50);
    assert_eq!(timing.liveness_timeout().as_millis(), 400);
}

#[test]
fn inconsistent_timing_is_reported() {
    let config = Config::load_from([
        "netarbiter",
        "--endpointPort=1",
        "--heartbeat-interval-ms=500",
        "--liveness-timeout-ms=100",
    ])
    .expect("flags themselves are well formed");
    assert!(config.timing().is_err());
}

#[test]
fn log_format_parses_case_insensitively() {
    let format: LogFormat = "JSON".parse().expect("strum parse");
    assert_eq!(format, LogFormat::Json);
    assert_eq!(LogFormat::Compact.to_string(), "compact");
}
