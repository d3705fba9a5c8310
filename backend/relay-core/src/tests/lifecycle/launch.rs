use crate::lifecycle::{LaunchMode, worker_args};
use crate::tests::support::relay_settings;

#[test]
fn given_no_arguments_when_parsed_then_runs_as_controller_with_zero_retry() {
    // GIVEN
    let args = ["push-relay"];

    // WHEN
    let mode = LaunchMode::parse(args).expect("controller launch should parse");

    // THEN
    assert_eq!(mode, LaunchMode::Controller { retry: 0 });
}

#[test]
fn given_retry_token_when_parsed_as_controller_then_retry_is_seeded() {
    // GIVEN
    let args = ["push-relay", "$cout:3"];

    // WHEN
    let mode = LaunchMode::parse(args).expect("controller launch should parse");

    // THEN
    assert_eq!(mode.retry(), 3);
}

/// **VALUE**: Arguments built for a worker parse back into the same settings.
///
/// **BUG THIS CATCHES**: Drift between the spawn side and the parse side of
/// the launch contract, which would make every spawned worker exit at once.
#[test]
fn given_worker_args_when_parsed_then_yields_worker_with_settings_and_retry() {
    // GIVEN
    let settings = relay_settings();
    let mut args = vec!["push-relay".to_string()];
    args.extend(worker_args(&settings, 4).expect("settings should encode"));

    // WHEN
    let mode = LaunchMode::parse(&args).expect("worker launch should parse");

    // THEN
    assert_eq!(mode, LaunchMode::Worker { settings, retry: 4 });
}

#[test]
fn given_child_marker_without_token_when_parsed_then_fails() {
    // GIVEN
    let args = ["push-relay", "child"];

    // WHEN
    let result = LaunchMode::parse(args);

    // THEN
    assert!(result.is_err());
}

#[test]
fn given_child_marker_with_retry_in_token_slot_when_parsed_then_fails() {
    // GIVEN
    let args = ["push-relay", "child", "$cout:1"];

    // WHEN
    let result = LaunchMode::parse(args);

    // THEN
    assert!(result.is_err(), "The retry token is not a settings token");
}

#[test]
fn given_child_marker_with_garbage_token_when_parsed_then_fails() {
    // GIVEN
    let args = ["push-relay", "child", "not settings at all"];

    // WHEN
    let result = LaunchMode::parse(args);

    // THEN
    assert!(result.is_err());
}

#[test]
fn given_settings_when_worker_args_built_then_marker_token_and_counter_in_order() {
    // GIVEN
    let settings = relay_settings();

    // WHEN
    let args = worker_args(&settings, 7).expect("settings should encode");

    // THEN
    assert_eq!(args.len(), 3);
    assert_eq!(args[0], "child");
    assert_eq!(args[2], "$cout:7");
}
