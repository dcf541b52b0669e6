mod common;

use common::{FakeDriver, call, no_delays};
use moneytalks_advisor::eyes;
use moneytalks_advisor::hands::{ExecutorTimings, execute, execute_batch};
use moneytalks_advisor::types::{ActionResult, Viewport};
use serde_json::{Value, json};
use std::time::Duration;

#[tokio::test]
async fn failing_action_does_not_abort_the_batch() {
    let (driver, log) = FakeDriver::new();
    let mut driver = driver.failing("click");
    let calls = vec![
        call("navigate", json!({"url": "https://example.com/a"})),
        call("click_at", json!({"x": 500, "y": 500})),
        call("navigate", json!({"url": "https://example.com/b"})),
        call("go_back", Value::Null),
    ];

    let results = execute_batch(&mut driver, Viewport::default(), &calls, &no_delays()).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0], ActionResult::Ok);
    assert!(results[1].error_message().unwrap().contains("click exploded"));
    assert_eq!(results[2], ActionResult::Ok);
    assert_eq!(results[3], ActionResult::Ok);
    assert_eq!(
        FakeDriver::ops(&log),
        [
            "navigate https://example.com/a",
            "click 720 450",
            "navigate https://example.com/b",
            "back",
        ]
    );
}

#[tokio::test]
async fn unknown_action_is_a_successful_no_op() {
    let (mut driver, log) = FakeDriver::new();
    let calls = vec![
        call("hover_at", json!({"x": 1, "y": 2})),
        call("open_web_browser", Value::Null),
        call("go_back", Value::Null),
    ];

    let results = execute_batch(&mut driver, Viewport::default(), &calls, &no_delays()).await;

    assert!(results.iter().all(ActionResult::is_ok));
    assert_eq!(FakeDriver::ops(&log), ["back"]);
}

#[tokio::test]
async fn malformed_arguments_become_an_error_result() {
    let (mut driver, log) = FakeDriver::new();
    let result = execute(
        &mut driver,
        Viewport::default(),
        &call("click_at", json!({"x": "left"})),
        &no_delays(),
    )
    .await;

    assert!(result.error_message().unwrap().contains("click_at"));
    assert!(FakeDriver::ops(&log).is_empty());
}

#[tokio::test]
async fn type_text_clicks_clears_types_and_submits() {
    let (mut driver, log) = FakeDriver::new();
    let vp = Viewport {
        width: 1000,
        height: 800,
    };
    let calls = vec![
        call("type_text_at", json!({"x": 250, "y": 500, "text": "toyota", "press_enter": true})),
        call("type_text_at", json!({"x": 1000, "y": 0, "text": "corolla", "press_enter": false})),
    ];

    let results = execute_batch(&mut driver, vp, &calls, &no_delays()).await;

    assert!(results.iter().all(ActionResult::is_ok));
    assert_eq!(
        FakeDriver::ops(&log),
        [
            "click 250 400",
            "clear",
            "type toyota",
            "press Enter",
            "click 1000 0",
            "clear",
            "type corolla",
        ]
    );
}

#[tokio::test]
async fn out_of_grid_coordinates_stay_inside_the_viewport() {
    let (mut driver, log) = FakeDriver::new();
    let result = execute(
        &mut driver,
        Viewport::default(),
        &call("click_at", json!({"x": 1500, "y": -40})),
        &no_delays(),
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(FakeDriver::ops(&log), ["click 1439 0"]);
}

#[tokio::test]
async fn float_coordinates_reach_the_driver() {
    let (mut driver, log) = FakeDriver::new();
    let result = execute(
        &mut driver,
        Viewport::default(),
        &call("click_at", json!({"x": 500.5, "y": 250.0})),
        &no_delays(),
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(FakeDriver::ops(&log), ["click 720 225"]);
}

#[tokio::test]
async fn scroll_only_moves_vertically() {
    let (mut driver, log) = FakeDriver::new();
    let calls = vec![
        call("scroll_document", json!({"direction": "down"})),
        call("scroll_document", json!({"direction": "up"})),
        call("scroll_document", json!({"direction": "left"})),
        call("scroll_document", json!({"direction": "diagonal"})),
    ];

    let results = execute_batch(&mut driver, Viewport::default(), &calls, &no_delays()).await;

    assert!(results.iter().all(ActionResult::is_ok));
    assert_eq!(FakeDriver::ops(&log), ["scroll 500", "scroll -500"]);
}

#[tokio::test(start_paused = true)]
async fn wait_action_sleeps_for_five_seconds() {
    let (mut driver, _log) = FakeDriver::new();
    let timings = ExecutorTimings {
        settle: Duration::ZERO,
        ..ExecutorTimings::default()
    };

    let start = tokio::time::Instant::now();
    let result = execute(
        &mut driver,
        Viewport::default(),
        &call("wait_5_seconds", Value::Null),
        &timings,
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn every_action_settles_afterwards() {
    let (mut driver, _log) = FakeDriver::new();
    let calls = vec![call("go_back", Value::Null), call("go_back", Value::Null)];

    let start = tokio::time::Instant::now();
    execute_batch(&mut driver, Viewport::default(), &calls, &ExecutorTimings::default()).await;

    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test]
async fn one_capture_is_shared_by_the_whole_batch() {
    let (mut driver, log) = FakeDriver::new();
    let calls = vec![
        call("navigate", json!({"url": "https://example.com/search?q=toyota"})),
        call("go_back", Value::Null),
        call("open_web_browser", Value::Null),
    ];
    let results = execute_batch(&mut driver, Viewport::default(), &calls, &no_delays()).await;

    let observations = eyes::observe(&mut driver, &calls, results).await;

    assert_eq!(log.lock().unwrap().screenshots, 1);
    assert_eq!(observations.len(), 3);
    assert_eq!(observations[0].action, "navigate");
    assert_eq!(observations[2].action, "open_web_browser");
    assert!(
        observations
            .iter()
            .all(|o| o.url == "https://example.com/search?q=toyota")
    );
    assert!(std::sync::Arc::ptr_eq(
        &observations[0].screenshot,
        &observations[2].screenshot
    ));
}

#[tokio::test]
async fn failed_capture_still_reports_results() {
    let (driver, _log) = FakeDriver::new();
    let mut driver = driver.failing("screenshot");
    let calls = vec![call("go_back", Value::Null)];

    let observations = eyes::observe(&mut driver, &calls, vec![ActionResult::Ok]).await;

    assert_eq!(observations.len(), 1);
    assert!(observations[0].screenshot.is_empty());
    assert_eq!(observations[0].result, ActionResult::Ok);
}
