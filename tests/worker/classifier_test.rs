//! Classification tests for capture-worker lines.

use serde_json::json;
use visitor_flow::worker::{classify, ClassifiedEvent, StatusKind, StatusUpdate, SupervisorEvent};

#[test]
fn frame_line_yields_frame_payload() {
    assert_eq!(
        classify(r#"{"type":"frame","data":"X"}"#),
        Some(ClassifiedEvent::Frame(json!("X")))
    );
}

#[test]
fn other_structured_line_yields_data_update() {
    assert_eq!(
        classify(r#"{"type":"other"}"#),
        Some(ClassifiedEvent::StatusUpdate(StatusUpdate::Data {
            data: json!({"type": "other"})
        }))
    );
}

#[test]
fn free_text_yields_info_update() {
    assert_eq!(
        classify("not json"),
        Some(ClassifiedEvent::StatusUpdate(StatusUpdate::info("not json")))
    );
}

#[test]
fn empty_and_blank_lines_are_suppressed() {
    assert_eq!(classify(""), None);
    assert_eq!(classify("   \t\r"), None);
}

#[test]
fn malformed_json_falls_back_to_text() {
    let event = classify(r#"{"type":"frame","data":"#).expect("line is not empty");
    assert_eq!(
        event,
        ClassifiedEvent::StatusUpdate(StatusUpdate::info(r#"{"type":"frame","data":"#))
    );
}

#[test]
fn classified_lines_route_to_channels() {
    let frame: SupervisorEvent = classify(r#"{"type":"frame","data":"X"}"#)
        .expect("frame")
        .into();
    assert_eq!(frame, SupervisorEvent::StreamData(json!("X")));

    let text: SupervisorEvent = classify("Opening stream").expect("text").into();
    assert_eq!(
        text.status().map(StatusUpdate::kind),
        Some(StatusKind::Info)
    );
}
