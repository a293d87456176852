//! View label check tests

use visagent::deploy::label_check::{
    evaluate, CheckOutcome, LabelCheck, LabelCheckRequest, LabelCheckState,
};
use visagent::models::result::{ClassificationRecord, DetectionRecord, ResultRecord};

fn detection(name: &str) -> ResultRecord {
    ResultRecord::Detection(DetectionRecord {
        name: name.to_string(),
        probability: "91.0%".to_string(),
        top_left: None,
        bottom_right: None,
        view: "top".to_string(),
        time: "2021-01-10T08:00:00".to_string(),
    })
}

fn request(view: &str, labels: &[&str]) -> LabelCheckRequest {
    LabelCheckRequest {
        view: view.to_string(),
        required_labels: labels.iter().map(|l| l.to_string()).collect(),
    }
}

#[test]
fn test_duplicate_required_labels_need_duplicate_detections() {
    let check = request("top", &["A", "A"]);

    assert_eq!(
        evaluate(&check, &[detection("A")]),
        CheckOutcome::Fail {
            missing: vec!["A".to_string()]
        }
    );
    assert_eq!(
        evaluate(&check, &[detection("A"), detection("B"), detection("A")]),
        CheckOutcome::Pass
    );
}

#[test]
fn test_extra_detections_do_not_fail_the_check() {
    let check = request("side", &["screw"]);
    let records = vec![detection("nut"), detection("screw"), detection("washer")];
    assert_eq!(evaluate(&check, &records), CheckOutcome::Pass);
}

#[test]
fn test_no_records_fails_with_every_label_missing() {
    let check = request("top", &["screw", "nut"]);
    assert_eq!(
        evaluate(&check, &[]),
        CheckOutcome::Fail {
            missing: vec!["screw".to_string(), "nut".to_string()]
        }
    );
}

#[test]
fn test_classification_name_counts_as_a_label() {
    let record = ResultRecord::Classification(ClassificationRecord {
        name: "good".to_string(),
        probability: "99.0%".to_string(),
        view: "top".to_string(),
        time: "t".to_string(),
    });
    assert_eq!(evaluate(&request("top", &["good"]), &[record]), CheckOutcome::Pass);
}

#[test]
fn test_message_sets_pending_check() {
    let check = LabelCheck::new();
    check.on_message(br#"{"view": "top", "labels": ["screw", "nut"]}"#);
    assert_eq!(
        check.state(),
        LabelCheckState::PendingCheck(request("top", &["screw", "nut"]))
    );
}

#[test]
fn test_latest_check_replaces_pending_one() {
    let check = LabelCheck::new();
    check.on_message(br#"{"view": "top", "labels": ["screw"]}"#);
    check.on_message(br#"{"view": "side", "labels": ["nut"]}"#);

    assert_eq!(check.take_pending(), Some(request("side", &["nut"])));
    assert_eq!(check.take_pending(), None);
    assert_eq!(check.state(), LabelCheckState::Idle);
}

#[test]
fn test_end_message_cancels_pending_check() {
    let check = LabelCheck::new();
    check.on_message(br#"{"view": "top", "labels": ["screw"]}"#);
    check.on_message(br#"{"view": "end"}"#);
    assert_eq!(check.state(), LabelCheckState::Idle);

    // End while idle is accepted and changes nothing
    check.on_message(br#"{"view": "end"}"#);
    assert_eq!(check.state(), LabelCheckState::Idle);
}

#[test]
fn test_invalid_message_resets_to_idle() {
    let check = LabelCheck::new();
    check.on_message(br#"{"view": "top", "labels": ["screw"]}"#);
    check.on_message(br#"{"view": "top", "labels": []}"#);
    assert_eq!(check.state(), LabelCheckState::Idle);

    check.on_message(b"\xff\xfe not json");
    assert_eq!(check.state(), LabelCheckState::Idle);
}
