//! Result formatting tests

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::array;
use serde_json::json;

use visagent::deploy::formatter::ResultFormatter;
use visagent::inference::model::BoundingBox;
use visagent::inference::pipeline::{Detection, Prediction};
use visagent::models::result::ResultRecord;

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 1, 10)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap()
}

fn detection(name: &str, score: f32) -> Detection {
    Detection {
        bbox: BoundingBox::new(0.1, 0.2, 0.3, 0.4),
        class_id: 1,
        class_name: name.to_string(),
        score,
    }
}

#[test]
fn test_classification_record() {
    let formatter = ResultFormatter::new(vec!["cat".to_string(), "dog".to_string()], false);
    let prediction = Prediction::Classification {
        class_name: "cat".to_string(),
        probability: 0.87,
    };

    let records = formatter.format(&prediction, &now(), "top", None);
    assert_eq!(records.len(), 1);
    assert_eq!(
        serde_json::to_value(&records).unwrap(),
        json!([{
            "name": "cat",
            "probability": "87.0%",
            "view": "top",
            "time": "2021-01-10T08:30:00"
        }])
    );
}

#[test]
fn test_detection_threshold_keeps_equal_scores() {
    let formatter = ResultFormatter::new(vec![], false);
    let prediction = Prediction::Detection(vec![
        detection("screw", 0.95),
        detection("screw", 0.7),
        detection("nut", 0.69),
    ]);

    let records = formatter.format(&prediction, &now(), "side", Some(0.7));
    let names: Vec<Vec<&str>> = records.iter().map(|r| r.labels()).collect();
    assert_eq!(names, vec![vec!["screw"], vec!["screw"]]);
    match &records[1] {
        ResultRecord::Detection(r) => {
            assert_eq!(r.probability, "70.0%");
            assert_eq!(r.view, "side");
            assert!(r.top_left.is_none());
        }
        other => panic!("unexpected record {:?}", other),
    }
}

#[test]
fn test_detection_with_bbox_serializes_corners() {
    let formatter = ResultFormatter::new(vec![], false).with_bbox(true);
    let prediction = Prediction::Detection(vec![detection("screw", 0.9)]);

    let records = formatter.format(&prediction, &now(), "top", Some(0.5));
    let value = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(value["top_left"], json!([0.1, 0.2]));
    assert_eq!(value["bottom_right"], json!([0.3, 0.4]));
    assert_eq!(
        records[0].csv_header(),
        vec!["name", "probability", "top_left", "bottom_right", "view", "time"]
    );
}

#[test]
fn test_empty_detections_produce_no_records() {
    let formatter = ResultFormatter::default();
    let prediction = Prediction::Detection(vec![detection("screw", 0.2)]);
    assert!(formatter.format(&prediction, &now(), "top", Some(0.5)).is_empty());
}

#[test]
fn test_segmentation_lists_present_classes() {
    let names = vec![
        "background".to_string(),
        "scratch".to_string(),
        "dent".to_string(),
    ];
    let formatter = ResultFormatter::new(names, false);
    let prediction = Prediction::Segmentation(array![[0, 0, 2], [2, 0, 0]]);

    let records = formatter.format(&prediction, &now(), "top", None);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].labels(), vec!["background", "dent"]);
}

#[test]
fn test_low_scoring_duplicate_is_dropped() {
    let formatter = ResultFormatter::default();
    let prediction = Prediction::Detection(vec![detection("screw", 0.95), detection("screw", 0.40)]);

    let records = formatter.format(&prediction, &now(), "top", Some(0.5));
    assert_eq!(records.len(), 1);
    match &records[0] {
        ResultRecord::Detection(r) => assert_eq!(r.probability, "95.0%"),
        other => panic!("unexpected record {:?}", other),
    }
}
