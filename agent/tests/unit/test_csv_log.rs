//! CSV result log rotation and retention tests

use std::fs;

use chrono::{NaiveDate, NaiveDateTime};

use visagent::deploy::csv_log::{prune_old_dirs, CsvResultLog};
use visagent::models::result::{ClassificationRecord, DetectionRecord, ResultRecord};

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn record(name: &str) -> ResultRecord {
    ResultRecord::Detection(DetectionRecord {
        name: name.to_string(),
        probability: "87.0%".to_string(),
        top_left: None,
        bottom_right: None,
        view: "top".to_string(),
        time: "2021-01-09T23:00:00".to_string(),
    })
}

fn boxed(name: &str) -> ResultRecord {
    ResultRecord::Detection(DetectionRecord {
        top_left: Some([0.1, 0.1]),
        bottom_right: Some([0.2, 0.2]),
        ..match record(name) {
            ResultRecord::Detection(r) => r,
            _ => unreachable!(),
        }
    })
}

const DETECTION_HEADER: &str = "name,probability,top_left,bottom_right,view,time";

fn dir_names(path: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_header_written_once_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = CsvResultLog::new(dir.path(), 7);

    log.append(&[record("screw")], at(9, 10)).unwrap();
    log.append(&[record("nut"), record("screw")], at(9, 11)).unwrap();
    log.close().unwrap();

    // Reopening the same day appends without a second header
    log.append(&[record("washer")], at(9, 12)).unwrap();
    log.close().unwrap();

    let contents = fs::read_to_string(log.csv_path(at(9, 0).date())).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], DETECTION_HEADER);
    assert_eq!(lines[1], "screw,87.0%,,,top,2021-01-09T23:00:00");
    assert_eq!(lines[4], "washer,87.0%,,,top,2021-01-09T23:00:00");
}

#[test]
fn test_rotation_at_date_change() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = CsvResultLog::new(dir.path(), 7);

    log.append(&[record("screw")], at(9, 23)).unwrap();
    assert_eq!(log.current_date(), Some(at(9, 0).date()));

    log.append(&[record("screw")], at(10, 0)).unwrap();
    assert_eq!(log.current_date(), Some(at(10, 0).date()));

    assert_eq!(dir_names(dir.path()), vec!["09-Jan-2021", "10-Jan-2021"]);
    let new_file = fs::read_to_string(log.csv_path(at(10, 0).date())).unwrap();
    assert!(new_file.starts_with(&format!("{}\n", DETECTION_HEADER)));
}

#[test]
fn test_rotation_prunes_directories_outside_retention() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["05-Jan-2021", "06-Jan-2021", "07-Jan-2021", "08-Jan-2021", "notes"] {
        fs::create_dir(dir.path().join(name)).unwrap();
    }

    let mut log = CsvResultLog::new(dir.path(), 3);

    // First open of the day never prunes
    log.append(&[record("screw")], at(9, 12)).unwrap();
    assert_eq!(dir_names(dir.path()).len(), 6);

    log.append(&[record("screw")], at(10, 0)).unwrap();
    assert_eq!(
        dir_names(dir.path()),
        vec!["07-Jan-2021", "08-Jan-2021", "09-Jan-2021", "10-Jan-2021", "notes"]
    );
}

#[test]
fn test_prune_stops_at_first_directory_inside_window() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["01-Jan-2021", "08-Jan-2021", "09-Jan-2021"] {
        fs::create_dir(dir.path().join(name)).unwrap();
    }

    let removed = prune_old_dirs(dir.path(), 3, at(10, 0).date()).unwrap();
    assert_eq!(removed, vec![dir.path().join("01-Jan-2021")]);
    assert_eq!(dir_names(dir.path()), vec!["08-Jan-2021", "09-Jan-2021"]);
}

#[test]
fn test_close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = CsvResultLog::new(dir.path(), 7);
    log.append(&[record("screw")], at(9, 10)).unwrap();
    assert!(log.is_open());

    log.close().unwrap();
    log.close().unwrap();
    assert!(!log.is_open());
    assert_eq!(log.current_date(), None);
}

#[test]
fn test_retention_keeps_last_three_days() {
    let dir = tempfile::tempdir().unwrap();
    for day in 1..=10 {
        let date = NaiveDate::from_ymd_opt(2021, 1, day).unwrap();
        fs::create_dir(dir.path().join(date.format("%d-%b-%Y").to_string())).unwrap();
    }

    let removed = prune_old_dirs(dir.path(), 3, at(10, 0).date()).unwrap();
    assert_eq!(removed.len(), 6);
    assert_eq!(
        dir_names(dir.path()),
        vec!["07-Jan-2021", "08-Jan-2021", "09-Jan-2021", "10-Jan-2021"]
    );
}

#[test]
fn test_bbox_toggle_keeps_columns_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = CsvResultLog::new(dir.path(), 7);

    log.append(&[record("screw")], at(9, 10)).unwrap();
    log.append(&[boxed("screw"), boxed("nut")], at(9, 11)).unwrap();
    log.close().unwrap();

    // Reopening the same day with boxes turned off again
    log.append(&[record("washer")], at(9, 12)).unwrap();
    log.close().unwrap();

    let mut reader = csv::Reader::from_path(log.csv_path(at(9, 0).date())).unwrap();
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        DETECTION_HEADER.split(',').collect::<Vec<_>>()
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.len() == 6));
    assert_eq!(&rows[1][2], "[0.1,0.1]");
    assert_eq!(&rows[2][0], "nut");
    assert_eq!(&rows[3][2], "");
}

#[test]
fn test_mismatched_columns_are_rejected_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = CsvResultLog::new(dir.path(), 7);
    log.append(&[record("screw")], at(9, 10)).unwrap();

    let classified = ResultRecord::Classification(ClassificationRecord {
        name: "cat".to_string(),
        probability: "87.0%".to_string(),
        view: "top".to_string(),
        time: "t".to_string(),
    });
    assert!(log.append(&[classified.clone()], at(9, 11)).is_err());
    log.close().unwrap();

    // An existing file with other columns is left untouched
    assert!(log.append(&[classified], at(9, 12)).is_err());
    assert!(!log.is_open());

    let contents = fs::read_to_string(log.csv_path(at(9, 0).date())).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.ends_with('\n'));
}
