//! Result records produced for every inferred frame

use serde::{Deserialize, Serialize};

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub name: String,
    pub probability: String,
    pub view: String,
    pub time: String,
}

/// One detected entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub name: String,
    pub probability: String,
    /// Normalized `[xmin, ymin]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_left: Option<[f64; 2]>,
    /// Normalized `[xmax, ymax]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_right: Option<[f64; 2]>,
    pub view: String,
    pub time: String,
}

/// Classes present in a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationRecord {
    pub classes_found: Vec<String>,
    pub view: String,
    pub time: String,
}

/// One result per detected or classified entity per frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultRecord {
    Segmentation(SegmentationRecord),
    Detection(DetectionRecord),
    Classification(ClassificationRecord),
}

impl ResultRecord {
    pub fn view(&self) -> &str {
        match self {
            ResultRecord::Classification(r) => &r.view,
            ResultRecord::Detection(r) => &r.view,
            ResultRecord::Segmentation(r) => &r.view,
        }
    }

    pub fn time(&self) -> &str {
        match self {
            ResultRecord::Classification(r) => &r.time,
            ResultRecord::Detection(r) => &r.time,
            ResultRecord::Segmentation(r) => &r.time,
        }
    }

    /// Labels this record contributes to a label check
    pub fn labels(&self) -> Vec<&str> {
        match self {
            ResultRecord::Classification(r) => vec![r.name.as_str()],
            ResultRecord::Detection(r) => vec![r.name.as_str()],
            ResultRecord::Segmentation(r) => r.classes_found.iter().map(String::as_str).collect(),
        }
    }

    /// CSV column names, matching the serialized field names. Fixed per
    /// task, so toggling bounding boxes never changes a file's columns.
    pub fn csv_header(&self) -> Vec<&'static str> {
        match self {
            ResultRecord::Classification(_) => vec!["name", "probability", "view", "time"],
            ResultRecord::Detection(_) => vec![
                "name",
                "probability",
                "top_left",
                "bottom_right",
                "view",
                "time",
            ],
            ResultRecord::Segmentation(_) => vec!["classes_found", "view", "time"],
        }
    }

    /// CSV cells; list fields are written as JSON arrays, missing boxes as
    /// empty cells
    pub fn csv_row(&self) -> Vec<String> {
        match self {
            ResultRecord::Classification(r) => vec![
                r.name.clone(),
                r.probability.clone(),
                r.view.clone(),
                r.time.clone(),
            ],
            ResultRecord::Detection(r) => {
                vec![
                    r.name.clone(),
                    r.probability.clone(),
                    r.top_left.as_ref().map(json_list).unwrap_or_default(),
                    r.bottom_right.as_ref().map(json_list).unwrap_or_default(),
                    r.view.clone(),
                    r.time.clone(),
                ]
            }
            ResultRecord::Segmentation(r) => vec![
                serde_json::to_string(&r.classes_found).unwrap_or_default(),
                r.view.clone(),
                r.time.clone(),
            ],
        }
    }
}

fn json_list(values: &[f64; 2]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

/// Format a `[0, 1]` probability as a percentage with one decimal
pub fn format_probability(probability: f32) -> String {
    format!("{:.1}%", probability * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_probability() {
        assert_eq!(format_probability(0.87), "87.0%");
        assert_eq!(format_probability(1.0), "100.0%");
        assert_eq!(format_probability(0.5), "50.0%");
    }

    #[test]
    fn test_detection_serialization_skips_missing_bbox() {
        let record = ResultRecord::Detection(DetectionRecord {
            name: "screw".to_string(),
            probability: "95.0%".to_string(),
            top_left: None,
            bottom_right: None,
            view: "top".to_string(),
            time: "2021-01-10T08:00:00".to_string(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "screw",
                "probability": "95.0%",
                "view": "top",
                "time": "2021-01-10T08:00:00"
            })
        );
        assert_eq!(record.csv_header().len(), record.csv_row().len());
        assert_eq!(record.csv_row()[2], "");
        assert_eq!(record.csv_row()[3], "");
    }

    #[test]
    fn test_segmentation_csv_row() {
        let record = ResultRecord::Segmentation(SegmentationRecord {
            classes_found: vec!["background".to_string(), "scratch".to_string()],
            view: "side".to_string(),
            time: "t".to_string(),
        });
        assert_eq!(record.csv_header(), vec!["classes_found", "view", "time"]);
        assert_eq!(
            record.csv_row(),
            vec!["[\"background\",\"scratch\"]", "side", "t"]
        );
        assert_eq!(record.labels(), vec!["background", "scratch"]);
    }
}
