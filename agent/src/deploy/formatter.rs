//! Converts predictions into result records

use std::collections::BTreeSet;

use chrono::NaiveDateTime;

use crate::inference::pipeline::Prediction;
use crate::models::result::{
    format_probability, ClassificationRecord, DetectionRecord, ResultRecord, SegmentationRecord,
};
use crate::utils::record_time_string;

/// Formats predictions for one deployment
#[derive(Debug, Clone, Default)]
pub struct ResultFormatter {
    /// Names indexed by segmentation class index
    class_names: Vec<String>,

    /// Attach normalized box corners to detection records
    include_bbox: bool,
}

impl ResultFormatter {
    pub fn new(class_names: Vec<String>, include_bbox: bool) -> Self {
        Self {
            class_names,
            include_bbox,
        }
    }

    pub fn with_bbox(mut self, include_bbox: bool) -> Self {
        self.include_bbox = include_bbox;
        self
    }

    /// Build the records for one frame.
    ///
    /// Detections scoring below `threshold` are dropped; a score equal to the
    /// threshold is kept.
    pub fn format(
        &self,
        prediction: &Prediction,
        now: &NaiveDateTime,
        view: &str,
        threshold: Option<f32>,
    ) -> Vec<ResultRecord> {
        let time = record_time_string(now);

        match prediction {
            Prediction::Classification {
                class_name,
                probability,
            } => vec![ResultRecord::Classification(ClassificationRecord {
                name: class_name.clone(),
                probability: format_probability(*probability),
                view: view.to_string(),
                time,
            })],

            Prediction::Detection(detections) => detections
                .iter()
                .filter(|d| threshold.map_or(true, |t| d.score >= t))
                .map(|d| {
                    let (top_left, bottom_right) = if self.include_bbox {
                        (
                            Some([round4(d.bbox.xmin), round4(d.bbox.ymin)]),
                            Some([round4(d.bbox.xmax), round4(d.bbox.ymax)]),
                        )
                    } else {
                        (None, None)
                    };
                    ResultRecord::Detection(DetectionRecord {
                        name: d.class_name.clone(),
                        probability: format_probability(d.score),
                        top_left,
                        bottom_right,
                        view: view.to_string(),
                        time: time.clone(),
                    })
                })
                .collect(),

            Prediction::Segmentation(mask) => {
                let present: BTreeSet<u32> = mask.iter().copied().collect();
                let classes_found = present
                    .into_iter()
                    .map(|i| {
                        self.class_names
                            .get(i as usize)
                            .cloned()
                            .unwrap_or_else(|| i.to_string())
                    })
                    .collect();
                vec![ResultRecord::Segmentation(SegmentationRecord {
                    classes_found,
                    view: view.to_string(),
                    time,
                })]
            }
        }
    }
}

fn round4(v: f32) -> f64 {
    (v as f64 * 10_000.0).round() / 10_000.0
}
