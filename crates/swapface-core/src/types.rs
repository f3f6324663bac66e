use serde::Serialize;
use std::str::FromStr;

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// Everything the swap step needs to know about one face.
///
/// Built per request by the face locator and dropped with it.
#[derive(Debug, Clone)]
pub struct FaceDescriptor {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub embedding: Embedding,
}

/// Which detection becomes the primary face when an image holds several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// First detection in detector order, which is descending confidence.
    #[default]
    HighestConfidence,
    /// Largest bounding box; ties go to the higher confidence.
    LargestArea,
}

impl SelectionPolicy {
    /// Pick the primary candidate index, or `None` for an empty slice.
    ///
    /// `candidates` must be in detector order (descending confidence).
    pub fn select(self, candidates: &[BoundingBox]) -> Option<usize> {
        match self {
            SelectionPolicy::HighestConfidence => (!candidates.is_empty()).then_some(0),
            SelectionPolicy::LargestArea => candidates
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.area()
                        .partial_cmp(&b.area())
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(
                            a.confidence
                                .partial_cmp(&b.confidence)
                                .unwrap_or(std::cmp::Ordering::Equal),
                        )
                })
                .map(|(i, _)| i),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confidence" | "highest_confidence" => Ok(SelectionPolicy::HighestConfidence),
            "largest" | "largest_area" => Ok(SelectionPolicy::LargestArea),
            other => Err(format!(
                "unknown face selection policy '{other}' (expected 'confidence' or 'largest')"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(100.0, 100.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = bbox(10.0, 10.0, 1.0);
        let b = BoundingBox { x: 20.0, y: 20.0, ..bbox(10.0, 10.0, 1.0) };
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(10.0, 10.0, 1.0);
        let b = BoundingBox { x: 5.0, ..bbox(10.0, 10.0, 1.0) };
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_highest_confidence_takes_first() {
        let faces = vec![bbox(10.0, 10.0, 0.9), bbox(50.0, 50.0, 0.6)];
        assert_eq!(SelectionPolicy::HighestConfidence.select(&faces), Some(0));
    }

    #[test]
    fn test_largest_area_picks_biggest_box() {
        let faces = vec![bbox(10.0, 10.0, 0.9), bbox(50.0, 50.0, 0.6), bbox(20.0, 20.0, 0.8)];
        assert_eq!(SelectionPolicy::LargestArea.select(&faces), Some(1));
    }

    #[test]
    fn test_largest_area_tie_prefers_confidence() {
        let faces = vec![bbox(30.0, 30.0, 0.7), bbox(30.0, 30.0, 0.95)];
        assert_eq!(SelectionPolicy::LargestArea.select(&faces), Some(1));
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(SelectionPolicy::HighestConfidence.select(&[]), None);
        assert_eq!(SelectionPolicy::LargestArea.select(&[]), None);
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("largest".parse::<SelectionPolicy>(), Ok(SelectionPolicy::LargestArea));
        assert_eq!(" Confidence ".parse::<SelectionPolicy>(), Ok(SelectionPolicy::HighestConfidence));
        assert!("biggest".parse::<SelectionPolicy>().is_err());
    }

    #[test]
    fn test_area_ignores_negative_extent() {
        assert_eq!(bbox(-5.0, 10.0, 0.5).area(), 0.0);
    }
}
