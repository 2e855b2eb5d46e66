/// Axis-aligned box in pixel coordinates of the tensor it was detected on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    fn intersection(&self, other: &BoundingBox) -> f32 {
        let width = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let height = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        width.max(0.0) * height.max(0.0)
    }

    fn union(&self, other: &BoundingBox) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    /// Intersection over union, `0.0` for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.union(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection(other) / union
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Detections of one inference call, in model output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn summarize(&self) -> String {
        summarize(&self.detections)
    }
}

impl<'a> IntoIterator for &'a DetectionResult {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

/// Joins labels with `", "` in detection order. No dedup, no sorting.
pub fn summarize(detections: &[Detection]) -> String {
    detections
        .iter()
        .map(|d| d.label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(label: &str) -> Detection {
        Detection {
            class_id: 0,
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        }
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[]), "");
        assert_eq!(DetectionResult::default().summarize(), "");
    }

    #[test]
    fn test_summarize_keeps_order_and_duplicates() {
        assert_eq!(summarize(&[detection("cat"), detection("dog")]), "cat, dog");

        let result = DetectionResult::new(vec![
            detection("dog"),
            detection("cat"),
            detection("dog"),
        ]);
        assert_eq!(result.summarize(), "dog, cat, dog");
        let labels: Vec<_> = result.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["dog", "cat", "dog"]);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        let c = BoundingBox::new(50.0, 50.0, 10.0, 10.0);

        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&c), 0.0);
        assert_eq!(BoundingBox::new(0.0, 0.0, 0.0, 0.0).iou(&a), 0.0);
    }

    #[test]
    fn test_scaled() {
        let bbox = BoundingBox::new(10.0, 10.0, 50.0, 60.0).scaled(2.0, 0.5);
        assert_eq!(bbox, BoundingBox::new(20.0, 5.0, 100.0, 30.0));
    }
}
