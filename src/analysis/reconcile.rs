//! Maps detector-space boxes into display pixels.

use super::core::BoundingBox;
use crate::common::Size;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciliation {
    /// Surviving boxes in display pixels, input order preserved.
    pub boxes: Vec<BoundingBox>,
    pub suggested_title: Option<BoundingBox>,
}

/// Flips each box to a top-left origin, scales it by `display`, drops those
/// under `threshold` and, unless `title_locked`, suggests the largest survivor.
pub fn reconcile(
    boxes: &[BoundingBox],
    display: Size,
    threshold: f32,
    title_locked: bool,
) -> Reconciliation {
    if display.is_degenerate() {
        return Reconciliation::default();
    }

    let boxes: Vec<BoundingBox> = boxes
        .iter()
        .filter(|candidate| candidate.confidence >= threshold)
        .filter_map(|candidate| {
            let rect = candidate
                .rect
                .flipped_vertically()
                .scaled(display.width, display.height);
            candidate.relocated(rect)
        })
        .collect();

    let suggested_title = if title_locked {
        None
    } else {
        largest(&boxes).cloned()
    };

    Reconciliation {
        boxes,
        suggested_title,
    }
}

/// Largest box by area; the first one wins ties.
pub fn largest(boxes: &[BoundingBox]) -> Option<&BoundingBox> {
    boxes.iter().fold(None, |best: Option<&BoundingBox>, candidate| match best {
        Some(current) if current.area() >= candidate.area() => Some(current),
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Rect;

    fn boxed(confidence: f32, rect: Rect, text: &str) -> BoundingBox {
        BoundingBox::new(confidence, rect, text).unwrap()
    }

    #[test]
    fn flips_then_scales_into_pixels() {
        let input = [boxed(0.9, Rect::new(0.1, 0.2, 0.5, 0.25), "Hello")];
        let out = reconcile(&input, Size::new(400.0, 300.0), 0.5, false);

        let rect = out.boxes[0].rect;
        assert!((rect.x - 40.0).abs() < 1e-9);
        // y' = 1 - 0.2 - 0.25 = 0.55 -> 165px
        assert!((rect.y - 165.0).abs() < 1e-9);
        assert!((rect.width - 200.0).abs() < 1e-9);
        assert!((rect.height - 75.0).abs() < 1e-9);
        assert_eq!(out.boxes[0].id, input[0].id);
    }

    #[test]
    fn threshold_is_inclusive() {
        let rect = Rect::new(0.0, 0.0, 0.1, 0.1);
        let input = [
            boxed(0.49, rect, "below"),
            boxed(0.5, rect, "at"),
            boxed(0.51, rect, "above"),
        ];
        let out = reconcile(&input, Size::new(100.0, 100.0), 0.5, false);
        let texts: Vec<_> = out.boxes.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["at", "above"]);
    }

    #[test]
    fn suggests_largest_box_first_on_ties() {
        let input = [
            boxed(0.9, Rect::new(0.0, 0.0, 0.2, 0.2), "small"),
            boxed(0.9, Rect::new(0.0, 0.5, 0.4, 0.4), "first big"),
            boxed(0.9, Rect::new(0.5, 0.0, 0.4, 0.4), "second big"),
        ];
        let out = reconcile(&input, Size::new(100.0, 100.0), 0.5, false);
        assert_eq!(out.suggested_title.unwrap().text, "first big");
    }

    #[test]
    fn filtered_boxes_cannot_be_suggested() {
        let input = [
            boxed(0.2, Rect::new(0.0, 0.0, 0.9, 0.9), "huge but unsure"),
            boxed(0.8, Rect::new(0.0, 0.0, 0.1, 0.1), "tiny"),
        ];
        let out = reconcile(&input, Size::new(100.0, 100.0), 0.5, false);
        assert_eq!(out.suggested_title.unwrap().text, "tiny");
    }

    #[test]
    fn locked_title_suppresses_suggestion() {
        let input = [boxed(0.9, Rect::new(0.0, 0.0, 0.5, 0.5), "title")];
        let out = reconcile(&input, Size::new(100.0, 100.0), 0.5, true);
        assert_eq!(out.boxes.len(), 1);
        assert!(out.suggested_title.is_none());
    }

    #[test]
    fn degenerate_display_yields_nothing() {
        let input = [boxed(0.9, Rect::new(0.0, 0.0, 0.5, 0.5), "title")];
        let out = reconcile(&input, Size::new(0.0, 300.0), 0.5, false);
        assert!(out.boxes.is_empty());
        assert!(out.suggested_title.is_none());
    }
}
