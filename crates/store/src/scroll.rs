use serde::{Deserialize, Serialize};

/// Raw scroll geometry of the results list, in pixels (or rows; only ratios matter).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub top: f64,
    pub viewport: f64,
    pub content: f64,
}

impl ScrollPosition {
    pub fn new(top: f64, viewport: f64, content: f64) -> Self { Self { top, viewport, content } }

    /// Fraction of the scrollable distance covered, or `None` when nothing can scroll.
    pub fn fraction(&self) -> Option<f64> {
        let scrollable = self.content - self.viewport;
        if scrollable.is_nan() || scrollable <= 0.0 || !self.top.is_finite() {
            return None;
        }
        Some((self.top / scrollable).clamp(0.0, 1.0))
    }

    /// Whether this position asks for the next page.
    pub fn past(&self, threshold: f64) -> bool {
        self.fraction().map_or(false, |f| f > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        assert!(!ScrollPosition::new(75.0, 100.0, 200.0).past(0.75));
        assert!(ScrollPosition::new(76.0, 100.0, 200.0).past(0.75));
        assert!(!ScrollPosition::new(10.0, 100.0, 200.0).past(0.75));
    }

    #[test]
    fn unscrollable_list_never_triggers() {
        assert_eq!(ScrollPosition::new(0.0, 300.0, 200.0).fraction(), None);
        assert!(!ScrollPosition::new(50.0, 200.0, 200.0).past(0.0));
        assert!(!ScrollPosition::new(f64::NAN, 100.0, 200.0).past(0.5));
    }
}
