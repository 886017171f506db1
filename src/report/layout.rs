//! Page layout for embedded diagrams.

use serde::Serialize;

/// Display size in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

/// Page-content box an image must fit into, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentBox {
    pub max_width: f64,
    pub max_height: f64,
}

impl Default for ContentBox {
    fn default() -> Self {
        Self {
            max_width: 6.0,
            max_height: 4.0,
        }
    }
}

impl ContentBox {
    /// Scales `pixel_width x pixel_height` to fit the box while keeping the aspect ratio.
    ///
    /// The limiting dimension lands exactly on its box edge and the other one follows
    /// from the ratio. Returns `None` for degenerate images.
    pub fn fit(&self, pixel_width: u32, pixel_height: u32) -> Option<DisplaySize> {
        if pixel_width == 0 || pixel_height == 0 {
            return None;
        }
        let (w, h) = (f64::from(pixel_width), f64::from(pixel_height));
        let scale = (self.max_width / w).min(self.max_height / h);
        if !scale.is_finite() || scale <= 0.0 {
            return None;
        }
        Some(DisplaySize {
            width: (w * scale).min(self.max_width),
            height: (h * scale).min(self.max_height),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_landscape_fills_the_box() {
        let size = ContentBox::default().fit(1200, 800).unwrap();
        assert!((size.width - 6.0).abs() < 1e-9);
        assert!((size.height - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_wide_image_is_width_limited() {
        let size = ContentBox::default().fit(2000, 500).unwrap();
        assert!((size.width - 6.0).abs() < 1e-9);
        assert!((size.height - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_tall_image_is_height_limited() {
        let size = ContentBox::default().fit(400, 1600).unwrap();
        assert!((size.height - 4.0).abs() < 1e-9);
        assert!((size.width - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_images_have_no_size() {
        assert!(ContentBox::default().fit(0, 10).is_none());
        assert!(ContentBox::default().fit(10, 0).is_none());
    }

    proptest! {
        #[test]
        fn fitted_size_stays_in_box_and_keeps_ratio(
            w in 1u32..20_000,
            h in 1u32..20_000,
            max_w in 0.5f64..20.0,
            max_h in 0.5f64..20.0,
        ) {
            let bounds = ContentBox { max_width: max_w, max_height: max_h };
            let size = bounds.fit(w, h).unwrap();
            prop_assert!(size.width <= max_w);
            prop_assert!(size.height <= max_h);
            let original = f64::from(w) / f64::from(h);
            let displayed = size.width / size.height;
            prop_assert!((original - displayed).abs() <= 0.01 * original);
        }
    }
}
