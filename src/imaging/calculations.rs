//! Pure calculation functions for thumbnail dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Scale `(width, height)` so the longer edge is at most `max_edge`.
///
/// The scale factor comes from the longer edge and is applied to both
/// dimensions with integer arithmetic, so the aspect ratio is preserved up to
/// rounding down. Images that already fit are returned unchanged (no
/// upscaling). Neither dimension drops below 1.
///
/// # Examples
/// ```
/// # use stamp_watch::imaging::clamp_to_max_edge;
/// assert_eq!(clamp_to_max_edge((2000, 1000), 512), (512, 256));
/// assert_eq!(clamp_to_max_edge((300, 200), 512), (300, 200));
/// ```
pub fn clamp_to_max_edge(dims: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (w, h) = dims;
    let longer = w.max(h);
    if longer <= max_edge {
        return (w, h);
    }
    let scale = |side: u32| (u64::from(side) * u64::from(max_edge) / u64::from(longer)) as u32;
    (scale(w).max(1), scale(h).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_clamps_width() {
        // 2000x1000 → 512x256
        assert_eq!(clamp_to_max_edge((2000, 1000), 512), (512, 256));
    }

    #[test]
    fn portrait_clamps_height() {
        // 1000x2000 → 256x512
        assert_eq!(clamp_to_max_edge((1000, 2000), 512), (256, 512));
    }

    #[test]
    fn square_clamps_both() {
        assert_eq!(clamp_to_max_edge((1024, 1024), 512), (512, 512));
    }

    #[test]
    fn small_image_not_upscaled() {
        assert_eq!(clamp_to_max_edge((300, 200), 512), (300, 200));
    }

    #[test]
    fn exact_max_edge_unchanged() {
        assert_eq!(clamp_to_max_edge((512, 100), 512), (512, 100));
    }

    #[test]
    fn integer_scaling_rounds_down() {
        // 1500 * 512 / 2000 = 384, 1001 * 512 / 2000 = 256.256 → 256
        assert_eq!(clamp_to_max_edge((2000, 1500), 512), (512, 384));
        assert_eq!(clamp_to_max_edge((2000, 1001), 512), (512, 256));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        assert_eq!(clamp_to_max_edge((10_000, 3), 512), (512, 1));
    }
}
