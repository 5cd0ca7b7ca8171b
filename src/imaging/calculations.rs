//! Pure calculation functions for rendition geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Sizes are `(width, height)` tuples; offsets are signed because canvas
//! placement may put an image partly outside the canvas.

use super::params::{BorderMethod, CropFocus, Fit, ParamValue, Position};

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Aspect-constrained resize.
///
/// Computes two candidates: one where the width is applied last (height
/// derived from it) and one where the height is applied last. The
/// height-dominant candidate wins when it fits inside the requested box,
/// otherwise the width-dominant one is used. A missing side counts as 1 for
/// the fit test, so a width-only request always resolves by width.
///
/// With `upsize` disabled, neither side may exceed the source.
///
/// # Examples
/// ```
/// # use rendition_cache::imaging::constrain;
/// // Landscape into a square box: width governs.
/// assert_eq!(constrain((1600, 900), Some(800.0), Some(800.0), true), (800, 450));
/// // Width only.
/// assert_eq!(constrain((1600, 900), Some(400.0), None, true), (400, 225));
/// // No upscaling.
/// assert_eq!(constrain((100, 50), Some(400.0), None, false), (100, 50));
/// ```
pub fn constrain(
    source: (u32, u32),
    width: Option<f64>,
    height: Option<f64>,
    upsize: bool,
) -> (u32, u32) {
    let (sw, sh) = (source.0 as f64, source.1 as f64);
    if sw <= 0.0 || sh <= 0.0 {
        return source;
    }
    let ratio = sw / sh;

    let apply_width = |size: &mut (f64, f64)| {
        if let Some(w) = width {
            size.0 = if upsize { w } else { w.min(sw) };
            let h = (size.0 / ratio).round().max(1.0);
            size.1 = if upsize { h } else { h.min(sh) };
        }
    };
    let apply_height = |size: &mut (f64, f64)| {
        if let Some(h) = height {
            size.1 = if upsize { h } else { h.min(sh) };
            let w = (size.1 * ratio).round().max(1.0);
            size.0 = if upsize { w } else { w.min(sw) };
        }
    };

    let mut dominant_width = (sw, sh);
    apply_height(&mut dominant_width);
    apply_width(&mut dominant_width);

    let mut dominant_height = (sw, sh);
    apply_width(&mut dominant_height);
    apply_height(&mut dominant_height);

    let box_w = width.map(f64::trunc).unwrap_or(1.0);
    let box_h = height.map(f64::trunc).unwrap_or(1.0);
    let chosen = if dominant_height.0 <= box_w && dominant_height.1 <= box_h {
        dominant_height
    } else {
        dominant_width
    };

    (chosen.0.max(1.0) as u32, chosen.1.max(1.0) as u32)
}

/// Resolve the target box of the size step.
///
/// 1. Both sides absent ⇒ the source size; one absent ⇒ derived from the
///    source aspect ratio.
/// 2. Multiply by `dpr` and round.
/// 3. If the pixel count exceeds `max_pixels`, scale both sides down by
///    `sqrt(count / max_pixels)` and truncate.
pub fn resolve_target(
    source: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    dpr: f64,
    max_pixels: Option<u64>,
) -> (u32, u32) {
    let (w, h) = match (width, height) {
        (None, None) => source,
        (Some(w), Some(h)) => (w, h),
        (w, h) => constrain(source, w.map(f64::from), h.map(f64::from), true),
    };

    let w = (w as f64 * dpr).round();
    let h = (h as f64 * dpr).round();

    let (w, h) = match max_pixels {
        Some(max) if max > 0 && w * h > max as f64 => {
            let factor = (w * h / max as f64).sqrt();
            (w / factor, h / factor)
        }
        _ => (w, h),
    };

    (w.max(0.0) as u32, h.max(0.0) as u32)
}

/// Placement of an image on a new canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasPlan {
    pub width: u32,
    pub height: u32,
    pub x: i64,
    pub y: i64,
}

/// The operations that reconcile a source with a target box.
///
/// Steps run in field order: resize, then canvas, then crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FitPlan {
    pub resize: Option<(u32, u32)>,
    pub canvas: Option<CanvasPlan>,
    pub crop: Option<Rect>,
}

/// Plan how `source` becomes `target` under `fit`.
///
/// `contain` and `max` preserve the aspect ratio inside the box (`max` never
/// upscales); `fill` is `max` padded to the exact box; `stretch` ignores the
/// aspect ratio; `crop` covers the box, applies the zoom and cuts to the
/// exact box around the focal point.
pub fn plan_fit(source: (u32, u32), target: (u32, u32), fit: Fit) -> FitPlan {
    if source == target || target.0 == 0 || target.1 == 0 {
        return FitPlan::default();
    }
    let (tw, th) = (target.0 as f64, target.1 as f64);

    match fit {
        Fit::Contain => FitPlan {
            resize: Some(constrain(source, Some(tw), Some(th), true)),
            ..FitPlan::default()
        },
        Fit::Max => FitPlan {
            resize: Some(constrain(source, Some(tw), Some(th), false)),
            ..FitPlan::default()
        },
        Fit::Fill => {
            let resized = constrain(source, Some(tw), Some(th), false);
            FitPlan {
                resize: Some(resized),
                canvas: Some(CanvasPlan {
                    width: target.0,
                    height: target.1,
                    x: centered_offset(target.0, resized.0),
                    y: centered_offset(target.1, resized.1),
                }),
                crop: None,
            }
        }
        Fit::Stretch => FitPlan {
            resize: Some(target),
            ..FitPlan::default()
        },
        Fit::Crop(focus) => {
            let resized = crop_resize_dimensions(source, target, focus.zoom);
            FitPlan {
                resize: Some(resized),
                canvas: None,
                crop: Some(crop_offset(resized, target, focus)),
            }
        }
    }
}

/// Cover-resize dimensions for a crop fit, scaled by the focus zoom.
///
/// The result is never smaller than the target on either side so the
/// following crop is always exact.
pub fn crop_resize_dimensions(source: (u32, u32), target: (u32, u32), zoom: f64) -> (u32, u32) {
    let (sw, sh) = (source.0 as f64, source.1 as f64);
    let (tw, th) = (target.0 as f64, target.1 as f64);
    let zoom = if zoom > 0.0 { zoom } else { 1.0 };

    let (cw, ch) = if th > tw * (sh / sw) {
        (th * (sw / sh), th)
    } else {
        (tw, tw * (sh / sw))
    };

    let (w, h) = constrain(source, Some(cw * zoom), Some(ch * zoom), true);
    (w.max(target.0), h.max(target.1))
}

/// Crop window of size `target` inside `resized`, centred on the focal point
/// and clamped to the image.
pub fn crop_offset(resized: (u32, u32), target: (u32, u32), focus: CropFocus) -> Rect {
    let axis = |size: u32, want: u32, pct: u32| -> u32 {
        let offset = (size as f64 * pct as f64 / 100.0 - want as f64 / 2.0).round() as i64;
        let max = size as i64 - want as i64;
        offset.min(max).max(0) as u32
    };
    Rect {
        x: axis(resized.0, target.0, focus.x),
        y: axis(resized.1, target.1, focus.y),
        width: target.0.min(resized.0),
        height: target.1.min(resized.1),
    }
}

/// Validate an explicit `crop` request `[width, height, x, y]` against the
/// image and limit it to the image bounds.
pub fn crop_rect(image: (u32, u32), request: [f64; 4]) -> Option<Rect> {
    let [w, h, x, y] = request;
    let (iw, ih) = (image.0 as f64, image.1 as f64);
    if w <= 0.0 || h <= 0.0 || x < 0.0 || y < 0.0 || x >= iw || y >= ih {
        return None;
    }
    let (x, y) = (x as u32, y as u32);
    let width = (w as u32).min(image.0 - x);
    let height = (h as u32).min(image.1 - y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(Rect {
        x,
        y,
        width,
        height,
    })
}

/// Offset that centres `inner` inside `outer`, using integer pivots.
pub fn centered_offset(outer: u32, inner: u32) -> i64 {
    (outer / 2) as i64 - (inner / 2) as i64
}

/// Resolve a dimension parameter against an image.
///
/// A positive number is a pixel count multiplied by `dpr`. `<n>w` and
/// `<n>h` (n in 0-100) are percentages of the image width and height.
/// Anything else is absent.
pub fn resolve_dimension(value: &ParamValue, image: (u32, u32), dpr: f64) -> Option<f64> {
    if let Some(n) = value.as_number() {
        return (n > 0.0).then_some(n * dpr);
    }
    let text = value.as_text()?;
    let (digits, base) = if let Some(digits) = text.strip_suffix('w') {
        (digits, image.0)
    } else if let Some(digits) = text.strip_suffix('h') {
        (digits, image.1)
    } else {
        return None;
    };
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let pct: u32 = digits.parse().ok()?;
    if digits.len() == 3 && pct != 100 {
        return None;
    }
    Some(base as f64 * pct as f64 / 100.0)
}

/// Resolved border geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderPlan {
    /// Stroke a rectangle of `width` inside the image.
    Overlay { rect: Rect, width: u32 },
    /// Shrink the image, then pad back with the border colour.
    Shrink { resize: (u32, u32), canvas: CanvasPlan },
    /// Pad the image with the border colour.
    Expand { canvas: CanvasPlan },
}

/// Plan a border of `width` pixels around an `image`-sized picture.
pub fn plan_border(image: (u32, u32), width: f64, method: BorderMethod) -> Option<BorderPlan> {
    if width <= 0.0 {
        return None;
    }
    let (iw, ih) = (image.0 as f64, image.1 as f64);
    let doubled = (width * 2.0).round() as u32;

    match method {
        BorderMethod::Overlay => {
            let start = (width / 2.0).round() as u32;
            let end_x = (iw - width / 2.0).round().max(0.0) as u32;
            let end_y = (ih - width / 2.0).round().max(0.0) as u32;
            Some(BorderPlan::Overlay {
                rect: Rect {
                    x: start,
                    y: start,
                    width: end_x.saturating_sub(start),
                    height: end_y.saturating_sub(start),
                },
                width: width.round().max(1.0) as u32,
            })
        }
        BorderMethod::Shrink => {
            let w = (iw - width * 2.0).round();
            let h = (ih - width * 2.0).round();
            if w < 1.0 || h < 1.0 {
                return None;
            }
            let resize = (w as u32, h as u32);
            Some(BorderPlan::Shrink {
                resize,
                canvas: expanded_canvas(resize, doubled),
            })
        }
        BorderMethod::Expand => Some(BorderPlan::Expand {
            canvas: expanded_canvas(image, doubled),
        }),
    }
}

fn expanded_canvas(image: (u32, u32), extra: u32) -> CanvasPlan {
    let width = image.0 + extra;
    let height = image.1 + extra;
    CanvasPlan {
        width,
        height,
        x: centered_offset(width, image.0),
        y: centered_offset(height, image.1),
    }
}

/// Pivot point of a size for a nine-point position, shifted by the offsets.
///
/// Offsets push away from the anchored edge: on the right or bottom edge a
/// positive offset moves inwards.
fn pivot(size: (u32, u32), position: Position, offset: (i64, i64)) -> (i64, i64) {
    let (w, h) = (size.0 as i64, size.1 as i64);
    let (ox, oy) = offset;
    let left = ox;
    let center_x = w / 2 + ox;
    let right = w - ox;
    let top = oy;
    let middle_y = h / 2 + oy;
    let bottom = h - oy;

    match position {
        Position::TopLeft => (left, top),
        Position::Top => (center_x, top),
        Position::TopRight => (right, top),
        Position::Left => (left, middle_y),
        Position::Center => (center_x, middle_y),
        Position::Right => (right, middle_y),
        Position::BottomLeft => (left, bottom),
        Position::Bottom => (center_x, bottom),
        Position::BottomRight => (right, bottom),
    }
}

/// Top-left corner of a watermark of size `mark` placed on `image`.
///
/// The image pivot (with offsets) is aligned with the watermark pivot
/// (without offsets) for the same position.
pub fn watermark_origin(
    image: (u32, u32),
    mark: (u32, u32),
    position: Position,
    offset: (i64, i64),
) -> (i64, i64) {
    let (ix, iy) = pivot(image, position, offset);
    let (mx, my) = pivot(mark, position, (0, 0));
    (ix - mx, iy - my)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn focus(x: u32, y: u32) -> CropFocus {
        CropFocus { x, y, zoom: 1.0 }
    }

    // =========================================================================
    // constrain
    // =========================================================================

    #[test]
    fn constrain_landscape_into_square() {
        assert_eq!(constrain((1600, 900), Some(800.0), Some(800.0), true), (800, 450));
    }

    #[test]
    fn constrain_portrait_into_square() {
        assert_eq!(constrain((900, 1600), Some(800.0), Some(800.0), true), (450, 800));
    }

    #[test]
    fn constrain_single_side() {
        assert_eq!(constrain((1600, 900), None, Some(450.0), true), (800, 450));
        assert_eq!(constrain((1600, 900), Some(400.0), None, true), (400, 225));
    }

    #[test]
    fn constrain_upscales_when_allowed() {
        assert_eq!(constrain((100, 50), Some(400.0), Some(400.0), true), (400, 200));
    }

    #[test]
    fn constrain_never_upscales_without_upsize() {
        assert_eq!(constrain((100, 50), Some(400.0), Some(400.0), false), (100, 50));
    }

    #[test]
    fn constrain_keeps_one_pixel_minimum() {
        assert_eq!(constrain((1000, 1), Some(10.0), None, true), (10, 1));
    }

    // =========================================================================
    // resolve_target
    // =========================================================================

    #[test]
    fn target_defaults_to_source() {
        assert_eq!(resolve_target((640, 480), None, None, 1.0, None), (640, 480));
    }

    #[test]
    fn target_derives_missing_side() {
        assert_eq!(resolve_target((640, 480), Some(320), None, 1.0, None), (320, 240));
        assert_eq!(resolve_target((640, 480), None, Some(120), 1.0, None), (160, 120));
    }

    #[test]
    fn target_applies_dpr() {
        assert_eq!(resolve_target((640, 480), Some(100), Some(50), 2.0, None), (200, 100));
        assert_eq!(resolve_target((640, 480), Some(3), Some(3), 1.5, None), (5, 5));
    }

    #[test]
    fn target_clamps_pixel_count() {
        // 2000x1000 = 2M pixels, limit 500k => factor 2.
        assert_eq!(
            resolve_target((10, 10), Some(2000), Some(1000), 1.0, Some(500_000)),
            (1000, 500)
        );
        assert_eq!(
            resolve_target((10, 10), Some(2000), Some(1000), 1.0, Some(5_000_000)),
            (2000, 1000)
        );
    }

    // =========================================================================
    // plan_fit
    // =========================================================================

    #[test]
    fn fit_noop_when_target_matches_source() {
        assert_eq!(plan_fit((800, 600), (800, 600), Fit::Stretch), FitPlan::default());
    }

    #[test]
    fn fit_contain_preserves_aspect() {
        let plan = plan_fit((1600, 900), (800, 800), Fit::Contain);
        assert_eq!(plan.resize, Some((800, 450)));
        assert_eq!(plan.canvas, None);
        assert_eq!(plan.crop, None);
    }

    #[test]
    fn fit_max_never_upscales() {
        let plan = plan_fit((400, 300), (800, 800), Fit::Max);
        assert_eq!(plan.resize, Some((400, 300)));
    }

    #[test]
    fn fit_fill_pads_to_exact_box() {
        let plan = plan_fit((1600, 900), (800, 800), Fit::Fill);
        assert_eq!(plan.resize, Some((800, 450)));
        assert_eq!(
            plan.canvas,
            Some(CanvasPlan {
                width: 800,
                height: 800,
                x: 0,
                y: 175,
            })
        );
    }

    #[test]
    fn fit_stretch_is_exact() {
        let plan = plan_fit((1600, 900), (300, 300), Fit::Stretch);
        assert_eq!(plan.resize, Some((300, 300)));
    }

    #[test]
    fn fit_crop_center_covers_and_cuts() {
        let plan = plan_fit((1600, 900), (400, 400), Fit::Crop(CropFocus::CENTER));
        assert_eq!(plan.resize, Some((711, 400)));
        let crop = plan.crop.unwrap();
        assert_eq!((crop.width, crop.height), (400, 400));
        // round(711 * 0.5 - 200) = round(155.5) = 156
        assert_eq!((crop.x, crop.y), (156, 0));
    }

    #[test]
    fn fit_crop_top_left_is_flush() {
        let plan = plan_fit((1600, 900), (400, 400), Fit::Crop(focus(0, 0)));
        let crop = plan.crop.unwrap();
        assert_eq!((crop.x, crop.y), (0, 0));
    }

    #[test]
    fn fit_crop_bottom_right_is_flush() {
        let plan = plan_fit((1600, 900), (400, 400), Fit::Crop(focus(100, 100)));
        let crop = plan.crop.unwrap();
        assert_eq!((crop.x, crop.y), (311, 0));
    }

    #[test]
    fn fit_crop_zoom_enlarges_before_cut() {
        let zoomed = CropFocus {
            x: 50,
            y: 50,
            zoom: 2.0,
        };
        let plan = plan_fit((1600, 900), (400, 400), Fit::Crop(zoomed));
        assert_eq!(plan.resize, Some((1422, 800)));
        let crop = plan.crop.unwrap();
        assert_eq!((crop.width, crop.height), (400, 400));
        assert_eq!((crop.x, crop.y), (511, 200));
    }

    #[test]
    fn crop_resize_never_undershoots_target() {
        let (w, h) = crop_resize_dimensions((333, 333), (100, 101), 1.0);
        assert!(w >= 100 && h >= 101);
    }

    // =========================================================================
    // crop_rect
    // =========================================================================

    #[test]
    fn crop_rect_accepts_in_bounds() {
        assert_eq!(
            crop_rect((800, 600), [100.0, 50.0, 10.0, 20.0]),
            Some(Rect {
                x: 10,
                y: 20,
                width: 100,
                height: 50
            })
        );
    }

    #[test]
    fn crop_rect_limits_to_image() {
        assert_eq!(
            crop_rect((800, 600), [500.0, 500.0, 700.0, 500.0]),
            Some(Rect {
                x: 700,
                y: 500,
                width: 100,
                height: 100
            })
        );
    }

    #[test]
    fn crop_rect_rejects_invalid() {
        assert_eq!(crop_rect((800, 600), [0.0, 50.0, 0.0, 0.0]), None);
        assert_eq!(crop_rect((800, 600), [10.0, 10.0, -1.0, 0.0]), None);
        assert_eq!(crop_rect((800, 600), [10.0, 10.0, 800.0, 0.0]), None);
        assert_eq!(crop_rect((800, 600), [10.0, 10.0, 0.0, 600.0]), None);
    }

    // =========================================================================
    // dimensions
    // =========================================================================

    #[test]
    fn dimension_pixels_scale_with_dpr() {
        assert_eq!(
            resolve_dimension(&ParamValue::Int(10), (800, 600), 2.0),
            Some(20.0)
        );
        assert_eq!(
            resolve_dimension(&ParamValue::Text("5".into()), (800, 600), 1.0),
            Some(5.0)
        );
        assert_eq!(resolve_dimension(&ParamValue::Int(-3), (800, 600), 1.0), None);
    }

    #[test]
    fn dimension_percentages() {
        let w = ParamValue::Text("10w".into());
        let h = ParamValue::Text("50h".into());
        let full = ParamValue::Text("100w".into());
        assert_eq!(resolve_dimension(&w, (800, 600), 2.0), Some(80.0));
        assert_eq!(resolve_dimension(&h, (800, 600), 1.0), Some(300.0));
        assert_eq!(resolve_dimension(&full, (800, 600), 1.0), Some(800.0));
    }

    #[test]
    fn dimension_rejects_garbage() {
        for bad in ["101w", "10x", "w", "", "abc", "1000h"] {
            assert_eq!(
                resolve_dimension(&ParamValue::Text(bad.into()), (800, 600), 1.0),
                None,
                "{bad}"
            );
        }
    }

    // =========================================================================
    // border
    // =========================================================================

    #[test]
    fn border_overlay_insets_rectangle() {
        let plan = plan_border((100, 80), 10.0, BorderMethod::Overlay).unwrap();
        assert_eq!(
            plan,
            BorderPlan::Overlay {
                rect: Rect {
                    x: 5,
                    y: 5,
                    width: 90,
                    height: 70
                },
                width: 10
            }
        );
    }

    #[test]
    fn border_expand_grows_canvas() {
        let plan = plan_border((100, 80), 10.0, BorderMethod::Expand).unwrap();
        assert_eq!(
            plan,
            BorderPlan::Expand {
                canvas: CanvasPlan {
                    width: 120,
                    height: 100,
                    x: 10,
                    y: 10
                }
            }
        );
    }

    #[test]
    fn border_shrink_keeps_outer_size() {
        let plan = plan_border((100, 80), 10.0, BorderMethod::Shrink).unwrap();
        assert_eq!(
            plan,
            BorderPlan::Shrink {
                resize: (80, 60),
                canvas: CanvasPlan {
                    width: 100,
                    height: 80,
                    x: 10,
                    y: 10
                }
            }
        );
    }

    #[test]
    fn border_too_wide_to_shrink_is_skipped() {
        assert_eq!(plan_border((10, 10), 6.0, BorderMethod::Shrink), None);
        assert_eq!(plan_border((10, 10), 0.0, BorderMethod::Overlay), None);
    }

    // =========================================================================
    // watermark
    // =========================================================================

    #[test]
    fn watermark_bottom_right_with_offset() {
        assert_eq!(
            watermark_origin((800, 600), (100, 50), Position::BottomRight, (10, 20)),
            (690, 530)
        );
    }

    #[test]
    fn watermark_top_left_with_offset() {
        assert_eq!(
            watermark_origin((800, 600), (100, 50), Position::TopLeft, (10, 20)),
            (10, 20)
        );
    }

    #[test]
    fn watermark_center() {
        assert_eq!(
            watermark_origin((800, 600), (100, 50), Position::Center, (0, 0)),
            (350, 275)
        );
    }

    #[test]
    fn centered_offset_uses_integer_pivots() {
        assert_eq!(centered_offset(101, 50), 25);
        assert_eq!(centered_offset(100, 51), 25);
    }
}
