//! Pure calculation functions for image geometry.
//!
//! All functions here are pure and testable without any I/O or images. The
//! engines call them so the mock and the real engine agree on every size.

use super::params::ThumbnailMode;

/// Dimensions `thumbnail` produces for a `source` image and a target `bounds` box.
///
/// - `Inset` scales by the smaller ratio so the whole image fits; the result
///   may underfill one axis.
/// - `Outbound` scales by the larger ratio so the box is covered, then the
///   overflow is cropped; the result is the box itself.
///
/// Neither mode upscales: a source already inside the box keeps its size
/// (and `Outbound` crops it to the box on the axes where it is larger).
///
/// # Examples
/// ```
/// # use imagecache::imaging::calculations::thumbnail_dimensions;
/// # use imagecache::imaging::ThumbnailMode;
/// assert_eq!(thumbnail_dimensions((400, 200), (100, 100), ThumbnailMode::Inset), (100, 50));
/// assert_eq!(thumbnail_dimensions((400, 200), (100, 100), ThumbnailMode::Outbound), (100, 100));
/// ```
pub fn thumbnail_dimensions(source: (u32, u32), bounds: (u32, u32), mode: ThumbnailMode) -> (u32, u32) {
    match mode {
        ThumbnailMode::Inset => inset_dimensions(source, bounds),
        ThumbnailMode::Outbound => {
            let scaled = outbound_scaled_dimensions(source, bounds);
            (scaled.0.min(bounds.0), scaled.1.min(bounds.1))
        }
    }
}

fn inset_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (box_w, box_h) = bounds;
    if src_w <= box_w && src_h <= box_h {
        return source;
    }
    let ratio = (box_w as f64 / src_w as f64).min(box_h as f64 / src_h as f64);
    scale(source, ratio)
}

/// Intermediate size for `Outbound` before the center crop.
///
/// Covers the box on both axes, unless the source is already smaller on
/// some axis, in which case it is left unscaled.
pub fn outbound_scaled_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (box_w, box_h) = bounds;
    let ratio = (box_w as f64 / src_w as f64).max(box_h as f64 / src_h as f64);
    if ratio >= 1.0 {
        source
    } else {
        scale(source, ratio)
    }
}

fn scale((w, h): (u32, u32), ratio: f64) -> (u32, u32) {
    let scaled = |v: u32| ((v as f64 * ratio).round() as u32).max(1);
    (scaled(w), scaled(h))
}

/// Top-left corner of a centered `inner` region inside `outer`.
pub fn center_crop_origin(outer: (u32, u32), inner: (u32, u32)) -> (u32, u32) {
    (
        outer.0.saturating_sub(inner.0) / 2,
        outer.1.saturating_sub(inner.1) / 2,
    )
}

/// Where `fit` pastes a thumbnail of size `content` on a `bounds` canvas.
///
/// Each axis is centered independently with `ceil((box - content) / 2)`,
/// and is 0 whenever the content already spans that axis.
pub fn fit_offset(bounds: (u32, u32), content: (u32, u32)) -> (u32, u32) {
    let axis = |target: u32, actual: u32| {
        if actual < target {
            (target - actual).div_ceil(2)
        } else {
            0
        }
    };
    (axis(bounds.0, content.0), axis(bounds.1, content.1))
}

/// Canvas size for `frame`: the image grown by `margin` on every side.
///
/// Returns `None` if the result does not fit in `u32`.
pub fn frame_dimensions(image: (u32, u32), margin: u32) -> Option<(u32, u32)> {
    let grow = margin.checked_mul(2)?;
    Some((image.0.checked_add(grow)?, image.1.checked_add(grow)?))
}

/// Whether a crop of `size` at `origin` stays inside an image of `bounds`.
pub fn crop_fits(bounds: (u32, u32), origin: (u32, u32), size: (u32, u32)) -> bool {
    let fits = |start: u32, len: u32, limit: u32| {
        start.checked_add(len).is_some_and(|end| end <= limit)
    };
    fits(origin.0, size.0, bounds.0) && fits(origin.1, size.1, bounds.1)
}

/// Largest RGBA canvas an engine allocates, in bytes (1 GiB).
pub const MAX_CANVAS_BYTES: u64 = 1 << 30;

/// Whether an RGBA canvas of `size` stays within [`MAX_CANVAS_BYTES`].
///
/// # Examples
/// ```
/// # use imagecache::imaging::calculations::canvas_fits;
/// assert!(canvas_fits((4000, 3000)));
/// assert!(!canvas_fits((u32::MAX, u32::MAX)));
/// ```
pub fn canvas_fits(size: (u32, u32)) -> bool {
    u64::from(size.0)
        .checked_mul(u64::from(size.1))
        .and_then(|pixels| pixels.checked_mul(4))
        .is_some_and(|bytes| bytes <= MAX_CANVAS_BYTES)
}
