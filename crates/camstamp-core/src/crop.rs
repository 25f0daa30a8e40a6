use tracing::debug;

use crate::error::EnhanceError;
use crate::frame::Frame;

/// Crop fraction per resolution tier. Higher resolutions burn the clock into
/// a smaller fraction of the frame, so the crop shrinks as width grows.
pub fn optimal_crop_ratio(width: u32) -> f32 {
    if width <= 640 {
        0.30
    } else if width <= 1280 {
        0.25
    } else if width <= 1920 {
        0.20
    } else {
        0.15
    }
}

/// Derive the top-left sub-image likely to contain the on-screen timestamp.
pub fn crop_timestamp_region(frame: &Frame) -> Result<Frame, EnhanceError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(EnhanceError::VideoRead(
            "cannot crop a zero-size frame".to_string(),
        ));
    }

    let ratio = optimal_crop_ratio(frame.width);
    let crop_width = ((frame.width as f32 * ratio) as u32).max(1);
    let crop_height = ((frame.height as f32 * ratio) as u32).max(1);

    debug!(
        frame_width = frame.width,
        frame_height = frame.height,
        crop_width,
        crop_height,
        ratio,
        "cropping timestamp region"
    );

    Ok(frame.crop_top_left(crop_width, crop_height))
}
