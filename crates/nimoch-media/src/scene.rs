//! Y-plane sum extraction feeding `nimoch_core::scene`'s luminance-delta
//! scorer. Stride-aware, matching `helpers/yuv.rs::extract_yuv`'s row
//! iteration style.

use ffmpeg_the_third::util::frame::video::Video;
use nimoch_core::scene::plane_sum;

/// Sum the Y plane of a decoded YUV420P frame.
pub fn y_plane_sum(frame: &Video) -> f64 {
    let stride = frame.stride(0);
    let data = frame.data(0);
    plane_sum(data, stride, frame.width() as usize, frame.height() as usize)
}
