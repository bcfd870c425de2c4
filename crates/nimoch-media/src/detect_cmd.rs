//! `detect` utility: dumps a JSON inventory of every stream in a container.
//! Grounded in `detect.c`.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::media::Type as MediaType;

use nimoch_core::schema::{DetectAudioInfo, DetectResult, DetectStream, DetectVideoInfo, Rational};

pub fn run(ictx: &Input) -> DetectResult {
    let mut result = DetectResult::default();

    for stream in ictx.streams() {
        let params = stream.parameters();
        let tb = stream.time_base();
        let timebase = Rational { num: tb.numerator(), den: tb.denominator() };
        let pts = if stream.start_time() == ffmpeg::ffi::AV_NOPTS_VALUE {
            None
        } else {
            Some(stream.start_time())
        };
        let codec = ffmpeg::decoder::find(params.id())
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| format!("{:?}", params.id()));
        let pid = unsafe { (*stream.as_ptr()).id };

        match params.medium() {
            MediaType::Video => {
                let (width, height) = unsafe {
                    let p = params.as_ptr();
                    ((*p).width as i32, (*p).height as i32)
                };
                if width == 0 || height == 0 {
                    eprintln!("[detect] skipping video stream {}: zero dimensions", stream.index());
                    continue;
                }
                let fps = stream.rate();
                result.video.push(DetectStream {
                    index: stream.index(),
                    pts,
                    timebase,
                    fps: Some(Rational { num: fps.numerator(), den: fps.denominator() }),
                    pid,
                    codec,
                    video: Some(DetectVideoInfo {
                        width,
                        height,
                        format: unsafe { (*params.as_ptr()).format },
                    }),
                    audio: None,
                });
            }
            MediaType::Audio => {
                let channels = unsafe { (*params.as_ptr()).ch_layout.nb_channels };
                if channels == 0 {
                    eprintln!("[detect] skipping audio stream {}: zero channels", stream.index());
                    continue;
                }
                let layout = unsafe { describe_channel_layout(&(*params.as_ptr()).ch_layout as *const _) };
                result.audio.push(DetectStream {
                    index: stream.index(),
                    pts,
                    timebase,
                    fps: None,
                    pid,
                    codec,
                    video: None,
                    audio: Some(DetectAudioInfo { channels, layout }),
                });
            }
            MediaType::Subtitle => {
                result.subtitle.push(DetectStream {
                    index: stream.index(),
                    pts,
                    timebase,
                    fps: None,
                    pid,
                    codec,
                    video: None,
                    audio: None,
                });
            }
            _ => {}
        }
    }

    result
}

/// `av_channel_layout_describe` — the descriptive name (`"stereo"`,
/// `"5.1"`, ...) `detect.c` reports, as opposed to the raw hex mask that
/// `decode`'s segment-info uses. No safe accessor exposes this.
unsafe fn describe_channel_layout(layout: *const ffmpeg::ffi::AVChannelLayout) -> String {
    let mut buf = [0i8; 128];
    let len = ffmpeg::ffi::av_channel_layout_describe(layout, buf.as_mut_ptr(), buf.len());
    if len <= 0 {
        return String::new();
    }
    std::ffi::CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
}
