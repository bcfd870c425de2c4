//! Demuxer/decoder adapter: container open with probe/analyze/skip options,
//! and the explicit-index-or-first-valid-stream resolution shared by every
//! subcommand.

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::Id as CodecId;
use ffmpeg::format::context::Input;
use ffmpeg::media::Type as MediaType;
use std::path::Path;

/// Mirrors `struct file_open_options` — probe/analyze/skip tuning passed to
/// the container on open.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub probe_size: i64,
    pub analyze_duration: i64,
    pub skip_initial_bytes: i64,
    pub seek_by_byte: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            probe_size: 100 << 20,
            analyze_duration: 30 * 1_000_000,
            skip_initial_bytes: 0,
            seek_by_byte: false,
        }
    }
}

/// Open `path` with probe/analyze options set via an `AVDictionary`
/// equivalent, as the original's `open_file_with_opts` does.
pub fn open_with_opts(path: &Path, opts: &OpenOptions) -> Result<Input> {
    let mut dict = ffmpeg::Dictionary::new();
    let probe_size = if opts.probe_size == 0 {
        OpenOptions::default().probe_size
    } else {
        opts.probe_size
    };
    let analyze_duration = if opts.analyze_duration == 0 {
        OpenOptions::default().analyze_duration
    } else {
        opts.analyze_duration
    };
    dict.set("probesize", &probe_size.to_string());
    dict.set("analyzeduration", &analyze_duration.to_string());
    dict.set("skip_initial_bytes", &opts.skip_initial_bytes.to_string());

    eprintln!(
        "[demux] open {}: probesize={probe_size}, analyzeduration={analyze_duration}, skip_initial_bytes={}",
        path.display(),
        opts.skip_initial_bytes
    );

    ffmpeg::format::input_with_dictionary(path, dict)
        .map_err(|e| anyhow!("avformat_open_input failed: {e}"))
}

/// Distinguishes the three ways stream resolution can fail, so the CLI
/// boundary can map each to its own exit code (`spec.md` §6 / `main.c`).
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("stream index {0} is out of bound")]
    OutOfBound(usize),
    #[error("stream {0} found but is not the expected media type")]
    WrongMediaType(usize),
    #[error("no suitable stream found")]
    NotFound,
}

/// Resolve a stream either by explicit index (validated against `media_type`)
/// or by auto-picking the first stream of `media_type` with a valid start
/// time. Shared by `detect`, `index`, `serve`, and `decode`.
pub fn resolve_stream(
    ictx: &Input,
    explicit: Option<usize>,
    media_type: MediaType,
) -> std::result::Result<usize, ResolveError> {
    if let Some(idx) = explicit {
        let stream = ictx.stream(idx).ok_or(ResolveError::OutOfBound(idx))?;
        if stream.parameters().medium() != media_type {
            return Err(ResolveError::WrongMediaType(idx));
        }
        return Ok(idx);
    }
    ictx.streams()
        .filter(|s| s.parameters().medium() == media_type)
        .find(|s| s.start_time() != ffmpeg::ffi::AV_NOPTS_VALUE)
        .map(|s| s.index())
        .ok_or(ResolveError::NotFound)
}

/// Immutable per-stream facts needed by the cache, loader, and encode
/// pipeline, captured once at open time. Mirrors `spec.md` §3's "stream
/// descriptor".
#[derive(Debug, Clone, Copy)]
pub struct StreamDescriptor {
    pub index: usize,
    pub codec_id: CodecId,
    pub width: u32,
    pub height: u32,
    /// Raw `sample_aspect_ratio` from the container, unclamped — may be
    /// `0:1` when unspecified. Reported as-is in INFO; callers doing
    /// arithmetic with it (encode variant dimensions) clamp locally.
    pub sar_num: i32,
    pub sar_den: i32,
    pub fps_num: i32,
    pub fps_den: i32,
    pub time_base_num: i32,
    pub time_base_den: i32,
    pub start_time: i64,
    pub duration: i64,
}

pub fn describe_stream(ictx: &Input, stream_index: usize) -> Result<StreamDescriptor> {
    let stream = ictx
        .stream(stream_index)
        .ok_or_else(|| anyhow!("stream index {stream_index} is out of bound"))?;
    let params = stream.parameters();
    let tb = stream.time_base();
    // `r_frame_rate`, not `avg_frame_rate` — `delta` (and everything derived
    // from it: cache lookups, seek targets, the SCENE_DETECT step) must
    // match `serve.c`'s computation exactly.
    let fps = stream.rate();
    let (width, height, sar_num, sar_den, codec_id) = unsafe {
        let p = params.as_ptr();
        (
            (*p).width as u32,
            (*p).height as u32,
            (*p).sample_aspect_ratio.num,
            (*p).sample_aspect_ratio.den,
            params.id(),
        )
    };
    Ok(StreamDescriptor {
        index: stream_index,
        codec_id,
        width,
        height,
        sar_num,
        sar_den,
        fps_num: fps.numerator().max(1),
        fps_den: fps.denominator().max(1),
        time_base_num: tb.numerator(),
        time_base_den: tb.denominator(),
        start_time: stream.start_time(),
        duration: stream.duration(),
    })
}

/// `delta` per `spec.md` §3: the nominal inter-frame PTS increment.
pub fn compute_delta(descriptor: &StreamDescriptor) -> i64 {
    (descriptor.time_base_den as i64 * descriptor.fps_den as i64)
        / (descriptor.time_base_num as i64 * descriptor.fps_num as i64)
}

/// `seek_amount` per `spec.md` §3: codec-dependent, grounded in
/// `serve.c::serve_stream`'s exact codec check.
pub fn seek_amount_for(codec_id: CodecId) -> i64 {
    match codec_id {
        CodecId::MPEG2VIDEO | CodecId::H264 => 40,
        _ => 30,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SeekMode {
    PtsBackward,
    Byte,
}

/// Seek the container directly via FFI — the safe range-based `seek()` API
/// has no way to request `AVSEEK_FLAG_BYTE`, matching the teacher's existing
/// precedent of dropping to FFI where the safe wrapper falls short.
pub fn seek(ictx: &mut Input, stream_index: usize, target: i64, mode: SeekMode) -> Result<()> {
    let flags = match mode {
        SeekMode::PtsBackward => ffmpeg::ffi::AVSEEK_FLAG_BACKWARD,
        SeekMode::Byte => ffmpeg::ffi::AVSEEK_FLAG_BYTE,
    };
    unsafe {
        let ret = ffmpeg::ffi::av_seek_frame(
            ictx.as_mut_ptr(),
            stream_index as i32,
            target,
            flags as i32,
        );
        if ret < 0 {
            return Err(anyhow!("av_seek_frame() = {ret}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(time_base_num: i32, time_base_den: i32, fps_num: i32, fps_den: i32) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            codec_id: CodecId::H264,
            width: 1920,
            height: 1080,
            sar_num: 1,
            sar_den: 1,
            fps_num,
            fps_den,
            time_base_num,
            time_base_den,
            start_time: 0,
            duration: 0,
        }
    }

    #[test]
    fn compute_delta_matches_ntsc_film_cadence() {
        // 30000/1001 fps, 1/90000 time base: delta = 90000*1001/(1*30000) = 3003.
        let d = descriptor(1, 90_000, 30_000, 1001);
        assert_eq!(compute_delta(&d), 3003);
    }

    #[test]
    fn compute_delta_integer_fps() {
        let d = descriptor(1, 25, 25, 1);
        assert_eq!(compute_delta(&d), 1);
    }

    #[test]
    fn seek_amount_depends_on_codec() {
        assert_eq!(seek_amount_for(CodecId::H264), 40);
        assert_eq!(seek_amount_for(CodecId::MPEG2VIDEO), 40);
        assert_eq!(seek_amount_for(CodecId::HEVC), 30);
        assert_eq!(seek_amount_for(CodecId::VP9), 30);
    }

    #[test]
    fn resolve_error_display_names_the_stream() {
        let err = ResolveError::OutOfBound(4);
        assert!(err.to_string().contains('4'));
    }
}
