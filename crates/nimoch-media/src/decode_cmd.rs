//! `decode` utility: linear range-based video/audio export over one or more
//! `(start_pts, end_pts)` cut points. Grounded in `decode.c`.

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::audio::Audio;
use ffmpeg::util::frame::video::Video;
use std::io::Write;

use crate::demux::{self, StreamDescriptor};
use nimoch_core::schema::SegmentInfo;
use nimoch_core::seek_index::SeekIndex;

const AUDIO_RATE: i32 = 48_000;

/// `DELTA` in `decode.c`: how far before `start` to land the pre-range
/// seek, in stream time-base units.
fn seek_delta(descriptor: &StreamDescriptor) -> i64 {
    2 * descriptor.time_base_den as i64 / descriptor.time_base_num as i64
}

fn open_video_decoder(
    ictx: &Input,
    stream_index: usize,
) -> Result<ffmpeg::decoder::video::Video> {
    let stream = ictx
        .stream(stream_index)
        .ok_or_else(|| anyhow!("stream {stream_index} out of bound"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    Ok(ctx.decoder().video()?)
}

fn open_audio_decoder(
    ictx: &Input,
    stream_index: usize,
) -> Result<ffmpeg::decoder::audio::Audio> {
    let stream = ictx
        .stream(stream_index)
        .ok_or_else(|| anyhow!("stream {stream_index} out of bound"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    Ok(ctx.decoder().audio()?)
}

fn seek_before_range(
    ictx: &mut Input,
    descriptor: &StreamDescriptor,
    seek_index: Option<&SeekIndex>,
    start: i64,
) -> Result<()> {
    let target = start - seek_delta(descriptor);
    if target <= descriptor.start_time {
        return Ok(());
    }
    match seek_index {
        Some(index) => {
            let byte_pos = index.nearest_earlier(target).map(|e| e.byte_pos).unwrap_or(0);
            demux::seek(ictx, descriptor.index, byte_pos, demux::SeekMode::Byte)
        }
        None => demux::seek(ictx, descriptor.index, target, demux::SeekMode::PtsBackward),
    }
}

fn next_video_frame(
    ictx: &mut Input,
    decoder: &mut ffmpeg::decoder::video::Video,
    stream_index: usize,
) -> Result<Option<Video>> {
    loop {
        match ictx.packets().next() {
            Some(Ok((stream, packet))) => {
                if stream.index() != stream_index || packet.is_corrupt() {
                    continue;
                }
                if decoder.send_packet(&packet).is_err() {
                    continue;
                }
                let mut frame = Video::empty();
                if decoder.receive_frame(&mut frame).is_ok() {
                    return Ok(Some(frame));
                }
            }
            Some(Err(e)) => return Err(anyhow!("read packet: {e}")),
            None => return Ok(None),
        }
    }
}

/// Write YUV4MPEG2 to `out` for every `(start, end)` pair in `cuts`.
pub fn decode_video<W: Write>(
    ictx: &mut Input,
    descriptor: &StreamDescriptor,
    seek_index: Option<&SeekIndex>,
    cuts: &[(i64, i64)],
    out: &mut W,
) -> Result<()> {
    let mut decoder = open_video_decoder(ictx, descriptor.index)?;
    let delta = demux::compute_delta(descriptor);

    writeln!(
        out,
        "YUV4MPEG2 W{} H{} F{}:{} It A{}:{} C420",
        descriptor.width,
        descriptor.height,
        descriptor.fps_num,
        descriptor.fps_den,
        descriptor.sar_num,
        descriptor.sar_den
    )?;

    for &(start, end) in cuts {
        seek_before_range(ictx, descriptor, seek_index, start)?;
        decoder.flush();

        let mut current: Option<Video> = None;
        let mut cursor = start;

        while cursor < end {
            loop {
                let covers = current
                    .as_ref()
                    .and_then(|f| f.pts())
                    .map(|pts| cursor < pts + delta)
                    .unwrap_or(false);
                if covers {
                    break;
                }
                match next_video_frame(ictx, &mut decoder, descriptor.index)? {
                    Some(f) => current = Some(f),
                    None => break,
                }
                if current.is_none() {
                    break;
                }
            }
            match &current {
                Some(frame) => write_yuv_frame(frame, out)?,
                None => break,
            }
            cursor += delta;
        }
    }

    Ok(())
}

fn write_yuv_frame<W: Write>(frame: &Video, out: &mut W) -> Result<()> {
    writeln!(out, "FRAME")?;
    for plane in 0..3 {
        let (w, h) = if plane == 0 {
            (frame.width() as usize, frame.height() as usize)
        } else {
            ((frame.width() as usize + 1) / 2, (frame.height() as usize + 1) / 2)
        };
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..h {
            out.write_all(&data[row * stride..row * stride + w])?;
        }
    }
    Ok(())
}

struct ResamplerState {
    resampler: resampling::Context,
    channels: i32,
    layout_mask: u64,
    frames_written: i32,
    segment_start: i64,
}

/// Raw channel-layout bitmask, read via FFI the same way `detect_cmd.rs`
/// reads `AVCodecParameters.ch_layout` — no safe accessor exposes it.
fn layout_mask(layout: &ChannelLayout) -> u64 {
    unsafe { (*layout.as_ptr()).u.mask }
}

/// Resample and write raw interleaved S16 samples for every `(start, end)`
/// pair, gap-filling by repeating the last written sample — both the
/// pre-roll gap before the first frame and the post-range gap after
/// decoding ends, matching `decode.c` exactly (`spec.md`'s third Open
/// Question resolves to "repeat").
pub fn decode_audio<W: Write>(
    ictx: &mut Input,
    descriptor: &StreamDescriptor,
    seek_index: Option<&SeekIndex>,
    cuts: &[(i64, i64)],
    out: &mut W,
) -> Result<Vec<SegmentInfo>> {
    let mut decoder = open_audio_decoder(ictx, descriptor.index)?;
    let mut segments = Vec::new();
    let mut last_sample: Vec<u8> = Vec::new();

    for &(start, end) in cuts {
        seek_before_range(ictx, descriptor, seek_index, start)?;
        decoder.flush();

        let samples_to_write = range_sample_count(descriptor, start, end);
        let mut samples_written: i64 = 0;
        let mut state: Option<ResamplerState> = None;
        let mut first_decode = true;

        'packets: loop {
            let (stream_idx, packet) = match ictx.packets().next() {
                Some(Ok((s, p))) => (s.index(), p),
                Some(Err(e)) => return Err(anyhow!("read packet: {e}")),
                None => break 'packets,
            };
            if stream_idx != descriptor.index || packet.is_corrupt() {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }

            let mut raw = Audio::empty();
            while decoder.receive_frame(&mut raw).is_ok() {
                let layout = raw.ch_layout();
                let mask = layout_mask(&layout);
                let need_new_resampler = match &state {
                    None => true,
                    Some(s) => s.layout_mask != mask,
                };
                if need_new_resampler {
                    if let Some(prev) = state.take() {
                        segments.push(SegmentInfo {
                            start: prev.segment_start as u64,
                            end: start as u64 + samples_written as u64,
                            layout: format!("{:x}", prev.layout_mask),
                            channels: prev.channels as i32,
                            format: "s16".to_string(),
                            sample_rate: AUDIO_RATE,
                            frames: prev.frames_written,
                        });
                    }
                    let resampler = resampling::Context::get2(
                        raw.format(),
                        layout,
                        raw.rate(),
                        Sample::I16(SampleType::Packed),
                        layout,
                        AUDIO_RATE as u32,
                    )?;
                    state = Some(ResamplerState {
                        resampler,
                        channels: layout.channels() as i32,
                        layout_mask: mask,
                        frames_written: 0,
                        segment_start: start,
                    });
                }

                let s = state.as_mut().expect("resampler state just ensured");
                let mut resampled = Audio::empty();
                if s.resampler.run(&raw, &mut resampled).is_err() || resampled.samples() == 0 {
                    continue;
                }

                let bytes = resampled.data(0);
                let frame_bytes = resampled.samples() * s.channels as usize * 2;
                let frame_bytes = frame_bytes.min(bytes.len());

                if first_decode {
                    // Pre-roll gap: the first decoded frame's PTS can land
                    // after `start` (the pre-range seek only guarantees
                    // landing at or before it), per `decode.c`'s
                    // `pts_to_sample(frame->pts - start)`.
                    let gap_samples = raw
                        .pts()
                        .filter(|&pts| pts > start)
                        .map(|pts| range_sample_count(descriptor, start, pts))
                        .unwrap_or(0);
                    if gap_samples > 0 && frame_bytes > 0 {
                        let one_sample = &bytes[0..(s.channels as usize * 2)];
                        for _ in 0..gap_samples {
                            out.write_all(one_sample)?;
                        }
                        samples_written += gap_samples;
                        s.frames_written += gap_samples as i32;
                    }
                    first_decode = false;
                }

                out.write_all(&bytes[0..frame_bytes])?;
                let written_samples = (frame_bytes / (s.channels as usize * 2)) as i64;
                samples_written += written_samples;
                s.frames_written += written_samples as i32;
                if frame_bytes >= s.channels as usize * 2 {
                    last_sample = bytes[frame_bytes - s.channels as usize * 2..frame_bytes].to_vec();
                }

                if samples_written >= samples_to_write {
                    break 'packets;
                }
            }
        }

        if samples_written < samples_to_write && !last_sample.is_empty() {
            let remaining = samples_to_write - samples_written;
            for _ in 0..remaining {
                out.write_all(&last_sample)?;
            }
            if let Some(s) = state.as_mut() {
                s.frames_written += remaining as i32;
            }
            samples_written = samples_to_write;
        }

        if let Some(s) = state.take() {
            segments.push(SegmentInfo {
                start: s.segment_start as u64,
                end: (start as i64 + samples_written) as u64,
                layout: format!("{:x}", s.layout_mask),
                channels: s.channels as i32,
                format: "s16".to_string(),
                sample_rate: AUDIO_RATE,
                frames: s.frames_written,
            });
        }
    }

    Ok(segments)
}

fn range_sample_count(descriptor: &StreamDescriptor, start: i64, end: i64) -> i64 {
    let secs = (end - start) as f64 * descriptor.time_base_num as f64 / descriptor.time_base_den as f64;
    (secs * AUDIO_RATE as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(time_base_num: i32, time_base_den: i32) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            codec_id: ffmpeg::codec::Id::H264,
            width: 1920,
            height: 1080,
            sar_num: 1,
            sar_den: 1,
            fps_num: 25,
            fps_den: 1,
            time_base_num,
            time_base_den,
            start_time: 0,
            duration: 0,
        }
    }

    #[test]
    fn seek_delta_is_two_seconds_in_timebase_units() {
        let d = descriptor(1, 90_000);
        assert_eq!(seek_delta(&d), 180_000);
    }

    #[test]
    fn range_sample_count_one_second_at_90khz_timebase() {
        let d = descriptor(1, 90_000);
        assert_eq!(range_sample_count(&d, 0, 90_000), AUDIO_RATE as i64);
    }

    #[test]
    fn range_sample_count_rounds_to_nearest_sample() {
        let d = descriptor(1, 1000);
        // 33ms at 48kHz = 1584 samples exactly.
        assert_eq!(range_sample_count(&d, 0, 33), 1584);
    }
}
