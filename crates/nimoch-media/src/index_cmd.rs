//! `index` utility: IDR-frame-aligned PTS/byte-offset list. This is a
//! *different* index from the internal seek index in `seekidx.rs` — see
//! `spec.md` §4.9. Grounded in `index.c`.

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;

use nimoch_core::schema::{IndexFrameEntry, IndexInfo, IndexResult, Rational};

const MAX_GOP_BUFFER: usize = 60;

pub fn run(ictx: &mut Input, stream_index: usize) -> Result<IndexResult> {
    let tb = ictx
        .stream(stream_index)
        .ok_or_else(|| anyhow!("stream {stream_index} out of bound"))?
        .time_base();

    let mut frames: Vec<IndexFrameEntry> = Vec::new();
    let mut pending: Vec<IndexFrameEntry> = Vec::new();
    let mut started = false;

    for result in ictx.packets() {
        let (stream, packet) = result.map_err(|e| anyhow!("read packet: {e}"))?;
        if stream.index() != stream_index {
            continue;
        }
        if packet.is_corrupt() {
            continue;
        }
        let is_key = packet.is_key();

        if !started {
            if !is_key {
                continue;
            }
            started = true;
        }

        // A new key frame flushes (PTS-sorted) whatever the previous GOP
        // accumulated. Frames after the *last* key frame are never
        // flushed — deliberate in the original, preserved here.
        if is_key && !pending.is_empty() {
            pending.sort_by_key(|e| e.pts);
            frames.append(&mut pending);
        }

        let pts = packet.pts().unwrap_or(0);
        let pos = packet.position() as i64;
        if pending.len() >= MAX_GOP_BUFFER {
            eprintln!("[index] GOP buffer overflow at pts={pts}, dropping frame");
            continue;
        }
        pending.push(IndexFrameEntry { pts, pos });
    }

    let num_frames = frames.len();
    let first_last_pts = match (frames.first(), frames.last()) {
        (Some(first), Some(last)) => Some((first.pts, last.pts)),
        _ => None,
    };
    let fps = compute_fps(num_frames, first_last_pts, tb.numerator(), tb.denominator());

    Ok(IndexResult {
        frames,
        stream: stream_index as i32,
        timebase: Rational { num: tb.numerator(), den: tb.denominator() },
        info: IndexInfo { num_frames, fps: format!("{fps:.3}") },
    })
}

/// `(num_frames - 1) * tb.den / (last_pts - first_pts) / tb.num`, as
/// `index.c` computes it; `0.0` when there's not enough data to divide by.
fn compute_fps(num_frames: usize, first_last_pts: Option<(i64, i64)>, tb_num: i32, tb_den: i32) -> f64 {
    match first_last_pts {
        Some((first_pts, last_pts)) if num_frames > 1 && last_pts != first_pts => {
            (num_frames as f64 - 1.0) * tb_den as f64 / (last_pts - first_pts) as f64 / tb_num as f64
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_fps_from_pts_span() {
        // 25 frames spanning 1 second at a 1/25 time base => 25fps exactly.
        let fps = compute_fps(25, Some((0, 24)), 1, 25);
        assert!((fps - 25.0).abs() < 1e-9);
    }

    #[test]
    fn compute_fps_zero_when_too_few_frames() {
        assert_eq!(compute_fps(1, Some((0, 0)), 1, 25), 0.0);
        assert_eq!(compute_fps(0, None, 1, 25), 0.0);
    }

    #[test]
    fn compute_fps_zero_on_degenerate_pts_span() {
        assert_eq!(compute_fps(10, Some((5, 5)), 1, 25), 0.0);
    }
}
