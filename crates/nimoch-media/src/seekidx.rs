//! Internal seek index builder (`spec.md` §4.2), distinct from the
//! standalone `index` CLI utility in `index_cmd.rs`. A single linear pass:
//! read every packet, decode those on the selected stream, and on each
//! successful decode record `(frame.pts, packet.pos)`.

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::util::frame::video::Video;

use nimoch_core::seek_index::{SeekIndex, SeekIndexEntry};

pub fn build_index(ictx: &mut Input, stream_index: usize) -> Result<SeekIndex> {
    let dec_ctx = {
        let stream = ictx
            .stream(stream_index)
            .ok_or_else(|| anyhow!("stream {stream_index} out of bound"))?;
        ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
    };
    let mut decoder = dec_ctx.decoder().video()?;

    let mut entries = Vec::new();
    for result in ictx.packets() {
        let (stream, packet) = result.map_err(|e| anyhow!("read packet: {e}"))?;
        if stream.index() != stream_index {
            continue;
        }
        if packet.is_corrupt() {
            continue;
        }
        let pos = packet.position() as i64;
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        let mut frame = Video::empty();
        while decoder.receive_frame(&mut frame).is_ok() {
            if let Some(pts) = frame.pts() {
                entries.push(SeekIndexEntry { pts, byte_pos: pos });
            }
        }
    }

    // `build_index_stream` in `helper.c` returns its entries in demuxer
    // order without sorting; `spec.md` is explicit that the index must be
    // sorted by PTS, so `SeekIndex::build` does that here.
    Ok(SeekIndex::build(entries))
}
