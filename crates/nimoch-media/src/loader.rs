//! Frame loader: the decision procedure that turns a requested PTS into a
//! cache index, seeking and decoding forward as needed. Ground truth is
//! `serve.c::load_frame` + `cache_next_frame` — note this deliberately does
//! NOT drain every frame per packet the way `decode.rs::next_frame` does;
//! it tries `receive_frame` exactly once per packet, matching the original.

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::util::frame::video::Video;
use std::path::{Path, PathBuf};

use nimoch_core::frame_cache::{FindResult, FrameCache, FrameRecord};
use nimoch_core::seek_index::SeekIndex;

use crate::demux::{self, OpenOptions, SeekMode, StreamDescriptor};

#[derive(Debug, Clone, Copy)]
pub struct CacheParams {
    pub capacity: usize,
    pub delta: i64,
    pub seek_threshold: i64,
    pub seek_amount: i64,
}

pub struct FrameLoader {
    #[allow(dead_code)]
    path: PathBuf,
    ictx: Input,
    decoder: ffmpeg::decoder::video::Video,
    stream_index: usize,
    cache: FrameCache<Video>,
    seek_index: Option<SeekIndex>,
}

impl FrameLoader {
    pub fn open(
        path: &Path,
        opts: &OpenOptions,
        descriptor: &StreamDescriptor,
        cache_params: CacheParams,
        seek_index: Option<SeekIndex>,
    ) -> Result<Self> {
        let ictx = demux::open_with_opts(path, opts)?;

        // Second context for decoder construction, same pattern as
        // `LiveDecoder::open` — avoids a borrow conflict between the first
        // context's `Parameters` and subsequent packet reads on it.
        let ictx2 = demux::open_with_opts(path, opts)?;
        let stream2 = ictx2
            .stream(descriptor.index)
            .ok_or_else(|| anyhow!("stream {} disappeared on reopen", descriptor.index))?;
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?;
        let decoder = dec_ctx.decoder().video()?;

        let cache = FrameCache::new(
            cache_params.capacity,
            cache_params.delta,
            cache_params.seek_threshold,
            cache_params.seek_amount,
        );

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            stream_index: descriptor.index,
            cache,
            seek_index,
        })
    }

    pub fn cache(&self) -> &FrameCache<Video> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FrameCache<Video> {
        &mut self.cache
    }

    /// Decode and admit up to `count` frames from the current position,
    /// used at startup to seed the cache and discover `first_pts`.
    pub fn prime(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            if !self.cache_next_frame()? {
                break;
            }
        }
        Ok(())
    }

    pub fn first_resident_pts(&self) -> Option<i64> {
        self.cache.get(0).map(|f| f.pts)
    }

    /// Given target `pts`, return the index of a resident frame, `None`
    /// if decoding ran to EOF (or a real decode error) without satisfying
    /// the request, per `spec.md` §4.4. `allow_nearest` corresponds to
    /// `args[1] = decode_mode` in `spec.md` §6.1: when false, overshooting
    /// the target returns absent rather than substituting the nearest
    /// resident frame.
    pub fn load_frame(&mut self, pts: i64, allow_nearest: bool) -> Result<Option<usize>> {
        match self.cache.find(pts) {
            FindResult::Hit(idx) => return Ok(Some(idx)),
            FindResult::MissNearForward => {}
            FindResult::MissFar => {
                let seek_target = pts - self.cache.delta() * self.cache.seek_amount();
                self.cache.reset_pts_last();
                self.seek_to(seek_target)?;
                self.decoder.flush();
            }
        }

        loop {
            if !self.cache_next_frame()? {
                return Ok(None);
            }
            let newest = self.cache.pts_last().expect("cache_next_frame admitted a frame");
            if newest == pts {
                if let FindResult::Hit(idx) = self.cache.find(pts) {
                    return Ok(Some(idx));
                }
            } else if newest > pts {
                return Ok(if allow_nearest {
                    self.cache.find_nearest(pts)
                } else {
                    None
                });
            }
        }
    }

    fn seek_to(&mut self, target: i64) -> Result<()> {
        if let Some(index) = &self.seek_index {
            let byte_pos = index.nearest_earlier(target).map(|e| e.byte_pos).unwrap_or(0);
            demux::seek(&mut self.ictx, self.stream_index, byte_pos, SeekMode::Byte)
        } else {
            demux::seek(&mut self.ictx, self.stream_index, target, SeekMode::PtsBackward)
        }
    }

    /// Read one packet at a time, trying `receive_frame` exactly once per
    /// packet; discards other-stream and corrupt-flagged packets. Returns
    /// `Ok(true)` once a frame is admitted, `Ok(false)` on EOF.
    fn cache_next_frame(&mut self) -> Result<bool> {
        loop {
            let (stream_idx, packet) = match self.next_packet()? {
                Some(p) => p,
                None => return Ok(false),
            };
            if stream_idx != self.stream_index {
                continue;
            }
            if packet.is_corrupt() {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut frame = Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    let pts = frame.pts().unwrap_or_else(|| self.cache.pts_last().unwrap_or(0) + self.cache.delta());
                    let duration = self.cache.delta();
                    self.cache.add(FrameRecord::new(pts, duration, frame));
                    return Ok(true);
                }
                Err(_) => continue,
            }
        }
    }

    fn next_packet(&mut self) -> Result<Option<(usize, ffmpeg::Packet)>> {
        match self.ictx.packets().next() {
            Some(Ok((stream, packet))) => Ok(Some((stream.index(), packet))),
            Some(Err(e)) => Err(anyhow!("read packet: {e}")),
            None => Ok(None),
        }
    }
}
