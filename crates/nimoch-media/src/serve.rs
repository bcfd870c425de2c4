//! The synchronous request/response loop tying the protocol, loader,
//! encoder, and scene scorer together. Grounded in `serve.c::do_serve` /
//! `serve_stream`, including one explicit fix over the original: the
//! `SCENE_DETECT` 404 branch returns immediately instead of falling
//! through onto a null base frame (a latent bug in the original).

use anyhow::Result;
use ffmpeg_the_third::media::Type as MediaType;
use std::io::{Read, Write};
use std::path::Path;

use nimoch_core::protocol::{
    ServeCommand, ServeResponse, CODE_BAD_REQUEST, CODE_INTERNAL_ERROR, CODE_NOT_FOUND,
    COMMAND_IMAGE, COMMAND_INFO, COMMAND_QUIT, COMMAND_SCENE_DETECT,
};
use nimoch_core::scene::{SceneDetectContext, MAX_SCENE_CHANGE_SCORE};
use nimoch_core::schema::{InfoPayload, Rational, SceneDetectPayload};

use crate::demux::{self, OpenOptions, StreamDescriptor};
use crate::encode::EncodePipeline;
use crate::loader::{CacheParams, FrameLoader};
use crate::scene::y_plane_sum;
use crate::seekidx;

const DEFAULT_CAPACITY: usize = 120;
const SEEK_THRESHOLD: i64 = 30;

pub struct ServeContext {
    loader: FrameLoader,
    encoder: EncodePipeline,
    descriptor: StreamDescriptor,
    first_pts: i64,
}

impl ServeContext {
    pub fn open(
        path: &Path,
        opts: &OpenOptions,
        stream_index: Option<usize>,
        seek_by_byte: bool,
    ) -> Result<Self> {
        let seek_index = if seek_by_byte {
            let mut ictx = demux::open_with_opts(path, opts)?;
            let resolved = demux::resolve_stream(&ictx, stream_index, MediaType::Video)?;
            Some(seekidx::build_index(&mut ictx, resolved)?)
        } else {
            None
        };

        let ictx = demux::open_with_opts(path, opts)?;
        let resolved = demux::resolve_stream(&ictx, stream_index, MediaType::Video)?;
        let descriptor = demux::describe_stream(&ictx, resolved)?;
        drop(ictx);

        let delta = demux::compute_delta(&descriptor);
        let seek_amount = demux::seek_amount_for(descriptor.codec_id);
        let cache_params = CacheParams {
            capacity: DEFAULT_CAPACITY,
            delta,
            seek_threshold: SEEK_THRESHOLD,
            seek_amount,
        };

        let mut loader = FrameLoader::open(path, opts, &descriptor, cache_params, seek_index)?;
        loader.prime(2)?;
        let first_pts = loader.first_resident_pts().unwrap_or(descriptor.start_time);

        if let Some((start, end)) = loader.cache().pts_range() {
            if end - start != delta {
                eprintln!(
                    "[serve] warning: pts_range_end - pts_range_start ({}) != delta ({delta})",
                    end - start
                );
            }
        }

        let encoder = EncodePipeline::open(&descriptor)?;

        Ok(Self { loader, encoder, descriptor, first_pts })
    }

    /// Run until `QUIT` or EOF on the command stream, per `spec.md` §4.7.
    pub fn serve<R: Read, W: Write>(&mut self, input: &mut R, output: &mut W) -> Result<()> {
        loop {
            let command = match ServeCommand::read_from(input)? {
                Some(c) => c,
                None => return Ok(()),
            };

            if command.command == COMMAND_QUIT {
                ServeResponse::ok(Vec::new()).write_to(output)?;
                return Ok(());
            }

            self.dispatch(&command).write_to(output)?;
        }
    }

    fn dispatch(&mut self, command: &ServeCommand) -> ServeResponse {
        match command.command {
            COMMAND_INFO => self.handle_info(),
            COMMAND_IMAGE => self.handle_image(command.args[0], command.args[1], command.args[2]),
            COMMAND_SCENE_DETECT => self.handle_scene_detect(
                command.args[0],
                command.args[1],
                command.args[2],
                command.args[3],
            ),
            _ => ServeResponse::error(CODE_BAD_REQUEST),
        }
    }

    fn handle_info(&self) -> ServeResponse {
        let payload = InfoPayload {
            stream: self.descriptor.index as i32,
            timebase: Rational { num: self.descriptor.time_base_num, den: self.descriptor.time_base_den },
            fps: Rational { num: self.descriptor.fps_num, den: self.descriptor.fps_den },
            start_time: self.descriptor.start_time,
            first_pts: self.first_pts,
            width: self.descriptor.width as i32,
            height: self.descriptor.height as i32,
            aspect_ratio: Rational { num: self.descriptor.sar_num, den: self.descriptor.sar_den },
            duration: self.descriptor.duration,
        };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => ServeResponse::ok(bytes),
            Err(e) => {
                eprintln!("[serve] INFO serialization failed: {e}");
                ServeResponse::error(CODE_INTERNAL_ERROR)
            }
        }
    }

    fn handle_image(&mut self, pts: i64, decode_mode: i64, variant: i64) -> ServeResponse {
        if !(0..8).contains(&variant) {
            return ServeResponse::error(CODE_BAD_REQUEST);
        }
        let allow_nearest = decode_mode != 0;
        let idx = match self.loader.load_frame(pts, allow_nearest) {
            Ok(Some(idx)) => idx,
            Ok(None) => return ServeResponse::error(CODE_NOT_FOUND),
            Err(e) => {
                eprintln!("[serve] IMAGE load_frame failed: {e}");
                return ServeResponse::error(CODE_INTERNAL_ERROR);
            }
        };

        let variant = variant as usize;
        let cached = self.loader.cache().get(idx).and_then(|f| f.encoded[variant].clone());
        if let Some(bytes) = cached {
            return ServeResponse::ok(bytes);
        }

        let decoded = match self.loader.cache().get(idx) {
            Some(f) => f.decoded.clone(),
            None => return ServeResponse::error(CODE_INTERNAL_ERROR),
        };
        match self.encoder.encode(&decoded, variant) {
            Ok(bytes) => {
                if let Some(f) = self.loader.cache_mut().get_mut(idx) {
                    f.encoded[variant] = Some(bytes.clone());
                }
                ServeResponse::ok(bytes)
            }
            Err(e) => {
                eprintln!("[serve] encode variant {variant} failed: {e}");
                ServeResponse::error(CODE_INTERNAL_ERROR)
            }
        }
    }

    /// The original's 404 branch here falls through onto a null base
    /// frame; this returns immediately instead.
    fn handle_scene_detect(&mut self, base_pts: i64, flags: i64, max_frames: i64, cutoff: i64) -> ServeResponse {
        let backward = flags & 1 != 0;
        let max_frames = if max_frames <= 0 { 100 } else { max_frames.clamp(1, 2000) };
        let cutoff = if cutoff <= 0 || cutoff >= MAX_SCENE_CHANGE_SCORE {
            MAX_SCENE_CHANGE_SCORE
        } else {
            cutoff
        };

        let base_idx = match self.loader.load_frame(base_pts, true) {
            Ok(Some(idx)) => idx,
            Ok(None) => return ServeResponse::error(CODE_NOT_FOUND),
            Err(e) => {
                eprintln!("[serve] SCENE_DETECT base load_frame failed: {e}");
                return ServeResponse::error(CODE_INTERNAL_ERROR);
            }
        };

        let base_sum = match self.loader.cache().get(base_idx) {
            Some(f) => y_plane_sum(&f.decoded),
            None => return ServeResponse::error(CODE_INTERNAL_ERROR),
        };

        let delta = self.loader.cache().delta();
        let mut ctx = SceneDetectContext::new(base_sum);
        let mut scores = Vec::new();
        let mut pts = base_pts;

        for _ in 0..max_frames {
            pts = if backward { pts - delta } else { pts + delta };
            let idx = match self.loader.load_frame(pts, true) {
                Ok(Some(idx)) => idx,
                Ok(None) => break,
                Err(e) => {
                    eprintln!("[serve] SCENE_DETECT step load_frame failed: {e}");
                    return ServeResponse::error(CODE_INTERNAL_ERROR);
                }
            };
            let sum = match self.loader.cache().get(idx) {
                Some(f) => y_plane_sum(&f.decoded),
                None => break,
            };
            let score = ctx.score(sum);
            let over_cutoff = score > cutoff;
            scores.push(score);
            if over_cutoff {
                break;
            }
        }

        let payload = SceneDetectPayload { scores };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => ServeResponse::ok(bytes),
            Err(e) => {
                eprintln!("[serve] SCENE_DETECT serialization failed: {e}");
                ServeResponse::error(CODE_INTERNAL_ERROR)
            }
        }
    }
}
