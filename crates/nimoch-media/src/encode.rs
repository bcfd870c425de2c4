//! The eight-variant (scale × codec) encode pipeline from `spec.md` §4.5.
//! Variants 0-3 (RGB24/PNG) are encoded with the `png` crate directly,
//! matching `decode.rs::emit_frame`'s existing PNG path. Variants 4-7
//! (YUVJ420P/MJPEG) go through a standalone `ffmpeg-the-third` encoder
//! context with no muxer, one packet per request.

use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::Packet;

use crate::demux::StreamDescriptor;

pub const VARIANT_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariantFormat {
    Png,
    Mjpeg,
}

#[derive(Debug, Clone, Copy)]
struct VariantSpec {
    width: u32,
    height: u32,
    format: VariantFormat,
}

fn variant_specs(d: &StreamDescriptor) -> [VariantSpec; VARIANT_COUNT] {
    let w = d.width;
    let h = d.height;
    let w_half = w / 2;
    let h_half = h / 2;
    // `StreamDescriptor::sar_num/sar_den` are the raw, possibly-unspecified
    // (`0:1`) container values — clamp to 1:1 here so an unset SAR doesn't
    // collapse these variants to zero width.
    let sar_num = d.sar_num.max(1) as u32;
    let sar_den = d.sar_den.max(1) as u32;
    // Integer division, matching `serve.c`'s exact arithmetic — not rounded.
    let w_sar = w * sar_num / sar_den;
    let w_sar_half = w * sar_num / (2 * sar_den);

    [
        VariantSpec { width: w, height: h, format: VariantFormat::Png },
        VariantSpec { width: w_half, height: h_half, format: VariantFormat::Png },
        VariantSpec { width: w_sar, height: h, format: VariantFormat::Png },
        VariantSpec { width: w_sar_half, height: h_half, format: VariantFormat::Png },
        VariantSpec { width: w, height: h, format: VariantFormat::Mjpeg },
        VariantSpec { width: w_half, height: h_half, format: VariantFormat::Mjpeg },
        VariantSpec { width: w_sar, height: h, format: VariantFormat::Mjpeg },
        VariantSpec { width: w_sar_half, height: h_half, format: VariantFormat::Mjpeg },
    ]
}

/// Everything needed to encode a single variant on demand.
struct Variant {
    spec: VariantSpec,
    scaler: SwsContext,
    mjpeg: Option<ffmpeg::encoder::video::Video>,
}

pub struct EncodePipeline {
    variants: Vec<Variant>,
}

impl EncodePipeline {
    /// Allocate all eight scale contexts (and the four MJPEG encoder
    /// contexts) up front, per `spec.md` §4.5 ("at startup, allocate eight
    /// scale contexts and eight encoder contexts").
    pub fn open(descriptor: &StreamDescriptor) -> Result<Self> {
        let specs = variant_specs(descriptor);
        let mut variants = Vec::with_capacity(VARIANT_COUNT);

        for spec in specs {
            if spec.width == 0 || spec.height == 0 {
                return Err(anyhow!("variant dimensions collapsed to zero"));
            }
            let out_format = match spec.format {
                VariantFormat::Png => Pixel::RGB24,
                VariantFormat::Mjpeg => Pixel::YUVJ420P,
            };
            let scaler = SwsContext::get(
                Pixel::YUV420P,
                descriptor.width,
                descriptor.height,
                out_format,
                spec.width,
                spec.height,
                Flags::BILINEAR,
            )?;

            let mjpeg = match spec.format {
                VariantFormat::Png => None,
                VariantFormat::Mjpeg => Some(open_mjpeg_encoder(spec.width, spec.height)?),
            };

            variants.push(Variant { spec, scaler, mjpeg });
        }

        Ok(Self { variants })
    }

    /// Scale `decoded` into variant `k`'s format and encode it, returning
    /// the encoded bytes. Callers are responsible for caching the result
    /// into `FrameRecord.encoded[k]` — this pipeline never caches.
    pub fn encode(&mut self, decoded: &Video, variant: usize) -> Result<Vec<u8>> {
        let v = self
            .variants
            .get_mut(variant)
            .ok_or_else(|| anyhow!("variant index {variant} out of range"))?;

        let mut out = Video::empty();
        v.scaler.run(decoded, &mut out)?;

        match v.spec.format {
            VariantFormat::Png => encode_png(&out, v.spec.width, v.spec.height),
            VariantFormat::Mjpeg => encode_mjpeg(v.mjpeg.as_mut().expect("mjpeg encoder present"), &mut out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(width: u32, height: u32, sar_num: i32, sar_den: i32) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            codec_id: CodecId::H264,
            width,
            height,
            sar_num,
            sar_den,
            fps_num: 25,
            fps_den: 1,
            time_base_num: 1,
            time_base_den: 25,
            start_time: 0,
            duration: 0,
        }
    }

    #[test]
    fn square_pixels_leave_sar_variants_unscaled() {
        let specs = variant_specs(&descriptor(1920, 1080, 1, 1));
        assert_eq!((specs[2].width, specs[2].height), (1920, 1080));
        assert_eq!((specs[3].width, specs[3].height), (960, 540));
    }

    #[test]
    fn anamorphic_sar_widens_the_sar_variants_only() {
        // 4:3 anamorphic in a 16:9 frame: sar = 16/9 / (4/3) roughly, use 4/3 directly.
        let specs = variant_specs(&descriptor(720, 576, 16, 15));
        assert_eq!(specs[0].width, 720); // full, unscaled
        assert_eq!(specs[2].width, 720 * 16 / 15); // sar-corrected, integer division
        assert_eq!(specs[6].width, specs[2].width); // mjpeg variant mirrors the png one
    }

    #[test]
    fn unspecified_sar_falls_back_to_square_pixels() {
        // `0:1` is how an unset SAR arrives from the container.
        let specs = variant_specs(&descriptor(1920, 1080, 0, 1));
        assert_eq!(specs[2].width, 1920);
        assert_eq!(specs[3].width, 960);
    }

    #[test]
    fn half_scale_variants_use_integer_division() {
        let specs = variant_specs(&descriptor(1921, 1081, 1, 1));
        assert_eq!((specs[1].width, specs[1].height), (960, 540));
    }

    #[test]
    fn variant_formats_alternate_png_then_mjpeg() {
        let specs = variant_specs(&descriptor(640, 480, 1, 1));
        for v in &specs[0..4] {
            assert_eq!(v.format, VariantFormat::Png);
        }
        for v in &specs[4..8] {
            assert_eq!(v.format, VariantFormat::Mjpeg);
        }
    }
}

fn open_mjpeg_encoder(width: u32, height: u32) -> Result<ffmpeg::encoder::video::Video> {
    let mjpeg = encoder::find(CodecId::MJPEG).ok_or_else(|| anyhow!("MJPEG encoder not found"))?;
    let enc_ctx = codec::context::Context::new_with_codec(mjpeg);
    let mut enc = enc_ctx.encoder().video()?;
    enc.set_width(width);
    enc.set_height(height);
    enc.set_format(Pixel::YUVJ420P);
    enc.set_time_base(ffmpeg::util::rational::Rational::new(1, 25));
    let opened = enc.open_as(mjpeg)?;
    Ok(opened)
}

fn encode_mjpeg(encoder: &mut ffmpeg::encoder::video::Video, frame: &mut Video) -> Result<Vec<u8>> {
    frame.set_pts(Some(0));
    encoder
        .send_frame(&*frame)
        .map_err(|e| anyhow!("send frame to MJPEG encoder: {e}"))?;
    let mut packet = Packet::empty();
    encoder
        .receive_packet(&mut packet)
        .map_err(|e| anyhow!("receive MJPEG packet: {e}"))?;
    Ok(packet.data().unwrap_or(&[]).to_vec())
}

/// PNG-encode an RGB24 frame, matching `decode.rs::emit_frame`'s
/// stride-aware row extraction exactly.
fn encode_png(frame: &Video, width: u32, height: u32) -> Result<Vec<u8>> {
    let stride = frame.stride(0);
    let raw = frame.data(0);
    let row_bytes = width as usize * 3;

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        let rows: Vec<&[u8]> = (0..height as usize)
            .map(|row| &raw[row * stride..row * stride + row_bytes])
            .collect();
        writer.write_image_data(&rows.concat())?;
    }
    Ok(out)
}
