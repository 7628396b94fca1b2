//! YUV4MPEG2 stream header parsing and frame (de)serialization.
//!
//! Only planar integer layouts are carried: `mono`/`monoN` for gray and
//! `420`/`422`/`444`/`440`/`411` with an optional `pN` bit depth suffix.
//! Samples deeper than 8 bits are stored as 16 bit little-endian words.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};

use crate::streaming_executor::FrameSink;
use crate::types::{ColorFamily, Frame, Plane, PlaneData, SampleType, VideoFormat, VideoInfo};

pub const STREAM_MAGIC: &str = "YUV4MPEG2";
pub const FRAME_MAGIC: &str = "FRAME";

/// Upper bound on a header or frame marker line.
pub const MAX_LINE_BYTES: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Y4mHeader {
    pub width: u32,
    pub height: u32,
    pub fps_num: u64,
    pub fps_den: u64,
    pub format: VideoFormat,
    /// Pixel aspect ratio from the `A` tag; `None` when absent or `0:0`.
    pub sar: Option<(u64, u64)>,
}

impl Y4mHeader {
    /// Parse a stream header line, with or without its trailing newline.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.trim_end_matches(['\n', '\r']).split(' ');
        if tokens.next() != Some(STREAM_MAGIC) {
            bail!("not a YUV4MPEG2 stream (missing '{STREAM_MAGIC}' signature)");
        }

        let mut width = None;
        let mut height = None;
        let mut fps = (25, 1);
        let mut sar = None;
        let mut colorspace = "420jpeg";

        for token in tokens.filter(|t| !t.is_empty()) {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => width = Some(parse_number::<u32>(value, "width")?),
                Some('H') => height = Some(parse_number::<u32>(value, "height")?),
                Some('F') => fps = parse_ratio(value, "frame rate")?,
                Some('A') => {
                    let ratio = parse_ratio(value, "aspect ratio")?;
                    sar = (ratio.0 != 0 && ratio.1 != 0).then_some(ratio);
                }
                Some('I') => {
                    if value != "p" && value != "?" {
                        warn!(interlacing = value, "Y4M stream is not progressive");
                    }
                }
                Some('C') => colorspace = value,
                _ => debug!(token, "Ignoring YUV4MPEG2 header token"),
            }
        }

        let width = width.ok_or_else(|| anyhow!("YUV4MPEG2 header is missing the W tag"))?;
        let height = height.ok_or_else(|| anyhow!("YUV4MPEG2 header is missing the H tag"))?;
        if width == 0 || height == 0 {
            bail!("YUV4MPEG2 dimensions must be non-zero (got {width}x{height})");
        }
        if fps.0 == 0 || fps.1 == 0 {
            bail!("YUV4MPEG2 frame rate must be non-zero (got {}:{})", fps.0, fps.1);
        }

        Ok(Self {
            width,
            height,
            fps_num: fps.0,
            fps_den: fps.1,
            format: parse_colorspace(colorspace)?,
            sar,
        })
    }

    /// Header describing `info`, which must have a constant integer format.
    pub fn for_video_info(info: &VideoInfo) -> Result<Self> {
        let format = match info.format {
            Some(format) if info.is_constant_format() => format,
            _ => bail!("YUV4MPEG2 output needs a constant format (got {})", info.describe()),
        };
        colorspace_tag(&format)?;

        Ok(Self {
            width: info.width,
            height: info.height,
            fps_num: info.fps_num.max(1),
            fps_den: info.fps_den.max(1),
            format,
            sar: None,
        })
    }

    /// Header line including the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        let mut line = format!(
            "{STREAM_MAGIC} W{} H{} F{}:{} Ip",
            self.width, self.height, self.fps_num, self.fps_den
        );
        if let Some((num, den)) = self.sar {
            line.push_str(&format!(" A{num}:{den}"));
        }
        line.push_str(&format!(" C{}\n", colorspace_tag(&self.format)?));
        Ok(line)
    }

    /// Payload size of one frame, excluding the `FRAME` marker line.
    pub fn frame_bytes(&self) -> usize {
        let bytes_per_sample = self.format.bytes_per_sample() as usize;
        (0..self.format.num_planes())
            .map(|plane| {
                let (w, h) = self.format.plane_dimensions(plane, self.width, self.height);
                w as usize * h as usize * bytes_per_sample
            })
            .sum()
    }

    pub fn video_info(&self, num_frames: u64) -> VideoInfo {
        VideoInfo {
            format: Some(self.format),
            width: self.width,
            height: self.height,
            num_frames,
            fps_num: self.fps_num,
            fps_den: self.fps_den,
        }
    }

    /// Decode one frame payload into planes.
    pub fn decode_frame(&self, payload: &[u8]) -> Result<Frame> {
        if payload.len() != self.frame_bytes() {
            bail!(
                "Y4M frame payload is {} bytes, expected {}",
                payload.len(),
                self.frame_bytes()
            );
        }

        let mut planes = Vec::with_capacity(self.format.num_planes());
        let mut rest = payload;
        for index in 0..self.format.num_planes() {
            let (w, h) = self.format.plane_dimensions(index, self.width, self.height);
            let (w, h) = (w as usize, h as usize);
            let plane = if self.format.bytes_per_sample() == 1 {
                let (bytes, tail) = rest.split_at(w * h);
                rest = tail;
                PlaneData::U8(Plane::from_vec(w, h, bytes.to_vec())?)
            } else {
                let (bytes, tail) = rest.split_at(w * h * 2);
                rest = tail;
                let samples = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                PlaneData::U16(Plane::from_vec(w, h, samples)?)
            };
            planes.push(plane);
        }

        let mut frame = Frame::from_planes(self.format, self.width, self.height, planes)?;
        frame
            .props
            .insert("_DurationNum".to_string(), self.fps_den.into());
        frame
            .props
            .insert("_DurationDen".to_string(), self.fps_num.into());
        if let Some((num, den)) = self.sar {
            frame.props.insert("_SARNum".to_string(), num.into());
            frame.props.insert("_SARDen".to_string(), den.into());
        }
        Ok(frame)
    }

    /// Write the `FRAME` marker and payload for `frame`.
    pub fn encode_frame<W: Write>(&self, frame: &Frame, out: &mut W) -> Result<()> {
        if *frame.format() != self.format
            || frame.width() != self.width
            || frame.height() != self.height
        {
            bail!(
                "frame is {} {}x{}, stream is {} {}x{}",
                frame.format(),
                frame.width(),
                frame.height(),
                self.format,
                self.width,
                self.height
            );
        }

        out.write_all(FRAME_MAGIC.as_bytes())?;
        out.write_all(b"\n")?;
        for plane in frame.planes() {
            match plane {
                PlaneData::U8(p) => {
                    for y in 0..p.height() {
                        out.write_all(p.row(y))?;
                    }
                }
                PlaneData::U16(p) => {
                    let mut row_bytes = Vec::with_capacity(p.width() * 2);
                    for y in 0..p.height() {
                        row_bytes.clear();
                        for sample in p.row(y) {
                            row_bytes.extend_from_slice(&sample.to_le_bytes());
                        }
                        out.write_all(&row_bytes)?;
                    }
                }
                PlaneData::F32(_) => bail!("YUV4MPEG2 cannot store float samples"),
            }
        }
        Ok(())
    }
}

/// `C` tag value for `format`.
pub fn colorspace_tag(format: &VideoFormat) -> Result<String> {
    if format.sample_type != SampleType::Integer || !(8..=16).contains(&format.bits_per_sample) {
        bail!("YUV4MPEG2 cannot carry {format} samples");
    }
    let bits = format.bits_per_sample;

    match format.color_family {
        ColorFamily::Gray if bits == 8 => Ok("mono".to_string()),
        ColorFamily::Gray => Ok(format!("mono{bits}")),
        ColorFamily::Yuv => {
            let layout = match (format.sub_sampling_w, format.sub_sampling_h) {
                (1, 1) if bits == 8 => return Ok("420jpeg".to_string()),
                (1, 1) => "420",
                (1, 0) => "422",
                (0, 0) => "444",
                (0, 1) => "440",
                (2, 0) => "411",
                (w, h) => bail!("YUV4MPEG2 has no chroma layout for subsampling {w}x{h}"),
            };
            if bits == 8 {
                Ok(layout.to_string())
            } else {
                Ok(format!("{layout}p{bits}"))
            }
        }
        ColorFamily::Rgb => bail!("YUV4MPEG2 cannot carry RGB ({format})"),
    }
}

fn parse_colorspace(tag: &str) -> Result<VideoFormat> {
    if let Some(depth) = tag.strip_prefix("mono") {
        let bits = if depth.is_empty() {
            8
        } else {
            parse_depth(depth, tag)?
        };
        return Ok(VideoFormat::gray(SampleType::Integer, bits));
    }

    let (layout, bits) = match tag.split_once('p') {
        Some((layout, depth)) if !layout.is_empty() && depth.chars().all(|c| c.is_ascii_digit()) => {
            (layout, parse_depth(depth, tag)?)
        }
        _ => (tag, 8),
    };
    let (ssw, ssh) = match layout {
        "420" | "420jpeg" | "420paldv" | "420mpeg2" => (1, 1),
        "422" => (1, 0),
        "444" => (0, 0),
        "440" => (0, 1),
        "411" => (2, 0),
        _ => bail!("unsupported YUV4MPEG2 colorspace 'C{tag}'"),
    };
    Ok(VideoFormat::yuv(SampleType::Integer, bits, ssw, ssh))
}

fn parse_depth(depth: &str, tag: &str) -> Result<u32> {
    let bits: u32 = depth
        .parse()
        .with_context(|| format!("invalid bit depth in YUV4MPEG2 colorspace 'C{tag}'"))?;
    if !(8..=16).contains(&bits) {
        bail!("unsupported bit depth {bits} in YUV4MPEG2 colorspace 'C{tag}'");
    }
    Ok(bits)
}

fn parse_number<T>(value: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid YUV4MPEG2 {what} '{value}'"))
}

fn parse_ratio(value: &str, what: &str) -> Result<(u64, u64)> {
    let (num, den) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid YUV4MPEG2 {what} '{value}', expected N:D"))?;
    Ok((parse_number(num, what)?, parse_number(den, what)?))
}

/// Sink writing frames as a YUV4MPEG2 stream.
pub struct Y4mWriter<W: Write + Send + 'static> {
    out: W,
    header: Y4mHeader,
    header_written: bool,
    frames_written: u64,
}

impl Y4mWriter<BufWriter<File>> {
    pub fn create(path: &Path, info: &VideoInfo) -> Result<Self> {
        let header = Y4mHeader::for_video_info(info)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        info!(
            path = %path.display(),
            format = %header.format,
            width = header.width,
            height = header.height,
            "Writing Y4M output"
        );
        Ok(Self::with_header(BufWriter::new(file), header))
    }
}

impl<W: Write + Send + 'static> Y4mWriter<W> {
    pub fn new(out: W, info: &VideoInfo) -> Result<Self> {
        Ok(Self::with_header(out, Y4mHeader::for_video_info(info)?))
    }

    pub fn with_header(out: W, header: Y4mHeader) -> Self {
        Self {
            out,
            header,
            header_written: false,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> FrameSink for Y4mWriter<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if !self.header_written {
            let line = self.header.to_line()?;
            self.out.write_all(line.as_bytes())?;
            self.header_written = true;
        }
        self.header
            .encode_frame(frame, &mut self.out)
            .with_context(|| format!("failed to write Y4M frame {}", self.frames_written))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.header_written {
            let line = self.header.to_line()?;
            self.out.write_all(line.as_bytes())?;
            self.header_written = true;
        }
        self.out.flush().context("failed to flush Y4M output")
    }
}
