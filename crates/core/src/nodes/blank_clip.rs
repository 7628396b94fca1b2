//! BlankClip: a source whose every frame is the same constant-valued frame.
//!
//! Handy for neutral detail bands and for tests. Values are given in the
//! clip's own sample range (e.g. `128` for 8 bit, `0.5` for float) either as
//! one `value` for all planes or as comma separated per-plane `values`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::node::{FrameContext, FrameFilter, PortDefinition};
use crate::registry::FilterArgs;
use crate::sample::Sample;
use crate::types::{Frame, Plane, PlaneData, PortType, SampleType, VideoFormat, VideoInfo};

pub const NAME: &str = "BlankClip";

pub struct BlankClip {
    info: VideoInfo,
    frame: Frame,
}

impl BlankClip {
    /// `values` holds one entry applied to every plane or one per plane.
    pub fn new(info: VideoInfo, values: Vec<f64>) -> Result<Self> {
        let Some(format) = info.format else {
            bail!("{NAME}: a format is required");
        };
        if info.width == 0 || info.height == 0 {
            bail!(
                "{NAME}: dimensions must be non-zero (got {}x{})",
                info.width,
                info.height
            );
        }

        let num_planes = format.num_planes();
        let values = match values.len() {
            1 => vec![values[0]; num_planes],
            n if n == num_planes => values,
            n => bail!("{NAME}: expected 1 or {num_planes} values for {format}, got {n}"),
        };

        let planes = values
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                let (w, h) = format.plane_dimensions(index, info.width, info.height);
                constant_plane(&format, w as usize, h as usize, value)
            })
            .collect::<Result<Vec<_>>>()?;
        let frame = Frame::from_planes(format, info.width, info.height, planes)?;

        debug!(
            format = %format,
            width = info.width,
            height = info.height,
            length = info.num_frames,
            ?values,
            "BlankClip created"
        );

        Ok(Self { info, frame })
    }

    pub fn from_args(args: &FilterArgs) -> Result<Self> {
        let width = dimension(args, "width")?;
        let height = dimension(args, "height")?;
        let format = VideoFormat::from_name(args.str("format")?)
            .with_context(|| format!("{NAME}: invalid format"))?;
        let length = args.int("length")?;
        if length < 1 {
            bail!("{NAME}: length must be >= 1 (got {length})");
        }

        let values_arg = args.str("values")?;
        let values = if values_arg.trim().is_empty() {
            vec![args.float("value")?]
        } else {
            parse_values(values_arg)?
        };

        Self::new(
            VideoInfo::new(format, width, height, length as u64),
            values,
        )
    }

    pub fn ports() -> Vec<PortDefinition> {
        vec![
            PortDefinition::required("width", PortType::Int),
            PortDefinition::required("height", PortType::Int),
            PortDefinition::optional("format", PortType::Str, serde_json::json!("gray8")),
            PortDefinition::optional("length", PortType::Int, serde_json::json!(1)),
            PortDefinition::optional("value", PortType::Float, serde_json::json!(0.0)),
            PortDefinition::optional("values", PortType::Str, serde_json::json!("")),
        ]
    }
}

impl FrameFilter for BlankClip {
    fn filter_name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn compute_frame(&self, _n: u64, _resolved: &[Arc<Frame>], _ctx: &FrameContext) -> Result<Frame> {
        Ok(self.frame.clone())
    }
}

fn dimension(args: &FilterArgs, name: &str) -> Result<u32> {
    let value = args.int(name)?;
    u32::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .with_context(|| format!("{NAME}: {name} must be a positive integer (got {value})"))
}

fn parse_values(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("{NAME}: invalid plane value '{}'", part.trim()))
        })
        .collect()
}

fn constant_plane(format: &VideoFormat, width: usize, height: usize, value: f64) -> Result<PlaneData> {
    let max = ((1u64 << format.bits_per_sample.min(32)) - 1) as f32;
    let value = value as f32;
    match (format.sample_type, format.bytes_per_sample()) {
        (SampleType::Integer, 1) => Ok(PlaneData::U8(Plane::filled(
            width,
            height,
            u8::narrow(value, max),
        ))),
        (SampleType::Integer, 2) => Ok(PlaneData::U16(Plane::filled(
            width,
            height,
            u16::narrow(value, max),
        ))),
        (SampleType::Float, 4) => Ok(PlaneData::F32(Plane::filled(width, height, value))),
        _ => bail!("{NAME}: no plane storage for video format {format}"),
    }
}
