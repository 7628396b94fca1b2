use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::node::Clip;

/// Rows of freshly allocated planes start on this byte boundary.
const ROW_ALIGNMENT_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFamily {
    Gray,
    Yuv,
    Rgb,
}

/// Sample layout shared by every frame of a clip.
///
/// Construction does not check whether the layout is storable; a filter
/// decides at build time which formats it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub color_family: ColorFamily,
    pub sample_type: SampleType,
    pub bits_per_sample: u32,
    pub sub_sampling_w: u32,
    pub sub_sampling_h: u32,
}

impl VideoFormat {
    pub fn gray(sample_type: SampleType, bits_per_sample: u32) -> Self {
        Self {
            color_family: ColorFamily::Gray,
            sample_type,
            bits_per_sample,
            sub_sampling_w: 0,
            sub_sampling_h: 0,
        }
    }

    pub fn yuv(
        sample_type: SampleType,
        bits_per_sample: u32,
        sub_sampling_w: u32,
        sub_sampling_h: u32,
    ) -> Self {
        Self {
            color_family: ColorFamily::Yuv,
            sample_type,
            bits_per_sample,
            sub_sampling_w,
            sub_sampling_h,
        }
    }

    pub fn rgb(sample_type: SampleType, bits_per_sample: u32) -> Self {
        Self {
            color_family: ColorFamily::Rgb,
            sample_type,
            bits_per_sample,
            sub_sampling_w: 0,
            sub_sampling_h: 0,
        }
    }

    pub fn num_planes(&self) -> usize {
        match self.color_family {
            ColorFamily::Gray => 1,
            ColorFamily::Yuv | ColorFamily::Rgb => 3,
        }
    }

    pub fn bytes_per_sample(&self) -> u32 {
        match self.bits_per_sample {
            0..=8 => 1,
            9..=16 => 2,
            _ => 4,
        }
    }

    /// Dimensions of `plane` for a frame of `width` x `height`.
    ///
    /// Subsampled planes round up so odd luma sizes keep their last column.
    pub fn plane_dimensions(&self, plane: usize, width: u32, height: u32) -> (u32, u32) {
        if plane == 0 || self.color_family != ColorFamily::Yuv {
            return (width, height);
        }
        (
            div_ceil_pow2(width, self.sub_sampling_w),
            div_ceil_pow2(height, self.sub_sampling_h),
        )
    }

    /// Short name such as `gray8`, `yuv420p10` or `yuv444ps`.
    pub fn name(&self) -> String {
        let depth = match self.sample_type {
            SampleType::Float if self.bits_per_sample == 32 => "s".to_string(),
            SampleType::Float if self.bits_per_sample == 16 => "h".to_string(),
            SampleType::Float => format!("f{}", self.bits_per_sample),
            SampleType::Integer => self.bits_per_sample.to_string(),
        };

        match self.color_family {
            ColorFamily::Gray => format!("gray{depth}"),
            ColorFamily::Rgb => format!("rgbp{depth}"),
            ColorFamily::Yuv => {
                let layout = match (self.sub_sampling_w, self.sub_sampling_h) {
                    (0, 0) => "444".to_string(),
                    (1, 0) => "422".to_string(),
                    (1, 1) => "420".to_string(),
                    (0, 1) => "440".to_string(),
                    (2, 0) => "411".to_string(),
                    (2, 2) => "410".to_string(),
                    (w, h) => format!("ss{w}{h}"),
                };
                format!("yuv{layout}p{depth}")
            }
        }
    }

    /// Parse a short format name as produced by [`VideoFormat::name`].
    pub fn from_name(name: &str) -> Result<Self> {
        let lowered = name.trim().to_ascii_lowercase();

        let (color_family, sub_sampling, depth) = if let Some(depth) =
            lowered.strip_prefix("gray")
        {
            (ColorFamily::Gray, (0, 0), depth)
        } else if let Some(depth) = lowered.strip_prefix("rgbp") {
            (ColorFamily::Rgb, (0, 0), depth)
        } else if let Some(rest) = lowered.strip_prefix("yuv") {
            let (layout, depth) = rest
                .split_once('p')
                .ok_or_else(|| anyhow!("unknown video format '{name}'"))?;
            let sub_sampling = match layout {
                "444" => (0, 0),
                "422" => (1, 0),
                "420" => (1, 1),
                "440" => (0, 1),
                "411" => (2, 0),
                "410" => (2, 2),
                _ => bail!("unknown chroma layout '{layout}' in video format '{name}'"),
            };
            (ColorFamily::Yuv, sub_sampling, depth)
        } else {
            bail!("unknown video format '{name}'");
        };

        let (sample_type, bits_per_sample) = match depth {
            "s" => (SampleType::Float, 32),
            "h" => (SampleType::Float, 16),
            _ => {
                let (sample_type, digits) = match depth.strip_prefix('f') {
                    Some(digits) => (SampleType::Float, digits),
                    None => (SampleType::Integer, depth),
                };
                let bits: u32 = digits
                    .parse()
                    .map_err(|_| anyhow!("invalid bit depth '{depth}' in video format '{name}'"))?;
                if bits == 0 || bits > 32 {
                    bail!("bit depth {bits} out of range in video format '{name}'");
                }
                (sample_type, bits)
            }
        };

        Ok(Self {
            color_family,
            sample_type,
            bits_per_sample,
            sub_sampling_w: sub_sampling.0,
            sub_sampling_h: sub_sampling.1,
        })
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn div_ceil_pow2(value: u32, shift: u32) -> u32 {
    let divisor = 1u32 << shift;
    value.div_ceil(divisor)
}

/// Clip-level description. `format == None` or a zero dimension marks a clip
/// whose frames may change shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub format: Option<VideoFormat>,
    pub width: u32,
    pub height: u32,
    pub num_frames: u64,
    pub fps_num: u64,
    pub fps_den: u64,
}

impl VideoInfo {
    pub fn new(format: VideoFormat, width: u32, height: u32, num_frames: u64) -> Self {
        Self {
            format: Some(format),
            width,
            height,
            num_frames,
            fps_num: 25,
            fps_den: 1,
        }
    }

    pub fn is_constant_format(&self) -> bool {
        self.format.is_some() && self.width > 0 && self.height > 0
    }

    /// Same format and same frame dimensions.
    pub fn same_shape(&self, other: &VideoInfo) -> bool {
        self.format == other.format && self.width == other.width && self.height == other.height
    }

    pub fn describe(&self) -> String {
        match self.format {
            Some(format) => format!("{format} {}x{}", self.width, self.height),
            None => "variable format".to_string(),
        }
    }
}

/// A 2D grid of samples in row-major order with a row stride in samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
    stride: usize,
}

impl<T: Copy + Default> Plane<T> {
    /// Zeroed plane whose rows are padded to the allocation alignment.
    pub fn new(width: usize, height: usize) -> Self {
        let stride = aligned_stride::<T>(width);
        Self::with_stride(width, height, stride)
    }

    /// Zeroed plane with an explicit stride.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(
            stride >= width,
            "stride ({stride}) must be >= width ({width})"
        );
        Self {
            data: vec![T::default(); stride * height],
            width,
            height,
            stride,
        }
    }

    pub fn filled(width: usize, height: usize, value: T) -> Self {
        let mut plane = Self::new(width, height);
        for y in 0..height {
            plane.row_mut(y).fill(value);
        }
        plane
    }

    /// Wrap tightly packed samples (`stride == width`).
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            bail!(
                "plane data length mismatch: expected {}, got {}",
                width * height,
                data.len()
            );
        }
        Ok(Self {
            data,
            width,
            height,
            stride: width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[y * self.stride + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.stride + x] = value;
    }

    /// Samples without row padding.
    pub fn to_packed(&self) -> Vec<T> {
        let mut packed = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            packed.extend_from_slice(self.row(y));
        }
        packed
    }
}

fn aligned_stride<T>(width: usize) -> usize {
    let per_row = (ROW_ALIGNMENT_BYTES / std::mem::size_of::<T>().max(1)).max(1);
    width.div_ceil(per_row) * per_row
}

/// Plane storage for each supported sample representation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaneData {
    U8(Plane<u8>),
    U16(Plane<u16>),
    F32(Plane<f32>),
}

impl PlaneData {
    /// Zeroed storage matching `format`, or an error for layouts with no
    /// in-memory representation (32 bit integer, half float).
    pub fn new_for_format(format: &VideoFormat, width: usize, height: usize) -> Result<Self> {
        match (format.sample_type, format.bytes_per_sample()) {
            (SampleType::Integer, 1) => Ok(Self::U8(Plane::new(width, height))),
            (SampleType::Integer, 2) => Ok(Self::U16(Plane::new(width, height))),
            (SampleType::Float, 4) => Ok(Self::F32(Plane::new(width, height))),
            _ => bail!("no plane storage for video format {format}"),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::U8(p) => p.width(),
            Self::U16(p) => p.width(),
            Self::F32(p) => p.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::U8(p) => p.height(),
            Self::U16(p) => p.height(),
            Self::F32(p) => p.height(),
        }
    }

    pub fn stride(&self) -> usize {
        match self {
            Self::U8(p) => p.stride(),
            Self::U16(p) => p.stride(),
            Self::F32(p) => p.stride(),
        }
    }

    fn storage_matches(&self, format: &VideoFormat) -> bool {
        matches!(
            (self, format.sample_type, format.bytes_per_sample()),
            (Self::U8(_), SampleType::Integer, 1)
                | (Self::U16(_), SampleType::Integer, 2)
                | (Self::F32(_), SampleType::Float, 4)
        )
    }
}

pub type FrameProps = BTreeMap<String, serde_json::Value>;

/// One video frame: a set of independently sized planes plus properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    format: VideoFormat,
    width: u32,
    height: u32,
    planes: Vec<PlaneData>,
    pub props: FrameProps,
}

impl Frame {
    /// Allocate a zeroed frame, copying properties from `props_source`.
    pub fn new_video_frame(
        format: VideoFormat,
        width: u32,
        height: u32,
        props_source: Option<&Frame>,
    ) -> Result<Self> {
        let planes = (0..format.num_planes())
            .map(|plane| {
                let (w, h) = format.plane_dimensions(plane, width, height);
                PlaneData::new_for_format(&format, w as usize, h as usize)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            format,
            width,
            height,
            planes,
            props: props_source.map(|src| src.props.clone()).unwrap_or_default(),
        })
    }

    /// Assemble a frame from existing planes, checking count, storage, and
    /// per-plane dimensions against `format`.
    pub fn from_planes(
        format: VideoFormat,
        width: u32,
        height: u32,
        planes: Vec<PlaneData>,
    ) -> Result<Self> {
        if planes.len() != format.num_planes() {
            bail!(
                "{format} frames have {} planes, got {}",
                format.num_planes(),
                planes.len()
            );
        }
        for (index, plane) in planes.iter().enumerate() {
            if !plane.storage_matches(&format) {
                bail!("plane {index} storage does not match video format {format}");
            }
            let (w, h) = format.plane_dimensions(index, width, height);
            if plane.width() != w as usize || plane.height() != h as usize {
                bail!(
                    "plane {index} is {}x{}, expected {w}x{h} for {format} {width}x{height}",
                    plane.width(),
                    plane.height()
                );
            }
        }

        Ok(Self {
            format,
            width,
            height,
            planes,
            props: FrameProps::new(),
        })
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> &PlaneData {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut PlaneData {
        &mut self.planes[index]
    }

    pub fn planes(&self) -> &[PlaneData] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [PlaneData] {
        &mut self.planes
    }
}

/// Argument type identifier for filter signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Clip,
    Int,
    Float,
    Str,
    Bool,
    Path,
}

impl PortType {
    pub fn is_compatible(&self, other: &PortType) -> bool {
        self == other
    }

    /// Type token used in host signature strings.
    pub fn signature_token(&self) -> &'static str {
        match self {
            Self::Clip => "vnode",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str | Self::Path => "data",
            Self::Bool => "int",
        }
    }
}

/// Argument values handed to filter factories.
pub enum PortData {
    Clip(Clip),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Path(PathBuf),
}

impl PortData {
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Clip(_) => PortType::Clip,
            Self::Int(_) => PortType::Int,
            Self::Float(_) => PortType::Float,
            Self::Str(_) => PortType::Str,
            Self::Bool(_) => PortType::Bool,
            Self::Path(_) => PortType::Path,
        }
    }

    /// Decode a JSON parameter for a non-clip port.
    pub fn from_json(port_type: &PortType, value: &serde_json::Value) -> Result<Self> {
        match port_type {
            PortType::Int => value
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| anyhow!("expected integer, got {value}")),
            PortType::Float => value
                .as_f64()
                .map(Self::Float)
                .ok_or_else(|| anyhow!("expected number, got {value}")),
            PortType::Str => value
                .as_str()
                .map(|s| Self::Str(s.to_string()))
                .ok_or_else(|| anyhow!("expected string, got {value}")),
            PortType::Bool => value
                .as_bool()
                .map(Self::Bool)
                .ok_or_else(|| anyhow!("expected boolean, got {value}")),
            PortType::Path => value
                .as_str()
                .map(|s| Self::Path(PathBuf::from(s)))
                .ok_or_else(|| anyhow!("expected path string, got {value}")),
            PortType::Clip => bail!("clip arguments cannot be given as JSON parameters"),
        }
    }
}

impl Clone for PortData {
    fn clone(&self) -> Self {
        match self {
            Self::Clip(clip) => Self::Clip(clip.clone()),
            Self::Int(v) => Self::Int(*v),
            Self::Float(v) => Self::Float(*v),
            Self::Str(v) => Self::Str(v.clone()),
            Self::Bool(v) => Self::Bool(*v),
            Self::Path(v) => Self::Path(v.clone()),
        }
    }
}
