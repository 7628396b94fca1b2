//! Sample range adaptation between storage representations and the `f32`
//! working space used by the transform.
//!
//! Integer samples are widened losslessly and narrowed with round-to-nearest
//! followed by a clamp into `[0, max]`. Float samples pass through untouched
//! in both directions, so float detail bands may leave `[0, 1]`.

use crate::error::ConfigError;
use crate::types::{SampleType, VideoFormat};

/// Storage representation accepted by the frequency filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleRepr {
    /// 8 bit integer samples stored in `u8`.
    UInt8,
    /// 9-16 bit integer samples stored in `u16`.
    UInt16 { bits: u32 },
    /// 32 bit float samples with nominal range `[0, 1]`.
    Float32,
}

/// Neutral and maximum values for one representation, derived once when a
/// filter is built and reused for every sample of every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRange {
    repr: SampleRepr,
    neutral: f32,
    max: f32,
}

impl SampleRange {
    /// Pick the representation for `format`, rejecting anything that is not
    /// 8-16 bit integer or 32 bit float.
    pub fn for_format(filter: &'static str, format: &VideoFormat) -> Result<Self, ConfigError> {
        let repr = match (format.sample_type, format.bits_per_sample) {
            (SampleType::Integer, 8) => SampleRepr::UInt8,
            (SampleType::Integer, bits @ 9..=16) => SampleRepr::UInt16 { bits },
            (SampleType::Float, 32) => SampleRepr::Float32,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    filter,
                    format: format.name(),
                })
            }
        };
        Ok(Self::new(repr))
    }

    pub fn new(repr: SampleRepr) -> Self {
        let (neutral, max) = match repr {
            SampleRepr::UInt8 => integer_constants(8),
            SampleRepr::UInt16 { bits } => integer_constants(bits),
            SampleRepr::Float32 => (0.0, 1.0),
        };
        Self { repr, neutral, max }
    }

    pub fn repr(&self) -> SampleRepr {
        self.repr
    }

    /// Mid-point used to re-center a signed residual.
    #[inline]
    pub fn neutral(&self) -> f32 {
        self.neutral
    }

    /// Largest representable value.
    #[inline]
    pub fn max(&self) -> f32 {
        self.max
    }

    #[inline]
    pub fn narrow<T: Sample>(&self, value: f32) -> T {
        T::narrow(value, self.max)
    }
}

fn integer_constants(bits: u32) -> (f32, f32) {
    let neutral = (1u32 << (bits - 1)) as f32;
    let max = ((1u64 << bits) - 1) as f32;
    (neutral, max)
}

/// A storable sample type.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    /// Lossless conversion into the working space.
    fn widen(self) -> f32;

    /// Conversion back to storage. `max` is the representation's upper bound
    /// and is ignored by float samples.
    fn narrow(value: f32, max: f32) -> Self;
}

impl Sample for u8 {
    #[inline]
    fn widen(self) -> f32 {
        self as f32
    }

    #[inline]
    fn narrow(value: f32, max: f32) -> Self {
        value.round().clamp(0.0, max) as u8
    }
}

impl Sample for u16 {
    #[inline]
    fn widen(self) -> f32 {
        self as f32
    }

    #[inline]
    fn narrow(value: f32, max: f32) -> Self {
        value.round().clamp(0.0, max) as u16
    }
}

impl Sample for f32 {
    #[inline]
    fn widen(self) -> f32 {
        self
    }

    #[inline]
    fn narrow(value: f32, _max: f32) -> Self {
        value
    }
}
