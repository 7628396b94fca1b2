//! ExtractFrequency: the detail band of one à trous scale.
//!
//! Output frame `n` is `source - blur(source) + neutral`, computed plane by
//! plane with taps spaced `2^(radius - 1)` samples apart.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::convolution::step_for_radius;
use crate::error::ConfigError;
use crate::frequency::extract_detail;
use crate::node::{Clip, FrameContext, FrameFilter, FrameRequest, PortDefinition};
use crate::registry::FilterArgs;
use crate::sample::SampleRange;
use crate::types::{Frame, PortType, VideoInfo};

pub const NAME: &str = "ExtractFrequency";

pub const DEFAULT_RADIUS: i64 = 1;

pub struct ExtractFrequency {
    inputs: [Clip; 1],
    info: VideoInfo,
    radius: u32,
    step: usize,
    range: SampleRange,
}

impl ExtractFrequency {
    /// Validate `clip` and `radius` and take ownership of the clip handle.
    ///
    /// Checks run in a fixed order: radius, constant format, then sample
    /// representation.
    pub fn new(clip: Clip, radius: i64) -> Result<Self, ConfigError> {
        let step = step_for_radius(NAME, radius)?;

        let info = clip.video_info().clone();
        let format = match info.format {
            Some(format) if info.is_constant_format() => format,
            _ => return Err(ConfigError::VariableFormat { filter: NAME }),
        };
        let range = SampleRange::for_format(NAME, &format)?;

        let radius = radius as u32;
        debug!(
            radius,
            step,
            format = %format,
            width = info.width,
            height = info.height,
            "ExtractFrequency created"
        );

        Ok(Self {
            inputs: [clip],
            info,
            radius,
            step,
            range,
        })
    }

    pub fn from_args(args: &FilterArgs) -> Result<Self> {
        let clip = args.clip("clip")?;
        let radius = args.int("radius")?;
        Ok(Self::new(clip, radius)?)
    }

    pub fn ports() -> Vec<PortDefinition> {
        vec![
            PortDefinition::required("clip", PortType::Clip),
            PortDefinition::optional("radius", PortType::Int, serde_json::json!(DEFAULT_RADIUS)),
        ]
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

impl FrameFilter for ExtractFrequency {
    fn filter_name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn inputs(&self) -> &[Clip] {
        &self.inputs
    }

    fn frames_needed(&self, n: u64) -> Vec<FrameRequest> {
        vec![FrameRequest::new(0, n)]
    }

    fn compute_frame(
        &self,
        n: u64,
        resolved: &[Arc<Frame>],
        _ctx: &FrameContext,
    ) -> Result<Frame> {
        let source = resolved
            .first()
            .ok_or_else(|| anyhow!("{NAME}: source frame {n} was not resolved"))?;
        extract_detail(source, self.step, self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution::MAX_RADIUS;
    use crate::nodes::test_support::{blank, compute, info_only, InfoOnly};
    use crate::types::{PlaneData, SampleType, VideoFormat};

    #[test]
    fn test_rejects_radius_below_one() {
        let err = match ExtractFrequency::new(blank("gray8", 0.0), 0) {
            Ok(_) => panic!("radius 0 must be rejected"),
            Err(err) => err,
        };
        assert_eq!(
            err.to_string(),
            "ExtractFrequency: radius must be >= 1 (got 0)"
        );
    }

    #[test]
    fn test_rejects_radius_above_maximum() {
        let radius = i64::from(MAX_RADIUS) + 1;
        assert!(matches!(
            ExtractFrequency::new(blank("gray8", 0.0), radius),
            Err(ConfigError::InvalidRadius { .. })
        ));
    }

    #[test]
    fn test_radius_is_checked_before_format() {
        let err = match ExtractFrequency::new(info_only("gray32"), -3) {
            Ok(_) => panic!("negative radius must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(err, ConfigError::InvalidRadius { radius: -3, .. }));
    }

    #[test]
    fn test_rejects_unsupported_format() {
        for format in ["gray32", "gray7", "yuv420ph"] {
            let err = match ExtractFrequency::new(info_only(format), 1) {
                Ok(_) => panic!("{format} must be rejected"),
                Err(err) => err,
            };
            assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
        }
    }

    #[test]
    fn test_rejects_variable_format() {
        let mut info = VideoInfo::new(VideoFormat::gray(SampleType::Integer, 8), 8, 8, 1);
        info.format = None;
        let err = match ExtractFrequency::new(Arc::new(InfoOnly(info)), 1) {
            Ok(_) => panic!("variable format must be rejected"),
            Err(err) => err,
        };
        assert_eq!(err, ConfigError::VariableFormat { filter: NAME });

        let zero_width = VideoInfo::new(VideoFormat::gray(SampleType::Integer, 8), 0, 8, 1);
        assert!(matches!(
            ExtractFrequency::new(Arc::new(InfoOnly(zero_width)), 1),
            Err(ConfigError::VariableFormat { .. })
        ));
    }

    #[test]
    fn test_step_follows_radius() {
        let filter = ExtractFrequency::new(blank("gray8", 0.0), 3).unwrap();
        assert_eq!(filter.radius(), 3);
        assert_eq!(filter.step(), 4);
        assert_eq!(filter.frames_needed(7), vec![FrameRequest::new(0, 7)]);
    }

    #[test]
    fn test_output_keeps_source_video_info() {
        let clip = blank("yuv420p10", 300.0);
        let expected = clip.video_info().clone();
        let filter = ExtractFrequency::new(clip, 2).unwrap();
        assert_eq!(filter.video_info(), &expected);
        assert_eq!(filter.filter_name(), NAME);
    }

    #[test]
    fn test_flat_float_source_extracts_to_zero() {
        let filter = ExtractFrequency::new(blank("grays", 0.75), 1).unwrap();
        let frame = compute(&filter, 1);
        assert_eq!(*frame.format(), VideoFormat::gray(SampleType::Float, 32));
        match frame.plane(0) {
            PlaneData::F32(plane) => assert!(plane.to_packed().iter().all(|&v| v == 0.0)),
            _ => panic!("expected F32 plane"),
        }
    }

    #[test]
    fn test_missing_resolved_frame_is_an_error() {
        let filter = ExtractFrequency::new(blank("gray8", 0.0), 1).unwrap();
        assert!(filter
            .compute_frame(0, &[], &FrameContext::default())
            .is_err());
    }
}
