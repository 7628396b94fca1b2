//! ReplaceFrequency: add a (possibly edited) detail band back onto a base.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use crate::error::ConfigError;
use crate::frequency::replace_detail;
use crate::node::{Clip, FrameContext, FrameFilter, FrameRequest, PortDefinition};
use crate::registry::FilterArgs;
use crate::sample::SampleRange;
use crate::types::{Frame, PortType, VideoInfo};

pub const NAME: &str = "ReplaceFrequency";

const BASE: usize = 0;
const DETAIL: usize = 1;

pub struct ReplaceFrequency {
    inputs: [Clip; 2],
    info: VideoInfo,
    detail_frames: u64,
    range: SampleRange,
}

impl ReplaceFrequency {
    pub fn new(base: Clip, detail: Clip) -> Result<Self, ConfigError> {
        let info = base.video_info().clone();
        let detail_info = detail.video_info();
        if !info.same_shape(detail_info) {
            return Err(ConfigError::FormatMismatch {
                filter: NAME,
                base: info.describe(),
                detail: detail_info.describe(),
            });
        }

        let format = match info.format {
            Some(format) if info.is_constant_format() => format,
            _ => return Err(ConfigError::VariableFormat { filter: NAME }),
        };
        let range = SampleRange::for_format(NAME, &format)?;

        let detail_frames = detail_info.num_frames;
        debug!(
            format = %format,
            width = info.width,
            height = info.height,
            base_frames = info.num_frames,
            detail_frames,
            "ReplaceFrequency created"
        );

        Ok(Self {
            inputs: [base, detail],
            info,
            detail_frames,
            range,
        })
    }

    pub fn from_args(args: &FilterArgs) -> Result<Self> {
        let base = args.clip("base")?;
        let detail = args.clip("detail")?;
        Ok(Self::new(base, detail)?)
    }

    pub fn ports() -> Vec<PortDefinition> {
        vec![
            PortDefinition::required("base", PortType::Clip),
            PortDefinition::required("detail", PortType::Clip),
        ]
    }
}

impl FrameFilter for ReplaceFrequency {
    fn filter_name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn inputs(&self) -> &[Clip] {
        &self.inputs
    }

    /// Detail requests past the end of a shorter detail clip reuse its last
    /// frame.
    fn frames_needed(&self, n: u64) -> Vec<FrameRequest> {
        let detail_frame = n.min(self.detail_frames.saturating_sub(1));
        vec![
            FrameRequest::new(BASE, n),
            FrameRequest::new(DETAIL, detail_frame),
        ]
    }

    fn compute_frame(
        &self,
        n: u64,
        resolved: &[Arc<Frame>],
        _ctx: &FrameContext,
    ) -> Result<Frame> {
        let [base, detail] = resolved else {
            bail!(
                "{NAME}: expected base and detail frames for frame {n}, got {} frame(s)",
                resolved.len()
            );
        };
        replace_detail(base, detail, self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{blank, blank_sized, compute, info_only};
    use crate::types::PlaneData;

    #[test]
    fn test_rejects_differing_bit_depths() {
        let err = match ReplaceFrequency::new(blank("gray8", 0.0), blank("gray10", 0.0)) {
            Ok(_) => panic!("8 bit base with 10 bit detail must fail"),
            Err(err) => err,
        };
        assert_eq!(
            err.to_string(),
            "ReplaceFrequency: base and detail must have the same format and dimensions \
             (base gray8 8x8, detail gray10 8x8)"
        );
    }

    #[test]
    fn test_rejects_differing_dimensions() {
        let result = ReplaceFrequency::new(
            blank_sized("gray8", 8, 8, 1, 0.0),
            blank_sized("gray8", 8, 4, 1, 0.0),
        );
        assert!(matches!(result, Err(ConfigError::FormatMismatch { .. })));
    }

    #[test]
    fn test_rejects_unsupported_format() {
        let result = ReplaceFrequency::new(info_only("gray17"), info_only("gray17"));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_output_info_is_the_base_info() {
        let base = blank_sized("gray8", 8, 8, 5, 0.0);
        let expected = base.video_info().clone();
        let filter = ReplaceFrequency::new(base, blank_sized("gray8", 8, 8, 2, 128.0)).unwrap();
        assert_eq!(filter.video_info(), &expected);
        assert_eq!(filter.inputs().len(), 2);
    }

    #[test]
    fn test_detail_requests_clamp_to_last_detail_frame() {
        let filter = ReplaceFrequency::new(
            blank_sized("gray8", 8, 8, 5, 0.0),
            blank_sized("gray8", 8, 8, 2, 128.0),
        )
        .unwrap();
        assert_eq!(
            filter.frames_needed(0),
            vec![FrameRequest::new(0, 0), FrameRequest::new(1, 0)]
        );
        assert_eq!(
            filter.frames_needed(4),
            vec![FrameRequest::new(0, 4), FrameRequest::new(1, 1)]
        );
    }

    #[test]
    fn test_neutral_detail_leaves_base_unchanged() {
        let filter =
            ReplaceFrequency::new(blank("yuv444p16", 1234.0), blank("yuv444p16", 32768.0)).unwrap();
        let frame = compute(&filter, 0);
        for plane in frame.planes() {
            match plane {
                PlaneData::U16(p) => assert!(p.to_packed().iter().all(|&v| v == 1234)),
                _ => panic!("expected U16 plane"),
            }
        }
    }

    #[test]
    fn test_compute_requires_both_frames() {
        let filter = ReplaceFrequency::new(blank("gray8", 0.0), blank("gray8", 128.0)).unwrap();
        let err = filter
            .compute_frame(3, &[], &FrameContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("got 0 frame(s)"));
    }
}
