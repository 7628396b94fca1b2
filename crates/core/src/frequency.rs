//! Detail extraction and recombination over whole frames.
//!
//! Both operations go through [`map_planes`], so the rounding and clamping
//! applied on the way back to storage cannot drift between them.

use anyhow::{bail, Result};

use crate::convolution::{convolve_cols, convolve_rows};
use crate::sample::{Sample, SampleRange};
use crate::types::{Frame, Plane, PlaneData};

/// A per-plane kernel, instantiated once per storage type.
pub trait PlaneOp {
    /// Number of input frames the operation reads.
    const INPUTS: usize;

    /// Write the result for one plane. `inputs` holds the same plane index
    /// from each input frame, all with `dst`'s dimensions.
    fn apply<T: Sample>(&self, inputs: &[&Plane<T>], dst: &mut Plane<T>);
}

/// `detail = original - blur(original) + neutral`.
#[derive(Debug, Clone, Copy)]
pub struct ExtractDetail {
    pub step: usize,
    pub range: SampleRange,
}

impl PlaneOp for ExtractDetail {
    const INPUTS: usize = 1;

    fn apply<T: Sample>(&self, inputs: &[&Plane<T>], dst: &mut Plane<T>) {
        let src = inputs[0];
        let neutral = self.range.neutral();
        let intermediate = convolve_rows(src, self.step);
        convolve_cols(&intermediate, self.step, |x, y, blurred| {
            let original = src.get(x, y).widen();
            dst.set(x, y, self.range.narrow(original - blurred + neutral));
        });
    }
}

/// `output = base + detail - neutral`.
#[derive(Debug, Clone, Copy)]
pub struct ReplaceDetail {
    pub range: SampleRange,
}

impl PlaneOp for ReplaceDetail {
    const INPUTS: usize = 2;

    fn apply<T: Sample>(&self, inputs: &[&Plane<T>], dst: &mut Plane<T>) {
        let (base, detail) = (inputs[0], inputs[1]);
        let neutral = self.range.neutral();
        for y in 0..dst.height() {
            let base_row = base.row(y);
            let detail_row = detail.row(y);
            for (x, out) in dst.row_mut(y).iter_mut().enumerate() {
                *out = self
                    .range
                    .narrow(base_row[x].widen() + detail_row[x].widen() - neutral);
            }
        }
    }
}

/// Allocate an output shaped like `sources[0]` (properties included) and run
/// `op` on every plane independently.
pub fn map_planes<O: PlaneOp>(op: &O, sources: &[&Frame]) -> Result<Frame> {
    if sources.len() != O::INPUTS {
        bail!("expected {} input frames, got {}", O::INPUTS, sources.len());
    }
    let template = sources[0];
    for other in &sources[1..] {
        if other.format() != template.format()
            || other.width() != template.width()
            || other.height() != template.height()
        {
            bail!(
                "input frames differ: {} {}x{} vs {} {}x{}",
                template.format(),
                template.width(),
                template.height(),
                other.format(),
                other.width(),
                other.height()
            );
        }
    }

    let mut dst = Frame::new_video_frame(
        *template.format(),
        template.width(),
        template.height(),
        Some(template),
    )?;

    for (index, out) in dst.planes_mut().iter_mut().enumerate() {
        match out {
            PlaneData::U8(out) => op.apply(&gather(sources, index, as_u8)?, out),
            PlaneData::U16(out) => op.apply(&gather(sources, index, as_u16)?, out),
            PlaneData::F32(out) => op.apply(&gather(sources, index, as_f32)?, out),
        }
    }

    Ok(dst)
}

fn gather<'a, T>(
    sources: &[&'a Frame],
    index: usize,
    pick: fn(&PlaneData) -> Option<&Plane<T>>,
) -> Result<Vec<&'a Plane<T>>> {
    sources
        .iter()
        .map(|&frame| match pick(frame.plane(index)) {
            Some(plane) => Ok(plane),
            None => bail!("plane {index} storage does not match its format"),
        })
        .collect()
}

fn as_u8(plane: &PlaneData) -> Option<&Plane<u8>> {
    match plane {
        PlaneData::U8(p) => Some(p),
        _ => None,
    }
}

fn as_u16(plane: &PlaneData) -> Option<&Plane<u16>> {
    match plane {
        PlaneData::U16(p) => Some(p),
        _ => None,
    }
}

fn as_f32(plane: &PlaneData) -> Option<&Plane<f32>> {
    match plane {
        PlaneData::F32(p) => Some(p),
        _ => None,
    }
}

/// Detail band of `src` at tap spacing `step`.
pub fn extract_detail(src: &Frame, step: usize, range: SampleRange) -> Result<Frame> {
    map_planes(&ExtractDetail { step, range }, &[src])
}

/// Recombine `base` with a detail band.
pub fn replace_detail(base: &Frame, detail: &Frame, range: SampleRange) -> Result<Frame> {
    map_planes(&ReplaceDetail { range }, &[base, detail])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleRepr;
    use crate::types::{SampleType, VideoFormat};

    fn gray8_frame(width: usize, height: usize, samples: Vec<u8>) -> Frame {
        Frame::from_planes(
            VideoFormat::gray(SampleType::Integer, 8),
            width as u32,
            height as u32,
            vec![PlaneData::U8(Plane::from_vec(width, height, samples).unwrap())],
        )
        .unwrap()
    }

    fn u8_samples(frame: &Frame, plane: usize) -> Vec<u8> {
        match frame.plane(plane) {
            PlaneData::U8(p) => p.to_packed(),
            _ => panic!("expected U8 plane"),
        }
    }

    #[test]
    fn test_flat_frame_extracts_to_neutral() {
        let src = gray8_frame(4, 4, vec![100; 16]);
        let range = SampleRange::new(SampleRepr::UInt8);
        let detail = extract_detail(&src, 1, range).unwrap();
        assert_eq!(u8_samples(&detail, 0), vec![128; 16]);
    }

    #[test]
    fn test_replace_with_neutral_detail_is_identity() {
        let samples: Vec<u8> = (0..16).map(|v| (v * 17) as u8).collect();
        let base = gray8_frame(4, 4, samples.clone());
        let detail = gray8_frame(4, 4, vec![128; 16]);
        let range = SampleRange::new(SampleRepr::UInt8);
        let out = replace_detail(&base, &detail, range).unwrap();
        assert_eq!(u8_samples(&out, 0), samples);
    }

    #[test]
    fn test_extract_matches_hand_computed_value() {
        // 5x1 ramp; vertical taps all reflect onto row 0 so the column sum is
        // 16 * row sum and the blur equals the horizontal average.
        let src = gray8_frame(5, 1, vec![0, 10, 20, 30, 40]);
        let range = SampleRange::new(SampleRepr::UInt8);
        let detail = extract_detail(&src, 1, range).unwrap();
        // x = 0: taps 20,10,0,10,20 -> (20 + 40 + 0 + 40 + 20) / 16 = 7.5
        // detail = 0 - 7.5 + 128 = 120.5 -> 121
        // x = 2: interior ramp, blur = 20, detail = 128
        // x = 4: taps 20,30,40,30,20 -> 32.5, detail = 135.5 -> 136
        let samples = u8_samples(&detail, 0);
        assert_eq!(samples[0], 121);
        assert_eq!(samples[2], 128);
        assert_eq!(samples[4], 136);
    }

    #[test]
    fn test_extract_then_replace_reconstructs_when_nothing_clamps() {
        let samples: Vec<u8> = (0..64).map(|v| 100 + (v % 7) as u8 * 3).collect();
        let src = gray8_frame(8, 8, samples.clone());
        let range = SampleRange::new(SampleRepr::UInt8);
        let detail = extract_detail(&src, 1, range).unwrap();

        let blurred: Vec<f32> = {
            let plane = Plane::from_vec(8, 8, samples.clone()).unwrap();
            crate::convolution::blur_plane(&plane, 1).to_packed()
        };
        let base: Vec<u8> = blurred.iter().map(|v| v.round() as u8).collect();
        let base = gray8_frame(8, 8, base);
        let out = replace_detail(&base, &detail, range).unwrap();

        for (got, want) in u8_samples(&out, 0).into_iter().zip(samples) {
            assert!((got as i32 - want as i32).abs() <= 1, "{got} vs {want}");
        }
    }

    #[test]
    fn test_output_copies_props_from_first_input() {
        let mut base = gray8_frame(2, 2, vec![1, 2, 3, 4]);
        base.props
            .insert("_Matrix".to_string(), serde_json::json!(1));
        let detail = gray8_frame(2, 2, vec![128; 4]);
        let out = replace_detail(&base, &detail, SampleRange::new(SampleRepr::UInt8)).unwrap();
        assert_eq!(out.props.get("_Matrix"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_map_planes_rejects_mismatched_inputs() {
        let a = gray8_frame(2, 2, vec![0; 4]);
        let b = gray8_frame(4, 1, vec![0; 4]);
        let err = replace_detail(&a, &b, SampleRange::new(SampleRepr::UInt8)).unwrap_err();
        assert!(err.to_string().contains("input frames differ"));
    }
}
