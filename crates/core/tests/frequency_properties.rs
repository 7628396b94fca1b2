use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use atrous_core::convolution::{blur_plane, mirror_boundary, step_for_radius};
use atrous_core::error::ConfigError;
use atrous_core::executor::FrameResolver;
use atrous_core::node::{Clip, FrameContext, FrameFilter};
use atrous_core::nodes::blank_clip::BlankClip;
use atrous_core::nodes::extract_frequency::ExtractFrequency;
use atrous_core::nodes::replace_frequency::ReplaceFrequency;
use atrous_core::registry::build_default_registry;
use atrous_core::types::{Frame, Plane, PlaneData, PortData, VideoFormat, VideoInfo};

/// Source that returns the same frame for every index.
struct StillClip {
    info: VideoInfo,
    frame: Frame,
}

impl FrameFilter for StillClip {
    fn filter_name(&self) -> &str {
        "StillClip"
    }

    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn compute_frame(&self, _n: u64, _: &[Arc<Frame>], _: &FrameContext) -> Result<Frame> {
        Ok(self.frame.clone())
    }
}

fn still(frame: Frame) -> Clip {
    let info = VideoInfo::new(*frame.format(), frame.width(), frame.height(), 1);
    Arc::new(StillClip { info, frame })
}

fn flat(format: &str, width: u32, height: u32, value: f64) -> Clip {
    let info = VideoInfo::new(VideoFormat::from_name(format).unwrap(), width, height, 1);
    Arc::new(BlankClip::new(info, vec![value]).unwrap())
}

fn render(clip: &Clip) -> Arc<Frame> {
    FrameResolver::new().get_frame(clip, 0).unwrap()
}

fn extract(clip: Clip, radius: i64) -> Clip {
    Arc::new(ExtractFrequency::new(clip, radius).unwrap())
}

fn replace(base: Clip, detail: Clip) -> Clip {
    Arc::new(ReplaceFrequency::new(base, detail).unwrap())
}

fn samples_f64(plane: &PlaneData) -> Vec<f64> {
    match plane {
        PlaneData::U8(p) => p.to_packed().into_iter().map(f64::from).collect(),
        PlaneData::U16(p) => p.to_packed().into_iter().map(f64::from).collect(),
        PlaneData::F32(p) => p.to_packed().into_iter().map(f64::from).collect(),
    }
}

fn gray8(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Frame {
    let mut plane = Plane::new(width, height);
    for y in 0..height {
        for x in 0..width {
            plane.set(x, y, f(x, y));
        }
    }
    let format = VideoFormat::from_name("gray8").unwrap();
    Frame::from_planes(format, width as u32, height as u32, vec![PlaneData::U8(plane)]).unwrap()
}

#[test]
fn mirror_reflects_without_repeating_the_edge() {
    assert_eq!(mirror_boundary(-1, 10), 1);
    assert_eq!(mirror_boundary(-2, 10), 2);
    assert_eq!(mirror_boundary(10, 10), 8);
    assert_eq!(mirror_boundary(11, 10), 7);
    assert_eq!(mirror_boundary(5, 10), 5);
}

#[test]
fn mirror_stays_in_range_for_offsets_larger_than_the_plane() {
    for max_pos in 1..6_i64 {
        for pos in -40..40 {
            let folded = mirror_boundary(pos, max_pos);
            assert!(
                (0..max_pos).contains(&folded),
                "mirror({pos}, {max_pos}) = {folded}"
            );
        }
    }
}

#[test]
fn flat_plane_blur_is_identity() {
    let plane = Plane::filled(7, 5, 77u8);
    for radius in 1..=4 {
        let blurred = blur_plane(&plane, step_for_radius("Blur", radius).unwrap());
        assert!(blurred.to_packed().iter().all(|&v| v == 77.0), "radius {radius}");
    }
}

#[test]
fn flat_frame_extracts_to_neutral_for_every_representation() {
    let cases = [
        ("gray8", 100.0, 128.0),
        ("gray10", 700.0, 512.0),
        ("yuv420p16", 40_000.0, 32_768.0),
        ("grays", 0.25, 0.0),
    ];
    for (format, value, neutral) in cases {
        for radius in 1..=4 {
            let detail = render(&extract(flat(format, 9, 6, value), radius));
            for plane in detail.planes() {
                assert!(
                    samples_f64(plane).iter().all(|&v| v == neutral),
                    "{format} radius {radius}"
                );
            }
        }
    }
}

#[test]
fn neutral_detail_returns_base_unchanged() {
    let base = gray8(6, 5, |x, y| ((x * 37 + y * 11) % 256) as u8);
    let expected = base.clone();
    let restored = render(&replace(still(base), flat("gray8", 6, 5, 128.0)));
    assert_eq!(restored.planes(), expected.planes());

    let mut float_plane = Plane::new(4, 4);
    for y in 0..4 {
        for x in 0..4 {
            float_plane.set(x, y, (x as f32 - y as f32) * 0.3);
        }
    }
    let format = VideoFormat::from_name("grays").unwrap();
    let float_base = Frame::from_planes(format, 4, 4, vec![PlaneData::F32(float_plane)]).unwrap();
    let expected = float_base.clone();
    let restored = render(&replace(still(float_base), flat("grays", 4, 4, 0.0)));
    assert_eq!(restored.planes(), expected.planes());
}

#[test]
fn integer_detail_is_rounded_and_clamped() {
    let stripes = gray8(8, 8, |x, _| if x % 2 == 1 { 255 } else { 0 });
    let detail = render(&extract(still(stripes), 1));
    let PlaneData::U8(plane) = detail.plane(0) else {
        panic!("expected U8 plane");
    };
    for y in 0..8 {
        for x in 0..8 {
            let v = plane.get(x, y);
            if x % 2 == 1 {
                assert_eq!(v, 255, "({x}, {y}) should clamp at the top");
            } else {
                assert!(v <= 1, "({x}, {y}) = {v}");
            }
        }
    }
}

#[test]
fn float_detail_is_not_clamped() {
    let mut stripes = Plane::new(8, 8);
    for y in 0..8 {
        for x in 0..8 {
            stripes.set(x, y, if x % 2 == 1 { 1.0f32 } else { 0.0 });
        }
    }
    let format = VideoFormat::from_name("grays").unwrap();
    let frame = Frame::from_planes(format, 8, 8, vec![PlaneData::F32(stripes)]).unwrap();
    let detail = render(&extract(still(frame), 1));
    let values = samples_f64(detail.plane(0));

    assert!(values.iter().any(|&v| v < 0.0));
    assert!(values.iter().all(|&v| (v.abs() - 0.5).abs() < 1e-6), "{values:?}");
}

#[test]
fn planes_are_filtered_independently() {
    let format = VideoFormat::from_name("yuv420p8").unwrap();
    let luma = gray8(8, 8, |x, y| (x * 30 + y) as u8);
    let chroma = gray8(4, 4, |x, y| (200 - x * 40 - y * 5) as u8);
    let chroma_v = gray8(4, 4, |_, y| (y * 60) as u8);

    let planes = vec![
        luma.plane(0).clone(),
        chroma.plane(0).clone(),
        chroma_v.plane(0).clone(),
    ];
    let frame = Frame::from_planes(format, 8, 8, planes).unwrap();
    let detail = render(&extract(still(frame), 2));

    assert_eq!((detail.plane(0).width(), detail.plane(0).height()), (8, 8));
    assert_eq!((detail.plane(1).width(), detail.plane(1).height()), (4, 4));
    assert_eq!((detail.plane(2).width(), detail.plane(2).height()), (4, 4));

    for (index, alone) in [(0, luma), (1, chroma), (2, chroma_v)] {
        let expected = render(&extract(still(alone), 2));
        assert_eq!(detail.plane(index), expected.plane(0), "plane {index}");
    }
}

#[test]
fn configuration_is_validated_at_construction() {
    let err = ExtractFrequency::new(flat("gray8", 4, 4, 0.0), 0)
        .err()
        .expect("radius 0 should fail");
    assert!(matches!(err, ConfigError::InvalidRadius { radius: 0, .. }));
    assert!(err.to_string().starts_with("ExtractFrequency: radius must be >= 1"));

    let registry = build_default_registry();
    let clip = registry
        .create(
            "ExtractFrequency",
            HashMap::from([("clip".to_string(), PortData::Clip(flat("gray8", 4, 4, 0.0)))]),
        )
        .unwrap();
    assert_eq!(clip.filter_name(), "ExtractFrequency");

    let err = ReplaceFrequency::new(flat("gray8", 4, 4, 0.0), flat("gray10", 4, 4, 0.0))
        .err()
        .expect("differing bit depths should fail");
    assert!(matches!(err, ConfigError::FormatMismatch { .. }));
}

#[test]
fn flat_100_scenario_round_trips_exactly() {
    let source = flat("gray8", 4, 4, 100.0);
    let detail = extract(source.clone(), 1);
    assert!(samples_f64(render(&detail).plane(0)).iter().all(|&v| v == 128.0));

    let restored = render(&replace(source, detail));
    assert!(samples_f64(restored.plane(0)).iter().all(|&v| v == 100.0));
}

#[test]
fn large_radius_on_tiny_plane_folds_taps_periodically() {
    // rows: [0, 100], [10, 110], [20, 120]
    let tiny = || still(gray8(2, 3, |x, y| (x * 100 + y * 10) as u8));

    // Step 32 is a multiple of both fold periods (2 across, 4 down), so every
    // tap lands on the centre sample and the blur is the source itself.
    let detail = render(&extract(tiny(), 6));
    assert_eq!((detail.plane(0).width(), detail.plane(0).height()), (2, 3));
    assert_eq!(samples_f64(detail.plane(0)), vec![128.0; 6]);

    // Step 2 is still identity across. Down, rows 0 and 2 fold onto
    // {0, 2, 0, 2, 0} and row 1 onto itself, so every row blurs to the middle.
    let detail = render(&extract(tiny(), 2));
    assert_eq!(
        samples_f64(detail.plane(0)),
        vec![118.0, 118.0, 128.0, 128.0, 138.0, 138.0]
    );
}
