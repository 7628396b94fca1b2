use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use crate::node::{Clip, FrameContext};
use crate::streaming_executor::FrameSink;
use crate::types::Frame;

/// Drives the two-phase frame contract for a whole filter tree.
///
/// For each requested frame the resolver asks the filter which upstream
/// frames it needs, resolves those recursively, and only then calls
/// `compute_frame`. Frames shared by several branches of one request (for
/// example a source feeding both sides of a ReplaceFrequency) are computed
/// once per request. Nothing is cached across requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameResolver;

type ClipKey = (usize, u64);

impl FrameResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn get_frame(&self, clip: &Clip, n: u64) -> Result<Arc<Frame>> {
        let mut resolved = HashMap::new();
        self.resolve(clip, n, &mut resolved)
    }

    fn resolve(
        &self,
        clip: &Clip,
        n: u64,
        resolved: &mut HashMap<ClipKey, Arc<Frame>>,
    ) -> Result<Arc<Frame>> {
        let info = clip.video_info();
        if n >= info.num_frames {
            bail!(
                "{}: frame {n} requested, clip has {} frames",
                clip.filter_name(),
                info.num_frames
            );
        }

        let key = (Arc::as_ptr(clip) as *const () as usize, n);
        if let Some(frame) = resolved.get(&key) {
            return Ok(frame.clone());
        }

        let inputs = clip.inputs();
        let mut upstream = Vec::new();
        for request in clip.frames_needed(n) {
            let input = inputs.get(request.input).ok_or_else(|| {
                anyhow!(
                    "{}: frame {n} requests input {} but the filter has {} input(s)",
                    clip.filter_name(),
                    request.input,
                    inputs.len()
                )
            })?;
            upstream.push(self.resolve(input, request.frame, resolved)?);
        }

        let ctx = FrameContext {
            frame_index: n,
            total_frames: Some(info.num_frames),
        };
        let frame = clip
            .compute_frame(n, &upstream, &ctx)
            .with_context(|| format!("{} failed on frame {n}", clip.filter_name()))?;

        let frame = Arc::new(frame);
        resolved.insert(key, frame.clone());
        Ok(frame)
    }
}

/// Single-threaded render: every frame in order straight into `sink`.
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn render<S: FrameSink + ?Sized>(clip: &Clip, sink: &mut S) -> Result<u64> {
        let resolver = FrameResolver::new();
        let total = clip.video_info().num_frames;
        for n in 0..total {
            let frame = resolver.get_frame(clip, n)?;
            sink.write_frame(&frame)
                .with_context(|| format!("failed to write frame {n}"))?;
        }
        sink.finish()?;
        Ok(total)
    }
}
