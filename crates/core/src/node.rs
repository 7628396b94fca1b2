use std::sync::Arc;

use anyhow::Result;

use crate::types::{Frame, PortType, VideoInfo};

/// Shared handle to a filter; the graph and downstream filters each hold one.
pub type Clip = Arc<dyn FrameFilter>;

#[derive(Debug, Clone, PartialEq)]
pub struct PortDefinition {
    pub name: String,
    pub port_type: PortType,
    pub required: bool,
    pub default_value: Option<serde_json::Value>,
}

impl PortDefinition {
    pub fn required(name: &str, port_type: PortType) -> Self {
        Self {
            name: name.to_string(),
            port_type,
            required: true,
            default_value: None,
        }
    }

    pub fn optional(name: &str, port_type: PortType, default_value: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            port_type,
            required: false,
            default_value: Some(default_value),
        }
    }
}

/// One upstream frame a filter needs before it can compute its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest {
    /// Index into [`FrameFilter::inputs`].
    pub input: usize,
    pub frame: u64,
}

impl FrameRequest {
    pub fn new(input: usize, frame: u64) -> Self {
        Self { input, frame }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameContext {
    pub frame_index: u64,
    pub total_frames: Option<u64>,
}

impl FrameContext {
    pub fn progress(&self) -> Option<f32> {
        let total = self.total_frames?;
        if total == 0 {
            return Some(0.0);
        }

        Some((self.frame_index as f32 / total as f32).clamp(0.0, 1.0))
    }
}

/// A node in the frame graph.
///
/// Output frames are produced in two phases: the host asks which upstream
/// frames are needed, resolves all of them, then calls
/// [`compute_frame`](FrameFilter::compute_frame) exactly once with the
/// resolved frames in request order. Each frame index is independent, so the
/// host may compute any number of indices concurrently.
pub trait FrameFilter: Send + Sync {
    fn filter_name(&self) -> &str;

    fn video_info(&self) -> &VideoInfo;

    /// Upstream clips owned by this filter. Empty for sources.
    fn inputs(&self) -> &[Clip] {
        &[]
    }

    /// Phase one: upstream frames required for output frame `n`.
    fn frames_needed(&self, _n: u64) -> Vec<FrameRequest> {
        Vec::new()
    }

    /// Phase two: produce output frame `n` from the resolved requests.
    fn compute_frame(&self, n: u64, resolved: &[Arc<Frame>], ctx: &FrameContext)
        -> Result<Frame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_definition_creation() {
        let input = PortDefinition::required("clip", PortType::Clip);
        let radius = PortDefinition::optional("radius", PortType::Int, serde_json::json!(1));

        assert_eq!(input.name, "clip");
        assert_eq!(input.port_type, PortType::Clip);
        assert!(input.required);
        assert!(input.default_value.is_none());

        assert_eq!(radius.name, "radius");
        assert!(!radius.required);
        assert_eq!(radius.default_value, Some(serde_json::json!(1)));
    }

    #[test]
    fn test_frame_context_progress() {
        let ctx = FrameContext {
            frame_index: 5,
            total_frames: Some(10),
        };
        assert_eq!(ctx.progress(), Some(0.5));
        assert_eq!(FrameContext::default().progress(), None);

        let empty = FrameContext {
            frame_index: 3,
            total_frames: Some(0),
        };
        assert_eq!(empty.progress(), Some(0.0));
    }
}
