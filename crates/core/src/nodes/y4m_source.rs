//! Y4mSource: random-access reader for YUV4MPEG2 files.
//!
//! The file is scanned once at open to record where every frame payload
//! starts, so any frame index can later be read with one seek.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;

use crate::node::{FrameContext, FrameFilter, PortDefinition};
use crate::registry::FilterArgs;
use crate::types::{Frame, PortType, VideoInfo};
use crate::y4m::{Y4mHeader, FRAME_MAGIC, MAX_LINE_BYTES};

pub const NAME: &str = "Y4mSource";

pub struct Y4mSource {
    path: PathBuf,
    header: Y4mHeader,
    info: VideoInfo,
    offsets: Vec<u64>,
    file: Mutex<File>,
}

impl Y4mSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let mut reader = BufReader::new(file);

        let header_line = read_line(&mut reader)
            .with_context(|| format!("failed to read Y4M header from {}", path.display()))?;
        let header = Y4mHeader::parse(&header_line)
            .with_context(|| format!("invalid Y4M header in {}", path.display()))?;
        let frame_bytes = header.frame_bytes() as u64;

        let mut offsets = Vec::new();
        loop {
            let marker_start = reader.stream_position()?;
            if marker_start >= file_len {
                break;
            }
            let marker = read_line(&mut reader).with_context(|| {
                format!("failed to read frame {} marker in {}", offsets.len(), path.display())
            })?;
            if !marker.starts_with(FRAME_MAGIC) {
                bail!(
                    "expected FRAME marker for frame {} at byte {marker_start} in {}",
                    offsets.len(),
                    path.display()
                );
            }

            let payload_start = reader.stream_position()?;
            if payload_start + frame_bytes > file_len {
                bail!(
                    "frame {} in {} is truncated ({} of {frame_bytes} bytes)",
                    offsets.len(),
                    path.display(),
                    file_len - payload_start
                );
            }
            offsets.push(payload_start);
            reader.seek(SeekFrom::Start(payload_start + frame_bytes))?;
        }

        if offsets.is_empty() {
            bail!("{} contains no frames", path.display());
        }

        let info = header.video_info(offsets.len() as u64);
        info!(
            path = %path.display(),
            format = %header.format,
            width = header.width,
            height = header.height,
            frames = offsets.len(),
            "Opened Y4M source"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            info,
            offsets,
            file: Mutex::new(reader.into_inner()),
        })
    }

    pub fn from_args(args: &FilterArgs) -> Result<Self> {
        Self::open(args.path("path")?)
    }

    pub fn ports() -> Vec<PortDefinition> {
        vec![PortDefinition::required("path", PortType::Path)]
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameFilter for Y4mSource {
    fn filter_name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn compute_frame(&self, n: u64, _resolved: &[Arc<Frame>], _ctx: &FrameContext) -> Result<Frame> {
        let offset = *self.offsets.get(n as usize).ok_or_else(|| {
            anyhow!(
                "{NAME}: frame {n} out of range ({} has {} frames)",
                self.path.display(),
                self.offsets.len()
            )
        })?;

        let mut payload = vec![0u8; self.header.frame_bytes()];
        {
            let mut file = self
                .file
                .lock()
                .map_err(|_| anyhow!("{NAME}: file handle lock poisoned"))?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut payload)
                .with_context(|| format!("failed to read frame {n} from {}", self.path.display()))?;
        }

        self.header.decode_frame(&payload)
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut line = Vec::new();
    reader.by_ref().take(MAX_LINE_BYTES).read_until(b'\n', &mut line)?;
    if line.last() != Some(&b'\n') {
        bail!("line is unterminated or longer than {MAX_LINE_BYTES} bytes");
    }
    line.pop();
    String::from_utf8(line).context("line is not valid UTF-8")
}
