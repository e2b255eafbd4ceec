//! Camera collaborator: acquire a frame source, pull frames, release on drop.

use rollcall_hw::{Camera, CameraError, Frame};

/// A live frame source owned by exactly one session.
///
/// `Ok(None)` means no frame is ready yet; the caller skips the tick.
/// Dropping the source releases the hardware.
pub trait FrameSource {
    fn grab(&mut self) -> Result<Option<Frame>, CameraError>;
}

impl FrameSource for Camera {
    fn grab(&mut self) -> Result<Option<Frame>, CameraError> {
        Camera::grab(self).map(Some)
    }
}

/// Opens frame sources. Called once per session start.
pub trait CameraProvider: Send + 'static {
    type Source: FrameSource;

    fn start(&self) -> Result<Self::Source, CameraError>;
}

/// V4L2 provider for a fixed device path.
pub struct V4lCameraProvider {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Frames discarded after opening while auto-exposure settles.
    pub warmup_frames: usize,
}

impl CameraProvider for V4lCameraProvider {
    type Source = ReadyGate<Camera>;

    fn start(&self) -> Result<Self::Source, CameraError> {
        let camera = Camera::open(&self.device, self.width, self.height)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            warmup = self.warmup_frames,
            "camera acquired"
        );
        Ok(ReadyGate::new(camera, self.warmup_frames))
    }
}

/// Reports "not ready" for the first `warmup` frames and for any dark
/// frame after that.
pub struct ReadyGate<S> {
    inner: S,
    warmup_remaining: usize,
}

impl<S: FrameSource> ReadyGate<S> {
    pub fn new(inner: S, warmup: usize) -> Self {
        Self {
            inner,
            warmup_remaining: warmup,
        }
    }
}

impl<S: FrameSource> FrameSource for ReadyGate<S> {
    fn grab(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(frame) = self.inner.grab()? else {
            return Ok(None);
        };
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            tracing::trace!(seq = frame.sequence, remaining = self.warmup_remaining, "discarding warmup frame");
            return Ok(None);
        }
        if frame.is_dark {
            tracing::trace!(seq = frame.sequence, "dark frame; not ready");
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
