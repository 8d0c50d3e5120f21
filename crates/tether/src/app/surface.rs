//! The window an application renders into.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    NeedsRedraw,
    Closed,
}

/// A renderable surface driven from the main thread.
///
/// Implementations wrap a real window toolkit. Everything here is called on the thread that
/// runs the `AppManager` loop, once per tick.
pub trait Surface {
    /// Processes pending window events.
    fn pump(&mut self) -> FrameStatus;

    fn set_title(&mut self, title: &str);
}

/// A surface with no window. Closes after a fixed number of frames or when its closer fires.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    title: String,
    frames: u64,
    close_after: Option<u64>,
    closed: Arc<AtomicBool>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `Closed` once `frames` frames have been pumped.
    pub fn close_after(mut self, frames: u64) -> Self {
        self.close_after = Some(frames);
        self
    }

    /// A handle that closes the surface from any thread.
    pub fn closer(&self) -> SurfaceCloser {
        SurfaceCloser { closed: self.closed.clone() }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Surface for HeadlessSurface {
    fn pump(&mut self) -> FrameStatus {
        let expired = self.close_after.is_some_and(|n| self.frames >= n);
        if self.closed.load(Ordering::Acquire) || expired {
            return FrameStatus::Closed;
        }
        self.frames += 1;
        FrameStatus::Ready
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_owned();
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceCloser {
    closed: Arc<AtomicBool>,
}

impl SurfaceCloser {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_surface_closes() {
        let mut surface = HeadlessSurface::new().close_after(2);
        assert_eq!(surface.pump(), FrameStatus::Ready);
        assert_eq!(surface.pump(), FrameStatus::Ready);
        assert_eq!(surface.pump(), FrameStatus::Closed);
        assert_eq!(surface.frames(), 2);

        let mut surface = HeadlessSurface::new();
        let closer = surface.closer();
        assert_eq!(surface.pump(), FrameStatus::Ready);
        closer.close();
        assert_eq!(surface.pump(), FrameStatus::Closed);
    }
}
