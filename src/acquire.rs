//! Frame-acquisition retry loop.
//!
//! Output duplication hands back three kinds of non-frames: timeouts
//! (nothing was presented within the wait), frames with a zero
//! presentation timestamp (the duplication has no content yet — desktop
//! images composited from them are stale or black), and hard failures
//! that invalidate the session. The loop here retries timeouts and
//! unpresented frames, forces a session recreation on anything else,
//! and completes only on a presented frame.
//!
//! Unlike the unbounded variant this design descends from, the loop
//! runs on an attempt budget: short waits while hunting for a presented
//! frame, then one longer last-chance wait that accepts an unpresented
//! frame, then `FrameTimeout`.

use crate::error::{CaptureError, CaptureResult};

/// Attempts at the short timeout that require a presentation timestamp.
const PRESENT_ATTEMPTS: usize = 24;
const PRESENT_TIMEOUT_MS: u32 = 16;
/// Final attempt: wait longer and take whatever the duplication has.
const FALLBACK_TIMEOUT_MS: u32 = 250;
/// Session recreations tolerated within one acquisition before the
/// failure is surfaced.
const MAX_RECREATIONS: usize = 2;

/// One poll against the duplication session.
pub(crate) enum FramePoll<F> {
    /// An acceptable frame (presented, or any frame when the poll ran
    /// with `accept_unpresented`).
    Frame(F),
    /// A frame without a presentation timestamp arrived and was
    /// released by the source; poll again.
    NotPresented,
    /// Nothing arrived within the wait.
    Timeout,
}

/// A source of duplication frames that can be torn down and rebuilt.
pub(crate) trait FrameSource {
    type Frame;

    /// Poll once with the given wait. With `accept_unpresented` the
    /// source must return frames regardless of their presentation
    /// timestamp; without it, unpresented frames are released and
    /// reported as [`FramePoll::NotPresented`]. `Err` means the
    /// acquisition failed for a reason other than a timeout (access
    /// lost, device error); the loop responds by recreating the
    /// session.
    fn try_acquire(
        &mut self,
        timeout_ms: u32,
        accept_unpresented: bool,
    ) -> CaptureResult<FramePoll<Self::Frame>>;

    /// Tear down and rebuild the underlying duplication session.
    fn recreate(&mut self) -> CaptureResult<()>;
}

/// Run the acquisition loop to completion.
pub(crate) fn acquire_presented_frame<S: FrameSource>(source: &mut S) -> CaptureResult<S::Frame> {
    let mut recreations = 0usize;
    let mut attempt = 0usize;

    while attempt < PRESENT_ATTEMPTS {
        attempt += 1;
        match source.try_acquire(PRESENT_TIMEOUT_MS, false) {
            Ok(FramePoll::Frame(frame)) => return Ok(frame),
            Ok(FramePoll::NotPresented) | Ok(FramePoll::Timeout) => {}
            Err(error) => {
                recreations += 1;
                if recreations > MAX_RECREATIONS {
                    return Err(error);
                }
                log::debug!("frame acquisition failed ({error}); recreating duplication session");
                source.recreate()?;
            }
        }
    }

    // Last chance: a longer wait, and an unpresented frame is better
    // than no screenshot at all.
    match source.try_acquire(FALLBACK_TIMEOUT_MS, true)? {
        FramePoll::Frame(frame) => Ok(frame),
        FramePoll::NotPresented | FramePoll::Timeout => Err(CaptureError::FrameTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Step {
        Present(u32),
        Unpresented(u32),
        Timeout,
        Fail,
    }

    struct ScriptedSource {
        steps: Vec<Step>,
        cursor: usize,
        recreations: usize,
        recreate_fails: bool,
        released: Vec<u32>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                cursor: 0,
                recreations: 0,
                recreate_fails: false,
                released: Vec::new(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        type Frame = u32;

        fn try_acquire(
            &mut self,
            _timeout_ms: u32,
            accept_unpresented: bool,
        ) -> CaptureResult<FramePoll<u32>> {
            let step = self.steps.get(self.cursor).unwrap_or(&Step::Timeout);
            self.cursor += 1;
            match step {
                Step::Present(id) => Ok(FramePoll::Frame(*id)),
                Step::Unpresented(id) if accept_unpresented => Ok(FramePoll::Frame(*id)),
                Step::Unpresented(id) => {
                    self.released.push(*id);
                    Ok(FramePoll::NotPresented)
                }
                Step::Timeout => Ok(FramePoll::Timeout),
                Step::Fail => Err(CaptureError::Platform(anyhow::anyhow!("access lost"))),
            }
        }

        fn recreate(&mut self) -> CaptureResult<()> {
            self.recreations += 1;
            if self.recreate_fails {
                return Err(CaptureError::NoDeviceAvailable);
            }
            Ok(())
        }
    }

    #[test]
    fn timeouts_are_retried_until_a_presented_frame() {
        let mut source = ScriptedSource::new(vec![Step::Timeout, Step::Timeout, Step::Present(7)]);
        assert_eq!(acquire_presented_frame(&mut source).unwrap(), 7);
        assert_eq!(source.recreations, 0);
    }

    #[test]
    fn unpresented_frames_are_released_and_skipped() {
        let mut source = ScriptedSource::new(vec![Step::Unpresented(1), Step::Present(2)]);
        assert_eq!(acquire_presented_frame(&mut source).unwrap(), 2);
        assert_eq!(source.released, vec![1]);
    }

    #[test]
    fn non_timeout_failure_forces_recreation_then_retry() {
        let mut source = ScriptedSource::new(vec![Step::Fail, Step::Present(3)]);
        assert_eq!(acquire_presented_frame(&mut source).unwrap(), 3);
        assert_eq!(source.recreations, 1);
    }

    #[test]
    fn repeated_failures_surface_after_recreation_budget() {
        let mut source =
            ScriptedSource::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Present(9)]);
        assert!(matches!(
            acquire_presented_frame(&mut source),
            Err(CaptureError::Platform(_))
        ));
        assert_eq!(source.recreations, 2);
    }

    #[test]
    fn exhausted_budget_accepts_unpresented_fallback() {
        let mut steps: Vec<Step> = (0..super::PRESENT_ATTEMPTS).map(|_| Step::Timeout).collect();
        steps.push(Step::Unpresented(42));
        let mut source = ScriptedSource::new(steps);
        assert_eq!(acquire_presented_frame(&mut source).unwrap(), 42);
        assert!(source.released.is_empty());
    }

    #[test]
    fn fully_idle_output_surfaces_frame_timeout() {
        let mut source = ScriptedSource::new(Vec::new());
        assert!(matches!(
            acquire_presented_frame(&mut source),
            Err(CaptureError::FrameTimeout)
        ));
    }

    #[test]
    fn recreation_failure_propagates() {
        let mut source = ScriptedSource::new(vec![Step::Fail, Step::Present(1)]);
        source.recreate_fails = true;
        assert!(matches!(
            acquire_presented_frame(&mut source),
            Err(CaptureError::NoDeviceAvailable)
        ));
    }
}
