use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// A monitor handle could not be matched during adapter/output
    /// enumeration. Usually a stale mapping after a display change; the
    /// engine reinitializes once and retries before surfacing this.
    MonitorNotFound(String),

    /// Device creation failed for the adapter driving a monitor.
    NoDeviceAvailable,

    /// The GPU device entered a removed state. The registry disposes and
    /// recreates the device transparently on the next access.
    DeviceRemoved,

    /// No presented frame could be acquired within the attempt budget.
    FrameTimeout,

    /// The regions of one request resolve to more than one adapter.
    /// Composition across GPUs is not supported; no partial output is
    /// produced.
    CrossAdapterCaptureUnsupported,

    /// The duplication surface used a pixel format that is neither of
    /// the supported encodings (scRGB float16, BGRA8).
    UnsupportedPixelFormat(String),

    InvalidRequest(String),

    /// Pixel-count or byte-offset arithmetic overflowed.
    BufferOverflow,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InvalidRequest(_) => CaptureErrorClass::InvalidInput,
            Self::CrossAdapterCaptureUnsupported | Self::UnsupportedPixelFormat(_) => {
                CaptureErrorClass::Unsupported
            }
            Self::MonitorNotFound(_) | Self::DeviceRemoved | Self::FrameTimeout => {
                CaptureErrorClass::Transient
            }
            Self::NoDeviceAvailable | Self::BufferOverflow | Self::Platform(_) => {
                CaptureErrorClass::Fatal
            }
        }
    }

    /// Whether the engine should tear everything down, reinitialize, and
    /// retry the call once before giving up.
    pub(crate) fn wants_reinit(&self) -> bool {
        matches!(self, Self::MonitorNotFound(_))
    }

    /// Wrap a lower-level error as the single application-level failure
    /// surfaced to the caller after cleanup.
    pub(crate) fn wrapped(self, context: &'static str) -> Self {
        match self {
            Self::Platform(inner) => Self::Platform(inner.context(context)),
            other => Self::Platform(anyhow::Error::new(other).context(context)),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MonitorNotFound(name) => {
                write!(f, "monitor could not be matched during enumeration: {name}")
            }
            Self::NoDeviceAvailable => write!(f, "could not create a device for screen capture"),
            Self::DeviceRemoved => write!(f, "graphics device was removed"),
            Self::FrameTimeout => write!(f, "failed to acquire a presented frame within timeout"),
            Self::CrossAdapterCaptureUnsupported => {
                write!(f, "capture regions span multiple graphics adapters")
            }
            Self::UnsupportedPixelFormat(format) => {
                write!(f, "unsupported capture surface format: {format}")
            }
            Self::InvalidRequest(message) => write!(f, "invalid capture request: {message}"),
            Self::BufferOverflow => write!(f, "pixel buffer size overflow"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_classified_transient() {
        assert_eq!(
            CaptureError::DeviceRemoved.class(),
            CaptureErrorClass::Transient
        );
        assert_eq!(
            CaptureError::FrameTimeout.class(),
            CaptureErrorClass::Transient
        );
        assert_eq!(
            CaptureError::MonitorNotFound("\\\\.\\DISPLAY1".into()).class(),
            CaptureErrorClass::Transient
        );
    }

    #[test]
    fn only_stale_monitor_mapping_triggers_reinit() {
        assert!(CaptureError::MonitorNotFound("x".into()).wants_reinit());
        assert!(!CaptureError::DeviceRemoved.wants_reinit());
        assert!(!CaptureError::CrossAdapterCaptureUnsupported.wants_reinit());
    }

    #[test]
    fn wrapped_error_preserves_cause_chain() {
        let wrapped =
            CaptureError::CrossAdapterCaptureUnsupported.wrapped("screenshot capture failed");
        let CaptureError::Platform(inner) = &wrapped else {
            panic!("expected Platform variant");
        };
        let chain = format!("{inner:#}");
        assert!(chain.contains("screenshot capture failed"));
        assert!(chain.contains("multiple graphics adapters"));
    }
}
