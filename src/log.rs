//! Logging related definitions, forwarding to `tracing` when the
//! corresponding feature is enabled and compiling to nothing otherwise.

#[cfg(feature = "tracing")]
pub(crate) use tracing::debug;
#[cfg(feature = "tracing")]
pub(crate) use tracing::warn;

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($args:tt)*) => {{
        if false {
            let _ = ::std::format_args!($($args)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_ {
    ($($args:tt)*) => {{
        if false {
            let _ = ::std::format_args!($($args)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_ as warn;
