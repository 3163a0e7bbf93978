//! Logging macros shared by this crate.
//!
//! Mirrors the `fmt.rs` convention used across the embedded-hal ecosystem: the
//! same call site compiles to `defmt`, to `log`, or to nothing, depending on
//! which (if any) logging feature is enabled. Exactly one of `defmt`/`log`
//! should be enabled at a time; with neither, the macros discard their
//! arguments so call sites never need `#[cfg]`.

#![allow(unused_macros)]
#![allow(unused_imports)]

macro_rules! trace {
    ($($x:tt)*) => {
        {
            #[cfg(feature = "log")]
            ::log::trace!($($x)*);
            #[cfg(feature = "defmt")]
            ::defmt::trace!($($x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($($x)*,);
        }
    };
}

macro_rules! debug {
    ($($x:tt)*) => {
        {
            #[cfg(feature = "log")]
            ::log::debug!($($x)*);
            #[cfg(feature = "defmt")]
            ::defmt::debug!($($x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($($x)*,);
        }
    };
}

macro_rules! info {
    ($($x:tt)*) => {
        {
            #[cfg(feature = "log")]
            ::log::info!($($x)*);
            #[cfg(feature = "defmt")]
            ::defmt::info!($($x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($($x)*,);
        }
    };
}

macro_rules! warn {
    ($($x:tt)*) => {
        {
            #[cfg(feature = "log")]
            ::log::warn!($($x)*);
            #[cfg(feature = "defmt")]
            ::defmt::warn!($($x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($($x)*,);
        }
    };
}

macro_rules! error {
    ($($x:tt)*) => {
        {
            #[cfg(feature = "log")]
            ::log::error!($($x)*);
            #[cfg(feature = "defmt")]
            ::defmt::error!($($x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($($x)*,);
        }
    };
}

pub(crate) use debug;
pub(crate) use error;
pub(crate) use info;
pub(crate) use trace;
pub(crate) use warn;
