//! Logging shim.
//!
//! On the target the messages go out through `defmt`, on the host through
//! the `log` facade.  Without either feature the macros vanish, but still
//! borrow their arguments so that nothing becomes unused.

#[cfg(feature = "defmt")]
pub(crate) use ::defmt::{debug, error, info, trace, warn};

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use ::log::{debug, error, info, trace, warn};

#[cfg(not(any(feature = "log", feature = "defmt")))]
mod quiet {
    macro_rules! quiet {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{
            $( let _ = &$arg; )*
        }};
    }
    pub(crate) use quiet as debug;
    pub(crate) use quiet as error;
    pub(crate) use quiet as info;
    pub(crate) use quiet as trace;
    pub(crate) use quiet as warn;
}

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) use quiet::{debug, error, info, trace, warn};
