#![forbid(unsafe_code)]

//! Loop diagnostics on stderr, switched on by `REIN_DEBUG_TRACE`.
//!
//! Accepts `1`, `true`, `yes` or `on` (any case). Lines carry the milliseconds
//! since the first trace and the emitting thread, so output from
//! `rein-output` and the `rein-work-*` threads can be interleaved by eye.
//! When the variable is unset every call site is a single bool load.
//!
//! ```ignore
//! debug_trace!("queue size after accept: {}", len);
//! ```

use std::sync::LazyLock;
use std::time::Instant;

const ENV_VAR: &str = "REIN_DEBUG_TRACE";

static ENABLED: LazyLock<bool> =
    LazyLock::new(|| flag_enabled(std::env::var(ENV_VAR).ok().as_deref()));

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

fn flag_enabled(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let v = v.trim();
        ["1", "true", "yes", "on"]
            .iter()
            .any(|accepted| v.eq_ignore_ascii_case(accepted))
    })
}

#[inline]
pub fn is_enabled() -> bool {
    *ENABLED
}

/// Milliseconds since the first trace line.
#[inline]
pub fn elapsed_ms() -> u64 {
    u64::try_from(EPOCH.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Print a trace line to stderr when `REIN_DEBUG_TRACE` is on.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug_trace::is_enabled() {
            eprintln!(
                "[rein {:>8}ms {}] {}",
                $crate::debug_trace::elapsed_ms(),
                ::std::thread::current().name().unwrap_or("?"),
                format_args!($($arg)*)
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_flag_values() {
        for value in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(flag_enabled(Some(value)), "{value:?} should enable");
        }
    }

    #[test]
    fn unset_or_other_values_stay_off() {
        assert!(!flag_enabled(None));
        for value in ["", "0", "false", "off", "verbose"] {
            assert!(!flag_enabled(Some(value)), "{value:?} should not enable");
        }
    }

    #[test]
    fn elapsed_never_goes_backwards() {
        let before = elapsed_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(elapsed_ms() >= before);
    }
}
