//! Logging utilities with automatic file:line injection
//!
//! Wrapper macros around the `log` crate that prefix every line with the source
//! location, so a serial capture can be traced back to the code that wrote it.
//!
//! Format: `[file:line] module::path: message`
//!
//! ```ignore
//! info!("plugin::registry: Activated plugin '{}'", name);
//! // [src/plugin/registry.rs:140] plugin::registry: Activated plugin 'fade'
//! ```

use std::fmt;

/// Shared body of the level macros. `file!()`/`line!()` resolve to the
/// outermost invocation, i.e. the caller of `info!` and friends.
#[doc(hidden)]
#[macro_export]
macro_rules! located {
    ($level:ident, $($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::$level!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

/// Info-level log with automatic file:line prefix
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::located!(info, $($arg)*) };
}

/// Warning-level log with automatic file:line prefix
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::located!(warn, $($arg)*) };
}

/// Error-level log with automatic file:line prefix
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::located!(error, $($arg)*) };
}

/// Debug-level log with automatic file:line prefix
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::located!(debug, $($arg)*) };
}

/// Trace-level log with automatic file:line prefix
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::located!(trace, $($arg)*) };
}

/// Hex dump of a frame for log lines, truncated after 16 bytes.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 16;
        for (i, byte) in self.0.iter().take(SHOWN).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        if self.0.len() > SHOWN {
            write!(f, " .. ({} bytes)", self.0.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_short_frame() {
        assert_eq!(Hex(&[0x05, 0x1F]).to_string(), "05 1F");
        assert_eq!(Hex(&[]).to_string(), "");
    }

    #[test]
    fn test_hex_truncates_long_frame() {
        let frame = [0xAAu8; 20];
        let text = Hex(&frame).to_string();
        assert!(text.ends_with(".. (20 bytes)"));
        assert_eq!(text.matches("AA").count(), 16);
    }
}
