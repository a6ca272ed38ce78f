#![allow(unused_macros)]
//! Internal diagnostic macros.
//!
//! The pipeline must never log through itself: a failing exporter that
//! reported its failure as a pipeline log record would feed the failure
//! straight back into the queue it cannot drain. These macros route
//! diagnostics to the [`tracing`] ecosystem instead, behind the
//! `internal-diagnostics` feature (enabled by default). When running
//! tests with `--nocapture` they print to stdout, which helps when
//! debugging worker-thread timing.

/// Log an informational diagnostic event.
///
/// # Fields:
/// - `name`: the operation or action being reported.
/// - Additional key-value pairs can be passed as attributes.
#[macro_export]
macro_rules! diag_info {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("diag_info: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = $name; // Compiler will optimize this out as it's unused.
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }

        #[cfg(test)]
        {
            print!("diag_info: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = ($name, $($value),+); // Compiler will optimize this out as it's unused.
        }
    };
}

/// Log a warning-level diagnostic event.
#[macro_export]
macro_rules! diag_warn {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("diag_warn: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = $name; // Compiler will optimize this out as it's unused.
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }

        #[cfg(test)]
        {
            print!("diag_warn: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = ($name, $($value),+); // Compiler will optimize this out as it's unused.
        }
    };
}

/// Log a debug-level diagnostic event.
#[macro_export]
macro_rules! diag_debug {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("diag_debug: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = $name; // Compiler will optimize this out as it's unused.
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }

        #[cfg(test)]
        {
            print!("diag_debug: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = ($name, $($value),+); // Compiler will optimize this out as it's unused.
        }
    };
}

/// Log an error-level diagnostic event.
#[macro_export]
macro_rules! diag_error {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("diag_error: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = $name; // Compiler will optimize this out as it's unused.
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-diagnostics")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }

        #[cfg(test)]
        {
            print!("diag_error: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-diagnostics"), not(test)))]
        {
            let _ = ($name, $($value),+); // Compiler will optimize this out as it's unused.
        }
    };
}
