pub mod error;
pub mod config;
pub mod uri;
pub mod driver;
pub mod folders;
pub mod index;
pub mod query;
pub mod repo;
pub mod table;
pub mod lock;
pub mod catalog;
pub mod cache;
pub mod object;

pub use error::{AppError, AppResult};
pub use uri::DocUri;

// Test-only printing helper: expands to eprintln! during tests and debug builds and is absent otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
