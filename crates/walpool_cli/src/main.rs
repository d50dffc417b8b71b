//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `walpool_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    // Why: keep a tiny CLI probe to validate core crate wiring independently
    // from any embedding runtime setup.
    println!("walpool_core ping={}", walpool_core::ping());
    println!("walpool_core version={}", walpool_core::core_version());
}
