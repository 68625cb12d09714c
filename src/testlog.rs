//! Logging for tests.
//!
//! Routes `log` output through env_logger, so `RUST_LOG=debug cargo test` shows the scanner
//! chatter.  Safe to call from every test; only the first call installs the logger.

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}
