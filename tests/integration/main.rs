//! Integration test binary. All integration tests live in one binary to keep
//! link times down.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod backend_contract;
mod config_roundtrip;
mod session_scenarios;
mod synthesis_contract;
