#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod client;
pub mod delay;
pub mod proxy;
pub mod rewrite;
pub mod scenario;
pub mod tls;
pub mod utils;
