pub mod client;
pub mod decode;
pub mod dns;
pub mod limiter;
pub mod robots;
pub mod tls;

pub use client::{FetcherConfig, HttpFetcher};
pub use limiter::FetchGate;
pub use robots::{RobotsPolicy, RobotsVerdict};
