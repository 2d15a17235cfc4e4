pub mod client;
pub mod config;
pub mod error;
pub mod interlang;
pub mod interlang_fix;
pub mod redirect_fix;
pub mod remote;
pub mod resolver;
pub mod sandbox;
pub mod timestamp;

#[cfg(test)]
mod test_support;
