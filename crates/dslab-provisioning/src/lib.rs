#![doc = include_str!("../readme.md")]

pub mod core;
pub mod extensions;
pub mod log;

pub use colored;

#[cfg(test)]
mod tests;
