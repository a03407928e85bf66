#![doc = include_str!("../README.md")]

mod error;

pub mod link;
pub mod protocol;
pub mod session;
pub mod transmission;

pub use error::{Error, Result};
