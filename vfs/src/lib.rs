#![no_std]

mod error;
mod stat;

pub use self::{error::Error, stat::Stat};
