#![allow(dead_code)]

pub mod builders;
pub mod fake_worker;
pub mod strategies;

pub use builders::*;
pub use fake_worker::*;
