//! Mathematical utilities: closed-form fit inversion and setting rounding.

pub mod roots;

pub use roots::*;
