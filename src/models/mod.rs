pub mod common;
pub mod decoded;
pub mod errors;
pub mod traces;
