#[path = "../common/mod.rs"]
mod common;

mod generation;
mod streaming;
