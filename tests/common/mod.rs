#![allow(dead_code)]
#![allow(unused_imports)]

mod app;
mod factory;

pub use app::{test_engine_config, MockTarget, TestEngine, TOKEN};
pub use factory::{status_is, Factory};
