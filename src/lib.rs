pub mod accounts;
pub mod apk;
pub mod build;
pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod hasher;
pub mod logging;
pub mod observer;
pub mod reproducible;
pub mod sandbox;
pub mod sbom;
pub mod supervision;

pub use build::{BuildContext, ImageBuilder};
pub use error::BuildError;
