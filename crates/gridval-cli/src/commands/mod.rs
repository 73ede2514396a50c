pub mod batch;
pub mod completions;
pub mod config;
pub mod portfolio;
pub mod resolve;
pub mod retro;
pub mod runs;
pub mod score;
pub mod valuate;
