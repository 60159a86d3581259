//! SenseVoice model acquisition.

pub mod download;
pub mod remote;

pub use download::{
    ModelSource, fetch_model, fetch_model_from, is_model_installed, local_model_path,
};
