//! SenseVoice engine session: process, protocol, worker and post-processing.

pub mod post_process;
pub mod process;
pub mod protocol;
pub mod session;
pub mod transcriber;
pub mod worker;
