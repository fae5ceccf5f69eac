//! kit_mpv - 通过 JSON IPC 驱动 mpv 进程的引擎适配器

mod engine;
mod error;
mod ipc;
mod options;
mod screenshot;

pub use engine::MpvEngine;
pub use error::IpcError;
pub use ipc::{IpcClient, MpvEvent};
pub use options::MpvOptions;
pub use screenshot::png_to_bgra;
