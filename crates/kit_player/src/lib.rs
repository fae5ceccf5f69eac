//! kit_player - 播放器状态同步核心
//!
//! 把原生引擎的异步回调统一成一个可订阅的状态快照，
//! 并提供面向插件层的播放器 API。

mod config;
mod engine;
mod error;
mod media;
mod multiplexer;
mod player;
mod state;
mod store;
mod stream;

#[cfg(test)]
mod fake;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use media::*;
pub use player::*;
pub use state::*;
pub use stream::*;
