//! 状态存储

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{PlayerEvent, PlayerState, PlayerStream};

struct Snapshot {
    state: Arc<PlayerState>,
    closed: bool,
}

/// 持有唯一的当前快照，并把字段变化转发给订阅者
pub(crate) struct StateStore {
    current: RwLock<Snapshot>,
    stream: PlayerStream,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Snapshot {
                state: Arc::new(PlayerState::default()),
                closed: false,
            }),
            stream: PlayerStream::new(),
        }
    }

    pub fn state(&self) -> Arc<PlayerState> {
        self.current.read().state.clone()
    }

    pub fn stream(&self) -> &PlayerStream {
        &self.stream
    }

    /// 原子地应用一组补丁，返回实际发出的事件数
    ///
    /// 整组只生成一个新快照；只有值发生变化的字段会被发出，顺序与补丁顺序一致。
    pub fn commit<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = PlayerEvent>,
    {
        let mut current = self.current.write();
        if current.closed {
            return 0;
        }

        let mut next = PlayerState::clone(&current.state);
        let changed: Vec<PlayerEvent> = events
            .into_iter()
            .filter(|event| next.apply(event))
            .collect();

        if changed.iter().any(PlayerEvent::is_state) {
            current.state = Arc::new(next);
        }

        // 持有写锁发布，保证订阅者看到的顺序与应用顺序一致
        let count = changed.len();
        for event in changed {
            self.stream.publish(event);
        }
        count
    }

    pub fn apply(&self, event: PlayerEvent) -> bool {
        self.commit([event]) > 0
    }

    /// 关闭后不再接受补丁，所有订阅结束
    pub fn close(&self) {
        let mut current = self.current.write();
        current.closed = true;
        self.stream.close();
    }

    pub fn is_closed(&self) -> bool {
        self.current.read().closed
    }
}
