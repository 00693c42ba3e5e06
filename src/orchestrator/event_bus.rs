//! 事件总线 - 编排层
//!
//! 每个运行一条有序、只追加的事件队列：驱动器是唯一生产者，
//! 消费者任意多。序号由存储层分配（从 1 开始连续无空洞），
//! 因此补读可以脱离实时分发、直接按序号从持久日志读取。
//!
//! 流结束标记只在真正终态（完成/失败/取消）时追加，挂起时绝不追加，
//! 阻塞中的消费者会正确地跨越挂起/恢复继续等待，而不是看到假结束。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::StoreError;
use crate::infrastructure::run_store::RunStore;
use crate::models::run::{EventKind, RunEvent};

struct BusEntry {
    notify: Arc<Notify>,
    listeners: Vec<mpsc::UnboundedSender<RunEvent>>,
}

impl BusEntry {
    fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            listeners: Vec::new(),
        }
    }
}

/// 事件总线
pub struct EventBus {
    store: Arc<dyn RunStore>,
    inner: Mutex<HashMap<String, BusEntry>>,
    poll_interval: Duration,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(store: Arc<dyn RunStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            inner: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }

    /// 发布事件（仅驱动器调用，单写多读）
    ///
    /// 先落持久日志、再做实时分发；发送失败的监听者记日志后
    /// 移出分发列表，不影响运行本身。
    pub fn publish(
        &self,
        run_id: &str,
        kind: EventKind,
        stage: Option<&str>,
        payload: JsonValue,
    ) -> Result<RunEvent, StoreError> {
        let event = self
            .store
            .append_event(run_id, kind, stage.map(str::to_string), payload)?;

        let mut inner = self.inner.lock().expect("事件总线锁中毒");
        let entry = inner
            .entry(run_id.to_string())
            .or_insert_with(BusEntry::new);

        entry.listeners.retain(|tx| {
            if tx.send(event.clone()).is_err() {
                warn!("[运行 {}] 事件监听者已失效，移出分发列表", run_id);
                false
            } else {
                true
            }
        });
        entry.notify.notify_waiters();

        Ok(event)
    }

    /// 订阅实时分发（只收到订阅之后发布的事件）
    pub fn subscribe_live(&self, run_id: &str) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("事件总线锁中毒");
        inner
            .entry(run_id.to_string())
            .or_insert_with(BusEntry::new)
            .listeners
            .push(tx);
        rx
    }

    /// 打开补读事件流（从序号 1 开始，无空洞）
    pub fn stream(&self, run_id: &str) -> RunEventStream {
        let notify = {
            let mut inner = self.inner.lock().expect("事件总线锁中毒");
            inner
                .entry(run_id.to_string())
                .or_insert_with(BusEntry::new)
                .notify
                .clone()
        };
        RunEventStream {
            store: self.store.clone(),
            notify,
            run_id: run_id.to_string(),
            next_sequence: 1,
            poll_interval: self.poll_interval,
        }
    }
}

/// 补读事件流
///
/// 先追平持久日志，再等待新事件；等待是非忙等的：
/// 靠通知唤醒，辅以短兜底轮询重查，防止通知与落盘之间的竞态。
/// 读到流结束标记后返回 None；挂起的运行不会产生结束标记，
/// 流会一直阻塞到恢复后的事件到来。
pub struct RunEventStream {
    store: Arc<dyn RunStore>,
    notify: Arc<Notify>,
    run_id: String,
    next_sequence: u64,
    poll_interval: Duration,
}

impl RunEventStream {
    /// 读取下一条事件；流结束时返回 None
    pub async fn next(&mut self) -> Option<RunEvent> {
        loop {
            if let Some(event) = self.store.event_at(&self.run_id, self.next_sequence) {
                self.next_sequence += 1;
                if event.kind.is_end_of_stream() {
                    return None;
                }
                return Some(event);
            }

            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// 下一条期望的序号（测试用）
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}
