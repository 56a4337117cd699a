use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::types::ChatId;
use tokio::sync::mpsc;

use crate::codegen::protocol::GeneratePayload;

/// One queued image-to-code job.
#[derive(Debug)]
pub struct JobRequest {
    pub chat_id: ChatId,
    pub payload: GeneratePayload,
}

const SESSION_QUEUE_CAPACITY: usize = 4;

pub enum SessionSlot {
    /// A live session already exists for this user; the job must be queued
    /// on it rather than opening a second connection.
    Existing(mpsc::Sender<JobRequest>),
    /// This caller owns the fresh session and must spawn its task.
    New(mpsc::Sender<JobRequest>, mpsc::Receiver<JobRequest>),
}

/// At most one open backend connection per user. Check-and-insert happens
/// under a single lock, never held across an await.
#[derive(Clone, Default)]
pub struct JobSessions {
    inner: Arc<Mutex<HashMap<i64, mpsc::Sender<JobRequest>>>>,
}

impl JobSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, user_id: i64) -> SessionSlot {
        let mut map = self.inner.lock();
        if let Some(sender) = map.get(&user_id) {
            if !sender.is_closed() {
                return SessionSlot::Existing(sender.clone());
            }
        }
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        map.insert(user_id, tx.clone());
        SessionSlot::New(tx, rx)
    }

    /// Closed or errored sessions must be evicted so the next request
    /// opens a fresh connection.
    pub fn evict(&self, user_id: i64) {
        self.inner.lock().remove(&user_id);
    }

    #[allow(dead_code)]
    pub fn is_open(&self, user_id: i64) -> bool {
        self.inner
            .lock()
            .get(&user_id)
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
