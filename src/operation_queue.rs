use crate::drive_ops::{DriveOperations, RemoteFile};
use crate::error::{Result, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long an `Update` is held before dispatch, giving a newer update
/// for the same key a chance to supersede it.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);

/// Settling delay before the dispatcher's input channel is closed, so
/// in-flight debounce wakeups have a chance to observe `closed` under
/// the lock rather than sending on a torn-down channel.
const CLOSE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// A tagged union of the drive-level mutations the engine can submit.
#[derive(Debug, Clone)]
pub enum DriveOp {
    Create { name: String, bytes: Vec<u8>, parent_id: String, mime: String },
    Update { file_id: String, bytes: Vec<u8> },
    Delete { file_id: String },
    Download { file_id: String },
    List { query: String },
}

/// Successful result of a dispatched `DriveOp`.
#[derive(Debug, Clone)]
pub enum OpOutcome {
    Created(String),
    Updated,
    Deleted,
    Downloaded(Vec<u8>),
    Listed(Vec<RemoteFile>),
}

fn op_key(op: &DriveOp) -> String {
    match op {
        DriveOp::Create { name, parent_id, .. } => format!("create:{}:{}", name, parent_id),
        DriveOp::Update { file_id, .. } => file_id.clone(),
        DriveOp::Delete { file_id } => file_id.clone(),
        DriveOp::Download { file_id } => file_id.clone(),
        DriveOp::List { query } => format!("list:{}", query),
    }
}

struct QueueItem {
    op: DriveOp,
    result_tx: oneshot::Sender<Result<OpOutcome>>,
}

struct QueueState {
    closed: bool,
    /// Updates currently waiting out their debounce window, by key.
    held_updates: HashMap<String, QueueItem>,
    /// Monotonic generation per key; a debounce timer only fires the
    /// item it was started for if its generation is still current.
    generation: HashMap<String, u64>,
}

/// Serializes remote mutations per logical key, debounces updates, and
/// coalesces redundant/stale operations before they reach
/// `DriveOperations`.
pub struct OperationQueue {
    state: Arc<Mutex<QueueState>>,
    dispatch_tx: mpsc::UnboundedSender<QueueItem>,
    pending_count: Arc<AtomicUsize>,
}

impl OperationQueue {
    pub fn new(drive: Arc<dyn DriveOperations>) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<QueueItem>();
        let pending_count = Arc::new(AtomicUsize::new(0));
        tokio::spawn(Self::run_dispatcher(drive, dispatch_rx, pending_count.clone()));
        Self { state: Arc::new(Mutex::new(QueueState {
            closed: false,
            held_updates: HashMap::new(),
            generation: HashMap::new(),
        })), dispatch_tx, pending_count }
    }

    /// Single consumer draining the queue FIFO: per key, operations
    /// execute in enqueue order, minus cancellations.
    async fn run_dispatcher(
        drive: Arc<dyn DriveOperations>,
        mut rx: mpsc::UnboundedReceiver<QueueItem>,
        pending_count: Arc<AtomicUsize>,
    ) {
        while let Some(item) = rx.recv().await {
            let outcome = Self::execute(&drive, item.op).await;
            // Errors and successful outcomes both go over the single
            // result channel; the item always has exactly one consumer.
            let _ = item.result_tx.send(outcome);
            pending_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn execute(drive: &Arc<dyn DriveOperations>, op: DriveOp) -> Result<OpOutcome> {
        match op {
            DriveOp::Create { name, bytes, parent_id, mime } => {
                drive.create_file(&name, bytes, &parent_id, &mime).await.map(OpOutcome::Created)
            }
            DriveOp::Update { file_id, bytes } => {
                drive.update_file(&file_id, bytes).await.map(|_| OpOutcome::Updated)
            }
            DriveOp::Delete { file_id } => drive.delete_file(&file_id).await.map(|_| OpOutcome::Deleted),
            DriveOp::Download { file_id } => drive.download_file(&file_id).await.map(OpOutcome::Downloaded),
            DriveOp::List { query } => drive.list_files(&query).await.map(OpOutcome::Listed),
        }
    }

    fn dispatch_now(&self, item: QueueItem) {
        self.pending_count.fetch_add(1, Ordering::SeqCst);
        if self.dispatch_tx.send(item).is_err() {
            // Channel gone (queue closed mid-flight); caller already holds
            // no other reference to the result sender, so this is silent.
            self.pending_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Submit an operation and await its outcome.
    pub async fn submit(&self, op: DriveOp) -> Result<OpOutcome> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(op, tx);
        rx.await.unwrap_or(Err(SyncError::Cancelled))
    }

    fn enqueue(&self, op: DriveOp, result_tx: oneshot::Sender<Result<OpOutcome>>) {
        let key = op_key(&op);
        let mut state = self.state.lock().unwrap();
        if state.closed {
            let _ = result_tx.send(Err(SyncError::Cancelled));
            return;
        }

        match &op {
            DriveOp::Delete { .. } => {
                // DELETE(key): cancel all pending items for key, enqueue delete.
                if let Some(old) = state.held_updates.remove(&key) {
                    let _ = old.result_tx.send(Err(SyncError::Cancelled));
                }
                state.generation.remove(&key);
                drop(state);
                self.dispatch_now(QueueItem { op, result_tx });
            }
            DriveOp::Update { .. } => {
                // UPDATE(key) when UPDATE already pending: cancel old, start fresh timer.
                if let Some(old) = state.held_updates.remove(&key) {
                    let _ = old.result_tx.send(Err(SyncError::Cancelled));
                }
                let gen = state.generation.entry(key.clone()).or_insert(0);
                *gen += 1;
                let my_gen = *gen;
                state.held_updates.insert(key.clone(), QueueItem { op, result_tx });
                drop(state);
                self.spawn_debounce_timer(key, my_gen);
            }
            _ => {
                // CREATE, DOWNLOAD, LIST: all other combinations append immediately.
                drop(state);
                self.dispatch_now(QueueItem { op, result_tx });
            }
        }
    }

    fn spawn_debounce_timer(&self, key: String, my_gen: u64) {
        let state = self.state.clone();
        let dispatch_tx = self.dispatch_tx.clone();
        let pending_count = self.pending_count.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            let mut guard = state.lock().unwrap();
            if guard.closed {
                return;
            }
            if guard.generation.get(&key) != Some(&my_gen) {
                // Superseded or cancelled while we slept; the item that
                // replaced us (or the Delete that cancelled us) already
                // resolved our result channel.
                return;
            }
            if let Some(item) = guard.held_updates.remove(&key) {
                pending_count.fetch_add(1, Ordering::SeqCst);
                drop(guard);
                if dispatch_tx.send(item).is_err() {
                    pending_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });
    }

    /// Exposes emptiness so the poller can skip a tick while writes
    /// are in flight.
    pub fn has_items(&self) -> bool {
        self.pending_count.load(Ordering::SeqCst) > 0
            || !self.state.lock().unwrap().held_updates.is_empty()
    }

    /// Flip `closed` under lock, cancel remaining held items, wait the
    /// settling delay, then stop accepting new submissions.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            for (_, item) in state.held_updates.drain() {
                let _ = item.result_tx.send(Err(SyncError::Cancelled));
            }
        }
        tokio::time::sleep(CLOSE_SETTLE_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_ops::{ChangesPage, RemoteMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeDrive {
        updates_seen: Arc<Mutex<Vec<Vec<u8>>>>,
        deletes_seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl DriveOperations for FakeDrive {
        async fn create_file(&self, _name: &str, _bytes: Vec<u8>, _parent_id: &str, _mime: &str) -> Result<String> {
            Ok("new-id".to_string())
        }
        async fn update_file(&self, _file_id: &str, bytes: Vec<u8>) -> Result<()> {
            self.updates_seen.lock().unwrap().push(bytes);
            Ok(())
        }
        async fn delete_file(&self, _file_id: &str) -> Result<()> {
            self.deletes_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn create_folder(&self, _name: &str, _parent_id: &str) -> Result<String> {
            Ok("folder-id".to_string())
        }
        async fn list_files(&self, _query: &str) -> Result<Vec<RemoteFile>> {
            Ok(vec![])
        }
        async fn get_file_metadata(&self, _file_id: &str) -> Result<RemoteMetadata> {
            Ok(RemoteMetadata { id: "x".to_string(), md5_checksum: None, modified_time: None })
        }
        async fn get_start_page_token(&self) -> Result<String> {
            Ok("tok".to_string())
        }
        async fn list_changes(&self, _page_token: &str) -> Result<ChangesPage> {
            Ok(ChangesPage { changes: vec![], new_start_page_token: None })
        }
    }

    #[tokio::test]
    async fn debounced_updates_coalesce_to_the_last_one() {
        let updates_seen = Arc::new(Mutex::new(Vec::new()));
        let drive = Arc::new(FakeDrive { updates_seen: updates_seen.clone(), deletes_seen: Arc::new(AtomicU32::new(0)) });
        let queue = OperationQueue::new(drive);

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();
        queue.enqueue(DriveOp::Update { file_id: "f".to_string(), bytes: b"v1".to_vec() }, tx1);
        queue.enqueue(DriveOp::Update { file_id: "f".to_string(), bytes: b"v2".to_vec() }, tx2);
        queue.enqueue(DriveOp::Update { file_id: "f".to_string(), bytes: b"v3".to_vec() }, tx3);

        assert!(rx1.await.unwrap().unwrap_err().is_cancelled_like());
        assert!(rx2.await.unwrap().unwrap_err().is_cancelled_like());

        tokio::time::sleep(Duration::from_millis(3200)).await;
        assert!(matches!(rx3.await.unwrap(), Ok(OpOutcome::Updated)));
        assert_eq!(updates_seen.lock().unwrap().as_slice(), &[b"v3".to_vec()]);
    }

    #[tokio::test]
    async fn delete_cancels_pending_update_for_same_key() {
        let drive = Arc::new(FakeDrive { updates_seen: Arc::new(Mutex::new(Vec::new())), deletes_seen: Arc::new(AtomicU32::new(0)) });
        let deletes_seen = drive.deletes_seen.clone();
        let queue = OperationQueue::new(drive);

        let (tx1, rx1) = oneshot::channel();
        queue.enqueue(DriveOp::Update { file_id: "f".to_string(), bytes: b"v1".to_vec() }, tx1);

        let outcome = queue.submit(DriveOp::Delete { file_id: "f".to_string() }).await;
        assert!(matches!(outcome, Ok(OpOutcome::Deleted)));
        assert!(rx1.await.unwrap().unwrap_err().is_cancelled_like());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(deletes_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn has_items_reflects_pending_debounce_and_inflight_work() {
        let drive = Arc::new(FakeDrive { updates_seen: Arc::new(Mutex::new(Vec::new())), deletes_seen: Arc::new(AtomicU32::new(0)) });
        let queue = OperationQueue::new(drive);
        assert!(!queue.has_items());

        let (tx, _rx) = oneshot::channel();
        queue.enqueue(DriveOp::Update { file_id: "f".to_string(), bytes: vec![] }, tx);
        assert!(queue.has_items());
    }

    trait CancelledLike {
        fn is_cancelled_like(&self) -> bool;
    }
    impl CancelledLike for SyncError {
        fn is_cancelled_like(&self) -> bool {
            self.is_cancelled()
        }
    }
}
