/// Injected status-pulse sink. `Poller`/`SyncEngine` take one of these
/// at construction instead of reaching for a global event bus.
pub trait StatusSink: Send + Sync {
    /// One of `"syncing"`, `"synced"`, `"offline"`, or an ad-hoc
    /// error message.
    fn notify_status(&self, status: &str);

    /// A remote-initiated merge changed local notes; the UI should
    /// reload its in-memory copy.
    fn notify_synced_and_reload(&self);

    /// Structured log line.
    fn log(&self, level: log::Level, message: &str);
}

/// `StatusSink` that only ever writes through the `log` facade, for
/// headless contexts (tests, CLIs) with no frontend to notify.
pub struct LoggingStatusSink;

impl StatusSink for LoggingStatusSink {
    fn notify_status(&self, status: &str) {
        log::info!(target: "status", "{}", status);
    }

    fn notify_synced_and_reload(&self) {
        log::info!(target: "status", "notes:reload");
    }

    fn log(&self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::StatusSink;
    use std::sync::Mutex;

    /// Records every call for assertions in `sync_engine`/`poller`/
    /// `auth_gate` tests — in particular, that a failed pass never
    /// emits "synced".
    #[derive(Default)]
    pub struct RecordingStatusSink {
        pub statuses: Mutex<Vec<String>>,
        pub reloads: Mutex<u32>,
    }

    impl StatusSink for RecordingStatusSink {
        fn notify_status(&self, status: &str) {
            self.statuses.lock().unwrap().push(status.to_string());
        }

        fn notify_synced_and_reload(&self) {
            *self.reloads.lock().unwrap() += 1;
        }

        fn log(&self, _level: log::Level, _message: &str) {}
    }

    impl RecordingStatusSink {
        pub fn last_status(&self) -> Option<String> {
            self.statuses.lock().unwrap().last().cloned()
        }

        pub fn ever_emitted(&self, status: &str) -> bool {
            self.statuses.lock().unwrap().iter().any(|s| s == status)
        }
    }
}
