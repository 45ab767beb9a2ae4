use std::cell::RefCell;
use std::sync::Mutex;

use log::{Level, Log, Metadata, Record};

pub(crate) static LOGGER: Logger = Logger {
    log_calls: Mutex::new(RefCell::new(Vec::new())),
};

#[derive(Clone, Eq, PartialEq)]
pub(crate) struct LogCall {
    pub level: Level,
    pub message: String,
}

pub(crate) struct Logger {
    log_calls: Mutex<RefCell<Vec<LogCall>>>,
}

impl Logger {
    /// Whether any captured record at `level` contains `text`.
    pub(crate) fn has_call(&self, level: Level, text: &str) -> bool {
        let unlocked_log_calls = self.log_calls.lock().unwrap();
        let log_calls = unlocked_log_calls.borrow();
        log_calls
            .iter()
            .any(|call| call.level == level && call.message.contains(text))
    }
}

impl Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        let mut unlocked_log_calls = self.log_calls.lock().unwrap();
        let v = unlocked_log_calls.get_mut();
        v.push(LogCall {
            level: record.level(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}
