use chrono::Local;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// info! that keeps ANSI colors only when the terminal display is colorful
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)*) => {{
        if $colorful {
            log::info!($($arg)*);
        } else {
            log::info!("{}", $crate::utils::strip_ansi(&format!($($arg)*)));
        }
    }};
}

/// Removes ANSI escape sequences (`ESC [ ... letter`) from a string
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // skip parameters until the final byte
            while let Some(&p) = chars.peek() {
                chars.next();
                if p.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Contiguous range of tasks handled by `thread_id` when `task_count` tasks are
/// split over `thread_count` threads.
///
/// Each thread receives `task_count / thread_count` tasks and the remainder is handed
/// out one per thread starting from thread 0, so ranges are ordered by thread index.
///
/// # Arguments
///
/// * `task_count` - Total number of tasks.
/// * `thread_count` - Number of threads sharing the tasks (0 is treated as 1).
/// * `thread_id` - Index of the thread whose range is requested.
pub fn partition_range(task_count: usize, thread_count: usize, thread_id: usize) -> Range<usize> {
    let thread_count = thread_count.max(1);
    if thread_id >= thread_count {
        return task_count..task_count;
    }
    let base_size = task_count / thread_count;
    let extra_elements = task_count % thread_count;

    let size = base_size + if thread_id < extra_elements { 1 } else { 0 };
    let start = thread_id * base_size + thread_id.min(extra_elements);
    start..start + size
}

/// Locks a mutex, recovering the guard if a previous holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timestamp used to prefix every output produced by a run
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}
