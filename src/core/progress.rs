use crate::utils;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ProgressState {
    current: usize,
    last_message: String,
}

/// Single-line progress display shared by everything that reports completions.
///
/// Counter updates and rendering happen under one lock so concurrent callers never
/// interleave a partial line.
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    width: usize,
    visible: bool,
    started: Instant,
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    pub fn new(total: usize, width: usize) -> Self {
        Self::build(total, width, true)
    }

    /// Tracks counts without drawing anything.
    pub fn hidden(total: usize) -> Self {
        Self::build(total, 0, false)
    }

    fn build(total: usize, width: usize, visible: bool) -> Self {
        ProgressTracker {
            total,
            width,
            visible,
            started: Instant::now(),
            state: Mutex::new(ProgressState {
                current: 0,
                last_message: String::new(),
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current(&self) -> usize {
        self.state.lock().map(|s| s.current).unwrap_or(0)
    }

    pub fn last_message(&self) -> String {
        self.state
            .lock()
            .map(|s| s.last_message.clone())
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sets the completed count (or bumps it by one) and redraws.
    pub fn update(&self, completed_count: Option<usize>, message: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.current = completed_count.unwrap_or(state.current + 1);
        state.last_message = message.to_string();

        if self.visible {
            let line = render_line(
                state.current,
                self.total,
                self.width,
                self.started.elapsed(),
                message,
            );
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\r{}", line);
            let _ = err.flush();
        }
    }

    pub fn finish(&self, message: &str) {
        let Ok(_state) = self.state.lock() else {
            return;
        };
        if self.visible {
            let elapsed = utils::format_elapsed(self.started.elapsed().as_secs_f64());
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "\n{} in {}", message, elapsed);
        }
    }
}

/// Remaining time at the current average pace; `None` before the first completion.
pub fn eta(current: usize, total: usize, elapsed: Duration) -> Option<Duration> {
    if current == 0 {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / current as f64;
    Some(Duration::from_secs_f64(
        per_item * total.saturating_sub(current) as f64,
    ))
}

pub fn render_line(
    current: usize,
    total: usize,
    width: usize,
    elapsed: Duration,
    message: &str,
) -> String {
    let progress = if total > 0 {
        (current as f64 / total as f64).min(1.0)
    } else {
        0.0
    };
    let filled = (width as f64 * progress) as usize;
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(width - filled));
    let eta_str = eta(current, total, elapsed)
        .map(|d| utils::format_elapsed(d.as_secs_f64()))
        .unwrap_or_else(|| "calculating...".to_string());

    let mut line = format!(
        "[{}] {}/{} ({:.1}%) ETA: {}",
        bar,
        current,
        total,
        progress * 100.0,
        eta_str
    );
    if !message.is_empty() {
        line.push_str(" | ");
        line.push_str(message);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn eta_is_undefined_before_first_completion() {
        assert_eq!(eta(0, 10, Duration::from_secs(5)), None);
        assert_eq!(
            eta(2, 10, Duration::from_secs(4)),
            Some(Duration::from_secs(16))
        );
        assert_eq!(eta(10, 10, Duration::from_secs(4)), Some(Duration::ZERO));
    }

    #[test]
    fn renders_bar_counts_and_message() {
        let line = render_line(1, 4, 8, Duration::from_secs(3), "✓ MSFT");
        assert_eq!(line, "[██░░░░░░] 1/4 (25.0%) ETA: 9.0s | ✓ MSFT");

        let first = render_line(0, 4, 4, Duration::ZERO, "");
        assert_eq!(first, "[░░░░] 0/4 (0.0%) ETA: calculating...");
    }

    #[test]
    fn update_without_count_increments() {
        let tracker = ProgressTracker::hidden(3);
        tracker.update(None, "a");
        tracker.update(None, "b");
        assert_eq!(tracker.current(), 2);
        tracker.update(Some(0), "reset");
        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.last_message(), "reset");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let tracker = Arc::new(ProgressTracker::hidden(400));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.update(None, "tick");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.current(), 400);
    }
}
