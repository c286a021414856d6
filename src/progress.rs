//! Progress bars for recovery replay and bar log merging
//!
//! Both wrappers fall back to a hidden bar when there is nothing to count or
//! display is turned off, so callers never have to branch.

use indicatif::{ProgressBar, ProgressStyle};

fn styled_bar(total: u64, template: &str) -> ProgressBar {
    let progress = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        progress.set_style(style.progress_chars("#>-"));
    }
    progress
}

/// Rows replayed from the bar log vs. rows stored.
pub struct ReplayProgress {
    progress: ProgressBar,
}

impl ReplayProgress {
    pub fn new(total_rows: u64, visible: bool) -> Self {
        let progress = if visible && total_rows > 0 {
            styled_bar(
                total_rows,
                "🔁 Replay [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows {msg}",
            )
        } else {
            ProgressBar::hidden()
        };
        Self { progress }
    }

    pub fn hidden() -> Self {
        Self::new(0, false)
    }

    pub fn advance(&self, symbol: &str) {
        self.progress.inc(1);
        self.progress.set_message(symbol.to_string());
    }

    pub fn position(&self) -> u64 {
        self.progress.position()
    }

    pub fn finish(&self) {
        if !self.progress.is_finished() {
            self.progress.finish_with_message("✅ recovery drained");
        }
    }
}

/// Rows written while merging several bar logs into one.
pub struct MergeProgress {
    progress: ProgressBar,
}

impl MergeProgress {
    pub fn new(total_rows: u64, visible: bool) -> Self {
        let progress = if visible && total_rows > 0 {
            styled_bar(
                total_rows,
                "🔀 Merge [{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} ({eta})",
            )
        } else {
            ProgressBar::hidden()
        };
        Self { progress }
    }

    pub fn advance(&self, rows: u64) {
        self.progress.inc(rows);
    }

    pub fn position(&self) -> u64 {
        self.progress.position()
    }

    pub fn finish(&self, written: u64) {
        self.progress
            .finish_with_message(format!("✅ merged {} rows", written));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_progress_counts() {
        let progress = ReplayProgress::new(3, false);
        progress.advance("AAPL");
        progress.advance("AAPL");
        assert_eq!(progress.position(), 2);
        progress.finish();
    }

    #[test]
    fn test_merge_progress_counts() {
        let progress = MergeProgress::new(0, true);
        progress.advance(1024);
        progress.advance(10);
        assert_eq!(progress.position(), 1034);
        progress.finish(1034);
    }
}
