//! Progress bar utilities for long-running batches

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{msg} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})";

/// Progress bar counting finished jobs out of `total`
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    // the template is a constant; fall back to the default style if it ever stops parsing
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Container for one bar per concurrently running batch.
///
/// Draws nothing when `visible` is false, so library callers and tests stay quiet.
pub fn create_multi_progress(visible: bool) -> MultiProgress {
    if visible {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar() {
        let pb = create_progress_bar(12, "batch 0");
        assert_eq!(pb.length(), Some(12));
        assert_eq!(pb.message(), "batch 0");
    }

    #[test]
    fn test_hidden_multi_progress() {
        let multi = create_multi_progress(false);
        let pb = multi.add(create_progress_bar(3, "batch 1"));
        pb.inc(3);
        assert_eq!(pb.position(), 3);
        pb.finish();
        assert!(pb.is_finished());
    }
}
