use indicatif::{ProgressBar, ProgressStyle};

/// Byte-counting bar for transfers.
pub(crate) fn bytes_bar(show: bool, len: u64) -> ProgressBar {
    styled(
        show,
        len,
        "{msg} [{bar:50.cyan/blue}] {bytes}/{total_bytes} ({percent}%)",
    )
}

/// Item-counting bar, e.g. simulations processed.
pub(crate) fn count_bar(show: bool, len: u64) -> ProgressBar {
    styled(show, len, "{msg} [{bar:50.cyan/blue}] {pos}/{len}")
}

fn styled(show: bool, len: u64, template: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => pb.set_style(style.progress_chars("━━ ")),
        Err(e) => tracing::debug!("progress template rejected: {e}"),
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_when_disabled() {
        assert!(bytes_bar(false, 10).is_hidden());
        assert!(count_bar(false, 10).is_hidden());
    }
}
