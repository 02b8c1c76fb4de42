//! Human-readable formatting for the progress display.

const KILOBYTE: u64 = 1024;
const MEGABYTE: u64 = 1024 * KILOBYTE;
const GIGABYTE: u64 = 1024 * MEGABYTE;
const TERABYTE: u64 = 1024 * GIGABYTE;

/// Formats a byte count with binary units, right-aligned to a fixed width.
pub fn human_readable_size(size: u64) -> String {
    let scaled = |unit: u64| size as f64 / unit as f64;
    match size {
        s if s >= TERABYTE => format!("{:6.2}TB", scaled(TERABYTE)),
        s if s >= GIGABYTE => format!("{:6.2}GB", scaled(GIGABYTE)),
        s if s >= MEGABYTE => format!("{:6.2}MB", scaled(MEGABYTE)),
        s if s >= KILOBYTE => format!("{:6.2}KB", scaled(KILOBYTE)),
        s => format!("{:7}B", s),
    }
}

/// Formats a number of seconds as `12s`, `3m 5s`, `1h 2m`, and so on.
pub fn duration_to_string(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{:2}s", s),
        s if s < 3600 => {
            let (minutes, rest) = (s / 60, s % 60);
            if rest == 0 {
                format!("{:2}m", minutes)
            } else {
                format!("{:2}m{:2}s", minutes, rest)
            }
        }
        s => {
            let (hours, rest) = (s / 3600, s % 3600);
            if rest == 0 {
                format!("{:2}h", hours)
            } else {
                format!("{:2}h{}", hours, duration_to_string(rest))
            }
        }
    }
}

/// Number of terminal columns a string occupies, ignoring ANSI escapes.
pub fn visible_width(input: &str) -> usize {
    console::measure_text_width(input)
}

/// Pads or cuts `text` so it occupies exactly `width` columns.
pub fn fit_to_width(text: &str, width: usize) -> String {
    let current = visible_width(text);
    if current > width {
        let cut = console::truncate_str(text, width, "").into_owned();
        // A wide character cut in half leaves one column short.
        let short = width - visible_width(&cut);
        format!("{}{}", cut, " ".repeat(short))
    } else {
        format!("{}{}", text, " ".repeat(width - current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(human_readable_size(0), "      0B");
        assert_eq!(human_readable_size(1023), "   1023B");
        assert_eq!(human_readable_size(1024), "  1.00KB");
        assert_eq!(human_readable_size(1536), "  1.50KB");
        assert_eq!(human_readable_size(5 * MEGABYTE), "  5.00MB");
        assert_eq!(human_readable_size(3 * GIGABYTE / 2), "  1.50GB");
        assert_eq!(human_readable_size(2 * TERABYTE), "  2.00TB");
    }

    #[test]
    fn durations() {
        assert_eq!(duration_to_string(0), " 0s");
        assert_eq!(duration_to_string(59), "59s");
        assert_eq!(duration_to_string(60), " 1m");
        assert_eq!(duration_to_string(61), " 1m 1s");
        assert_eq!(duration_to_string(3600), " 1h");
        assert_eq!(duration_to_string(3725), " 1h 2m 5s");
        assert_eq!(duration_to_string(7260), " 2h 1m");
    }

    #[test]
    fn width_ignores_ansi_and_counts_wide_chars() {
        assert_eq!(visible_width("plain"), 5);
        assert_eq!(visible_width("\x1b[31mred\x1b[0m"), 3);
        assert_eq!(visible_width("下载"), 4);
    }

    #[test]
    fn fit_pads_and_truncates() {
        assert_eq!(fit_to_width("abc", 5), "abc  ");
        assert_eq!(fit_to_width("abcdefgh", 5), "abcde");
        assert_eq!(fit_to_width("", 3), "   ");

        let fitted = fit_to_width("下载文件", 5);
        assert_eq!(visible_width(&fitted), 5);
        assert!(fitted.starts_with("下载"));
    }
}
