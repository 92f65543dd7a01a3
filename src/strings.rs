use regex::bytes::Regex;

/// Extract printable strings and embedded URLs from binary data
pub struct StringExtractor {
    min_length: usize,
    max_strings: usize,
    url_regex: Regex,
}

impl Default for StringExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StringExtractor {
    pub const DEFAULT_MIN_LENGTH: usize = 5;
    pub const DEFAULT_MAX_STRINGS: usize = 10_000;

    pub fn new() -> Self {
        Self {
            min_length: Self::DEFAULT_MIN_LENGTH,
            max_strings: Self::DEFAULT_MAX_STRINGS,
            // Raw bytes, no UTF-8 assumptions: URLs end at the first
            // whitespace, quote, bracket or non-printable byte.
            url_regex: Regex::new(r#"(?i-u)(?:https?|ftp)://[^\s<>"'\x00-\x1f\x7f-\xff]+"#)
                .expect("URL pattern is valid"),
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length.max(1);
        self
    }

    pub fn with_max_strings(mut self, max_strings: usize) -> Self {
        self.max_strings = max_strings;
        self
    }

    /// Printable ASCII runs of at least `min_length` bytes, in file order.
    pub fn extract(&self, data: &[u8]) -> Vec<String> {
        let mut strings = Vec::new();
        let mut start: Option<usize> = None;

        for (i, &byte) in data.iter().enumerate() {
            if is_printable(byte) {
                start.get_or_insert(i);
                continue;
            }
            if let Some(s) = start.take() {
                if !self.push_run(&data[s..i], &mut strings) {
                    return strings;
                }
            }
        }

        // Handle last string if present
        if let Some(s) = start {
            self.push_run(&data[s..], &mut strings);
        }

        strings
    }

    /// Returns false once the string cap is reached
    fn push_run(&self, run: &[u8], strings: &mut Vec<String>) -> bool {
        if strings.len() >= self.max_strings {
            return false;
        }
        if run.len() >= self.min_length {
            strings.push(String::from_utf8_lossy(run).into_owned());
        }
        strings.len() < self.max_strings
    }

    /// Distinct URLs in order of first appearance.
    pub fn urls(&self, data: &[u8]) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for found in self.url_regex.find_iter(data) {
            let url = String::from_utf8_lossy(found.as_bytes());
            let url = url.trim_end_matches(['.', ',', ';', ')', ']']);
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
        urls
    }
}

fn is_printable(byte: u8) -> bool {
    byte.is_ascii_graphic() || byte == b' ' || byte == b'\t'
}
