/// Converts byte offsets into 1-based line/column pairs.
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        LineIndex { starts }
    }

    /// (line, col), both 1-based. Offsets past the end clamp to the last line.
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = self
            .starts
            .partition_point(|&s| s <= offset)
            .saturating_sub(1);
        let col = offset - self.starts[line];
        (line as u32 + 1, col as u32 + 1)
    }

    /// The text of the 1-based line `n`, without its trailing newline.
    pub fn line_text<'a>(&self, text: &'a str, n: u32) -> &'a str {
        let n = n as usize;
        if n == 0 || n > self.starts.len() {
            return "";
        }
        let start = self.starts[n - 1];
        let end = self.starts.get(n).copied().unwrap_or(text.len());
        text[start..end].trim_end_matches('\n').trim_end_matches('\r')
    }

    pub fn line_count(&self) -> u32 {
        self.starts.len() as u32
    }
}
