use super::{Diagnostic, Severity};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let severity = match d.severity {
            Severity::Error => self.bold_red("error"),
            Severity::Warning => self.bold(&self.cyan("warning")),
        };
        let head = match d.code {
            Some(code) => format!("{severity}[{code}]"),
            None => severity,
        };
        out.push_str(&format!("{head}: {}\n", self.bold(&d.message)));

        if let Some(loc) = &d.loc {
            out.push_str(&format!(
                "  {} {}:{}:{}\n",
                self.cyan("-->"),
                loc.file,
                loc.line,
                loc.col
            ));
            if let Some(snippet) = &d.snippet {
                let gutter = loc.line.to_string().len();
                let pipe = self.cyan("|");
                let pad = " ".repeat(gutter);
                out.push_str(&format!("{pad} {pipe}\n"));
                let line_num = self.cyan(&format!("{:>gutter$}", loc.line));
                out.push_str(&format!("{line_num} {pipe} {snippet}\n"));
                let indent = " ".repeat(loc.col.saturating_sub(1) as usize);
                out.push_str(&format!("{pad} {pipe} {indent}{}\n", self.bold_red("^")));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {note}\n", self.dim("=")));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {suggestion}\n", self.dim("=")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::SourceLoc;

    fn sample() -> Diagnostic {
        Diagnostic::error("missing ')'")
            .with_code("CAT-P002")
            .at(SourceLoc { file: "main.cb".into(), line: 3, col: 7 })
            .with_snippet("print (2+3")
            .with_note("near 'end of statement'")
            .with_suggestion("missing ')'")
    }

    #[test]
    fn render_contains_header_and_code() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("error[CAT-P002]: missing ')'"), "got:\n{out}");
    }

    #[test]
    fn render_contains_location_arrow() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("--> main.cb:3:7"), "got:\n{out}");
    }

    #[test]
    fn render_contains_snippet_and_caret() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("print (2+3"), "got:\n{out}");
        let caret_line = out.lines().find(|l| l.trim_end().ends_with('^')).unwrap();
        // caret sits under column 7 (after "3 | " gutter)
        assert!(caret_line.contains('^'));
    }

    #[test]
    fn render_contains_note_and_suggestion() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("note: near"), "got:\n{out}");
        assert!(out.contains("suggestion: missing ')'"), "got:\n{out}");
    }

    #[test]
    fn render_without_location_is_header_only() {
        let d = Diagnostic::error("cannot read file");
        let out = AnsiRenderer { use_color: false }.render(&d);
        assert!(out.contains("error: cannot read file"));
        assert!(!out.contains("-->"));
    }

    #[test]
    fn color_toggle_controls_escapes() {
        let with = AnsiRenderer { use_color: true }.render(&sample());
        let without = AnsiRenderer { use_color: false }.render(&sample());
        assert!(with.contains("\x1b["));
        assert!(!without.contains("\x1b["));
    }
}
