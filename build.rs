// build.rs — compacts LANGUAGE.md into a one-line-per-section reference.
// `catlang help ai` / `catlang -ai` embeds the result via
// include_str!(concat!(env!("OUT_DIR"), "/lang_ai.txt")).

fn main() {
    println!("cargo:rerun-if-changed=LANGUAGE.md");
    let reference = std::fs::read_to_string("LANGUAGE.md").expect("LANGUAGE.md not found");
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR not set by Cargo");
    std::fs::write(
        std::path::Path::new(&out_dir).join("lang_ai.txt"),
        compact(&reference),
    )
    .expect("failed to write lang_ai.txt");
}

/// One line per `## Section`: bullets joined with `;`, table data rows
/// turned into `english=concise` pairs. Table headers + separator rows are
/// dropped, as are code fences, blank lines, and `---` dividers.
fn compact(src: &str) -> String {
    #[derive(PartialEq)]
    enum TableState {
        NotInTable,
        InHeader, // first pipe-row seen, separator not yet seen
        InData,   // past the separator row — real data rows
    }

    let mut out = String::new();
    let mut heading = String::new();
    let mut items: Vec<String> = Vec::new();
    let mut table_state = TableState::NotInTable;

    let flush = |heading: &str, items: &mut Vec<String>, out: &mut String| {
        if items.is_empty() {
            return;
        }
        if heading.is_empty() {
            out.push_str(&items.join(" "));
        } else {
            out.push_str(heading);
            out.push_str(": ");
            out.push_str(&items.join(" "));
        }
        out.push('\n');
        items.clear();
    };

    for line in src.lines() {
        let t = line.trim();
        if t.is_empty() || t == "---" || t.starts_with("```") {
            continue;
        }
        if let Some(h) = t.strip_prefix("## ").or_else(|| t.strip_prefix("# ")) {
            table_state = TableState::NotInTable;
            flush(&heading, &mut items, &mut out);
            heading = h.to_uppercase();
            continue;
        }
        if t.starts_with('|') {
            let is_sep = t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '));
            if is_sep {
                // Separator row: marks end of header, start of data.
                table_state = TableState::InData;
                continue;
            }
            match table_state {
                TableState::NotInTable => {
                    // First row of a new table = the header row — skip it.
                    table_state = TableState::InHeader;
                }
                TableState::InHeader => {
                    // Still before the separator — skip.
                }
                TableState::InData => {
                    let cells: Vec<&str> =
                        t.split('|').map(str::trim).filter(|s| !s.is_empty()).collect();
                    items.push(cells.join("="));
                }
            }
            continue;
        }

        // Non-table line — reset table state.
        table_state = TableState::NotInTable;

        if let Some(bullet) = t.strip_prefix("- ") {
            items.push(format!("{bullet};"));
        } else {
            items.push(t.to_string());
        }
    }
    flush(&heading, &mut items, &mut out);
    out
}
