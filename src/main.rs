#![warn(clippy::all)]

mod ast;
mod bundle;
mod bytecode;
mod compiler;
mod diagnostic;
mod ffi;
mod jit;
mod lexer;
mod oracle;
mod parser;
mod source;
mod vm;

use std::io::{BufRead, Write};
use std::path::Path;

use bundle::Bundler;
use bytecode::{serial, Chunk};
use diagnostic::{ansi::AnsiRenderer, json, registry, Diagnostic, SourceLoc};
use oracle::{NullOracle, SuggestionOracle};
use source::line_index::LineIndex;

/// Compact language reference — generated from LANGUAGE.md at compile time.
fn compact_reference() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/lang_ai.txt"))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Ansi,
    Text,
    Json,
}

/// Scan args for --json/-j, --text/-t, --ansi/-a. Return (mode, remaining).
/// Multiple format flags → error + exit(1).
fn detect_output_mode(args: Vec<String>) -> (OutputMode, Vec<String>) {
    let mut mode: Option<OutputMode> = None;
    let mut remaining = Vec::with_capacity(args.len());
    let mut conflict = false;

    for arg in args {
        match arg.as_str() {
            "--json" | "-j" => {
                if mode.is_some() { conflict = true; } else { mode = Some(OutputMode::Json); }
            }
            "--text" | "-t" => {
                if mode.is_some() { conflict = true; } else { mode = Some(OutputMode::Text); }
            }
            "--ansi" | "-a" => {
                if mode.is_some() { conflict = true; } else { mode = Some(OutputMode::Ansi); }
            }
            _ => remaining.push(arg),
        }
    }

    if conflict {
        eprintln!("error: --json, --text, and --ansi are mutually exclusive");
        std::process::exit(1);
    }

    let resolved = mode.unwrap_or_else(|| {
        // Auto-detect: isatty(stderr) && !NO_COLOR → Ansi; isatty && NO_COLOR
        // → Text; !isatty → Json.
        // SAFETY: isatty(2) is safe with any fd value; it returns 0 on error
        // or when the fd is not a terminal.
        let is_tty = unsafe { libc::isatty(libc::STDERR_FILENO) } != 0;
        let no_color = std::env::var("NO_COLOR").is_ok();
        if is_tty && !no_color {
            OutputMode::Ansi
        } else if is_tty {
            OutputMode::Text
        } else {
            OutputMode::Json
        }
    });

    (resolved, remaining)
}

fn report(d: &Diagnostic, mode: OutputMode) {
    let s = match mode {
        OutputMode::Ansi => AnsiRenderer { use_color: true }.render(d),
        OutputMode::Text => AnsiRenderer { use_color: false }.render(d),
        // JSON mode: one object per line (NDJSON) so multiple errors parse.
        OutputMode::Json => format!("{}\n", json::render(d)),
    };
    eprint!("{s}");
}

/// Environment configuration, read once at startup.
struct Config {
    autofix: bool,
    memdbg: bool,
    dll_path: Vec<String>,
}

impl Config {
    fn from_env() -> Self {
        Config {
            autofix: std::env::var("CB_AUTOFIX").map(|v| v != "0").unwrap_or(true),
            memdbg: std::env::var("CB_MEMDBG").is_ok(),
            dll_path: std::env::var("CB_DLL_PATH")
                .map(|v| v.split(':').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

fn usage() -> ! {
    eprintln!("Usage: catlang <file.cb|file.cat> [options]");
    eprintln!("       catlang help | -h     Show usage and examples");
    std::process::exit(1);
}

fn main() {
    let raw_args: Vec<String> = std::env::args().collect();
    let (mode, args) = detect_output_mode(raw_args);
    let config = Config::from_env();

    if args.len() < 2 {
        // With a bundled payload the binary runs it; otherwise the REPL.
        if run_bundled_payload(&config, mode) {
            return;
        }
        repl(&config, mode);
        return;
    }

    match args[1].as_str() {
        "--version" | "-V" => {
            println!("catlang {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => {
            if args.len() > 2 && args[2] == "lang" {
                print!("{}", include_str!("../LANGUAGE.md"));
            } else if args.len() > 2 && args[2] == "ai" {
                print!("{}", compact_reference());
            } else {
                print_help();
            }
        }
        "-ai" => print!("{}", compact_reference()),
        "--list-errors" => {
            for e in registry::REGISTRY {
                println!("{}  {}", e.code, e.short);
            }
        }
        "--explain" => {
            let Some(code) = args.get(2) else {
                eprintln!("error: --explain needs an error code (e.g. CAT-R001)");
                std::process::exit(1);
            };
            match registry::find(code) {
                Some(e) => print!("{}", e.long),
                None => {
                    eprintln!("error: unknown error code '{code}'");
                    std::process::exit(1);
                }
            }
        }
        "--ast" => {
            let Some(file) = args.get(2) else { usage() };
            dump_ast(Path::new(file), &config, mode);
        }
        "--dis" => {
            let Some(file) = args.get(2) else { usage() };
            let Some(chunk) = load_or_compile(Path::new(file), &config, mode) else {
                std::process::exit(1);
            };
            print!("{}", chunk.disassemble());
        }
        "--emit" => {
            let (Some(out), Some(src)) = (args.get(2), args.get(3)) else { usage() };
            let code = compile_to(Path::new(src), Path::new(out), &config, mode);
            std::process::exit(code);
        }
        "--run" => {
            let Some(file) = args.get(2) else { usage() };
            let Some(chunk) = load_or_compile(Path::new(file), &config, mode) else {
                std::process::exit(1);
            };
            std::process::exit(run_chunk(&chunk, &config));
        }
        "--bundle-exe" => {
            let (Some(src), Some(out)) = (args.get(2), args.get(3)) else { usage() };
            let Some(chunk) = load_or_compile(Path::new(src), &config, mode) else {
                std::process::exit(1);
            };
            let payload = serial::write_chunk(&chunk);
            let host = std::env::current_exe().unwrap_or_else(|e| {
                eprintln!("error: cannot locate host executable: {e}");
                std::process::exit(1);
            });
            if let Err(e) = bundle::ExeBundler.bundle(&host, &payload, Path::new(out)) {
                eprintln!("error: bundling failed: {e}");
                std::process::exit(1);
            }
        }
        file if file.ends_with(".cat") => {
            let Some(chunk) = load_chunk(Path::new(file), mode) else {
                std::process::exit(1);
            };
            std::process::exit(run_chunk(&chunk, &config));
        }
        file if file.ends_with(".cb") => {
            // Compile to a sibling .cat; do not execute.
            let out = Path::new(file).with_extension("cat");
            let code = compile_to(Path::new(file), &out, &config, mode);
            std::process::exit(code);
        }
        _ => usage(),
    }
}

fn print_help() {
    println!("catlang — an English-leaning scripting language on a stack VM\n");
    println!("Usage:");
    println!("  catlang <file.cb>                 Compile to <file.cat> next to the source");
    println!("  catlang <file.cat>                Load and execute a compiled chunk");
    println!("  catlang --emit <out.cat> <f.cb>   Compile with an explicit output path");
    println!("  catlang --run <file.cat|.cb>      Execute (compiling first if needed)");
    println!("  catlang --ast <file.cb>           Print the parsed program as JSON");
    println!("  catlang --dis <file.cb|.cat>      Print a bytecode disassembly");
    println!("  catlang --bundle-exe <f> <out>    Append the chunk to a copy of this binary");
    println!("  catlang --list-errors             List all stable error codes");
    println!("  catlang --explain CAT-R001        Explain one error code");
    println!("  catlang help lang                 Show the language reference");
    println!("  catlang help ai | catlang -ai     Compact reference for LLM consumption");
    println!("  catlang                           Run a bundled payload, else the REPL\n");
    println!("Output format (errors):");
    println!("  --ansi / -a   Force ANSI colour output (default when stderr is a TTY)");
    println!("  --text / -t   Force plain text output (no colour)");
    println!("  --json / -j   Force NDJSON output (default when stderr is not a TTY)");
    println!("  NO_COLOR=1    Disable colour (same as --text)\n");
    println!("Environment:");
    println!("  CB_AUTOFIX=0  Never consult the suggestion oracle on parse errors");
    println!("  CB_MEMDBG=1   Print container create/destroy counts on halt");
    println!("  CB_DLL_PATH   Colon-separated directories for the FFI search path");
}

// ── Compilation pipeline ────────────────────────────────────────────────

struct Compiled {
    program: ast::Program,
    had_errors: bool,
}

/// Lex and parse each logical statement of the expanded source. A failed
/// statement is reported and dropped — after an optional oracle retry —
/// and the rest of the program keeps going.
fn parse_expanded(
    expanded: &source::Expanded,
    fallback_file: &str,
    config: &Config,
    mode: OutputMode,
) -> Compiled {
    let oracle = NullOracle;
    let mut program = ast::Program::default();
    let mut had_errors = false;

    let mut accept = |program: &mut ast::Program, raw: &source::RawStatement| match parse_raw(raw) {
        Ok(stmts) => {
            for stmt in stmts {
                program.stmts.push(ast::TopStmt { stmt, line: raw.line, col: raw.col });
            }
            true
        }
        Err(d) => {
            report(&locate(d, expanded, fallback_file), mode);
            false
        }
    };

    for raw in source::split_statements(&expanded.text) {
        if accept(&mut program, &raw) {
            continue;
        }
        had_errors = true;
        if config.autofix {
            if let Some(fix) = oracle.suggest(&raw.text) {
                report(&Diagnostic::warning(format!("auto-fix: {}", fix.suggestion)), mode);
                let retry = source::RawStatement { text: fix.fixed, line: raw.line, col: raw.col };
                accept(&mut program, &retry);
            }
        }
    }

    Compiled { program, had_errors }
}

/// Parse one raw statement into statements, or a located diagnostic.
fn parse_raw(raw: &source::RawStatement) -> Result<Vec<ast::Stmt>, Diagnostic> {
    let tokens = lexer::lex_at(&raw.text, raw.line, raw.col)
        .map_err(|e| (Diagnostic::from(&e), e.line, e.col))
        .and_then(|tokens| {
            parser::parse_statement_tokens(tokens)
                .map_err(|e| (Diagnostic::from(&e), e.line, e.col))
        });
    match tokens {
        Ok(stmts) => Ok(stmts),
        Err((d, line, col)) => Err(d.at(SourceLoc { file: String::new(), line, col })),
    }
}

/// Re-anchor a diagnostic's expanded-text position onto the origin file
/// and attach the offending line as a snippet.
fn locate(d: Diagnostic, expanded: &source::Expanded, fallback_file: &str) -> Diagnostic {
    let Some(loc) = d.loc.clone() else { return d };
    let index = LineIndex::new(&expanded.text);
    let snippet = index.line_text(&expanded.text, loc.line).to_string();
    let origin = expanded.origins.lookup(loc.line);
    let located = SourceLoc {
        file: origin.map(|o| o.file.clone()).unwrap_or_else(|| fallback_file.to_string()),
        line: origin.map(|o| o.line).unwrap_or(loc.line),
        col: loc.col,
    };
    let d = d.at(located);
    if snippet.is_empty() { d } else { d.with_snippet(snippet) }
}

/// Full pipeline: expand, split, parse, compile. Produces a chunk even
/// when some statements failed to parse; `had_errors` drives the exit
/// code.
fn compile_source(path: &Path, config: &Config, mode: OutputMode) -> Option<(Chunk, bool)> {
    let expanded = match source::expand_file(path) {
        Ok(e) => e,
        Err(e) => {
            report(
                &Diagnostic::error(format!("cannot read {}: {e}", path.display()))
                    .with_code("CAT-I003"),
                mode,
            );
            return None;
        }
    };
    let source_name = path.display().to_string();
    let compiled = parse_expanded(&expanded, &source_name, config, mode);

    match compiler::compile(&compiled.program, &source_name, Some(&expanded.origins)) {
        Ok(chunk) => Some((chunk, compiled.had_errors)),
        Err(e) => {
            let d = Diagnostic::from(&e)
                .at(SourceLoc { file: String::new(), line: e.line, col: e.col });
            report(&locate(d, &expanded, &source_name), mode);
            None
        }
    }
}

fn compile_to(src: &Path, out: &Path, config: &Config, mode: OutputMode) -> i32 {
    let Some((chunk, had_errors)) = compile_source(src, config, mode) else {
        return 1;
    };
    if let Err(e) = serial::save_file(&chunk, out) {
        report(&Diagnostic::from(&e), mode);
        return 1;
    }
    if had_errors {
        1
    } else {
        0
    }
}

fn load_chunk(path: &Path, mode: OutputMode) -> Option<Chunk> {
    match serial::load_file(path) {
        Ok(chunk) => {
            // Prove the stream decodes before the interpreter touches it.
            if let Err(e) = chunk.decode_offsets() {
                report(
                    &Diagnostic::error(format!("corrupt chunk: {e}")).with_code("CAT-I002"),
                    mode,
                );
                return None;
            }
            Some(chunk)
        }
        Err(e) => {
            report(&Diagnostic::from(&e), mode);
            None
        }
    }
}

/// `.cat` loads; `.cb` compiles in memory.
fn load_or_compile(path: &Path, config: &Config, mode: OutputMode) -> Option<Chunk> {
    if path.extension().and_then(|e| e.to_str()) == Some("cat") {
        load_chunk(path, mode)
    } else {
        match compile_source(path, config, mode) {
            Some((chunk, false)) => Some(chunk),
            Some((_, true)) | None => None,
        }
    }
}

fn run_chunk(chunk: &Chunk, config: &Config) -> i32 {
    let mut machine = vm::Vm::new();
    machine.set_memdbg(config.memdbg);
    if !config.dll_path.is_empty() {
        eprintln!("warning: CB_DLL_PATH is set but this build carries no foreign-call backend");
    }
    match machine.run(chunk) {
        Ok(vm::Outcome::Exit(code)) => code,
        Ok(_) => 0,
        Err(_) => 1, // the VM already reported the error
    }
}

fn dump_ast(path: &Path, config: &Config, mode: OutputMode) {
    let expanded = match source::expand_file(path) {
        Ok(e) => e,
        Err(e) => {
            report(
                &Diagnostic::error(format!("cannot read {}: {e}", path.display()))
                    .with_code("CAT-I003"),
                mode,
            );
            std::process::exit(1);
        }
    };
    let compiled = parse_expanded(&expanded, &path.display().to_string(), config, mode);
    match serde_json::to_string_pretty(&compiled.program) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Serialization error: {e}");
            std::process::exit(1);
        }
    }
    if compiled.had_errors {
        std::process::exit(1);
    }
}

// ── Bundled payload ─────────────────────────────────────────────────────

/// With no arguments, a binary carrying a `CBPACK1\0` footer executes the
/// embedded chunk. Returns false when there is no payload.
fn run_bundled_payload(config: &Config, mode: OutputMode) -> bool {
    let Ok(exe) = std::env::current_exe() else { return false };
    let Ok(bytes) = std::fs::read(&exe) else { return false };
    let Some(payload) = serial::find_payload(&bytes) else { return false };
    match serial::read_chunk(payload, "<bundled>") {
        Ok(chunk) => std::process::exit(run_chunk(&chunk, config)),
        Err(e) => {
            report(&Diagnostic::from(&e), mode);
            std::process::exit(1);
        }
    }
}

// ── REPL ────────────────────────────────────────────────────────────────

/// A thin line loop: logical statements accumulate by block balance, are
/// appended to a persistent chunk, and run on a persistent VM so globals,
/// functions, and the heap survive across lines.
fn repl(config: &Config, mode: OutputMode) {
    println!("catlang {} — interactive (ctrl-d to exit)", env!("CARGO_PKG_VERSION"));
    let mut builder = compiler::Compiler::new("<repl>");
    let mut machine = vm::Vm::new();
    machine.set_memdbg(config.memdbg);

    let stdin = std::io::stdin();
    let mut pending = String::new();
    let mut balance: i64 = 0;
    let mut lineno: u32 = 0;

    loop {
        if pending.is_empty() {
            print!("cat> ");
        } else {
            print!("...> ");
        }
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        lineno += 1;
        let (opens, closes) = source::line_balance(&line);
        balance += opens as i64 - closes as i64;
        pending.push_str(&line);
        if balance > 0 {
            continue;
        }
        balance = 0;

        let text = std::mem::take(&mut pending);
        let expanded = source::expand_str(&text, "<repl>");
        let mut stmts = Vec::new();
        let mut parse_failed = false;
        for raw in source::split_statements(&expanded.text) {
            match parse_raw(&raw) {
                Ok(parsed) => stmts.extend(parsed),
                Err(d) => {
                    parse_failed = true;
                    report(&locate(d, &expanded, "<repl>"), mode);
                }
            }
        }
        if parse_failed || stmts.is_empty() {
            continue;
        }

        let mark = builder.mark();
        let entry = builder.chunk().code.len();
        let mut compile_failed = false;
        for stmt in &stmts {
            if let Err(e) = builder.compile_top_at(stmt, lineno, 1) {
                report(&Diagnostic::from(&e), mode);
                compile_failed = true;
                break;
            }
        }
        if compile_failed {
            builder.rollback(mark);
            continue;
        }

        let chunk = builder.chunk().clone();
        match machine.resume(&chunk, entry) {
            Ok(vm::Outcome::Exit(code)) => std::process::exit(code),
            Ok(_) => {}
            // Already reported by the VM; drop any half-built frames so
            // the next line starts clean.
            Err(_) => machine.recover(),
        }
    }
}
