use logos::Logos;

use crate::source::line_index::LineIndex;

/// Secondary error detail raised by lexer callbacks. The driver folds this
/// into a `LexError` with position information.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum LexIssue {
    #[default]
    Unknown,
    HexOverflow,
}

fn at_line_start(src: &str, pos: usize) -> bool {
    pos == 0 || src.as_bytes()[pos - 1] == b'\n'
}

/// `;` at column 1 swallows the rest of the line; anywhere else it is a
/// real semicolon token.
fn semi_or_comment(lex: &mut logos::Lexer<Tok>) -> logos::Filter<()> {
    if at_line_start(lex.source(), lex.span().start) {
        let rest = lex.remainder();
        let eat = rest.find('\n').unwrap_or(rest.len());
        lex.bump(eat);
        logos::Filter::Skip
    } else {
        logos::Filter::Emit(())
    }
}

/// `#` at column 1 swallows the rest of the line; anywhere else the token
/// surfaces and the driver reports it as an unknown character.
fn hash_or_comment(lex: &mut logos::Lexer<Tok>) -> logos::Filter<()> {
    if at_line_start(lex.source(), lex.span().start) {
        let rest = lex.remainder();
        let eat = rest.find('\n').unwrap_or(rest.len());
        lex.bump(eat);
        logos::Filter::Skip
    } else {
        logos::Filter::Emit(())
    }
}

fn dec_number(lex: &mut logos::Lexer<Tok>) -> Result<f64, LexIssue> {
    lex.slice().parse::<f64>().map_err(|_| LexIssue::Unknown)
}

fn hex_number(lex: &mut logos::Lexer<Tok>) -> Result<f64, LexIssue> {
    let s = lex.slice();
    u64::from_str_radix(&s[2..], 16)
        .map(|v| v as f64)
        .map_err(|_| LexIssue::HexOverflow)
}

fn string_body(lex: &mut logos::Lexer<Tok>) -> String {
    let s = lex.slice();
    s[1..s.len() - 1].to_string()
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexIssue)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"\n")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Tok {
    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";", semi_or_comment)]
    Semi,

    // Operators (longest first where prefixes overlap)
    #[token("->")]
    Arrow,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token(">=")]
    Ge,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token("<")]
    Lt,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("=")]
    Eq,

    // `and`/`or` are the only identifiers the lexer reclassifies; every
    // other keyword is recognised by the parser on the lexeme.
    #[token("&&")]
    #[token("and")]
    And,
    #[token("||")]
    #[token("or")]
    Or,

    // Sentence terminator, silently dropped.
    #[token(".", logos::skip)]
    Dot,

    // A lone `|` is always an error; surfacing it as a token lets the
    // driver attach the "did you mean '||'?" hint.
    #[token("|")]
    Pipe,
    #[token("#", hash_or_comment)]
    Hash,

    // These two only match when the longer comment/string pattern failed,
    // i.e. the construct was never terminated.
    #[token("/*")]
    BlockCommentStart,
    #[token("\"")]
    QuoteStart,

    #[regex(r"[0-9]+(\.[0-9]+)?", dec_number)]
    #[regex(r"0[xX][0-9a-fA-F]+", hex_number)]
    Number(f64),

    #[regex(r#""[^"]*""#, string_body)]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Appended by the driver; the NUL pattern never occurs in text.
    #[token("\0")]
    Eof,
}

/// A token with its raw lexeme and 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: Tok,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("lex error at line {line}, col {col}: {message}")]
pub struct LexError {
    pub code: &'static str,
    pub line: u32,
    pub col: u32,
    pub lexeme: String,
    pub message: String,
    pub hint: Option<String>,
}

/// Lex a statement that begins at (base_line, base_col) of the expanded
/// source, producing tokens with absolute positions.
pub fn lex_at(source: &str, base_line: u32, base_col: u32) -> Result<Vec<Token>, LexError> {
    let index = LineIndex::new(source);
    let absolute = |offset: usize| -> (u32, u32) {
        let (line, col) = index.line_col(offset);
        let abs_line = base_line + line - 1;
        let abs_col = if line == 1 { base_col + col - 1 } else { col };
        (abs_line, abs_col)
    };

    let mut lexer = Tok::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, col) = absolute(span.start);
        let slice = &source[span.clone()];
        match result {
            Ok(Tok::Pipe) => {
                return Err(LexError {
                    code: "CAT-L002",
                    line,
                    col,
                    lexeme: "|".into(),
                    message: "unexpected '|'".into(),
                    hint: Some("did you mean '||'?".into()),
                });
            }
            Ok(Tok::Hash) => {
                return Err(LexError {
                    code: "CAT-L001",
                    line,
                    col,
                    lexeme: "#".into(),
                    message: "unexpected character '#'".into(),
                    hint: Some("'#' only starts a comment at column 1".into()),
                });
            }
            Ok(Tok::BlockCommentStart) => {
                return Err(LexError {
                    code: "CAT-L004",
                    line,
                    col,
                    lexeme: "/*".into(),
                    message: "unterminated block comment".into(),
                    hint: Some("close it with '*/'".into()),
                });
            }
            Ok(Tok::QuoteStart) => {
                return Err(LexError {
                    code: "CAT-L003",
                    line,
                    col,
                    lexeme: "\"".into(),
                    message: "unterminated string literal".into(),
                    hint: Some("close it with '\"'".into()),
                });
            }
            Ok(kind) => tokens.push(Token { kind, text: slice.to_string(), line, col }),
            Err(LexIssue::HexOverflow) => {
                return Err(LexError {
                    code: "CAT-L005",
                    line,
                    col,
                    lexeme: slice.to_string(),
                    message: format!("hex literal '{slice}' out of range"),
                    hint: None,
                });
            }
            Err(LexIssue::Unknown) => {
                // Classify unmatched input: an opening quote that never
                // closes reaches here when the error span starts at it.
                let (code, message, hint) = if slice.starts_with('"') {
                    (
                        "CAT-L003",
                        "unterminated string literal".to_string(),
                        Some("close it with '\"'".to_string()),
                    )
                } else {
                    (
                        "CAT-L001",
                        format!("unexpected character '{slice}'"),
                        None,
                    )
                };
                return Err(LexError { code, line, col, lexeme: slice.to_string(), message, hint });
            }
        }
    }

    let (line, col) = absolute(source.len());
    tokens.push(Token { kind: Tok::Eof, text: String::new(), line, col });
    Ok(tokens)
}

/// Lex a whole source with positions starting at line 1, column 1.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    lex_at(source, 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            kinds("+ - * / % > >= < <= == != ="),
            vec![
                Tok::Plus,
                Tok::Minus,
                Tok::Star,
                Tok::Slash,
                Tok::Percent,
                Tok::Gt,
                Tok::Ge,
                Tok::Lt,
                Tok::Le,
                Tok::EqEq,
                Tok::NotEq,
                Tok::Eq,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn lex_arrow_merges() {
        assert_eq!(kinds("->"), vec![Tok::Arrow, Tok::Eof]);
        // `- >` with a space stays two tokens
        assert_eq!(kinds("- >"), vec![Tok::Minus, Tok::Gt, Tok::Eof]);
    }

    #[test]
    fn lex_logical_symbols_and_words() {
        assert_eq!(kinds("a && b || c"), vec![
            Tok::Ident("a".into()),
            Tok::And,
            Tok::Ident("b".into()),
            Tok::Or,
            Tok::Ident("c".into()),
            Tok::Eof,
        ]);
        assert_eq!(kinds("a and b or c")[1], Tok::And);
        assert_eq!(kinds("a and b or c")[3], Tok::Or);
    }

    #[test]
    fn lex_and_prefix_stays_identifier() {
        assert_eq!(kinds("android")[0], Tok::Ident("android".into()));
        assert_eq!(kinds("order")[0], Tok::Ident("order".into()));
    }

    #[test]
    fn lex_lone_pipe_is_fatal_with_hint() {
        let err = lex("a | b").unwrap_err();
        assert_eq!(err.code, "CAT-L002");
        assert_eq!(err.hint.as_deref(), Some("did you mean '||'?"));
        assert_eq!((err.line, err.col), (1, 3));
    }

    #[test]
    fn lex_numbers() {
        let toks = lex("42 3.14 0x11223344").unwrap();
        assert_eq!(toks[0].kind, Tok::Number(42.0));
        assert_eq!(toks[1].kind, Tok::Number(3.14));
        assert_eq!(toks[2].kind, Tok::Number(287454020.0));
    }

    #[test]
    fn lex_dot_not_followed_by_digit_is_dropped() {
        // The fractional dot needs a following digit; a bare sentence
        // terminator vanishes.
        assert_eq!(kinds("3. x"), vec![
            Tok::Number(3.0),
            Tok::Ident("x".into()),
            Tok::Eof,
        ]);
    }

    #[test]
    fn lex_hex_overflow_is_fatal() {
        let err = lex("0x1ffffffffffffffff").unwrap_err();
        assert_eq!(err.code, "CAT-L005");
    }

    #[test]
    fn lex_string_literal() {
        let toks = lex(r#""hello world""#).unwrap();
        assert_eq!(toks[0].kind, Tok::Str("hello world".into()));
        assert_eq!(toks[0].text, r#""hello world""#);
    }

    #[test]
    fn lex_string_with_embedded_newline() {
        let toks = lex("\"two\nlines\" x").unwrap();
        assert_eq!(toks[0].kind, Tok::Str("two\nlines".into()));
        // `x` sits on line 2 of the statement text
        assert_eq!(toks[1].line, 2);
    }

    #[test]
    fn lex_unterminated_string_is_fatal() {
        let err = lex("\"oops").unwrap_err();
        assert_eq!(err.code, "CAT-L003");
    }

    #[test]
    fn lex_comments() {
        assert_eq!(kinds("a // rest is gone\nb"), vec![
            Tok::Ident("a".into()),
            Tok::Ident("b".into()),
            Tok::Eof,
        ]);
        assert_eq!(kinds("a /* mid */ b"), vec![
            Tok::Ident("a".into()),
            Tok::Ident("b".into()),
            Tok::Eof,
        ]);
        assert_eq!(kinds("a /* spans\nlines */ b").len(), 3);
    }

    #[test]
    fn lex_unterminated_block_comment_is_fatal() {
        let err = lex("a /* never closed").unwrap_err();
        assert_eq!(err.code, "CAT-L004");
    }

    #[test]
    fn lex_semicolon_column_one_is_comment() {
        assert_eq!(kinds("; whole line comment\nx"), vec![
            Tok::Ident("x".into()),
            Tok::Eof,
        ]);
        // elsewhere it is a token
        assert_eq!(kinds("x;")[1], Tok::Semi);
    }

    #[test]
    fn lex_hash_column_one_is_comment() {
        assert_eq!(kinds("# whole line\nx"), vec![Tok::Ident("x".into()), Tok::Eof]);
        let err = lex("x # y").unwrap_err();
        assert_eq!(err.code, "CAT-L001");
    }

    #[test]
    fn lex_unknown_byte_is_fatal_with_position() {
        let err = lex("let x be $").unwrap_err();
        assert_eq!(err.code, "CAT-L001");
        assert_eq!((err.line, err.col), (1, 10));
    }

    #[test]
    fn lex_positions_are_one_based() {
        let toks = lex("ab cd\n  ef").unwrap();
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[1].line, toks[1].col), (1, 4));
        assert_eq!((toks[2].line, toks[2].col), (2, 3));
    }

    #[test]
    fn lex_at_offsets_first_line_only() {
        let toks = lex_at("ab\ncd", 10, 5).unwrap();
        assert_eq!((toks[0].line, toks[0].col), (10, 5));
        // second physical line keeps its own column
        assert_eq!((toks[1].line, toks[1].col), (11, 1));
    }
}
