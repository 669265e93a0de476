use crate::ast::*;
use crate::lexer::{Tok, Token};

/// A parse failure for one statement. The statement is dropped and the
/// driver keeps going with the rest of the program.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at line {line}, col {col} near '{near}': {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub line: u32,
    pub col: u32,
    pub near: String,
    pub message: String,
    pub hint: Option<String>,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Words that terminate or connect English phrases; they never begin an
/// expression even though the lexer sees them as plain identifiers.
const STRUCTURE_WORDS: &[&str] = &[
    "then", "else", "otherwise", "end", "do", "to", "from", "by", "at", "in", "with", "be",
    "returning",
];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse the token stream of one logical statement. A single physical
/// statement may contain several `;`-separated concise statements.
pub fn parse_statement_tokens(tokens: Vec<Token>) -> Result<Vec<Stmt>> {
    Parser::new(tokens).parse_all()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    // ---- Cursor primitives ----

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, n: usize) -> &Tok {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn check(&self, kind: &Tok) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &Tok) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &Tok, code: &'static str, what: &str) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(code, format!("expected {what}")))
        }
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn check_word_at(&self, n: usize, word: &str) -> bool {
        matches!(self.peek_at(n), Tok::Ident(w) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self
                .error("CAT-P005", format!("expected '{word}'"))
                .with_hint("ensure 'and'/'by'/'to' keywords separate phrase arguments"))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Ident(name) if !STRUCTURE_WORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("CAT-P004", "expected identifier")),
        }
    }

    fn error(&self, code: &'static str, message: impl Into<String>) -> ParseError {
        let t = self.current();
        let near = if t.text.is_empty() { "end of statement".to_string() } else { t.text.clone() };
        ParseError {
            code,
            line: t.line,
            col: t.col,
            near,
            message: message.into(),
            hint: None,
        }
    }

    /// True when the next token can begin an expression.
    fn can_start_expr(&self) -> bool {
        match self.peek() {
            Tok::Number(_) | Tok::Str(_) | Tok::LParen | Tok::LBracket | Tok::Minus => true,
            Tok::Ident(w) => !STRUCTURE_WORDS.contains(&w.as_str()),
            _ => false,
        }
    }

    // ---- Statements ----

    pub fn parse_all(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            if self.eat(&Tok::Semi) {
                continue;
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.check_word("fn")
            && matches!(self.peek_at(1), Tok::Ident(_))
            && matches!(self.peek_at(2), Tok::LParen)
        {
            return self.concise_function();
        }
        if self.check_word("define") && self.check_word_at(1, "function") {
            return self.english_function();
        }
        if self.check_word("if") {
            return self.if_statement();
        }
        if self.check_word("while") {
            return self.while_statement();
        }
        if self.check_word("let") {
            return self.let_statement();
        }
        if self.check_word("make") {
            return self.make_statement();
        }
        if self.check_word("set") {
            return self.set_statement();
        }
        if self.check_word("return") {
            return self.return_statement();
        }
        if self.check_word("for") && self.check_word_at(1, "each") {
            return self.for_each_statement();
        }
        if self.check_word("do") {
            self.advance();
            let body = self.block_until_end()?;
            return Ok(Stmt::Block(body));
        }
        if self.check(&Tok::LBrace) {
            self.advance();
            let body = self.block_until_rbrace()?;
            return Ok(Stmt::Block(body));
        }
        self.expression_statement()
    }

    /// Statements until a closing `end` (consumed). `stop_words` lets the
    /// English if-statement halt at `else`/`otherwise` without consuming it.
    fn stmts_until_words(&mut self, stop_words: &[&str]) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Tok::Semi) {}
            if self.at_end() {
                return Err(self.error("CAT-P007", "missing 'end'"));
            }
            if stop_words.iter().any(|w| self.check_word(w)) {
                return Ok(stmts);
            }
            if self.check_word("end") {
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
        }
    }

    fn block_until_end(&mut self) -> Result<Vec<Stmt>> {
        let stmts = self.stmts_until_words(&[])?;
        self.expect_word("end").map_err(|mut e| {
            e.code = "CAT-P007";
            e.message = "missing 'end'".into();
            e.hint = None;
            e
        })?;
        Ok(stmts)
    }

    fn block_until_rbrace(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Tok::Semi) {}
            if self.eat(&Tok::RBrace) {
                return Ok(stmts);
            }
            if self.at_end() {
                return Err(self.error("CAT-P008", "missing '}'"));
            }
            stmts.push(self.statement()?);
        }
    }

    /// A body that is exactly one explicit block collapses into it, so
    /// `while c do do ... end end` and `while c do ... end` agree.
    fn body_block(mut stmts: Vec<Stmt>) -> Stmt {
        if stmts.len() == 1 && matches!(stmts[0], Stmt::Block(_)) {
            stmts.pop().expect("single statement present")
        } else {
            Stmt::Block(stmts)
        }
    }

    fn concise_function(&mut self) -> Result<Stmt> {
        self.advance(); // fn
        let name = self.expect_ident()?;
        self.expect(&Tok::LParen, "CAT-P006", "'('")?;
        let mut params = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                let pname = self.expect_ident()?;
                let ty = if self.eat(&Tok::Colon) { Some(self.type_name()?) } else { None };
                params.push(Param { name: pname, ty });
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(&Tok::RParen, "CAT-P002", "')'")
            .map_err(|e| e.with_hint("missing ')'"))?;
        let return_type = if self.eat(&Tok::Arrow) { Some(self.type_name()?) } else { None };
        self.expect(&Tok::LBrace, "CAT-P006", "'{' before function body")?;
        let body = self.block_until_rbrace()?;
        Ok(Stmt::Function { name, params, return_type, body })
    }

    fn english_function(&mut self) -> Result<Stmt> {
        self.advance(); // define
        self.advance(); // function
        let name = self.expect_ident()?;
        let mut params = Vec::new();
        if self.eat_word("with") {
            self.expect_word("parameters")?;
            loop {
                let pname = self.expect_ident()?;
                // Only a colon followed by a type name annotates; the `:`
                // before the body's `do` stays untouched.
                let annotated = self.check(&Tok::Colon)
                    && matches!(self.peek_at(1), Tok::Ident(w) if TypeDesc::from_name(w).is_some());
                let ty = if annotated {
                    self.advance();
                    Some(self.type_name()?)
                } else {
                    None
                };
                params.push(Param { name: pname, ty });
                if !(self.eat(&Tok::Comma) || self.eat(&Tok::And)) {
                    break;
                }
            }
        }
        let return_type = if self.eat_word("returning") { Some(self.type_name()?) } else { None };
        self.eat(&Tok::Colon);
        self.eat_word("do");
        let body = self.block_until_end()?;
        Ok(Stmt::Function { name, params, return_type, body })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.advance(); // if
        if self.check(&Tok::LParen) {
            let save = self.pos;
            match self.concise_if_tail() {
                Ok(stmt) => return Ok(stmt),
                Err(_) => self.pos = save,
            }
        }
        // English: if COND then ... [else|otherwise ...] end
        let cond = self.expression()?;
        self.expect_word("then")?;
        let then_stmts = self.stmts_until_words(&["else", "otherwise"])?;
        let else_branch = if self.eat_word("else") || self.eat_word("otherwise") {
            let else_stmts = self.block_until_end()?;
            Some(Box::new(Self::body_block(else_stmts)))
        } else {
            self.expect_word("end").map_err(|mut e| {
                e.code = "CAT-P007";
                e.message = "missing 'end'".into();
                e.hint = None;
                e
            })?;
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch: Box::new(Self::body_block(then_stmts)),
            else_branch,
        })
    }

    fn concise_if_tail(&mut self) -> Result<Stmt> {
        self.expect(&Tok::LParen, "CAT-P006", "'('")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "CAT-P002", "')'")
            .map_err(|e| e.with_hint("missing ')'"))?;
        let then_branch = self.statement()?;
        let else_branch = if self.eat_word("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If { cond, then_branch: Box::new(then_branch), else_branch })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.advance(); // while
        if self.check(&Tok::LParen) {
            let save = self.pos;
            match self.concise_while_tail() {
                Ok(stmt) => return Ok(stmt),
                Err(_) => self.pos = save,
            }
        }
        let cond = self.expression()?;
        self.expect_word("do")?;
        let body = self.block_until_end()?;
        Ok(Stmt::While { cond, body: Box::new(Self::body_block(body)) })
    }

    fn concise_while_tail(&mut self) -> Result<Stmt> {
        self.expect(&Tok::LParen, "CAT-P006", "'('")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "CAT-P002", "')'")
            .map_err(|e| e.with_hint("missing ')'"))?;
        let body = self.statement()?;
        Ok(Stmt::While { cond, body: Box::new(body) })
    }

    fn let_statement(&mut self) -> Result<Stmt> {
        self.advance(); // let
        let name = self.expect_ident()?;
        let ty = if self.eat(&Tok::Colon) { Some(self.type_name()?) } else { None };
        let init = if self.eat(&Tok::Eq) {
            // concise: let NAME = EXPR;
            let e = self.expression()?;
            self.eat(&Tok::Semi);
            e
        } else {
            self.expect_word("be")?;
            self.expression()?
        };
        Ok(Stmt::Let { name, ty, init })
    }

    /// `make NAME equal to EXPR` is an alias for the English let.
    fn make_statement(&mut self) -> Result<Stmt> {
        self.advance(); // make
        let name = self.expect_ident()?;
        self.expect_word("equal")?;
        self.expect_word("to")?;
        let init = self.expression()?;
        Ok(Stmt::Let { name, ty: None, init })
    }

    fn set_statement(&mut self) -> Result<Stmt> {
        self.advance(); // set
        if self.check_word("key") {
            // set key K of M to V  →  __map_set(M, K, V)
            self.advance();
            let key = self.phrase_arg()?;
            self.expect_word("of")?;
            let map = self.phrase_arg()?;
            self.expect_word("to")?;
            let value = self.expression()?;
            return Ok(Stmt::Expression(Expr::Call {
                callee: "__map_set".into(),
                args: vec![map, key, value],
            }));
        }
        let name = self.expect_ident()?;
        if self.eat(&Tok::LBracket) {
            let index = self.expression()?;
            self.expect(&Tok::RBracket, "CAT-P003", "']'")
                .map_err(|e| e.with_hint("missing ']'"))?;
            self.expect_word("to")?;
            let value = self.expression()?;
            return Ok(Stmt::SetIndex { array: Expr::Variable(name), index, value });
        }
        self.expect_word("to")?;
        let value = self.expression()?;
        Ok(Stmt::Set { name, value })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        self.advance(); // return
        let value = if self.can_start_expr() { Some(self.expression()?) } else { None };
        self.eat(&Tok::Semi);
        Ok(Stmt::Return { value })
    }

    fn for_each_statement(&mut self) -> Result<Stmt> {
        self.advance(); // for
        self.advance(); // each
        let var = self.expect_ident()?;
        self.expect_word("in")?;
        let iterable = self.expression()?;
        self.expect_word("do")?;
        let body = self.block_until_end()?;
        Ok(Stmt::ForEach { var, iterable, body: Box::new(Self::body_block(body)) })
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.equality()?;
        if self.eat(&Tok::Eq) {
            let value = self.expression()?;
            self.eat(&Tok::Semi);
            return match expr {
                Expr::Variable(name) => Ok(Stmt::Set { name, value }),
                Expr::Index { array, index } => {
                    Ok(Stmt::SetIndex { array: *array, index: *index, value })
                }
                _ => Err(self.error("CAT-P009", "invalid assignment target")),
            };
        }
        self.eat(&Tok::Semi);
        Ok(Stmt::Expression(expr))
    }

    fn type_name(&mut self) -> Result<TypeDesc> {
        let name = self.expect_ident()?;
        TypeDesc::from_name(&name)
            .ok_or_else(|| self.error("CAT-P010", format!("unknown type name '{name}'")))
    }

    // ---- Expressions ----
    //
    // equality → logic → comparison → term → factor → unary → postfix.
    // English phrase arguments parse at `comparison` so that `and` keeps
    // working as the argument separator.

    fn expression(&mut self) -> Result<Expr> {
        let expr = self.equality()?;
        if self.eat(&Tok::Eq) {
            return match expr {
                Expr::Variable(name) => {
                    let value = self.expression()?;
                    Ok(Expr::Assign { name, value: Box::new(value) })
                }
                _ => Err(self.error("CAT-P009", "invalid assignment target")),
            };
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut expr = self.logic()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::NotEq => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.logic()?;
            expr = Expr::Binary { op, left: Box::new(expr), right: Box::new(right) };
        }
        Ok(expr)
    }

    fn logic(&mut self) -> Result<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let op = match self.peek() {
                Tok::And => BinOp::And,
                Tok::Or => BinOp::Or,
                _ => break,
            };
            self.advance();
            let right = self.comparison()?;
            expr = Expr::Binary { op, left: Box::new(expr), right: Box::new(right) };
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut expr = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            expr = Expr::Binary { op, left: Box::new(expr), right: Box::new(right) };
        }
        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut expr = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            expr = Expr::Binary { op, left: Box::new(expr), right: Box::new(right) };
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            expr = Expr::Binary { op, left: Box::new(expr), right: Box::new(right) };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Tok::LBracket) {
            let index = self.expression()?;
            self.expect(&Tok::RBracket, "CAT-P003", "']'")
                .map_err(|e| e.with_hint("missing ']'"))?;
            expr = Expr::Index { array: Box::new(expr), index: Box::new(index) };
        }
        Ok(expr)
    }

    /// English phrase arguments: below `and`/`or` so the words keep
    /// separating arguments.
    fn phrase_arg(&mut self) -> Result<Expr> {
        self.comparison()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Tok::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "CAT-P002", "')'")
                    .map_err(|e| e.with_hint("missing ')'"))?;
                Ok(Expr::Grouping(Box::new(inner)))
            }
            Tok::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&Tok::RBracket) {
                    loop {
                        elements.push(self.expression()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBracket, "CAT-P003", "']'")
                    .map_err(|e| e.with_hint("missing ']'"))?;
                Ok(Expr::Array(elements))
            }
            Tok::Ident(word) => {
                match word.as_str() {
                    "true" => {
                        self.advance();
                        return Ok(Expr::Literal(Literal::Bool(true)));
                    }
                    "false" => {
                        self.advance();
                        return Ok(Expr::Literal(Literal::Bool(false)));
                    }
                    "nil" | "nothing" => {
                        self.advance();
                        return Ok(Expr::Literal(Literal::Nil));
                    }
                    _ => {}
                }
                if let Some(expr) = self.english_phrase(&word)? {
                    return Ok(expr);
                }
                self.advance();
                if self.eat(&Tok::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Tok::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Tok::RParen, "CAT-P002", "')'")
                        .map_err(|e| e.with_hint("missing ')'"))?;
                    return Ok(Expr::Call { callee: word, args });
                }
                Ok(Expr::Variable(word))
            }
            _ => Err(self.error("CAT-P001", "expected expression")),
        }
    }

    // ---- The English vocabulary prelude ----
    //
    // Every phrase lowers to a call of a reserved `__` builtin. Argument
    // order is part of the bytecode contract and mirrors the opcode stack
    // orders, e.g. `get K from M` → __map_get(M, K).

    /// Unary phrases of the shape `HEAD ARG`.
    fn unary_phrase_builtin(word: &str) -> Option<&'static str> {
        Some(match word {
            "chr" => "__chr",
            "alloc" => "__alloc",
            "free" => "__free",
            "tostring" => "__tostring",
            "trim" => "__trim",
            "upper" => "__str_upper",
            "lower" => "__str_lower",
            "floor" => "__floor",
            "ceil" => "__ceil",
            "round" => "__round",
            "sqrt" => "__sqrt",
            "abs" => "__abs",
            "exp" => "__exp",
            "log" => "__log",
            "sin" => "__sin",
            "cos" => "__cos",
            "tan" => "__tan",
            "asin" => "__asin",
            "acos" => "__acos",
            "atan" => "__atan",
            "assert" => "__assert",
            "panic" => "__panic",
            "pack16" => "__pack16",
            "pack32" => "__pack32",
            "pack64" => "__pack64",
            "blocksize" => "__block_size",
            "ptroffset" => "__ptr_offset",
            "ptrblock" => "__ptr_block",
            _ => return None,
        })
    }

    /// Phrases of the shape `HEAD A and B`.
    fn and_phrase_builtin(word: &str) -> Option<&'static str> {
        Some(match word {
            "concat" => "__str_cat",
            "band" => "__band",
            "bor" => "__bor",
            "bxor" => "__bxor",
            "atan2" => "__atan2",
            _ => return None,
        })
    }

    /// Phrases of the shape `HEAD A by B`.
    fn by_phrase_builtin(word: &str) -> Option<&'static str> {
        Some(match word {
            "pow" => "__pow",
            "shl" => "__shl",
            "shr" => "__shr",
            "ptradd" => "__ptr_add",
            "split" => "__split",
            "join" => "__join",
            _ => return None,
        })
    }

    /// Phrases of the shape `HEAD of ARG`.
    fn of_phrase_builtin(word: &str) -> Option<&'static str> {
        Some(match word {
            "length" => "__len",
            "keys" => "__map_keys",
            "size" => "__map_size",
            "ord" => "__ord",
            _ => return None,
        })
    }

    /// Memory loads `readN P at K` and stores `writeN V to P at K`.
    fn mem_phrase_builtin(word: &str) -> Option<(&'static str, bool)> {
        Some(match word {
            "read8" => ("__load8", false),
            "read16" => ("__load16", false),
            "read32" => ("__load32", false),
            "read64" => ("__load64", false),
            "readf32" => ("__loadf32", false),
            "write8" => ("__store8", true),
            "write16" => ("__store16", true),
            "write32" => ("__store32", true),
            "write64" => ("__store64", true),
            "writef32" => ("__storef32", true),
            _ => return None,
        })
    }

    fn call_expr(callee: &str, args: Vec<Expr>) -> Expr {
        Expr::Call { callee: callee.to_string(), args }
    }

    /// Try to parse an English phrase starting at the current identifier.
    /// Returns Ok(None) when the identifier is not a phrase head here, so
    /// the caller falls back to plain identifier handling.
    fn english_phrase(&mut self, word: &str) -> Result<Option<Expr>> {
        // `HEAD of ARG`
        if let Some(builtin) = Self::of_phrase_builtin(word) {
            if self.check_word_at(1, "of") {
                self.advance();
                self.advance();
                let arg = self.phrase_arg()?;
                return Ok(Some(Self::call_expr(builtin, vec![arg])));
            }
            return Ok(None);
        }

        // `HEAD ARG`
        if let Some(builtin) = Self::unary_phrase_builtin(word) {
            if self.next_starts_phrase_arg() {
                self.advance();
                let arg = self.phrase_arg()?;
                return Ok(Some(Self::call_expr(builtin, vec![arg])));
            }
            return Ok(None);
        }

        // `HEAD A and B`
        if let Some(builtin) = Self::and_phrase_builtin(word) {
            if self.next_starts_phrase_arg() {
                self.advance();
                let a = self.phrase_arg()?;
                self.expect(&Tok::And, "CAT-P005", "'and' between arguments")
                    .map_err(|e| e.with_hint("ensure 'and'/'by'/'to' keywords separate phrase arguments"))?;
                let b = self.phrase_arg()?;
                return Ok(Some(Self::call_expr(builtin, vec![a, b])));
            }
            return Ok(None);
        }

        // `HEAD A by B`
        if let Some(builtin) = Self::by_phrase_builtin(word) {
            if self.next_starts_phrase_arg() {
                self.advance();
                let a = self.phrase_arg()?;
                self.expect_word("by")?;
                let b = self.phrase_arg()?;
                return Ok(Some(Self::call_expr(builtin, vec![a, b])));
            }
            return Ok(None);
        }

        // `readN P at K` / `writeN V to P at K`
        if let Some((builtin, is_store)) = Self::mem_phrase_builtin(word) {
            if self.next_starts_phrase_arg() {
                self.advance();
                if is_store {
                    let value = self.phrase_arg()?;
                    self.expect_word("to")?;
                    let ptr = self.phrase_arg()?;
                    self.expect_word("at")?;
                    let offset = self.phrase_arg()?;
                    return Ok(Some(Self::call_expr(builtin, vec![value, ptr, offset])));
                }
                let ptr = self.phrase_arg()?;
                self.expect_word("at")?;
                let offset = self.phrase_arg()?;
                return Ok(Some(Self::call_expr(builtin, vec![ptr, offset])));
            }
            return Ok(None);
        }

        match word {
            // get K from M → __map_get(M, K)
            "get" if self.next_starts_phrase_arg() => {
                self.advance();
                let key = self.phrase_arg()?;
                self.expect_word("from")?;
                let map = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__map_get", vec![map, key])))
            }
            // has K in M → __map_has(M, K)
            "has" if self.next_starts_phrase_arg() => {
                self.advance();
                let key = self.phrase_arg()?;
                self.expect_word("in")?;
                let map = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__map_has", vec![map, key])))
            }
            // substring of S from A to B → __substr(S, A, B)
            "substring" if self.check_word_at(1, "of") => {
                self.advance();
                self.advance();
                let s = self.phrase_arg()?;
                self.expect_word("from")?;
                let a = self.phrase_arg()?;
                self.expect_word("to")?;
                let b = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__substr", vec![s, a, b])))
            }
            // find N in H → __str_find(H, N)
            "find" if self.next_starts_phrase_arg() => {
                self.advance();
                let needle = self.phrase_arg()?;
                self.expect_word("in")?;
                let haystack = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__str_find", vec![haystack, needle])))
            }
            // contains N in H → __str_contains(H, N)
            "contains" if self.next_starts_phrase_arg() => {
                self.advance();
                let needle = self.phrase_arg()?;
                self.expect_word("in")?;
                let haystack = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__str_contains", vec![haystack, needle])))
            }
            // replace P with R in S → __replace(S, P, R)
            "replace" if self.next_starts_phrase_arg() => {
                self.advance();
                let pat = self.phrase_arg()?;
                self.expect_word("with")?;
                let rep = self.phrase_arg()?;
                self.expect_word("in")?;
                let s = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__replace", vec![s, pat, rep])))
            }
            // starts with P in S → __starts_with(S, P)
            "starts" if self.check_word_at(1, "with") => {
                self.advance();
                self.advance();
                let prefix = self.phrase_arg()?;
                self.expect_word("in")?;
                let s = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__starts_with", vec![s, prefix])))
            }
            // ends with P in S → __ends_with(S, P)
            "ends" if self.check_word_at(1, "with") => {
                self.advance();
                self.advance();
                let suffix = self.phrase_arg()?;
                self.expect_word("in")?;
                let s = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__ends_with", vec![s, suffix])))
            }
            // read file P → __read_file(P)
            "read" if self.check_word_at(1, "file") => {
                self.advance();
                self.advance();
                let path = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__read_file", vec![path])))
            }
            // write D to file P → __write_file(P, D)
            "write" if self.next_starts_phrase_arg() => {
                self.advance();
                let data = self.phrase_arg()?;
                self.expect_word("to")?;
                self.expect_word("file")?;
                let path = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__write_file", vec![path, data])))
            }
            // exists file P → __file_exists(P)
            "exists" if self.check_word_at(1, "file") => {
                self.advance();
                self.advance();
                let path = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__file_exists", vec![path])))
            }
            // delete key K from M → __map_del(M, K)
            "delete" if self.check_word_at(1, "key") => {
                self.advance();
                self.advance();
                let key = self.phrase_arg()?;
                self.expect_word("from")?;
                let map = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__map_del", vec![map, key])))
            }
            // parse int S / parse float S
            "parse" if self.check_word_at(1, "int") || self.check_word_at(1, "float") => {
                self.advance();
                let which = self.expect_ident()?;
                let s = self.phrase_arg()?;
                let builtin = if which == "int" { "__parse_int" } else { "__parse_float" };
                Ok(Some(Self::call_expr(builtin, vec![s])))
            }
            // range from A to B → __range(A, B)
            "range" if self.check_word_at(1, "from") => {
                self.advance();
                self.advance();
                let a = self.phrase_arg()?;
                self.expect_word("to")?;
                let b = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__range", vec![a, b])))
            }
            // ptrdiff A B → __ptr_diff(A, B)
            "ptrdiff" if self.next_starts_phrase_arg() => {
                self.advance();
                let a = self.phrase_arg()?;
                let b = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__ptr_diff", vec![a, b])))
            }
            // realloc P N → __realloc(P, N)
            "realloc" if self.next_starts_phrase_arg() => {
                self.advance();
                let p = self.phrase_arg()?;
                let n = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__realloc", vec![p, n])))
            }
            // append X to A → __append(A, X)
            "append" if self.next_starts_phrase_arg() => {
                self.advance();
                let value = self.phrase_arg()?;
                self.expect_word("to")?;
                let array = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__append", vec![array, value])))
            }
            // pop from A → __pop(A)
            "pop" if self.check_word_at(1, "from") => {
                self.advance();
                self.advance();
                let array = self.phrase_arg()?;
                Ok(Some(Self::call_expr("__pop", vec![array])))
            }
            // format F with A and B ... → __format(F, A, B, ...)
            "format" if self.next_starts_phrase_arg() => {
                self.advance();
                let fmt = self.phrase_arg()?;
                let mut args = vec![fmt];
                if self.eat_word("with") {
                    loop {
                        args.push(self.phrase_arg()?);
                        if !(self.eat(&Tok::And) || self.eat(&Tok::Comma)) {
                            break;
                        }
                    }
                }
                Ok(Some(Self::call_expr("__format", args)))
            }
            // call NAME with a and b and c (comma also accepted)
            "call" if matches!(self.peek_at(1), Tok::Ident(_)) => {
                self.advance();
                let callee = self.expect_ident()?;
                let mut args = Vec::new();
                if self.eat_word("with") {
                    loop {
                        args.push(self.phrase_arg()?);
                        if !(self.eat(&Tok::And) || self.eat(&Tok::Comma)) {
                            break;
                        }
                    }
                }
                Ok(Some(Expr::Call { callee, args }))
            }
            // print A B C — space separated, full expressions
            "print" => {
                self.advance();
                let mut args = Vec::new();
                while self.can_start_expr() {
                    args.push(self.expression()?);
                }
                Ok(Some(Self::call_expr("print", args)))
            }
            _ => Ok(None),
        }
    }

    /// Whether the token after the phrase head can begin an argument.
    fn next_starts_phrase_arg(&self) -> bool {
        match self.peek_at(1) {
            Tok::Number(_) | Tok::Str(_) | Tok::LParen | Tok::LBracket | Tok::Minus => true,
            Tok::Ident(w) => !STRUCTURE_WORDS.contains(&w.as_str()),
            _ => false,
        }
    }
}

impl ParseError {
    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse(src: &str) -> Vec<Stmt> {
        parse_statement_tokens(lex(src).unwrap()).unwrap()
    }

    fn parse_one(src: &str) -> Stmt {
        let mut stmts = parse(src);
        assert_eq!(stmts.len(), 1, "expected one statement in {src:?}");
        stmts.pop().unwrap()
    }

    fn parse_err(src: &str) -> ParseError {
        parse_statement_tokens(lex(src).unwrap()).unwrap_err()
    }

    #[test]
    fn precedence_groups_factor_over_term() {
        let stmt = parse_one("print (2+3)*4");
        let Stmt::Expression(Expr::Call { callee, args }) = stmt else {
            panic!("expected print call");
        };
        assert_eq!(callee, "print");
        assert!(matches!(
            &args[0],
            Expr::Binary { op: BinOp::Mul, left, .. }
                if matches!(**left, Expr::Grouping(_))
        ));
    }

    #[test]
    fn english_let_and_set() {
        assert_eq!(
            parse_one("let x be 10"),
            Stmt::Let { name: "x".into(), ty: None, init: Expr::Literal(Literal::Number(10.0)) }
        );
        let Stmt::Set { name, value } = parse_one("set x to x + 5") else {
            panic!("expected set");
        };
        assert_eq!(name, "x");
        assert!(matches!(value, Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn make_is_let_alias() {
        assert_eq!(parse_one("make x equal to 3"), parse_one("let x be 3"));
    }

    #[test]
    fn concise_let_and_assignment() {
        assert_eq!(
            parse_one("let x = 10;"),
            Stmt::Let { name: "x".into(), ty: None, init: Expr::Literal(Literal::Number(10.0)) }
        );
        assert!(matches!(parse_one("x = 5;"), Stmt::Set { .. }));
    }

    #[test]
    fn concise_let_with_type() {
        let Stmt::Let { ty, .. } = parse_one("let x: f64 = 1;") else { panic!() };
        assert_eq!(ty, Some(TypeDesc::Prim(Prim::F64)));
    }

    #[test]
    fn index_assignment_forms() {
        let english = parse_one("set a[1] to 42");
        let concise = parse_one("a[1] = 42;");
        assert_eq!(english, concise);
        assert!(matches!(english, Stmt::SetIndex { .. }));
    }

    #[test]
    fn set_key_lowers_to_map_set() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("set key \"k\" of m to 3")
        else {
            panic!("expected call stmt");
        };
        assert_eq!(callee, "__map_set");
        assert_eq!(args[0], Expr::Variable("m".into()));
        assert_eq!(args[1], Expr::Literal(Literal::Str("k".into())));
    }

    #[test]
    fn english_if_else() {
        let stmt = parse_one("if x > 1 then print x else print 0 end");
        let Stmt::If { else_branch, .. } = stmt else { panic!() };
        assert!(else_branch.is_some());
        // `otherwise` is an alias
        let stmt2 = parse_one("if x > 1 then print x otherwise print 0 end");
        assert_eq!(parse_one("if x > 1 then print x else print 0 end"), stmt2);
    }

    #[test]
    fn concise_if_backtracks_to_english() {
        // Parenthesised English condition must not be mistaken for the
        // concise form.
        let stmt = parse_one("if (x) > 1 then print x end");
        let Stmt::If { cond, .. } = stmt else { panic!() };
        assert!(matches!(cond, Expr::Binary { op: BinOp::Gt, .. }));
    }

    #[test]
    fn concise_if_with_blocks() {
        let stmt = parse_one("if (x > 1) { print x; } else { print 0; }");
        let Stmt::If { then_branch, else_branch, .. } = stmt else { panic!() };
        assert!(matches!(*then_branch, Stmt::Block(_)));
        assert!(else_branch.is_some());
    }

    #[test]
    fn english_while() {
        let stmt = parse_one("while i < 3 do\n  set i to i + 1\nend");
        let Stmt::While { cond, body } = stmt else { panic!() };
        assert!(matches!(cond, Expr::Binary { op: BinOp::Lt, .. }));
        let Stmt::Block(stmts) = *body else { panic!() };
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn concise_while() {
        let stmt = parse_one("while (i < 3) { i = i + 1; }");
        assert!(matches!(stmt, Stmt::While { .. }));
    }

    #[test]
    fn while_double_do_matches_single_do() {
        let single = parse_one("while x do print x end");
        let double = parse_one("while x do do print x end end");
        assert_eq!(single, double);
    }

    #[test]
    fn english_function_definition() {
        let stmt = parse_one(
            "define function add with parameters a, b returning number: do\n  return a + b\nend",
        );
        let Stmt::Function { name, params, return_type, body } = stmt else { panic!() };
        assert_eq!(name, "add");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "a");
        assert_eq!(return_type, Some(TypeDesc::Prim(Prim::F64)));
        assert!(matches!(body[0], Stmt::Return { value: Some(_) }));
    }

    #[test]
    fn concise_function_definition() {
        let stmt = parse_one("fn add(a, b) { return a + b; }");
        let Stmt::Function { name, params, return_type, .. } = stmt else { panic!() };
        assert_eq!(name, "add");
        assert_eq!(params.len(), 2);
        assert_eq!(return_type, None);
    }

    #[test]
    fn concise_function_with_types() {
        let stmt = parse_one("fn add(a: f64, b: f64) -> f64 { return a + b; }");
        let Stmt::Function { params, return_type, .. } = stmt else { panic!() };
        assert_eq!(params[0].ty, Some(TypeDesc::Prim(Prim::F64)));
        assert_eq!(return_type, Some(TypeDesc::Prim(Prim::F64)));
    }

    #[test]
    fn for_each_loop() {
        let stmt = parse_one("for each x in items do print x end");
        let Stmt::ForEach { var, iterable, .. } = stmt else { panic!() };
        assert_eq!(var, "x");
        assert_eq!(iterable, Expr::Variable("items".into()));
    }

    #[test]
    fn call_forms_agree() {
        let concise = parse_one("add(2, 3)");
        let english = parse_one("call add with 2 and 3");
        assert_eq!(concise, english);
        // commas accepted as English separators too
        assert_eq!(english, parse_one("call add with 2, 3"));
    }

    #[test]
    fn print_takes_juxtaposed_arguments() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("print a[0] a[1] a[2]")
        else {
            panic!()
        };
        assert_eq!(callee, "print");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn array_literal_and_index() {
        let Stmt::Let { init, .. } = parse_one("let a be [1, 2, 3]") else { panic!() };
        assert!(matches!(init, Expr::Array(ref v) if v.len() == 3));
        let Stmt::Expression(Expr::Index { .. }) = parse_one("a[0]") else { panic!() };
    }

    #[test]
    fn phrase_map_get_argument_order() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("get \"k\" from m") else {
            panic!()
        };
        assert_eq!(callee, "__map_get");
        // map first, key second
        assert_eq!(args[0], Expr::Variable("m".into()));
        assert_eq!(args[1], Expr::Literal(Literal::Str("k".into())));
    }

    #[test]
    fn phrase_substring() {
        let Stmt::Expression(Expr::Call { callee, args }) =
            parse_one("substring of s from 1 to 3")
        else {
            panic!()
        };
        assert_eq!(callee, "__substr");
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Expr::Variable("s".into()));
    }

    #[test]
    fn phrase_find_and_contains_swap_args() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("find n in h") else {
            panic!()
        };
        assert_eq!(callee, "__str_find");
        assert_eq!(args[0], Expr::Variable("h".into()));
        assert_eq!(args[1], Expr::Variable("n".into()));
    }

    #[test]
    fn phrase_memory_forms() {
        let Stmt::Let { init, .. } = parse_one("let p be alloc 8") else { panic!() };
        assert_eq!(init, Expr::Call { callee: "__alloc".into(), args: vec![Expr::Literal(Literal::Number(8.0))] });

        let Stmt::Expression(Expr::Call { callee, args }) =
            parse_one("write32 0x11223344 to p at 0")
        else {
            panic!()
        };
        assert_eq!(callee, "__store32");
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Expr::Literal(Literal::Number(287454020.0)));

        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("read32 p at 0") else {
            panic!()
        };
        assert_eq!(callee, "__load32");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn phrase_append_argument_order() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("append 4 to a") else {
            panic!()
        };
        assert_eq!(callee, "__append");
        assert_eq!(args[0], Expr::Variable("a".into()));
        assert_eq!(args[1], Expr::Literal(Literal::Number(4.0)));
    }

    #[test]
    fn phrase_bitwise_and_shift() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("band 12 and 10") else {
            panic!()
        };
        assert_eq!(callee, "__band");
        assert_eq!(args.len(), 2);

        let Stmt::Expression(Expr::Call { callee, .. }) = parse_one("shl 1 by 4") else {
            panic!()
        };
        assert_eq!(callee, "__shl");
    }

    #[test]
    fn phrase_length_requires_of() {
        let Stmt::Expression(Expr::Call { callee, .. }) = parse_one("length of a") else {
            panic!()
        };
        assert_eq!(callee, "__len");
        // without `of`, `length` is a plain variable
        assert_eq!(parse_one("length"), Stmt::Expression(Expr::Variable("length".into())));
    }

    #[test]
    fn phrase_heads_fall_back_to_variables() {
        assert_eq!(parse_one("pop"), Stmt::Expression(Expr::Variable("pop".into())));
        assert_eq!(parse_one("find"), Stmt::Expression(Expr::Variable("find".into())));
        let Stmt::Let { init, .. } = parse_one("let x be free") else { panic!() };
        assert_eq!(init, Expr::Variable("free".into()));
    }

    #[test]
    fn phrase_range_and_parse() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("range from 1 to 5") else {
            panic!()
        };
        assert_eq!(callee, "__range");
        assert_eq!(args.len(), 2);

        let Stmt::Expression(Expr::Call { callee, .. }) = parse_one("parse int \"42\"") else {
            panic!()
        };
        assert_eq!(callee, "__parse_int");
        let Stmt::Expression(Expr::Call { callee, .. }) = parse_one("parse float \"4.5\"")
        else {
            panic!()
        };
        assert_eq!(callee, "__parse_float");
    }

    #[test]
    fn phrase_starts_ends_replace() {
        let Stmt::Expression(Expr::Call { callee, args }) = parse_one("starts with \"a\" in s")
        else {
            panic!()
        };
        assert_eq!(callee, "__starts_with");
        assert_eq!(args[0], Expr::Variable("s".into()));

        let Stmt::Expression(Expr::Call { callee, args }) =
            parse_one("replace \"a\" with \"b\" in s")
        else {
            panic!()
        };
        assert_eq!(callee, "__replace");
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Expr::Variable("s".into()));
    }

    #[test]
    fn phrase_files() {
        let Stmt::Expression(Expr::Call { callee, .. }) = parse_one("read file \"x.txt\"") else {
            panic!()
        };
        assert_eq!(callee, "__read_file");
        let Stmt::Expression(Expr::Call { callee, args }) =
            parse_one("write \"data\" to file \"x.txt\"")
        else {
            panic!()
        };
        assert_eq!(callee, "__write_file");
        assert_eq!(args[0], Expr::Literal(Literal::Str("x.txt".into())));
        let Stmt::Expression(Expr::Call { callee, .. }) = parse_one("exists file \"x.txt\"")
        else {
            panic!()
        };
        assert_eq!(callee, "__file_exists");
    }

    #[test]
    fn phrase_format_collects_args() {
        let Stmt::Expression(Expr::Call { callee, args }) =
            parse_one("format \"{} and {}\" with 1 and 2")
        else {
            panic!()
        };
        assert_eq!(callee, "__format");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn unary_minus() {
        let Stmt::Let { init, .. } = parse_one("let x be -5") else { panic!() };
        assert!(matches!(init, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn logic_words_and_symbols_agree() {
        assert_eq!(parse_one("let z be a and b"), parse_one("let z be a && b"));
        assert_eq!(parse_one("let z be a or b"), parse_one("let z be a || b"));
    }

    #[test]
    fn missing_paren_reports_hint() {
        let err = parse_err("print (2 + 3");
        assert_eq!(err.code, "CAT-P002");
        assert_eq!(err.hint.as_deref(), Some("missing ')'"));
    }

    #[test]
    fn missing_bracket_reports_hint() {
        let err = parse_err("a[1");
        assert_eq!(err.code, "CAT-P003");
        assert_eq!(err.hint.as_deref(), Some("missing ']'"));
    }

    #[test]
    fn missing_connective_reports_hint() {
        let err = parse_err("band 1 2");
        assert_eq!(err.code, "CAT-P005");
        assert!(err.hint.as_deref().unwrap_or("").contains("'and'"));
    }

    #[test]
    fn missing_end_reported() {
        let err = parse_err("while x do print x");
        assert_eq!(err.code, "CAT-P007");
    }

    #[test]
    fn error_carries_position_and_near() {
        let err = parse_err("let be 10");
        assert_eq!(err.code, "CAT-P004");
        assert_eq!(err.line, 1);
        assert_eq!(err.near, "be");
    }

    #[test]
    fn multiple_concise_statements_per_line() {
        let stmts = parse("let x = 1; let y = 2; print x + y");
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn assignment_expression_in_grouping() {
        let Stmt::Let { init, .. } = parse_one("let y be (x = 3)") else { panic!() };
        let Expr::Grouping(inner) = init else { panic!() };
        assert!(matches!(*inner, Expr::Assign { .. }));
    }

    #[test]
    fn literals() {
        assert_eq!(parse_one("true"), Stmt::Expression(Expr::Literal(Literal::Bool(true))));
        assert_eq!(parse_one("false"), Stmt::Expression(Expr::Literal(Literal::Bool(false))));
        assert_eq!(parse_one("nil"), Stmt::Expression(Expr::Literal(Literal::Nil)));
        assert_eq!(parse_one("nothing"), Stmt::Expression(Expr::Literal(Literal::Nil)));
    }
}
