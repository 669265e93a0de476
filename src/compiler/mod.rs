use crate::ast::*;
use crate::bytecode::{Chunk, Constant, FuncEntry, Op};
use crate::source::OriginMap;

#[derive(Debug, Clone, thiserror::Error)]
#[error("compile error at line {line}, col {col}: {message}")]
pub struct CompileError {
    pub code: &'static str,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

type Result<T> = std::result::Result<T, CompileError>;

/// Builtins whose results are not echoed by the REPL when they appear as a
/// bare top-level expression (they exist for their side effect).
const STATEMENT_LIKE: &[&str] = &[
    "__append",
    "__pop",
    "__map_set",
    "__map_del",
    "__map_clear",
    "__array_reserve",
    "__array_clear",
    "__free",
    "__store8",
    "__store16",
    "__store32",
    "__store64",
    "__storef32",
    "__memcpy",
    "__memset",
    "__assert",
    "__panic",
    "__exit",
    "__write_file",
    "__fwrite",
    "__fclose",
    "__emit_chunk",
];

/// Fixed-arity `__` builtins and the opcode each compiles to. The variadic
/// ones (`__format`, `__ffi_*`) and `__range` are handled separately.
const BUILTINS: &[(&str, Op, usize)] = &[
    // memory
    ("__alloc", Op::Alloc, 1),
    ("__free", Op::Free, 1),
    ("__ptr_add", Op::PtrAdd, 2),
    ("__load8", Op::Load8, 2),
    ("__store8", Op::Store8, 3),
    ("__load16", Op::Load16, 2),
    ("__store16", Op::Store16, 3),
    ("__load32", Op::Load32, 2),
    ("__store32", Op::Store32, 3),
    ("__load64", Op::Load64, 2),
    ("__store64", Op::Store64, 3),
    ("__loadf32", Op::LoadF32, 2),
    ("__storef32", Op::StoreF32, 3),
    ("__memcpy", Op::Memcpy, 3),
    ("__memset", Op::Memset, 3),
    ("__ptr_diff", Op::PtrDiff, 2),
    ("__realloc", Op::Realloc, 2),
    ("__block_size", Op::BlockSize, 1),
    ("__ptr_offset", Op::PtrOffset, 1),
    ("__ptr_block", Op::PtrBlock, 1),
    // arrays
    ("__len", Op::Len, 1),
    ("__append", Op::Append, 2),
    ("__pop", Op::ArrayPop, 1),
    ("__array_reserve", Op::ArrayReserve, 2),
    ("__array_clear", Op::ArrayClear, 1),
    // maps
    ("__map_new", Op::NewMap, 0),
    ("__map_get", Op::MapGet, 2),
    ("__map_set", Op::MapSet, 3),
    ("__map_has", Op::MapHas, 2),
    ("__map_del", Op::MapDel, 2),
    ("__map_keys", Op::MapKeys, 1),
    ("__map_size", Op::MapSize, 1),
    ("__map_clear", Op::MapClear, 1),
    // strings
    ("__str_index", Op::StrIndex, 2),
    ("__substr", Op::Substr, 3),
    ("__str_find", Op::StrFind, 2),
    ("__split", Op::Split, 2),
    ("__str_cat", Op::StrCat, 2),
    ("__join", Op::Join, 2),
    ("__trim", Op::Trim, 1),
    ("__replace", Op::Replace, 3),
    ("__str_upper", Op::StrUpper, 1),
    ("__str_lower", Op::StrLower, 1),
    ("__str_contains", Op::StrContains, 2),
    ("__starts_with", Op::StartsWith, 2),
    ("__ends_with", Op::EndsWith, 2),
    ("__ord", Op::Ord, 1),
    ("__chr", Op::Chr, 1),
    ("__tostring", Op::ToString, 1),
    ("__parse_int", Op::ParseInt, 1),
    ("__parse_float", Op::ParseFloat, 1),
    // math
    ("__floor", Op::Floor, 1),
    ("__ceil", Op::Ceil, 1),
    ("__round", Op::Round, 1),
    ("__sqrt", Op::Sqrt, 1),
    ("__abs", Op::Abs, 1),
    ("__pow", Op::Pow, 2),
    ("__exp", Op::Exp, 1),
    ("__log", Op::Log, 1),
    ("__sin", Op::Sin, 1),
    ("__cos", Op::Cos, 1),
    ("__tan", Op::Tan, 1),
    ("__asin", Op::Asin, 1),
    ("__acos", Op::Acos, 1),
    ("__atan", Op::Atan, 1),
    ("__atan2", Op::Atan2, 2),
    ("__random", Op::Random, 0),
    // bitwise
    ("__band", Op::Band, 2),
    ("__bor", Op::Bor, 2),
    ("__bxor", Op::Bxor, 2),
    ("__shl", Op::Shl, 2),
    ("__shr", Op::Shr, 2),
    // packing
    ("__pack16", Op::PackU16Le, 1),
    ("__pack32", Op::PackU32Le, 1),
    ("__pack64", Op::PackF64Le, 1),
    // i/o
    ("__read_file", Op::ReadFile, 1),
    ("__write_file", Op::WriteFile, 2),
    ("__file_exists", Op::FileExists, 1),
    ("__fopen", Op::Fopen, 2),
    ("__fclose", Op::Fclose, 1),
    ("__fread", Op::Fread, 2),
    ("__freadline", Op::Freadline, 1),
    ("__fwrite", Op::Fwrite, 2),
    ("__stdin", Op::Stdin, 0),
    ("__stdout", Op::Stdout, 0),
    ("__stderr", Op::Stderr, 0),
    // control & meta
    ("__assert", Op::Assert, 1),
    ("__panic", Op::Panic, 1),
    ("__exit", Op::Exit, 1),
    ("__emit_chunk", Op::EmitChunk, 2),
    ("__opcode_id", Op::OpcodeId, 1),
    ("__calln", Op::CallnArr, 2),
];

fn builtin_entry(name: &str) -> Option<(Op, usize)> {
    BUILTINS.iter().find(|(n, _, _)| *n == name).map(|&(_, op, arity)| (op, arity))
}

fn is_statement_like(expr: &Expr) -> bool {
    matches!(expr, Expr::Call { callee, .. } if STATEMENT_LIKE.contains(&callee.as_str()))
}

/// An opaque rollback point handed out by [`Compiler::mark`].
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    code: usize,
    functions: usize,
}

pub struct Compiler {
    chunk: Chunk,
    /// Slot `i` of the current frame holds the variable named `locals[i]`.
    /// At top level only synthesized `$n` temporaries live here.
    locals: Vec<String>,
    hidden: usize,
    in_function: bool,
    line: u32,
    col: u32,
}

/// Compile a whole program. When an origin map is supplied, debug lines
/// are translated from expanded-text coordinates back to the local line of
/// the file each statement came from.
pub fn compile(program: &Program, source_name: &str, origins: Option<&OriginMap>) -> Result<Chunk> {
    let mut compiler = Compiler::new(source_name);
    for top in &program.stmts {
        let line = origins
            .and_then(|o| o.lookup(top.line))
            .map(|origin| origin.line)
            .unwrap_or(top.line);
        compiler.compile_top_at(&top.stmt, line, top.col)?;
    }
    Ok(compiler.finish())
}

impl Compiler {
    pub fn new(source_name: &str) -> Self {
        Compiler {
            chunk: Chunk::new(source_name),
            locals: Vec::new(),
            hidden: 0,
            in_function: false,
            line: 0,
            col: 0,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// A position to roll back to if an appended statement fails to
    /// compile (incremental/REPL use).
    pub fn mark(&self) -> Mark {
        Mark { code: self.chunk.code.len(), functions: self.chunk.functions.len() }
    }

    pub fn rollback(&mut self, mark: Mark) {
        self.chunk.code.truncate(mark.code);
        self.chunk.debug_lines.truncate(mark.code);
        self.chunk.debug_cols.truncate(mark.code);
        self.chunk.functions.truncate(mark.functions);
        self.in_function = false;
    }

    /// Compile one top-level statement and back-fill the debug side tables
    /// for every byte it emitted.
    pub fn compile_top_at(&mut self, stmt: &Stmt, line: u32, col: u32) -> Result<()> {
        self.line = line;
        self.col = col;
        self.compile_stmt(stmt, true)?;
        self.backfill_debug();
        Ok(())
    }

    /// Seal the chunk with `OP_HALT`.
    pub fn finish(mut self) -> Chunk {
        self.line = 0;
        self.col = 0;
        self.chunk.emit(Op::Halt);
        self.backfill_debug();
        self.chunk
    }

    fn backfill_debug(&mut self) {
        while self.chunk.debug_lines.len() < self.chunk.code.len() {
            self.chunk.debug_lines.push(self.line);
            self.chunk.debug_cols.push(self.col);
        }
    }

    fn err(&self, code: &'static str, message: impl Into<String>) -> CompileError {
        CompileError { code, line: self.line, col: self.col, message: message.into() }
    }

    // ---- Slots ----

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.locals.iter().rposition(|n| n == name).map(|i| i as u16)
    }

    fn push_local(&mut self, name: &str) -> Result<u16> {
        if self.locals.len() >= u16::MAX as usize {
            return Err(self.err("CAT-C004", "too many locals in one frame"));
        }
        self.locals.push(name.to_string());
        Ok((self.locals.len() - 1) as u16)
    }

    /// A synthesized temporary slot; `$` keeps it unreachable from source.
    fn hidden_local(&mut self) -> Result<u16> {
        let name = format!("${}", self.hidden);
        self.hidden += 1;
        self.push_local(&name)
    }

    // ---- Emit helpers ----

    fn emit_const(&mut self, constant: Constant) {
        let idx = self.chunk.add_const(constant);
        self.chunk.emit(Op::Const);
        self.chunk.emit_u16(idx);
    }

    fn emit_u16_op(&mut self, op: Op, operand: u16) {
        self.chunk.emit(op);
        self.chunk.emit_u16(operand);
    }

    /// Emit a forward jump with a placeholder displacement; returns the
    /// operand offset for patching.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.chunk.emit(op);
        let at = self.chunk.here();
        self.chunk.emit_u16(0xFFFF);
        at
    }

    /// Patch a forward jump so it lands on the next opcode to be emitted.
    /// Displacements are relative to the PC after the operand is read.
    fn patch_jump(&mut self, operand_at: usize) -> Result<()> {
        let target = self.chunk.here();
        let disp = target - (operand_at + 2);
        if disp > u16::MAX as usize {
            return Err(self.err("CAT-C005", "jump distance exceeds 16 bits"));
        }
        self.chunk.patch_u16(operand_at, disp as u16);
        Ok(())
    }

    /// Emit `OP_LOOP` back to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) -> Result<()> {
        self.chunk.emit(Op::Loop);
        let disp = self.chunk.here() + 2 - loop_start;
        if disp > u16::MAX as usize {
            return Err(self.err("CAT-C005", "loop distance exceeds 16 bits"));
        }
        self.chunk.emit_u16(disp as u16);
        Ok(())
    }

    fn set_variable(&mut self, name: &str) {
        if let Some(slot) = self.resolve_local(name) {
            self.emit_u16_op(Op::SetLocal, slot);
        } else {
            let idx = self.chunk.add_name(name);
            self.emit_u16_op(Op::SetGlobal, idx);
        }
    }

    fn get_variable(&mut self, name: &str) {
        if let Some(slot) = self.resolve_local(name) {
            self.emit_u16_op(Op::GetLocal, slot);
        } else {
            let idx = self.chunk.add_name(name);
            self.emit_u16_op(Op::GetGlobal, idx);
        }
    }

    // ---- Statements ----

    fn compile_stmt(&mut self, stmt: &Stmt, top: bool) -> Result<()> {
        match stmt {
            Stmt::Expression(expr) => self.compile_expr_stmt(expr, top),

            Stmt::Let { name, ty: _, init } => {
                self.compile_expr(init)?;
                if self.in_function {
                    // Each `let` takes the next slot; rposition makes the
                    // newest binding shadow any earlier one.
                    let slot = self.push_local(name)?;
                    self.emit_u16_op(Op::SetLocal, slot);
                } else {
                    let idx = self.chunk.add_name(name);
                    self.emit_u16_op(Op::SetGlobal, idx);
                }
                Ok(())
            }

            Stmt::Set { name, value } => {
                self.compile_expr(value)?;
                self.set_variable(name);
                Ok(())
            }

            Stmt::SetIndex { array, index, value } => {
                self.compile_expr(array)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.chunk.emit(Op::IndexSet);
                Ok(())
            }

            Stmt::Block(stmts) => {
                let saved = self.locals.len();
                for s in stmts {
                    self.compile_stmt(s, false)?;
                }
                self.locals.truncate(saved);
                Ok(())
            }

            Stmt::If { cond, then_branch, else_branch } => {
                self.compile_expr(cond)?;
                let to_else = self.emit_jump(Op::JumpIfFalse);
                // JUMP_IF_FALSE peeks; each branch discards the test value.
                self.chunk.emit(Op::Pop);
                self.compile_stmt(then_branch, false)?;
                let to_end = self.emit_jump(Op::Jump);
                self.patch_jump(to_else)?;
                self.chunk.emit(Op::Pop);
                if let Some(else_branch) = else_branch {
                    self.compile_stmt(else_branch, false)?;
                }
                self.patch_jump(to_end)?;
                Ok(())
            }

            Stmt::While { cond, body } => {
                let loop_start = self.chunk.here();
                self.compile_expr(cond)?;
                let exit = self.emit_jump(Op::JumpIfFalse);
                self.chunk.emit(Op::Pop);
                self.compile_stmt(body, false)?;
                self.emit_loop(loop_start)?;
                self.patch_jump(exit)?;
                self.chunk.emit(Op::Pop);
                Ok(())
            }

            Stmt::ForEach { var, iterable, body } => self.compile_for_each(var, iterable, body),

            Stmt::Function { name, params, return_type: _, body } => {
                self.compile_function(name, params, body)
            }

            Stmt::Return { value } => {
                if !self.in_function {
                    return Err(self.err("CAT-C002", "'return' outside of a function"));
                }
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_const(Constant::Nil),
                }
                self.chunk.emit(Op::Return);
                Ok(())
            }
        }
    }

    fn compile_expr_stmt(&mut self, expr: &Expr, top: bool) -> Result<()> {
        // `print a b c` compiles straight to OP_PRINT and leaves nothing.
        if let Expr::Call { callee, args } = expr {
            if callee == "print" {
                if args.len() > u8::MAX as usize {
                    return Err(self.err("CAT-C004", "too many print arguments"));
                }
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.chunk.emit(Op::Print);
                self.chunk.emit_u8(args.len() as u8);
                return Ok(());
            }
        }
        self.compile_expr(expr)?;
        if top && !is_statement_like(expr) {
            // Echo bare top-level expression values.
            self.chunk.emit(Op::Print);
            self.chunk.emit_u8(1);
        } else {
            self.chunk.emit(Op::Pop);
        }
        Ok(())
    }

    /// For-each iterates a snapshot: the iterable is evaluated once into a
    /// hidden slot and indexed by a hidden counter.
    fn compile_for_each(&mut self, var: &str, iterable: &Expr, body: &Stmt) -> Result<()> {
        let saved = self.locals.len();

        self.compile_expr(iterable)?;
        let t_arr = self.hidden_local()?;
        self.emit_u16_op(Op::SetLocal, t_arr);

        self.emit_const(Constant::Number(0.0));
        let t_idx = self.hidden_local()?;
        self.emit_u16_op(Op::SetLocal, t_idx);

        let var_slot = if self.in_function {
            Some(match self.resolve_local(var) {
                Some(slot) => slot,
                None => self.push_local(var)?,
            })
        } else {
            None
        };

        let loop_start = self.chunk.here();
        self.emit_u16_op(Op::GetLocal, t_idx);
        self.emit_u16_op(Op::GetLocal, t_arr);
        self.chunk.emit(Op::Len);
        self.chunk.emit(Op::Lt);
        let exit = self.emit_jump(Op::JumpIfFalse);
        self.chunk.emit(Op::Pop);

        self.emit_u16_op(Op::GetLocal, t_arr);
        self.emit_u16_op(Op::GetLocal, t_idx);
        self.chunk.emit(Op::IndexGet);
        match var_slot {
            Some(slot) => self.emit_u16_op(Op::SetLocal, slot),
            None => {
                let idx = self.chunk.add_name(var);
                self.emit_u16_op(Op::SetGlobal, idx);
            }
        }

        self.compile_stmt(body, false)?;

        self.emit_u16_op(Op::GetLocal, t_idx);
        self.emit_const(Constant::Number(1.0));
        self.chunk.emit(Op::Add);
        self.emit_u16_op(Op::SetLocal, t_idx);
        self.emit_loop(loop_start)?;
        self.patch_jump(exit)?;
        self.chunk.emit(Op::Pop);

        self.locals.truncate(saved);
        Ok(())
    }

    /// Function bodies are emitted inline behind a skip-jump; the entry
    /// offset lands just after the jump.
    fn compile_function(&mut self, name: &str, params: &[Param], body: &[Stmt]) -> Result<()> {
        if self.in_function {
            return Err(self.err("CAT-C001", "nested function definitions are not supported"));
        }
        if params.len() > u8::MAX as usize {
            return Err(self.err("CAT-C004", "too many parameters"));
        }

        let skip = self.emit_jump(Op::Jump);
        let entry = self.chunk.here() as u32;
        let name_idx = self.chunk.add_name(name);
        self.chunk.functions.push(FuncEntry {
            name: name_idx,
            arity: params.len() as u16,
            entry,
        });

        let saved_locals = std::mem::take(&mut self.locals);
        let saved_hidden = self.hidden;
        self.hidden = 0;
        self.in_function = true;
        for p in params {
            self.push_local(&p.name)?;
        }

        let mut result = Ok(());
        for stmt in body {
            result = self.compile_stmt(stmt, false);
            if result.is_err() {
                break;
            }
        }

        if result.is_ok() && !matches!(body.last(), Some(Stmt::Return { .. })) {
            // Fall-off-the-end returns nil.
            self.emit_const(Constant::Nil);
            self.chunk.emit(Op::Return);
        }

        self.locals = saved_locals;
        self.hidden = saved_hidden;
        self.in_function = false;
        result?;
        self.patch_jump(skip)?;
        Ok(())
    }

    // ---- Expressions ----

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(lit) => {
                let constant = match lit {
                    Literal::Nil => Constant::Nil,
                    Literal::Number(n) => Constant::Number(*n),
                    Literal::Str(s) => Constant::Str(s.clone()),
                    Literal::Bool(b) => Constant::Bool(*b),
                };
                self.emit_const(constant);
                Ok(())
            }

            Expr::Variable(name) => {
                self.get_variable(name);
                Ok(())
            }

            Expr::Assign { name, value } => {
                self.compile_expr(value)?;
                self.set_variable(name);
                // The assignment's value is the variable after the store.
                self.get_variable(name);
                Ok(())
            }

            Expr::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let opcode = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                    BinOp::Mod => Op::Mod,
                    BinOp::Gt => Op::Gt,
                    BinOp::Ge => Op::Ge,
                    BinOp::Lt => Op::Lt,
                    BinOp::Le => Op::Le,
                    BinOp::Eq => Op::Eq,
                    BinOp::Ne => Op::Ne,
                    // Eager by design: both operands are always evaluated.
                    BinOp::And => Op::And,
                    BinOp::Or => Op::Or,
                };
                self.chunk.emit(opcode);
                Ok(())
            }

            Expr::Unary { op: UnaryOp::Neg, operand } => {
                // Unary minus lowers to `0 - x`.
                self.emit_const(Constant::Number(0.0));
                self.compile_expr(operand)?;
                self.chunk.emit(Op::Sub);
                Ok(())
            }

            Expr::Grouping(inner) => self.compile_expr(inner),

            Expr::Array(elements) => {
                if elements.len() > u8::MAX as usize {
                    return Err(self.err("CAT-C004", "array literal has too many elements"));
                }
                for e in elements {
                    self.compile_expr(e)?;
                }
                self.chunk.emit(Op::NewArray);
                self.chunk.emit_u8(elements.len() as u8);
                Ok(())
            }

            Expr::Index { array, index } => {
                self.compile_expr(array)?;
                self.compile_expr(index)?;
                self.chunk.emit(Op::IndexGet);
                Ok(())
            }

            Expr::Call { callee, args } => self.compile_call(callee, args),
        }
    }

    fn compile_call(&mut self, callee: &str, args: &[Expr]) -> Result<()> {
        if callee == "print" {
            return Err(self.err("CAT-C003", "'print' is only valid as a statement"));
        }

        if callee == "__range" {
            if args.len() != 2 {
                return Err(self.err("CAT-C006", "__range expects 2 arguments"));
            }
            return self.compile_range(&args[0], &args[1]);
        }

        if callee == "__format" {
            if args.is_empty() {
                return Err(self.err("CAT-C006", "__format expects a format string"));
            }
            if args.len() - 1 > u8::MAX as usize {
                return Err(self.err("CAT-C004", "too many format arguments"));
            }
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.chunk.emit(Op::Format);
            self.chunk.emit_u8((args.len() - 1) as u8);
            return Ok(());
        }

        if let Some((op, fixed)) = match callee {
            "__ffi_call" => Some((Op::FfiCall, 2)),
            "__ffi_call_sig" => Some((Op::FfiCallSig, 3)),
            "__ffi_call_ptr" => Some((Op::FfiCallPtr, 2)),
            _ => None,
        } {
            if args.len() < fixed {
                return Err(self.err(
                    "CAT-C006",
                    format!("{callee} expects at least {fixed} arguments"),
                ));
            }
            let argc = args.len() - fixed;
            if argc > u8::MAX as usize {
                return Err(self.err("CAT-C004", "too many FFI arguments"));
            }
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.chunk.emit(op);
            self.chunk.emit_u8(argc as u8);
            return Ok(());
        }

        if callee == "__ffi_proc" {
            if args.len() != 2 {
                return Err(self.err("CAT-C006", "__ffi_proc expects 2 arguments"));
            }
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.chunk.emit(Op::FfiProc);
            return Ok(());
        }

        if let Some((op, arity)) = builtin_entry(callee) {
            if args.len() != arity {
                return Err(self.err(
                    "CAT-C006",
                    format!("{callee} expects {arity} argument(s), got {}", args.len()),
                ));
            }
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.chunk.emit(op);
            return Ok(());
        }

        if callee.starts_with("__") {
            return Err(self.err("CAT-C007", format!("unknown builtin '{callee}'")));
        }

        // Ordinary call: the VM resolves the name at call time.
        if args.len() > u8::MAX as usize {
            return Err(self.err("CAT-C004", "too many call arguments"));
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        let name_idx = self.chunk.add_name(callee);
        self.chunk.emit(Op::Call);
        self.chunk.emit_u16(name_idx);
        self.chunk.emit_u8(args.len() as u8);
        Ok(())
    }

    /// `range from A to B` builds [A, B) with a synthesized loop over
    /// hidden slots; there is no dedicated opcode for it.
    fn compile_range(&mut self, lo: &Expr, hi: &Expr) -> Result<()> {
        let saved = self.locals.len();

        self.compile_expr(lo)?;
        let t_lo = self.hidden_local()?;
        self.emit_u16_op(Op::SetLocal, t_lo);
        self.compile_expr(hi)?;
        let t_hi = self.hidden_local()?;
        self.emit_u16_op(Op::SetLocal, t_hi);
        self.chunk.emit(Op::NewArray);
        self.chunk.emit_u8(0);
        let t_acc = self.hidden_local()?;
        self.emit_u16_op(Op::SetLocal, t_acc);

        let loop_start = self.chunk.here();
        self.emit_u16_op(Op::GetLocal, t_lo);
        self.emit_u16_op(Op::GetLocal, t_hi);
        self.chunk.emit(Op::Lt);
        let exit = self.emit_jump(Op::JumpIfFalse);
        self.chunk.emit(Op::Pop);

        self.emit_u16_op(Op::GetLocal, t_acc);
        self.emit_u16_op(Op::GetLocal, t_lo);
        self.chunk.emit(Op::Append);
        self.chunk.emit(Op::Pop);

        self.emit_u16_op(Op::GetLocal, t_lo);
        self.emit_const(Constant::Number(1.0));
        self.chunk.emit(Op::Add);
        self.emit_u16_op(Op::SetLocal, t_lo);
        self.emit_loop(loop_start)?;
        self.patch_jump(exit)?;
        self.chunk.emit(Op::Pop);

        self.emit_u16_op(Op::GetLocal, t_acc);
        self.locals.truncate(saved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse_statement_tokens;

    fn compile_src(src: &str) -> Chunk {
        let mut program = Program::default();
        for (i, stmt) in parse_statement_tokens(lex(src).unwrap()).unwrap().into_iter().enumerate()
        {
            program.stmts.push(TopStmt { stmt, line: i as u32 + 1, col: 1 });
        }
        compile(&program, "test.cb", None).unwrap()
    }

    /// Every jump operand must land on an opcode boundary inside the code.
    fn assert_jumps_valid(chunk: &Chunk) {
        let offsets = chunk.decode_offsets().unwrap();
        let boundary: std::collections::HashSet<usize> = offsets.iter().copied().collect();
        for &pc in &offsets {
            let op = Op::from_u8(chunk.code[pc]).unwrap();
            let after = pc + 1 + op.operands().width();
            match op {
                Op::Jump | Op::JumpIfFalse => {
                    let disp = chunk.read_u16(pc + 1) as usize;
                    let target = after + disp;
                    assert!(target <= chunk.code.len(), "jump past end at {pc}");
                    if target < chunk.code.len() {
                        assert!(boundary.contains(&target), "jump to operand byte at {pc}");
                    }
                }
                Op::Loop => {
                    let disp = chunk.read_u16(pc + 1) as usize;
                    let target = after - disp;
                    assert!(boundary.contains(&target), "loop to operand byte at {pc}");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn print_expression_compiles_to_print_op() {
        let chunk = compile_src("print (2+3)*4");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_PRINT 1"), "got:\n{dis}");
        assert!(dis.contains("OP_MUL"));
        assert!(dis.contains("OP_HALT"));
    }

    #[test]
    fn top_level_let_and_set_are_globals() {
        let chunk = compile_src("let x be 10\nset x to x + 5");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_SET_GLOBAL 0 (x)"), "got:\n{dis}");
        assert!(dis.contains("OP_GET_GLOBAL 0 (x)"));
    }

    #[test]
    fn bare_expression_echoes_at_top_level() {
        let chunk = compile_src("1 + 2");
        assert!(chunk.disassemble().contains("OP_PRINT 1"));
    }

    #[test]
    fn statement_like_builtin_does_not_echo() {
        let chunk = compile_src("let a be [1]\nappend 2 to a");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_APPEND"));
        assert!(!dis.contains("OP_PRINT"), "append must not echo:\n{dis}");
    }

    #[test]
    fn unary_minus_lowers_to_zero_minus() {
        let chunk = compile_src("let x be -5");
        let dis = chunk.disassemble();
        assert!(dis.contains("(0)"), "expected constant 0:\n{dis}");
        assert!(dis.contains("OP_SUB"));
    }

    #[test]
    fn logical_ops_are_eager_binary_ops() {
        let chunk = compile_src("let x be true and false");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_AND"));
        // no branching is emitted for and/or
        assert!(!dis.contains("OP_JUMP_IF_FALSE"));
    }

    #[test]
    fn function_body_is_skipped_inline() {
        let chunk = compile_src("fn add(a, b) { return a + b; }\nprint add(2, 3)");
        assert_eq!(chunk.functions.len(), 1);
        let f = chunk.functions[0];
        assert_eq!(chunk.names[f.name as usize], "add");
        assert_eq!(f.arity, 2);
        // entry is just past the 3-byte skip jump
        assert_eq!(f.entry, 3);
        // first opcode is the skip jump
        assert_eq!(Op::from_u8(chunk.code[0]), Some(Op::Jump));
        assert_jumps_valid(&chunk);
    }

    #[test]
    fn function_parameters_are_local_slots() {
        let chunk = compile_src("fn add(a, b) { return a + b; }");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_GET_LOCAL 0"));
        assert!(dis.contains("OP_GET_LOCAL 1"));
        assert!(dis.contains("OP_RETURN"));
    }

    #[test]
    fn function_without_return_returns_nil() {
        let chunk = compile_src("fn noop() { }");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_CONST 0 (nil)"), "got:\n{dis}");
        assert!(dis.contains("OP_RETURN"));
    }

    #[test]
    fn calls_encode_name_index_and_argc() {
        let chunk = compile_src("fn f(a) { return a; }\nprint f(1)");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_CALL 0 (f) argc=1"), "got:\n{dis}");
    }

    #[test]
    fn return_outside_function_is_an_error() {
        let mut program = Program::default();
        program.stmts.push(TopStmt {
            stmt: Stmt::Return { value: None },
            line: 1,
            col: 1,
        });
        let err = compile(&program, "t.cb", None).unwrap_err();
        assert_eq!(err.code, "CAT-C002");
    }

    #[test]
    fn nested_function_is_an_error() {
        let stmt = Stmt::Function {
            name: "outer".into(),
            params: vec![],
            return_type: None,
            body: vec![Stmt::Function {
                name: "inner".into(),
                params: vec![],
                return_type: None,
                body: vec![],
            }],
        };
        let mut program = Program::default();
        program.stmts.push(TopStmt { stmt, line: 1, col: 1 });
        let err = compile(&program, "t.cb", None).unwrap_err();
        assert_eq!(err.code, "CAT-C001");
    }

    #[test]
    fn unknown_builtin_is_an_error() {
        let mut program = Program::default();
        program.stmts.push(TopStmt {
            stmt: Stmt::Expression(Expr::Call { callee: "__bogus".into(), args: vec![] }),
            line: 1,
            col: 1,
        });
        let err = compile(&program, "t.cb", None).unwrap_err();
        assert_eq!(err.code, "CAT-C007");
    }

    #[test]
    fn builtin_arity_is_checked() {
        let mut program = Program::default();
        program.stmts.push(TopStmt {
            stmt: Stmt::Expression(Expr::Call { callee: "__alloc".into(), args: vec![] }),
            line: 1,
            col: 1,
        });
        let err = compile(&program, "t.cb", None).unwrap_err();
        assert_eq!(err.code, "CAT-C006");
    }

    #[test]
    fn jumps_valid_across_control_flow() {
        let chunk = compile_src(
            "let i be 0\nwhile i < 10 do\n  if i > 5 then print i else print 0 end\n  set i to i + 1\nend",
        );
        assert_jumps_valid(&chunk);
    }

    #[test]
    fn jumps_valid_for_each_and_range() {
        let chunk = compile_src("for each x in range from 1 to 5 do print x end");
        assert_jumps_valid(&chunk);
    }

    #[test]
    fn debug_tables_cover_every_byte() {
        let chunk = compile_src("let x be 1\nprint x\nfn f(a) { return a; }\nprint f(2)");
        assert_eq!(chunk.debug_lines.len(), chunk.code.len());
        assert_eq!(chunk.debug_cols.len(), chunk.code.len());
    }

    #[test]
    fn debug_lines_match_statement_lines() {
        let chunk = compile_src("let x be 1\nprint x");
        // bytes of the first statement carry line 1, the second line 2,
        // the trailing halt 0
        assert_eq!(chunk.debug_lines[0], 1);
        assert_eq!(*chunk.debug_lines.last().unwrap(), 0);
        assert!(chunk.debug_lines.contains(&2));
    }

    #[test]
    fn constants_are_interned_across_statements() {
        let chunk = compile_src("let a be 7\nlet b be 7");
        let sevens = chunk
            .constants
            .iter()
            .filter(|c| matches!(c, Constant::Number(n) if *n == 7.0))
            .count();
        assert_eq!(sevens, 1);
    }

    #[test]
    fn map_builtins_compile() {
        let chunk = compile_src(
            "let m be __map_new()\nset key \"a\" of m to 1\nprint get \"a\" from m\nprint has \"a\" in m",
        );
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_NEW_MAP"));
        assert!(dis.contains("OP_MAP_SET"));
        assert!(dis.contains("OP_MAP_GET"));
        assert!(dis.contains("OP_MAP_HAS"));
    }

    #[test]
    fn memory_builtins_compile() {
        let chunk = compile_src("let p be alloc 8\nwrite32 1 to p at 0\nprint read32 p at 0\nfree p");
        let dis = chunk.disassemble();
        assert!(dis.contains("OP_ALLOC"));
        assert!(dis.contains("OP_STORE32"));
        assert!(dis.contains("OP_LOAD32"));
        assert!(dis.contains("OP_FREE"));
    }

    #[test]
    fn format_encodes_value_count() {
        let chunk = compile_src("print format \"{} {}\" with 1 and 2");
        assert!(chunk.disassemble().contains("OP_FORMAT 2"));
    }
}
