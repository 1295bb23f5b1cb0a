//! Lowering: checked AST → bytecode.
//!
//! Scope resolution performs closure conversion: a local referenced by any
//! nested function is promoted to a cell on the frame's display, and nested
//! functions receive capture tables that forward those cells down. `finally`
//! blocks and `using` disposal are inlined on every exit path (normal flow,
//! `return`, `break`, `continue`) and covered by a catch region for the
//! throw path, so the VM's unwinder only knows about catch handlers.
//!
//! The type map drives two specializations: numeric opcodes where both
//! operand types are proven numbers, and const-enum member inlining, which
//! eliminates the enum object entirely.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use tsr_checker::checker::CheckedProgram;
use tsr_checker::{EnumMemberValue, Type};
use tsr_common::{Diagnostic, DiagnosticCode, Span};
use tsr_parser::ast::*;

use crate::builder::{CodeBuilder, Patch};
use crate::code::{CaptureSource, ClassTemplate, CodeUnit, Constant, FnProto, Module};
use crate::op::Op;
use crate::reachability;

type CResult<T> = Result<T, Diagnostic>;

/// Where a resolved name lives.
#[derive(Clone, Copy, Debug)]
enum Storage {
    Local(u32),
    Cell(u32),
    Capture(u32),
}

/// One lexical scope inside a function being compiled.
#[derive(Default)]
struct Scope {
    names: FxHashMap<String, Storage>,
}

/// Cleanup owed by a guarded region between a jump and its target. Every
/// entry corresponds to one active `TryPush`, popped before its cleanup
/// code runs so errors in the cleanup propagate outward.
enum Cleanup<'a> {
    /// A catch-only region: just pop the handler.
    Guard,
    /// A region owing a finally block.
    GuardedFinally(&'a [Stmt]),
    /// A `using` scope owing disposal.
    GuardedDisposal,
}

/// What kind of construct a `break`/`continue` can address.
#[derive(Clone, Copy, PartialEq)]
enum JumpTargetKind {
    Loop,
    Switch,
    LabeledBlock,
}

struct LoopCtx {
    kind: JumpTargetKind,
    label: Option<String>,
    continue_target: Option<u32>,
    continue_patches: Vec<Patch>,
    break_patches: Vec<Patch>,
    /// Cleanup stack depth when the loop was entered.
    cleanup_depth: usize,
    /// Values sitting on the operand stack that a `break` must pop
    /// (iterator handles).
    stack_values: u32,
}

/// Per-function compilation state.
struct FnState<'a> {
    builder: CodeBuilder,
    scopes: Vec<Scope>,
    /// Names promoted to cells in this function.
    captured_names: FxHashSet<String>,
    captures: Vec<(String, CaptureSource)>,
    loops: Vec<LoopCtx>,
    cleanups: Vec<Cleanup<'a>>,
    in_cleanup: bool,
    is_generator: bool,
    is_async: bool,
}

impl FnState<'_> {
    fn new(strict: bool) -> Self {
        FnState {
            builder: CodeBuilder::new(strict),
            scopes: vec![Scope::default()],
            captured_names: FxHashSet::default(),
            captures: Vec::new(),
            loops: Vec::new(),
            cleanups: Vec::new(),
            in_cleanup: false,
            is_generator: false,
            is_async: false,
        }
    }

    fn declare(&mut self, name: &str) -> Storage {
        let storage = if self.captured_names.contains(name) {
            let slot = self.builder.cell_count;
            self.builder.cell_count += 1;
            Storage::Cell(slot)
        } else {
            let slot = self.builder.local_count;
            self.builder.local_count += 1;
            Storage::Local(slot)
        };
        self.scopes
            .last_mut()
            .expect("scope")
            .names
            .insert(name.to_string(), storage);
        storage
    }

    fn scratch_local(&mut self) -> u32 {
        let slot = self.builder.local_count;
        self.builder.local_count += 1;
        slot
    }

    fn resolve_here(&self, name: &str) -> Option<Storage> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.names.get(name).copied())
    }
}

pub struct Compiler<'a> {
    checked: Option<&'a CheckedProgram>,
    fns: Vec<FnState<'a>>,
}

impl<'a> Compiler<'a> {
    pub fn new(checked: Option<&'a CheckedProgram>) -> Self {
        Compiler { checked, fns: Vec::new() }
    }

    /// Compile a program into a module whose `main` runs the top-level
    /// statements in source order.
    pub fn compile_program(mut self, stmts: &'a [Stmt]) -> CResult<Module> {
        let strict = stmts
            .iter()
            .any(|s| matches!(&s.kind, StmtKind::Directive(d) if d == "use strict"));
        let mut state = FnState::new(strict);
        state.captured_names = captured_names_of(stmts, &[]);
        self.fns.push(state);
        self.lower_scoped_body(stmts)?;
        self.emit(Op::ReturnUndefined);
        let state = self.fns.pop().expect("main state");
        let unit = state.builder.finish();
        debug!(ops = unit.ops.len(), "lowered program");
        Ok(Module::new(unit))
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn state(&mut self) -> &mut FnState<'a> {
        self.fns.last_mut().expect("function state")
    }

    fn emit(&mut self, op: Op) -> usize {
        self.state().builder.emit(op)
    }

    fn name_idx(&mut self, name: &str) -> u32 {
        self.state().builder.name(name)
    }

    fn error(&self, code: DiagnosticCode, message: impl Into<String>, line: u32) -> Diagnostic {
        let _ = line;
        Diagnostic::error(code, message, Span::dummy())
    }

    /// Resolve a name across the function stack, threading captures down.
    fn resolve(&mut self, name: &str) -> Option<Storage> {
        let depth = self.fns.len() - 1;
        self.resolve_at(name, depth)
    }

    fn resolve_at(&mut self, name: &str, depth: usize) -> Option<Storage> {
        if let Some(storage) = self.fns[depth].resolve_here(name) {
            return Some(storage);
        }
        // Already captured by this function?
        if let Some(i) = self.fns[depth].captures.iter().position(|(n, _)| n == name) {
            return Some(Storage::Capture(i as u32));
        }
        if depth == 0 {
            return None;
        }
        let parent = self.resolve_at(name, depth - 1)?;
        let source = match parent {
            Storage::Cell(i) => CaptureSource::ParentCell(i),
            Storage::Capture(i) => CaptureSource::ParentCapture(i),
            Storage::Local(_) => {
                // The capture analysis promotes everything a nested
                // function touches; a plain local here means the analysis
                // missed it, which is a compiler bug worth failing loudly
                // on in tests.
                debug_assert!(false, "captured variable '{name}' was not promoted to a cell");
                return None;
            }
        };
        let state = &mut self.fns[depth];
        let index = state.captures.len() as u32;
        state.captures.push((name.to_string(), source));
        Some(Storage::Capture(index))
    }

    fn emit_load(&mut self, storage: Storage) {
        match storage {
            Storage::Local(i) => self.emit(Op::LoadLocal(i)),
            Storage::Cell(i) => self.emit(Op::LoadCell(i)),
            Storage::Capture(i) => self.emit(Op::LoadCapture(i)),
        };
    }

    fn emit_store(&mut self, storage: Storage) {
        match storage {
            Storage::Local(i) => self.emit(Op::StoreLocal(i)),
            Storage::Cell(i) => self.emit(Op::StoreCell(i)),
            Storage::Capture(i) => self.emit(Op::StoreCapture(i)),
        };
    }

    /// Declare a name and store the value on top of the stack into it.
    ///
    /// Names pre-declared by the hoisting pass store through their existing
    /// slot (sharing the pre-made cell earlier closures captured); fresh
    /// declarations in cells re-make the cell, which is what gives loop
    /// bodies a new binding per iteration.
    fn declare_and_store(&mut self, name: &str) {
        let existing = self
            .state()
            .scopes
            .last()
            .expect("scope")
            .names
            .get(name)
            .copied();
        match existing {
            Some(storage) => self.emit_store(storage),
            None => {
                let storage = self.state().declare(name);
                if let Storage::Cell(i) = storage {
                    self.emit(Op::MakeCell(i));
                } else {
                    self.emit_store(storage);
                }
            }
        }
    }

    // =========================================================================
    // Types (specialization inputs)
    // =========================================================================

    fn expr_is_number(&self, expr: &Expr) -> bool {
        let Some(checked) = self.checked else { return false };
        match checked.type_map.get(expr.id) {
            Some(ty) => matches!(ty.as_ref(), Type::Number | Type::NumberLiteral(_)),
            None => false,
        }
    }

    fn expr_is_string(&self, expr: &Expr) -> bool {
        let Some(checked) = self.checked else { return false };
        match checked.type_map.get(expr.id) {
            Some(ty) => matches!(
                ty.as_ref(),
                Type::String | Type::StringLiteral(_) | Type::TemplateLiteral { .. }
            ),
            None => false,
        }
    }

    /// Inline a const-enum member access, eliminating the enum object.
    fn try_const_enum(&mut self, object: &Expr, member: &str) -> Option<Op> {
        let checked = self.checked?;
        let ExprKind::Variable(enum_name) = &object.kind else { return None };
        let value = checked.const_enums.get(enum_name)?.members.get(member)?;
        Some(match value {
            EnumMemberValue::Number(n) => Op::Number(*n),
            EnumMemberValue::String(s) => {
                let idx = self.state().builder.constant(Constant::String(s.clone()));
                Op::Const(idx)
            }
        })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn lower_stmts(&mut self, stmts: &'a [Stmt]) -> CResult<()> {
        // Every name this level declares gets its slot up front, so hoisted
        // functions referencing later declarations capture the right
        // (pre-made) cells.
        let mut declared = Vec::new();
        for stmt in reachability::reachable(stmts) {
            let inner = match &stmt.kind {
                StmtKind::Export(inner) => inner.as_ref(),
                _ => stmt,
            };
            collect_declared(inner, &mut declared);
        }
        for name in &declared {
            if self
                .state()
                .scopes
                .last()
                .expect("scope")
                .names
                .contains_key(name)
            {
                continue;
            }
            self.state().declare(name);
        }

        // Hoist function declarations so calls before the statement work.
        for stmt in reachability::reachable(stmts) {
            let inner = match &stmt.kind {
                StmtKind::Export(inner) => inner.as_ref(),
                _ => stmt,
            };
            if let StmtKind::Function(decl) = &inner.kind {
                if decl.body.is_some() {
                    if let Some(name) = &decl.name {
                        let proto = self.compile_function(decl)?;
                        let idx =
                            self.state().builder.constant(Constant::Function(Box::new(proto)));
                        self.emit(Op::MakeFunction(idx));
                        self.declare_and_store(name);
                    }
                }
            }
        }
        for stmt in reachability::reachable(stmts) {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &'a Stmt) -> CResult<()> {
        self.state().builder.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.lower_expr(expr)?;
                self.emit(Op::Pop);
            }
            StmtKind::Var { name, init, .. } => {
                match init {
                    Some(init) => self.lower_expr(init)?,
                    None => {
                        self.emit(Op::Undefined);
                    }
                }
                self.declare_and_store(name);
            }
            StmtKind::Const { name, init, .. } => {
                self.lower_expr(init)?;
                self.declare_and_store(name);
            }
            StmtKind::Using { name, init } => {
                self.lower_expr(init)?;
                self.emit(Op::Dup);
                self.emit(Op::RegisterDisposal);
                self.declare_and_store(name);
            }
            StmtKind::Function(_) => {} // hoisted
            StmtKind::Class(decl) => {
                // Pre-declared; methods and static initializers reference
                // the class through the pre-made cell the store fills.
                self.lower_class(decl)?;
                self.declare_and_store(&decl.name);
            }
            StmtKind::Enum(decl) => {
                if decl.is_const {
                    // Const enums vanish: uses were inlined.
                    return Ok(());
                }
                self.lower_enum_object(decl)?;
                self.declare_and_store(&decl.name);
            }
            StmtKind::Interface(_)
            | StmtKind::TypeAlias { .. }
            | StmtKind::Directive(_)
            | StmtKind::DeclareModule { .. }
            | StmtKind::DeclareGlobal { .. } => {}
            StmtKind::Namespace { name, body } => self.lower_namespace(name, body)?,
            StmtKind::Block(stmts) => self.lower_block(stmts)?,
            StmtKind::Sequence(stmts) => {
                for inner in stmts {
                    self.lower_stmt(inner)?;
                }
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.lower_expr(expr)?,
                    None => {
                        self.emit(Op::Undefined);
                    }
                }
                self.emit_cleanups_from(0)?;
                self.emit(Op::Return);
            }
            StmtKind::Throw(expr) => {
                self.lower_expr(expr)?;
                self.emit(Op::Throw);
            }
            StmtKind::Break(label) => {
                let target = self.find_loop(label.as_deref(), stmt.line, true)?;
                let state = self.fns.last().expect("fn");
                let depth = state.loops[target].cleanup_depth;
                // Iterator handles of every loop from the target outwards
                // (its own included) come off the stack.
                let extra: u32 = state.loops[target..].iter().map(|l| l.stack_values).sum();
                for _ in 0..extra {
                    self.emit(Op::Pop);
                }
                self.emit_cleanups_from(depth)?;
                let patch = self.state().builder.jump();
                self.state().loops[target].break_patches.push(patch);
            }
            StmtKind::Continue(label) => {
                let target = self.find_loop(label.as_deref(), stmt.line, false)?;
                let state = self.fns.last().expect("fn");
                let depth = state.loops[target].cleanup_depth;
                // Inner loops' iterator handles come off; the target keeps
                // its own, since its continue point expects it.
                let extra: u32 = state.loops[target + 1..].iter().map(|l| l.stack_values).sum();
                for _ in 0..extra {
                    self.emit(Op::Pop);
                }
                self.emit_cleanups_from(depth)?;
                match self.state().loops[target].continue_target {
                    Some(pc) => {
                        self.state().builder.jump_back(pc);
                    }
                    None => {
                        let patch = self.state().builder.jump();
                        self.state().loops[target].continue_patches.push(patch);
                    }
                }
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                self.lower_expr(cond)?;
                let to_else = self.state().builder.jump_if_false();
                self.lower_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let to_end = self.state().builder.jump();
                        self.state().builder.patch_here(to_else);
                        self.lower_stmt(else_branch)?;
                        self.state().builder.patch_here(to_end);
                    }
                    None => self.state().builder.patch_here(to_else),
                }
            }
            StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
            | StmtKind::ForOf { .. }
            | StmtKind::ForIn { .. } => self.lower_loop(stmt, None)?,
            StmtKind::Labeled { label, body } => match &body.kind {
                StmtKind::While { .. }
                | StmtKind::DoWhile { .. }
                | StmtKind::For { .. }
                | StmtKind::ForOf { .. }
                | StmtKind::ForIn { .. } => self.lower_loop(body, Some(label.clone()))?,
                _ => {
                    // A labeled block: `break label` jumps past it.
                    let depth = self.state().cleanups.len();
                    self.state().loops.push(LoopCtx {
                        kind: JumpTargetKind::LabeledBlock,
                        label: Some(label.clone()),
                        continue_target: None,
                        continue_patches: Vec::new(),
                        break_patches: Vec::new(),
                        cleanup_depth: depth,
                        stack_values: 0,
                    });
                    self.lower_stmt(body)?;
                    let ctx = self.state().loops.pop().expect("labeled ctx");
                    for patch in ctx.break_patches {
                        self.state().builder.patch_here(patch);
                    }
                }
            },
            StmtKind::Switch { discriminant, cases } => self.lower_switch(discriminant, cases)?,
            StmtKind::TryCatch { try_block, catch_param, catch_block, finally_block } => {
                self.lower_try(
                    try_block,
                    catch_param.as_deref(),
                    catch_block.as_deref(),
                    finally_block.as_deref(),
                )?;
            }
            StmtKind::Import { .. } => {
                return Err(self.error(
                    DiagnosticCode::SyntaxError,
                    "imports are not supported in compiled modules; bundle dependencies before compiling",
                    stmt.line,
                ));
            }
            StmtKind::ImportAlias { name, target } => {
                let storage = self.resolve(&target[0]);
                match storage {
                    Some(storage) => self.emit_load(storage),
                    None => {
                        let idx = self.name_idx(&target[0]);
                        self.emit(Op::LoadGlobal(idx));
                    }
                }
                for part in &target[1..] {
                    let idx = self.name_idx(part);
                    self.emit(Op::GetProp(idx));
                }
                self.declare_and_store(name);
            }
            StmtKind::Export(inner) => self.lower_stmt(inner)?,
        }
        Ok(())
    }

    fn lower_block(&mut self, stmts: &'a [Stmt]) -> CResult<()> {
        self.state().scopes.push(Scope::default());
        self.lower_scoped_body(stmts)?;
        self.state().scopes.pop();
        Ok(())
    }

    /// Lower a statement list that forms a disposal scope (block, function
    /// body, program). When the list declares `using` resources, the whole
    /// region is covered so disposal runs on the throw path too; `return`,
    /// `break` and `continue` emit the disposal through the cleanup stack.
    fn lower_scoped_body(&mut self, stmts: &'a [Stmt]) -> CResult<()> {
        let has_using = stmts.iter().any(|s| matches!(s.kind, StmtKind::Using { .. }));
        if !has_using {
            return self.lower_stmts(stmts);
        }
        self.emit(Op::DisposalScopePush);
        let guard = self.state().builder.try_push();
        self.state().cleanups.push(Cleanup::GuardedDisposal);
        self.lower_stmts(stmts)?;
        self.state().cleanups.pop();
        self.emit(Op::TryPop);
        self.emit(Op::DisposeAll);
        self.emit(Op::DisposalScopePop);
        let done = self.state().builder.jump();
        self.state().builder.patch_here(guard);
        // Throw path: dispose, then rethrow.
        self.emit(Op::DisposeAll);
        self.emit(Op::DisposalScopePop);
        self.emit(Op::Throw);
        self.state().builder.patch_here(done);
        Ok(())
    }

    /// Emit the cleanup code owed between the current position and a jump
    /// out to `from_depth`.
    fn emit_cleanups_from(&mut self, from_depth: usize) -> CResult<()> {
        if self.state().in_cleanup {
            return Ok(());
        }
        let total = self.state().cleanups.len();
        for i in (from_depth..total).rev() {
            // Copy the action out so re-lowering may borrow the compiler.
            enum Action<'s> {
                Guard,
                Finally(&'s [Stmt]),
                Disposal,
            }
            let action = match &self.fns.last().expect("fn").cleanups[i] {
                Cleanup::Guard => Action::Guard,
                Cleanup::GuardedFinally(stmts) => Action::Finally(stmts),
                Cleanup::GuardedDisposal => Action::Disposal,
            };
            // The region's handler pops first so cleanup errors propagate
            // to the enclosing handler, not back into this region.
            self.emit(Op::TryPop);
            self.state().in_cleanup = true;
            let result = match action {
                Action::Guard => Ok(()),
                Action::Disposal => {
                    self.emit(Op::DisposeAll);
                    self.emit(Op::DisposalScopePop);
                    Ok(())
                }
                Action::Finally(stmts) => self.lower_stmts(stmts),
            };
            self.state().in_cleanup = false;
            result?;
        }
        Ok(())
    }

    fn find_loop(&self, label: Option<&str>, line: u32, for_break: bool) -> CResult<usize> {
        let state = self.fns.last().expect("fn");
        let found = match (label, for_break) {
            (Some(label), true) => state
                .loops
                .iter()
                .rposition(|l| l.label.as_deref() == Some(label)),
            (Some(label), false) => state.loops.iter().rposition(|l| {
                l.label.as_deref() == Some(label) && l.kind == JumpTargetKind::Loop
            }),
            (None, true) => state
                .loops
                .iter()
                .rposition(|l| l.kind != JumpTargetKind::LabeledBlock),
            (None, false) => state
                .loops
                .iter()
                .rposition(|l| l.kind == JumpTargetKind::Loop),
        };
        found.ok_or_else(|| {
            self.error(DiagnosticCode::InvalidLabel, "jump target not found", line)
        })
    }

    fn lower_loop(&mut self, stmt: &'a Stmt, label: Option<String>) -> CResult<()> {
        match &stmt.kind {
            StmtKind::While { cond, body } => {
                let top = self.state().builder.pc();
                self.lower_expr(cond)?;
                let exit = self.state().builder.jump_if_false();
                self.push_loop(label, Some(top), 0);
                self.lower_stmt(body)?;
                self.state().builder.jump_back(top);
                self.pop_loop(exit);
            }
            StmtKind::DoWhile { body, cond } => {
                let top = self.state().builder.pc();
                self.push_loop(label, None, 0);
                self.lower_stmt(body)?;
                let continue_pc = self.state().builder.pc();
                self.patch_continues(continue_pc);
                self.lower_expr(cond)?;
                let exit = self.state().builder.jump_if_false();
                self.state().builder.jump_back(top);
                self.pop_loop(exit);
            }
            StmtKind::For { init, cond, update, body } => {
                self.state().scopes.push(Scope::default());
                if let Some(init) = init {
                    self.lower_stmt(init)?;
                }
                let top = self.state().builder.pc();
                let exit = match cond {
                    Some(cond) => {
                        self.lower_expr(cond)?;
                        Some(self.state().builder.jump_if_false())
                    }
                    None => None,
                };
                self.push_loop(label, None, 0);
                self.lower_stmt(body)?;
                let continue_pc = self.state().builder.pc();
                self.patch_continues(continue_pc);
                if let Some(update) = update {
                    self.lower_expr(update)?;
                    self.emit(Op::Pop);
                }
                self.state().builder.jump_back(top);
                match exit {
                    Some(exit) => self.pop_loop(exit),
                    None => {
                        let ctx = self.state().loops.pop().expect("loop ctx");
                        for patch in ctx.break_patches {
                            self.state().builder.patch_here(patch);
                        }
                    }
                }
                self.state().scopes.pop();
            }
            StmtKind::ForOf { name, iterable, body, is_await } => {
                self.lower_expr(iterable)?;
                self.emit(Op::GetIter);
                let top = self.state().builder.pc();
                self.emit(Op::IterNext { is_async: *is_await });
                let exit = self.state().builder.jump_if_true(); // done
                self.state().scopes.push(Scope::default());
                if *is_await {
                    self.emit(Op::Await);
                }
                self.declare_and_store(name);
                self.push_loop(label, Some(top), 1);
                self.lower_stmt(body)?;
                self.state().builder.jump_back(top);
                // Exhausted: drop the trailing value and the iterator. A
                // break already popped the iterator and jumps past this.
                self.state().builder.patch_here(exit);
                self.emit(Op::Pop); // value
                self.emit(Op::Pop); // iterator
                let ctx = self.state().loops.pop().expect("loop ctx");
                for patch in ctx.break_patches {
                    self.state().builder.patch_here(patch);
                }
                self.state().scopes.pop();
            }
            StmtKind::ForIn { name, object, body } => {
                self.lower_expr(object)?;
                self.emit(Op::EnumKeys);
                self.emit(Op::GetIter);
                let top = self.state().builder.pc();
                self.emit(Op::IterNext { is_async: false });
                let exit = self.state().builder.jump_if_true();
                self.state().scopes.push(Scope::default());
                self.declare_and_store(name);
                self.push_loop(label, Some(top), 1);
                self.lower_stmt(body)?;
                self.state().builder.jump_back(top);
                self.state().builder.patch_here(exit);
                self.emit(Op::Pop);
                self.emit(Op::Pop);
                let ctx = self.state().loops.pop().expect("loop ctx");
                for patch in ctx.break_patches {
                    self.state().builder.patch_here(patch);
                }
                self.state().scopes.pop();
            }
            _ => unreachable!("lower_loop on non-loop"),
        }
        Ok(())
    }

    fn push_loop(&mut self, label: Option<String>, continue_target: Option<u32>, stack_values: u32) {
        self.push_target(JumpTargetKind::Loop, label, continue_target, stack_values);
    }

    fn push_target(
        &mut self,
        kind: JumpTargetKind,
        label: Option<String>,
        continue_target: Option<u32>,
        stack_values: u32,
    ) {
        let depth = self.state().cleanups.len();
        self.state().loops.push(LoopCtx {
            kind,
            label,
            continue_target,
            continue_patches: Vec::new(),
            break_patches: Vec::new(),
            cleanup_depth: depth,
            stack_values,
        });
    }

    fn patch_continues(&mut self, target: u32) {
        let patches = std::mem::take(
            &mut self
                .state()
                .loops
                .last_mut()
                .expect("loop ctx")
                .continue_patches,
        );
        for patch in patches {
            self.state().builder.patch_to(patch, target);
        }
    }

    fn pop_loop(&mut self, exit: Patch) {
        self.state().builder.patch_here(exit);
        let ctx = self.state().loops.pop().expect("loop ctx");
        for patch in ctx.break_patches {
            self.state().builder.patch_here(patch);
        }
    }

    fn lower_switch(&mut self, discriminant: &'a Expr, cases: &'a [SwitchCase]) -> CResult<()> {
        self.lower_expr(discriminant)?;
        let subject = self.state().scratch_local();
        self.emit(Op::StoreLocal(subject));

        // Dispatch: first strict-equal test wins, `default` as fallback.
        let mut case_jumps = Vec::new();
        let mut default_jump = None;
        for (i, case) in cases.iter().enumerate() {
            match &case.test {
                Some(test) => {
                    self.emit(Op::LoadLocal(subject));
                    self.lower_expr(test)?;
                    self.emit(Op::EqStrict);
                    case_jumps.push((i, self.state().builder.jump_if_true()));
                }
                None => default_jump = Some(i),
            }
        }
        let to_default = self.state().builder.jump();

        // Bodies, with fall-through.
        self.state().scopes.push(Scope::default());
        self.push_target(JumpTargetKind::Switch, None, None, 0);
        let mut body_pcs = Vec::with_capacity(cases.len());
        for case in cases {
            body_pcs.push(self.state().builder.pc());
            self.lower_stmts(case.body.as_slice())?;
        }
        let end_ctx = self.state().loops.pop().expect("switch ctx");
        for (i, patch) in case_jumps {
            self.state().builder.patch_to(patch, body_pcs[i]);
        }
        match default_jump {
            Some(i) => self.state().builder.patch_to(to_default, body_pcs[i]),
            None => self.state().builder.patch_here(to_default),
        }
        for patch in end_ctx.break_patches {
            self.state().builder.patch_here(patch);
        }
        self.state().scopes.pop();
        Ok(())
    }

    fn lower_try(
        &mut self,
        try_block: &'a [Stmt],
        catch_param: Option<&str>,
        catch_block: Option<&'a [Stmt]>,
        finally_block: Option<&'a [Stmt]>,
    ) -> CResult<()> {
        // Try body: one guarded region; jumps out owe the handler pop and
        // the finally code.
        let guard = self.state().builder.try_push();
        self.state().cleanups.push(match finally_block {
            Some(finally) => Cleanup::GuardedFinally(finally),
            None => Cleanup::Guard,
        });
        self.state().scopes.push(Scope::default());
        self.lower_stmts(try_block)?;
        self.state().scopes.pop();
        self.state().cleanups.pop();
        self.emit(Op::TryPop);
        let after_try = self.state().builder.jump();

        // Catch handler: error is on the stack, the try's handler is gone.
        self.state().builder.patch_here(guard);
        let mut after_catch = None;
        match catch_block {
            Some(catch_block) => {
                self.state().scopes.push(Scope::default());
                match catch_param {
                    Some(param) => self.declare_and_store(param),
                    None => {
                        self.emit(Op::Pop);
                    }
                }
                // With a finally, the catch body is its own guarded region
                // so a throw inside still runs the cleanup.
                if let Some(finally) = finally_block {
                    let catch_guard = self.state().builder.try_push();
                    self.state().cleanups.push(Cleanup::GuardedFinally(finally));
                    self.lower_stmts(catch_block)?;
                    self.state().cleanups.pop();
                    self.emit(Op::TryPop);
                    let done = self.state().builder.jump();
                    self.state().builder.patch_here(catch_guard);
                    self.state().in_cleanup = true;
                    let r = self.lower_stmts(finally);
                    self.state().in_cleanup = false;
                    r?;
                    self.emit(Op::Throw);
                    self.state().builder.patch_here(done);
                } else {
                    self.lower_stmts(catch_block)?;
                }
                self.state().scopes.pop();
                after_catch = Some(self.state().builder.jump());
            }
            None => {
                // No catch: run the finally and rethrow.
                if let Some(finally) = finally_block {
                    self.state().in_cleanup = true;
                    let r = self.lower_stmts(finally);
                    self.state().in_cleanup = false;
                    r?;
                }
                self.emit(Op::Throw);
            }
        }

        self.state().builder.patch_here(after_try);
        if let Some(patch) = after_catch {
            self.state().builder.patch_here(patch);
        }
        if let Some(finally) = finally_block {
            // Normal completion path.
            self.state().in_cleanup = true;
            let r = self.lower_stmts(finally);
            self.state().in_cleanup = false;
            r?;
        }
        Ok(())
    }

    // =========================================================================
    // Functions and classes
    // =========================================================================

    fn compile_function(&mut self, decl: &'a Rc<FunctionDecl>) -> CResult<FnProto> {
        let body = decl.body.as_ref().expect("function body");
        let mut state = FnState::new(decl.is_strict);
        state.is_generator = decl.is_generator;
        state.is_async = decl.is_async;
        let param_names: Vec<&str> = decl.params.iter().map(|p| p.name.as_str()).collect();
        state.captured_names = captured_names_of(body, &param_names);
        self.fns.push(state);

        // Parameters occupy the first local slots; captured ones are
        // re-homed into cells by a prologue.
        for param in &decl.params {
            let captured = self.state().captured_names.contains(&param.name);
            let slot = self.state().builder.local_count;
            self.state().builder.local_count += 1;
            if captured {
                let cell = self.state().builder.cell_count;
                self.state().builder.cell_count += 1;
                self.emit(Op::LoadLocal(slot));
                self.emit(Op::MakeCell(cell));
                self.state()
                    .scopes
                    .last_mut()
                    .expect("scope")
                    .names
                    .insert(param.name.clone(), Storage::Cell(cell));
            } else {
                self.state()
                    .scopes
                    .last_mut()
                    .expect("scope")
                    .names
                    .insert(param.name.clone(), Storage::Local(slot));
            }
        }
        // Defaults: `param = (param === undefined) ? default : param`.
        for param in &decl.params {
            let Some(default) = &param.default else { continue };
            let storage = self.state().resolve_here(&param.name).expect("param storage");
            self.emit_load(storage);
            self.emit(Op::Undefined);
            self.emit(Op::EqStrict);
            let skip = self.state().builder.jump_if_false();
            self.lower_expr(default)?;
            self.emit_store(storage);
            self.state().builder.patch_here(skip);
        }

        self.lower_scoped_body(body)?;
        self.emit(Op::ReturnUndefined);

        let state = self.fns.pop().expect("fn state");
        let captures = state
            .captures
            .iter()
            .map(|(_, source)| *source)
            .collect();
        let required = decl
            .params
            .iter()
            .filter(|p| !p.optional && p.default.is_none() && !p.is_rest)
            .count() as u32;
        Ok(FnProto {
            name: decl.name.clone().unwrap_or_default(),
            code: state.builder.finish(),
            param_count: decl.params.len() as u32,
            required_count: required,
            has_rest: decl.params.iter().any(|p| p.is_rest),
            is_async: decl.is_async,
            is_generator: decl.is_generator,
            is_arrow: decl.is_arrow,
            is_strict: decl.is_strict,
            captures,
        })
    }

    fn lower_class(&mut self, decl: &'a Rc<ClassDecl>) -> CResult<()> {
        if let Some(superclass) = &decl.superclass {
            self.lower_expr(superclass)?;
        }

        let mut methods = Vec::new();
        let mut getters = Vec::new();
        let mut setters = Vec::new();
        let mut static_methods = Vec::new();
        let mut ctor_proto = None;
        let mut protos: Vec<FnProto> = Vec::new();

        for member in &decl.members {
            match member {
                ClassMember::Method { func, is_static, .. } => {
                    if func.body.is_none() {
                        continue;
                    }
                    let proto = self.compile_function(func)?;
                    let idx = protos.len() as u32;
                    protos.push(proto);
                    match func.name.as_deref() {
                        Some("constructor") => ctor_proto = Some(idx),
                        Some(name) if *is_static => static_methods.push((name.to_string(), idx)),
                        Some(name) => methods.push((name.to_string(), idx)),
                        None => {}
                    }
                }
                ClassMember::Getter { name, func, is_static } => {
                    let proto = self.compile_function(func)?;
                    let idx = protos.len() as u32;
                    protos.push(proto);
                    if *is_static {
                        static_methods.push((name.clone(), idx));
                    } else {
                        getters.push((name.clone(), idx));
                    }
                }
                ClassMember::Setter { name, func, is_static } => {
                    if !is_static {
                        let proto = self.compile_function(func)?;
                        let idx = protos.len() as u32;
                        protos.push(proto);
                        setters.push((name.clone(), idx));
                    }
                }
                ClassMember::Field { .. } | ClassMember::StaticBlock(_) => {}
            }
        }

        // Field initializers fold into a synthesized constructor prologue.
        let instance_fields: Vec<(&String, Option<&Expr>)> = decl
            .members
            .iter()
            .filter_map(|m| match m {
                ClassMember::Field { name, init, is_static: false, .. } => {
                    Some((name, init.as_ref()))
                }
                _ => None,
            })
            .collect();
        if !instance_fields.is_empty() || ctor_proto.is_none() {
            let ctor_idx = self.synthesize_constructor(
                decl,
                &instance_fields,
                ctor_proto.map(|i| protos[i as usize].clone()),
            )?;
            match ctor_proto {
                Some(i) => protos[i as usize] = ctor_idx,
                None => {
                    ctor_proto = Some(protos.len() as u32);
                    protos.push(ctor_idx);
                }
            }
        }

        // Static initialization body.
        let statics: Vec<&ClassMember> = decl
            .members
            .iter()
            .filter(|m| {
                matches!(
                    m,
                    ClassMember::Field { is_static: true, .. } | ClassMember::StaticBlock(_)
                )
            })
            .collect();
        let static_init = if statics.is_empty() {
            None
        } else {
            let proto = self.compile_static_init(decl)?;
            let idx = protos.len() as u32;
            protos.push(proto);
            Some(idx)
        };

        // The class template owns its prototypes in the enclosing pool.
        let mut proto_indices = Vec::with_capacity(protos.len());
        for proto in protos {
            let idx = self.state().builder.constant(Constant::Function(Box::new(proto)));
            proto_indices.push(idx);
        }
        let remap = |entries: Vec<(String, u32)>| -> Vec<(String, u32)> {
            entries
                .into_iter()
                .map(|(name, i)| (name, proto_indices[i as usize]))
                .collect()
        };
        let template = ClassTemplate {
            name: decl.name.clone(),
            has_superclass: decl.superclass.is_some(),
            is_abstract: decl.is_abstract,
            constructor: ctor_proto.map(|i| proto_indices[i as usize]),
            methods: remap(methods),
            getters: remap(getters),
            setters: remap(setters),
            static_methods: remap(static_methods),
            static_init: static_init.map(|i| proto_indices[i as usize]),
        };
        let idx = self.state().builder.constant(Constant::Class(Box::new(template)));
        self.emit(Op::MakeClass(idx));
        Ok(())
    }

    /// Build the constructor that initializes instance fields and then runs
    /// the declared constructor body (or implicitly forwards to `super`).
    fn synthesize_constructor(
        &mut self,
        decl: &'a Rc<ClassDecl>,
        fields: &[(&String, Option<&'a Expr>)],
        declared: Option<FnProto>,
    ) -> CResult<FnProto> {
        match declared {
            Some(mut proto) => {
                // Prepend the field prologue to the compiled body. The
                // body's parameter and local slots are already assigned
                // from zero, so the prologue allocates its slots (scratch
                // locals of compound/increment initializers included)
                // strictly above them; a prologue scratch at slot 0 would
                // clobber the first constructor argument before the body
                // reads it.
                let mut pre = FnState::new(proto.is_strict);
                pre.builder.local_count = proto.code.local_count;
                pre.builder.cell_count = proto.code.cell_count;
                self.fns.push(pre);
                for (name, init) in fields {
                    self.emit(Op::LoadThis);
                    match init {
                        Some(init) => self.lower_expr(init)?,
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    let idx = self.name_idx(name);
                    self.emit(Op::SetProp(idx));
                    self.emit(Op::Pop);
                }
                pre = self.fns.pop().expect("prologue state");
                let prologue = pre.builder.finish();
                if !pre.captures.is_empty() {
                    return Err(self.error(
                        DiagnosticCode::SyntaxError,
                        "field initializers may not capture enclosing locals in compiled modules",
                        decl.line,
                    ));
                }
                proto.code = splice_prologue(prologue, proto.code);
                Ok(proto)
            }
            None => {
                let mut state = FnState::new(false);
                self.fns.push(state);
                for (name, init) in fields {
                    self.emit(Op::LoadThis);
                    match init {
                        Some(init) => self.lower_expr(init)?,
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    let idx = self.name_idx(name);
                    self.emit(Op::SetProp(idx));
                    self.emit(Op::Pop);
                }
                if decl.superclass.is_some() {
                    // Default constructor forwards nothing; parent fields
                    // were initialized by the parent's synthesized
                    // constructor through CallSuper.
                    self.emit(Op::CallSuper { argc: 0 });
                    self.emit(Op::Pop);
                }
                self.emit(Op::ReturnUndefined);
                state = self.fns.pop().expect("ctor state");
                if !state.captures.is_empty() {
                    return Err(self.error(
                        DiagnosticCode::SyntaxError,
                        "field initializers may not capture enclosing locals in compiled modules",
                        decl.line,
                    ));
                }
                Ok(FnProto {
                    name: "constructor".to_string(),
                    code: state.builder.finish(),
                    param_count: 0,
                    required_count: 0,
                    has_rest: false,
                    is_async: false,
                    is_generator: false,
                    is_arrow: false,
                    is_strict: false,
                    captures: Vec::new(),
                })
            }
        }
    }

    fn compile_static_init(&mut self, decl: &'a Rc<ClassDecl>) -> CResult<FnProto> {
        let mut state = FnState::new(false);
        self.fns.push(state);
        // The class itself arrives as `this`; bind its name locally so the
        // body can say `Config.count` before the outer binding is stored.
        self.emit(Op::LoadThis);
        self.declare_and_store(&decl.name);
        for member in &decl.members {
            match member {
                ClassMember::Field { name, init, is_static: true, .. } => {
                    self.emit(Op::LoadThis);
                    match init {
                        Some(init) => self.lower_expr(init)?,
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    let idx = self.name_idx(name);
                    self.emit(Op::SetProp(idx));
                    self.emit(Op::Pop);
                }
                ClassMember::StaticBlock(body) => {
                    let body: &'a [Stmt] = body;
                    self.lower_stmts(body)?;
                }
                _ => {}
            }
        }
        self.emit(Op::ReturnUndefined);
        state = self.fns.pop().expect("static init state");
        if !state.captures.is_empty() {
            return Err(self.error(
                DiagnosticCode::SyntaxError,
                "static initializers may not capture enclosing locals in compiled modules",
                decl.line,
            ));
        }
        Ok(FnProto {
            name: format!("{}::static", decl.name),
            code: state.builder.finish(),
            param_count: 0,
            required_count: 0,
            has_rest: false,
            is_async: false,
            is_generator: false,
            is_arrow: false,
            is_strict: false,
            captures: Vec::new(),
        })
    }

    fn lower_enum_object(&mut self, decl: &'a EnumDecl) -> CResult<()> {
        self.emit(Op::MakeEmptyObject);
        let mut next_auto = 0.0f64;
        let mut values: FxHashMap<String, f64> = FxHashMap::default();
        for member in &decl.members {
            let value = match &member.init {
                None => Some(next_auto),
                Some(init) => const_fold_number(init, &values),
            };
            match value {
                Some(n) => {
                    values.insert(member.name.clone(), n);
                    next_auto = n + 1.0;
                    // Forward mapping.
                    let key = self.state().builder.constant(Constant::String(member.name.clone()));
                    self.emit(Op::Const(key));
                    self.emit(Op::Number(n));
                    self.emit(Op::ObjectEntry);
                    // Reverse mapping.
                    let rev =
                        self.state().builder.constant(Constant::String(fmt_number(n)));
                    self.emit(Op::Const(rev));
                    let name_const =
                        self.state().builder.constant(Constant::String(member.name.clone()));
                    self.emit(Op::Const(name_const));
                    self.emit(Op::ObjectEntry);
                }
                None => {
                    // String member (or checked-constant string expression).
                    let key = self.state().builder.constant(Constant::String(member.name.clone()));
                    self.emit(Op::Const(key));
                    match &member.init {
                        Some(init) => self.lower_expr(init)?,
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    self.emit(Op::ObjectEntry);
                }
            }
        }
        Ok(())
    }

    fn lower_namespace(&mut self, name: &str, body: &'a [Stmt]) -> CResult<()> {
        // Merge semantics: start from the existing object when the
        // namespace was declared before.
        let existing = self.resolve(name);
        self.emit(Op::MakeEmptyObject);
        if let Some(storage) = existing {
            self.emit_load(storage);
            self.emit(Op::ObjectSpread);
        }

        self.state().scopes.push(Scope::default());
        self.lower_stmts(body)?;
        let mut exported = Vec::new();
        for stmt in body {
            let inner = match &stmt.kind {
                StmtKind::Export(inner) => inner.as_ref(),
                _ => stmt,
            };
            collect_declared(inner, &mut exported);
        }
        for exported_name in &exported {
            if let Some(storage) = self.state().resolve_here(exported_name) {
                let key = self
                    .state()
                    .builder
                    .constant(Constant::String(exported_name.clone()));
                self.emit(Op::Const(key));
                self.emit_load(storage);
                self.emit(Op::ObjectEntry);
            }
        }
        self.state().scopes.pop();

        match self.resolve(name) {
            Some(storage) => self.emit_store(storage),
            None => {
                self.declare_and_store(name);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Expressions
// =============================================================================

impl<'a> Compiler<'a> {
    fn lower_expr(&mut self, expr: &'a Expr) -> CResult<()> {
        self.state().builder.set_line(expr.line);
        match &expr.kind {
            ExprKind::Literal(literal) => self.lower_literal(literal),
            ExprKind::Variable(name) => match self.resolve(name) {
                Some(storage) => self.emit_load(storage),
                None => {
                    let idx = self.name_idx(name);
                    self.emit(Op::LoadGlobal(idx));
                }
            },
            ExprKind::Binary { op, left, right } => return self.lower_binary(*op, left, right),
            ExprKind::Logical { op, left, right } => {
                self.lower_expr(left)?;
                self.emit(Op::Dup);
                let short = match op {
                    LogicalOp::And => self.state().builder.jump_if_false(),
                    LogicalOp::Or => self.state().builder.jump_if_true(),
                };
                self.emit(Op::Pop);
                self.lower_expr(right)?;
                self.state().builder.patch_here(short);
            }
            ExprKind::NullishCoalescing { left, right } => {
                self.lower_expr(left)?;
                let use_right = self.state().builder.jump_if_nullish();
                let done = self.state().builder.jump();
                self.state().builder.patch_here(use_right);
                self.emit(Op::Pop);
                self.lower_expr(right)?;
                self.state().builder.patch_here(done);
            }
            ExprKind::Ternary { cond, then_branch, else_branch } => {
                self.lower_expr(cond)?;
                let to_else = self.state().builder.jump_if_false();
                self.lower_expr(then_branch)?;
                let done = self.state().builder.jump();
                self.state().builder.patch_here(to_else);
                self.lower_expr(else_branch)?;
                self.state().builder.patch_here(done);
            }
            ExprKind::Unary { op, operand } => {
                match op {
                    UnaryOp::Void => {
                        self.lower_expr(operand)?;
                        self.emit(Op::Pop);
                        self.emit(Op::Undefined);
                        return Ok(());
                    }
                    _ => self.lower_expr(operand)?,
                }
                self.emit(match op {
                    UnaryOp::Minus => Op::Neg,
                    UnaryOp::Plus => Op::ToNumber,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::BitNot => Op::BitNot,
                    UnaryOp::TypeOf => Op::TypeOf,
                    UnaryOp::Void => unreachable!(),
                });
            }
            ExprKind::Assign { name, value } => {
                self.lower_expr(value)?;
                self.emit(Op::Dup);
                self.store_variable(name);
            }
            ExprKind::CompoundAssign { name, op, value } => {
                self.load_variable(name);
                self.lower_expr(value)?;
                self.emit(generic_binop(*op));
                self.emit(Op::Dup);
                self.store_variable(name);
            }
            ExprKind::LogicalAssign { name, op, value } => {
                self.load_variable(name);
                match op {
                    LogicalAssignOp::And | LogicalAssignOp::Or => {
                        self.emit(Op::Dup);
                        let keep = match op {
                            LogicalAssignOp::And => self.state().builder.jump_if_false(),
                            _ => self.state().builder.jump_if_true(),
                        };
                        self.emit(Op::Pop);
                        self.lower_expr(value)?;
                        self.emit(Op::Dup);
                        self.store_variable(name);
                        self.state().builder.patch_here(keep);
                    }
                    LogicalAssignOp::Nullish => {
                        let assign = self.state().builder.jump_if_nullish();
                        let done = self.state().builder.jump();
                        self.state().builder.patch_here(assign);
                        self.emit(Op::Pop);
                        self.lower_expr(value)?;
                        self.emit(Op::Dup);
                        self.store_variable(name);
                        self.state().builder.patch_here(done);
                    }
                }
            }
            ExprKind::Call { callee, args } => return self.lower_call(callee, args),
            ExprKind::New { callee, args } => {
                self.lower_expr(callee)?;
                if args.iter().any(|a| matches!(a.kind, ExprKind::Spread(_))) {
                    self.lower_args_array(args)?;
                    self.emit(Op::NewSpread);
                } else {
                    for arg in args {
                        self.lower_expr(arg)?;
                    }
                    self.emit(Op::New { argc: args.len() as u32 });
                }
            }
            ExprKind::Get { object, name } => {
                if let Some(inline) = self.try_const_enum(object, name) {
                    self.emit(inline);
                    return Ok(());
                }
                if let ExprKind::Super = &object.kind {
                    let idx = self.name_idx(name);
                    self.emit(Op::LoadSuperMethod(idx));
                    return Ok(());
                }
                if let ExprKind::Variable(ns) = &object.kind {
                    if self.resolve(ns).is_none()
                        && tsr_runtime::builtins::namespace_member(ns, name).is_some()
                    {
                        let ns_idx = self.name_idx(ns);
                        let member_idx = self.name_idx(name);
                        self.emit(Op::LoadNamespaceMember { ns: ns_idx, member: member_idx });
                        return Ok(());
                    }
                }
                self.lower_expr(object)?;
                let idx = self.name_idx(name);
                self.emit(Op::GetProp(idx));
            }
            ExprKind::Set { object, name, value } => {
                self.lower_expr(object)?;
                self.lower_expr(value)?;
                let idx = self.name_idx(name);
                self.emit(Op::SetProp(idx));
            }
            ExprKind::GetIndex { object, index } => {
                self.lower_expr(object)?;
                self.lower_expr(index)?;
                self.emit(Op::GetIndex);
            }
            ExprKind::SetIndex { object, index, value } => {
                self.lower_expr(object)?;
                self.lower_expr(index)?;
                self.lower_expr(value)?;
                self.emit(Op::SetIndex);
            }
            ExprKind::CompoundSet { object, name, op, value } => {
                let t = self.state().scratch_local();
                self.lower_expr(object)?;
                self.emit(Op::StoreLocal(t));
                self.emit(Op::LoadLocal(t));
                self.emit(Op::LoadLocal(t));
                let idx = self.name_idx(name);
                self.emit(Op::GetProp(idx));
                self.lower_expr(value)?;
                self.emit(generic_binop(*op));
                self.emit(Op::SetProp(idx));
            }
            ExprKind::CompoundSetIndex { object, index, op, value } => {
                let t_obj = self.state().scratch_local();
                let t_idx = self.state().scratch_local();
                self.lower_expr(object)?;
                self.emit(Op::StoreLocal(t_obj));
                self.lower_expr(index)?;
                self.emit(Op::StoreLocal(t_idx));
                self.emit(Op::LoadLocal(t_obj));
                self.emit(Op::LoadLocal(t_idx));
                self.emit(Op::LoadLocal(t_obj));
                self.emit(Op::LoadLocal(t_idx));
                self.emit(Op::GetIndex);
                self.lower_expr(value)?;
                self.emit(generic_binop(*op));
                self.emit(Op::SetIndex);
            }
            ExprKind::LogicalSet { object, name, op, value } => {
                let t = self.state().scratch_local();
                self.lower_expr(object)?;
                self.emit(Op::StoreLocal(t));
                self.emit(Op::LoadLocal(t));
                let idx = self.name_idx(name);
                self.emit(Op::GetProp(idx));
                match op {
                    LogicalAssignOp::And | LogicalAssignOp::Or => {
                        self.emit(Op::Dup);
                        let keep = match op {
                            LogicalAssignOp::And => self.state().builder.jump_if_false(),
                            _ => self.state().builder.jump_if_true(),
                        };
                        self.emit(Op::Pop);
                        self.emit(Op::LoadLocal(t));
                        self.lower_expr(value)?;
                        self.emit(Op::SetProp(idx));
                        self.state().builder.patch_here(keep);
                    }
                    LogicalAssignOp::Nullish => {
                        let assign = self.state().builder.jump_if_nullish();
                        let done = self.state().builder.jump();
                        self.state().builder.patch_here(assign);
                        self.emit(Op::Pop);
                        self.emit(Op::LoadLocal(t));
                        self.lower_expr(value)?;
                        self.emit(Op::SetProp(idx));
                        self.state().builder.patch_here(done);
                    }
                }
            }
            ExprKind::LogicalSetIndex { object, index, op, value } => {
                let t_obj = self.state().scratch_local();
                let t_idx = self.state().scratch_local();
                self.lower_expr(object)?;
                self.emit(Op::StoreLocal(t_obj));
                self.lower_expr(index)?;
                self.emit(Op::StoreLocal(t_idx));
                self.emit(Op::LoadLocal(t_obj));
                self.emit(Op::LoadLocal(t_idx));
                self.emit(Op::GetIndex);
                match op {
                    LogicalAssignOp::And | LogicalAssignOp::Or => {
                        self.emit(Op::Dup);
                        let keep = match op {
                            LogicalAssignOp::And => self.state().builder.jump_if_false(),
                            _ => self.state().builder.jump_if_true(),
                        };
                        self.emit(Op::Pop);
                        self.emit(Op::LoadLocal(t_obj));
                        self.emit(Op::LoadLocal(t_idx));
                        self.lower_expr(value)?;
                        self.emit(Op::SetIndex);
                        self.state().builder.patch_here(keep);
                    }
                    LogicalAssignOp::Nullish => {
                        let assign = self.state().builder.jump_if_nullish();
                        let done = self.state().builder.jump();
                        self.state().builder.patch_here(assign);
                        self.emit(Op::Pop);
                        self.emit(Op::LoadLocal(t_obj));
                        self.emit(Op::LoadLocal(t_idx));
                        self.lower_expr(value)?;
                        self.emit(Op::SetIndex);
                        self.state().builder.patch_here(done);
                    }
                }
            }
            ExprKind::PrefixIncrement { target, negative } => {
                self.lower_increment(target, *negative, true)?;
            }
            ExprKind::PostfixIncrement { target, negative } => {
                self.lower_increment(target, *negative, false)?;
            }
            ExprKind::This => {
                self.emit(Op::LoadThis);
            }
            ExprKind::Super => {
                return Err(self.error(
                    DiagnosticCode::SyntaxError,
                    "'super' is only valid in calls and member accesses",
                    expr.line,
                ));
            }
            ExprKind::ArrayLiteral(elements) => {
                let has_spread = elements.iter().any(|e| matches!(e.kind, ExprKind::Spread(_)));
                if !has_spread {
                    for element in elements {
                        self.lower_expr(element)?;
                    }
                    self.emit(Op::MakeArray(elements.len() as u32));
                } else {
                    self.emit(Op::MakeArray(0));
                    for element in elements {
                        match &element.kind {
                            ExprKind::Spread(inner) => {
                                self.lower_expr(inner)?;
                                self.emit(Op::ArraySpread);
                            }
                            _ => {
                                self.lower_expr(element)?;
                                self.emit(Op::ArrayPush);
                            }
                        }
                    }
                }
            }
            ExprKind::ObjectLiteral(props) => {
                self.emit(Op::MakeEmptyObject);
                for prop in props {
                    match prop {
                        ObjectProp::Entry { key, value } => {
                            match key {
                                PropKey::Static(name) => {
                                    let idx = self
                                        .state()
                                        .builder
                                        .constant(Constant::String(name.clone()));
                                    self.emit(Op::Const(idx));
                                }
                                PropKey::Computed(key_expr) => self.lower_expr(key_expr)?,
                            }
                            self.lower_expr(value)?;
                            self.emit(Op::ObjectEntry);
                        }
                        ObjectProp::Spread(inner) => {
                            self.lower_expr(inner)?;
                            self.emit(Op::ObjectSpread);
                        }
                    }
                }
            }
            ExprKind::Spread(inner) => self.lower_expr(inner)?,
            ExprKind::Grouping(inner) => self.lower_expr(inner)?,
            ExprKind::ArrowFunction(decl) => {
                if decl.body.is_none() {
                    self.emit(Op::Undefined);
                    return Ok(());
                }
                let proto = self.compile_function(decl)?;
                let idx = self.state().builder.constant(Constant::Function(Box::new(proto)));
                self.emit(Op::MakeFunction(idx));
            }
            ExprKind::TemplateLiteral { strings, exprs } => {
                let mut parts = 0u32;
                for (i, chunk) in strings.iter().enumerate() {
                    if !chunk.is_empty() {
                        let idx = self.state().builder.constant(Constant::String(chunk.clone()));
                        self.emit(Op::Const(idx));
                        parts += 1;
                    }
                    if let Some(part) = exprs.get(i) {
                        self.lower_expr(part)?;
                        parts += 1;
                    }
                }
                if parts == 0 {
                    let idx = self.state().builder.constant(Constant::String(String::new()));
                    self.emit(Op::Const(idx));
                } else {
                    self.emit(Op::Concat(parts));
                }
            }
            ExprKind::TypeAssertion { expr: inner, .. } => self.lower_expr(inner)?,
            ExprKind::Await(inner) => {
                self.lower_expr(inner)?;
                self.emit(Op::Await);
            }
            ExprKind::Yield { value, delegate } => {
                if *delegate {
                    // `yield*`: forward the inner iterable's values.
                    match value {
                        Some(value) => self.lower_expr(value)?,
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    self.emit(Op::GetIter);
                    let top = self.state().builder.pc();
                    self.emit(Op::IterNext { is_async: false });
                    let done = self.state().builder.jump_if_true();
                    self.emit(Op::Yield);
                    self.emit(Op::Pop);
                    self.state().builder.jump_back(top);
                    self.state().builder.patch_here(done);
                    self.emit(Op::Pop); // trailing value
                    self.emit(Op::Pop); // iterator
                    self.emit(Op::Undefined);
                } else {
                    match value {
                        Some(value) => self.lower_expr(value)?,
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    self.emit(Op::Yield);
                }
            }
            ExprKind::DynamicImport(_) => {
                return Err(self.error(
                    DiagnosticCode::SyntaxError,
                    "dynamic import is not supported in compiled modules",
                    expr.line,
                ));
            }
            ExprKind::RegexLiteral { pattern, flags } => {
                let idx = self.state().builder.constant(Constant::Regex {
                    pattern: pattern.clone(),
                    flags: flags.clone(),
                });
                self.emit(Op::Const(idx));
            }
        }
        Ok(())
    }

    fn lower_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Number(n) => {
                self.emit(Op::Number(*n));
            }
            Literal::String(s) => {
                let idx = self.state().builder.constant(Constant::String(s.clone()));
                self.emit(Op::Const(idx));
            }
            Literal::BigInt(digits) => {
                let idx = self.state().builder.constant(Constant::BigInt(digits.clone()));
                self.emit(Op::Const(idx));
            }
            Literal::Boolean(true) => {
                self.emit(Op::True);
            }
            Literal::Boolean(false) => {
                self.emit(Op::False);
            }
            Literal::Null => {
                self.emit(Op::Null);
            }
            Literal::Undefined => {
                self.emit(Op::Undefined);
            }
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, left: &'a Expr, right: &'a Expr) -> CResult<()> {
        // String concatenation chains flatten into one variadic concat.
        if op == BinaryOp::Add && (self.expr_is_string(left) || self.expr_is_string(right)) {
            let mut parts = Vec::new();
            collect_concat_parts(left, &mut parts);
            collect_concat_parts(right, &mut parts);
            let count = parts.len() as u32;
            for part in parts {
                self.lower_expr(part)?;
            }
            self.emit(Op::Concat(count));
            return Ok(());
        }
        self.lower_expr(left)?;
        self.lower_expr(right)?;
        let both_num = self.expr_is_number(left) && self.expr_is_number(right);
        let chosen = if both_num {
            match op {
                BinaryOp::Add => Some(Op::AddNum),
                BinaryOp::Sub => Some(Op::SubNum),
                BinaryOp::Mul => Some(Op::MulNum),
                BinaryOp::Div => Some(Op::DivNum),
                BinaryOp::Less => Some(Op::LessNum),
                BinaryOp::LessEqual => Some(Op::LessEqNum),
                BinaryOp::Greater => Some(Op::GreaterNum),
                BinaryOp::GreaterEqual => Some(Op::GreaterEqNum),
                _ => None,
            }
        } else {
            None
        };
        self.emit(chosen.unwrap_or_else(|| generic_binop(op)));
        Ok(())
    }

    fn lower_call(&mut self, callee: &'a Expr, args: &'a [Expr]) -> CResult<()> {
        let has_spread = args.iter().any(|a| matches!(a.kind, ExprKind::Spread(_)));

        if let ExprKind::Super = &callee.kind {
            if has_spread {
                return Err(self.error(
                    DiagnosticCode::SyntaxError,
                    "spread arguments to 'super' are not supported in compiled modules",
                    callee.line,
                ));
            }
            for arg in args {
                self.lower_expr(arg)?;
            }
            self.emit(Op::CallSuper { argc: args.len() as u32 });
            return Ok(());
        }

        if let ExprKind::Get { object, name } = &callee.kind {
            if let ExprKind::Variable(ns) = &object.kind {
                if self.resolve(ns).is_none()
                    && tsr_runtime::builtins::namespace_member(ns, name).is_some()
                {
                    let ns_idx = self.name_idx(ns);
                    let member_idx = self.name_idx(name);
                    self.emit(Op::LoadNamespaceMember { ns: ns_idx, member: member_idx });
                    if has_spread {
                        self.lower_args_array(args)?;
                        self.emit(Op::CallSpread);
                    } else {
                        for arg in args {
                            self.lower_expr(arg)?;
                        }
                        self.emit(Op::Call { argc: args.len() as u32 });
                    }
                    return Ok(());
                }
            }
            if let ExprKind::Super = &object.kind {
                let idx = self.name_idx(name);
                self.emit(Op::LoadSuperMethod(idx));
                if has_spread {
                    self.lower_args_array(args)?;
                    self.emit(Op::CallSpread);
                } else {
                    for arg in args {
                        self.lower_expr(arg)?;
                    }
                    self.emit(Op::Call { argc: args.len() as u32 });
                }
                return Ok(());
            }
            // Method call: receiver computed once, becomes `this`.
            self.lower_expr(object)?;
            let idx = self.name_idx(name);
            if has_spread {
                self.lower_args_array(args)?;
                self.emit(Op::CallMethodSpread { name: idx });
            } else {
                for arg in args {
                    self.lower_expr(arg)?;
                }
                self.emit(Op::CallMethod { name: idx, argc: args.len() as u32 });
            }
            return Ok(());
        }

        self.lower_expr(callee)?;
        if has_spread {
            self.lower_args_array(args)?;
            self.emit(Op::CallSpread);
        } else {
            for arg in args {
                self.lower_expr(arg)?;
            }
            self.emit(Op::Call { argc: args.len() as u32 });
        }
        Ok(())
    }

    fn lower_args_array(&mut self, args: &'a [Expr]) -> CResult<()> {
        self.emit(Op::MakeArray(0));
        for arg in args {
            match &arg.kind {
                ExprKind::Spread(inner) => {
                    self.lower_expr(inner)?;
                    self.emit(Op::ArraySpread);
                }
                _ => {
                    self.lower_expr(arg)?;
                    self.emit(Op::ArrayPush);
                }
            }
        }
        Ok(())
    }

    fn lower_increment(&mut self, target: &'a Expr, negative: bool, prefix: bool) -> CResult<()> {
        let step = if negative { Op::SubNum } else { Op::AddNum };
        match &target.kind {
            ExprKind::Variable(name) => {
                self.load_variable(name);
                self.emit(Op::ToNumber);
                if !prefix {
                    self.emit(Op::Dup);
                }
                self.emit(Op::Number(1.0));
                self.emit(step);
                if prefix {
                    self.emit(Op::Dup);
                    self.store_variable(name);
                } else {
                    self.store_variable(name);
                }
            }
            ExprKind::Get { object, name } => {
                let t_obj = self.state().scratch_local();
                let t_old = self.state().scratch_local();
                self.lower_expr(object)?;
                self.emit(Op::StoreLocal(t_obj));
                self.emit(Op::LoadLocal(t_obj));
                let idx = self.name_idx(name);
                self.emit(Op::GetProp(idx));
                self.emit(Op::ToNumber);
                self.emit(Op::StoreLocal(t_old));
                self.emit(Op::LoadLocal(t_obj));
                self.emit(Op::LoadLocal(t_old));
                self.emit(Op::Number(1.0));
                self.emit(step);
                self.emit(Op::SetProp(idx));
                self.emit(Op::Pop);
                if prefix {
                    self.emit(Op::LoadLocal(t_old));
                    self.emit(Op::Number(1.0));
                    self.emit(step);
                } else {
                    self.emit(Op::LoadLocal(t_old));
                }
            }
            ExprKind::GetIndex { object, index } => {
                let t_obj = self.state().scratch_local();
                let t_idx = self.state().scratch_local();
                let t_old = self.state().scratch_local();
                self.lower_expr(object)?;
                self.emit(Op::StoreLocal(t_obj));
                self.lower_expr(index)?;
                self.emit(Op::StoreLocal(t_idx));
                self.emit(Op::LoadLocal(t_obj));
                self.emit(Op::LoadLocal(t_idx));
                self.emit(Op::GetIndex);
                self.emit(Op::ToNumber);
                self.emit(Op::StoreLocal(t_old));
                self.emit(Op::LoadLocal(t_obj));
                self.emit(Op::LoadLocal(t_idx));
                self.emit(Op::LoadLocal(t_old));
                self.emit(Op::Number(1.0));
                self.emit(step);
                self.emit(Op::SetIndex);
                self.emit(Op::Pop);
                if prefix {
                    self.emit(Op::LoadLocal(t_old));
                    self.emit(Op::Number(1.0));
                    self.emit(step);
                } else {
                    self.emit(Op::LoadLocal(t_old));
                }
            }
            _ => {
                return Err(self.error(
                    DiagnosticCode::InvalidAssignmentTarget,
                    "invalid increment target",
                    target.line,
                ));
            }
        }
        Ok(())
    }

    fn load_variable(&mut self, name: &str) {
        match self.resolve(name) {
            Some(storage) => self.emit_load(storage),
            None => {
                let idx = self.name_idx(name);
                self.emit(Op::LoadGlobal(idx));
            }
        }
    }

    fn store_variable(&mut self, name: &str) {
        match self.resolve(name) {
            Some(storage) => self.emit_store(storage),
            None => {
                let idx = self.name_idx(name);
                self.emit(Op::StoreGlobal(idx));
            }
        }
    }
}

fn generic_binop(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Rem => Op::Rem,
        BinaryOp::Pow => Op::Pow,
        BinaryOp::Less => Op::Less,
        BinaryOp::LessEqual => Op::LessEq,
        BinaryOp::Greater => Op::Greater,
        BinaryOp::GreaterEqual => Op::GreaterEq,
        BinaryOp::EqEq => Op::EqLoose,
        BinaryOp::NotEq => Op::NeqLoose,
        BinaryOp::EqEqEq => Op::EqStrict,
        BinaryOp::NotEqEq => Op::NeqStrict,
        BinaryOp::BitAnd => Op::BitAnd,
        BinaryOp::BitOr => Op::BitOr,
        BinaryOp::BitXor => Op::BitXor,
        BinaryOp::Shl => Op::Shl,
        BinaryOp::Shr => Op::Shr,
        BinaryOp::UShr => Op::UShr,
        BinaryOp::In => Op::InOp,
        BinaryOp::InstanceOf => Op::InstanceOfOp,
    }
}

/// Flatten nested `+` chains for the variadic concat primitive.
fn collect_concat_parts<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match &expr.kind {
        ExprKind::Binary { op: BinaryOp::Add, left, right } => {
            collect_concat_parts(left, out);
            collect_concat_parts(right, out);
        }
        _ => out.push(expr),
    }
}

// =============================================================================
// Free helpers
// =============================================================================

/// Concatenate a field-initializer prologue and a compiled constructor body
/// into one unit.
///
/// The body's jump targets, constant indices and name indices rebase past
/// the prologue's. Slot indices rebase the other way around and are already
/// final: the prologue was compiled with its `local_count`/`cell_count`
/// starting at the body's totals, so its slots sit in a disjoint range
/// above the body's parameters and locals and no `LoadLocal`/`StoreLocal`/
/// cell op needs rewriting here.
fn splice_prologue(prologue: CodeUnit, mut body: CodeUnit) -> CodeUnit {
    debug_assert!(
        prologue.local_count >= body.local_count && prologue.cell_count >= body.cell_count,
        "prologue slots must be allocated above the constructor body's"
    );
    let op_offset = prologue.ops.len() as u32;
    let const_base = prologue.constants.len() as u32;
    let name_base = prologue.names.len() as u32;
    let rebased: Vec<Op> = body
        .ops
        .iter()
        .map(|op| rebase_op(*op, op_offset, const_base, name_base))
        .collect();
    let mut ops = prologue.ops;
    ops.extend(rebased);
    let mut constants = prologue.constants;
    constants.extend(body.constants.drain(..));
    let mut names = prologue.names;
    names.extend(body.names.drain(..));
    let mut lines = prologue.lines;
    lines.extend(body.lines.iter().map(|(pc, line)| (pc + op_offset, *line)));
    CodeUnit {
        ops,
        constants,
        names,
        local_count: prologue.local_count,
        cell_count: prologue.cell_count,
        strict: body.strict,
        lines,
    }
}

fn rebase_op(op: Op, pc: u32, constants: u32, names: u32) -> Op {
    match op {
        Op::Jump(t) => Op::Jump(t + pc),
        Op::JumpIfFalse(t) => Op::JumpIfFalse(t + pc),
        Op::JumpIfTrue(t) => Op::JumpIfTrue(t + pc),
        Op::JumpIfNullish(t) => Op::JumpIfNullish(t + pc),
        Op::TryPush { catch_pc } => Op::TryPush { catch_pc: catch_pc + pc },
        Op::Const(i) => Op::Const(i + constants),
        Op::MakeFunction(i) => Op::MakeFunction(i + constants),
        Op::MakeClass(i) => Op::MakeClass(i + constants),
        Op::GetProp(i) => Op::GetProp(i + names),
        Op::SetProp(i) => Op::SetProp(i + names),
        Op::LoadGlobal(i) => Op::LoadGlobal(i + names),
        Op::StoreGlobal(i) => Op::StoreGlobal(i + names),
        Op::CallMethod { name, argc } => Op::CallMethod { name: name + names, argc },
        Op::CallMethodSpread { name } => Op::CallMethodSpread { name: name + names },
        Op::LoadNamespaceMember { ns, member } => {
            Op::LoadNamespaceMember { ns: ns + names, member: member + names }
        }
        Op::LoadSuperMethod(i) => Op::LoadSuperMethod(i + names),
        other => other,
    }
}

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn const_fold_number(expr: &Expr, values: &FxHashMap<String, f64>) -> Option<f64> {
    match &expr.kind {
        ExprKind::Literal(Literal::Number(n)) => Some(*n),
        ExprKind::Grouping(inner) => const_fold_number(inner, values),
        ExprKind::Variable(name) => values.get(name).copied(),
        ExprKind::Unary { op: UnaryOp::Minus, operand } => {
            const_fold_number(operand, values).map(|n| -n)
        }
        ExprKind::Unary { op: UnaryOp::BitNot, operand } => {
            const_fold_number(operand, values).map(|n| !(n as i64 as i32) as f64)
        }
        ExprKind::Binary { op, left, right } => {
            let a = const_fold_number(left, values)?;
            let b = const_fold_number(right, values)?;
            Some(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Pow => a.powf(b),
                BinaryOp::BitAnd => ((a as i64 as i32) & (b as i64 as i32)) as f64,
                BinaryOp::BitOr => ((a as i64 as i32) | (b as i64 as i32)) as f64,
                BinaryOp::BitXor => ((a as i64 as i32) ^ (b as i64 as i32)) as f64,
                BinaryOp::Shl => (((a as i64 as i32) << ((b as i64 as u32) & 31)) as i32) as f64,
                BinaryOp::Shr => ((a as i64 as i32) >> ((b as i64 as u32) & 31)) as f64,
                _ => return None,
            })
        }
        _ => None,
    }
}

/// Names declared directly by a statement (no recursion into functions).
fn collect_declared(stmt: &Stmt, out: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::Var { name, .. } | StmtKind::Const { name, .. } | StmtKind::Using { name, .. } => {
            out.push(name.clone());
        }
        StmtKind::Function(f) => {
            if let Some(name) = &f.name {
                out.push(name.clone());
            }
        }
        StmtKind::Class(c) => out.push(c.name.clone()),
        StmtKind::Enum(e) => out.push(e.name.clone()),
        StmtKind::Namespace { name, .. } => out.push(name.clone()),
        StmtKind::Sequence(stmts) => {
            for inner in stmts {
                collect_declared(inner, out);
            }
        }
        _ => {}
    }
}

/// The set of names declared in this body that nested functions reference;
/// those become cells.
fn captured_names_of(body: &[Stmt], params: &[&str]) -> FxHashSet<String> {
    let mut declared: Vec<String> = params.iter().map(|s| s.to_string()).collect();
    collect_all_declared(body, &mut declared);
    let mut free = FxHashSet::default();
    for stmt in body {
        collect_nested_free(stmt, &mut free);
    }
    declared.into_iter().filter(|n| free.contains(n)).collect()
}

fn collect_all_declared(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Block(inner) | StmtKind::Sequence(inner) => collect_all_declared(inner, out),
            StmtKind::Labeled { body, .. } => collect_all_declared(std::slice::from_ref(body), out),
            StmtKind::If { then_branch, else_branch, .. } => {
                collect_all_declared(std::slice::from_ref(then_branch), out);
                if let Some(e) = else_branch {
                    collect_all_declared(std::slice::from_ref(e), out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
                collect_all_declared(std::slice::from_ref(body), out);
            }
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    collect_all_declared(std::slice::from_ref(init), out);
                }
                collect_all_declared(std::slice::from_ref(body), out);
            }
            StmtKind::ForOf { name, body, .. } | StmtKind::ForIn { name, body, .. } => {
                out.push(name.clone());
                collect_all_declared(std::slice::from_ref(body), out);
            }
            StmtKind::Switch { cases, .. } => {
                for case in cases {
                    collect_all_declared(&case.body, out);
                }
            }
            StmtKind::TryCatch { try_block, catch_param, catch_block, finally_block } => {
                collect_all_declared(try_block, out);
                if let Some(p) = catch_param {
                    out.push(p.clone());
                }
                if let Some(c) = catch_block {
                    collect_all_declared(c, out);
                }
                if let Some(f) = finally_block {
                    collect_all_declared(f, out);
                }
            }
            StmtKind::Export(inner) => collect_all_declared(std::slice::from_ref(inner), out),
            other => {
                let _ = other;
                collect_declared(stmt, out);
            }
        }
    }
}

/// Free variables referenced by functions nested inside `stmt`.
fn collect_nested_free(stmt: &Stmt, out: &mut FxHashSet<String>) {
    visit_stmt_exprs(stmt, &mut |expr| {
        if let ExprKind::ArrowFunction(decl) = &expr.kind {
            free_variables(decl, out);
        }
    });
    // Nested function declarations and class methods also capture.
    match &stmt.kind {
        StmtKind::Function(decl) => free_variables(decl, out),
        StmtKind::Class(decl) => {
            for member in &decl.members {
                match member {
                    ClassMember::Method { func, .. }
                    | ClassMember::Getter { func, .. }
                    | ClassMember::Setter { func, .. } => free_variables(func, out),
                    ClassMember::Field { init: Some(init), .. } => {
                        visit_expr(init, &mut |e| {
                            if let ExprKind::ArrowFunction(decl) = &e.kind {
                                free_variables(decl, out);
                            }
                        });
                    }
                    _ => {}
                }
            }
        }
        StmtKind::Block(inner) | StmtKind::Sequence(inner) => {
            for s in inner {
                collect_nested_free(s, out);
            }
        }
        StmtKind::Labeled { body, .. }
        | StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::ForOf { body, .. }
        | StmtKind::ForIn { body, .. } => collect_nested_free(body, out),
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                collect_nested_free(init, out);
            }
            collect_nested_free(body, out);
        }
        StmtKind::If { then_branch, else_branch, .. } => {
            collect_nested_free(then_branch, out);
            if let Some(e) = else_branch {
                collect_nested_free(e, out);
            }
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                for s in &case.body {
                    collect_nested_free(s, out);
                }
            }
        }
        StmtKind::TryCatch { try_block, catch_block, finally_block, .. } => {
            for s in try_block {
                collect_nested_free(s, out);
            }
            if let Some(c) = catch_block {
                for s in c {
                    collect_nested_free(s, out);
                }
            }
            if let Some(f) = finally_block {
                for s in f {
                    collect_nested_free(s, out);
                }
            }
        }
        StmtKind::Namespace { body, .. } => {
            for s in body {
                collect_nested_free(s, out);
            }
        }
        StmtKind::Export(inner) => collect_nested_free(inner, out),
        _ => {}
    }
}

/// All variable names a function references (conservatively, including its
/// own locals; the caller intersects with the enclosing declarations).
fn free_variables(decl: &Rc<FunctionDecl>, out: &mut FxHashSet<String>) {
    let Some(body) = &decl.body else { return };
    for param in &decl.params {
        if let Some(default) = &param.default {
            visit_expr(default, &mut |e| {
                if let ExprKind::Variable(name) = &e.kind {
                    out.insert(name.clone());
                }
            });
        }
    }
    for stmt in body {
        visit_stmt_exprs(stmt, &mut |expr| match &expr.kind {
            ExprKind::Variable(name) => {
                out.insert(name.clone());
            }
            ExprKind::Assign { name, .. }
            | ExprKind::CompoundAssign { name, .. }
            | ExprKind::LogicalAssign { name, .. } => {
                out.insert(name.clone());
            }
            ExprKind::ArrowFunction(nested) => free_variables(nested, out),
            _ => {}
        });
        // Statement-level nesting.
        collect_nested_free(stmt, out);
    }
}

/// Visit every expression in a statement tree (not descending into nested
/// function bodies).
fn visit_stmt_exprs(stmt: &Stmt, f: &mut impl FnMut(&Expr)) {
    let mut visit_opt = |e: &Option<Expr>, f: &mut dyn FnMut(&Expr)| {
        if let Some(e) = e {
            visit_expr(e, f);
        }
    };
    match &stmt.kind {
        StmtKind::Expression(e) | StmtKind::Throw(e) => visit_expr(e, f),
        StmtKind::Var { init, .. } => visit_opt(init, f),
        StmtKind::Const { init, .. } => visit_expr(init, f),
        StmtKind::Using { init, .. } => visit_expr(init, f),
        StmtKind::Return(value) => visit_opt(value, f),
        StmtKind::If { cond, then_branch, else_branch } => {
            visit_expr(cond, f);
            visit_stmt_exprs(then_branch, f);
            if let Some(e) = else_branch {
                visit_stmt_exprs(e, f);
            }
        }
        StmtKind::While { cond, body } => {
            visit_expr(cond, f);
            visit_stmt_exprs(body, f);
        }
        StmtKind::DoWhile { body, cond } => {
            visit_stmt_exprs(body, f);
            visit_expr(cond, f);
        }
        StmtKind::For { init, cond, update, body } => {
            if let Some(init) = init {
                visit_stmt_exprs(init, f);
            }
            visit_opt(cond, f);
            visit_opt(update, f);
            visit_stmt_exprs(body, f);
        }
        StmtKind::ForOf { iterable, body, .. } => {
            visit_expr(iterable, f);
            visit_stmt_exprs(body, f);
        }
        StmtKind::ForIn { object, body, .. } => {
            visit_expr(object, f);
            visit_stmt_exprs(body, f);
        }
        StmtKind::Block(stmts) | StmtKind::Sequence(stmts) => {
            for s in stmts {
                visit_stmt_exprs(s, f);
            }
        }
        StmtKind::Labeled { body, .. } => visit_stmt_exprs(body, f),
        StmtKind::Switch { discriminant, cases } => {
            visit_expr(discriminant, f);
            for case in cases {
                if let Some(test) = &case.test {
                    visit_expr(test, f);
                }
                for s in &case.body {
                    visit_stmt_exprs(s, f);
                }
            }
        }
        StmtKind::TryCatch { try_block, catch_block, finally_block, .. } => {
            for s in try_block {
                visit_stmt_exprs(s, f);
            }
            if let Some(c) = catch_block {
                for s in c {
                    visit_stmt_exprs(s, f);
                }
            }
            if let Some(fin) = finally_block {
                for s in fin {
                    visit_stmt_exprs(s, f);
                }
            }
        }
        StmtKind::Namespace { body, .. } => {
            for s in body {
                visit_stmt_exprs(s, f);
            }
        }
        StmtKind::Export(inner) => visit_stmt_exprs(inner, f),
        StmtKind::Class(decl) => {
            if let Some(superclass) = &decl.superclass {
                visit_expr(superclass, f);
            }
            for member in &decl.members {
                if let ClassMember::Field { init: Some(init), .. } = member {
                    visit_expr(init, f);
                }
            }
        }
        _ => {}
    }
}

/// Visit every sub-expression (not descending into nested function bodies).
fn visit_expr(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Binary { left, right, .. }
        | ExprKind::Logical { left, right, .. }
        | ExprKind::NullishCoalescing { left, right } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        ExprKind::Ternary { cond, then_branch, else_branch } => {
            visit_expr(cond, f);
            visit_expr(then_branch, f);
            visit_expr(else_branch, f);
        }
        ExprKind::Unary { operand, .. } => visit_expr(operand, f),
        ExprKind::Assign { value, .. }
        | ExprKind::CompoundAssign { value, .. }
        | ExprKind::LogicalAssign { value, .. } => visit_expr(value, f),
        ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
            visit_expr(callee, f);
            for arg in args {
                visit_expr(arg, f);
            }
        }
        ExprKind::Get { object, .. } => visit_expr(object, f),
        ExprKind::Set { object, value, .. } => {
            visit_expr(object, f);
            visit_expr(value, f);
        }
        ExprKind::GetIndex { object, index } => {
            visit_expr(object, f);
            visit_expr(index, f);
        }
        ExprKind::SetIndex { object, index, value } => {
            visit_expr(object, f);
            visit_expr(index, f);
            visit_expr(value, f);
        }
        ExprKind::CompoundSet { object, value, .. } | ExprKind::LogicalSet { object, value, .. } => {
            visit_expr(object, f);
            visit_expr(value, f);
        }
        ExprKind::CompoundSetIndex { object, index, value, .. }
        | ExprKind::LogicalSetIndex { object, index, value, .. } => {
            visit_expr(object, f);
            visit_expr(index, f);
            visit_expr(value, f);
        }
        ExprKind::PrefixIncrement { target, .. } | ExprKind::PostfixIncrement { target, .. } => {
            visit_expr(target, f);
        }
        ExprKind::ArrayLiteral(items) => {
            for item in items {
                visit_expr(item, f);
            }
        }
        ExprKind::ObjectLiteral(props) => {
            for prop in props {
                match prop {
                    ObjectProp::Entry { key, value } => {
                        if let PropKey::Computed(key) = key {
                            visit_expr(key, f);
                        }
                        visit_expr(value, f);
                    }
                    ObjectProp::Spread(inner) => visit_expr(inner, f),
                }
            }
        }
        ExprKind::Spread(inner)
        | ExprKind::Grouping(inner)
        | ExprKind::Await(inner)
        | ExprKind::DynamicImport(inner) => visit_expr(inner, f),
        ExprKind::TemplateLiteral { exprs, .. } => {
            for e in exprs {
                visit_expr(e, f);
            }
        }
        ExprKind::TypeAssertion { expr: inner, .. } => visit_expr(inner, f),
        ExprKind::Yield { value, .. } => {
            if let Some(value) = value {
                visit_expr(value, f);
            }
        }
        _ => {}
    }
}
