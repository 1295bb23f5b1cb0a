//! Statement execution.
//!
//! Every executor returns a `Completion`. Loops intercept the break/continue
//! completions addressed to them (unlabeled, or labeled with their own
//! label); `try/catch/finally` funnels every exit path through the finally
//! block; scopes drain their `using` disposal stack in LIFO order on every
//! way out.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use tsr_parser::ast::*;
use tsr_runtime::error::make_error;
use tsr_runtime::members::{self, read_iterator_result, IterSource};
use tsr_runtime::ops::{strict_equals, truthy};
use tsr_runtime::value::{FunctionValue, Value};
use tsr_runtime::{LocalBoxFuture, RuntimeEnv};

use crate::completion::{propagate, throw_on_err, Completion};
use crate::interp::{Ctx, Interpreter};

/// The `using` disposal stack of one scope.
pub(crate) type Disposals = RefCell<Vec<Value>>;

impl Interpreter {
    /// Execute a statement list as one scope: function declarations hoist,
    /// `using` registrations dispose LIFO on every exit path.
    pub(crate) fn exec_stmts<'a>(
        &'a self,
        stmts: &'a [Stmt],
        env: &'a RuntimeEnv,
        ctx: &'a Ctx,
    ) -> LocalBoxFuture<'a, Completion> {
        Box::pin(async move {
            let disposals: Disposals = RefCell::new(Vec::new());
            self.hoist_functions(stmts, env, ctx);
            let mut completion = Completion::Normal;
            for stmt in stmts {
                let step = self.exec_stmt(stmt, env, ctx, &disposals).await;
                if step.is_abrupt() {
                    completion = step;
                    break;
                }
            }
            self.run_disposals(&disposals, completion).await
        })
    }

    /// Function declarations are visible before their statement executes.
    fn hoist_functions(&self, stmts: &[Stmt], env: &RuntimeEnv, ctx: &Ctx) {
        for stmt in stmts {
            let inner = match &stmt.kind {
                StmtKind::Export(inner) => inner.as_ref(),
                _ => stmt,
            };
            if let StmtKind::Function(decl) = &inner.kind {
                if decl.body.is_none() {
                    continue;
                }
                if let Some(name) = &decl.name {
                    env.define(name, self.make_function(decl, env, ctx));
                }
            }
        }
    }

    pub(crate) fn make_function(&self, decl: &Rc<FunctionDecl>, env: &RuntimeEnv, ctx: &Ctx) -> Value {
        Value::Function(Rc::new(FunctionValue {
            decl: Rc::clone(decl),
            env: env.clone(),
            home_class: RefCell::new(ctx.home_class.clone()),
        }))
    }

    /// Drain a scope's disposal stack in reverse registration order. The
    /// original completion survives unless disposal itself throws; a
    /// disposal error wins over normal completion, and later disposal
    /// errors are recorded as suppressed on the first.
    async fn run_disposals(&self, disposals: &Disposals, completion: Completion) -> Completion {
        let mut resources = std::mem::take(&mut *disposals.borrow_mut());
        if resources.is_empty() {
            return completion;
        }
        let mut failure: Option<Value> = None;
        while let Some(resource) = resources.pop() {
            if let Err(error) = self.dispose_resource(&resource).await {
                match &failure {
                    None => failure = Some(error),
                    Some(first) => {
                        if let Value::Object(obj) = first {
                            let mut props = obj.props.borrow_mut();
                            let suppressed = props
                                .entry("suppressed".to_string())
                                .or_insert_with(|| Value::array(Vec::new()));
                            if let Value::Array(list) = suppressed {
                                list.borrow_mut().push(error);
                            }
                        }
                    }
                }
            }
        }
        match failure {
            Some(error) => Completion::Throw(error),
            None => completion,
        }
    }

    pub(crate) fn exec_stmt<'a>(
        &'a self,
        stmt: &'a Stmt,
        env: &'a RuntimeEnv,
        ctx: &'a Ctx,
        disposals: &'a Disposals,
    ) -> LocalBoxFuture<'a, Completion> {
        Box::pin(async move { self.exec_inner(stmt, env, ctx, disposals).await })
    }

    async fn exec_inner(
        &self,
        stmt: &Stmt,
        env: &RuntimeEnv,
        ctx: &Ctx,
        disposals: &Disposals,
    ) -> Completion {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                throw_on_err!(self.eval_expr(expr, env, ctx).await);
                Completion::Normal
            }
            StmtKind::Var { name, init, .. } => {
                let value = match init {
                    Some(init) => throw_on_err!(self.eval_expr(init, env, ctx).await),
                    None => Value::Undefined,
                };
                env.define(name, value);
                Completion::Normal
            }
            StmtKind::Const { name, init, .. } => {
                let value = throw_on_err!(self.eval_expr(init, env, ctx).await);
                env.define(name, value);
                Completion::Normal
            }
            StmtKind::Using { name, init } => {
                let value = throw_on_err!(self.eval_expr(init, env, ctx).await);
                // Null/undefined initializers are bound but never disposed.
                if !value.is_nullish() {
                    disposals.borrow_mut().push(value.clone());
                }
                env.define(name, value);
                Completion::Normal
            }
            StmtKind::Function(decl) => {
                // Already hoisted; overload signatures have no effect.
                if decl.body.is_some() && decl.name.is_none() {
                    env.define("", self.make_function(decl, env, ctx));
                }
                Completion::Normal
            }
            StmtKind::Class(decl) => {
                let class = throw_on_err!(self.define_class(decl, env, ctx).await);
                env.define(&decl.name, class);
                Completion::Normal
            }
            StmtKind::Interface(_)
            | StmtKind::TypeAlias { .. }
            | StmtKind::Directive(_)
            | StmtKind::DeclareModule { .. }
            | StmtKind::DeclareGlobal { .. } => Completion::Normal,
            StmtKind::Enum(decl) => {
                env.define(&decl.name, self.build_enum_object(decl));
                Completion::Normal
            }
            StmtKind::Namespace { name, body } => self.exec_namespace(name, body, env, ctx).await,
            StmtKind::Block(stmts) => {
                let block_env = env.child();
                self.exec_stmts(stmts, &block_env, ctx).await
            }
            StmtKind::Sequence(stmts) => {
                // Desugaring product: runs in the enclosing scope and
                // disposal context.
                for inner in stmts {
                    propagate!(self.exec_stmt(inner, env, ctx, disposals).await);
                }
                Completion::Normal
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => throw_on_err!(self.eval_expr(expr, env, ctx).await),
                    None => Value::Undefined,
                };
                Completion::Return(value)
            }
            StmtKind::Throw(expr) => {
                let value = throw_on_err!(self.eval_expr(expr, env, ctx).await);
                Completion::Throw(value)
            }
            StmtKind::Break(label) => Completion::Break(label.clone()),
            StmtKind::Continue(label) => Completion::Continue(label.clone()),
            StmtKind::If { cond, then_branch, else_branch } => {
                let cond = throw_on_err!(self.eval_expr(cond, env, ctx).await);
                if truthy(&cond) {
                    self.exec_stmt(then_branch, env, ctx, disposals).await
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch, env, ctx, disposals).await
                } else {
                    Completion::Normal
                }
            }
            StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
            | StmtKind::ForOf { .. }
            | StmtKind::ForIn { .. } => self.exec_loop(stmt, env, ctx, None).await,
            StmtKind::Labeled { label, body } => {
                let completion = match &body.kind {
                    StmtKind::While { .. }
                    | StmtKind::DoWhile { .. }
                    | StmtKind::For { .. }
                    | StmtKind::ForOf { .. }
                    | StmtKind::ForIn { .. } => {
                        self.exec_loop(body, env, ctx, Some(label.as_str())).await
                    }
                    _ => self.exec_stmt(body, env, ctx, disposals).await,
                };
                // A labeled break addressed to this statement stops here.
                match completion {
                    Completion::Break(Some(l)) if l == *label => Completion::Normal,
                    other => other,
                }
            }
            StmtKind::Switch { discriminant, cases } => {
                self.exec_switch(discriminant, cases, env, ctx).await
            }
            StmtKind::TryCatch { try_block, catch_param, catch_block, finally_block } => {
                self.exec_try(try_block, catch_param.as_deref(), catch_block.as_deref(), finally_block.as_deref(), env, ctx)
                    .await
            }
            StmtKind::Import { specs, namespace, path } => {
                let module = match self.module(path) {
                    Some(module) => module,
                    None => {
                        return Completion::Throw(make_error(
                            "Error",
                            format!("Cannot find module '{path}'"),
                        ));
                    }
                };
                if let Some(ns) = namespace {
                    env.define(ns, module.clone());
                }
                for spec in specs {
                    let value = throw_on_err!(members::get_index(
                        &module,
                        &Value::str(spec.name.clone())
                    ));
                    let bound = spec.alias.as_ref().unwrap_or(&spec.name);
                    env.define(bound, value);
                }
                Completion::Normal
            }
            StmtKind::ImportAlias { name, target } => {
                let mut current = match self.lookup_variable(env, &target[0]) {
                    Some(v) => v,
                    None => {
                        return Completion::Throw(make_error(
                            "ReferenceError",
                            format!("{} is not defined", target[0]),
                        ));
                    }
                };
                for part in &target[1..] {
                    current =
                        throw_on_err!(members::get_index(&current, &Value::str(part.clone())));
                }
                env.define(name, current);
                Completion::Normal
            }
            StmtKind::Export(inner) => self.exec_stmt(inner, env, ctx, disposals).await,
        }
    }

    // =========================================================================
    // Loops
    // =========================================================================

    async fn exec_loop(
        &self,
        stmt: &Stmt,
        env: &RuntimeEnv,
        ctx: &Ctx,
        label: Option<&str>,
    ) -> Completion {
        match &stmt.kind {
            StmtKind::While { cond, body } => {
                loop {
                    let c = throw_on_err!(self.eval_expr(cond, env, ctx).await);
                    if !truthy(&c) {
                        break;
                    }
                    let completion = self.exec_iteration(body, env, ctx).await;
                    match self.loop_step(completion, label) {
                        LoopStep::Continue => {}
                        LoopStep::Break => break,
                        LoopStep::Propagate(c) => return c,
                    }
                }
                Completion::Normal
            }
            StmtKind::DoWhile { body, cond } => {
                loop {
                    let completion = self.exec_iteration(body, env, ctx).await;
                    match self.loop_step(completion, label) {
                        LoopStep::Continue => {}
                        LoopStep::Break => break,
                        LoopStep::Propagate(c) => return c,
                    }
                    let c = throw_on_err!(self.eval_expr(cond, env, ctx).await);
                    if !truthy(&c) {
                        break;
                    }
                }
                Completion::Normal
            }
            StmtKind::For { init, cond, update, body } => {
                let loop_env = env.child();
                if let Some(init) = init {
                    let disposals: Disposals = RefCell::new(Vec::new());
                    propagate!(self.exec_stmt(init, &loop_env, ctx, &disposals).await);
                }
                loop {
                    if let Some(cond) = cond {
                        let c = throw_on_err!(self.eval_expr(cond, &loop_env, ctx).await);
                        if !truthy(&c) {
                            break;
                        }
                    }
                    let completion = self.exec_iteration(body, &loop_env, ctx).await;
                    match self.loop_step(completion, label) {
                        // Continue still runs the update expression.
                        LoopStep::Continue => {}
                        LoopStep::Break => break,
                        LoopStep::Propagate(c) => return c,
                    }
                    if let Some(update) = update {
                        throw_on_err!(self.eval_expr(update, &loop_env, ctx).await);
                    }
                }
                Completion::Normal
            }
            StmtKind::ForOf { name, iterable, body, is_await } => {
                self.exec_for_of(name, iterable, body, *is_await, env, ctx, label).await
            }
            StmtKind::ForIn { name, object, body } => {
                let target = throw_on_err!(self.eval_expr(object, env, ctx).await);
                for key in members::enumerate_keys(&target) {
                    let iter_env = env.child();
                    iter_env.define(name, Value::str(key));
                    let completion = self.exec_iteration_in(body, &iter_env, ctx).await;
                    match self.loop_step(completion, label) {
                        LoopStep::Continue => {}
                        LoopStep::Break => break,
                        LoopStep::Propagate(c) => return c,
                    }
                }
                Completion::Normal
            }
            _ => unreachable!("exec_loop on non-loop"),
        }
    }

    async fn exec_iteration(&self, body: &Stmt, env: &RuntimeEnv, ctx: &Ctx) -> Completion {
        let iter_env = env.child();
        self.exec_iteration_in(body, &iter_env, ctx).await
    }

    async fn exec_iteration_in(&self, body: &Stmt, env: &RuntimeEnv, ctx: &Ctx) -> Completion {
        let disposals: Disposals = RefCell::new(Vec::new());
        let completion = self.exec_stmt(body, env, ctx, &disposals).await;
        self.run_disposals(&disposals, completion).await
    }

    fn loop_step(&self, completion: Completion, label: Option<&str>) -> LoopStep {
        if completion.is_loop_continue(label) {
            return LoopStep::Continue;
        }
        if completion.is_loop_break(label) {
            return LoopStep::Break;
        }
        match completion {
            Completion::Normal => LoopStep::Continue,
            other => LoopStep::Propagate(other),
        }
    }

    async fn exec_for_of(
        &self,
        name: &str,
        iterable: &Expr,
        body: &Stmt,
        is_await: bool,
        env: &RuntimeEnv,
        ctx: &Ctx,
        label: Option<&str>,
    ) -> Completion {
        let subject = throw_on_err!(self.eval_expr(iterable, env, ctx).await);
        let source = throw_on_err!(members::iter_source(&subject, is_await));
        match source {
            IterSource::Values(values) => {
                for mut value in values {
                    // Inside `for await-of` over a sync iterable, promise
                    // elements are awaited; everything else passes through.
                    if is_await {
                        if let Value::Promise(p) = &value {
                            let p = Rc::clone(p);
                            value =
                                throw_on_err!(self.scheduler_handle().await_promise(p).await);
                        }
                    }
                    let iter_env = env.child();
                    iter_env.define(name, value);
                    let completion = self.exec_iteration_in(body, &iter_env, ctx).await;
                    match self.loop_step(completion, label) {
                        LoopStep::Continue => {}
                        LoopStep::Break => break,
                        LoopStep::Propagate(c) => return c,
                    }
                }
                Completion::Normal
            }
            IterSource::Generator(generator) => {
                let generator = Value::Generator(generator);
                self.drive_iterator(&generator, name, body, is_await, env, ctx, label).await
            }
            IterSource::Factory(factory) => {
                let iterator = throw_on_err!(
                    self.invoke(&factory, subject.clone(), Vec::new(), ctx).await
                );
                self.drive_iterator(&iterator, name, body, is_await, env, ctx, label).await
            }
            IterSource::IteratorObject(iterator) => {
                self.drive_iterator(&iterator, name, body, is_await, env, ctx, label).await
            }
        }
    }

    /// Drive an iterator object by repeatedly calling `.next()`, awaiting
    /// each result in `for await-of`.
    async fn drive_iterator(
        &self,
        iterator: &Value,
        name: &str,
        body: &Stmt,
        is_await: bool,
        env: &RuntimeEnv,
        ctx: &Ctx,
        label: Option<&str>,
    ) -> Completion {
        loop {
            let next = throw_on_err!(members::get_index(iterator, &Value::str("next")));
            let mut result =
                throw_on_err!(self.invoke(&next, iterator.clone(), Vec::new(), ctx).await);
            if let Value::Promise(p) = &result {
                if is_await {
                    let p = Rc::clone(p);
                    result = throw_on_err!(self.scheduler_handle().await_promise(p).await);
                }
            }
            let (value, done) = throw_on_err!(read_iterator_result(&result));
            if done {
                return Completion::Normal;
            }
            let iter_env = env.child();
            iter_env.define(name, value);
            let completion = self.exec_iteration_in(body, &iter_env, ctx).await;
            match self.loop_step(completion, label) {
                LoopStep::Continue => {}
                LoopStep::Break => return Completion::Normal,
                LoopStep::Propagate(c) => return c,
            }
        }
    }

    // =========================================================================
    // Switch / try
    // =========================================================================

    async fn exec_switch(
        &self,
        discriminant: &Expr,
        cases: &[SwitchCase],
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> Completion {
        let subject = throw_on_err!(self.eval_expr(discriminant, env, ctx).await);
        let switch_env = env.child();
        let disposals: Disposals = RefCell::new(Vec::new());

        // Find the first matching case, falling back to `default`.
        let mut start = None;
        for (i, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let test = throw_on_err!(self.eval_expr(test, &switch_env, ctx).await);
                if strict_equals(&subject, &test) {
                    start = Some(i);
                    break;
                }
            }
        }
        if start.is_none() {
            start = cases.iter().position(|c| c.test.is_none());
        }
        let Some(start) = start else { return Completion::Normal };

        // Fall through until a break or the end.
        let mut completion = Completion::Normal;
        'cases: for case in &cases[start..] {
            for stmt in &case.body {
                let step = self.exec_stmt(stmt, &switch_env, ctx, &disposals).await;
                match step {
                    Completion::Normal => {}
                    Completion::Break(None) => break 'cases,
                    other => {
                        completion = other;
                        break 'cases;
                    }
                }
            }
        }
        self.run_disposals(&disposals, completion).await
    }

    async fn exec_try(
        &self,
        try_block: &[Stmt],
        catch_param: Option<&str>,
        catch_block: Option<&[Stmt]>,
        finally_block: Option<&[Stmt]>,
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> Completion {
        let try_env = env.child();
        let mut completion = self.exec_stmts(try_block, &try_env, ctx).await;

        if let Completion::Throw(error) = completion {
            match catch_block {
                Some(catch_block) => {
                    // The catch parameter binds in a fresh scope.
                    let catch_env = env.child();
                    if let Some(param) = catch_param {
                        catch_env.define(param, error);
                    }
                    completion = self.exec_stmts(catch_block, &catch_env, ctx).await;
                }
                None => completion = Completion::Throw(error),
            }
        }

        // The finally block runs on every exit path; its own abrupt
        // completion overrides the pending one.
        if let Some(finally_block) = finally_block {
            let finally_env = env.child();
            let finally_completion = self.exec_stmts(finally_block, &finally_env, ctx).await;
            if finally_completion.is_abrupt() {
                return finally_completion;
            }
        }
        completion
    }

    // =========================================================================
    // Enums and namespaces
    // =========================================================================

    /// Build the enum object: member → value, plus reverse mappings for
    /// numeric members of non-const enums.
    fn build_enum_object(&self, decl: &EnumDecl) -> Value {
        let mut props: IndexMap<String, Value> = IndexMap::new();
        let mut next_auto = 0.0f64;
        for member in &decl.members {
            let value = match &member.init {
                None => Value::Number(next_auto),
                Some(init) => match Self::const_fold_enum(init, &props) {
                    Some(v) => v,
                    None => Value::Number(next_auto),
                },
            };
            if let Value::Number(n) = &value {
                next_auto = n + 1.0;
                if !decl.is_const {
                    props.insert(
                        tsr_runtime::ops::number_to_string(*n),
                        Value::str(member.name.clone()),
                    );
                }
            }
            props.insert(member.name.clone(), value);
        }
        let obj = Value::object(props);
        members::freeze_value(&obj);
        obj
    }

    /// The constant subset of enum initializers the checker admitted.
    fn const_fold_enum(expr: &Expr, members_so_far: &IndexMap<String, Value>) -> Option<Value> {
        match &expr.kind {
            ExprKind::Literal(Literal::Number(n)) => Some(Value::Number(*n)),
            ExprKind::Literal(Literal::String(s)) => Some(Value::str(s.clone())),
            ExprKind::Grouping(inner) => Self::const_fold_enum(inner, members_so_far),
            ExprKind::Variable(name) => members_so_far.get(name).cloned(),
            ExprKind::Unary { op: UnaryOp::Minus, operand } => {
                match Self::const_fold_enum(operand, members_so_far)? {
                    Value::Number(n) => Some(Value::Number(-n)),
                    _ => None,
                }
            }
            ExprKind::Unary { op: UnaryOp::BitNot, operand } => {
                match Self::const_fold_enum(operand, members_so_far)? {
                    Value::Number(n) => Some(Value::Number(!(n as i64 as i32) as f64)),
                    _ => None,
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = Self::const_fold_enum(left, members_so_far)?;
                let r = Self::const_fold_enum(right, members_so_far)?;
                match (&l, &r) {
                    (Value::Number(a), Value::Number(b)) => {
                        let v = match op {
                            BinaryOp::Add => a + b,
                            BinaryOp::Sub => a - b,
                            BinaryOp::Mul => a * b,
                            BinaryOp::Div => a / b,
                            BinaryOp::Rem => a % b,
                            BinaryOp::Pow => a.powf(*b),
                            BinaryOp::BitAnd => ((*a as i64 as i32) & (*b as i64 as i32)) as f64,
                            BinaryOp::BitOr => ((*a as i64 as i32) | (*b as i64 as i32)) as f64,
                            BinaryOp::BitXor => ((*a as i64 as i32) ^ (*b as i64 as i32)) as f64,
                            BinaryOp::Shl => (((*a as i64 as i32) << ((*b as i64 as u32) & 31)) as i32) as f64,
                            BinaryOp::Shr => ((*a as i64 as i32) >> ((*b as i64 as u32) & 31)) as f64,
                            _ => return None,
                        };
                        Some(Value::Number(v))
                    }
                    (Value::Str(a), Value::Str(b)) if matches!(op, BinaryOp::Add) => {
                        Some(Value::str(format!("{a}{b}")))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Execute a namespace body and bind (or merge into) the namespace
    /// object.
    async fn exec_namespace(
        &self,
        name: &str,
        body: &[Stmt],
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> Completion {
        let ns_env = env.child();
        propagate!(self.exec_stmts(body, &ns_env, ctx).await);

        let mut exported = IndexMap::new();
        for stmt in body {
            let inner = match &stmt.kind {
                StmtKind::Export(inner) => inner.as_ref(),
                _ => stmt,
            };
            for declared in crate::interp::declared_names(inner) {
                if let Some(value) = ns_env.lookup(&declared) {
                    exported.insert(declared, value);
                }
            }
        }

        // Namespace merging: a repeated declaration extends the existing
        // object.
        match env.lookup(name) {
            Some(Value::Object(existing)) => {
                existing.props.borrow_mut().extend(exported);
            }
            _ => {
                env.define(name, Value::object(exported));
            }
        }
        Completion::Normal
    }

    fn scheduler_handle(&self) -> Rc<tsr_runtime::Scheduler> {
        use tsr_runtime::Engine;
        self.scheduler()
    }
}

enum LoopStep {
    Continue,
    Break,
    Propagate(Completion),
}
