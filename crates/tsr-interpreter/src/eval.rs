//! Expression evaluation.
//!
//! Binary operators dispatch through the shared `ops` helpers, property and
//! index access through the shared member dispatch, so the VM backend
//! observes identical semantics. Built-in namespaces (`console.log`,
//! `Math.abs`) resolve through the registry before general property access.
//! Runtime errors pick up the expression's source line on the way out.

use std::rc::Rc;

use tsr_parser::ast::*;
use tsr_runtime::builtins;
use tsr_runtime::coroutine::YieldPoint;
use tsr_runtime::error::make_error;
use tsr_runtime::members::{self, IterSource, Property, SetOutcome};
use tsr_runtime::ops;
use tsr_runtime::value::{ObjectData, Value};
use tsr_runtime::{Engine, LocalBoxFuture, RtResult, RuntimeEnv};

use crate::interp::{Ctx, Interpreter};

impl Interpreter {
    pub(crate) fn eval_expr<'a>(
        &'a self,
        expr: &'a Expr,
        env: &'a RuntimeEnv,
        ctx: &'a Ctx,
    ) -> LocalBoxFuture<'a, RtResult<Value>> {
        Box::pin(async move {
            match self.eval_inner(expr, env, ctx).await {
                Err(error) => Err(attach_line(error, expr.line)),
                ok => ok,
            }
        })
    }

    async fn eval_inner(&self, expr: &Expr, env: &RuntimeEnv, ctx: &Ctx) -> RtResult<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_value(literal),
            ExprKind::Variable(name) => match self.lookup_variable(env, name) {
                Some(value) => Ok(value),
                None => Err(make_error("ReferenceError", format!("{name} is not defined"))),
            },
            ExprKind::Binary { op, left, right } => {
                let l = self.eval_expr(left, env, ctx).await?;
                let r = self.eval_expr(right, env, ctx).await?;
                apply_binary(*op, &l, &r)
            }
            ExprKind::Logical { op, left, right } => {
                let l = self.eval_expr(left, env, ctx).await?;
                match op {
                    LogicalOp::And => {
                        if ops::truthy(&l) {
                            self.eval_expr(right, env, ctx).await
                        } else {
                            Ok(l)
                        }
                    }
                    LogicalOp::Or => {
                        if ops::truthy(&l) {
                            Ok(l)
                        } else {
                            self.eval_expr(right, env, ctx).await
                        }
                    }
                }
            }
            ExprKind::NullishCoalescing { left, right } => {
                let l = self.eval_expr(left, env, ctx).await?;
                if l.is_nullish() {
                    self.eval_expr(right, env, ctx).await
                } else {
                    Ok(l)
                }
            }
            ExprKind::Ternary { cond, then_branch, else_branch } => {
                let c = self.eval_expr(cond, env, ctx).await?;
                if ops::truthy(&c) {
                    self.eval_expr(then_branch, env, ctx).await
                } else {
                    self.eval_expr(else_branch, env, ctx).await
                }
            }
            ExprKind::Unary { op, operand } => {
                // `typeof missing` reads as "undefined" instead of throwing.
                if let (UnaryOp::TypeOf, ExprKind::Variable(name)) = (op, &operand.kind) {
                    if self.lookup_variable(env, name).is_none() {
                        return Ok(Value::str("undefined"));
                    }
                }
                let v = self.eval_expr(operand, env, ctx).await?;
                match op {
                    UnaryOp::Minus => ops::negate(&v),
                    UnaryOp::Plus => Ok(Value::Number(ops::to_number(&v))),
                    UnaryOp::Not => Ok(Value::Bool(!ops::truthy(&v))),
                    UnaryOp::BitNot => ops::bit_not(&v),
                    UnaryOp::TypeOf => Ok(Value::str(ops::type_of(&v))),
                    UnaryOp::Void => Ok(Value::Undefined),
                }
            }
            ExprKind::Assign { name, value } => {
                let value = self.eval_expr(value, env, ctx).await?;
                self.assign_variable(env, name, value.clone(), ctx)?;
                Ok(value)
            }
            ExprKind::CompoundAssign { name, op, value } => {
                let current = self
                    .lookup_variable(env, name)
                    .ok_or_else(|| make_error("ReferenceError", format!("{name} is not defined")))?;
                let rhs = self.eval_expr(value, env, ctx).await?;
                let result = apply_binary(*op, &current, &rhs)?;
                self.assign_variable(env, name, result.clone(), ctx)?;
                Ok(result)
            }
            ExprKind::LogicalAssign { name, op, value } => {
                let current = self
                    .lookup_variable(env, name)
                    .ok_or_else(|| make_error("ReferenceError", format!("{name} is not defined")))?;
                let should_assign = match op {
                    LogicalAssignOp::And => ops::truthy(&current),
                    LogicalAssignOp::Or => !ops::truthy(&current),
                    LogicalAssignOp::Nullish => current.is_nullish(),
                };
                if should_assign {
                    let rhs = self.eval_expr(value, env, ctx).await?;
                    self.assign_variable(env, name, rhs.clone(), ctx)?;
                    Ok(rhs)
                } else {
                    Ok(current)
                }
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, env, ctx).await,
            ExprKind::New { callee, args } => {
                let target = self.eval_expr(callee, env, ctx).await?;
                let args = self.eval_args(args, env, ctx).await?;
                match target {
                    Value::Class(class) => self.construct(&class, args).await,
                    native @ Value::Native(_) => {
                        self.invoke(&native, Value::Undefined, args, ctx).await
                    }
                    other => Err(tsr_runtime::throw_type_error(format!(
                        "{} is not a constructor",
                        ops::to_display_string(&other)
                    ))),
                }
            }
            ExprKind::Get { object, name } => {
                // Registry namespaces win before general property access.
                if let ExprKind::Variable(ns) = &object.kind {
                    if env.lookup(ns).is_none() {
                        if let Some(member) = builtins::namespace_member(ns, name) {
                            return Ok(member);
                        }
                    }
                }
                if let ExprKind::Super = &object.kind {
                    return self.super_method(name, env, ctx);
                }
                let target = self.eval_expr(object, env, ctx).await?;
                self.get_member(&target, name, ctx).await
            }
            ExprKind::Set { object, name, value } => {
                let target = self.eval_expr(object, env, ctx).await?;
                let value = self.eval_expr(value, env, ctx).await?;
                self.set_member(&target, name, value.clone(), ctx).await?;
                Ok(value)
            }
            ExprKind::GetIndex { object, index } => {
                let target = self.eval_expr(object, env, ctx).await?;
                let index = self.eval_expr(index, env, ctx).await?;
                members::get_index(&target, &index)
            }
            ExprKind::SetIndex { object, index, value } => {
                let target = self.eval_expr(object, env, ctx).await?;
                let index = self.eval_expr(index, env, ctx).await?;
                let value = self.eval_expr(value, env, ctx).await?;
                members::set_index(&target, &index, value.clone(), ctx.strict)?;
                Ok(value)
            }
            ExprKind::CompoundSet { object, name, op, value } => {
                // The receiver is computed once and reused.
                let target = self.eval_expr(object, env, ctx).await?;
                let current = self.get_member(&target, name, ctx).await?;
                let rhs = self.eval_expr(value, env, ctx).await?;
                let result = apply_binary(*op, &current, &rhs)?;
                self.set_member(&target, name, result.clone(), ctx).await?;
                Ok(result)
            }
            ExprKind::CompoundSetIndex { object, index, op, value } => {
                let target = self.eval_expr(object, env, ctx).await?;
                let index = self.eval_expr(index, env, ctx).await?;
                let current = members::get_index(&target, &index)?;
                let rhs = self.eval_expr(value, env, ctx).await?;
                let result = apply_binary(*op, &current, &rhs)?;
                members::set_index(&target, &index, result.clone(), ctx.strict)?;
                Ok(result)
            }
            ExprKind::LogicalSet { object, name, op, value } => {
                let target = self.eval_expr(object, env, ctx).await?;
                let current = self.get_member(&target, name, ctx).await?;
                let should_assign = match op {
                    LogicalAssignOp::And => ops::truthy(&current),
                    LogicalAssignOp::Or => !ops::truthy(&current),
                    LogicalAssignOp::Nullish => current.is_nullish(),
                };
                if should_assign {
                    let rhs = self.eval_expr(value, env, ctx).await?;
                    self.set_member(&target, name, rhs.clone(), ctx).await?;
                    Ok(rhs)
                } else {
                    Ok(current)
                }
            }
            ExprKind::LogicalSetIndex { object, index, op, value } => {
                let target = self.eval_expr(object, env, ctx).await?;
                let index = self.eval_expr(index, env, ctx).await?;
                let current = members::get_index(&target, &index)?;
                let should_assign = match op {
                    LogicalAssignOp::And => ops::truthy(&current),
                    LogicalAssignOp::Or => !ops::truthy(&current),
                    LogicalAssignOp::Nullish => current.is_nullish(),
                };
                if should_assign {
                    let rhs = self.eval_expr(value, env, ctx).await?;
                    members::set_index(&target, &index, rhs.clone(), ctx.strict)?;
                    Ok(rhs)
                } else {
                    Ok(current)
                }
            }
            ExprKind::PrefixIncrement { target, negative } => {
                self.eval_increment(target, *negative, true, env, ctx).await
            }
            ExprKind::PostfixIncrement { target, negative } => {
                self.eval_increment(target, *negative, false, env, ctx).await
            }
            ExprKind::This => Ok(env.lookup("this").unwrap_or_default()),
            ExprKind::Super => Err(tsr_runtime::throw_type_error(
                "'super' is only valid in calls and member accesses",
            )),
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    match &element.kind {
                        ExprKind::Spread(inner) => {
                            let iterable = self.eval_expr(inner, env, ctx).await?;
                            values.extend(self.spread_values(&iterable, ctx).await?);
                        }
                        _ => values.push(self.eval_expr(element, env, ctx).await?),
                    }
                }
                Ok(Value::array(values))
            }
            ExprKind::ObjectLiteral(props) => self.eval_object_literal(props, env, ctx).await,
            ExprKind::Spread(inner) => self.eval_expr(inner, env, ctx).await,
            ExprKind::Grouping(inner) => self.eval_expr(inner, env, ctx).await,
            ExprKind::ArrowFunction(decl) => Ok(self.make_function(decl, env, ctx)),
            ExprKind::TemplateLiteral { strings, exprs } => {
                let mut out = String::new();
                for (i, chunk) in strings.iter().enumerate() {
                    out.push_str(chunk);
                    if let Some(part) = exprs.get(i) {
                        let value = self.eval_expr(part, env, ctx).await?;
                        out.push_str(&ops::to_display_string(&value));
                    }
                }
                Ok(Value::str(out))
            }
            ExprKind::TypeAssertion { expr: inner, .. } => self.eval_expr(inner, env, ctx).await,
            ExprKind::Await(inner) => {
                let value = self.eval_expr(inner, env, ctx).await?;
                match value {
                    // Rejections surface as throw completions so
                    // `try/catch` intercepts them.
                    Value::Promise(promise) => self.scheduler().await_promise(promise).await,
                    other => Ok(other),
                }
            }
            ExprKind::Yield { value, delegate } => {
                let channel = ctx.gen_channel.clone().ok_or_else(|| {
                    make_error("SyntaxError", "'yield' outside of a generator function")
                })?;
                if *delegate {
                    // `yield*`: forward every value of the inner iterable.
                    let inner = match value {
                        Some(value) => self.eval_expr(value, env, ctx).await?,
                        None => Value::Undefined,
                    };
                    let mut last = Value::Undefined;
                    for v in self.spread_values(&inner, ctx).await? {
                        last = YieldPoint::new(Rc::clone(&channel), v).await?;
                    }
                    return Ok(last);
                }
                let yielded = match value {
                    Some(value) => self.eval_expr(value, env, ctx).await?,
                    None => Value::Undefined,
                };
                YieldPoint::new(channel, yielded).await
            }
            ExprKind::DynamicImport(path) => {
                let path = self.eval_expr(path, env, ctx).await?;
                let path = ops::to_display_string(&path);
                let promise = match self.module(&path) {
                    Some(namespace) => {
                        tsr_runtime::value::PromiseData::fulfilled(namespace)
                    }
                    None => tsr_runtime::value::PromiseData::rejected(make_error(
                        "Error",
                        format!("Cannot find module '{path}'"),
                    )),
                };
                Ok(Value::Promise(promise))
            }
            ExprKind::RegexLiteral { pattern, flags } => builtins::compile_regex(pattern, flags),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    async fn eval_call(
        &self,
        callee: &Expr,
        args: &[Expr],
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> RtResult<Value> {
        // `super(...)`: run the superclass constructor against our `this`.
        if let ExprKind::Super = &callee.kind {
            let parent = self.super_class(ctx)?;
            let args = self.eval_args(args, env, ctx).await?;
            let this = env.lookup("this").unwrap_or_default();
            if let Some(Value::Function(ctor)) = parent.find_constructor() {
                self.run_function_body(&ctor, this, args, None).await?;
            }
            return Ok(Value::Undefined);
        }

        // Method call: the receiver is evaluated once and becomes `this`.
        if let ExprKind::Get { object, name } = &callee.kind {
            if let ExprKind::Variable(ns) = &object.kind {
                if env.lookup(ns).is_none() {
                    if let Some(member) = builtins::namespace_member(ns, name) {
                        let args = self.eval_args(args, env, ctx).await?;
                        return self.invoke(&member, Value::Undefined, args, ctx).await;
                    }
                }
            }
            if let ExprKind::Super = &object.kind {
                let method = self.super_method(name, env, ctx)?;
                let args = self.eval_args(args, env, ctx).await?;
                return self.invoke(&method, Value::Undefined, args, ctx).await;
            }
            let target = self.eval_expr(object, env, ctx).await?;
            let member = self.get_member(&target, name, ctx).await?;
            let args = self.eval_args(args, env, ctx).await?;
            return self.invoke(&member, target, args, ctx).await;
        }

        if let ExprKind::GetIndex { object, index } = &callee.kind {
            let target = self.eval_expr(object, env, ctx).await?;
            let index = self.eval_expr(index, env, ctx).await?;
            let member = members::get_index(&target, &index)?;
            let args = self.eval_args(args, env, ctx).await?;
            return self.invoke(&member, target, args, ctx).await;
        }

        let callee = self.eval_expr(callee, env, ctx).await?;
        let args = self.eval_args(args, env, ctx).await?;
        self.invoke(&callee, Value::Undefined, args, ctx).await
    }

    /// Evaluate call arguments, expanding spreads from iterables.
    async fn eval_args(&self, args: &[Expr], env: &RuntimeEnv, ctx: &Ctx) -> RtResult<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match &arg.kind {
                ExprKind::Spread(inner) => {
                    let iterable = self.eval_expr(inner, env, ctx).await?;
                    out.extend(self.spread_values(&iterable, ctx).await?);
                }
                _ => out.push(self.eval_expr(arg, env, ctx).await?),
            }
        }
        Ok(out)
    }

    /// Expand an iterable into a vector (spread sites, `yield*`).
    async fn spread_values(&self, iterable: &Value, ctx: &Ctx) -> RtResult<Vec<Value>> {
        match members::iter_source(iterable, false)? {
            IterSource::Values(values) => Ok(values),
            IterSource::Generator(generator) => {
                let generator = Value::Generator(generator);
                self.drain_iterator(&generator, ctx).await
            }
            IterSource::Factory(factory) => {
                let iterator = self.invoke(&factory, iterable.clone(), Vec::new(), ctx).await?;
                self.drain_iterator(&iterator, ctx).await
            }
            IterSource::IteratorObject(iterator) => self.drain_iterator(&iterator, ctx).await,
        }
    }

    async fn drain_iterator(&self, iterator: &Value, ctx: &Ctx) -> RtResult<Vec<Value>> {
        let mut out = Vec::new();
        loop {
            let next = members::get_index(iterator, &Value::str("next"))?;
            let result = self.invoke(&next, iterator.clone(), Vec::new(), ctx).await?;
            let (value, done) = members::read_iterator_result(&result)?;
            if done {
                return Ok(out);
            }
            out.push(value);
        }
    }

    // =========================================================================
    // Members
    // =========================================================================

    /// Property read with getter invocation.
    pub(crate) async fn get_member(&self, target: &Value, name: &str, ctx: &Ctx) -> RtResult<Value> {
        match members::get_property(target, name)? {
            Property::Value(value) => Ok(value),
            Property::Getter(getter) => self.invoke(&getter, target.clone(), Vec::new(), ctx).await,
            Property::Missing => Ok(Value::Undefined),
        }
    }

    /// Property write with setter invocation and frozen-write semantics.
    async fn set_member(&self, target: &Value, name: &str, value: Value, ctx: &Ctx) -> RtResult<()> {
        match members::set_property(target, name, value.clone(), ctx.strict)? {
            SetOutcome::Done => Ok(()),
            SetOutcome::Setter(setter) => {
                self.invoke(&setter, target.clone(), vec![value], ctx).await?;
                Ok(())
            }
        }
    }

    fn super_method(&self, name: &str, env: &RuntimeEnv, ctx: &Ctx) -> RtResult<Value> {
        let parent = self.super_class(ctx)?;
        let this = env.lookup("this").unwrap_or_default();
        let method = parent.find_method(name).ok_or_else(|| {
            tsr_runtime::throw_type_error(format!(
                "Property '{name}' does not exist on superclass"
            ))
        })?;
        Ok(Value::Bound(Rc::new(tsr_runtime::value::BoundMethod {
            func: method,
            receiver: this,
        })))
    }

    // =========================================================================
    // Increments and literals
    // =========================================================================

    async fn eval_increment(
        &self,
        target: &Expr,
        negative: bool,
        prefix: bool,
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> RtResult<Value> {
        let delta = if negative { -1.0 } else { 1.0 };
        let step = |current: &Value| -> RtResult<Value> {
            if let Value::BigInt(b) = current {
                let one = num_bigint::BigInt::from(if negative { -1 } else { 1 });
                return Ok(Value::BigInt(Rc::new(b.as_ref() + one)));
            }
            Ok(Value::Number(ops::to_number(current) + delta))
        };
        match &target.kind {
            ExprKind::Variable(name) => {
                let current = self
                    .lookup_variable(env, name)
                    .ok_or_else(|| make_error("ReferenceError", format!("{name} is not defined")))?;
                let updated = step(&current)?;
                self.assign_variable(env, name, updated.clone(), ctx)?;
                Ok(if prefix { updated } else { Value::Number(ops::to_number(&current)) })
            }
            ExprKind::Get { object, name } => {
                let receiver = self.eval_expr(object, env, ctx).await?;
                let current = self.get_member(&receiver, name, ctx).await?;
                let updated = step(&current)?;
                self.set_member(&receiver, name, updated.clone(), ctx).await?;
                Ok(if prefix { updated } else { Value::Number(ops::to_number(&current)) })
            }
            ExprKind::GetIndex { object, index } => {
                let receiver = self.eval_expr(object, env, ctx).await?;
                let index = self.eval_expr(index, env, ctx).await?;
                let current = members::get_index(&receiver, &index)?;
                let updated = step(&current)?;
                members::set_index(&receiver, &index, updated.clone(), ctx.strict)?;
                Ok(if prefix { updated } else { Value::Number(ops::to_number(&current)) })
            }
            _ => Err(tsr_runtime::throw_type_error("Invalid increment target")),
        }
    }

    async fn eval_object_literal(
        &self,
        props: &[ObjectProp],
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> RtResult<Value> {
        let object = ObjectData::new();
        for prop in props {
            match prop {
                ObjectProp::Entry { key, value } => {
                    let value = self.eval_expr(value, env, ctx).await?;
                    match key {
                        PropKey::Static(name) => {
                            object.props.borrow_mut().insert(name.clone(), value);
                        }
                        PropKey::Computed(key_expr) => {
                            let key = self.eval_expr(key_expr, env, ctx).await?;
                            match key {
                                Value::Symbol(symbol) => {
                                    object.symbols.borrow_mut().insert(symbol.id, value);
                                }
                                other => {
                                    object
                                        .props
                                        .borrow_mut()
                                        .insert(ops::to_display_string(&other), value);
                                }
                            }
                        }
                    }
                }
                ObjectProp::Spread(inner) => {
                    let source = self.eval_expr(inner, env, ctx).await?;
                    match &source {
                        Value::Object(src) => {
                            object.props.borrow_mut().extend(
                                src.props.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                            );
                        }
                        Value::Instance(inst) => {
                            object.props.borrow_mut().extend(
                                inst.fields.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                            );
                        }
                        Value::Array(items) => {
                            for (i, v) in items.borrow().iter().enumerate() {
                                object.props.borrow_mut().insert(i.to_string(), v.clone());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(Value::Object(object))
    }

    /// Assignment honoring the scope chain: the nearest scope holding the
    /// name wins; an unresolved name is a reference error in strict mode
    /// and an implicit global otherwise.
    fn assign_variable(&self, env: &RuntimeEnv, name: &str, value: Value, ctx: &Ctx) -> RtResult<()> {
        if env.assign(name, value.clone()) {
            return Ok(());
        }
        if ctx.strict {
            return Err(make_error("ReferenceError", format!("{name} is not defined")));
        }
        self.globals().define(name, value);
        Ok(())
    }
}

fn literal_value(literal: &Literal) -> RtResult<Value> {
    Ok(match literal {
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::str(s.clone()),
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
        Literal::Undefined => Value::Undefined,
        Literal::BigInt(digits) => match members::parse_bigint_literal(digits) {
            Some(b) => Value::BigInt(Rc::new(b)),
            None => {
                return Err(make_error("SyntaxError", format!("Invalid BigInt literal '{digits}'")));
            }
        },
    })
}

/// Binary operator dispatch shared with compound assignment forms.
pub(crate) fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> RtResult<Value> {
    match op {
        BinaryOp::Add => ops::add(l, r),
        BinaryOp::Sub => ops::arithmetic("-", l, r),
        BinaryOp::Mul => ops::arithmetic("*", l, r),
        BinaryOp::Div => ops::arithmetic("/", l, r),
        BinaryOp::Rem => ops::arithmetic("%", l, r),
        BinaryOp::Pow => ops::arithmetic("**", l, r),
        BinaryOp::Less => ops::compare("<", l, r),
        BinaryOp::LessEqual => ops::compare("<=", l, r),
        BinaryOp::Greater => ops::compare(">", l, r),
        BinaryOp::GreaterEqual => ops::compare(">=", l, r),
        BinaryOp::EqEq => Ok(Value::Bool(ops::loose_equals(l, r))),
        BinaryOp::NotEq => Ok(Value::Bool(!ops::loose_equals(l, r))),
        BinaryOp::EqEqEq => Ok(Value::Bool(ops::strict_equals(l, r))),
        BinaryOp::NotEqEq => Ok(Value::Bool(!ops::strict_equals(l, r))),
        BinaryOp::BitAnd => ops::bitwise("&", l, r),
        BinaryOp::BitOr => ops::bitwise("|", l, r),
        BinaryOp::BitXor => ops::bitwise("^", l, r),
        BinaryOp::Shl => ops::bitwise("<<", l, r),
        BinaryOp::Shr => ops::bitwise(">>", l, r),
        BinaryOp::UShr => ops::unsigned_right_shift(l, r),
        BinaryOp::In => ops::in_op(l, r),
        BinaryOp::InstanceOf => ops::instance_of(l, r),
    }
}

/// Runtime diagnostics carry the source line of the failing expression.
fn attach_line(error: Value, line: u32) -> Value {
    if let Value::Object(obj) = &error {
        let mut props = obj.props.borrow_mut();
        if props.contains_key("name") && !props.contains_key("line") {
            props.insert("line".to_string(), Value::Number(line as f64));
        }
    }
    error
}
