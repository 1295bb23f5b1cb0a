//! Control-flow narrowing.
//!
//! Recognized guards: `typeof x === "s"`, truthiness of `x`, equality with a
//! literal, `instanceof`, `"k" in x`, and calls to user-defined predicates
//! annotated `p is T`. Entering the true branch refines bindings to the
//! matching union members; the false branch gets the excluded members.

use std::rc::Rc;

use tsr_parser::ast::{BinaryOp, Expr, ExprKind, Literal, LogicalOp, UnaryOp};

use crate::checker::Checker;
use crate::env::TypeEnv;
use crate::types::{Type, TypeRef};

impl Checker {
    /// Environments for the true and false branches of `cond`.
    pub(crate) fn narrowed_branches(&mut self, cond: &Expr) -> (TypeEnv, TypeEnv) {
        let true_env = self.env.child();
        let false_env = self.env.child();
        self.apply_narrowing(cond, &true_env, &false_env);
        (true_env, false_env)
    }

    fn apply_narrowing(&mut self, cond: &Expr, true_env: &TypeEnv, false_env: &TypeEnv) {
        match &cond.kind {
            ExprKind::Grouping(inner) => self.apply_narrowing(inner, true_env, false_env),
            ExprKind::Unary { op: UnaryOp::Not, operand } => {
                self.apply_narrowing(operand, false_env, true_env);
            }
            ExprKind::Logical { op: LogicalOp::And, left, right } => {
                // Both guards hold in the true branch.
                let scratch_a = self.env.child();
                let scratch_b = self.env.child();
                self.apply_narrowing(left, true_env, &scratch_a);
                self.apply_narrowing(right, true_env, &scratch_b);
            }
            ExprKind::Logical { op: LogicalOp::Or, left, right } => {
                // Both guards fail in the false branch.
                let scratch_a = self.env.child();
                let scratch_b = self.env.child();
                self.apply_narrowing(left, &scratch_a, false_env);
                self.apply_narrowing(right, &scratch_b, false_env);
            }
            ExprKind::Binary { op, left, right }
                if matches!(op, BinaryOp::EqEqEq | BinaryOp::EqEq | BinaryOp::NotEqEq | BinaryOp::NotEq) =>
            {
                let negated = matches!(op, BinaryOp::NotEqEq | BinaryOp::NotEq);
                let (t_env, f_env) = if negated { (false_env, true_env) } else { (true_env, false_env) };
                // `typeof x === "s"`.
                if let Some((name, type_name)) = typeof_guard(left, right) {
                    self.narrow_by_typeof(&name, &type_name, t_env, f_env);
                    return;
                }
                // `x === <literal>`.
                if let Some((name, literal)) = literal_guard(left, right) {
                    self.narrow_by_literal(&name, &literal, t_env, f_env);
                }
            }
            ExprKind::Binary { op: BinaryOp::InstanceOf, left, right } => {
                let ExprKind::Variable(name) = &left.kind else { return };
                let ExprKind::Variable(class_name) = &right.kind else { return };
                self.narrow_by_instanceof(name, class_name, true_env, false_env);
            }
            ExprKind::Binary { op: BinaryOp::In, left, right } => {
                let ExprKind::Literal(Literal::String(key)) = &left.kind else { return };
                let ExprKind::Variable(name) = &right.kind else { return };
                self.narrow_by_member(name, key, true_env, false_env);
            }
            ExprKind::Call { callee, args } => {
                // User-defined predicate: `isFish(pet)`.
                let ExprKind::Variable(fn_name) = &callee.kind else { return };
                let Some(binding) = self.env.lookup_value(fn_name) else { return };
                let Type::Function(func) = binding.ty.as_ref() else { return };
                let Some((param_name, narrowed_ty)) = &func.predicate else { return };
                let position = func
                    .params
                    .iter()
                    .position(|p| &p.name == param_name)
                    .unwrap_or(0);
                let Some(arg) = args.get(position) else { return };
                let ExprKind::Variable(var) = &arg.kind else { return };
                let Some(current) = self.env.lookup_value(var) else { return };
                true_env.define_value(var, narrowed_ty.clone(), current.is_const);
                let excluded = self.exclude_type(&current.ty, narrowed_ty);
                false_env.define_value(var, excluded, current.is_const);
            }
            ExprKind::Variable(name) => {
                // Truthiness.
                let Some(binding) = self.env.lookup_value(name) else { return };
                let truthy = self.truthy_part(&binding.ty);
                let falsy = self.falsy_part(&binding.ty);
                true_env.define_value(name, truthy, binding.is_const);
                false_env.define_value(name, falsy, binding.is_const);
            }
            _ => {}
        }
    }

    fn narrow_by_typeof(&mut self, name: &str, type_name: &str, t_env: &TypeEnv, f_env: &TypeEnv) {
        let Some(binding) = self.env.lookup_value(name) else { return };
        let matching = self.typeof_filter(&binding.ty, type_name, true);
        let excluded = self.typeof_filter(&binding.ty, type_name, false);
        t_env.define_value(name, matching, binding.is_const);
        f_env.define_value(name, excluded, binding.is_const);
    }

    /// Members of `ty` whose `typeof` does (or does not) equal `type_name`.
    fn typeof_filter(&mut self, ty: &TypeRef, type_name: &str, keep_matching: bool) -> TypeRef {
        let members: Vec<TypeRef> = match ty.as_ref() {
            Type::Union(members) => members.clone(),
            _ => vec![ty.clone()],
        };
        let filtered: Vec<TypeRef> = members
            .into_iter()
            .filter(|m| typeof_of(m).map(|t| (t == type_name) == keep_matching).unwrap_or(true))
            .collect();
        if filtered.is_empty() {
            // `any`/unresolvable narrows to the named primitive in the true
            // branch.
            if keep_matching {
                return primitive_for_typeof(type_name);
            }
            return Type::never();
        }
        // A bare `any` narrows to the primitive in the true branch.
        if keep_matching && matches!(ty.as_ref(), Type::Any) {
            return primitive_for_typeof(type_name);
        }
        Type::union(filtered)
    }

    fn narrow_by_literal(&mut self, name: &str, literal: &TypeRef, t_env: &TypeEnv, f_env: &TypeEnv) {
        let Some(binding) = self.env.lookup_value(name) else { return };
        let narrowed = self.narrow_to_literal(&binding.ty, literal);
        t_env.define_value(name, narrowed, binding.is_const);
        let excluded = self.exclude_type(&binding.ty, literal);
        f_env.define_value(name, excluded, binding.is_const);
    }

    /// Refine `ty` to the members equal to the literal.
    pub(crate) fn narrow_to_literal(&mut self, ty: &TypeRef, literal: &TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::Union(members) => {
                let matching: Vec<TypeRef> = members
                    .iter()
                    .filter(|m| self.is_compatible(m, literal))
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    literal.clone()
                } else {
                    Type::union(matching)
                }
            }
            _ => literal.clone(),
        }
    }

    fn narrow_by_instanceof(&mut self, name: &str, class_name: &str, t_env: &TypeEnv, f_env: &TypeEnv) {
        let Some(binding) = self.env.lookup_value(name) else { return };
        let Some(class_binding) = self.env.lookup_value(class_name) else { return };
        let (Type::Class(class) | Type::MutableClass(class)) = class_binding.ty.as_ref() else {
            return;
        };
        let instance: TypeRef = Rc::new(Type::Instance(Rc::clone(class)));
        let members: Vec<TypeRef> = match binding.ty.as_ref() {
            Type::Union(members) => members.clone(),
            _ => vec![binding.ty.clone()],
        };
        let matching: Vec<TypeRef> = members
            .iter()
            .filter(|m| match m.as_ref() {
                Type::Instance(c) => c.derives_from(class),
                Type::Any => true,
                _ => false,
            })
            .cloned()
            .collect();
        let narrowed = if matching.is_empty() { instance } else { Type::union(matching) };
        t_env.define_value(name, narrowed, binding.is_const);
        let excluded: Vec<TypeRef> = members
            .into_iter()
            .filter(|m| !matches!(m.as_ref(), Type::Instance(c) if c.derives_from(class)))
            .collect();
        f_env.define_value(name, Type::union(excluded), binding.is_const);
    }

    fn narrow_by_member(&mut self, name: &str, key: &str, t_env: &TypeEnv, f_env: &TypeEnv) {
        let Some(binding) = self.env.lookup_value(name) else { return };
        let members: Vec<TypeRef> = match binding.ty.as_ref() {
            Type::Union(members) => members.clone(),
            _ => return,
        };
        let (with, without): (Vec<TypeRef>, Vec<TypeRef>) = members
            .into_iter()
            .partition(|m| self.member_type_of(m, key).is_some());
        t_env.define_value(name, Type::union(with), binding.is_const);
        f_env.define_value(name, Type::union(without), binding.is_const);
    }

    /// Exclude `removed` from `ty` (set difference on union members).
    pub(crate) fn exclude_type(&mut self, ty: &TypeRef, removed: &TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::Union(members) => {
                let rest: Vec<TypeRef> = members
                    .iter()
                    .filter(|m| !m.same_shape(removed))
                    .cloned()
                    .collect();
                Type::union(rest)
            }
            _ => ty.clone(),
        }
    }

    /// The members of `ty` that survive a truthiness check.
    fn truthy_part(&mut self, ty: &TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::Union(members) => {
                let kept: Vec<TypeRef> = members
                    .iter()
                    .filter(|m| !is_definitely_falsy(m))
                    .cloned()
                    .collect();
                Type::union(kept)
            }
            _ if is_definitely_falsy(ty) => Type::never(),
            _ => ty.clone(),
        }
    }

    fn falsy_part(&mut self, ty: &TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::Union(members) => {
                let kept: Vec<TypeRef> = members
                    .iter()
                    .filter(|m| may_be_falsy(m))
                    .cloned()
                    .collect();
                Type::union(kept)
            }
            _ => ty.clone(),
        }
    }
}

/// `typeof x === "name"` in either operand order.
fn typeof_guard(left: &Expr, right: &Expr) -> Option<(String, String)> {
    let extract = |a: &Expr, b: &Expr| -> Option<(String, String)> {
        let ExprKind::Unary { op: UnaryOp::TypeOf, operand } = &a.kind else { return None };
        let ExprKind::Variable(name) = &operand.kind else { return None };
        let ExprKind::Literal(Literal::String(type_name)) = &b.kind else { return None };
        Some((name.clone(), type_name.clone()))
    };
    extract(left, right).or_else(|| extract(right, left))
}

/// `x === <literal>` in either operand order.
fn literal_guard(left: &Expr, right: &Expr) -> Option<(String, TypeRef)> {
    let extract = |a: &Expr, b: &Expr| -> Option<(String, TypeRef)> {
        let ExprKind::Variable(name) = &a.kind else { return None };
        let literal = match &b.kind {
            ExprKind::Literal(Literal::String(s)) => Rc::new(Type::StringLiteral(s.clone())),
            ExprKind::Literal(Literal::Number(n)) => Rc::new(Type::NumberLiteral(*n)),
            ExprKind::Literal(Literal::Boolean(v)) => Rc::new(Type::BooleanLiteral(*v)),
            ExprKind::Literal(Literal::Null) => Type::null(),
            ExprKind::Literal(Literal::Undefined) => Type::undefined(),
            _ => return None,
        };
        Some((name.clone(), literal))
    };
    extract(left, right).or_else(|| extract(right, left))
}

/// The static `typeof` result for a type, when single-valued.
fn typeof_of(ty: &TypeRef) -> Option<&'static str> {
    match ty.as_ref() {
        Type::Number | Type::NumberLiteral(_) => Some("number"),
        Type::String | Type::StringLiteral(_) | Type::TemplateLiteral { .. } => Some("string"),
        Type::Boolean | Type::BooleanLiteral(_) => Some("boolean"),
        Type::BigInt => Some("bigint"),
        Type::Symbol => Some("symbol"),
        Type::Undefined | Type::Void => Some("undefined"),
        Type::Function(_) | Type::Class(_) | Type::MutableClass(_) => Some("function"),
        Type::Null
        | Type::Record { .. }
        | Type::Interface(_)
        | Type::Instance(_)
        | Type::Array(_)
        | Type::Tuple { .. }
        | Type::Map(..)
        | Type::Set(_)
        | Type::RegExp
        | Type::Promise(_) => Some("object"),
        _ => None,
    }
}

fn primitive_for_typeof(name: &str) -> TypeRef {
    match name {
        "number" => Type::number(),
        "string" => Type::string(),
        "boolean" => Type::boolean(),
        "bigint" => Type::bigint(),
        "symbol" => Type::symbol(),
        "undefined" => Type::undefined(),
        _ => Type::any(),
    }
}

fn is_definitely_falsy(ty: &TypeRef) -> bool {
    matches!(
        ty.as_ref(),
        Type::Null | Type::Undefined | Type::Void | Type::Never
    ) || matches!(ty.as_ref(), Type::BooleanLiteral(false))
        || matches!(ty.as_ref(), Type::NumberLiteral(n) if *n == 0.0)
        || matches!(ty.as_ref(), Type::StringLiteral(s) if s.is_empty())
}

fn may_be_falsy(ty: &TypeRef) -> bool {
    match ty.as_ref() {
        Type::Null | Type::Undefined | Type::Void => true,
        Type::Boolean | Type::Number | Type::String | Type::BigInt | Type::Any | Type::Unknown => true,
        Type::BooleanLiteral(v) => !v,
        Type::NumberLiteral(n) => *n == 0.0,
        Type::StringLiteral(s) => s.is_empty(),
        _ => false,
    }
}
