//! Expression checking.
//!
//! Each case resolves the expression's type, reports diagnostics for the
//! statically excluded runtime errors (calling a non-callable, unknown
//! properties on known shapes, arity mismatches, const reassignment), and
//! records the result in the `TypeMap`. A failed sub-expression yields `any`
//! so one error does not cascade.

use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use tsr_common::DiagnosticCode;
use tsr_parser::ast::*;

use crate::checker::Checker;
use crate::types::*;

impl Checker {
    pub(crate) fn check_expr(&mut self, expr: &Expr) -> TypeRef {
        let ty = self.check_expr_inner(expr);
        self.map.record(expr.id, ty.clone());
        ty
    }

    fn check_expr_inner(&mut self, expr: &Expr) -> TypeRef {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_type(literal),
            ExprKind::Variable(name) => match self.env.lookup_value(name) {
                Some(binding) => binding.ty,
                None => {
                    self.error(
                        DiagnosticCode::UndefinedVariable,
                        format!("undefined variable '{name}'"),
                        expr.span,
                    );
                    Type::any()
                }
            },
            ExprKind::Binary { op, left, right } => self.check_binary(*op, left, right, expr),
            ExprKind::Logical { left, right, .. } => {
                let l = self.check_expr(left);
                let r = self.check_expr(right);
                Type::union(vec![l, r])
            }
            ExprKind::NullishCoalescing { left, right } => {
                let l = self.check_expr(left);
                let r = self.check_expr(right);
                let non_nullish = self.without_nullish(&l);
                Type::union(vec![non_nullish, r])
            }
            ExprKind::Ternary { cond, then_branch, else_branch } => {
                self.check_expr(cond);
                let (true_env, false_env) = self.narrowed_branches(cond);
                let outer = std::mem::replace(&mut self.env, true_env);
                let t = self.check_expr(then_branch);
                self.env = false_env;
                let e = self.check_expr(else_branch);
                self.env = outer;
                Type::union(vec![t, e])
            }
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.check_expr(operand);
                match op {
                    UnaryOp::Minus | UnaryOp::Plus => {
                        if matches!(operand_ty.as_ref(), Type::BigInt) {
                            Type::bigint()
                        } else {
                            Type::number()
                        }
                    }
                    UnaryOp::Not => Type::boolean(),
                    UnaryOp::BitNot => Type::number(),
                    UnaryOp::TypeOf => Type::string(),
                    UnaryOp::Void => Type::undefined(),
                }
            }
            ExprKind::Assign { name, value } => self.check_assign(name, value, expr),
            ExprKind::CompoundAssign { name, op, value } => {
                let current = match self.env.lookup_value(name) {
                    Some(binding) => {
                        if binding.is_const {
                            self.error(
                                DiagnosticCode::TypeError,
                                format!("cannot assign to constant '{name}'"),
                                expr.span,
                            );
                        }
                        binding.ty
                    }
                    None => {
                        self.error(
                            DiagnosticCode::UndefinedVariable,
                            format!("undefined variable '{name}'"),
                            expr.span,
                        );
                        Type::any()
                    }
                };
                let value_ty = self.check_expr(value);
                self.binary_result(*op, &current, &value_ty)
            }
            ExprKind::LogicalAssign { name, value, .. } => {
                let current = self
                    .env
                    .lookup_value(name)
                    .map(|b| b.ty)
                    .unwrap_or_else(Type::any);
                let value_ty = self.check_expr(value);
                Type::union(vec![current, value_ty])
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, expr),
            ExprKind::New { callee, args } => self.check_new(callee, args, expr),
            ExprKind::Get { object, name } => self.check_get(object, name, expr),
            ExprKind::Set { object, name, value } => {
                let object_ty = self.check_expr(object);
                let value_ty = self.check_expr(value);
                if let Some(member_ty) = self.property_type(&object_ty, name) {
                    self.check_assignable(&member_ty, &value_ty, value);
                }
                self.check_readonly_write(&object_ty, name, expr);
                value_ty
            }
            ExprKind::GetIndex { object, index } => {
                let object_ty = self.check_expr(object);
                let index_ty = self.check_expr(index);
                self.index_result(&object_ty, &index_ty)
            }
            ExprKind::SetIndex { object, index, value } => {
                let object_ty = self.check_expr(object);
                let index_ty = self.check_expr(index);
                let value_ty = self.check_expr(value);
                let slot = self.index_result(&object_ty, &index_ty);
                if !matches!(slot.as_ref(), Type::Any) {
                    self.check_assignable(&slot, &value_ty, value);
                }
                value_ty
            }
            ExprKind::CompoundSet { object, name, op, value } => {
                let object_ty = self.check_expr(object);
                let value_ty = self.check_expr(value);
                let current = self.property_type(&object_ty, name).unwrap_or_else(Type::any);
                self.binary_result(*op, &current, &value_ty)
            }
            ExprKind::CompoundSetIndex { object, index, op, value } => {
                let object_ty = self.check_expr(object);
                let index_ty = self.check_expr(index);
                let value_ty = self.check_expr(value);
                let current = self.index_result(&object_ty, &index_ty);
                self.binary_result(*op, &current, &value_ty)
            }
            ExprKind::LogicalSet { object, name, value, .. } => {
                let object_ty = self.check_expr(object);
                let value_ty = self.check_expr(value);
                let current = self.property_type(&object_ty, name).unwrap_or_else(Type::any);
                Type::union(vec![current, value_ty])
            }
            ExprKind::LogicalSetIndex { object, index, value, .. } => {
                let object_ty = self.check_expr(object);
                let index_ty = self.check_expr(index);
                let value_ty = self.check_expr(value);
                let current = self.index_result(&object_ty, &index_ty);
                Type::union(vec![current, value_ty])
            }
            ExprKind::PrefixIncrement { target, .. } | ExprKind::PostfixIncrement { target, .. } => {
                let target_ty = self.check_expr(target);
                if !matches!(
                    target_ty.as_ref(),
                    Type::Number | Type::NumberLiteral(_) | Type::BigInt | Type::Any
                ) {
                    self.error(
                        DiagnosticCode::TypeError,
                        format!("increment target must be numeric, found '{target_ty}'"),
                        expr.span,
                    );
                }
                if matches!(target_ty.as_ref(), Type::BigInt) {
                    Type::bigint()
                } else {
                    Type::number()
                }
            }
            ExprKind::This => self.current_this().unwrap_or_else(Type::any),
            ExprKind::Super => self
                .env
                .lookup_value("super")
                .map(|b| b.ty)
                .unwrap_or_else(Type::any),
            ExprKind::ArrayLiteral(elements) => {
                let mut elem_types = Vec::new();
                for element in elements {
                    match &element.kind {
                        ExprKind::Spread(inner) => {
                            let inner_ty = self.check_expr(inner);
                            let elem = self.element_type_of(&inner_ty, inner.span);
                            self.map.record(element.id, inner_ty);
                            elem_types.push(elem);
                        }
                        _ => elem_types.push(self.check_expr(element)),
                    }
                }
                let elem = Type::union(elem_types.iter().map(Type::widen).collect());
                let elem = if elem_types.is_empty() { Type::any() } else { elem };
                Rc::new(Type::Array(elem))
            }
            ExprKind::ObjectLiteral(props) => self.check_object_literal(props),
            ExprKind::Spread(inner) => self.check_expr(inner),
            ExprKind::Grouping(inner) => self.check_expr(inner),
            ExprKind::ArrowFunction(decl) => {
                let fn_type = self.function_type_of(decl);
                let this_ty = if decl.is_arrow { self.current_this() } else { None };
                self.check_function_body(decl, this_ty);
                let ret = self.wrap_callable_return(decl, &fn_type);
                Rc::new(Type::Function(ret))
            }
            ExprKind::TemplateLiteral { strings, exprs } => {
                for part in exprs {
                    self.check_expr(part);
                }
                if exprs.is_empty() {
                    Rc::new(Type::StringLiteral(strings[0].clone()))
                } else {
                    Type::string()
                }
            }
            ExprKind::TypeAssertion { expr: inner, target } => {
                self.check_expr(inner);
                self.resolve_type(target)
            }
            ExprKind::Await(inner) => {
                let inner_ty = self.check_expr(inner);
                match inner_ty.as_ref() {
                    Type::Promise(payload) => payload.clone(),
                    _ => inner_ty,
                }
            }
            ExprKind::Yield { value, .. } => {
                if !self.in_generator() {
                    self.error(
                        DiagnosticCode::TypeError,
                        "'yield' is only allowed inside a generator function",
                        expr.span,
                    );
                }
                if let Some(value) = value {
                    let value_ty = self.check_expr(value);
                    if let Some(expected) = self.expected_yield() {
                        if !self.is_compatible(&expected, &value_ty) {
                            self.error(
                                DiagnosticCode::TypeError,
                                format!("type '{value_ty}' is not assignable to yield type '{expected}'"),
                                expr.span,
                            );
                        }
                    }
                }
                Type::any()
            }
            ExprKind::DynamicImport(path) => {
                self.check_expr(path);
                Rc::new(Type::Promise(Type::any()))
            }
            ExprKind::RegexLiteral { .. } => Rc::new(Type::RegExp),
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, at: &Expr) -> TypeRef {
        let l = self.check_expr(left);
        let r = self.check_expr(right);
        match op {
            BinaryOp::EqEq | BinaryOp::NotEq | BinaryOp::EqEqEq | BinaryOp::NotEqEq => {
                Type::boolean()
            }
            BinaryOp::In | BinaryOp::InstanceOf => Type::boolean(),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                Type::boolean()
            }
            _ => {
                let result = self.binary_result(op, &l, &r);
                // Mixing bigint with other numerics is rejected statically.
                let l_big = matches!(l.as_ref(), Type::BigInt);
                let r_big = matches!(r.as_ref(), Type::BigInt);
                if l_big != r_big
                    && !matches!(l.as_ref(), Type::Any | Type::String | Type::StringLiteral(_))
                    && !matches!(r.as_ref(), Type::Any | Type::String | Type::StringLiteral(_))
                {
                    self.error(
                        DiagnosticCode::TypeError,
                        "cannot mix bigint and other types in arithmetic",
                        at.span,
                    );
                }
                result
            }
        }
    }

    pub(crate) fn binary_result(&mut self, op: BinaryOp, l: &TypeRef, r: &TypeRef) -> TypeRef {
        let is_stringish = |t: &TypeRef| {
            matches!(
                t.as_ref(),
                Type::String | Type::StringLiteral(_) | Type::TemplateLiteral { .. }
            )
        };
        match op {
            BinaryOp::Add => {
                if is_stringish(l) || is_stringish(r) {
                    Type::string()
                } else if matches!(l.as_ref(), Type::BigInt) && matches!(r.as_ref(), Type::BigInt) {
                    Type::bigint()
                } else if matches!(l.as_ref(), Type::Any) || matches!(r.as_ref(), Type::Any) {
                    Type::any()
                } else {
                    Type::number()
                }
            }
            BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Rem
            | BinaryOp::Pow => {
                if matches!(l.as_ref(), Type::BigInt) && matches!(r.as_ref(), Type::BigInt) {
                    Type::bigint()
                } else {
                    Type::number()
                }
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::UShr => {
                if matches!(l.as_ref(), Type::BigInt) && matches!(r.as_ref(), Type::BigInt) {
                    Type::bigint()
                } else {
                    Type::number()
                }
            }
            _ => Type::boolean(),
        }
    }

    fn without_nullish(&mut self, ty: &TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::Union(members) => {
                let kept: Vec<TypeRef> = members
                    .iter()
                    .filter(|m| !m.is_nullish())
                    .cloned()
                    .collect();
                Type::union(kept)
            }
            _ if ty.is_nullish() => Type::never(),
            _ => ty.clone(),
        }
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    fn check_assign(&mut self, name: &str, value: &Expr, at: &Expr) -> TypeRef {
        let value_ty = self.check_expr(value);
        match self.env.lookup_value(name) {
            Some(binding) => {
                if binding.is_const && !name.starts_with("_dest") {
                    self.error(
                        DiagnosticCode::TypeError,
                        format!("cannot assign to constant '{name}'"),
                        at.span,
                    );
                }
                self.check_assignable(&binding.ty, &value_ty, value);
            }
            None => {
                self.error(
                    DiagnosticCode::UndefinedVariable,
                    format!("undefined variable '{name}'"),
                    at.span,
                );
            }
        }
        value_ty
    }

    fn check_readonly_write(&mut self, object_ty: &TypeRef, name: &str, at: &Expr) {
        if let Type::Instance(class) = object_ty.as_ref() {
            if let Some(info) = class.fields.borrow().get(name) {
                if info.readonly {
                    self.error(
                        DiagnosticCode::TypeError,
                        format!("cannot assign to readonly property '{name}'"),
                        at.span,
                    );
                }
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn check_call(&mut self, callee: &Expr, args: &[Expr], at: &Expr) -> TypeRef {
        // `super(...)` invokes the superclass constructor against `this`.
        if matches!(callee.kind, ExprKind::Super) {
            let _ = self.check_args(args);
            return Type::void();
        }
        let callee_ty = self.check_expr(callee);
        let (arg_types, has_spread) = self.check_args(args);

        // Overloaded functions: the first signature that accepts the
        // arguments wins.
        if let ExprKind::Variable(name) = &callee.kind {
            let overloads = self.overloads.get(name).cloned();
            if let Some(overloads) = overloads {
                for sig in &overloads {
                    if self.call_fits(sig, &arg_types, has_spread) {
                        let instantiated = self.instantiate_call(sig, &arg_types);
                        return instantiated.ret.clone();
                    }
                }
            }
        }

        match callee_ty.as_ref() {
            Type::Function(func) => {
                let func = self.instantiate_call(func, &arg_types);
                if !has_spread {
                    let fixed = func.params.iter().filter(|p| !p.rest).count();
                    if arg_types.len() < func.required || (arg_types.len() > fixed && !func.has_rest)
                    {
                        self.error(
                            DiagnosticCode::ArityMismatch,
                            format!(
                                "expected {} argument(s), found {}",
                                func.required,
                                arg_types.len()
                            ),
                            at.span,
                        );
                    }
                }
                for (i, arg_ty) in arg_types.iter().enumerate() {
                    let param = func
                        .params
                        .get(i)
                        .or_else(|| func.params.iter().find(|p| p.rest));
                    if let Some(param) = param {
                        let expected = if param.rest {
                            match param.ty.as_ref() {
                                Type::Array(elem) => elem.clone(),
                                _ => param.ty.clone(),
                            }
                        } else {
                            param.ty.clone()
                        };
                        if matches!(args.get(i).map(|a| &a.kind), Some(ExprKind::Spread(_))) {
                            continue;
                        }
                        if !self.is_compatible(&expected, arg_ty) {
                            self.error(
                                DiagnosticCode::TypeError,
                                format!(
                                    "argument of type '{arg_ty}' is not assignable to parameter of type '{expected}'"
                                ),
                                args.get(i).map(|a| a.span).unwrap_or(at.span),
                            );
                        } else if let Some(arg) = args.get(i) {
                            self.check_excess_properties(&expected, arg_ty, arg);
                        }
                    }
                }
                func.ret.clone()
            }
            Type::Class(_) | Type::MutableClass(_) => {
                self.error(
                    DiagnosticCode::NotCallable,
                    "class constructors must be invoked with 'new'",
                    at.span,
                );
                Type::any()
            }
            Type::Any | Type::Unknown => Type::any(),
            other => {
                self.error(
                    DiagnosticCode::NotCallable,
                    format!("type '{other}' is not callable"),
                    at.span,
                );
                Type::any()
            }
        }
    }

    fn call_fits(&mut self, sig: &Rc<FunctionType>, arg_types: &[TypeRef], has_spread: bool) -> bool {
        if has_spread {
            return true;
        }
        let fixed = sig.params.iter().filter(|p| !p.rest).count();
        if arg_types.len() < sig.required || (arg_types.len() > fixed && !sig.has_rest) {
            return false;
        }
        let sig = self.instantiate_call(sig, arg_types);
        arg_types.iter().enumerate().all(|(i, arg_ty)| {
            match sig.params.get(i).or_else(|| sig.params.iter().find(|p| p.rest)) {
                Some(param) => {
                    let expected = if param.rest {
                        match param.ty.as_ref() {
                            Type::Array(elem) => elem.clone(),
                            _ => param.ty.clone(),
                        }
                    } else {
                        param.ty.clone()
                    };
                    self.is_compatible(&expected, arg_ty)
                }
                None => false,
            }
        })
    }

    fn check_args(&mut self, args: &[Expr]) -> (Vec<TypeRef>, bool) {
        let mut arg_types = Vec::new();
        let mut has_spread = false;
        for arg in args {
            match &arg.kind {
                ExprKind::Spread(inner) => {
                    has_spread = true;
                    let inner_ty = self.check_expr(inner);
                    let elem = self.element_type_of(&inner_ty, inner.span);
                    self.map.record(arg.id, elem.clone());
                    arg_types.push(elem);
                }
                _ => arg_types.push(self.check_expr(arg)),
            }
        }
        (arg_types, has_spread)
    }

    fn check_new(&mut self, callee: &Expr, args: &[Expr], at: &Expr) -> TypeRef {
        let callee_ty = self.check_expr(callee);
        let (arg_types, has_spread) = self.check_args(args);
        match callee_ty.as_ref() {
            Type::Class(class) | Type::MutableClass(class) => {
                if class.is_abstract {
                    self.error(
                        DiagnosticCode::AbstractInstantiation,
                        format!("cannot instantiate abstract class '{}'", class.name),
                        at.span,
                    );
                }
                if let Some(ctor) = class.constructor() {
                    if !has_spread {
                        let fixed = ctor.params.iter().filter(|p| !p.rest).count();
                        if arg_types.len() < ctor.required
                            || (arg_types.len() > fixed && !ctor.has_rest)
                        {
                            self.error(
                                DiagnosticCode::ArityMismatch,
                                format!(
                                    "constructor expects {} argument(s), found {}",
                                    ctor.required,
                                    arg_types.len()
                                ),
                                at.span,
                            );
                        }
                    }
                    for (i, arg_ty) in arg_types.iter().enumerate() {
                        if let Some(param) = ctor.params.get(i) {
                            if !param.rest && !self.is_compatible(&param.ty, arg_ty) {
                                self.error(
                                    DiagnosticCode::TypeError,
                                    format!(
                                        "argument of type '{arg_ty}' is not assignable to parameter of type '{}'",
                                        param.ty
                                    ),
                                    args.get(i).map(|a| a.span).unwrap_or(at.span),
                                );
                            }
                        }
                    }
                }
                Rc::new(Type::Instance(Rc::clone(class)))
            }
            Type::Any | Type::Unknown => Type::any(),
            other => {
                self.error(
                    DiagnosticCode::NotCallable,
                    format!("type '{other}' is not constructable"),
                    at.span,
                );
                Type::any()
            }
        }
    }

    // =========================================================================
    // Property access
    // =========================================================================

    fn check_get(&mut self, object: &Expr, name: &str, at: &Expr) -> TypeRef {
        let object_ty = self.check_expr(object);
        match self.property_type(&object_ty, name) {
            Some(ty) => ty,
            None => {
                // Unknown member on a known shape.
                let shaped = matches!(
                    self.evaluate(object_ty.clone()).as_ref(),
                    Type::Record { .. }
                        | Type::Interface(_)
                        | Type::Instance(_)
                        | Type::Class(_)
                        | Type::Enum(_)
                );
                if shaped {
                    self.error(
                        DiagnosticCode::UnknownProperty,
                        format!("property '{name}' does not exist on type '{object_ty}'"),
                        at.span,
                    );
                }
                Type::any()
            }
        }
    }

    /// Member lookup across the declared shape and the built-in surface.
    pub(crate) fn property_type(&mut self, object_ty: &TypeRef, name: &str) -> Option<TypeRef> {
        let evaluated = self.evaluate(object_ty.clone());
        if let Some(ty) = self.member_type_of(&evaluated, name) {
            return Some(ty);
        }
        // Setter-only members still type the write side.
        if let Type::Instance(class) = evaluated.as_ref() {
            if let Some(ty) = class.setters.borrow().get(name) {
                return Some(ty.clone());
            }
        }
        self.builtin_member_type(&evaluated, name)
    }

    fn index_result(&mut self, object_ty: &TypeRef, index_ty: &TypeRef) -> TypeRef {
        let object = self.evaluate(object_ty.clone());
        match (object.as_ref(), index_ty.as_ref()) {
            (Type::Any, _) => Type::any(),
            (Type::Array(elem), _) => elem.clone(),
            (Type::Tuple { elems, rest, .. }, Type::NumberLiteral(n)) => {
                let idx = *n as usize;
                elems
                    .get(idx)
                    .cloned()
                    .or_else(|| rest.clone())
                    .unwrap_or_else(Type::undefined)
            }
            (Type::Tuple { elems, rest, .. }, _) => {
                let mut members = elems.clone();
                if let Some(rest) = rest {
                    members.push(rest.clone());
                }
                Type::union(members)
            }
            (Type::String | Type::StringLiteral(_), _) => Type::string(),
            (Type::Record { fields, string_index, number_index, .. }, idx) => match idx {
                Type::StringLiteral(key) => fields
                    .get(key)
                    .cloned()
                    .or_else(|| string_index.clone())
                    .unwrap_or_else(Type::any),
                Type::Number | Type::NumberLiteral(_) => {
                    number_index.clone().or_else(|| string_index.clone()).unwrap_or_else(Type::any)
                }
                _ => string_index.clone().unwrap_or_else(Type::any),
            },
            (Type::Map(_, v), _) => Type::union(vec![v.clone(), Type::undefined()]),
            _ => Type::any(),
        }
    }

    // =========================================================================
    // Object literals
    // =========================================================================

    fn check_object_literal(&mut self, props: &[ObjectProp]) -> TypeRef {
        let mut fields = IndexMap::new();
        let optional = FxHashSet::default();
        for prop in props {
            match prop {
                ObjectProp::Entry { key, value } => {
                    let value_ty = self.check_expr(value);
                    match key {
                        PropKey::Static(name) => {
                            fields.insert(name.clone(), value_ty);
                        }
                        PropKey::Computed(key_expr) => {
                            // Symbol-keyed members are runtime-only; other
                            // computed keys erase to an index signature.
                            self.check_expr(key_expr);
                        }
                    }
                }
                ObjectProp::Spread(inner) => {
                    let inner_ty = self.check_expr(inner);
                    let evaluated = self.evaluate(inner_ty);
                    if let Type::Record { fields: spread_fields, .. } = evaluated.as_ref() {
                        for (k, v) in spread_fields {
                            fields.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
        Rc::new(Type::Record { fields, optional, string_index: None, number_index: None })
    }

    /// Async and generator wrappers for the declared return type.
    fn wrap_callable_return(
        &mut self,
        decl: &FunctionDecl,
        fn_type: &Rc<FunctionType>,
    ) -> Rc<FunctionType> {
        if !decl.is_generator {
            return Rc::clone(fn_type);
        }
        // A generator function's value is a function returning a generator.
        let ret = match fn_type.ret.as_ref() {
            Type::Generator { .. } | Type::AsyncGenerator { .. } => fn_type.ret.clone(),
            other => {
                let yields = match other {
                    Type::Any => Type::any(),
                    _ => fn_type.ret.clone(),
                };
                if decl.is_async {
                    Rc::new(Type::AsyncGenerator {
                        yields,
                        returns: Type::void(),
                        next: Type::undefined(),
                    })
                } else {
                    Rc::new(Type::Generator {
                        yields,
                        returns: Type::void(),
                        next: Type::undefined(),
                    })
                }
            }
        };
        Rc::new(FunctionType {
            type_params: fn_type.type_params.clone(),
            params: fn_type.params.clone(),
            ret,
            required: fn_type.required,
            has_rest: fn_type.has_rest,
            this_type: fn_type.this_type.clone(),
            predicate: fn_type.predicate.clone(),
            is_async: fn_type.is_async,
            is_generator: fn_type.is_generator,
        })
    }
}

fn literal_type(literal: &Literal) -> TypeRef {
    match literal {
        Literal::Number(n) => Rc::new(Type::NumberLiteral(*n)),
        Literal::String(s) => Rc::new(Type::StringLiteral(s.clone())),
        Literal::Boolean(b) => Rc::new(Type::BooleanLiteral(*b)),
        Literal::BigInt(_) => Type::bigint(),
        Literal::Null => Type::null(),
        Literal::Undefined => Type::undefined(),
    }
}
