//! The type checker.
//!
//! `check_program` runs the two passes: signature collection introduces all
//! top-level class/interface/enum/function headers into the environment
//! (classes as `MutableClass` so forward references and mutual recursion
//! resolve), then the body pass freezes class signatures and checks every
//! body. Within a body, checking recurses structurally and records every
//! expression's type in the `TypeMap`.

mod assignability;
mod builtin_members;
mod eval;
mod expr;
mod narrow;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use tsr_common::{Diagnostic, DiagnosticCode, LineMap, Span};
use tsr_parser::ast::*;
use tsr_parser::types::{TypeExpr, TypeParamDecl};

use crate::env::TypeEnv;
use crate::type_map::TypeMap;
use crate::types::*;

/// A registered generic type alias, resolved lazily at each use.
#[derive(Clone)]
pub(crate) struct AliasDef {
    pub params: Vec<TypeParamDecl>,
    pub body: TypeExpr,
}

/// Per-function checking context.
#[derive(Clone)]
struct FnCtx {
    return_type: Option<TypeRef>,
    yield_type: Option<TypeRef>,
    is_async: bool,
    is_generator: bool,
    this_type: Option<TypeRef>,
}

/// The checker's output.
pub struct CheckedProgram {
    pub type_map: TypeMap,
    /// Const enums for use-site inlining by the emitter.
    pub const_enums: FxHashMap<String, Rc<EnumType>>,
}

pub struct Checker {
    pub(crate) env: TypeEnv,
    pub(crate) map: TypeMap,
    pub(crate) diags: Vec<Diagnostic>,
    line_map: LineMap,
    fn_stack: Vec<FnCtx>,
    pub(crate) aliases: RefCell<FxHashMap<String, AliasDef>>,
    pub(crate) overloads: FxHashMap<String, Vec<Rc<FunctionType>>>,
    pub(crate) const_enums: FxHashMap<String, Rc<EnumType>>,
    pub(crate) depth: std::cell::Cell<u32>,
}

impl Checker {
    pub fn new(source: &str) -> Self {
        let mut checker = Checker {
            env: TypeEnv::new(),
            map: TypeMap::new(),
            diags: Vec::new(),
            line_map: LineMap::new(source),
            fn_stack: Vec::new(),
            aliases: RefCell::new(FxHashMap::default()),
            overloads: FxHashMap::default(),
            const_enums: FxHashMap::default(),
            depth: std::cell::Cell::new(0),
        };
        checker.install_globals();
        checker
    }

    /// The built-in value surface. Built-in namespaces and constructors are
    /// registry-dispatched at runtime; the checker types them loosely and
    /// leans on `builtin_members` for the receivers it understands
    /// (strings, arrays, sets, maps, promises).
    fn install_globals(&mut self) {
        for name in [
            "console", "Math", "JSON", "Object", "Array", "Promise", "Number", "Symbol", "BigInt",
            "Date", "RegExp", "Error", "TypeError", "RangeError", "SyntaxError", "Map", "Set",
            "WeakMap", "WeakSet", "parseInt", "parseFloat", "isNaN", "isFinite", "setTimeout",
            "clearTimeout", "setInterval", "clearInterval", "queueMicrotask", "globalThis",
        ] {
            self.env.define_value(name, Type::any(), true);
        }
    }

    /// Run both passes. Returns the type map on success, the diagnostics on
    /// failure.
    pub fn check_program(mut self, stmts: &[Stmt]) -> Result<CheckedProgram, Vec<Diagnostic>> {
        self.collect_signatures(stmts);
        self.freeze_classes(stmts);
        for stmt in stmts {
            self.check_stmt(stmt);
        }
        debug!(expressions = self.map.len(), diagnostics = self.diags.len(), "checked program");
        if self.diags.is_empty() {
            Ok(CheckedProgram { type_map: self.map, const_enums: self.const_enums })
        } else {
            Err(self.diags)
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub(crate) fn error(&mut self, code: DiagnosticCode, message: impl Into<String>, span: Span) {
        self.diags.push(Diagnostic::error(code, message, span));
    }

    pub(crate) fn error_at_line(&mut self, code: DiagnosticCode, message: impl Into<String>, line: u32) {
        let span = Span::at(self.line_map.line_start(line));
        self.diags.push(Diagnostic::error(code, message, span));
    }

    // =========================================================================
    // Pass 1: signature collection
    // =========================================================================

    /// Introduce all declaration headers into the environment. Runs in two
    /// phases so that mutually recursive classes resolve: first create and
    /// bind every named declaration, then fill in signatures.
    pub(crate) fn collect_signatures(&mut self, stmts: &[Stmt]) {
        // Phase A: create bindings.
        for stmt in stmts {
            self.declare_stmt(stmt);
        }
        // Phase B: fill headers.
        for stmt in stmts {
            self.fill_signatures(stmt);
        }
    }

    fn declare_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Class(decl) => {
                if self.env.type_declared_locally(&decl.name) {
                    self.error_at_line(
                        DiagnosticCode::DuplicateIdentifier,
                        format!("duplicate identifier '{}'", decl.name),
                        decl.line,
                    );
                    return;
                }
                let type_params = self.collect_type_params(&decl.type_params);
                let class = ClassType::thawed(decl.name.clone(), type_params, decl.is_abstract);
                self.env.define_type(&decl.name, Rc::new(Type::Instance(Rc::clone(&class))));
                self.env
                    .define_value(&decl.name, Rc::new(Type::MutableClass(class)), true);
            }
            StmtKind::Interface(decl) => {
                let type_params = self.collect_type_params(&decl.type_params);
                let iface = InterfaceType::thawed(decl.name.clone(), type_params);
                self.env.define_type(&decl.name, Rc::new(Type::Interface(iface)));
            }
            StmtKind::Enum(decl) => self.declare_enum(decl),
            StmtKind::TypeAlias { name, type_params, target } => {
                self.aliases.borrow_mut().insert(
                    name.clone(),
                    AliasDef { params: type_params.clone(), body: target.clone() },
                );
            }
            StmtKind::Function(func) => self.declare_function(func),
            StmtKind::Namespace { name, body } => self.declare_namespace(name, body),
            StmtKind::Export(inner) => self.declare_stmt(inner),
            StmtKind::DeclareGlobal { body } | StmtKind::DeclareModule { body, .. } => {
                for inner in body {
                    self.declare_stmt(inner);
                    self.declare_ambient_value(inner);
                }
            }
            StmtKind::Import { specs, namespace, .. } => {
                // Cross-module types flow as `any`; the module loader wires
                // the values at run time.
                for spec in specs {
                    let bound = spec.alias.as_ref().unwrap_or(&spec.name);
                    self.env.define_value(bound, Type::any(), true);
                    self.env.define_type(bound, Type::any());
                }
                if let Some(ns) = namespace {
                    self.env.define_value(ns, Type::any(), true);
                }
            }
            StmtKind::ImportAlias { name, .. } => {
                self.env.define_value(name, Type::any(), true);
            }
            _ => {}
        }
    }

    /// Ambient `declare const/let/function` bodies bind their annotated
    /// types as values.
    fn declare_ambient_value(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Var { name, type_ann, .. } | StmtKind::Const { name, type_ann, .. } => {
                let ty = type_ann
                    .as_ref()
                    .map(|t| self.resolve_type(t))
                    .unwrap_or_else(Type::any);
                self.env.define_value(name, ty, true);
            }
            _ => {}
        }
    }

    fn declare_function(&mut self, func: &Rc<FunctionDecl>) {
        let Some(name) = func.name.clone() else { return };
        let fn_type = self.function_type_of(func);
        if func.body.is_none() {
            // Overload signature: remembered for call checking, no binding
            // of its own.
            self.overloads.entry(name).or_default().push(fn_type);
            return;
        }
        self.env
            .define_value(&name, Rc::new(Type::Function(fn_type)), true);
    }

    fn declare_namespace(&mut self, name: &str, body: &[Stmt]) {
        let ns = Rc::new(NamespaceType::default());
        let inner = self.env.child();
        let outer = std::mem::replace(&mut self.env, inner);
        self.collect_signatures(body);
        let inner = std::mem::replace(&mut self.env, outer);
        // Exported members become namespace members; everything the inner
        // scope declared counts as exported for lookup purposes.
        for stmt in body {
            let exported = match &stmt.kind {
                StmtKind::Export(inner_stmt) => inner_stmt.as_ref(),
                other => {
                    let _ = other;
                    stmt
                }
            };
            match &exported.kind {
                StmtKind::Function(f) => {
                    if let Some(fname) = &f.name {
                        if let Some(binding) = inner.lookup_value(fname) {
                            ns.values.borrow_mut().insert(fname.clone(), binding.ty);
                        }
                    }
                }
                StmtKind::Class(c) => {
                    if let Some(binding) = inner.lookup_value(&c.name) {
                        ns.values.borrow_mut().insert(c.name.clone(), binding.ty);
                    }
                    if let Some(ty) = inner.lookup_type(&c.name) {
                        ns.types.borrow_mut().insert(c.name.clone(), ty);
                    }
                }
                StmtKind::Enum(e) => {
                    if let Some(binding) = inner.lookup_value(&e.name) {
                        ns.values.borrow_mut().insert(e.name.clone(), binding.ty);
                    }
                }
                StmtKind::Interface(i) => {
                    if let Some(ty) = inner.lookup_type(&i.name) {
                        ns.types.borrow_mut().insert(i.name.clone(), ty);
                    }
                }
                _ => {}
            }
        }
        // Namespace merging: a second declaration of the same namespace
        // extends the existing tables.
        if let Some(existing) = self.env.lookup_value(name) {
            if let Type::Namespace(existing_ns) = existing.ty.as_ref() {
                existing_ns
                    .values
                    .borrow_mut()
                    .extend(ns.values.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                existing_ns
                    .types
                    .borrow_mut()
                    .extend(ns.types.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                return;
            }
        }
        self.env.define_value(name, Rc::new(Type::Namespace(ns)), true);
    }

    fn fill_signatures(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Class(decl) => self.fill_class_signature(decl),
            StmtKind::Interface(decl) => self.fill_interface_signature(decl),
            StmtKind::Export(inner) => self.fill_signatures(inner),
            _ => {}
        }
    }

    fn class_of_binding(&self, name: &str) -> Option<Rc<ClassType>> {
        match self.env.lookup_value(name)?.ty.as_ref() {
            Type::MutableClass(c) | Type::Class(c) => Some(Rc::clone(c)),
            _ => None,
        }
    }

    fn fill_class_signature(&mut self, decl: &ClassDecl) {
        let Some(class) = self.class_of_binding(&decl.name) else { return };
        if class.is_frozen() {
            return;
        }

        // Superclass link.
        if let Some(super_expr) = &decl.superclass {
            if let ExprKind::Variable(super_name) = &super_expr.kind {
                match self.class_of_binding(super_name) {
                    Some(parent) => {
                        if parent.derives_from(&class) {
                            self.error_at_line(
                                DiagnosticCode::TypeError,
                                format!("class '{}' circularly extends itself", decl.name),
                                decl.line,
                            );
                        } else {
                            *class.superclass.borrow_mut() =
                                Some(Rc::new(Type::MutableClass(parent)));
                        }
                    }
                    None => self.error_at_line(
                        DiagnosticCode::UndefinedVariable,
                        format!("unknown superclass '{super_name}'"),
                        decl.line,
                    ),
                }
            }
        }

        // Member headers, checked in a scope where the class's type
        // parameters resolve.
        let scope = self.env.child();
        let outer = std::mem::replace(&mut self.env, scope);
        for tp in &class.type_params {
            self.env.define_type(
                &tp.name,
                Rc::new(Type::TypeParameter { name: tp.name.clone(), constraint: tp.constraint.clone() }),
            );
        }
        for member in &decl.members {
            match member {
                ClassMember::Field { name, type_ann, is_static, readonly, .. } => {
                    let ty = type_ann
                        .as_ref()
                        .map(|t| self.resolve_type(t))
                        .unwrap_or_else(Type::any);
                    if *is_static {
                        class.statics.borrow_mut().insert(name.clone(), ty);
                    } else {
                        class.fields.borrow_mut().insert(
                            name.clone(),
                            MemberInfo { ty, readonly: *readonly, optional: false },
                        );
                    }
                }
                ClassMember::Method { func, is_static, .. } => {
                    let Some(name) = func.name.clone() else { continue };
                    if name == "constructor" {
                        if func.body.is_some() || class.ctor.borrow().is_none() {
                            *class.ctor.borrow_mut() = Some(self.function_type_of(func));
                        }
                        // Parameter properties declare instance fields.
                        for param in &func.params {
                            if param.access.is_none() && !param.readonly {
                                continue;
                            }
                            let ty = param
                                .type_ann
                                .as_ref()
                                .map(|t| self.resolve_type(t))
                                .unwrap_or_else(Type::any);
                            class.fields.borrow_mut().insert(
                                param.name.clone(),
                                MemberInfo { ty, readonly: param.readonly, optional: false },
                            );
                        }
                        continue;
                    }
                    let fn_type = Rc::new(Type::Function(self.function_type_of(func)));
                    if *is_static {
                        class.statics.borrow_mut().insert(name, fn_type);
                    } else {
                        class.methods.borrow_mut().insert(name, fn_type);
                    }
                }
                ClassMember::Getter { name, func, is_static } => {
                    let ret = func
                        .return_type
                        .as_ref()
                        .map(|t| self.resolve_type(t))
                        .unwrap_or_else(Type::any);
                    if *is_static {
                        class.statics.borrow_mut().insert(name.clone(), ret);
                    } else {
                        class.getters.borrow_mut().insert(name.clone(), ret);
                    }
                }
                ClassMember::Setter { name, func, is_static } => {
                    let param_ty = func
                        .params
                        .first()
                        .and_then(|p| p.type_ann.as_ref())
                        .map(|t| self.resolve_type(t))
                        .unwrap_or_else(Type::any);
                    if !*is_static {
                        class.setters.borrow_mut().insert(name.clone(), param_ty);
                    }
                }
                ClassMember::StaticBlock(_) => {}
            }
        }
        let _ = std::mem::replace(&mut self.env, outer);
    }

    fn fill_interface_signature(&mut self, decl: &InterfaceDecl) {
        let Some(binding) = self.env.lookup_type(&decl.name) else { return };
        let Type::Interface(iface) = binding.as_ref() else { return };
        let iface = Rc::clone(iface);

        let scope = self.env.child();
        let outer = std::mem::replace(&mut self.env, scope);
        for tp in &iface.type_params {
            self.env.define_type(
                &tp.name,
                Rc::new(Type::TypeParameter { name: tp.name.clone(), constraint: tp.constraint.clone() }),
            );
        }
        for parent in &decl.extends {
            let parent_ty = self.resolve_type(parent);
            if matches!(parent_ty.as_ref(), Type::Interface(_)) {
                iface.extends.borrow_mut().push(parent_ty);
            }
        }
        for member in &decl.members {
            match member {
                InterfaceMember::Property { name, type_ann, optional, .. } => {
                    let ty = self.resolve_type(type_ann);
                    iface.members.borrow_mut().insert(name.clone(), ty);
                    if *optional {
                        iface.optional.borrow_mut().insert(name.clone());
                    }
                }
                InterfaceMember::Method { name, func_type, optional } => {
                    let ty = self.resolve_type(func_type);
                    iface.members.borrow_mut().insert(name.clone(), ty);
                    if *optional {
                        iface.optional.borrow_mut().insert(name.clone());
                    }
                }
                InterfaceMember::StringIndex(value) => {
                    *iface.string_index.borrow_mut() = Some(self.resolve_type(value));
                }
                InterfaceMember::NumberIndex(value) => {
                    *iface.number_index.borrow_mut() = Some(self.resolve_type(value));
                }
            }
        }
        let _ = std::mem::replace(&mut self.env, outer);
    }

    /// After signature collection, every `MutableClass` binding freezes into
    /// `Class`; nothing mutates class tables afterwards.
    fn freeze_classes(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            let decl = match &stmt.kind {
                StmtKind::Class(decl) => decl,
                StmtKind::Export(inner) => {
                    if let StmtKind::Class(decl) = &inner.kind {
                        decl
                    } else {
                        continue;
                    }
                }
                _ => continue,
            };
            if let Some(class) = self.class_of_binding(&decl.name) {
                class.freeze();
                self.env
                    .define_value(&decl.name, Rc::new(Type::Class(class)), true);
            }
        }
    }

    pub(crate) fn collect_type_params(&mut self, decls: &[TypeParamDecl]) -> Vec<TypeParamInfo> {
        decls
            .iter()
            .map(|d| TypeParamInfo {
                name: d.name.clone(),
                constraint: d.constraint.as_ref().map(|c| self.resolve_type(c)),
                default: d.default.as_ref().map(|c| self.resolve_type(c)),
            })
            .collect()
    }

    /// The declared type of a function, resolved in a scope where its type
    /// parameters are visible.
    pub(crate) fn function_type_of(&mut self, func: &FunctionDecl) -> Rc<FunctionType> {
        let scope = self.env.child();
        let outer = std::mem::replace(&mut self.env, scope);
        let type_params = self.collect_type_params(&func.type_params);
        for tp in &type_params {
            self.env.define_type(
                &tp.name,
                Rc::new(Type::TypeParameter { name: tp.name.clone(), constraint: tp.constraint.clone() }),
            );
        }
        let params: Vec<ParamType> = func
            .params
            .iter()
            .map(|p| ParamType {
                name: p.name.clone(),
                ty: p
                    .type_ann
                    .as_ref()
                    .map(|t| self.resolve_type(t))
                    .unwrap_or_else(Type::any),
                optional: p.optional || p.default.is_some(),
                rest: p.is_rest,
            })
            .collect();

        let mut predicate = None;
        let declared_ret = match &func.return_type {
            Some(TypeExpr::Predicate { param, ty }) => {
                predicate = Some((param.clone(), self.resolve_type(ty)));
                Some(Type::boolean())
            }
            Some(other) => Some(self.resolve_type(other)),
            None => None,
        };
        let ret = declared_ret.unwrap_or_else(Type::any);
        let ret = if func.is_async && !matches!(ret.as_ref(), Type::Promise(_) | Type::Any) {
            Rc::new(Type::Promise(ret))
        } else {
            ret
        };
        let required = func
            .params
            .iter()
            .filter(|p| !p.optional && p.default.is_none() && !p.is_rest)
            .count();
        let has_rest = func.params.iter().any(|p| p.is_rest);
        let _ = std::mem::replace(&mut self.env, outer);
        Rc::new(FunctionType {
            type_params,
            params,
            ret,
            required,
            has_rest,
            this_type: None,
            predicate,
            is_async: func.is_async,
            is_generator: func.is_generator,
        })
    }

    // =========================================================================
    // Pass 2: statements
    // =========================================================================

    pub(crate) fn check_block(&mut self, stmts: &[Stmt]) {
        let inner = self.env.child();
        let outer = std::mem::replace(&mut self.env, inner);
        self.collect_signatures(stmts);
        self.freeze_classes(stmts);
        for stmt in stmts {
            self.check_stmt(stmt);
        }
        let _ = std::mem::replace(&mut self.env, outer);
    }

    pub(crate) fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.check_expr(expr);
            }
            StmtKind::Var { name, type_ann, init } => {
                self.check_var(name, type_ann.as_ref(), init.as_ref(), false, stmt.line);
            }
            StmtKind::Const { name, type_ann, init } => {
                self.check_var(name, type_ann.as_ref(), Some(init), true, stmt.line);
            }
            StmtKind::Using { name, init } => {
                let ty = self.check_expr(init);
                self.env.define_value(name, ty, true);
            }
            StmtKind::Function(func) => {
                if self.env.lookup_value(func.name.as_deref().unwrap_or("")).is_none() {
                    self.declare_function(func);
                }
                self.check_function_body(func, None);
            }
            StmtKind::Class(decl) => self.check_class_bodies(decl),
            StmtKind::Interface(_) | StmtKind::TypeAlias { .. } | StmtKind::Directive(_) => {}
            StmtKind::Enum(_) => {}
            StmtKind::Block(stmts) => self.check_block(stmts),
            StmtKind::Sequence(stmts) => {
                for inner in stmts {
                    self.check_stmt(inner);
                }
            }
            StmtKind::Return(value) => self.check_return(value.as_ref(), stmt.line),
            StmtKind::While { cond, body } => {
                self.check_expr(cond);
                self.check_stmt(body);
            }
            StmtKind::DoWhile { body, cond } => {
                self.check_stmt(body);
                self.check_expr(cond);
            }
            StmtKind::For { init, cond, update, body } => {
                let inner = self.env.child();
                let outer = std::mem::replace(&mut self.env, inner);
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                if let Some(cond) = cond {
                    self.check_expr(cond);
                }
                if let Some(update) = update {
                    self.check_expr(update);
                }
                self.check_stmt(body);
                let _ = std::mem::replace(&mut self.env, outer);
            }
            StmtKind::ForOf { name, iterable, body, is_await } => {
                let iter_ty = self.check_expr(iterable);
                let mut elem = self.element_type_of(&iter_ty, iterable.span);
                if *is_await {
                    if let Type::Promise(inner) = elem.as_ref() {
                        elem = inner.clone();
                    }
                }
                let inner = self.env.child();
                let outer = std::mem::replace(&mut self.env, inner);
                self.env.define_value(name, elem, true);
                self.check_stmt(body);
                let _ = std::mem::replace(&mut self.env, outer);
            }
            StmtKind::ForIn { name, object, body } => {
                self.check_expr(object);
                let inner = self.env.child();
                let outer = std::mem::replace(&mut self.env, inner);
                self.env.define_value(name, Type::string(), true);
                self.check_stmt(body);
                let _ = std::mem::replace(&mut self.env, outer);
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                self.check_expr(cond);
                let (true_env, false_env) = self.narrowed_branches(cond);
                let outer = std::mem::replace(&mut self.env, true_env);
                self.check_stmt(then_branch);
                self.env = false_env;
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch);
                }
                self.env = outer;
            }
            StmtKind::Break(_) | StmtKind::Continue(_) => {}
            StmtKind::Labeled { body, .. } => self.check_stmt(body),
            StmtKind::Switch { discriminant, cases } => {
                let disc_ty = self.check_expr(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        let test_ty = self.check_expr(test);
                        // Per-case narrowing on a plain variable discriminant.
                        if let ExprKind::Variable(name) = &discriminant.kind {
                            if test_ty.is_literal() {
                                let narrowed = self.narrow_to_literal(&disc_ty, &test_ty);
                                let inner = self.env.child();
                                let outer = std::mem::replace(&mut self.env, inner);
                                self.env.define_value(name, narrowed, true);
                                for inner_stmt in &case.body {
                                    self.check_stmt(inner_stmt);
                                }
                                let _ = std::mem::replace(&mut self.env, outer);
                                continue;
                            }
                        }
                    }
                    for inner_stmt in &case.body {
                        self.check_stmt(inner_stmt);
                    }
                }
            }
            StmtKind::TryCatch { try_block, catch_param, catch_block, finally_block } => {
                self.check_block(try_block);
                if let Some(catch_block) = catch_block {
                    let inner = self.env.child();
                    let outer = std::mem::replace(&mut self.env, inner);
                    if let Some(param) = catch_param {
                        self.env.define_value(param, Type::any(), false);
                    }
                    for inner_stmt in catch_block {
                        self.check_stmt(inner_stmt);
                    }
                    let _ = std::mem::replace(&mut self.env, outer);
                }
                if let Some(finally_block) = finally_block {
                    self.check_block(finally_block);
                }
            }
            StmtKind::Throw(expr) => {
                self.check_expr(expr);
            }
            StmtKind::Namespace { body, .. } => {
                // Bodies were collected in pass 1; check them for errors in
                // an inner scope.
                self.check_block(body);
            }
            StmtKind::Import { .. } | StmtKind::ImportAlias { .. } => {}
            StmtKind::Export(inner) => self.check_stmt(inner),
            StmtKind::DeclareModule { .. } | StmtKind::DeclareGlobal { .. } => {}
        }
    }

    fn check_var(
        &mut self,
        name: &str,
        type_ann: Option<&TypeExpr>,
        init: Option<&Expr>,
        is_const: bool,
        line: u32,
    ) {
        if self.env.declared_locally(name) && !name.starts_with("_dest") && !name.starts_with("_param") {
            self.error_at_line(
                DiagnosticCode::DuplicateIdentifier,
                format!("duplicate identifier '{name}'"),
                line,
            );
        }
        let init_ty = init.map(|e| self.check_expr(e));
        let declared = type_ann.map(|t| self.resolve_type(t));
        match (&declared, &init_ty, init) {
            (Some(expected), Some(actual), Some(init_expr)) => {
                self.check_assignable(expected, actual, init_expr);
                self.env.define_value(name, expected.clone(), is_const);
            }
            (Some(expected), None, _) => {
                self.env.define_value(name, expected.clone(), is_const);
            }
            (None, Some(actual), _) => {
                let bound = if is_const { actual.clone() } else { Type::widen(actual) };
                self.env.define_value(name, bound, is_const);
            }
            (None, None, _) => {
                self.env.define_value(name, Type::undefined(), is_const);
            }
            (Some(_), Some(_), None) => unreachable!("init_ty is only Some when init is Some"),
        }
    }

    fn check_return(&mut self, value: Option<&Expr>, line: u32) {
        let expected = self.fn_stack.last().and_then(|c| c.return_type.clone());
        let is_async = self.fn_stack.last().is_some_and(|c| c.is_async);
        let actual = match value {
            Some(expr) => self.check_expr(expr),
            None => Type::undefined(),
        };
        if let Some(expected) = expected {
            // Inside an async body, returned values check against the
            // promise's payload.
            let expected = match (is_async, expected.as_ref()) {
                (true, Type::Promise(inner)) => inner.clone(),
                _ => expected,
            };
            if matches!(expected.as_ref(), Type::Void) {
                return;
            }
            if !self.is_compatible(&expected, &actual) {
                self.error_at_line(
                    DiagnosticCode::TypeError,
                    format!("type '{actual}' is not assignable to return type '{expected}'"),
                    line,
                );
            }
        }
    }

    // =========================================================================
    // Function and class bodies
    // =========================================================================

    /// Check a function body with parameters bound. `this_type` is set for
    /// methods.
    pub(crate) fn check_function_body(&mut self, func: &FunctionDecl, this_type: Option<TypeRef>) {
        let Some(body) = &func.body else { return };
        let fn_type = self.function_type_of(func);

        let inner = self.env.child();
        let outer = std::mem::replace(&mut self.env, inner);
        for tp in &fn_type.type_params {
            self.env.define_type(
                &tp.name,
                Rc::new(Type::TypeParameter { name: tp.name.clone(), constraint: tp.constraint.clone() }),
            );
        }
        for param in &fn_type.params {
            let ty = if param.rest {
                Rc::new(Type::Array(param.ty.clone()))
            } else {
                param.ty.clone()
            };
            self.env.define_value(&param.name, ty, false);
        }

        let (return_type, yield_type) = match (func.is_generator, fn_type.ret.as_ref()) {
            (true, Type::Generator { yields, returns, .. })
            | (true, Type::AsyncGenerator { yields, returns, .. }) => {
                (Some(returns.clone()), Some(yields.clone()))
            }
            (true, _) => (None, None),
            (false, _) => (func.return_type.as_ref().map(|_| fn_type.ret.clone()), None),
        };
        self.fn_stack.push(FnCtx {
            return_type,
            yield_type,
            is_async: func.is_async,
            is_generator: func.is_generator,
            this_type: this_type.clone(),
        });
        if let Some(this_ty) = this_type {
            self.env.define_value("this", this_ty, true);
        }
        self.collect_signatures(body);
        self.freeze_classes(body);
        for stmt in body {
            self.check_stmt(stmt);
        }
        self.fn_stack.pop();
        let _ = std::mem::replace(&mut self.env, outer);
    }

    pub(crate) fn current_this(&self) -> Option<TypeRef> {
        self.fn_stack.iter().rev().find_map(|c| c.this_type.clone())
    }

    pub(crate) fn in_async(&self) -> bool {
        self.fn_stack.last().is_some_and(|c| c.is_async)
    }

    pub(crate) fn in_generator(&self) -> bool {
        self.fn_stack.last().is_some_and(|c| c.is_generator)
    }

    pub(crate) fn expected_yield(&self) -> Option<TypeRef> {
        self.fn_stack.last().and_then(|c| c.yield_type.clone())
    }

    fn check_class_bodies(&mut self, decl: &ClassDecl) {
        let Some(class) = self.class_of_binding(&decl.name) else { return };
        let instance: TypeRef = Rc::new(Type::Instance(Rc::clone(&class)));
        let static_side: TypeRef = Rc::new(Type::Class(Rc::clone(&class)));

        let scope = self.env.child();
        let outer = std::mem::replace(&mut self.env, scope);
        for tp in &class.type_params {
            self.env.define_type(
                &tp.name,
                Rc::new(Type::TypeParameter { name: tp.name.clone(), constraint: tp.constraint.clone() }),
            );
        }
        // `super` resolves inside method bodies via the class wrapper scope.
        if let Some(superclass) = class.superclass.borrow().as_ref() {
            if let Type::Class(parent) | Type::MutableClass(parent) = superclass.as_ref() {
                self.env.define_value(
                    "super",
                    Rc::new(Type::Instance(Rc::clone(parent))),
                    true,
                );
            }
        }

        for member in &decl.members {
            match member {
                ClassMember::Field { init: Some(init), type_ann, is_static, .. } => {
                    let init_ty = self.check_expr(init);
                    if let Some(ann) = type_ann {
                        let declared = self.resolve_type(ann);
                        self.check_assignable(&declared, &init_ty, init);
                    }
                    let _ = is_static;
                }
                ClassMember::Field { .. } => {}
                ClassMember::Method { func, is_static, .. } => {
                    let this_ty = if *is_static { static_side.clone() } else { instance.clone() };
                    self.check_function_body(func, Some(this_ty));
                }
                ClassMember::Getter { func, is_static, .. }
                | ClassMember::Setter { func, is_static, .. } => {
                    let this_ty = if *is_static { static_side.clone() } else { instance.clone() };
                    self.check_function_body(func, Some(this_ty));
                }
                ClassMember::StaticBlock(body) => {
                    let inner = self.env.child();
                    let outer_env = std::mem::replace(&mut self.env, inner);
                    self.env.define_value("this", static_side.clone(), true);
                    for stmt in body {
                        self.check_stmt(stmt);
                    }
                    let _ = std::mem::replace(&mut self.env, outer_env);
                }
            }
        }

        let _ = std::mem::replace(&mut self.env, outer);
    }

    // =========================================================================
    // Enums
    // =========================================================================

    fn declare_enum(&mut self, decl: &EnumDecl) {
        let mut members: IndexMap<String, EnumMemberValue> = IndexMap::new();
        let mut next_auto = Some(0.0f64);
        let mut saw_number = false;
        let mut saw_string = false;

        for member in &decl.members {
            let value = match &member.init {
                None => match next_auto {
                    Some(n) => EnumMemberValue::Number(n),
                    None => {
                        self.error_at_line(
                            DiagnosticCode::EnumError,
                            format!(
                                "enum member '{}' needs an initializer after a string member",
                                member.name
                            ),
                            member.line,
                        );
                        EnumMemberValue::Number(0.0)
                    }
                },
                Some(init) => match self.const_eval_enum_init(init, &members, decl.is_const) {
                    Some(v) => v,
                    None => {
                        self.error_at_line(
                            DiagnosticCode::EnumError,
                            format!("enum member '{}' has a non-constant initializer", member.name),
                            member.line,
                        );
                        EnumMemberValue::Number(0.0)
                    }
                },
            };
            match &value {
                EnumMemberValue::Number(n) => {
                    saw_number = true;
                    next_auto = Some(n + 1.0);
                }
                EnumMemberValue::String(_) => {
                    saw_string = true;
                    next_auto = None;
                }
            }
            members.insert(member.name.clone(), value);
        }

        let kind = if decl.is_const {
            EnumKind::Const
        } else if saw_number && saw_string {
            EnumKind::Heterogeneous
        } else if saw_string {
            EnumKind::String
        } else {
            EnumKind::Numeric
        };
        let enum_type = Rc::new(EnumType { name: decl.name.clone(), kind, members });
        if decl.is_const {
            self.const_enums
                .insert(decl.name.clone(), Rc::clone(&enum_type));
        }
        self.env
            .define_type(&decl.name, Rc::new(Type::Enum(Rc::clone(&enum_type))));
        self.env
            .define_value(&decl.name, Rc::new(Type::Enum(enum_type)), true);
    }

    /// Constant-fold an enum initializer. The accepted operator set is the
    /// intersection whitelist: `+ - * / % ** & | ^ << >> ~` plus string `+`.
    fn const_eval_enum_init(
        &self,
        expr: &Expr,
        members: &IndexMap<String, EnumMemberValue>,
        is_const: bool,
    ) -> Option<EnumMemberValue> {
        match &expr.kind {
            ExprKind::Literal(Literal::Number(n)) => Some(EnumMemberValue::Number(*n)),
            ExprKind::Literal(Literal::String(s)) => Some(EnumMemberValue::String(s.clone())),
            ExprKind::Grouping(inner) => self.const_eval_enum_init(inner, members, is_const),
            ExprKind::Variable(name) => match members.get(name) {
                Some(v) => Some(v.clone()),
                None => None,
            },
            ExprKind::Unary { op: UnaryOp::Minus, operand } => {
                match self.const_eval_enum_init(operand, members, is_const)? {
                    EnumMemberValue::Number(n) => Some(EnumMemberValue::Number(-n)),
                    EnumMemberValue::String(_) => None,
                }
            }
            ExprKind::Unary { op: UnaryOp::BitNot, operand } => {
                match self.const_eval_enum_init(operand, members, is_const)? {
                    EnumMemberValue::Number(n) => {
                        Some(EnumMemberValue::Number(!(n as i64 as i32) as f64))
                    }
                    EnumMemberValue::String(_) => None,
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.const_eval_enum_init(left, members, is_const)?;
                let r = self.const_eval_enum_init(right, members, is_const)?;
                match (l, r) {
                    (EnumMemberValue::Number(a), EnumMemberValue::Number(b)) => {
                        let v = match op {
                            BinaryOp::Add => a + b,
                            BinaryOp::Sub => a - b,
                            BinaryOp::Mul => a * b,
                            BinaryOp::Div => a / b,
                            BinaryOp::Rem => a % b,
                            BinaryOp::Pow => a.powf(b),
                            BinaryOp::BitAnd => ((a as i64 as i32) & (b as i64 as i32)) as f64,
                            BinaryOp::BitOr => ((a as i64 as i32) | (b as i64 as i32)) as f64,
                            BinaryOp::BitXor => ((a as i64 as i32) ^ (b as i64 as i32)) as f64,
                            BinaryOp::Shl => {
                                (((a as i64 as i32) << ((b as i64 as u32) & 31)) as i32) as f64
                            }
                            BinaryOp::Shr => ((a as i64 as i32) >> ((b as i64 as u32) & 31)) as f64,
                            _ => return None,
                        };
                        Some(EnumMemberValue::Number(v))
                    }
                    (EnumMemberValue::String(a), EnumMemberValue::String(b)) => {
                        if matches!(op, BinaryOp::Add) {
                            Some(EnumMemberValue::String(format!("{a}{b}")))
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Element type produced by iterating a value of type `ty`.
    pub(crate) fn element_type_of(&mut self, ty: &TypeRef, span: Span) -> TypeRef {
        let ty = self.evaluate(ty.clone());
        match ty.as_ref() {
            Type::Any | Type::Unknown => Type::any(),
            Type::Array(elem) | Type::Iterator(elem) | Type::Set(elem) => elem.clone(),
            Type::Tuple { elems, rest, .. } => {
                let mut members = elems.clone();
                if let Some(rest) = rest {
                    members.push(rest.clone());
                }
                Type::union(members)
            }
            Type::Map(k, v) => Rc::new(Type::Tuple {
                elems: vec![k.clone(), v.clone()],
                rest: None,
                required: 2,
            }),
            Type::String | Type::StringLiteral(_) => Type::string(),
            Type::Generator { yields, .. } | Type::AsyncGenerator { yields, .. } => yields.clone(),
            Type::Union(members) => {
                let elems = members
                    .iter()
                    .map(|m| self.element_type_of(m, span))
                    .collect();
                Type::union(elems)
            }
            other => {
                self.error(
                    DiagnosticCode::TypeError,
                    format!("type '{other}' is not iterable"),
                    span,
                );
                Type::any()
            }
        }
    }
}
