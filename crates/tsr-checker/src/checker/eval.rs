//! Type resolution and computed-type evaluation.
//!
//! `resolve_type` turns syntactic annotations into semantic types against the
//! current environment. `evaluate` normalizes the lazy operators (keyof,
//! mapped, indexed access, conditional, intrinsic string types, generic
//! instantiation); evaluation is lazy in the sense that types containing free
//! type parameters pass through untouched until substitution makes them
//! concrete. Recursion depth is bounded by `MAX_TYPE_INSTANTIATION_DEPTH`.

use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use tsr_common::limits::MAX_TYPE_INSTANTIATION_DEPTH;
use tsr_parser::types::{TypeExpr, TypeMember};

use crate::checker::Checker;
use crate::types::*;

pub(crate) type Substitutions = FxHashMap<String, TypeRef>;

impl Checker {
    // =========================================================================
    // Resolution: TypeExpr → Type
    // =========================================================================

    pub(crate) fn resolve_type(&mut self, expr: &TypeExpr) -> TypeRef {
        match expr {
            TypeExpr::Named { name, args } => self.resolve_named(name, args),
            TypeExpr::Qualified { parts, args } => self.resolve_qualified(parts, args),
            TypeExpr::Union(members) => {
                let resolved = members.iter().map(|m| self.resolve_type(m)).collect();
                Type::union(resolved)
            }
            TypeExpr::Intersection(members) => {
                let resolved = members.iter().map(|m| self.resolve_type(m)).collect();
                Type::intersection(resolved)
            }
            TypeExpr::Array(elem) => Rc::new(Type::Array(self.resolve_type(elem))),
            TypeExpr::Tuple(members) => {
                let mut elems = Vec::new();
                let mut rest = None;
                let mut required = 0;
                for member in members {
                    let ty = self.resolve_type(&member.ty);
                    if member.rest {
                        // `...T[]` — unwrap the array around the rest element.
                        rest = Some(match ty.as_ref() {
                            Type::Array(inner) => inner.clone(),
                            _ => ty,
                        });
                    } else {
                        if !member.optional {
                            required += 1;
                        }
                        elems.push(ty);
                    }
                }
                Rc::new(Type::Tuple { elems, rest, required })
            }
            TypeExpr::Function { params, ret } => {
                let params: Vec<ParamType> = params
                    .iter()
                    .map(|p| ParamType {
                        name: p.name.clone(),
                        ty: self.resolve_type(&p.ty),
                        optional: p.optional,
                        rest: p.rest,
                    })
                    .collect();
                let ret = self.resolve_type(ret);
                Rc::new(Type::Function(Rc::new(FunctionType::simple(params, ret))))
            }
            TypeExpr::ObjectLiteral(members) => {
                let mut fields = IndexMap::new();
                let mut optional = FxHashSet::default();
                let mut string_index = None;
                let mut number_index = None;
                for member in members {
                    match member {
                        TypeMember::Property { name, ty, optional: opt, .. } => {
                            fields.insert(name.clone(), self.resolve_type(ty));
                            if *opt {
                                optional.insert(name.clone());
                            }
                        }
                        TypeMember::StringIndex(value) => {
                            string_index = Some(self.resolve_type(value));
                        }
                        TypeMember::NumberIndex(value) => {
                            number_index = Some(self.resolve_type(value));
                        }
                    }
                }
                Rc::new(Type::Record { fields, optional, string_index, number_index })
            }
            TypeExpr::Mapped { param, constraint, value, optional, readonly } => {
                let constraint_ty = self.resolve_type(constraint);
                // The parameter is in scope while resolving the body.
                let scope = self.env.child();
                let outer = std::mem::replace(&mut self.env, scope);
                self.env.define_type(
                    param,
                    Rc::new(Type::TypeParameter {
                        name: param.clone(),
                        constraint: Some(constraint_ty.clone()),
                    }),
                );
                let value_ty = self.resolve_type(value);
                let _ = std::mem::replace(&mut self.env, outer);
                let mapped = Rc::new(Type::Mapped {
                    param: param.clone(),
                    constraint: constraint_ty,
                    value: value_ty,
                    optional: *optional,
                    readonly: *readonly,
                });
                self.evaluate(mapped)
            }
            TypeExpr::StringLiteral(s) => Rc::new(Type::StringLiteral(s.clone())),
            TypeExpr::NumberLiteral(n) => Rc::new(Type::NumberLiteral(*n)),
            TypeExpr::BooleanLiteral(b) => Rc::new(Type::BooleanLiteral(*b)),
            TypeExpr::TemplateLiteral { strings, types } => {
                let types = types.iter().map(|t| self.resolve_type(t)).collect();
                Rc::new(Type::TemplateLiteral { strings: strings.clone(), types })
            }
            TypeExpr::KeyOf(inner) => {
                let inner = self.resolve_type(inner);
                self.evaluate(Rc::new(Type::KeyOf(inner)))
            }
            TypeExpr::TypeQuery(name) => match self.env.lookup_value(name) {
                Some(binding) => binding.ty,
                None => Type::any(),
            },
            TypeExpr::IndexedAccess { object, index } => {
                let object = self.resolve_type(object);
                let index = self.resolve_type(index);
                self.evaluate(Rc::new(Type::IndexedAccess { object, index }))
            }
            TypeExpr::Conditional { check, extends, then_ty, else_ty } => {
                let check = self.resolve_type(check);
                // `infer R` declarations scope over the true branch.
                let mut infer_params = Vec::new();
                collect_infer_params(extends, &mut infer_params);
                let scope = self.env.child();
                let outer = std::mem::replace(&mut self.env, scope);
                for name in &infer_params {
                    self.env.define_type(
                        name,
                        Rc::new(Type::TypeParameter { name: name.clone(), constraint: None }),
                    );
                }
                let extends = self.resolve_type(extends);
                let then_ty = self.resolve_type(then_ty);
                let _ = std::mem::replace(&mut self.env, outer);
                let else_ty = self.resolve_type(else_ty);
                self.evaluate(Rc::new(Type::Conditional {
                    check,
                    extends,
                    then_ty,
                    else_ty,
                    infer_params,
                }))
            }
            TypeExpr::Infer(name) => {
                Rc::new(Type::TypeParameter { name: name.clone(), constraint: None })
            }
            TypeExpr::Predicate { ty, .. } => {
                // Outside return-type position a predicate reads as boolean;
                // the predicate itself is captured by `function_type_of`.
                let _ = self.resolve_type(ty);
                Type::boolean()
            }
            TypeExpr::Paren(inner) => self.resolve_type(inner),
        }
    }

    fn resolve_named(&mut self, name: &str, args: &[TypeExpr]) -> TypeRef {
        let resolved_args: Vec<TypeRef> = args.iter().map(|a| self.resolve_type(a)).collect();
        match (name, resolved_args.len()) {
            ("any", 0) => return Type::any(),
            ("unknown", 0) => return Type::unknown(),
            ("never", 0) => return Type::never(),
            ("void", 0) => return Type::void(),
            ("null", 0) => return Type::null(),
            ("undefined", 0) => return Type::undefined(),
            ("number", 0) => return Type::number(),
            ("string", 0) => return Type::string(),
            ("boolean", 0) => return Type::boolean(),
            ("bigint", 0) => return Type::bigint(),
            ("symbol", 0) => return Type::symbol(),
            ("object", 0) => {
                return Rc::new(Type::Record {
                    fields: IndexMap::new(),
                    optional: FxHashSet::default(),
                    string_index: Some(Type::any()),
                    number_index: None,
                });
            }
            ("RegExp", 0) => return Rc::new(Type::RegExp),
            ("Array", 1) => return Rc::new(Type::Array(resolved_args[0].clone())),
            ("ReadonlyArray", 1) => return Rc::new(Type::Array(resolved_args[0].clone())),
            ("Promise", 1) => return Rc::new(Type::Promise(resolved_args[0].clone())),
            ("Set", 1) => return Rc::new(Type::Set(resolved_args[0].clone())),
            ("WeakSet", 1) => return Rc::new(Type::WeakSet(resolved_args[0].clone())),
            ("Map", 2) => {
                return Rc::new(Type::Map(resolved_args[0].clone(), resolved_args[1].clone()));
            }
            ("WeakMap", 2) => {
                return Rc::new(Type::WeakMap(resolved_args[0].clone(), resolved_args[1].clone()));
            }
            ("Iterator", 1) | ("Iterable", 1) | ("IterableIterator", 1) => {
                return Rc::new(Type::Iterator(resolved_args[0].clone()));
            }
            ("Generator", _) => {
                let yields = resolved_args.first().cloned().unwrap_or_else(Type::any);
                let returns = resolved_args.get(1).cloned().unwrap_or_else(Type::void);
                let next = resolved_args.get(2).cloned().unwrap_or_else(Type::undefined);
                return Rc::new(Type::Generator { yields, returns, next });
            }
            ("AsyncGenerator", _) => {
                let yields = resolved_args.first().cloned().unwrap_or_else(Type::any);
                let returns = resolved_args.get(1).cloned().unwrap_or_else(Type::void);
                let next = resolved_args.get(2).cloned().unwrap_or_else(Type::undefined);
                return Rc::new(Type::AsyncGenerator { yields, returns, next });
            }
            ("Uppercase", 1) | ("Lowercase", 1) | ("Capitalize", 1) | ("Uncapitalize", 1) => {
                let op = match name {
                    "Uppercase" => IntrinsicStringOp::Uppercase,
                    "Lowercase" => IntrinsicStringOp::Lowercase,
                    "Capitalize" => IntrinsicStringOp::Capitalize,
                    _ => IntrinsicStringOp::Uncapitalize,
                };
                return self.evaluate(Rc::new(Type::IntrinsicString {
                    op,
                    inner: resolved_args[0].clone(),
                }));
            }
            ("Record", 2) => {
                let mapped = Rc::new(Type::Mapped {
                    param: "K".to_string(),
                    constraint: resolved_args[0].clone(),
                    value: resolved_args[1].clone(),
                    optional: None,
                    readonly: None,
                });
                return self.evaluate(mapped);
            }
            ("Partial", 1) | ("Required", 1) | ("Readonly", 1) => {
                let inner = resolved_args[0].clone();
                let keys = self.evaluate(Rc::new(Type::KeyOf(inner.clone())));
                let mapped = Rc::new(Type::Mapped {
                    param: "K".to_string(),
                    constraint: keys,
                    value: Rc::new(Type::IndexedAccess {
                        object: inner,
                        index: Rc::new(Type::TypeParameter { name: "K".to_string(), constraint: None }),
                    }),
                    optional: match name {
                        "Partial" => Some(true),
                        "Required" => Some(false),
                        _ => None,
                    },
                    readonly: if name == "Readonly" { Some(true) } else { None },
                });
                return self.evaluate(mapped);
            }
            _ => {}
        }

        // Alias, then declared type, in that order.
        let alias = self.aliases.borrow().get(name).cloned();
        if let Some(alias) = alias {
            return self.apply_alias(name, &alias, &resolved_args);
        }
        match self.env.lookup_type(name) {
            Some(ty) => {
                if resolved_args.is_empty() {
                    ty
                } else {
                    self.evaluate(Rc::new(Type::InstantiatedGeneric { target: ty, args: resolved_args }))
                }
            }
            None => Type::any(),
        }
    }

    fn apply_alias(&mut self, name: &str, alias: &super::AliasDef, args: &[TypeRef]) -> TypeRef {
        if self.depth.get() > MAX_TYPE_INSTANTIATION_DEPTH {
            return Type::any();
        }
        self.depth.set(self.depth.get() + 1);
        let scope = self.env.child();
        let outer = std::mem::replace(&mut self.env, scope);
        for (i, param) in alias.params.iter().enumerate() {
            let bound = args
                .get(i)
                .cloned()
                .or_else(|| param.default.as_ref().map(|d| self.resolve_type(d)))
                .unwrap_or_else(Type::unknown);
            self.env.define_type(&param.name, bound);
        }
        // Recursive aliases hit the lookup for their own name again; the
        // depth bound above terminates pathological expansion.
        let _ = name;
        let resolved = self.resolve_type(&alias.body);
        let _ = std::mem::replace(&mut self.env, outer);
        self.depth.set(self.depth.get() - 1);
        resolved
    }

    fn resolve_qualified(&mut self, parts: &[String], args: &[TypeExpr]) -> TypeRef {
        // Walk namespaces; the last part may be an enum member type.
        let mut current = match self.env.lookup_value(&parts[0]) {
            Some(binding) => binding.ty,
            None => return Type::any(),
        };
        for part in &parts[1..] {
            current = match current.as_ref() {
                Type::Namespace(ns) => {
                    let from_types = ns.types.borrow().get(part).cloned();
                    match from_types.or_else(|| ns.values.borrow().get(part).cloned()) {
                        Some(ty) => ty,
                        None => return Type::any(),
                    }
                }
                Type::Enum(e) => match e.members.get(part) {
                    Some(EnumMemberValue::Number(n)) => Rc::new(Type::NumberLiteral(*n)),
                    Some(EnumMemberValue::String(s)) => Rc::new(Type::StringLiteral(s.clone())),
                    None => return Type::any(),
                },
                _ => return Type::any(),
            };
        }
        if args.is_empty() {
            current
        } else {
            let resolved_args = args.iter().map(|a| self.resolve_type(a)).collect();
            self.evaluate(Rc::new(Type::InstantiatedGeneric { target: current, args: resolved_args }))
        }
    }

    // =========================================================================
    // Evaluation of computed type operators
    // =========================================================================

    /// Normalize lazy type operators. Types containing free type parameters
    /// are returned unchanged; they evaluate again after substitution.
    pub(crate) fn evaluate(&mut self, ty: TypeRef) -> TypeRef {
        if self.depth.get() > MAX_TYPE_INSTANTIATION_DEPTH {
            return Type::any();
        }
        self.depth.set(self.depth.get() + 1);
        let result = self.evaluate_inner(ty);
        self.depth.set(self.depth.get() - 1);
        result
    }

    fn evaluate_inner(&mut self, ty: TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::KeyOf(inner) => {
                let inner = self.evaluate(inner.clone());
                self.keys_of(&inner).unwrap_or(ty)
            }
            Type::IndexedAccess { object, index } => {
                let object = self.evaluate(object.clone());
                let index = self.evaluate(index.clone());
                self.index_into(&object, &index).unwrap_or(ty)
            }
            Type::Mapped { param, constraint, value, optional, .. } => {
                let constraint = self.evaluate(constraint.clone());
                // `{[K in string]: V}` (and `Record<string, V>`) becomes an
                // index signature rather than an enumerated shape.
                if matches!(constraint.as_ref(), Type::String) {
                    return Rc::new(Type::Record {
                        fields: IndexMap::new(),
                        optional: FxHashSet::default(),
                        string_index: Some(value.clone()),
                        number_index: None,
                    });
                }
                if matches!(constraint.as_ref(), Type::Number) {
                    return Rc::new(Type::Record {
                        fields: IndexMap::new(),
                        optional: FxHashSet::default(),
                        string_index: None,
                        number_index: Some(value.clone()),
                    });
                }
                let Some(keys) = self.literal_keys(&constraint) else {
                    return ty;
                };
                let mut fields = IndexMap::new();
                let mut optional_set = FxHashSet::default();
                for key in keys {
                    let mut subs = Substitutions::default();
                    subs.insert(param.clone(), Rc::new(Type::StringLiteral(key.clone())));
                    let substituted = self.substitute(value, &subs);
                    let field_ty = self.evaluate(substituted);
                    if optional == &Some(true) {
                        optional_set.insert(key.clone());
                    }
                    fields.insert(key, field_ty);
                }
                Rc::new(Type::Record {
                    fields,
                    optional: optional_set,
                    string_index: None,
                    number_index: None,
                })
            }
            Type::Conditional { check, extends, then_ty, else_ty, infer_params } => {
                let check_eval = self.evaluate(check.clone());
                if has_free_type_params(&check_eval) {
                    return ty;
                }
                // Distribute over a union check type.
                if let Type::Union(members) = check_eval.as_ref() {
                    let branches: Vec<TypeRef> = members
                        .iter()
                        .map(|member| {
                            self.evaluate(Rc::new(Type::Conditional {
                                check: member.clone(),
                                extends: extends.clone(),
                                then_ty: then_ty.clone(),
                                else_ty: else_ty.clone(),
                                infer_params: infer_params.clone(),
                            }))
                        })
                        .collect();
                    return Type::union(branches);
                }
                let mut subs = Substitutions::default();
                let unified = self.unify(extends, &check_eval, infer_params, &mut subs);
                let extends_bound = self.substitute(extends, &subs);
                let matches = unified && self.is_compatible(&extends_bound, &check_eval);
                // Unresolved infer positions default to `unknown`.
                for name in infer_params {
                    subs.entry(name.clone()).or_insert_with(Type::unknown);
                }
                let branch = if matches { then_ty } else { else_ty };
                let substituted = self.substitute(branch, &subs);
                self.evaluate(substituted)
            }
            Type::IntrinsicString { op, inner } => {
                let inner = self.evaluate(inner.clone());
                match inner.as_ref() {
                    Type::StringLiteral(s) => {
                        let out = match op {
                            IntrinsicStringOp::Uppercase => s.to_uppercase(),
                            IntrinsicStringOp::Lowercase => s.to_lowercase(),
                            IntrinsicStringOp::Capitalize => capitalize(s, true),
                            IntrinsicStringOp::Uncapitalize => capitalize(s, false),
                        };
                        Rc::new(Type::StringLiteral(out))
                    }
                    Type::Union(members) => {
                        let mapped = members
                            .iter()
                            .map(|m| {
                                self.evaluate(Rc::new(Type::IntrinsicString {
                                    op: *op,
                                    inner: m.clone(),
                                }))
                            })
                            .collect();
                        Type::union(mapped)
                    }
                    Type::String => Type::string(),
                    _ => ty,
                }
            }
            Type::InstantiatedGeneric { target, args } => {
                match target.as_ref() {
                    Type::Interface(iface) if !iface.type_params.is_empty() => {
                        let subs = bind_params(&iface.type_params, args);
                        let mut fields = IndexMap::new();
                        let mut optional = FxHashSet::default();
                        for (name, member_ty) in iface.all_members() {
                            let substituted = self.substitute(&member_ty, &subs);
                            if iface.is_optional(&name) {
                                optional.insert(name.clone());
                            }
                            fields.insert(name, self.evaluate(substituted));
                        }
                        let string_index = iface
                            .string_index
                            .borrow()
                            .as_ref()
                            .map(|t| self.substitute(t, &subs));
                        let number_index = iface
                            .number_index
                            .borrow()
                            .as_ref()
                            .map(|t| self.substitute(t, &subs));
                        Rc::new(Type::Record { fields, optional, string_index, number_index })
                    }
                    // Generic class instances stay nominal; members
                    // substitute on access.
                    _ => ty,
                }
            }
            Type::Union(members) => {
                let evaluated: Vec<TypeRef> =
                    members.iter().map(|m| self.evaluate(m.clone())).collect();
                Type::union(evaluated)
            }
            _ => ty,
        }
    }

    /// `keyof T` — union of known keys.
    fn keys_of(&mut self, ty: &TypeRef) -> Option<TypeRef> {
        match ty.as_ref() {
            Type::Record { fields, string_index, .. } => {
                if string_index.is_some() {
                    return Some(Type::string());
                }
                let keys = fields
                    .keys()
                    .map(|k| Rc::new(Type::StringLiteral(k.clone())) as TypeRef)
                    .collect();
                Some(Type::union(keys))
            }
            Type::Interface(iface) => {
                if iface.string_index.borrow().is_some() {
                    return Some(Type::string());
                }
                let keys = iface
                    .all_members()
                    .keys()
                    .map(|k| Rc::new(Type::StringLiteral(k.clone())) as TypeRef)
                    .collect();
                Some(Type::union(keys))
            }
            Type::Instance(class) => {
                let mut keys: Vec<TypeRef> = Vec::new();
                for name in class.fields.borrow().keys() {
                    keys.push(Rc::new(Type::StringLiteral(name.clone())));
                }
                for name in class.methods.borrow().keys() {
                    keys.push(Rc::new(Type::StringLiteral(name.clone())));
                }
                for name in class.getters.borrow().keys() {
                    keys.push(Rc::new(Type::StringLiteral(name.clone())));
                }
                Some(Type::union(keys))
            }
            Type::Enum(e) => {
                let keys = e
                    .members
                    .keys()
                    .map(|k| Rc::new(Type::StringLiteral(k.clone())) as TypeRef)
                    .collect();
                Some(Type::union(keys))
            }
            Type::Tuple { elems, .. } => {
                let keys = (0..elems.len())
                    .map(|i| Rc::new(Type::NumberLiteral(i as f64)) as TypeRef)
                    .collect();
                Some(Type::union(keys))
            }
            Type::Array(_) => Some(Type::number()),
            Type::Any => Some(Type::union(vec![Type::string(), Type::number()])),
            _ => None,
        }
    }

    /// `T[K]` — distribute over index unions, look up literal keys.
    fn index_into(&mut self, object: &TypeRef, index: &TypeRef) -> Option<TypeRef> {
        match index.as_ref() {
            Type::Union(members) => {
                let parts: Option<Vec<TypeRef>> = members
                    .iter()
                    .map(|m| self.index_into(object, m))
                    .collect();
                parts.map(Type::union)
            }
            Type::StringLiteral(key) => match object.as_ref() {
                Type::Record { fields, string_index, .. } => fields
                    .get(key)
                    .cloned()
                    .or_else(|| string_index.clone()),
                Type::Interface(iface) => {
                    iface.member(key).or_else(|| iface.string_index.borrow().clone())
                }
                Type::Instance(class) => class.instance_member(key),
                Type::Enum(e) => match e.members.get(key) {
                    Some(EnumMemberValue::Number(n)) => Some(Rc::new(Type::NumberLiteral(*n))),
                    Some(EnumMemberValue::String(s)) => {
                        Some(Rc::new(Type::StringLiteral(s.clone())))
                    }
                    None => None,
                },
                Type::Any => Some(Type::any()),
                _ => None,
            },
            Type::NumberLiteral(n) => match object.as_ref() {
                Type::Tuple { elems, rest, .. } => {
                    let idx = *n as usize;
                    elems.get(idx).cloned().or_else(|| rest.clone())
                }
                Type::Array(elem) => Some(elem.clone()),
                Type::Record { number_index, .. } => number_index.clone(),
                Type::Any => Some(Type::any()),
                _ => None,
            },
            Type::String => match object.as_ref() {
                Type::Record { string_index, .. } => string_index.clone(),
                Type::Interface(iface) => iface.string_index.borrow().clone(),
                Type::Any => Some(Type::any()),
                _ => None,
            },
            Type::Number => match object.as_ref() {
                Type::Array(elem) => Some(elem.clone()),
                Type::Tuple { elems, rest, .. } => {
                    let mut members = elems.clone();
                    if let Some(rest) = rest {
                        members.push(rest.clone());
                    }
                    Some(Type::union(members))
                }
                Type::Record { number_index, .. } => number_index.clone(),
                Type::Any => Some(Type::any()),
                _ => None,
            },
            Type::Any => Some(Type::any()),
            _ => None,
        }
    }

    /// The string keys denoted by a key-set type (for mapped type expansion).
    fn literal_keys(&mut self, ty: &TypeRef) -> Option<Vec<String>> {
        match ty.as_ref() {
            Type::StringLiteral(s) => Some(vec![s.clone()]),
            Type::Union(members) => {
                let mut keys = Vec::new();
                for member in members {
                    keys.extend(self.literal_keys(member)?);
                }
                Some(keys)
            }
            Type::KeyOf(inner) => {
                let keys = self.evaluate(Rc::new(Type::KeyOf(inner.clone())));
                if Rc::ptr_eq(&keys, ty) {
                    None
                } else {
                    self.literal_keys(&keys)
                }
            }
            Type::Enum(e) => Some(e.members.keys().cloned().collect()),
            _ => None,
        }
    }

    // =========================================================================
    // Substitution and unification
    // =========================================================================

    /// Replace type parameters by their bindings, rebuilding structurally.
    pub(crate) fn substitute(&mut self, ty: &TypeRef, subs: &Substitutions) -> TypeRef {
        if subs.is_empty() {
            return ty.clone();
        }
        match ty.as_ref() {
            Type::TypeParameter { name, .. } => {
                subs.get(name).cloned().unwrap_or_else(|| ty.clone())
            }
            Type::Array(elem) => Rc::new(Type::Array(self.substitute(elem, subs))),
            Type::Promise(inner) => Rc::new(Type::Promise(self.substitute(inner, subs))),
            Type::Iterator(inner) => Rc::new(Type::Iterator(self.substitute(inner, subs))),
            Type::Set(inner) => Rc::new(Type::Set(self.substitute(inner, subs))),
            Type::WeakSet(inner) => Rc::new(Type::WeakSet(self.substitute(inner, subs))),
            Type::Map(k, v) => {
                Rc::new(Type::Map(self.substitute(k, subs), self.substitute(v, subs)))
            }
            Type::WeakMap(k, v) => {
                Rc::new(Type::WeakMap(self.substitute(k, subs), self.substitute(v, subs)))
            }
            Type::Generator { yields, returns, next } => Rc::new(Type::Generator {
                yields: self.substitute(yields, subs),
                returns: self.substitute(returns, subs),
                next: self.substitute(next, subs),
            }),
            Type::AsyncGenerator { yields, returns, next } => Rc::new(Type::AsyncGenerator {
                yields: self.substitute(yields, subs),
                returns: self.substitute(returns, subs),
                next: self.substitute(next, subs),
            }),
            Type::Union(members) => {
                let members = members.iter().map(|m| self.substitute(m, subs)).collect();
                Type::union(members)
            }
            Type::Intersection(members) => {
                let members = members.iter().map(|m| self.substitute(m, subs)).collect();
                Type::intersection(members)
            }
            Type::Tuple { elems, rest, required } => Rc::new(Type::Tuple {
                elems: elems.iter().map(|e| self.substitute(e, subs)).collect(),
                rest: rest.as_ref().map(|r| self.substitute(r, subs)),
                required: *required,
            }),
            Type::Record { fields, optional, string_index, number_index } => {
                let fields = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.substitute(v, subs)))
                    .collect();
                Rc::new(Type::Record {
                    fields,
                    optional: optional.clone(),
                    string_index: string_index.as_ref().map(|t| self.substitute(t, subs)),
                    number_index: number_index.as_ref().map(|t| self.substitute(t, subs)),
                })
            }
            Type::Function(func) => {
                let params = func
                    .params
                    .iter()
                    .map(|p| ParamType {
                        name: p.name.clone(),
                        ty: self.substitute(&p.ty, subs),
                        optional: p.optional,
                        rest: p.rest,
                    })
                    .collect();
                Rc::new(Type::Function(Rc::new(FunctionType {
                    type_params: func.type_params.clone(),
                    params,
                    ret: self.substitute(&func.ret, subs),
                    required: func.required,
                    has_rest: func.has_rest,
                    this_type: func.this_type.as_ref().map(|t| self.substitute(t, subs)),
                    predicate: func
                        .predicate
                        .as_ref()
                        .map(|(n, t)| (n.clone(), self.substitute(t, subs))),
                    is_async: func.is_async,
                    is_generator: func.is_generator,
                })))
            }
            Type::KeyOf(inner) => {
                let substituted = Rc::new(Type::KeyOf(self.substitute(inner, subs)));
                self.evaluate(substituted)
            }
            Type::IndexedAccess { object, index } => {
                let substituted = Rc::new(Type::IndexedAccess {
                    object: self.substitute(object, subs),
                    index: self.substitute(index, subs),
                });
                self.evaluate(substituted)
            }
            Type::Mapped { param, constraint, value, optional, readonly } => {
                // The mapped parameter shadows an outer substitution.
                let mut narrowed = subs.clone();
                narrowed.remove(param);
                let substituted = Rc::new(Type::Mapped {
                    param: param.clone(),
                    constraint: self.substitute(constraint, subs),
                    value: self.substitute(value, &narrowed),
                    optional: *optional,
                    readonly: *readonly,
                });
                self.evaluate(substituted)
            }
            Type::Conditional { check, extends, then_ty, else_ty, infer_params } => {
                let mut narrowed = subs.clone();
                for name in infer_params {
                    narrowed.remove(name);
                }
                let substituted = Rc::new(Type::Conditional {
                    check: self.substitute(check, subs),
                    extends: self.substitute(extends, &narrowed),
                    then_ty: self.substitute(then_ty, &narrowed),
                    else_ty: self.substitute(else_ty, subs),
                    infer_params: infer_params.clone(),
                });
                self.evaluate(substituted)
            }
            Type::TemplateLiteral { strings, types } => Rc::new(Type::TemplateLiteral {
                strings: strings.clone(),
                types: types.iter().map(|t| self.substitute(t, subs)).collect(),
            }),
            Type::IntrinsicString { op, inner } => {
                let substituted = Rc::new(Type::IntrinsicString {
                    op: *op,
                    inner: self.substitute(inner, subs),
                });
                self.evaluate(substituted)
            }
            _ => ty.clone(),
        }
    }

    /// Unify `pattern` (containing type parameters from `open`) against
    /// `actual`, collecting substitutions. Returns false on structural
    /// mismatch.
    pub(crate) fn unify(
        &mut self,
        pattern: &TypeRef,
        actual: &TypeRef,
        open: &[String],
        subs: &mut Substitutions,
    ) -> bool {
        match (pattern.as_ref(), actual.as_ref()) {
            (Type::TypeParameter { name, .. }, _) if open.contains(name) => {
                match subs.get(name) {
                    Some(existing) => {
                        let merged = Type::union(vec![existing.clone(), actual.clone()]);
                        subs.insert(name.clone(), merged);
                    }
                    None => {
                        subs.insert(name.clone(), actual.clone());
                    }
                }
                true
            }
            (Type::Array(p), Type::Array(a)) => self.unify(p, a, open, subs),
            (Type::Array(p), Type::Tuple { elems, .. }) => {
                let elem = Type::union(elems.clone());
                self.unify(p, &elem, open, subs)
            }
            (Type::Promise(p), Type::Promise(a)) => self.unify(p, a, open, subs),
            (Type::Set(p), Type::Set(a)) => self.unify(p, a, open, subs),
            (Type::Map(pk, pv), Type::Map(ak, av)) => {
                self.unify(pk, ak, open, subs) && self.unify(pv, av, open, subs)
            }
            (Type::Iterator(p), Type::Iterator(a)) => self.unify(p, a, open, subs),
            (Type::Generator { yields: py, .. }, Type::Generator { yields: ay, .. }) => {
                self.unify(py, ay, open, subs)
            }
            (Type::Tuple { elems: pe, .. }, Type::Tuple { elems: ae, .. }) => {
                pe.len() <= ae.len()
                    && pe
                        .iter()
                        .zip(ae.iter())
                        .all(|(p, a)| self.unify(p, a, open, subs))
            }
            (Type::Function(p), Type::Function(a)) => {
                for (pp, ap) in p.params.iter().zip(a.params.iter()) {
                    if !self.unify(&pp.ty, &ap.ty, open, subs) {
                        return false;
                    }
                }
                self.unify(&p.ret, &a.ret, open, subs)
            }
            (Type::Record { fields: pf, .. }, Type::Record { fields: af, .. }) => {
                for (name, pt) in pf {
                    match af.get(name) {
                        Some(at) => {
                            if !self.unify(pt, at, open, subs) {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                true
            }
            (Type::Union(members), _) => {
                // Prefer a member that unifies; fall back to compatibility.
                members
                    .iter()
                    .any(|m| self.unify(m, actual, open, subs))
            }
            _ => self.is_compatible(pattern, actual),
        }
    }

    /// Infer call-site type arguments by unifying declared parameter types
    /// against argument types, then substitute into the signature.
    /// Unresolved parameters default to their constraint or `unknown`.
    pub(crate) fn instantiate_call(
        &mut self,
        func: &Rc<FunctionType>,
        arg_types: &[TypeRef],
    ) -> Rc<FunctionType> {
        if func.type_params.is_empty() {
            return Rc::clone(func);
        }
        let open: Vec<String> = func.type_params.iter().map(|tp| tp.name.clone()).collect();
        let mut subs = Substitutions::default();
        for (param, arg) in func.params.iter().zip(arg_types.iter()) {
            let _ = self.unify(&param.ty, arg, &open, &mut subs);
        }
        for tp in &func.type_params {
            if !subs.contains_key(&tp.name) {
                let fallback = tp
                    .constraint
                    .clone()
                    .or_else(|| tp.default.clone())
                    .unwrap_or_else(Type::unknown);
                subs.insert(tp.name.clone(), fallback);
            }
        }
        let substituted = self.substitute(&Rc::new(Type::Function(Rc::clone(func))), &subs);
        match substituted.as_ref() {
            Type::Function(f) => Rc::clone(f),
            _ => Rc::clone(func),
        }
    }
}

fn bind_params(params: &[TypeParamInfo], args: &[TypeRef]) -> Substitutions {
    let mut subs = Substitutions::default();
    for (i, param) in params.iter().enumerate() {
        let bound = args
            .get(i)
            .cloned()
            .or_else(|| param.default.clone())
            .unwrap_or_else(Type::unknown);
        subs.insert(param.name.clone(), bound);
    }
    subs
}

fn collect_infer_params(expr: &TypeExpr, out: &mut Vec<String>) {
    match expr {
        TypeExpr::Infer(name) => out.push(name.clone()),
        TypeExpr::Union(members) | TypeExpr::Intersection(members) => {
            for member in members {
                collect_infer_params(member, out);
            }
        }
        TypeExpr::Array(inner) | TypeExpr::KeyOf(inner) | TypeExpr::Paren(inner) => {
            collect_infer_params(inner, out);
        }
        TypeExpr::Named { args, .. } | TypeExpr::Qualified { args, .. } => {
            for arg in args {
                collect_infer_params(arg, out);
            }
        }
        TypeExpr::Tuple(members) => {
            for member in members {
                collect_infer_params(&member.ty, out);
            }
        }
        TypeExpr::Function { params, ret } => {
            for param in params {
                collect_infer_params(&param.ty, out);
            }
            collect_infer_params(ret, out);
        }
        TypeExpr::IndexedAccess { object, index } => {
            collect_infer_params(object, out);
            collect_infer_params(index, out);
        }
        TypeExpr::TemplateLiteral { types, .. } => {
            for ty in types {
                collect_infer_params(ty, out);
            }
        }
        _ => {}
    }
}

/// Whether the type mentions a type parameter anywhere (conservatively).
pub(crate) fn has_free_type_params(ty: &TypeRef) -> bool {
    match ty.as_ref() {
        Type::TypeParameter { .. } => true,
        Type::Array(inner)
        | Type::Promise(inner)
        | Type::Iterator(inner)
        | Type::Set(inner)
        | Type::WeakSet(inner)
        | Type::KeyOf(inner) => has_free_type_params(inner),
        Type::Map(k, v) | Type::WeakMap(k, v) => {
            has_free_type_params(k) || has_free_type_params(v)
        }
        Type::Union(members) | Type::Intersection(members) => {
            members.iter().any(has_free_type_params)
        }
        Type::Tuple { elems, rest, .. } => {
            elems.iter().any(has_free_type_params)
                || rest.as_ref().is_some_and(|r| has_free_type_params(r))
        }
        Type::Record { fields, .. } => fields.values().any(has_free_type_params),
        Type::Function(func) => {
            func.params.iter().any(|p| has_free_type_params(&p.ty))
                || has_free_type_params(&func.ret)
        }
        Type::IndexedAccess { object, index } => {
            has_free_type_params(object) || has_free_type_params(index)
        }
        Type::Mapped { constraint, value, .. } => {
            has_free_type_params(constraint) || has_free_type_params(value)
        }
        Type::Conditional { check, .. } => has_free_type_params(check),
        Type::TemplateLiteral { types, .. } => types.iter().any(has_free_type_params),
        Type::IntrinsicString { inner, .. } => has_free_type_params(inner),
        _ => false,
    }
}

fn capitalize(s: &str, upper: bool) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let first: String = if upper {
                first.to_uppercase().collect()
            } else {
                first.to_lowercase().collect()
            };
            format!("{first}{}", chars.as_str())
        }
    }
}
