//! The compatibility relation.
//!
//! `is_compatible(expected, actual)` — "a value of type `actual` may flow
//! into a slot of type `expected`". A single recursive relation; the
//! ordering of the clauses matters and mirrors the dispatch order the rest
//! of the checker assumes:
//!
//! 1. `any` short-circuits in both directions;
//! 2. `never` is assignable everywhere; `unknown` receives everything and
//!    yields only to `unknown`/`any`;
//! 3. type parameters match by name or by constraint;
//! 4. an actual union requires every member to fit; an expected union
//!    requires some member to accept; intersections dualize;
//! 5. literals match exactly and widen to their primitive;
//! 6. template literal patterns match string literals by greedy chunk
//!    parsing;
//! 7. records/interfaces/instances compare structurally member by member;
//! 8. functions are bivariant in parameter count and covariant in return.

use std::rc::Rc;

use tsr_common::DiagnosticCode;
use tsr_parser::ast::Expr;

use crate::checker::Checker;
use crate::types::*;

impl Checker {
    /// Check assignment compatibility and report a diagnostic on failure.
    pub(crate) fn check_assignable(&mut self, expected: &TypeRef, actual: &TypeRef, at: &Expr) {
        if !self.is_compatible(expected, actual) {
            self.error(
                DiagnosticCode::TypeError,
                format!("type '{actual}' is not assignable to type '{expected}'"),
                at.span,
            );
        } else {
            self.check_excess_properties(expected, actual, at);
        }
    }

    pub(crate) fn is_compatible(&mut self, expected: &TypeRef, actual: &TypeRef) -> bool {
        if Rc::ptr_eq(expected, actual) || expected.same_shape(actual) {
            return true;
        }

        // `any` is bidirectional.
        if matches!(expected.as_ref(), Type::Any) || matches!(actual.as_ref(), Type::Any) {
            return true;
        }
        // `never` is the bottom type.
        if matches!(actual.as_ref(), Type::Never) {
            return true;
        }
        // `unknown` is the top type.
        if matches!(expected.as_ref(), Type::Unknown) {
            return true;
        }
        if matches!(actual.as_ref(), Type::Unknown) {
            return false;
        }
        if matches!(expected.as_ref(), Type::Never) {
            return false;
        }

        // Normalize lazy operators before structural comparison.
        let expected = self.evaluate(expected.clone());
        let actual = self.evaluate(actual.clone());

        // Type parameters: match by name, otherwise by constraint.
        if let Type::TypeParameter { name: en, constraint: ec } = expected.as_ref() {
            if let Type::TypeParameter { name: an, .. } = actual.as_ref() {
                if en == an {
                    return true;
                }
            }
            return match ec {
                Some(constraint) => self.is_compatible(constraint, &actual),
                None => false,
            };
        }
        if let Type::TypeParameter { constraint, .. } = actual.as_ref() {
            return match constraint {
                Some(constraint) => self.is_compatible(&expected, constraint),
                None => false,
            };
        }

        // Unions distribute.
        if let Type::Union(members) = actual.as_ref() {
            return members.iter().all(|m| self.is_compatible(&expected, m));
        }
        if let Type::Union(members) = expected.as_ref() {
            return members.iter().any(|m| self.is_compatible(m, &actual));
        }
        // Intersections dualize.
        if let Type::Intersection(members) = expected.as_ref() {
            return members.iter().all(|m| self.is_compatible(m, &actual));
        }
        if let Type::Intersection(members) = actual.as_ref() {
            return members.iter().any(|m| self.is_compatible(&expected, m));
        }

        match (expected.as_ref(), actual.as_ref()) {
            // Literals widen to their primitive.
            (Type::String, Type::StringLiteral(_))
            | (Type::Number, Type::NumberLiteral(_))
            | (Type::Boolean, Type::BooleanLiteral(_)) => true,
            (Type::StringLiteral(e), Type::StringLiteral(a)) => e == a,
            (Type::NumberLiteral(e), Type::NumberLiteral(a)) => e == a,
            (Type::BooleanLiteral(e), Type::BooleanLiteral(a)) => e == a,

            // `void` accepts `undefined`.
            (Type::Void, Type::Undefined) => true,

            // Template literal patterns.
            (Type::TemplateLiteral { strings, types }, Type::StringLiteral(s)) => {
                self.template_matches(strings, types, s)
            }
            (Type::TemplateLiteral { .. }, Type::TemplateLiteral { .. }) => {
                expected.same_shape(&actual)
            }

            // Enums: nominal plus literal members; numeric enums flow to
            // number, string enums to string.
            (Type::Enum(e), Type::Enum(a)) => Rc::ptr_eq(e, a),
            (Type::Enum(e), Type::NumberLiteral(n)) => e
                .members
                .values()
                .any(|v| matches!(v, EnumMemberValue::Number(m) if m == n)),
            (Type::Enum(e), Type::StringLiteral(s)) => e
                .members
                .values()
                .any(|v| matches!(v, EnumMemberValue::String(m) if m == s)),
            (Type::Number, Type::Enum(e)) => {
                matches!(e.kind, EnumKind::Numeric | EnumKind::Const)
            }
            (Type::String, Type::Enum(e)) => matches!(e.kind, EnumKind::String),

            (Type::Array(e), Type::Array(a)) => self.is_compatible(e, a),
            (Type::Array(e), Type::Tuple { elems, rest, .. }) => {
                elems.iter().all(|t| self.is_compatible(e, t))
                    && rest.as_ref().is_none_or(|r| self.is_compatible(e, r))
            }
            (
                Type::Tuple { elems: ee, rest: er, required: erq },
                Type::Tuple { elems: ae, rest: _, required: arq },
            ) => {
                if ae.len() < *erq || (ae.len() > ee.len() && er.is_none()) {
                    return false;
                }
                let _ = arq;
                for (i, a) in ae.iter().enumerate() {
                    let slot = ee.get(i).or(er.as_ref());
                    match slot {
                        Some(e) => {
                            if !self.is_compatible(e, a) {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
                true
            }

            (Type::Promise(e), Type::Promise(a)) => self.is_compatible(e, a),
            (Type::Set(e), Type::Set(a)) => self.is_compatible(e, a),
            (Type::WeakSet(e), Type::WeakSet(a)) => self.is_compatible(e, a),
            (Type::Map(ek, ev), Type::Map(ak, av)) => {
                self.is_compatible(ek, ak) && self.is_compatible(ev, av)
            }
            (Type::WeakMap(ek, ev), Type::WeakMap(ak, av)) => {
                self.is_compatible(ek, ak) && self.is_compatible(ev, av)
            }
            (Type::Iterator(e), Type::Iterator(a)) => self.is_compatible(e, a),
            (Type::Iterator(e), Type::Array(a)) => self.is_compatible(e, a),
            (Type::Iterator(e), Type::Generator { yields, .. }) => self.is_compatible(e, yields),
            (Type::Generator { yields: ey, .. }, Type::Generator { yields: ay, .. }) => {
                self.is_compatible(ey, ay)
            }
            (
                Type::AsyncGenerator { yields: ey, .. },
                Type::AsyncGenerator { yields: ay, .. },
            ) => self.is_compatible(ey, ay),

            // Class constructor values.
            (Type::Class(e), Type::Class(a)) | (Type::Class(e), Type::MutableClass(a)) => {
                a.derives_from(e)
            }

            // Instances: nominal fast path, then structural.
            (Type::Instance(e), Type::Instance(a)) => {
                if a.derives_from(e) {
                    return true;
                }
                self.structurally_compatible_class(e, &actual)
            }
            (Type::Instance(e), _) => self.structurally_compatible_class(e, &actual),

            (Type::Interface(iface), _) => {
                let iface = Rc::clone(iface);
                for (name, member_ty) in iface.all_members() {
                    let optional = iface.is_optional(&name);
                    match self.member_type_of(&actual, &name) {
                        Some(actual_member) => {
                            if !self.is_compatible(&member_ty, &actual_member) {
                                return false;
                            }
                        }
                        None if optional => {}
                        None => return false,
                    }
                }
                true
            }

            (Type::Record { fields, optional, string_index, .. }, _) => {
                for (name, member_ty) in fields {
                    match self.member_type_of(&actual, name) {
                        Some(actual_member) => {
                            if !self.is_compatible(member_ty, &actual_member) {
                                return false;
                            }
                        }
                        None if optional.contains(name) => {}
                        None => return false,
                    }
                }
                if let Some(index_ty) = string_index {
                    if let Type::Record { fields: af, .. } = actual.as_ref() {
                        for value in af.values() {
                            if !self.is_compatible(index_ty, value) {
                                return false;
                            }
                        }
                    }
                }
                true
            }

            // Callback compatibility: the actual callee may take fewer
            // parameters; parameter types compare bivariantly, returns
            // covariantly.
            (Type::Function(e), Type::Function(a)) => {
                if a.required > e.params.len() && !e.has_rest {
                    return false;
                }
                for (ep, ap) in e.params.iter().zip(a.params.iter()) {
                    if !self.is_compatible(&ep.ty, &ap.ty) && !self.is_compatible(&ap.ty, &ep.ty) {
                        return false;
                    }
                }
                if matches!(e.ret.as_ref(), Type::Void) {
                    return true;
                }
                self.is_compatible(&e.ret, &a.ret)
            }

            _ => false,
        }
    }

    fn structurally_compatible_class(&mut self, expected: &Rc<ClassType>, actual: &TypeRef) -> bool {
        let field_names: Vec<(String, TypeRef)> = expected
            .fields
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.ty.clone()))
            .collect();
        for (name, member_ty) in field_names {
            match self.member_type_of(actual, &name) {
                Some(actual_member) => {
                    if !self.is_compatible(&member_ty, &actual_member) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        let method_names: Vec<(String, TypeRef)> = expected
            .methods
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, member_ty) in method_names {
            match self.member_type_of(actual, &name) {
                Some(actual_member) => {
                    if !self.is_compatible(&member_ty, &actual_member) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// The type of member `name` on a value of type `ty`, if statically
    /// known. Used by structural checks and property access.
    pub(crate) fn member_type_of(&mut self, ty: &TypeRef, name: &str) -> Option<TypeRef> {
        match ty.as_ref() {
            Type::Record { fields, string_index, .. } => {
                fields.get(name).cloned().or_else(|| string_index.clone())
            }
            Type::Interface(iface) => iface
                .member(name)
                .or_else(|| iface.string_index.borrow().clone()),
            Type::Instance(class) => class.instance_member(name),
            Type::Class(class) | Type::MutableClass(class) => class.static_member(name),
            Type::InstantiatedGeneric { target, args } => {
                let member = self.member_type_of(target, name)?;
                let params = match target.as_ref() {
                    Type::Class(c) | Type::MutableClass(c) => c.type_params.clone(),
                    Type::Interface(i) => i.type_params.clone(),
                    _ => return Some(member),
                };
                let mut subs = super::eval::Substitutions::default();
                for (i, param) in params.iter().enumerate() {
                    if let Some(arg) = args.get(i) {
                        subs.insert(param.name.clone(), arg.clone());
                    }
                }
                Some(self.substitute(&member, &subs))
            }
            Type::Intersection(members) => {
                members.iter().find_map(|m| self.member_type_of(m, name))
            }
            Type::Enum(e) => match e.members.get(name) {
                Some(EnumMemberValue::Number(n)) => Some(Rc::new(Type::NumberLiteral(*n))),
                Some(EnumMemberValue::String(s)) => Some(Rc::new(Type::StringLiteral(s.clone()))),
                None => None,
            },
            Type::Namespace(ns) => ns.values.borrow().get(name).cloned(),
            Type::Any => Some(Type::any()),
            _ => None,
        }
    }

    /// A fresh object literal assigned to a known shape must not carry keys
    /// the target lacks, unless the target has an index signature.
    pub(crate) fn check_excess_properties(
        &mut self,
        expected: &TypeRef,
        actual: &TypeRef,
        at: &Expr,
    ) {
        use tsr_parser::ast::ExprKind;
        if !matches!(at.kind, ExprKind::ObjectLiteral(_)) {
            return;
        }
        let Type::Record { fields: actual_fields, .. } = actual.as_ref() else {
            return;
        };
        let expected = self.evaluate(expected.clone());
        let (known, has_index): (Vec<String>, bool) = match expected.as_ref() {
            Type::Record { fields, string_index, number_index, .. } => (
                fields.keys().cloned().collect(),
                string_index.is_some() || number_index.is_some(),
            ),
            Type::Interface(iface) => (
                iface.all_members().keys().cloned().collect(),
                iface.string_index.borrow().is_some() || iface.number_index.borrow().is_some(),
            ),
            Type::Instance(class) => {
                let mut names: Vec<String> = class.fields.borrow().keys().cloned().collect();
                names.extend(class.methods.borrow().keys().cloned());
                names.extend(class.setters.borrow().keys().cloned());
                names.extend(class.getters.borrow().keys().cloned());
                (names, false)
            }
            _ => return,
        };
        if has_index {
            return;
        }
        for key in actual_fields.keys() {
            if !known.contains(key) {
                self.error(
                    DiagnosticCode::ExcessProperty,
                    format!("object literal specifies unknown property '{key}'"),
                    at.span,
                );
            }
        }
    }

    /// Match a string literal against a template literal pattern: static
    /// chunks are literal requirements, interpolated slots are wildcards
    /// constrained by their type. Slots parse greedily up to the next
    /// non-empty static chunk.
    pub(crate) fn template_matches(
        &mut self,
        strings: &[String],
        types: &[TypeRef],
        value: &str,
    ) -> bool {
        let mut rest = match value.strip_prefix(strings[0].as_str()) {
            Some(rest) => rest,
            None => return false,
        };
        for (i, slot_ty) in types.iter().enumerate() {
            let next_chunk = &strings[i + 1];
            let is_last = i == types.len() - 1;
            let (slot, remaining) = if is_last {
                match rest.strip_suffix(next_chunk.as_str()) {
                    Some(slot) => (slot, ""),
                    None => return false,
                }
            } else if next_chunk.is_empty() {
                // No lookahead available; the slot takes everything and the
                // following empty chunk matches trivially.
                (rest, "")
            } else {
                match rest.find(next_chunk.as_str()) {
                    Some(pos) => (&rest[..pos], &rest[pos + next_chunk.len()..]),
                    None => return false,
                }
            };
            if !self.slot_accepts(slot_ty, slot) {
                return false;
            }
            rest = remaining;
        }
        rest.is_empty()
    }

    fn slot_accepts(&mut self, slot_ty: &TypeRef, text: &str) -> bool {
        match slot_ty.as_ref() {
            Type::String | Type::Any => true,
            Type::Number => text.parse::<f64>().is_ok(),
            Type::BigInt => !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()),
            Type::Boolean => text == "true" || text == "false",
            Type::StringLiteral(s) => s == text,
            Type::NumberLiteral(n) => text.parse::<f64>().ok() == Some(*n),
            Type::BooleanLiteral(b) => text == if *b { "true" } else { "false" },
            Type::Union(members) => members.iter().any(|m| {
                let m = m.clone();
                self.slot_accepts(&m, text)
            }),
            Type::TemplateLiteral { strings, types } => {
                let strings = strings.clone();
                let types = types.clone();
                self.template_matches(&strings, &types, text)
            }
            _ => false,
        }
    }
}
