//! Member types for built-in receivers.
//!
//! The registry dispatches these at run time; here the checker knows enough
//! of the surface to type the common call chains. Anything it does not know
//! on a built-in receiver stays an unknown property.

use std::rc::Rc;

use crate::checker::Checker;
use crate::types::*;

fn method(params: Vec<(&str, TypeRef)>, ret: TypeRef) -> TypeRef {
    let params = params
        .into_iter()
        .map(|(name, ty)| ParamType { name: name.to_string(), ty, optional: false, rest: false })
        .collect();
    Rc::new(Type::Function(Rc::new(FunctionType::simple(params, ret))))
}

fn method_opt(params: Vec<(&str, TypeRef, bool)>, ret: TypeRef) -> TypeRef {
    let params = params
        .into_iter()
        .map(|(name, ty, optional)| ParamType { name: name.to_string(), ty, optional, rest: false })
        .collect();
    Rc::new(Type::Function(Rc::new(FunctionType::simple(params, ret))))
}

impl Checker {
    pub(crate) fn builtin_member_type(&mut self, recv: &TypeRef, name: &str) -> Option<TypeRef> {
        match recv.as_ref() {
            Type::String | Type::StringLiteral(_) | Type::TemplateLiteral { .. } => {
                self.string_member(name)
            }
            Type::Array(elem) => self.array_member(&elem.clone(), name),
            Type::Tuple { elems, rest, .. } => {
                let mut members = elems.clone();
                if let Some(rest) = rest {
                    members.push(rest.clone());
                }
                let elem = Type::union(members);
                self.array_member(&elem, name)
            }
            Type::Number | Type::NumberLiteral(_) => self.number_member(name),
            Type::BigInt => match name {
                "toString" => Some(method(vec![], Type::string())),
                _ => None,
            },
            Type::Set(elem) | Type::WeakSet(elem) => self.set_member(&elem.clone(), name),
            Type::Map(k, v) | Type::WeakMap(k, v) => {
                self.map_member(&k.clone(), &v.clone(), name)
            }
            Type::Promise(payload) => self.promise_member(&payload.clone(), name),
            Type::Generator { yields, returns, .. } => {
                let result = iterator_result(yields, returns);
                match name {
                    "next" => Some(method_opt(vec![("value", Type::any(), true)], result)),
                    "return" => Some(method_opt(vec![("value", Type::any(), true)], result)),
                    "throw" => Some(method_opt(vec![("error", Type::any(), true)], result)),
                    _ => None,
                }
            }
            Type::AsyncGenerator { yields, returns, .. } => {
                let result = Rc::new(Type::Promise(iterator_result(yields, returns)));
                match name {
                    "next" => Some(method_opt(vec![("value", Type::any(), true)], result)),
                    "return" => Some(method_opt(vec![("value", Type::any(), true)], result)),
                    "throw" => Some(method_opt(vec![("error", Type::any(), true)], result)),
                    _ => None,
                }
            }
            Type::Iterator(elem) => match name {
                "next" => Some(method_opt(
                    vec![("value", Type::any(), true)],
                    iterator_result(elem, &Type::undefined()),
                )),
                _ => None,
            },
            Type::RegExp => match name {
                "test" => Some(method(vec![("s", Type::string())], Type::boolean())),
                "exec" => Some(method(
                    vec![("s", Type::string())],
                    Type::union(vec![Rc::new(Type::Array(Type::string())), Type::null()]),
                )),
                "source" | "flags" => Some(Type::string()),
                "lastIndex" => Some(Type::number()),
                _ => None,
            },
            Type::Enum(_) => None,
            _ => None,
        }
    }

    fn string_member(&mut self, name: &str) -> Option<TypeRef> {
        let string = Type::string();
        let number = Type::number();
        let boolean = Type::boolean();
        Some(match name {
            "length" => number,
            "charAt" | "charCodeAt" => method(vec![("index", number)], string),
            "at" => method(vec![("index", number)], Type::union(vec![string, Type::undefined()])),
            "slice" | "substring" => {
                method_opt(vec![("start", number.clone(), false), ("end", number, true)], string)
            }
            "indexOf" | "lastIndexOf" => method(vec![("search", string)], number),
            "includes" | "startsWith" | "endsWith" => method(vec![("search", string)], boolean),
            "toUpperCase" | "toLowerCase" | "trim" | "trimStart" | "trimEnd" | "toString" => {
                method(vec![], string)
            }
            "split" => method_opt(
                vec![("separator", string.clone(), true), ("limit", number, true)],
                Rc::new(Type::Array(string)),
            ),
            "repeat" => method(vec![("count", number)], string),
            "padStart" | "padEnd" => method_opt(
                vec![("length", number, false), ("pad", string.clone(), true)],
                string,
            ),
            "replace" | "replaceAll" => method(
                vec![("pattern", Type::any()), ("replacement", Type::any())],
                string,
            ),
            "concat" => method(vec![("other", string.clone())], string),
            "codePointAt" => method(vec![("index", number)], Type::union(vec![Type::number(), Type::undefined()])),
            "localeCompare" => method(vec![("other", string)], number),
            "match" => method(vec![("pattern", Type::any())], Type::any()),
            _ => return None,
        })
    }

    fn array_member(&mut self, elem: &TypeRef, name: &str) -> Option<TypeRef> {
        let number = Type::number();
        let boolean = Type::boolean();
        let this_array: TypeRef = Rc::new(Type::Array(elem.clone()));
        let predicate = method(vec![("value", elem.clone())], boolean.clone());
        Some(match name {
            "length" => number,
            "push" | "unshift" => method(vec![("value", elem.clone())], number),
            "pop" | "shift" => method(vec![], Type::union(vec![elem.clone(), Type::undefined()])),
            "at" => method(
                vec![("index", number)],
                Type::union(vec![elem.clone(), Type::undefined()]),
            ),
            "slice" => method_opt(
                vec![("start", number.clone(), true), ("end", number, true)],
                this_array,
            ),
            "splice" => method_opt(
                vec![
                    ("start", number.clone(), false),
                    ("deleteCount", number, true),
                    ("item", elem.clone(), true),
                ],
                this_array,
            ),
            "concat" => method(vec![("other", this_array.clone())], this_array),
            "join" => method_opt(vec![("separator", Type::string(), true)], Type::string()),
            "indexOf" | "lastIndexOf" => method(vec![("value", elem.clone())], number),
            "includes" => method(vec![("value", elem.clone())], boolean),
            "find" => method(
                vec![("predicate", predicate.clone())],
                Type::union(vec![elem.clone(), Type::undefined()]),
            ),
            "findIndex" => method(vec![("predicate", predicate.clone())], number),
            "filter" => method(vec![("predicate", predicate)], this_array),
            "map" => {
                // The mapper's result type flows through call-site
                // inference on the generic signature.
                let mapper_ret = Rc::new(Type::TypeParameter { name: "U".to_string(), constraint: None });
                let mapper = method(vec![("value", elem.clone())], mapper_ret.clone());
                Rc::new(Type::Function(Rc::new(FunctionType {
                    type_params: vec![TypeParamInfo {
                        name: "U".to_string(),
                        constraint: None,
                        default: None,
                    }],
                    params: vec![ParamType {
                        name: "mapper".to_string(),
                        ty: mapper,
                        optional: false,
                        rest: false,
                    }],
                    ret: Rc::new(Type::Array(mapper_ret)),
                    required: 1,
                    has_rest: false,
                    this_type: None,
                    predicate: None,
                    is_async: false,
                    is_generator: false,
                })))
            }
            "forEach" => method(
                vec![("callback", method_opt(
                    vec![("value", elem.clone(), false), ("index", number, true)],
                    Type::void(),
                ))],
                Type::void(),
            ),
            "reduce" => method_opt(
                vec![
                    (
                        "reducer",
                        method(
                            vec![("acc", Type::any()), ("value", elem.clone())],
                            Type::any(),
                        ),
                        false,
                    ),
                    ("initial", Type::any(), true),
                ],
                Type::any(),
            ),
            "some" | "every" => method(
                vec![("predicate", method(vec![("value", elem.clone())], boolean.clone()))],
                boolean,
            ),
            "reverse" | "flat" | "sort" | "toSorted" | "toReversed" => {
                method_opt(vec![("comparator", Type::any(), true)], this_array)
            }
            "fill" => method(vec![("value", elem.clone())], this_array),
            "keys" => method(vec![], Rc::new(Type::Iterator(number))),
            "values" => method(vec![], Rc::new(Type::Iterator(elem.clone()))),
            "entries" => method(
                vec![],
                Rc::new(Type::Iterator(Rc::new(Type::Tuple {
                    elems: vec![number, elem.clone()],
                    rest: None,
                    required: 2,
                }))),
            ),
            "flatMap" => method(vec![("mapper", Type::any())], Rc::new(Type::Array(Type::any()))),
            "toString" => method(vec![], Type::string()),
            _ => return None,
        })
    }

    fn number_member(&mut self, name: &str) -> Option<TypeRef> {
        Some(match name {
            "toFixed" | "toPrecision" => {
                method_opt(vec![("digits", Type::number(), true)], Type::string())
            }
            "toString" => method_opt(vec![("radix", Type::number(), true)], Type::string()),
            _ => return None,
        })
    }

    fn set_member(&mut self, elem: &TypeRef, name: &str) -> Option<TypeRef> {
        let this_set: TypeRef = Rc::new(Type::Set(elem.clone()));
        let boolean = Type::boolean();
        Some(match name {
            "size" => Type::number(),
            "add" => method(vec![("value", elem.clone())], this_set),
            "has" | "delete" => method(vec![("value", elem.clone())], boolean),
            "clear" => method(vec![], Type::void()),
            "forEach" => method(
                vec![("callback", method(vec![("value", elem.clone())], Type::void()))],
                Type::void(),
            ),
            "union" | "intersection" | "difference" | "symmetricDifference" => {
                method(vec![("other", this_set.clone())], this_set)
            }
            "isSubsetOf" | "isSupersetOf" | "isDisjointFrom" => {
                method(vec![("other", this_set)], boolean)
            }
            "keys" | "values" => method(vec![], Rc::new(Type::Iterator(elem.clone()))),
            "entries" => method(
                vec![],
                Rc::new(Type::Iterator(Rc::new(Type::Tuple {
                    elems: vec![elem.clone(), elem.clone()],
                    rest: None,
                    required: 2,
                }))),
            ),
            _ => return None,
        })
    }

    fn map_member(&mut self, k: &TypeRef, v: &TypeRef, name: &str) -> Option<TypeRef> {
        let this_map: TypeRef = Rc::new(Type::Map(k.clone(), v.clone()));
        Some(match name {
            "size" => Type::number(),
            "get" => method(
                vec![("key", k.clone())],
                Type::union(vec![v.clone(), Type::undefined()]),
            ),
            "set" => method(vec![("key", k.clone()), ("value", v.clone())], this_map),
            "has" | "delete" => method(vec![("key", k.clone())], Type::boolean()),
            "clear" => method(vec![], Type::void()),
            "keys" => method(vec![], Rc::new(Type::Iterator(k.clone()))),
            "values" => method(vec![], Rc::new(Type::Iterator(v.clone()))),
            "entries" => method(
                vec![],
                Rc::new(Type::Iterator(Rc::new(Type::Tuple {
                    elems: vec![k.clone(), v.clone()],
                    rest: None,
                    required: 2,
                }))),
            ),
            "forEach" => method(
                vec![(
                    "callback",
                    method(vec![("value", v.clone()), ("key", k.clone())], Type::void()),
                )],
                Type::void(),
            ),
            _ => return None,
        })
    }

    fn promise_member(&mut self, payload: &TypeRef, name: &str) -> Option<TypeRef> {
        Some(match name {
            "then" => method_opt(
                vec![
                    (
                        "onFulfilled",
                        method(vec![("value", payload.clone())], Type::any()),
                        false,
                    ),
                    ("onRejected", Type::any(), true),
                ],
                Rc::new(Type::Promise(Type::any())),
            ),
            "catch" => method(
                vec![("onRejected", method(vec![("reason", Type::any())], Type::any()))],
                Rc::new(Type::Promise(Type::any())),
            ),
            "finally" => method(
                vec![("onFinally", method(vec![], Type::void()))],
                Rc::new(Type::Promise(payload.clone())),
            ),
            _ => return None,
        })
    }
}

fn iterator_result(value: &TypeRef, ret: &TypeRef) -> TypeRef {
    let mut fields = indexmap::IndexMap::new();
    fields.insert("value".to_string(), Type::union(vec![value.clone(), ret.clone()]));
    fields.insert("done".to_string(), Type::boolean());
    Rc::new(Type::Record {
        fields,
        optional: rustc_hash::FxHashSet::default(),
        string_index: None,
        number_index: None,
    })
}
