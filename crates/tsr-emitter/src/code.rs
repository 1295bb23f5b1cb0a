//! Code objects and the serialized module container.
//!
//! A `CodeUnit` is one compiled body: instructions, constant pool, interned
//! names, and a line table for runtime diagnostics. Function prototypes and
//! class templates nest inside the constant pool. The module container
//! serializes with postcard behind the serde derives; `tsr compile` writes
//! it and both `tsr run` and the packaging verb read it back.

use serde::{Deserialize, Serialize};

use crate::op::Op;

/// Where a closure capture comes from when a function is instantiated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum CaptureSource {
    /// A cell of the instantiating frame.
    ParentCell(u32),
    /// A capture of the instantiating function, forwarded down.
    ParentCapture(u32),
}

/// A compiled function body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FnProto {
    pub name: String,
    pub code: CodeUnit,
    /// Parameter slots occupy the first locals.
    pub param_count: u32,
    pub required_count: u32,
    pub has_rest: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_arrow: bool,
    pub is_strict: bool,
    pub captures: Vec<CaptureSource>,
}

/// A compiled class: field initialization is folded into the constructor
/// prototype, so instantiation is allocate-then-call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassTemplate {
    pub name: String,
    pub has_superclass: bool,
    pub is_abstract: bool,
    /// Constructor prototype index in the owning pool (synthesized when the
    /// source has none).
    pub constructor: Option<u32>,
    pub methods: Vec<(String, u32)>,
    pub getters: Vec<(String, u32)>,
    pub setters: Vec<(String, u32)>,
    pub static_methods: Vec<(String, u32)>,
    /// Static initializer body (static fields and static blocks), run once
    /// at class creation with `this` bound to the class.
    pub static_init: Option<u32>,
}

/// One entry of a constant pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Constant {
    Number(f64),
    String(String),
    /// BigInt source digits.
    BigInt(String),
    Regex { pattern: String, flags: String },
    Function(Box<FnProto>),
    Class(Box<ClassTemplate>),
}

/// One compiled body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CodeUnit {
    pub ops: Vec<Op>,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub local_count: u32,
    pub cell_count: u32,
    pub strict: bool,
    /// `(first_pc, line)` runs, binary-searched for diagnostics.
    pub lines: Vec<(u32, u32)>,
}

impl CodeUnit {
    /// The source line for an instruction index.
    pub fn line_at(&self, pc: usize) -> u32 {
        match self.lines.binary_search_by(|(start, _)| (*start as usize).cmp(&pc)) {
            Ok(i) => self.lines[i].1,
            Err(0) => 0,
            Err(i) => self.lines[i - 1].1,
        }
    }
}

/// The emitted module: a `main` body executing the top-level statements in
/// source order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    /// Container format version.
    pub format: u32,
    /// Engine version that produced the module.
    pub engine: String,
    pub main: CodeUnit,
}

pub const MODULE_FORMAT: u32 = 1;

impl Module {
    pub fn new(main: CodeUnit) -> Self {
        Module {
            format: MODULE_FORMAT,
            engine: env!("CARGO_PKG_VERSION").to_string(),
            main,
        }
    }

    /// Serialize to the binary container.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_round_trips_through_postcard() {
        let mut unit = CodeUnit::default();
        unit.ops = vec![Op::Number(42.0), Op::Return];
        unit.constants.push(Constant::String("hello".into()));
        unit.names.push("x".into());
        unit.lines.push((0, 1));
        let module = Module::new(unit);
        let bytes = module.to_bytes().unwrap();
        let back = Module::from_bytes(&bytes).unwrap();
        assert_eq!(back.format, MODULE_FORMAT);
        assert_eq!(back.main.ops.len(), 2);
        assert!(matches!(back.main.ops[0], Op::Number(n) if n == 42.0));
    }

    #[test]
    fn line_table_lookup() {
        let unit = CodeUnit {
            lines: vec![(0, 1), (5, 2), (9, 7)],
            ..CodeUnit::default()
        };
        assert_eq!(unit.line_at(0), 1);
        assert_eq!(unit.line_at(4), 1);
        assert_eq!(unit.line_at(5), 2);
        assert_eq!(unit.line_at(12), 7);
    }
}
