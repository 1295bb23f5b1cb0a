//! The instruction set.
//!
//! A stack machine: operands are pushed, operators pop and push. Jump
//! targets are absolute instruction indices, patched by the builder.
//!
//! Numeric-specialized opcodes (`AddNum`, `LessNum`, ...) are selected by
//! the lowering pass when the type map proves both operands are numbers,
//! skipping the generic dispatch. `finally` blocks and `using` disposal are
//! lowered by inlining the cleanup code on every exit path of their region,
//! so the VM needs no finally bookkeeping — only a catch-handler stack.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push `constants[i]`.
    Const(u32),
    Undefined,
    Null,
    True,
    False,
    /// Push a number directly (the common case skips the pool).
    Number(f64),

    Pop,
    Dup,

    LoadLocal(u32),
    StoreLocal(u32),
    /// Initialize cell slot `i`: variables captured by nested closures live
    /// in cells on the frame's display, shared by reference.
    MakeCell(u32),
    LoadCell(u32),
    StoreCell(u32),
    /// Captured cells of the enclosing function.
    LoadCapture(u32),
    StoreCapture(u32),
    /// Globals and built-in constructors by name (`names[i]`).
    LoadGlobal(u32),
    StoreGlobal(u32),

    // Generic operators, dispatched through the runtime facade.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    EqLoose,
    NeqLoose,
    EqStrict,
    NeqStrict,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    InOp,
    InstanceOfOp,
    Neg,
    ToNumber,
    Not,
    BitNot,
    TypeOf,

    // Numeric specializations.
    AddNum,
    SubNum,
    MulNum,
    DivNum,
    LessNum,
    LessEqNum,
    GreaterNum,
    GreaterEqNum,

    /// Variadic string concatenation: pops `n` parts, pushes the joined
    /// string. Concatenation chains flatten into one of these.
    Concat(u32),

    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    /// Jump when the top of stack is nullish, leaving it in place.
    JumpIfNullish(u32),

    /// `obj.name` / `obj.name = v` (name in `names`; Set pops value then
    /// object, pushes the value back).
    GetProp(u32),
    SetProp(u32),
    GetIndex,
    SetIndex,
    /// Registry path `namespace.member` (`console.log`).
    LoadNamespaceMember { ns: u32, member: u32 },
    /// Push the frame's `this` binding.
    LoadThis,
    /// Push the superclass method `names[i]` bound to the frame's `this`.
    LoadSuperMethod(u32),
    /// Invoke the superclass constructor against the frame's `this`.
    CallSuper { argc: u32 },

    /// Stack: callee, args... → result.
    Call { argc: u32 },
    /// Stack: receiver, args... → result; method name in `names`.
    CallMethod { name: u32, argc: u32 },
    /// Stack: constructor, args... → instance.
    New { argc: u32 },
    /// Spread variants: the arguments arrive as one array on the stack.
    CallSpread,
    CallMethodSpread { name: u32 },
    NewSpread,

    /// Instantiate `constants[i]` (a function prototype), capturing cells
    /// per its capture table.
    MakeFunction(u32),
    /// Instantiate `constants[i]` (a class template). Pops the superclass
    /// value when the template declares one.
    MakeClass(u32),
    /// Pops `n` values, pushes an array.
    MakeArray(u32),
    /// Pops a value, appends to the array below it.
    ArrayPush,
    /// Pops an iterable, appends its values to the array below it.
    ArraySpread,
    /// Pushes an empty object.
    MakeEmptyObject,
    /// Pops value then key, adds the entry to the object below them.
    ObjectEntry,
    /// Pops a source object, merges its properties into the object below.
    ObjectSpread,

    /// Suspend: deliver top of stack as a yield; resumes with the sent
    /// value pushed (a throw sent into the generator rethrows here).
    Yield,
    /// Suspend until the awaited value settles; non-promises pass through.
    Await,

    Return,
    ReturnUndefined,
    Throw,

    /// Push a catch region: a throw inside jumps to `catch_pc` with the
    /// error pushed, after unwinding the operand stack to the region's
    /// depth.
    TryPush { catch_pc: u32 },
    TryPop,

    /// `using`: pop a resource, register it for disposal in the current
    /// scope (nullish values are skipped).
    RegisterDisposal,
    /// Open/close a disposal scope.
    DisposalScopePush,
    DisposalScopePop,
    /// Drain the current disposal scope LIFO, invoking `Symbol.dispose`.
    DisposeAll,

    /// `for-in`: pops the subject, pushes its key array.
    EnumKeys,
    /// Pops an iterable, pushes an iterator handle.
    GetIter,
    /// Stack: iter → iter, value, done.
    IterNext { is_async: bool },

    Nop,
}
