//! The stack VM.
//!
//! Frames execute over the shared runtime value model; every semantic
//! operation goes through the runtime facade. The frame loop is an async
//! function: `Yield` and `Await` are its only suspension points, which makes
//! compiled generator and async bodies coroutines driven by the same
//! scheduler the interpreter uses. Error unwinding walks the frame's catch
//! handler stack; `finally` and disposal cleanup were inlined by the
//! lowerer.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use tsr_runtime::builtins;
use tsr_runtime::coroutine::{BodyCoroutine, GenChannel, YieldPoint};
use tsr_runtime::error::{make_error, throw_type_error};
use tsr_runtime::members::{self, IterSource, Property, SetOutcome};
use tsr_runtime::value::*;
use tsr_runtime::{Engine, LocalBoxFuture, Output, RtResult, Scheduler, Value};

use crate::code::{CaptureSource, ClassTemplate, CodeUnit, Constant, FnProto, Module};
use crate::facade;
use crate::op::Op;

// =============================================================================
// Linked (runtime) form of a module
// =============================================================================

pub(crate) struct RtUnit {
    ops: Vec<Op>,
    consts: Vec<RtConst>,
    names: Vec<Rc<str>>,
    local_count: u32,
    cell_count: u32,
    strict: bool,
    lines: Vec<(u32, u32)>,
}

impl RtUnit {
    fn line_at(&self, pc: usize) -> u32 {
        match self.lines.binary_search_by(|(start, _)| (*start as usize).cmp(&pc)) {
            Ok(i) => self.lines[i].1,
            Err(0) => 0,
            Err(i) => self.lines[i - 1].1,
        }
    }
}

enum RtConst {
    Number(f64),
    String(Rc<str>),
    BigInt(String),
    Regex { pattern: String, flags: String },
    Function(Rc<RtProto>),
    Class(Rc<RtClass>),
}

pub(crate) struct RtProto {
    name: String,
    code: Rc<RtUnit>,
    param_count: u32,
    required_count: u32,
    has_rest: bool,
    is_async: bool,
    is_generator: bool,
    is_arrow: bool,
    captures: Vec<CaptureSource>,
}

pub(crate) struct RtClass {
    name: String,
    has_superclass: bool,
    is_abstract: bool,
    constructor: Option<Rc<RtProto>>,
    methods: Vec<(String, Rc<RtProto>)>,
    getters: Vec<(String, Rc<RtProto>)>,
    setters: Vec<(String, Rc<RtProto>)>,
    static_methods: Vec<(String, Rc<RtProto>)>,
    static_init: Option<Rc<RtProto>>,
}

fn link(unit: CodeUnit) -> Rc<RtUnit> {
    // Class templates refer to function constants earlier in the same pool,
    // so linking proceeds in order and resolves those indices against the
    // already-linked prefix.
    let mut consts: Vec<RtConst> = Vec::with_capacity(unit.constants.len());
    for constant in unit.constants {
        let linked = match constant {
            Constant::Number(n) => RtConst::Number(n),
            Constant::String(s) => RtConst::String(Rc::from(s.as_str())),
            Constant::BigInt(digits) => RtConst::BigInt(digits),
            Constant::Regex { pattern, flags } => RtConst::Regex { pattern, flags },
            Constant::Function(proto) => RtConst::Function(link_proto(*proto)),
            Constant::Class(template) => RtConst::Class(link_class(*template, &consts)),
        };
        consts.push(linked);
    }
    Rc::new(RtUnit {
        ops: unit.ops,
        consts,
        names: unit.names.into_iter().map(|n| Rc::from(n.as_str())).collect(),
        local_count: unit.local_count,
        cell_count: unit.cell_count,
        strict: unit.strict,
        lines: unit.lines,
    })
}

fn link_proto(proto: FnProto) -> Rc<RtProto> {
    Rc::new(RtProto {
        name: proto.name,
        code: link(proto.code),
        param_count: proto.param_count,
        required_count: proto.required_count,
        has_rest: proto.has_rest,
        is_async: proto.is_async,
        is_generator: proto.is_generator,
        is_arrow: proto.is_arrow,
        captures: proto.captures,
    })
}

fn link_class(template: ClassTemplate, pool: &[RtConst]) -> Rc<RtClass> {
    let get = |i: u32| -> Rc<RtProto> {
        match &pool[i as usize] {
            RtConst::Function(proto) => Rc::clone(proto),
            _ => unreachable!("class template references a non-function constant"),
        }
    };
    let get_all = |entries: Vec<(String, u32)>| -> Vec<(String, Rc<RtProto>)> {
        entries.into_iter().map(|(name, i)| (name, get(i))).collect()
    };
    Rc::new(RtClass {
        name: template.name,
        has_superclass: template.has_superclass,
        is_abstract: template.is_abstract,
        constructor: template.constructor.map(get),
        methods: get_all(template.methods),
        getters: get_all(template.getters),
        setters: get_all(template.setters),
        static_methods: get_all(template.static_methods),
        static_init: template.static_init.map(get),
    })
}

/// A compiled function value.
pub(crate) struct VmFunction {
    proto: Rc<RtProto>,
    captures: Vec<Rc<RefCell<Value>>>,
    captured_this: Option<Value>,
    home_class: RefCell<Option<Rc<ClassValue>>>,
}

impl OpaqueValue for VmFunction {
    fn type_name(&self) -> &'static str {
        "function"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// =============================================================================
// The VM engine
// =============================================================================

struct VmState {
    globals: RefCell<FxHashMap<String, Value>>,
    scheduler: Rc<Scheduler>,
    output: Rc<Output>,
}

#[derive(Clone)]
pub struct Vm {
    inner: Rc<VmState>,
}

impl Engine for Vm {
    fn call_value(
        &self,
        callee: Value,
        this: Value,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'static, RtResult<Value>> {
        let vm = self.clone();
        Box::pin(async move { vm.invoke(&callee, this, args).await })
    }

    fn scheduler(&self) -> Rc<Scheduler> {
        Rc::clone(&self.inner.scheduler)
    }

    fn output(&self) -> Rc<Output> {
        Rc::clone(&self.inner.output)
    }
}

struct Handler {
    catch_pc: usize,
    stack_depth: usize,
    disposal_depth: usize,
}

struct Frame {
    code: Rc<RtUnit>,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    cells: Vec<Rc<RefCell<Value>>>,
    captures: Vec<Rc<RefCell<Value>>>,
    this: Value,
    home_class: Option<Rc<ClassValue>>,
    handlers: Vec<Handler>,
    disposals: Vec<Vec<Value>>,
    gen_channel: Option<Rc<GenChannel>>,
}

impl Frame {
    fn new(code: Rc<RtUnit>) -> Self {
        let locals = vec![Value::Undefined; code.local_count as usize];
        let cells = (0..code.cell_count)
            .map(|_| Rc::new(RefCell::new(Value::Undefined)))
            .collect();
        Frame {
            code,
            pc: 0,
            stack: Vec::with_capacity(16),
            locals,
            cells,
            captures: Vec::new(),
            this: Value::Undefined,
            home_class: None,
            handlers: Vec::new(),
            disposals: Vec::new(),
            gen_channel: None,
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    fn pop_args(&mut self, argc: u32) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(argc as usize);
        self.stack.split_off(at)
    }
}

impl Vm {
    pub fn new(output: Rc<Output>) -> Self {
        Vm {
            inner: Rc::new(VmState {
                globals: RefCell::new(FxHashMap::default()),
                scheduler: Scheduler::new(),
                output,
            }),
        }
    }

    /// Execute a module's `main`, drive the loop to quiescence, and report
    /// the first uncaught throw.
    pub fn run_module(&self, module: Module) -> Result<(), Value> {
        let main = link(module.main);
        let error: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let vm = self.clone();
        let error_slot = Rc::clone(&error);
        self.inner.scheduler.spawn(Box::pin(async move {
            let mut frame = Frame::new(main);
            if let Err(e) = vm.run_frame(&mut frame).await {
                *error_slot.borrow_mut() = Some(e);
            }
        }));
        self.inner.scheduler.run(self);
        for rejection in self.inner.scheduler.unhandled_rejections() {
            self.inner.output.write_err(&format!(
                "Unhandled promise rejection: {}",
                facade::to_display_string(&rejection)
            ));
        }
        let error = error.borrow_mut().take();
        match error {
            Some(value) => Err(value),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn invoke<'v>(
        &'v self,
        callee: &'v Value,
        this: Value,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'v, RtResult<Value>> {
        Box::pin(async move {
            match callee {
                Value::Opaque(opaque) => match opaque.as_any().downcast_ref::<VmFunction>() {
                    Some(function) => self.call_vm_function(function, this, args).await,
                    None => Err(throw_type_error("value is not callable")),
                },
                Value::Bound(bound) => {
                    let receiver = bound.receiver.clone();
                    self.invoke(&bound.func.clone(), receiver, args).await
                }
                Value::Native(native) => {
                    if args.len() < native.min_arity {
                        return Err(throw_type_error(format!(
                            "{} requires at least {} argument(s)",
                            native.name, native.min_arity
                        )));
                    }
                    (native.f)(&NativeCtx { engine: self }, args)
                }
                Value::NativeMethod(method) => {
                    (method.f)(&NativeCtx { engine: self }, &method.receiver, args)
                }
                Value::Class(_) => Err(throw_type_error(
                    "Class constructor cannot be invoked without 'new'",
                )),
                other => Err(throw_type_error(format!(
                    "{} is not a function",
                    facade::to_display_string(other)
                ))),
            }
        })
    }

    async fn call_vm_function(
        &self,
        function: &VmFunction,
        this: Value,
        args: Vec<Value>,
    ) -> RtResult<Value> {
        let proto = &function.proto;
        if args.len() < proto.required_count as usize {
            return Err(throw_type_error(format!(
                "{} requires at least {} argument(s), got {}",
                if proto.name.is_empty() { "function" } else { &proto.name },
                proto.required_count,
                args.len()
            )));
        }

        if proto.is_generator {
            let channel = Rc::new(GenChannel::default());
            let vm = self.clone();
            let function = clone_vm_function(function);
            let channel_for_body = Rc::clone(&channel);
            let is_async = proto.is_async;
            let body: LocalBoxFuture<'static, RtResult<Value>> = Box::pin(async move {
                let mut frame = vm.make_frame(&function, this, args);
                frame.gen_channel = Some(channel_for_body);
                vm.run_frame(&mut frame).await
            });
            return Ok(Value::Generator(Rc::new(GeneratorObject {
                co: Rc::new(BodyCoroutine::new(body, channel)),
                is_async,
                done: Cell::new(false),
            })));
        }

        if proto.is_async {
            // Run synchronously to the first suspension point, then hand
            // the remainder to the loop.
            let promise = PromiseData::new();
            let vm = self.clone();
            let function = clone_vm_function(function);
            let mut future: LocalBoxFuture<'static, RtResult<Value>> = Box::pin(async move {
                let mut frame = vm.make_frame(&function, this, args);
                vm.run_frame(&mut frame).await
            });
            let scheduler = Rc::clone(&self.inner.scheduler);
            let mut cx = Context::from_waker(Waker::noop());
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(Ok(value)) => scheduler.resolve(&promise, value),
                Poll::Ready(Err(error)) => scheduler.settle(&promise, error, true),
                Poll::Pending => {
                    let promise_for_task = Rc::clone(&promise);
                    let scheduler_for_task = Rc::clone(&scheduler);
                    scheduler.spawn(Box::pin(async move {
                        match future.await {
                            Ok(value) => scheduler_for_task.resolve(&promise_for_task, value),
                            Err(error) => {
                                scheduler_for_task.settle(&promise_for_task, error, true);
                            }
                        }
                    }));
                }
            }
            return Ok(Value::Promise(promise));
        }

        let mut frame = self.make_frame(function, this, args);
        Box::pin(self.run_frame(&mut frame)).await
    }

    fn make_frame(&self, function: &VmFunction, this: Value, mut args: Vec<Value>) -> Frame {
        let proto = &function.proto;
        let mut frame = Frame::new(Rc::clone(&proto.code));
        frame.captures = function.captures.clone();
        frame.home_class = function.home_class.borrow().clone();
        frame.this = match (&function.captured_this, proto.is_arrow) {
            (Some(captured), true) => captured.clone(),
            _ => this,
        };
        let params = proto.param_count as usize;
        if proto.has_rest && params > 0 {
            let rest: Vec<Value> = if args.len() >= params {
                args.split_off(params - 1)
            } else {
                Vec::new()
            };
            args.resize(params - 1, Value::Undefined);
            args.push(Value::array(rest));
        } else {
            args.resize(params, Value::Undefined);
        }
        for (i, arg) in args.into_iter().enumerate().take(params) {
            frame.locals[i] = arg;
        }
        frame
    }

    fn vm_construct<'v>(
        &'v self,
        class: &'v Rc<ClassValue>,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'v, RtResult<Value>> {
        Box::pin(async move {
            if class.is_abstract {
                return Err(throw_type_error(format!(
                    "Cannot create an instance of abstract class '{}'",
                    class.name
                )));
            }
            let instance = Value::Instance(Rc::new(InstanceData {
                class: Rc::clone(class),
                fields: RefCell::new(IndexMap::new()),
                frozen: Cell::new(false),
            }));
            if let Some(ctor) = class.find_constructor() {
                self.invoke(&ctor, instance.clone(), args).await?;
            }
            Ok(instance)
        })
    }

    fn make_class(&self, template: &Rc<RtClass>, superclass: Option<Rc<ClassValue>>) -> Value {
        let make = |proto: &Rc<RtProto>| -> Value {
            Value::Opaque(Rc::new(VmFunction {
                proto: Rc::clone(proto),
                captures: Vec::new(),
                captured_this: None,
                home_class: RefCell::new(None),
            }))
        };
        let class = Rc::new(ClassValue {
            name: template.name.clone(),
            decl: None,
            superclass,
            methods: template.methods.iter().map(|(n, p)| (n.clone(), make(p))).collect(),
            getters: template.getters.iter().map(|(n, p)| (n.clone(), make(p))).collect(),
            setters: template.setters.iter().map(|(n, p)| (n.clone(), make(p))).collect(),
            static_methods: template
                .static_methods
                .iter()
                .map(|(n, p)| (n.clone(), make(p)))
                .collect(),
            static_getters: IndexMap::new(),
            static_props: RefCell::new(IndexMap::new()),
            constructor: template.constructor.as_ref().map(&make),
            is_abstract: template.is_abstract,
        });
        let patch = |value: &Value| {
            if let Value::Opaque(opaque) = value {
                if let Some(function) = opaque.as_any().downcast_ref::<VmFunction>() {
                    *function.home_class.borrow_mut() = Some(Rc::clone(&class));
                }
            }
        };
        class.methods.values().for_each(&patch);
        class.getters.values().for_each(&patch);
        class.setters.values().for_each(&patch);
        class.static_methods.values().for_each(&patch);
        if let Some(ctor) = &class.constructor {
            patch(ctor);
        }
        Value::Class(class)
    }

    // =========================================================================
    // The frame loop
    // =========================================================================

    async fn run_frame(&self, frame: &mut Frame) -> RtResult<Value> {
        loop {
            let op = match frame.code.ops.get(frame.pc) {
                Some(op) => *op,
                None => return Ok(Value::Undefined),
            };
            frame.pc += 1;
            match self.step(frame, op).await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Return(value)) => return Ok(value),
                Err(error) => {
                    let error = attach_line(error, frame.code.line_at(frame.pc.saturating_sub(1)));
                    match frame.handlers.pop() {
                        Some(handler) => {
                            frame.stack.truncate(handler.stack_depth);
                            frame.disposals.truncate(handler.disposal_depth);
                            frame.stack.push(error);
                            frame.pc = handler.catch_pc;
                        }
                        None => return Err(error),
                    }
                }
            }
        }
    }

    async fn step(&self, frame: &mut Frame, op: Op) -> RtResult<StepOutcome> {
        match op {
            Op::Const(i) => {
                let value = self.materialize_const(frame, i)?;
                frame.stack.push(value);
            }
            Op::Undefined => frame.stack.push(Value::Undefined),
            Op::Null => frame.stack.push(Value::Null),
            Op::True => frame.stack.push(Value::Bool(true)),
            Op::False => frame.stack.push(Value::Bool(false)),
            Op::Number(n) => frame.stack.push(Value::Number(n)),
            Op::Pop => {
                frame.pop();
            }
            Op::Dup => {
                let top = frame.stack.last().cloned().unwrap_or_default();
                frame.stack.push(top);
            }
            Op::LoadLocal(i) => frame.stack.push(frame.locals[i as usize].clone()),
            Op::StoreLocal(i) => {
                let value = frame.pop();
                frame.locals[i as usize] = value;
            }
            Op::MakeCell(i) => {
                let value = frame.pop();
                frame.cells[i as usize] = Rc::new(RefCell::new(value));
            }
            Op::LoadCell(i) => {
                let value = frame.cells[i as usize].borrow().clone();
                frame.stack.push(value);
            }
            Op::StoreCell(i) => {
                let value = frame.pop();
                *frame.cells[i as usize].borrow_mut() = value;
            }
            Op::LoadCapture(i) => {
                let value = frame.captures[i as usize].borrow().clone();
                frame.stack.push(value);
            }
            Op::StoreCapture(i) => {
                let value = frame.pop();
                *frame.captures[i as usize].borrow_mut() = value;
            }
            Op::LoadGlobal(i) => {
                let name = &frame.code.names[i as usize];
                let value = self
                    .inner
                    .globals
                    .borrow()
                    .get(name.as_ref())
                    .cloned()
                    .or_else(|| builtins::global(name));
                match value {
                    Some(value) => frame.stack.push(value),
                    None => {
                        return Err(make_error("ReferenceError", format!("{name} is not defined")));
                    }
                }
            }
            Op::StoreGlobal(i) => {
                let name = frame.code.names[i as usize].to_string();
                let value = frame.pop();
                self.inner.globals.borrow_mut().insert(name, value);
            }

            // Generic operators.
            Op::Add => self.binary(frame, |a, b| facade::add(a, b))?,
            Op::Sub => self.binary(frame, |a, b| facade::arithmetic("-", a, b))?,
            Op::Mul => self.binary(frame, |a, b| facade::arithmetic("*", a, b))?,
            Op::Div => self.binary(frame, |a, b| facade::arithmetic("/", a, b))?,
            Op::Rem => self.binary(frame, |a, b| facade::arithmetic("%", a, b))?,
            Op::Pow => self.binary(frame, |a, b| facade::arithmetic("**", a, b))?,
            Op::Less => self.binary(frame, |a, b| facade::compare("<", a, b))?,
            Op::LessEq => self.binary(frame, |a, b| facade::compare("<=", a, b))?,
            Op::Greater => self.binary(frame, |a, b| facade::compare(">", a, b))?,
            Op::GreaterEq => self.binary(frame, |a, b| facade::compare(">=", a, b))?,
            Op::EqLoose => self.binary(frame, |a, b| Ok(Value::Bool(facade::loose_equals(a, b))))?,
            Op::NeqLoose => {
                self.binary(frame, |a, b| Ok(Value::Bool(!facade::loose_equals(a, b))))?;
            }
            Op::EqStrict => {
                self.binary(frame, |a, b| Ok(Value::Bool(facade::strict_equals(a, b))))?;
            }
            Op::NeqStrict => {
                self.binary(frame, |a, b| Ok(Value::Bool(!facade::strict_equals(a, b))))?;
            }
            Op::BitAnd => self.binary(frame, |a, b| facade::bitwise("&", a, b))?,
            Op::BitOr => self.binary(frame, |a, b| facade::bitwise("|", a, b))?,
            Op::BitXor => self.binary(frame, |a, b| facade::bitwise("^", a, b))?,
            Op::Shl => self.binary(frame, |a, b| facade::bitwise("<<", a, b))?,
            Op::Shr => self.binary(frame, |a, b| facade::bitwise(">>", a, b))?,
            Op::UShr => self.binary(frame, |a, b| facade::unsigned_right_shift(a, b))?,
            Op::InOp => self.binary(frame, |a, b| facade::in_op(a, b))?,
            Op::InstanceOfOp => self.binary(frame, |a, b| facade::instance_of(a, b))?,
            Op::Neg => {
                let v = frame.pop();
                frame.stack.push(facade::negate(&v)?);
            }
            Op::ToNumber => {
                let v = frame.pop();
                frame.stack.push(Value::Number(facade::to_number(&v)));
            }
            Op::Not => {
                let v = frame.pop();
                frame.stack.push(Value::Bool(!facade::truthy(&v)));
            }
            Op::BitNot => {
                let v = frame.pop();
                frame.stack.push(facade::bit_not(&v)?);
            }
            Op::TypeOf => {
                let v = frame.pop();
                frame.stack.push(Value::str(facade::type_of(&v)));
            }

            // Numeric fast paths: unboxed when both operands are doubles,
            // generic fallback otherwise.
            Op::AddNum => self.binary_num(frame, |a, b| a + b, |a, b| facade::add(a, b))?,
            Op::SubNum => {
                self.binary_num(frame, |a, b| a - b, |a, b| facade::arithmetic("-", a, b))?;
            }
            Op::MulNum => {
                self.binary_num(frame, |a, b| a * b, |a, b| facade::arithmetic("*", a, b))?;
            }
            Op::DivNum => {
                self.binary_num(frame, |a, b| a / b, |a, b| facade::arithmetic("/", a, b))?;
            }
            Op::LessNum => {
                self.binary_num_bool(frame, |a, b| a < b, |a, b| facade::compare("<", a, b))?;
            }
            Op::LessEqNum => {
                self.binary_num_bool(frame, |a, b| a <= b, |a, b| facade::compare("<=", a, b))?;
            }
            Op::GreaterNum => {
                self.binary_num_bool(frame, |a, b| a > b, |a, b| facade::compare(">", a, b))?;
            }
            Op::GreaterEqNum => {
                self.binary_num_bool(frame, |a, b| a >= b, |a, b| facade::compare(">=", a, b))?;
            }

            Op::Concat(n) => {
                let parts = frame.pop_args(n);
                frame.stack.push(facade::concat(&parts));
            }

            Op::Jump(t) => frame.pc = t as usize,
            Op::JumpIfFalse(t) => {
                let v = frame.pop();
                if !facade::truthy(&v) {
                    frame.pc = t as usize;
                }
            }
            Op::JumpIfTrue(t) => {
                let v = frame.pop();
                if facade::truthy(&v) {
                    frame.pc = t as usize;
                }
            }
            Op::JumpIfNullish(t) => {
                let nullish = frame.stack.last().map(Value::is_nullish).unwrap_or(true);
                if nullish {
                    frame.pc = t as usize;
                }
            }

            Op::GetProp(i) => {
                let name = Rc::clone(&frame.code.names[i as usize]);
                let object = frame.pop();
                let value = self.get_member(&object, &name).await?;
                frame.stack.push(value);
            }
            Op::SetProp(i) => {
                let name = Rc::clone(&frame.code.names[i as usize]);
                let value = frame.pop();
                let object = frame.pop();
                self.set_member(&object, &name, value.clone(), frame.code.strict).await?;
                frame.stack.push(value);
            }
            Op::GetIndex => {
                let index = frame.pop();
                let object = frame.pop();
                frame.stack.push(facade::get_index(&object, &index)?);
            }
            Op::SetIndex => {
                let value = frame.pop();
                let index = frame.pop();
                let object = frame.pop();
                facade::set_index(&object, &index, value.clone(), frame.code.strict)?;
                frame.stack.push(value);
            }
            Op::LoadNamespaceMember { ns, member } => {
                let ns_name = &frame.code.names[ns as usize];
                let member_name = &frame.code.names[member as usize];
                match builtins::namespace_member(ns_name, member_name) {
                    Some(value) => frame.stack.push(value),
                    None => {
                        return Err(make_error(
                            "ReferenceError",
                            format!("{ns_name}.{member_name} is not defined"),
                        ));
                    }
                }
            }
            Op::LoadThis => frame.stack.push(frame.this.clone()),
            Op::LoadSuperMethod(i) => {
                let name = &frame.code.names[i as usize];
                let parent = self.super_of(frame)?;
                let method = parent.find_method(name).ok_or_else(|| {
                    throw_type_error(format!("Property '{name}' does not exist on superclass"))
                })?;
                frame.stack.push(Value::Bound(Rc::new(BoundMethod {
                    func: method,
                    receiver: frame.this.clone(),
                })));
            }
            Op::CallSuper { argc } => {
                let args = frame.pop_args(argc);
                let parent = self.super_of(frame)?;
                match parent.find_constructor() {
                    Some(ctor) => {
                        self.invoke(&ctor, frame.this.clone(), args).await?;
                    }
                    None => {}
                }
                frame.stack.push(Value::Undefined);
            }

            Op::Call { argc } => {
                let args = frame.pop_args(argc);
                let callee = frame.pop();
                let result = self.invoke(&callee, Value::Undefined, args).await?;
                frame.stack.push(result);
            }
            Op::CallMethod { name, argc } => {
                let args = frame.pop_args(argc);
                let method_name = Rc::clone(&frame.code.names[name as usize]);
                let receiver = frame.pop();
                let member = self.get_member(&receiver, &method_name).await?;
                let result = self.invoke(&member, receiver, args).await?;
                frame.stack.push(result);
            }
            Op::New { argc } => {
                let args = frame.pop_args(argc);
                let callee = frame.pop();
                let result = match &callee {
                    Value::Class(class) => self.vm_construct(class, args).await?,
                    Value::Native(_) => self.invoke(&callee, Value::Undefined, args).await?,
                    other => {
                        return Err(throw_type_error(format!(
                            "{} is not a constructor",
                            facade::to_display_string(other)
                        )));
                    }
                };
                frame.stack.push(result);
            }
            Op::CallSpread => {
                let args = self.spread_args(frame)?;
                let callee = frame.pop();
                let result = self.invoke(&callee, Value::Undefined, args).await?;
                frame.stack.push(result);
            }
            Op::CallMethodSpread { name } => {
                let args = self.spread_args(frame)?;
                let method_name = Rc::clone(&frame.code.names[name as usize]);
                let receiver = frame.pop();
                let member = self.get_member(&receiver, &method_name).await?;
                let result = self.invoke(&member, receiver, args).await?;
                frame.stack.push(result);
            }
            Op::NewSpread => {
                let args = self.spread_args(frame)?;
                let callee = frame.pop();
                let result = match &callee {
                    Value::Class(class) => self.vm_construct(class, args).await?,
                    Value::Native(_) => self.invoke(&callee, Value::Undefined, args).await?,
                    other => {
                        return Err(throw_type_error(format!(
                            "{} is not a constructor",
                            facade::to_display_string(other)
                        )));
                    }
                };
                frame.stack.push(result);
            }

            Op::MakeFunction(i) => {
                let RtConst::Function(proto) = &frame.code.consts[i as usize] else {
                    return Err(throw_type_error("corrupt module: expected function constant"));
                };
                let captures: Vec<Rc<RefCell<Value>>> = proto
                    .captures
                    .iter()
                    .map(|source| match source {
                        CaptureSource::ParentCell(j) => Rc::clone(&frame.cells[*j as usize]),
                        CaptureSource::ParentCapture(j) => Rc::clone(&frame.captures[*j as usize]),
                    })
                    .collect();
                let function = VmFunction {
                    proto: Rc::clone(proto),
                    captures,
                    captured_this: proto.is_arrow.then(|| frame.this.clone()),
                    home_class: RefCell::new(frame.home_class.clone()),
                };
                frame.stack.push(Value::Opaque(Rc::new(function)));
            }
            Op::MakeClass(i) => {
                let RtConst::Class(template) = &frame.code.consts[i as usize] else {
                    return Err(throw_type_error("corrupt module: expected class constant"));
                };
                let template = Rc::clone(template);
                let superclass = if template.has_superclass {
                    match frame.pop() {
                        Value::Class(parent) => Some(parent),
                        other => {
                            return Err(throw_type_error(format!(
                                "Class extends value {} is not a constructor",
                                facade::to_display_string(&other)
                            )));
                        }
                    }
                } else {
                    None
                };
                let class_value = self.make_class(&template, superclass);
                if let Some(static_init) = &template.static_init {
                    let function = VmFunction {
                        proto: Rc::clone(static_init),
                        captures: Vec::new(),
                        captured_this: None,
                        home_class: RefCell::new(match &class_value {
                            Value::Class(c) => Some(Rc::clone(c)),
                            _ => None,
                        }),
                    };
                    self.call_vm_function(&function, class_value.clone(), Vec::new()).await?;
                }
                frame.stack.push(class_value);
            }
            Op::MakeArray(n) => {
                let items = frame.pop_args(n);
                frame.stack.push(Value::array(items));
            }
            Op::ArrayPush => {
                let value = frame.pop();
                if let Some(Value::Array(items)) = frame.stack.last() {
                    items.borrow_mut().push(value);
                }
            }
            Op::ArraySpread => {
                let iterable = frame.pop();
                let values = self.iterable_to_values(&iterable).await?;
                if let Some(Value::Array(items)) = frame.stack.last() {
                    items.borrow_mut().extend(values);
                }
            }
            Op::MakeEmptyObject => frame.stack.push(Value::Object(ObjectData::new())),
            Op::ObjectEntry => {
                let value = frame.pop();
                let key = frame.pop();
                if let Some(Value::Object(obj)) = frame.stack.last() {
                    match key {
                        Value::Symbol(symbol) => {
                            obj.symbols.borrow_mut().insert(symbol.id, value);
                        }
                        other => {
                            obj.props
                                .borrow_mut()
                                .insert(facade::to_display_string(&other), value);
                        }
                    }
                }
            }
            Op::ObjectSpread => {
                let source = frame.pop();
                if let Some(Value::Object(obj)) = frame.stack.last() {
                    match &source {
                        Value::Object(src) => {
                            obj.props.borrow_mut().extend(
                                src.props.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                            );
                        }
                        Value::Instance(inst) => {
                            obj.props.borrow_mut().extend(
                                inst.fields.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                            );
                        }
                        _ => {}
                    }
                }
            }

            Op::Yield => {
                let channel = frame.gen_channel.clone().ok_or_else(|| {
                    make_error("SyntaxError", "'yield' outside of a generator function")
                })?;
                let value = frame.pop();
                let sent = YieldPoint::new(channel, value).await?;
                frame.stack.push(sent);
            }
            Op::Await => {
                let value = frame.pop();
                let settled = match value {
                    Value::Promise(promise) => {
                        self.inner.scheduler.await_promise(promise).await?
                    }
                    other => other,
                };
                frame.stack.push(settled);
            }

            Op::Return => {
                let value = frame.pop();
                return Ok(StepOutcome::Return(value));
            }
            Op::ReturnUndefined => return Ok(StepOutcome::Return(Value::Undefined)),
            Op::Throw => {
                let error = frame.pop();
                return Err(error);
            }
            Op::TryPush { catch_pc } => {
                frame.handlers.push(Handler {
                    catch_pc: catch_pc as usize,
                    stack_depth: frame.stack.len(),
                    disposal_depth: frame.disposals.len(),
                });
            }
            Op::TryPop => {
                frame.handlers.pop();
            }

            Op::RegisterDisposal => {
                let resource = frame.pop();
                if !resource.is_nullish() {
                    if let Some(scope) = frame.disposals.last_mut() {
                        scope.push(resource);
                    }
                }
            }
            Op::DisposalScopePush => frame.disposals.push(Vec::new()),
            Op::DisposalScopePop => {
                frame.disposals.pop();
            }
            Op::DisposeAll => {
                let mut resources = frame.disposals.last_mut().map(std::mem::take).unwrap_or_default();
                let mut failure: Option<Value> = None;
                while let Some(resource) = resources.pop() {
                    if let Err(error) = self.dispose(&resource).await {
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
                if let Some(error) = failure {
                    return Err(error);
                }
            }

            Op::EnumKeys => {
                let subject = frame.pop();
                let keys: Vec<Value> = facade::enumerate_keys(&subject)
                    .into_iter()
                    .map(Value::str)
                    .collect();
                frame.stack.push(Value::array(keys));
            }
            Op::GetIter => {
                let iterable = frame.pop();
                let iterator = match members::iter_source(&iterable, false)? {
                    IterSource::Values(values) => members::make_values_iterator(values),
                    IterSource::Generator(generator) => Value::Generator(generator),
                    IterSource::Factory(factory) => {
                        self.invoke(&factory, iterable.clone(), Vec::new()).await?
                    }
                    IterSource::IteratorObject(object) => object,
                };
                frame.stack.push(iterator);
            }
            Op::IterNext { is_async } => {
                let iterator = frame.stack.last().cloned().unwrap_or_default();
                let next = self.get_member(&iterator, "next").await?;
                let mut result = self.invoke(&next, iterator, Vec::new()).await?;
                if is_async {
                    if let Value::Promise(promise) = result {
                        result = self.inner.scheduler.await_promise(promise).await?;
                    }
                }
                let (value, done) = facade::read_iterator_result(&result)?;
                frame.stack.push(value);
                frame.stack.push(Value::Bool(done));
            }

            Op::Nop => {}
        }
        Ok(StepOutcome::Continue)
    }

    // =========================================================================
    // Step helpers
    // =========================================================================

    fn binary(
        &self,
        frame: &mut Frame,
        f: impl Fn(&Value, &Value) -> RtResult<Value>,
    ) -> RtResult<()> {
        let b = frame.pop();
        let a = frame.pop();
        frame.stack.push(f(&a, &b)?);
        Ok(())
    }

    fn binary_num(
        &self,
        frame: &mut Frame,
        fast: impl Fn(f64, f64) -> f64,
        slow: impl Fn(&Value, &Value) -> RtResult<Value>,
    ) -> RtResult<()> {
        let b = frame.pop();
        let a = frame.pop();
        match (facade::unbox_number(&a), facade::unbox_number(&b)) {
            (Some(x), Some(y)) => frame.stack.push(facade::box_number(fast(x, y))),
            _ => frame.stack.push(slow(&a, &b)?),
        }
        Ok(())
    }

    fn binary_num_bool(
        &self,
        frame: &mut Frame,
        fast: impl Fn(f64, f64) -> bool,
        slow: impl Fn(&Value, &Value) -> RtResult<Value>,
    ) -> RtResult<()> {
        let b = frame.pop();
        let a = frame.pop();
        match (facade::unbox_number(&a), facade::unbox_number(&b)) {
            (Some(x), Some(y)) => frame.stack.push(facade::box_bool(fast(x, y))),
            _ => frame.stack.push(slow(&a, &b)?),
        }
        Ok(())
    }

    fn materialize_const(&self, frame: &Frame, i: u32) -> RtResult<Value> {
        Ok(match &frame.code.consts[i as usize] {
            RtConst::Number(n) => Value::Number(*n),
            RtConst::String(s) => Value::Str(Rc::clone(s)),
            RtConst::BigInt(digits) => match members::parse_bigint_literal(digits) {
                Some(b) => Value::BigInt(Rc::new(b)),
                None => {
                    return Err(make_error(
                        "SyntaxError",
                        format!("Invalid BigInt literal '{digits}'"),
                    ));
                }
            },
            RtConst::Regex { pattern, flags } => builtins::compile_regex(pattern, flags)?,
            RtConst::Function(_) | RtConst::Class(_) => {
                return Err(throw_type_error("corrupt module: constant is not a value"));
            }
        })
    }

    async fn get_member(&self, object: &Value, name: &str) -> RtResult<Value> {
        match members::get_property(object, name)? {
            Property::Value(value) => Ok(value),
            Property::Getter(getter) => self.invoke(&getter, object.clone(), Vec::new()).await,
            Property::Missing => Ok(Value::Undefined),
        }
    }

    async fn set_member(&self, object: &Value, name: &str, value: Value, strict: bool) -> RtResult<()> {
        match members::set_property(object, name, value.clone(), strict)? {
            SetOutcome::Done => Ok(()),
            SetOutcome::Setter(setter) => {
                self.invoke(&setter, object.clone(), vec![value]).await?;
                Ok(())
            }
        }
    }

    fn super_of(&self, frame: &Frame) -> RtResult<Rc<ClassValue>> {
        frame
            .home_class
            .as_ref()
            .and_then(|c| c.superclass.clone())
            .ok_or_else(|| throw_type_error("'super' used outside a subclass"))
    }

    fn spread_args(&self, frame: &mut Frame) -> RtResult<Vec<Value>> {
        match frame.pop() {
            Value::Array(items) => Ok(items.borrow().clone()),
            _ => Err(throw_type_error("spread arguments must be an array")),
        }
    }

    async fn iterable_to_values(&self, iterable: &Value) -> RtResult<Vec<Value>> {
        if let Some(values) = facade::array_from_iterable(iterable)? {
            return Ok(values);
        }
        // Custom iterators and generators drain through the protocol.
        let iterator = match members::iter_source(iterable, false)? {
            IterSource::Values(values) => return Ok(values),
            IterSource::Generator(generator) => Value::Generator(generator),
            IterSource::Factory(factory) => {
                self.invoke(&factory, iterable.clone(), Vec::new()).await?
            }
            IterSource::IteratorObject(object) => object,
        };
        let mut out = Vec::new();
        loop {
            let next = self.get_member(&iterator, "next").await?;
            let result = self.invoke(&next, iterator.clone(), Vec::new()).await?;
            let (value, done) = facade::read_iterator_result(&result)?;
            if done {
                return Ok(out);
            }
            out.push(value);
        }
    }

    async fn dispose(&self, resource: &Value) -> RtResult<()> {
        let dispose = members::get_symbol_property(resource, members::well_known::DISPOSE);
        let dispose = match dispose {
            Some(d) => d,
            None => match resource {
                Value::Instance(inst) => inst.class.find_method("dispose").ok_or_else(|| {
                    throw_type_error("Object does not implement Symbol.dispose")
                })?,
                _ => return Err(throw_type_error("Object does not implement Symbol.dispose")),
            },
        };
        self.invoke(&dispose, resource.clone(), Vec::new()).await?;
        Ok(())
    }
}

enum StepOutcome {
    Continue,
    Return(Value),
}

/// Owned copy of a function value for `'static` coroutine bodies. The
/// handles inside are shared, so this is a shallow clone.
fn clone_vm_function(function: &VmFunction) -> VmFunction {
    VmFunction {
        proto: Rc::clone(&function.proto),
        captures: function.captures.clone(),
        captured_this: function.captured_this.clone(),
        home_class: RefCell::new(function.home_class.borrow().clone()),
    }
}

/// Runtime diagnostics carry the source line of the failing instruction.
fn attach_line(error: Value, line: u32) -> Value {
    if let Value::Object(obj) = &error {
        let mut props = obj.props.borrow_mut();
        if props.contains_key("name") && !props.contains_key("line") {
            props.insert("line".to_string(), Value::Number(line as f64));
        }
    }
    error
}
