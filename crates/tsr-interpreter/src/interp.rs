//! The interpreter core: engine plumbing, calls, classes, generators.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use tsr_parser::ast::{ClassDecl, ClassMember, FunctionDecl, Stmt, StmtKind};
use tsr_runtime::coroutine::{BodyCoroutine, GenChannel};
use tsr_runtime::error::{make_error, throw_type_error};
use tsr_runtime::value::*;
use tsr_runtime::{Engine, LocalBoxFuture, Output, RtResult, RuntimeEnv, Scheduler, Value};

use crate::completion::Completion;

/// Per-activation execution context.
#[derive(Clone, Default)]
pub struct Ctx {
    pub strict: bool,
    pub in_async: bool,
    /// Present inside generator bodies; `yield` suspends through it.
    pub gen_channel: Option<Rc<GenChannel>>,
    /// The class whose body lexically encloses the running code (`super`).
    pub home_class: Option<Rc<ClassValue>>,
}

struct InterpState {
    globals: RuntimeEnv,
    scheduler: Rc<Scheduler>,
    output: Rc<Output>,
    /// Module namespaces pre-loaded by the driver, keyed by import path.
    modules: RefCell<FxHashMap<String, Value>>,
}

/// The tree-walking interpreter. Cheap to clone; spawned tasks carry their
/// own handle.
#[derive(Clone)]
pub struct Interpreter {
    inner: Rc<InterpState>,
}

impl Engine for Interpreter {
    fn call_value(
        &self,
        callee: Value,
        this: Value,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'static, RtResult<Value>> {
        let interp = self.clone();
        Box::pin(async move { interp.invoke(&callee, this, args, &Ctx::default()).await })
    }

    fn scheduler(&self) -> Rc<Scheduler> {
        Rc::clone(&self.inner.scheduler)
    }

    fn output(&self) -> Rc<Output> {
        Rc::clone(&self.inner.output)
    }
}

impl Interpreter {
    pub fn new(output: Rc<Output>) -> Self {
        Interpreter {
            inner: Rc::new(InterpState {
                globals: RuntimeEnv::new(),
                scheduler: Scheduler::new(),
                output,
                modules: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    pub fn globals(&self) -> &RuntimeEnv {
        &self.inner.globals
    }

    /// Register a module namespace under its import path (driver API).
    pub fn define_module(&self, path: &str, namespace: Value) {
        self.inner.modules.borrow_mut().insert(path.to_string(), namespace);
    }

    pub(crate) fn module(&self, path: &str) -> Option<Value> {
        self.inner.modules.borrow().get(path).cloned()
    }

    /// Execute a program: top-level statements run as the first task on the
    /// loop, then the loop drains (timers, promise reactions, spawned
    /// async work). Returns the first uncaught throw.
    pub fn run_program(&self, program: Rc<Vec<Stmt>>) -> Result<(), Value> {
        let strict = program
            .iter()
            .any(|s| matches!(&s.kind, StmtKind::Directive(d) if d == "use strict"));
        tracing::debug!(statements = program.len(), strict, "interpreting program");
        let ctx = Ctx { strict, ..Ctx::default() };
        let error: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));

        let interp = self.clone();
        let error_slot = Rc::clone(&error);
        let env = self.inner.globals.clone();
        self.inner.scheduler.spawn(Box::pin(async move {
            let completion = interp.exec_stmts(&program, &env, &ctx).await;
            match completion {
                Completion::Throw(value) => {
                    *error_slot.borrow_mut() = Some(value);
                }
                Completion::Normal | Completion::Return(_) => {}
                Completion::Break(_) | Completion::Continue(_) => {
                    *error_slot.borrow_mut() =
                        Some(make_error("SyntaxError", "Illegal break or continue"));
                }
            }
        }));
        self.inner.scheduler.run(self);

        for rejection in self.inner.scheduler.unhandled_rejections() {
            self.inner.output.write_err(&format!(
                "Unhandled promise rejection: {}",
                tsr_runtime::ops::to_display_string(&rejection)
            ));
        }
        let error = error.borrow_mut().take();
        match error {
            Some(value) => Err(value),
            None => Ok(()),
        }
    }

    /// Evaluate a module body and build its namespace object from its
    /// `export` declarations.
    pub fn run_module(&self, program: Rc<Vec<Stmt>>) -> Result<Value, Value> {
        let strict = program
            .iter()
            .any(|s| matches!(&s.kind, StmtKind::Directive(d) if d == "use strict"));
        let ctx = Ctx { strict, ..Ctx::default() };
        let env = self.inner.globals.child();
        let error: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));

        let interp = self.clone();
        let error_slot = Rc::clone(&error);
        let env_for_task = env.clone();
        let program_for_task = Rc::clone(&program);
        self.inner.scheduler.spawn(Box::pin(async move {
            let completion = interp.exec_stmts(&program_for_task, &env_for_task, &ctx).await;
            if let Completion::Throw(value) = completion {
                *error_slot.borrow_mut() = Some(value);
            }
        }));
        self.inner.scheduler.run(self);
        let error = error.borrow_mut().take();
        if let Some(value) = error {
            return Err(value);
        }

        let mut exports = IndexMap::new();
        for stmt in program.iter() {
            let StmtKind::Export(inner) = &stmt.kind else { continue };
            for name in declared_names(inner) {
                if let Some(value) = env.lookup(&name) {
                    exports.insert(name, value);
                }
            }
        }
        Ok(Value::object(exports))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Invoke any callable value.
    pub(crate) fn invoke<'a>(
        &'a self,
        callee: &'a Value,
        this: Value,
        args: Vec<Value>,
        ctx: &'a Ctx,
    ) -> LocalBoxFuture<'a, RtResult<Value>> {
        Box::pin(async move {
            match callee {
                Value::Function(func) => self.call_function(func, this, args).await,
                Value::Bound(bound) => {
                    let receiver = bound.receiver.clone();
                    self.invoke(&bound.func.clone(), receiver, args, ctx).await
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
                    tsr_runtime::ops::to_display_string(other)
                ))),
            }
        })
    }

    /// Call a user function: dispatch to the plain, async, generator or
    /// async-generator paths.
    pub(crate) async fn call_function(
        &self,
        func: &Rc<FunctionValue>,
        this: Value,
        args: Vec<Value>,
    ) -> RtResult<Value> {
        let decl = Rc::clone(&func.decl);
        if decl.body.is_none() {
            // Overload signatures carry no runtime behavior.
            return Ok(Value::Undefined);
        }

        if decl.is_generator {
            return Ok(self.make_generator(func, this, args));
        }
        if decl.is_async {
            // Async functions always return a promise. The body runs
            // synchronously up to its first suspension point; the remainder
            // is driven by the loop.
            let promise = PromiseData::new();
            let interp = self.clone();
            let func = Rc::clone(func);
            let mut future: LocalBoxFuture<'static, RtResult<Value>> =
                Box::pin(async move { interp.run_function_body(&func, this, args, None).await });
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
        self.run_function_body(func, this, args, None).await
    }

    /// Bind parameters and execute the body; maps the completion to the
    /// call's value.
    pub(crate) async fn run_function_body(
        &self,
        func: &Rc<FunctionValue>,
        this: Value,
        args: Vec<Value>,
        gen_channel: Option<Rc<GenChannel>>,
    ) -> RtResult<Value> {
        let decl = Rc::clone(&func.decl);
        let body = decl.body.as_ref().expect("callable body");
        let call_env = func.env.child();
        let ctx = Ctx {
            strict: decl.is_strict,
            in_async: decl.is_async,
            gen_channel,
            home_class: func.home_class.borrow().clone(),
        };

        if !decl.is_arrow {
            call_env.define("this", this);
        }
        self.bind_params(&decl, &args, &call_env, &ctx).await?;

        match self.exec_stmts(body, &call_env, &ctx).await {
            Completion::Normal => Ok(Value::Undefined),
            Completion::Return(value) => Ok(value),
            Completion::Throw(error) => Err(error),
            Completion::Break(_) | Completion::Continue(_) => {
                Err(make_error("SyntaxError", "Illegal break or continue"))
            }
        }
    }

    /// Assign arguments to parameters in the call scope: defaults when
    /// absent, trailing arguments collected into a rest array.
    async fn bind_params(
        &self,
        decl: &Rc<FunctionDecl>,
        args: &[Value],
        call_env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> RtResult<()> {
        let required = decl
            .params
            .iter()
            .filter(|p| !p.optional && p.default.is_none() && !p.is_rest)
            .count();
        if args.len() < required {
            return Err(throw_type_error(format!(
                "{} requires at least {required} argument(s), got {}",
                decl.name.as_deref().unwrap_or("function"),
                args.len()
            )));
        }
        for (i, param) in decl.params.iter().enumerate() {
            if param.is_rest {
                let rest: Vec<Value> = args.get(i..).map(|s| s.to_vec()).unwrap_or_default();
                call_env.define(&param.name, Value::array(rest));
                break;
            }
            let value = match args.get(i) {
                Some(Value::Undefined) | None => match &param.default {
                    Some(default) => self.eval_expr(default, call_env, ctx).await?,
                    None => Value::Undefined,
                },
                Some(v) => v.clone(),
            };
            call_env.define(&param.name, value);
        }
        Ok(())
    }

    // =========================================================================
    // Generators
    // =========================================================================

    /// Build a generator object whose coroutine drives the function body.
    fn make_generator(&self, func: &Rc<FunctionValue>, this: Value, args: Vec<Value>) -> Value {
        let channel = Rc::new(GenChannel::default());
        let interp = self.clone();
        let func = Rc::clone(func);
        let channel_for_body = Rc::clone(&channel);
        let is_async = func.decl.is_async;
        let body: LocalBoxFuture<'static, RtResult<Value>> = Box::pin(async move {
            interp
                .run_function_body(&func, this, args, Some(channel_for_body))
                .await
        });
        Value::Generator(Rc::new(GeneratorObject {
            co: Rc::new(BodyCoroutine::new(body, channel)),
            is_async,
            done: Cell::new(false),
        }))
    }

    // =========================================================================
    // Classes
    // =========================================================================

    /// Build the runtime class value for a declaration.
    pub(crate) async fn define_class(
        &self,
        decl: &Rc<ClassDecl>,
        env: &RuntimeEnv,
        ctx: &Ctx,
    ) -> RtResult<Value> {
        let superclass = match &decl.superclass {
            Some(expr) => match self.eval_expr(expr, env, ctx).await? {
                Value::Class(parent) => Some(parent),
                other => {
                    return Err(throw_type_error(format!(
                        "Class extends value {} is not a constructor",
                        tsr_runtime::ops::to_display_string(&other)
                    )));
                }
            },
            None => None,
        };

        let make_fn = |f: &Rc<FunctionDecl>| -> Value {
            Value::Function(Rc::new(FunctionValue {
                decl: Rc::clone(f),
                env: env.clone(),
                home_class: RefCell::new(None),
            }))
        };

        let mut methods = IndexMap::new();
        let mut getters = IndexMap::new();
        let mut setters = IndexMap::new();
        let mut static_methods = IndexMap::new();
        let mut static_getters = IndexMap::new();
        let mut constructor = None;
        for member in &decl.members {
            match member {
                ClassMember::Method { func, is_static, .. } => {
                    if func.body.is_none() {
                        continue; // overload signature
                    }
                    let value = make_fn(func);
                    match func.name.as_deref() {
                        Some("constructor") => constructor = Some(value),
                        Some(name) if *is_static => {
                            static_methods.insert(name.to_string(), value);
                        }
                        Some(name) => {
                            methods.insert(name.to_string(), value);
                        }
                        None => {}
                    }
                }
                ClassMember::Getter { name, func, is_static } => {
                    let value = make_fn(func);
                    if *is_static {
                        static_getters.insert(name.clone(), value);
                    } else {
                        getters.insert(name.clone(), value);
                    }
                }
                ClassMember::Setter { name, func, is_static } => {
                    if !is_static {
                        setters.insert(name.clone(), make_fn(func));
                    }
                }
                ClassMember::Field { .. } | ClassMember::StaticBlock(_) => {}
            }
        }

        let class = Rc::new(ClassValue {
            name: decl.name.clone(),
            decl: Some(Rc::clone(decl)),
            superclass,
            methods,
            getters,
            setters,
            static_methods,
            static_getters,
            static_props: RefCell::new(IndexMap::new()),
            constructor,
            is_abstract: decl.is_abstract,
        });

        // Patch the home class into every method so `super` resolves.
        let patch = |value: &Value| {
            if let Value::Function(f) = value {
                *f.home_class.borrow_mut() = Some(Rc::clone(&class));
            }
        };
        class.methods.values().for_each(&patch);
        class.getters.values().for_each(&patch);
        class.setters.values().for_each(&patch);
        class.static_methods.values().for_each(&patch);
        class.static_getters.values().for_each(&patch);
        if let Some(ctor) = &class.constructor {
            patch(ctor);
        }

        let class_value = Value::Class(Rc::clone(&class));
        // The class binding is visible to its own static initializers and
        // methods.
        env.define(&decl.name, class_value.clone());

        // Static fields and static blocks run now, `this` bound to the
        // class.
        let static_ctx = Ctx { home_class: Some(Rc::clone(&class)), ..ctx.clone() };
        for member in &decl.members {
            match member {
                ClassMember::Field { name, init, is_static: true, .. } => {
                    let value = match init {
                        Some(init) => self.eval_expr(init, env, &static_ctx).await?,
                        None => Value::Undefined,
                    };
                    class.static_props.borrow_mut().insert(name.clone(), value);
                }
                ClassMember::StaticBlock(body) => {
                    let block_env = env.child();
                    block_env.define("this", class_value.clone());
                    if let Completion::Throw(error) =
                        self.exec_stmts(body, &block_env, &static_ctx).await
                    {
                        return Err(error);
                    }
                }
                _ => {}
            }
        }

        Ok(class_value)
    }

    /// `new C(...)`: allocate, run field initializers base-first, then the
    /// constructor.
    pub(crate) async fn construct(
        &self,
        class: &Rc<ClassValue>,
        args: Vec<Value>,
    ) -> RtResult<Value> {
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

        // Field initializers, base class first.
        let mut chain = Vec::new();
        let mut cursor = Some(Rc::clone(class));
        while let Some(c) = cursor {
            cursor = c.superclass.clone();
            chain.push(c);
        }
        for c in chain.iter().rev() {
            self.init_instance_fields(c, &instance).await?;
        }

        if let Some(ctor) = class.find_constructor() {
            if let Value::Function(func) = &ctor {
                self.run_function_body(func, instance.clone(), args, None).await?;
            }
        }
        Ok(instance)
    }

    async fn init_instance_fields(&self, class: &Rc<ClassValue>, instance: &Value) -> RtResult<()> {
        let Some(decl) = class.decl.clone() else {
            return Ok(());
        };
        let ctx = Ctx { home_class: Some(Rc::clone(class)), ..Ctx::default() };
        for member in &decl.members {
            let ClassMember::Field { name, init, is_static: false, .. } = member else {
                continue;
            };
            // Field initializers see `this` and the class's captured scope.
            let env = match &class.constructor {
                Some(Value::Function(f)) => f.env.child(),
                _ => match class.methods.values().find_map(|m| match m {
                    Value::Function(f) => Some(f.env.child()),
                    _ => None,
                }) {
                    Some(env) => env,
                    None => self.inner.globals.child(),
                },
            };
            env.define("this", instance.clone());
            let value = match init {
                Some(init) => self.eval_expr(init, &env, &ctx).await?,
                None => Value::Undefined,
            };
            if let Value::Instance(inst) = instance {
                inst.fields.borrow_mut().insert(name.clone(), value);
            }
        }
        Ok(())
    }

    /// Resolve `super.method` / `super(...)` targets.
    pub(crate) fn super_class(&self, ctx: &Ctx) -> RtResult<Rc<ClassValue>> {
        ctx.home_class
            .as_ref()
            .and_then(|c| c.superclass.clone())
            .ok_or_else(|| throw_type_error("'super' used outside a subclass"))
    }

    /// Dispose a resource registered by a `using` declaration: invoke its
    /// `Symbol.dispose` method with the resource as `this`.
    pub(crate) async fn dispose_resource(&self, resource: &Value) -> RtResult<()> {
        if resource.is_nullish() {
            return Ok(());
        }
        let dispose = tsr_runtime::members::get_symbol_property(
            resource,
            tsr_runtime::members::well_known::DISPOSE,
        );
        let dispose = match dispose {
            Some(d) => d,
            None => match resource {
                Value::Instance(inst) => match inst.class.find_method("dispose") {
                    Some(d) => d,
                    None => {
                        return Err(throw_type_error(
                            "Object does not implement Symbol.dispose",
                        ));
                    }
                },
                _ => {
                    return Err(throw_type_error("Object does not implement Symbol.dispose"));
                }
            },
        };
        self.invoke(&dispose, resource.clone(), Vec::new(), &Ctx::default())
            .await?;
        Ok(())
    }

    pub(crate) fn lookup_variable(&self, env: &RuntimeEnv, name: &str) -> Option<Value> {
        env.lookup(name)
            .or_else(|| tsr_runtime::builtins::global(name))
    }

    /// Drive a non-suspending future to completion (sync call paths).
    pub(crate) fn block_on_sync<F: Future<Output = RtResult<Value>>>(future: F) -> RtResult<Value> {
        let mut future = Box::pin(future);
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(throw_type_error("synchronous evaluation suspended")),
        }
    }
}

/// Names a declaration statement introduces (used to collect exports).
pub(crate) fn declared_names(stmt: &Stmt) -> Vec<String> {
    match &stmt.kind {
        StmtKind::Var { name, .. } | StmtKind::Const { name, .. } | StmtKind::Using { name, .. } => {
            vec![name.clone()]
        }
        StmtKind::Function(f) => f.name.clone().into_iter().collect(),
        StmtKind::Class(c) => vec![c.name.clone()],
        StmtKind::Enum(e) => vec![e.name.clone()],
        StmtKind::Namespace { name, .. } => vec![name.clone()],
        StmtKind::Sequence(stmts) => stmts.iter().flat_map(declared_names).collect(),
        _ => Vec::new(),
    }
}
