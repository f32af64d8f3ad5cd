//! vm.rs — La machine virtuelle Saumon : boucle de dispatch, frames
//! d’appel, upvalues, classes, et orchestration du GC.
//!
//! Une seule boucle lit `ip` et branche sur l’opcode. Les registres chauds
//! (`ip`, indices de frame) vivent dans des locales et ne sont réécrits
//! dans la frame qu’autour des transferts de contrôle (appel, retour,
//! erreur). Les regards de pile passent par `stack[top − 1 − distance]`.
//!
//! Convention d’appel : `CALL argc` attend l’appelé en
//! `stack[top − argc − 1]` ; une fermeture pousse une frame dont le slot 0
//! est l’appelé lui-même (receveur des méthodes). Une native reçoit la
//! fenêtre d’arguments, son résultat remplace appelé + arguments.
//!
//! Toute allocation est un point de collection potentiel : un objet frais
//! non encore joignable depuis une racine est poussé sur la pile AVANT la
//! prochaine allocation (concaténation, fermetures, instances, méthodes
//! liées, définition de natives).
//!
//! Une erreur runtime imprime son message puis la remontée de pile
//! (`[line N] in nom()` / `in script`), réinitialise la pile de valeurs et
//! rend `InterpretError::Runtime`. Rien n’est jamais rattrapé.

use log::debug;
use once_cell::sync::Lazy;
use std::time::Instant;
use thiserror::Error;

use crate::compiler::compile;
use crate::heap::Heap;
use crate::object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjKind, ObjNative, ObjRef,
    ObjUpvalue, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

/// Profondeur d’appel maximale ; au-delà : `Stack overflow.`
const FRAMES_MAX: usize = 64;

/// Issue d’une interprétation ratée (diagnostics déjà sur stderr).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    #[error("compile error")]
    Compile,
    #[error("runtime error")]
    Runtime,
}

/// Options de la VM — la capture de stdout sert aux tests et au REPL
/// embarqué, à la manière d’un évaluateur à buffer.
#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    pub capture_stdout: bool,
}

/// Enregistrement par invocation : fermeture, pointeur d’instruction dans
/// le chunk de sa fonction, base de la fenêtre de slots.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    closure: ObjRef,
    ip: usize,
    base: usize,
}

pub struct Vm {
    heap: Heap,
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    /// Tête de la liste des upvalues OUVERTS, triée par slot décroissant.
    open_upvalues: Option<ObjRef>,
    /// "init" interné une fois pour toutes (recherche d’initialiseur).
    init_string: ObjRef,
    options: VmOptions,
    captured: String,
}

/// Époque du `clock()` natif : premier accès.
static CLOCK_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn clock_native(_args: &[Value]) -> Value {
    Value::number(CLOCK_EPOCH.elapsed().as_secs_f64())
}

/// Erreur runtime : resynchronise l’ip de la frame courante, imprime,
/// déroule — puis sort de `run` avec `Runtime`.
macro_rules! vm_bail {
    ($self:ident, $frame_idx:expr, $ip:expr, $($arg:tt)*) => {{
        $self.frames[$frame_idx].ip = $ip;
        return Err($self.runtime_error(&format!($($arg)*)));
    }};
}

/// Opération binaire numérique : regarde avant de dépiler (les opérandes
/// restent des racines jusqu’au bout).
macro_rules! binary_op {
    ($self:ident, $frame_idx:expr, $ip:expr, $wrap:expr, $op:tt) => {{
        match ($self.peek(1).as_number(), $self.peek(0).as_number()) {
            (Some(a), Some(b)) => {
                $self.pop();
                $self.pop();
                $self.push($wrap(a $op b));
            }
            _ => vm_bail!($self, $frame_idx, $ip, "Operands must be numbers."),
        }
    }};
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.copy_string("init");
        let mut vm = Self {
            heap,
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(256),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            options,
            captured: String::new(),
        };
        vm.define_native("clock", clock_native);
        vm
    }

    /// Compile puis exécute `source` dans cet état (globales persistantes).
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.heap).map_err(|_| InterpretError::Compile)?;

        self.push(Value::obj(function));
        let closure = self.alloc(Obj::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.pop();
        self.push(Value::obj(closure));
        self.call(closure, 0)?;

        self.run()
    }

    /// Sortie capturée depuis le dernier appel (si `capture_stdout`).
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.captured)
    }

    /* ───────────────────────── Pile ───────────────────────── */

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(v) => v,
            None => unreachable!("pile de valeurs vide"),
        }
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    /* ───────────────────────── Erreurs & natives ───────────────────────── */

    /// Message puis remontée, de la frame la plus récente à la plus vieille.
    fn runtime_error(&mut self, message: &str) -> InterpretError {
        eprintln!("{message}");
        for frame in self.frames.iter().rev() {
            let function = self.heap.closure(frame.closure).function;
            let function = self.heap.function(function);
            let line = function.chunk.lines.line_of(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => {
                    eprintln!("[line {line}] in {}()", self.heap.string(name).chars);
                }
                None => eprintln!("[line {line}] in script"),
            }
        }
        self.reset_stack();
        InterpretError::Runtime
    }

    fn define_native(&mut self, name: &str, function: crate::object::NativeFn) {
        let name = self.heap.copy_string(name);
        self.push(Value::obj(name));
        let native = self.alloc(Obj::Native(ObjNative { function }));
        self.push(Value::obj(native));
        let hash = self.heap.string_hash(name);
        self.globals.set(name, hash, Value::obj(native));
        self.pop();
        self.pop();
    }

    /* ───────────────────────── Allocation & GC ───────────────────────── */

    /// Point d’allocation de la VM : collecte éventuelle PUIS allocation —
    /// l’objet naissant ne peut pas être balayé.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    fn intern_owned(&mut self, chars: String) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.take_string(chars)
    }

    /// Un cycle complet : racines → traçage → élagage des internements →
    /// balayage.
    fn collect_garbage(&mut self) {
        debug!("gc: cycle ({} octets vivants)", self.heap.bytes_allocated());

        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.heap.mark_value(value);
        }
        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.heap.mark_object(closure);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(u) = upvalue {
            self.heap.mark_object(u);
            upvalue = self.heap.upvalue(u).next;
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.prune_interned();
        self.heap.sweep();
    }

    /* ───────────────────────── Appels ───────────────────────── */

    fn call(&mut self, closure: ObjRef, argc: usize) -> Result<(), InterpretError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            return Err(
                self.runtime_error(&format!("Expected {arity} arguments but got {argc}."))
            );
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame { closure, ip: 0, base: self.stack.len() - argc - 1 });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), InterpretError> {
        let Some(r) = callee.as_obj() else {
            return Err(self.runtime_error("Can only call functions and classes."));
        };
        match self.heap.get(r).kind() {
            ObjKind::BoundMethod => {
                let (receiver, method) = {
                    let bound = self.heap.bound_method(r);
                    (bound.receiver, bound.method)
                };
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = receiver;
                self.call(method, argc)
            }
            ObjKind::Class => {
                // la classe reste en slot appelé : racine pendant l’allocation
                let instance =
                    self.alloc(Obj::Instance(ObjInstance { class: r, fields: Table::new() }));
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = Value::obj(instance);

                let init_hash = self.heap.string_hash(self.init_string);
                let initializer = self.heap.class(r).methods.get(self.init_string, init_hash);
                if let Some(init) = initializer {
                    let Some(init) = init.as_obj() else {
                        unreachable!("initialiseur non-objet");
                    };
                    self.call(init, argc)
                } else if argc != 0 {
                    Err(self.runtime_error(&format!("Expected 0 arguments but got {argc}.")))
                } else {
                    Ok(())
                }
            }
            ObjKind::Closure => self.call(r, argc),
            ObjKind::Native => {
                let function = self.heap.native(r).function;
                let top = self.stack.len();
                let result = function(&self.stack[top - argc..]);
                self.stack.truncate(top - argc - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    /// Accès + appel fusionnés : un champ prime sur une méthode.
    fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<(), InterpretError> {
        let receiver = self.peek(argc);
        let Some(instance) = self.obj_of_kind(receiver, ObjKind::Instance) else {
            return Err(self.runtime_error("Only instances have methods."));
        };

        let hash = self.heap.string_hash(name);
        let field = self.heap.instance(instance).fields.get(name, hash);
        if let Some(value) = field {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = value;
            return self.call_value(value, argc);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        argc: usize,
    ) -> Result<(), InterpretError> {
        let hash = self.heap.string_hash(name);
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            let name = self.heap.string(name).chars.to_string();
            return Err(self.runtime_error(&format!("Undefined property '{name}'.")));
        };
        let Some(method) = method.as_obj() else {
            unreachable!("méthode non-objet");
        };
        self.call(method, argc)
    }

    /// Lie `class.name` au receveur en sommet de pile.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), InterpretError> {
        let hash = self.heap.string_hash(name);
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            let name = self.heap.string(name).chars.to_string();
            return Err(self.runtime_error(&format!("Undefined property '{name}'.")));
        };
        let Some(method) = method.as_obj() else {
            unreachable!("méthode non-objet");
        };
        let bound =
            self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver: self.peek(0), method }));
        self.pop();
        self.push(Value::obj(bound));
        Ok(())
    }

    /* ───────────────────────── Upvalues ───────────────────────── */

    /// Cherche un upvalue ouvert pour `slot` dans la liste (triée par slot
    /// décroissant) ; sinon en insère un frais en préservant le tri.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut prev: Option<ObjRef> = None;
        let mut current = self.open_upvalues;
        while let Some(u) = current {
            let UpvalueState::Open(s) = self.heap.upvalue(u).state else {
                unreachable!("upvalue fermé dans la liste ouverte");
            };
            if s <= slot {
                if s == slot {
                    return u;
                }
                break;
            }
            prev = Some(u);
            current = self.heap.upvalue(u).next;
        }

        let created =
            self.alloc(Obj::Upvalue(ObjUpvalue { state: UpvalueState::Open(slot), next: current }));
        match prev {
            None => self.open_upvalues = Some(created),
            Some(p) => self.heap.upvalue_mut(p).next = Some(created),
        }
        created
    }

    /// Ferme tout upvalue ouvert pointant un slot ≥ `last` : copie la valeur
    /// dans l’upvalue, redirige sa localisation, le déchaîne.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(u) = self.open_upvalues {
            let UpvalueState::Open(slot) = self.heap.upvalue(u).state else {
                unreachable!("upvalue fermé dans la liste ouverte");
            };
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            let next = self.heap.upvalue(u).next;
            let upvalue = self.heap.upvalue_mut(u);
            upvalue.state = UpvalueState::Closed(value);
            upvalue.next = None;
            self.open_upvalues = next;
        }
    }

    /* ───────────────────────── Aides ───────────────────────── */

    fn obj_of_kind(&self, value: Value, kind: ObjKind) -> Option<ObjRef> {
        value.as_obj().filter(|r| self.heap.get(*r).kind() == kind)
    }

    fn write_out(&mut self, text: &str) {
        if self.options.capture_stdout {
            self.captured.push_str(text);
            self.captured.push('\n');
        } else {
            println!("{text}");
        }
    }

    #[inline]
    fn read_byte(&self, function: ObjRef, ip: &mut usize) -> u8 {
        let byte = self.heap.function(function).chunk.code[*ip];
        *ip += 1;
        byte
    }

    #[inline]
    fn read_u16(&self, function: ObjRef, ip: &mut usize) -> u16 {
        let value = self.heap.function(function).chunk.read_u16(*ip);
        *ip += 2;
        value
    }

    #[inline]
    fn read_constant(&self, function: ObjRef, index: usize) -> Value {
        self.heap.function(function).chunk.constants[index]
    }

    /// Constante nom : toujours une chaîne internée.
    #[inline]
    fn read_string_constant(&self, function: ObjRef, index: usize) -> ObjRef {
        match self.read_constant(function, index).as_obj() {
            Some(r) => r,
            None => unreachable!("constante de nom non-objet"),
        }
    }

    /* ───────────────────────── Boucle de dispatch ───────────────────────── */

    #[allow(clippy::too_many_lines)]
    fn run(&mut self) -> Result<(), InterpretError> {
        use crate::bytecode::op::OpCode;

        // registres chauds, réécrits dans la frame autour des transferts
        let mut frame_idx = self.frames.len() - 1;
        let mut closure = self.frames[frame_idx].closure;
        let mut function = self.heap.closure(closure).function;
        let mut base = self.frames[frame_idx].base;
        let mut ip = self.frames[frame_idx].ip;

        macro_rules! reload_frame {
            () => {{
                frame_idx = self.frames.len() - 1;
                closure = self.frames[frame_idx].closure;
                function = self.heap.closure(closure).function;
                base = self.frames[frame_idx].base;
                ip = self.frames[frame_idx].ip;
            }};
        }

        loop {
            #[cfg(feature = "trace-exec")]
            {
                let mut repr = String::from("          ");
                for value in &self.stack {
                    repr.push_str(&format!("[ {} ]", self.heap.stringify(*value)));
                }
                let (text, _) = crate::bytecode::disasm::disassemble_instruction(
                    &self.heap,
                    &self.heap.function(function).chunk,
                    ip,
                );
                log::trace!("{repr}\n{text}");
            }

            let byte = self.read_byte(function, &mut ip);
            let Some(op) = OpCode::from_byte(byte) else {
                vm_bail!(self, frame_idx, ip, "Unknown opcode {byte}.");
            };

            match op {
                OpCode::Constant => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let value = self.read_constant(function, index);
                    self.push(value);
                }
                OpCode::ConstantLong => {
                    let index = self.heap.function(function).chunk.read_u24(ip);
                    ip += 3;
                    let value = self.read_constant(function, index);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::NIL),
                OpCode::True => self.push(Value::TRUE),
                OpCode::False => self.push(Value::FALSE),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte(function, &mut ip) as usize;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte(function, &mut ip) as usize;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetGlobal => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let hash = self.heap.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let name = self.heap.string(name).chars.to_string();
                            vm_bail!(self, frame_idx, ip, "Undefined variable '{name}'.");
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let hash = self.heap.string_hash(name);
                    if self.globals.set(name, hash, self.peek(0)) {
                        // la clé n’existait pas : annule et proteste
                        self.globals.delete(name, hash);
                        let name = self.heap.string(name).chars.to_string();
                        vm_bail!(self, frame_idx, ip, "Undefined variable '{name}'.");
                    }
                }

                OpCode::GetUpvalue => {
                    let slot = self.read_byte(function, &mut ip) as usize;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(stack_slot) => self.stack[stack_slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte(function, &mut ip) as usize;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(stack_slot) => self.stack[stack_slot] = value,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }

                OpCode::GetProperty => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let Some(instance) = self.obj_of_kind(self.peek(0), ObjKind::Instance)
                    else {
                        vm_bail!(self, frame_idx, ip, "Only instances have properties.");
                    };
                    let hash = self.heap.string_hash(name);
                    let field = self.heap.instance(instance).fields.get(name, hash);
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.frames[frame_idx].ip = ip;
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let Some(instance) = self.obj_of_kind(self.peek(1), ObjKind::Instance)
                    else {
                        vm_bail!(self, frame_idx, ip, "Only instances have fields.");
                    };
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let superclass = self.pop();
                    let Some(superclass) = superclass.as_obj() else {
                        unreachable!("superclasse non-objet");
                    };
                    self.frames[frame_idx].ip = ip;
                    self.bind_method(superclass, name)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::bool(a == b));
                }
                OpCode::Greater => binary_op!(self, frame_idx, ip, Value::bool, >),
                OpCode::Less => binary_op!(self, frame_idx, ip, Value::bool, <),

                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    let a_str = self.obj_of_kind(a, ObjKind::Str);
                    let b_str = self.obj_of_kind(b, ObjKind::Str);
                    if let (Some(a), Some(b)) = (a_str, b_str) {
                        let mut chars = self.heap.string(a).chars.to_string();
                        chars.push_str(&self.heap.string(b).chars);
                        // opérandes encore sur la pile pendant l’allocation
                        let result = self.intern_owned(chars);
                        self.pop();
                        self.pop();
                        self.push(Value::obj(result));
                    } else if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
                        self.pop();
                        self.pop();
                        self.push(Value::number(a + b));
                    } else {
                        vm_bail!(
                            self,
                            frame_idx,
                            ip,
                            "Operands must be two numbers or two strings."
                        );
                    }
                }
                OpCode::Subtract => binary_op!(self, frame_idx, ip, Value::number, -),
                OpCode::Multiply => binary_op!(self, frame_idx, ip, Value::number, *),
                OpCode::Divide => binary_op!(self, frame_idx, ip, Value::number, /),

                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let Some(n) = self.peek(0).as_number() else {
                        vm_bail!(self, frame_idx, ip, "Operand must be a number.");
                    };
                    self.pop();
                    self.push(Value::number(-n));
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.heap.stringify(value);
                    self.write_out(&text);
                }

                OpCode::Jump => {
                    let offset = self.read_u16(function, &mut ip) as usize;
                    ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16(function, &mut ip) as usize;
                    if self.peek(0).is_falsey() {
                        ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16(function, &mut ip) as usize;
                    ip -= offset;
                }

                OpCode::Call => {
                    let argc = self.read_byte(function, &mut ip) as usize;
                    self.frames[frame_idx].ip = ip;
                    self.call_value(self.peek(argc), argc)?;
                    reload_frame!();
                }
                OpCode::Invoke => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let argc = self.read_byte(function, &mut ip) as usize;
                    self.frames[frame_idx].ip = ip;
                    self.invoke(name, argc)?;
                    reload_frame!();
                }
                OpCode::SuperInvoke => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let argc = self.read_byte(function, &mut ip) as usize;
                    let superclass = self.pop();
                    let Some(superclass) = superclass.as_obj() else {
                        unreachable!("superclasse non-objet");
                    };
                    self.frames[frame_idx].ip = ip;
                    self.invoke_from_class(superclass, name, argc)?;
                    reload_frame!();
                }

                OpCode::Closure => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let Some(inner) = self.read_constant(function, index).as_obj() else {
                        unreachable!("constante de fonction non-objet");
                    };
                    let upvalue_count = self.heap.function(inner).upvalue_count;
                    let new_closure = self.alloc(Obj::Closure(ObjClosure {
                        function: inner,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    // racine immédiate : les captures vont encore allouer
                    self.push(Value::obj(new_closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte(function, &mut ip);
                        let idx = self.read_byte(function, &mut ip) as usize;
                        let captured = if is_local == 1 {
                            self.capture_upvalue(base + idx)
                        } else {
                            self.heap.closure(closure).upvalues[idx]
                        };
                        self.heap.closure_mut(new_closure).upvalues.push(captured);
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        // fin du script : la pile doit se retrouver vide
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                    reload_frame!();
                }

                OpCode::Class => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let class =
                        self.alloc(Obj::Class(ObjClass { name, methods: Table::new() }));
                    self.push(Value::obj(class));
                }
                OpCode::Inherit => {
                    let Some(superclass) = self.obj_of_kind(self.peek(1), ObjKind::Class) else {
                        vm_bail!(self, frame_idx, ip, "Superclass must be a class.");
                    };
                    let Some(subclass) = self.peek(0).as_obj() else {
                        unreachable!("sous-classe non-objet");
                    };
                    // copie des méthodes parentes AVANT l’installation des
                    // méthodes propres (qui peuvent donc surcharger)
                    let methods = self.heap.class(superclass).methods.clone();
                    self.heap.class_mut(subclass).methods.add_all(&methods);
                    self.pop();
                }
                OpCode::Method => {
                    let index = self.read_byte(function, &mut ip) as usize;
                    let name = self.read_string_constant(function, index);
                    let method = self.peek(0);
                    let Some(class) = self.peek(1).as_obj() else {
                        unreachable!("définition de méthode sans classe");
                    };
                    let hash = self.heap.string_hash(name);
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/* ------------------------------- Tests ------------------------------- */
