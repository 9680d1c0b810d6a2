use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use bytecode::{
    CALL_ARGC_MASK, CALL_KEEP_WRITEBACK, CALL_SELF_WRITEBACK, CodeSpace, GlobalVar, IMMEDIATE_FALSE,
    IMMEDIATE_OMEGA, IMMEDIATE_TRUE, LITERAL_UNIT, Op, Operand, OperandKind, PcodeRecord,
};
use library::{Library, UnitKind};
use object::{
    IterBody, IterKind, MailboxBody, ObjectBody, ProcBody, ProcKind, SetBody, Specifier, ValueError,
    ops,
};

use crate::abend::Abend;
use crate::callout::CalloutHost;
use crate::dump;
use crate::error::{LoadError, RuntimeError, RuntimeResult, VmError};
use crate::loader::{Image, SlotKind, runs_init};
use crate::native::NativeUnit;
use crate::primitives::{self, Flow};
use crate::scheduler::{Scheduler, unit_frame};

const MAX_FRAMES: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Opcodes a process runs before the scheduler switches.
    pub slice: u32,
    /// Value of `COMMAND_LINE`.
    pub command_line: Vec<String>,
    /// Disassemble every loaded unit before running.
    pub dump: bool,
    /// Count executed opcodes and report them at exit.
    pub profile: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            slice: 1000,
            command_line: Vec::new(),
            dump: false,
            profile: false,
        }
    }
}

#[derive(Debug)]
pub enum FrameKind {
    /// Called from pcode; the result goes to `target`.
    Call { target: Operand, flags: i32 },
    /// Called from Rust; the result is handed back to the host.
    Host,
    /// A process running a queued method call.
    Request { reply: Rc<MailboxBody> },
    /// Unit initialization or the program body.
    Init,
}

#[derive(Debug)]
pub struct Frame {
    pub unit: usize,
    pub space: CodeSpace,
    pub ip: usize,
    pub proc: Option<u32>,
    pub area_start: u32,
    pub locals: Vec<Specifier>,
    /// Locals of the enclosing procedure captured by a closure.
    pub env: Option<Vec<Specifier>>,
    pub self_val: Specifier,
    pub stack_base: usize,
    pub kind: FrameKind,
}

/// Where an operand lives.
#[derive(Debug, Clone, Copy)]
enum Place {
    Local { frame: usize, index: usize },
    Env { frame: usize, index: usize },
    Table { unit: usize, index: usize },
    Discard,
}

/// Runs loaded pcode.
///
/// Procedure locals live in frames; unit variables and literals live in
/// each unit's specifier table. A closure that outlives its parent reads
/// the parent's locals from the copy taken when the closure was built.
pub struct Interpreter {
    pub(crate) library: Library,
    pub(crate) options: InterpreterOptions,
    pub(crate) image: Image,
    pub(crate) globals: Vec<Specifier>,
    pub(crate) sched: Scheduler,
    pub(crate) out: Box<dyn Write>,
    pub(crate) natives: HashMap<String, Box<dyn NativeUnit>>,
    pub(crate) callout: Option<Box<dyn CalloutHost>>,
    pub(crate) next_atom: u64,
    pub(crate) abend_depth: u32,
    host_result: Option<(Specifier, Specifier)>,
    /// Record being executed, with the unit it belongs to.
    current_record: Option<(usize, PcodeRecord)>,
    profile: Vec<u64>,
    stopped: bool,
    /// Entries of `image.init_order` already initialized.
    initialized: usize,
}

impl Interpreter {
    pub fn new(library: Library, options: InterpreterOptions) -> Self {
        let command_line = Specifier::tuple_of(
            options
                .command_line
                .iter()
                .map(|arg| Specifier::from(arg.as_str()))
                .collect(),
        );
        let sched = Scheduler::new(options.slice);
        Self {
            library,
            options,
            image: Image::new(),
            globals: vec![command_line, Specifier::Omega],
            sched,
            out: Box::new(std::io::stdout()),
            natives: HashMap::new(),
            callout: None,
            next_atom: object::TRUE_ATOM + 1,
            abend_depth: 0,
            host_result: None,
            current_record: None,
            profile: vec![0; Op::COUNT],
            stopped: false,
            initialized: 0,
        }
    }

    /// Sends program output somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn into_library(self) -> Library {
        self.library
    }

    pub fn register_native(&mut self, unit: Box<dyn NativeUnit>) {
        let key = library::fold_name(unit.name());
        log::debug!("native package `{key}` registered");
        self.natives.insert(key, unit);
    }

    pub fn set_callout_host(&mut self, host: Box<dyn CalloutHost>) {
        self.callout = Some(host);
    }

    pub fn global(&self, index: GlobalVar) -> &Specifier {
        &self.globals[index.index() as usize]
    }

    /// Loads a program and every unit it depends on.
    pub fn load_program(&mut self, name: &str) -> Result<usize, LoadError> {
        let index = self.image.load(&self.library, name, None)?;
        if self.image.units[index].kind != Some(UnitKind::Program) {
            return Err(LoadError::NotAProgram(name.to_string()));
        }
        if let Some(missing) = self.image.native_units().find(|n| !self.natives.contains_key(*n)) {
            return Err(LoadError::MissingNative(missing.to_string()));
        }
        Ok(index)
    }

    /// Loads and runs program `name` to completion.
    pub fn run(&mut self, name: &str) -> Result<(), VmError> {
        let program = self.load_program(name)?;
        if self.options.dump {
            for unit in &self.image.units {
                self.out.write_all(dump::disassemble(unit).as_bytes())?;
            }
        }
        log::info!("running `{}` ({} units loaded)", name, self.image.units.len());
        self.stopped = false;
        self.sched.current = None;
        self.sched.main = Default::default();
        let result = self.initialize_units().and_then(|()| {
            if self.stopped {
                return Ok(());
            }
            self.sched.main.frames.push(unit_frame(program, CodeSpace::Body, 0));
            self.execute(0)
        });
        self.shutdown();
        self.out.flush()?;
        result.map_err(VmError::from)
    }

    fn initialize_units(&mut self) -> Result<(), Abend> {
        while let Some(&unit) = self.image.init_order.get(self.initialized) {
            self.initialized += 1;
            let loaded = &self.image.units[unit];
            if !runs_init(loaded.kind) || loaded.init.is_empty() {
                continue;
            }
            log::debug!("initializing `{}`", loaded.name);
            let depth = self.sched.ctx().frames.len();
            let base = self.sched.ctx().stack.len();
            self.sched.ctx_mut().frames.push(unit_frame(unit, CodeSpace::Init, base));
            self.sched.critical += 1;
            let result = self.execute(depth);
            self.sched.critical -= 1;
            result?;
            if self.stopped {
                break;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        let loaded: Vec<String> = self.image.native_units().map(str::to_string).collect();
        for name in loaded {
            if let Some(unit) = self.natives.get_mut(&name) {
                unit.finish();
                log::debug!("{name}__END");
            }
        }
        if self.options.profile {
            let report = dump::profile_report(&self.profile);
            if let Err(err) = self.out.write_all(report.as_bytes()) {
                log::warn!("profile report lost: {err}");
            }
        }
    }

    // ── the loop ───────────────────────────────────────────────────

    /// Runs until the current context's frame stack is back to `depth`.
    pub(crate) fn execute(&mut self, depth: usize) -> Result<(), Abend> {
        let home = self.sched.current;
        loop {
            if self.stopped {
                return Ok(());
            }
            if self.sched.current == home && self.sched.ctx().frames.len() <= depth {
                return Ok(());
            }
            if let Err(err) = self.dispatch() {
                self.handle_error(err)?;
            }
        }
    }

    fn dispatch(&mut self) -> RuntimeResult<()> {
        if self.sched.ctx().frames.is_empty() || self.sched.tick() {
            self.reap_current();
            self.switch_context()?;
        }
        let record = self.fetch()?;
        if self.options.profile {
            self.profile[record.op as usize] += 1;
        }
        self.step(record)
    }

    fn fetch(&mut self) -> RuntimeResult<PcodeRecord> {
        let frame = self.frame_mut()?;
        let (unit, space, ip) = (frame.unit, frame.space, frame.ip);
        frame.ip += 1;
        let code = match space {
            CodeSpace::Init => &self.image.units[unit].init,
            CodeSpace::Body => &self.image.units[unit].body,
        };
        let record = code
            .get(ip)
            .copied()
            .ok_or_else(|| RuntimeError::Abort("execution ran past the end of the code".into()))?;
        self.current_record = Some((unit, record));
        Ok(record)
    }

    fn step(&mut self, record: PcodeRecord) -> RuntimeResult<()> {
        let [a, b, c] = record.operands;
        match record.op {
            Op::Noop => {}
            Op::Push1 => {
                let v = self.read(a)?;
                self.push(v);
            }
            Op::Push2 => {
                let (x, y) = (self.read(a)?, self.read(b)?);
                self.push(x);
                self.push(y);
            }
            Op::Push3 => {
                let (x, y, z) = (self.read(a)?, self.read(b)?, self.read(c)?);
                self.push(x);
                self.push(y);
                self.push(z);
            }
            Op::Pop1 => {
                let v = self.pop("pop1")?;
                self.write(a, v)?;
            }
            Op::PopSelf => {
                let v = self.pop("popself")?;
                self.frame_mut()?.self_val = v;
            }
            Op::Assign => {
                let v = self.read(b)?;
                self.write(a, v)?;
            }
            Op::Add => self.binary(a, b, c, ops::add)?,
            Op::Sub => self.binary(a, b, c, ops::sub)?,
            Op::Mult => self.binary(a, b, c, ops::mult)?,
            Op::Div => self.binary(a, b, c, ops::div)?,
            Op::IntDiv => self.binary(a, b, c, ops::int_div)?,
            Op::Mod => self.binary(a, b, c, ops::modulo)?,
            Op::Exp => self.binary(a, b, c, ops::exp)?,
            Op::Max => self.binary(a, b, c, ops::max)?,
            Op::Min => self.binary(a, b, c, ops::min)?,
            Op::Eq => self.binary(a, b, c, |x, y| Ok(Specifier::boolean(x == y)))?,
            Op::Ne => self.binary(a, b, c, |x, y| Ok(Specifier::boolean(x != y)))?,
            Op::Lt => self.binary(a, b, c, |x, y| ops::lt(x, y).map(Specifier::boolean))?,
            Op::Le => self.binary(a, b, c, |x, y| ops::le(x, y).map(Specifier::boolean))?,
            Op::In => self.binary(a, b, c, |x, s| ops::contains(s, x).map(Specifier::boolean))?,
            Op::NotIn => {
                self.binary(a, b, c, |x, s| ops::contains(s, x).map(|r| Specifier::boolean(!r)))?
            }
            Op::Incs => self.binary(a, b, c, |s, x| ops::subset(x, s).map(Specifier::boolean))?,
            Op::Subset => self.binary(a, b, c, |x, s| ops::subset(x, s).map(Specifier::boolean))?,
            Op::With => self.binary(a, b, c, ops::with)?,
            Op::Less => self.binary(a, b, c, ops::less)?,
            Op::Lessf => self.binary(a, b, c, ops::lessf)?,
            Op::Of => self.binary(a, b, c, ops::of)?,
            Op::Ofa => self.binary(a, b, c, ops::ofa)?,
            Op::Uminus => self.unary(a, b, ops::uminus)?,
            Op::Not => self.unary(a, b, ops::not)?,
            Op::Card => self.unary(a, b, ops::card)?,
            Op::Arb => self.unary(a, b, ops::arb)?,
            Op::Domain => self.unary(a, b, ops::domain)?,
            Op::Range => self.unary(a, b, ops::range)?,
            Op::Pow => self.unary(a, b, ops::pow)?,
            Op::From => self.take_element(a, b, ops::take_arb)?,
            Op::Fromb => self.take_element(a, b, |s| ops::take_end(s, true))?,
            Op::Frome => self.take_element(a, b, |s| ops::take_end(s, false))?,
            Op::Set => {
                let items = self.pop_n(count(b)?)?;
                let mut set = SetBody::new();
                for item in items {
                    if item.is_omega() {
                        return Err(ValueError::Invalid("omega in a set former".into()).into());
                    }
                    set.insert(item);
                }
                self.write(a, Specifier::set(set))?;
            }
            Op::Tuple => {
                let items = self.pop_n(count(b)?)?;
                self.write(a, Specifier::tuple_of(items))?;
            }
            Op::SetRange | Op::TupleRange => {
                let last = self.pop("range")?;
                let second = self.pop("range")?;
                let first = self.pop("range")?;
                let items = ops::progression(&first, &second, &last)?;
                let value = if record.op == Op::SetRange {
                    Specifier::set(items.into_iter().collect())
                } else {
                    Specifier::tuple_of(items)
                };
                self.write(a, value)?;
            }
            Op::Slice => {
                let hi = self.pop("slice")?;
                let lo = self.pop("slice")?;
                let f = self.read(b)?;
                self.write(a, ops::slice(&f, &lo, &hi)?)?;
            }
            Op::Sof => {
                let (x, v) = (self.read(b)?, self.read(c)?);
                self.update(a, |_, f| ops::set_of(f, &x, v).map_err(RuntimeError::from))?;
            }
            Op::Sofa => {
                let (x, v) = (self.read(b)?, self.read(c)?);
                self.update(a, |_, f| ops::set_ofa(f, &x, &v).map_err(RuntimeError::from))?;
            }
            Op::Sslice => {
                let hi = self.pop("slice assignment")?;
                let lo = self.pop("slice assignment")?;
                let v = self.read(b)?;
                self.update(a, |_, f| ops::set_slice(f, &lo, &hi, &v).map_err(RuntimeError::from))?;
            }
            Op::IterStart => {
                let source = self.read(b)?;
                let kind = IterKind::try_from(c.offset).map_err(|raw| RuntimeError::BadOperand {
                    op: record.op,
                    reason: format!("iteration kind {raw}"),
                })?;
                let items = ops::iteration_items(&source, kind)?;
                self.write(a, Specifier::Iter(Rc::new(IterBody::new(items))))?;
            }
            Op::IterNext => match self.read(b)? {
                Specifier::Iter(iter) => match iter.step() {
                    Some(item) => self.write(a, item)?,
                    None => self.jump(c)?,
                },
                other => {
                    return Err(RuntimeError::BadOperand {
                        op: record.op,
                        reason: format!("{} is not an iterator", other.type_name()),
                    });
                }
            },
            Op::Go => self.jump(a)?,
            Op::GoTrue | Op::GoFalse => {
                let value = self.read(a)?;
                let truth = value.as_bool().ok_or(ValueError::UnaryType {
                    op: "condition",
                    form: value.type_name(),
                })?;
                if truth == (record.op == Op::GoTrue) {
                    self.jump(b)?;
                }
            }
            Op::GoOm => {
                if self.read(a)?.is_omega() {
                    self.jump(b)?;
                }
            }
            Op::Proc => {
                let closure = self.close_over(self.read(b)?)?;
                self.write(a, closure)?;
            }
            Op::Call => {
                let callee = self.read(b)?;
                self.call(a, callee, c.offset)?;
            }
            Op::Return => {
                let value = self.read(a)?;
                self.return_from(value)?;
            }
            Op::Stop => {
                log::debug!("stop");
                self.stopped = true;
            }
            Op::SelfVal => {
                let value = self.frame()?.self_val.clone();
                self.write(a, value)?;
            }
            Op::Slot => {
                let object = self.read(b)?;
                let value = self.slot_value(&object, slot_number(c))?;
                self.write(a, value)?;
            }
            Op::SSlot => {
                let value = self.read(c)?;
                let slot = slot_number(b);
                self.update(a, |this, object| this.set_slot(object, slot, value))?;
            }
            Op::SlotSelf => {
                let object = self.frame()?.self_val.clone();
                if object.is_omega() {
                    return Err(RuntimeError::NoSelf);
                }
                let value = self.slot_value(&object, slot_number(b))?;
                self.write(a, value)?;
            }
            Op::SSlotSelf => {
                let value = self.read(b)?;
                let mut object = std::mem::take(&mut self.frame_mut()?.self_val);
                let result = self.set_slot(&mut object, slot_number(a), value);
                self.frame_mut()?.self_val = object;
                result?;
            }
            Op::New => {
                let args = self.pop_n(count(c)?)?;
                let unit = unit_index(b).ok_or_else(|| RuntimeError::BadOperand {
                    op: record.op,
                    reason: "class operand is a literal".into(),
                })?;
                let class = self.image.units[unit].class.ok_or_else(|| RuntimeError::BadOperand {
                    op: record.op,
                    reason: format!("`{}` is not a class", self.image.units[unit].name),
                })?;
                let instance = self.instantiate(class, args)?;
                self.write(a, instance)?;
            }
            Op::Gvar => {
                let value = self.globals.get(count(b)?).cloned().unwrap_or_default();
                self.write(a, value)?;
            }
            Op::Sgvar => {
                let index = count(a)?;
                if index == GlobalVar::CommandLine.index() as usize {
                    return Err(RuntimeError::ReadOnly("COMMAND_LINE"));
                }
                let value = self.read(b)?;
                if index >= self.globals.len() {
                    self.globals.resize(index + 1, Specifier::Omega);
                }
                self.globals[index] = value;
            }
            Op::Abend => {
                let message = self.read(a)?.print_string();
                return Err(RuntimeError::Abort(message));
            }
        }
        Ok(())
    }

    // ── frames and the program stack ───────────────────────────────

    pub(crate) fn frame(&self) -> RuntimeResult<&Frame> {
        self.sched
            .ctx()
            .frames
            .last()
            .ok_or(RuntimeError::StackUnderflow("frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> RuntimeResult<&mut Frame> {
        self.sched
            .ctx_mut()
            .frames
            .last_mut()
            .ok_or(RuntimeError::StackUnderflow("frame"))
    }

    pub(crate) fn current_self(&self) -> Specifier {
        self.frame().map(|f| f.self_val.clone()).unwrap_or_default()
    }

    fn push(&mut self, value: Specifier) {
        self.sched.ctx_mut().stack.push(value);
    }

    fn pop(&mut self, what: &'static str) -> RuntimeResult<Specifier> {
        self.sched
            .ctx_mut()
            .stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow(what))
    }

    fn pop_n(&mut self, n: usize) -> RuntimeResult<Vec<Specifier>> {
        let stack = &mut self.sched.ctx_mut().stack;
        let at = stack
            .len()
            .checked_sub(n)
            .ok_or(RuntimeError::StackUnderflow("arguments"))?;
        Ok(stack.split_off(at))
    }

    fn jump(&mut self, label: Operand) -> RuntimeResult<()> {
        let (space, at) = label.decode_label();
        let frame = self.frame_mut()?;
        frame.space = space;
        frame.ip = at as usize;
        Ok(())
    }

    // ── operands ───────────────────────────────────────────────────

    fn place(&self, operand: Operand) -> RuntimeResult<Place> {
        let Some(unit) = unit_index(operand) else {
            return Ok(Place::Discard);
        };
        let index = usize::try_from(operand.offset).map_err(|_| RuntimeError::BadOperand {
            op: Op::Noop,
            reason: format!("negative offset {}", operand.offset),
        })?;
        let loaded = self
            .image
            .units
            .get(unit)
            .ok_or_else(|| RuntimeError::BadOperand {
                op: Op::Noop,
                reason: format!("unit {unit} is not loaded"),
            })?;
        let frames = &self.sched.ctx().frames;
        if let Some(top) = frames.len().checked_sub(1) {
            let frame = &frames[top];
            if frame.unit == unit {
                let local = index
                    .checked_sub(frame.area_start as usize)
                    .filter(|i| *i < frame.locals.len());
                if let Some(local) = local {
                    return Ok(Place::Local { frame: top, index: local });
                }
            }
            if let Some(owner) = loaded.area_owner(index) {
                let owner_frame =
                    frames.iter().rposition(|f| f.unit == unit && f.proc == Some(owner));
                if let Some(at) = owner_frame {
                    let start = frames[at].area_start as usize;
                    return Ok(Place::Local {
                        frame: at,
                        index: index - start,
                    });
                }
                let parent_of_top = frame
                    .proc
                    .and_then(|p| loaded.procs.get(p as usize))
                    .and_then(|p| p.parent);
                if frame.unit == unit && frame.env.is_some() && parent_of_top == Some(owner) {
                    let start = loaded.procs[owner as usize].area_start as usize;
                    return Ok(Place::Env {
                        frame: top,
                        index: index - start,
                    });
                }
            }
        }
        if index >= loaded.table.len() {
            return Err(RuntimeError::BadOperand {
                op: Op::Noop,
                reason: format!("offset {index} outside `{}`", loaded.name),
            });
        }
        Ok(Place::Table { unit, index })
    }

    fn slot_mut(&mut self, place: Place) -> Option<&mut Specifier> {
        match place {
            Place::Local { frame, index } => {
                self.sched.ctx_mut().frames.get_mut(frame)?.locals.get_mut(index)
            }
            Place::Env { frame, index } => self
                .sched
                .ctx_mut()
                .frames
                .get_mut(frame)?
                .env
                .as_mut()?
                .get_mut(index),
            Place::Table { unit, index } => self.image.units.get_mut(unit)?.table.get_mut(index),
            Place::Discard => None,
        }
    }

    pub(crate) fn read(&self, operand: Operand) -> RuntimeResult<Specifier> {
        if operand.unit_num == LITERAL_UNIT {
            return match operand.offset {
                IMMEDIATE_OMEGA => Ok(Specifier::Omega),
                IMMEDIATE_FALSE => Ok(Specifier::boolean(false)),
                IMMEDIATE_TRUE => Ok(Specifier::boolean(true)),
                other => Err(RuntimeError::BadOperand {
                    op: Op::Noop,
                    reason: format!("immediate {other}"),
                }),
            };
        }
        Ok(match self.place(operand)? {
            Place::Local { frame, index } => self.sched.ctx().frames[frame].locals[index].clone(),
            Place::Env { frame, index } => self.sched.ctx().frames[frame]
                .env
                .as_ref()
                .and_then(|env| env.get(index).cloned())
                .unwrap_or_default(),
            Place::Table { unit, index } => self.image.units[unit].table[index].clone(),
            Place::Discard => Specifier::Omega,
        })
    }

    pub(crate) fn write(&mut self, operand: Operand, value: Specifier) -> RuntimeResult<()> {
        let place = self.place(operand)?;
        if let Some(slot) = self.slot_mut(place) {
            *slot = value;
        }
        Ok(())
    }

    /// Modifies a target in place, storing it back even when `f` fails.
    fn update<F>(&mut self, operand: Operand, f: F) -> RuntimeResult<()>
    where
        F: FnOnce(&mut Self, &mut Specifier) -> RuntimeResult<()>,
    {
        let place = self.place(operand)?;
        let mut value = self.slot_mut(place).map(std::mem::take).unwrap_or_default();
        let result = f(self, &mut value);
        if let Some(slot) = self.slot_mut(place) {
            *slot = value;
        }
        result
    }

    fn binary(
        &mut self,
        t: Operand,
        a: Operand,
        b: Operand,
        op: impl FnOnce(&Specifier, &Specifier) -> Result<Specifier, ValueError>,
    ) -> RuntimeResult<()> {
        let value = op(&self.read(a)?, &self.read(b)?)?;
        self.write(t, value)
    }

    fn unary(
        &mut self,
        t: Operand,
        a: Operand,
        op: impl FnOnce(&Specifier) -> Result<Specifier, ValueError>,
    ) -> RuntimeResult<()> {
        let value = op(&self.read(a)?)?;
        self.write(t, value)
    }

    fn take_element(
        &mut self,
        t: Operand,
        s: Operand,
        op: impl FnOnce(&mut Specifier) -> Result<Specifier, ValueError>,
    ) -> RuntimeResult<()> {
        let mut element = Specifier::Omega;
        self.update(s, |_, source| {
            element = op(source)?;
            Ok(())
        })?;
        self.write(t, element)
    }

    // ── procedures ─────────────────────────────────────────────────

    /// Captures the enclosing procedure's locals into a procedure value.
    fn close_over(&self, literal: Specifier) -> RuntimeResult<Specifier> {
        let Specifier::Proc(body) = &literal else {
            return Err(RuntimeError::NotCallable(literal.type_name().to_string()));
        };
        let ProcKind::User { unit, index } = body.kind else {
            return Ok(literal);
        };
        let unit = unit as usize;
        let parent = self.image.units[unit].procs.get(index as usize).and_then(|p| p.parent);
        let Some(parent) = parent else {
            return Ok(literal);
        };
        let frames = &self.sched.ctx().frames;
        let parent_frame = frames.iter().rposition(|f| f.unit == unit && f.proc == Some(parent));
        let captured: Option<Vec<Specifier>> = match parent_frame {
            Some(at) => Some(frames[at].locals.clone()),
            None => frames.last().and_then(|f| f.env.clone()),
        };
        Ok(match captured {
            Some(env) => Specifier::proc(ProcBody {
                env: Some(Rc::from(env)),
                ..(**body).clone()
            }),
            None => literal,
        })
    }

    pub(crate) fn push_frame(
        &mut self,
        callee: &ProcBody,
        unit: usize,
        index: u32,
        args: Vec<Specifier>,
        self_val: Specifier,
        kind: FrameKind,
    ) -> RuntimeResult<()> {
        let info = self
            .image
            .units
            .get(unit)
            .and_then(|u| u.procs.get(index as usize))
            .ok_or_else(|| RuntimeError::NotCallable(callee.name.to_string()))?;
        if !info.accepts(args.len()) {
            return Err(RuntimeError::Arity {
                name: info.name.to_string(),
                expected: info.formal_count as usize,
                found: args.len(),
            });
        }
        let ctx = self.sched.ctx_mut();
        if ctx.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::Abort("procedure calls nested too deeply".into()));
        }
        let mut locals = vec![Specifier::Omega; info.area_len as usize];
        let fixed = if info.var_args {
            info.formal_count.saturating_sub(1) as usize
        } else {
            args.len()
        };
        let mut args = args.into_iter();
        for (slot, arg) in locals.iter_mut().zip(args.by_ref().take(fixed)) {
            *slot = arg;
        }
        if info.var_args {
            if let Some(slot) = locals.get_mut(fixed) {
                *slot = Specifier::tuple_of(args.collect());
            }
        }
        ctx.frames.push(Frame {
            unit,
            space: CodeSpace::Body,
            ip: info.entry as usize,
            proc: Some(index),
            area_start: info.area_start,
            locals,
            env: callee.env.as_ref().map(|env| env.to_vec()),
            self_val,
            stack_base: ctx.stack.len(),
            kind,
        });
        Ok(())
    }

    fn call(&mut self, target: Operand, callee: Specifier, word: i32) -> RuntimeResult<()> {
        let argc = (word & CALL_ARGC_MASK) as usize;
        let self_writeback = word & CALL_SELF_WRITEBACK != 0;
        let args = self.pop_n(argc)?;
        let proc = match callee {
            Specifier::Proc(proc) => proc,
            other => {
                let value = match args.len() {
                    0 => return Err(RuntimeError::NotCallable(other.type_name().to_string())),
                    1 => ops::of(&other, &args[0])?,
                    _ => ops::of(&other, &Specifier::tuple_of(args))?,
                };
                self.write(target, value)?;
                if self_writeback {
                    let receiver = self.current_self();
                    self.push(receiver);
                }
                return Ok(());
            }
        };
        match proc.kind {
            ProcKind::Builtin(index) => match primitives::call_builtin(self, index, &args)? {
                Flow::Value(value) => {
                    self.write(target, value)?;
                    if self_writeback {
                        let receiver =
                            proc.self_instance.clone().unwrap_or_else(|| self.current_self());
                        self.push(receiver);
                    }
                }
                Flow::Block(mailbox) => self.rewind_call(args, mailbox)?,
                Flow::Yield => {
                    self.write(target, Specifier::Omega)?;
                    if self.sched.critical == 0 {
                        self.sched.switch_requested = true;
                    }
                }
            },
            ProcKind::Native { unit, index } => {
                let value = self.call_native(unit as usize, index, &proc.name, &args)?;
                self.write(target, value)?;
                if self_writeback {
                    let receiver = self.current_self();
                    self.push(receiver);
                }
            }
            ProcKind::User { unit, index } => {
                if let Some(Specifier::Process(handle)) = &proc.self_instance {
                    let reply = self.enqueue_request(handle, proc.clone(), args)?;
                    self.write(target, Specifier::Mailbox(reply))?;
                    if self_writeback {
                        self.push(Specifier::Process(handle.clone()));
                    }
                    return Ok(());
                }
                let self_val = proc.self_instance.clone().unwrap_or_else(|| self.current_self());
                self.push_frame(
                    &proc,
                    unit as usize,
                    index,
                    args,
                    self_val,
                    FrameKind::Call { target, flags: word },
                )?;
            }
        }
        Ok(())
    }

    fn return_from(&mut self, value: Specifier) -> RuntimeResult<()> {
        let ctx = self.sched.ctx_mut();
        let frame = ctx.frames.pop().ok_or(RuntimeError::StackUnderflow("return"))?;
        let written = ctx.stack.split_off(frame.stack_base.min(ctx.stack.len()));
        match frame.kind {
            FrameKind::Call { target, flags } => {
                if flags & CALL_KEEP_WRITEBACK != 0 {
                    ctx.stack.extend(written);
                }
                if flags & CALL_SELF_WRITEBACK != 0 {
                    ctx.stack.push(frame.self_val);
                }
                self.write(target, value)?;
            }
            FrameKind::Host => self.host_result = Some((value, frame.self_val)),
            FrameKind::Request { reply } => {
                reply.send(value);
                if let Some(i) = self.sched.current {
                    self.sched.processes[i].instance = frame.self_val;
                }
                if self.sched.ctx().frames.is_empty() {
                    self.sched.switch_requested = true;
                }
            }
            FrameKind::Init => {}
        }
        Ok(())
    }

    /// Runs a procedure value to completion from Rust, returning its result
    /// and the final value of `self`.
    pub(crate) fn call_value(
        &mut self,
        callee: &Specifier,
        args: Vec<Specifier>,
        self_val: Specifier,
    ) -> RuntimeResult<(Specifier, Specifier)> {
        let Specifier::Proc(proc) = callee else {
            return Err(RuntimeError::NotCallable(callee.type_name().to_string()));
        };
        match proc.kind {
            ProcKind::Builtin(index) => match primitives::call_builtin(self, index, &args)? {
                Flow::Value(value) => Ok((value, self_val)),
                Flow::Block(_) => Err(RuntimeError::BlockedInHost("a nested call")),
                Flow::Yield => Ok((Specifier::Omega, self_val)),
            },
            ProcKind::Native { unit, index } => {
                let value = self.call_native(unit as usize, index, &proc.name, &args)?;
                Ok((value, self_val))
            }
            ProcKind::User { unit, index } => {
                let self_val = proc.self_instance.clone().unwrap_or(self_val);
                let depth = self.sched.ctx().frames.len();
                let kind = FrameKind::Host;
                self.push_frame(proc, unit as usize, index, args, self_val.clone(), kind)?;
                self.sched.critical += 1;
                let result = self.execute(depth);
                self.sched.critical -= 1;
                result.map_err(|abend| RuntimeError::Unwound(Box::new(abend)))?;
                Ok(self.host_result.take().unwrap_or((Specifier::Omega, self_val)))
            }
        }
    }

    fn call_native(
        &mut self,
        unit: usize,
        index: u32,
        name: &str,
        args: &[Specifier],
    ) -> RuntimeResult<Specifier> {
        let package = &self.image.units[unit].name;
        let native = self
            .natives
            .get_mut(package)
            .ok_or_else(|| RuntimeError::NotCallable(format!("native procedure `{name}`")))?;
        let mut target = Specifier::Omega;
        native.call(index, args, &mut target).map_err(|reason| RuntimeError::Native {
            name: name.to_string(),
            reason,
        })?;
        Ok(target)
    }

    // ── objects ────────────────────────────────────────────────────

    fn instantiate(
        &mut self,
        class: object::ClassId,
        args: Vec<Specifier>,
    ) -> RuntimeResult<Specifier> {
        let info = self.image.class(class).clone();
        log::trace!("new `{}`", info.name);
        let body = ObjectBody::new(class, info.name.clone(), info.var_count);
        let mut instance = Specifier::Object(Rc::new(body));
        for initobj in &info.initobjs {
            instance = self.call_value(initobj, Vec::new(), instance)?.1;
        }
        let create = self.image.slots.lookup("create").and_then(|slot| info.slots.get(&slot));
        match create.map(|binding| &binding.kind) {
            Some(SlotKind::Method(method)) => {
                let method = method.clone();
                instance = self.call_value(&method, args, instance)?.1;
            }
            _ if !args.is_empty() => {
                return Err(RuntimeError::Arity {
                    name: format!("{}.create", info.name),
                    expected: 0,
                    found: args.len(),
                });
            }
            _ => {}
        }
        if info.is_process {
            return self.spawn_process(instance);
        }
        Ok(instance)
    }

    /// Whether code running now may touch private slots of `class`.
    fn inside_hierarchy(&self, class: object::ClassId) -> bool {
        let Ok(frame) = self.frame() else {
            return false;
        };
        let Some(current) = self.image.units[frame.unit].class else {
            return false;
        };
        self.image.class(class).descends_from(current)
            || self.image.class(current).descends_from(class)
    }

    fn binding(&self, class: object::ClassId, slot: u32) -> RuntimeResult<&SlotKind> {
        let info = self.image.class(class);
        let binding = info.slots.get(&slot).ok_or_else(|| RuntimeError::NoSlot {
            class: info.name.to_string(),
            slot: self.image.slots.name(slot).to_string(),
        })?;
        if !binding.public && !self.inside_hierarchy(class) {
            return Err(RuntimeError::PrivateSlot {
                class: info.name.to_string(),
                slot: self.image.slots.name(slot).to_string(),
            });
        }
        Ok(&binding.kind)
    }

    pub(crate) fn slot_value(&self, object: &Specifier, slot: u32) -> RuntimeResult<Specifier> {
        match object {
            Specifier::Object(body) => Ok(match self.binding(body.class, slot)? {
                SlotKind::Var(i) => body.var(*i),
                SlotKind::Method(Specifier::Proc(method)) => {
                    Specifier::proc(method.bound_to(object.clone()))
                }
                SlotKind::Method(other) => other.clone(),
            }),
            Specifier::Process(handle) => match self.binding(handle.class, slot)? {
                SlotKind::Method(Specifier::Proc(method)) => {
                    Ok(Specifier::proc(method.bound_to(object.clone())))
                }
                _ => Err(RuntimeError::ProcessVariable(
                    self.image.slots.name(slot).to_string(),
                )),
            },
            other => Err(RuntimeError::NotAnObject {
                op: "slot access",
                found: other.type_name().to_string(),
            }),
        }
    }

    fn set_slot(
        &mut self,
        object: &mut Specifier,
        slot: u32,
        value: Specifier,
    ) -> RuntimeResult<()> {
        match object {
            Specifier::Object(body) => match self.binding(body.class, slot)? {
                SlotKind::Var(i) => {
                    let i = *i;
                    Rc::make_mut(body).set_var(i, value);
                    Ok(())
                }
                SlotKind::Method(_) => Err(RuntimeError::ReadOnly("a method slot")),
            },
            Specifier::Process(_) => Err(RuntimeError::ProcessVariable(
                self.image.slots.name(slot).to_string(),
            )),
            other => Err(RuntimeError::NotAnObject {
                op: "slot assignment",
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Text of a value for `print` and `str`; objects may supply their own
    /// through a `selfstr` method.
    pub(crate) fn display(&mut self, value: &Specifier, quoted: bool) -> RuntimeResult<String> {
        if let Specifier::Object(body) = value {
            let selfstr = self.image.slots.lookup("selfstr").and_then(|slot| {
                match self.image.class(body.class).slots.get(&slot).map(|b| &b.kind) {
                    Some(SlotKind::Method(method)) => Some(method.clone()),
                    _ => None,
                }
            });
            if let Some(method) = selfstr {
                let (text, _) = self.call_value(&method, Vec::new(), value.clone())?;
                return Ok(text.print_string());
            }
        }
        Ok(if quoted {
            value.to_string()
        } else {
            value.print_string()
        })
    }

    pub(crate) fn current_record(&self) -> Option<(usize, PcodeRecord)> {
        self.current_record
    }
}

fn count(operand: Operand) -> RuntimeResult<usize> {
    usize::try_from(operand.offset).map_err(|_| RuntimeError::BadOperand {
        op: Op::Noop,
        reason: format!("negative count {}", operand.offset),
    })
}

fn slot_number(operand: Operand) -> u32 {
    operand.offset as u32
}

/// Image index of an operand rebased by the loader; `None` for literals.
fn unit_index(operand: Operand) -> Option<usize> {
    usize::try_from(operand.unit_num).ok()?.checked_sub(1)
}

/// Whether the first operand of `op` is written.
pub(crate) fn writes_target(op: Op) -> bool {
    op.operand_kinds()[0] == OperandKind::Target
}
