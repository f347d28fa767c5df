//! Virtual machine that runs a compiled agent program

use crate::{
    bytecode::{self, Instruction, Program},
    error::{CompileError, Fault, RuntimeError},
    hardware::{module_path, Hardware, Register},
    interrupt::{Interrupt, InterruptQueue},
    opcode::Opcode,
    token::{Token, TokenKind},
    value::Value,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use tracing::{debug, info, trace, warn};

/// Per-agent VM settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Steps an agent may take per simulation tick
    pub cpu_speed: usize,
    /// Call stack depth limit, interrupt frames included
    pub max_frames: usize,
    /// Seed for `sys.random`, entropy if `None`
    pub seed: Option<u64>,
    /// Record every executed instruction from the start
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cpu_speed: 8,
            max_frames: 1000,
            seed: None,
            trace: false,
        }
    }
}

/// An argument passed by `call`, kept unevaluated together with the frame it
/// was written in. `args.N` evaluates it there, so a callee passing its own
/// `args.N` on to a further call still reaches the right caller.
#[derive(Debug, Clone)]
struct Arg {
    token: Token,
    frame: usize,
}

/// Frame of memory created for every call and interrupt
/// and destroyed when it returns.
#[derive(Debug, Default)]
struct Frame {
    locals: HashMap<String, Value>, // local variables
    args: Vec<Arg>,                 // caller-supplied arguments
    retval: Option<String>,         // where the caller wants the return value
    ret_addr: Option<usize>,        // instruction to run next, none for main
}

/// Storage location named by an lvalue path
enum Place<'p> {
    Register(Register),
    Global(&'p str),
    Local(&'p str),
}

impl<'p> Place<'p> {
    /// Call arguments and labels only read, so they cannot be written
    fn decode(path: &'p str, program: &Program) -> Result<Self, Fault> {
        if let Some(name) = path.strip_prefix("sys.") {
            return Register::from_name(name)
                .map(Place::Register)
                .ok_or_else(|| Fault::UnknownRegister(name.to_string()));
        }
        if let Some(name) = path.strip_prefix("user.") {
            return Ok(Place::Global(name));
        }
        if path.starts_with("args.") || program.label(path).is_some() {
            return Err(Fault::NotAssignable(path.to_string()));
        }
        Ok(Place::Local(path))
    }
}

/// What happens to the program counter after an instruction
enum Step {
    Advance,
    Goto(usize),
    /// Leave pc alone (`sync`)
    Stay,
    /// Advance and run the next instruction in the same step (`log`, `debug`)
    Free,
}

type VResult<T> = Result<T, Fault>;

/// Virtual machine of one agent
pub struct Vm {
    name: String,
    program: Arc<Program>,
    config: Config,
    pc: usize,                      // instruction pointer
    frames: Vec<Frame>,             // never empty; frames[0] is main
    globals: HashMap<String, Value>, // `user.*`
    interrupts_enabled: bool,
    interrupts: InterruptQueue,
    synced: bool,
    crashed: bool,
    tracing: bool,
    trace: Vec<String>,
    messages: Vec<String>,
    rng: StdRng,
}

impl Vm {
    pub fn new(name: &str, program: Program, config: Config) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Vm {
            name: name.to_string(),
            program: Arc::new(program),
            tracing: config.trace,
            config,
            pc: 0,
            frames: vec![Frame::default()],
            globals: HashMap::new(),
            interrupts_enabled: false,
            interrupts: InterruptQueue::new(),
            synced: false,
            crashed: false,
            trace: Vec::new(),
            messages: Vec::new(),
            rng,
        }
    }

    /// Compile `source` and set up a VM for it
    pub fn load(name: &str, source: &str, config: Config) -> Result<Self, CompileError> {
        let program = bytecode::compile(source, name)?;
        Ok(Vm::new(name, program, config))
    }

    /// Run up to `cpu_speed` steps. Stops early once the program syncs or the
    /// robot runs out of energy. Returns how many steps ran.
    pub fn tick(&mut self, hw: &mut dyn Hardware) -> Result<usize, RuntimeError> {
        let mut steps = 0;
        while steps < self.config.cpu_speed {
            if hw.energy() <= 0.0 {
                break;
            }
            self.step(hw)?;
            steps += 1;
            if self.synced {
                break;
            }
        }
        Ok(steps)
    }

    /// Execute one instruction. `log` and `debug` are free and run on into
    /// the following instruction. Any error is fatal: the agent is marked as
    /// crashed and every later step fails.
    pub fn step(&mut self, hw: &mut dyn Hardware) -> Result<(), RuntimeError> {
        if self.crashed {
            return Err(self.error(Fault::Crashed));
        }

        self.try_step(hw).map_err(|fault| {
            self.crashed = true;
            warn!(agent = %self.name, pc = self.pc, %fault, "agent crashed");
            self.error(fault)
        })
    }

    /// Queue an interrupt from the hardware module `source`
    pub fn raise(&mut self, hw: &mut dyn Hardware, source: &str) -> Result<bool, RuntimeError> {
        let priority = match hw.module(source) {
            Some(module) => module.priority(),
            None => return Err(self.error(Fault::UnknownModule(source.to_string()))),
        };

        Ok(self.interrupts.insert(Interrupt {
            source: source.to_string(),
            priority,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Number of frames on the call stack, main included
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// A local of the innermost frame
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.frames.last().and_then(|frame| frame.locals.get(name))
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    pub fn pending_interrupts(&self) -> &InterruptQueue {
        &self.interrupts
    }

    /// Whether the last step executed `sync`
    pub fn synced(&self) -> bool {
        self.synced
    }

    pub fn crashed(&self) -> bool {
        self.crashed
    }

    /// Lines printed by `log`
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    /// Instructions recorded since `debug` turned tracing on
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Drain the instruction trace. Callers tracing a long run should do this
    /// every tick, the trace is not capped otherwise.
    pub fn take_trace(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace)
    }

    fn error(&self, fault: Fault) -> RuntimeError {
        RuntimeError {
            agent: self.name.clone(),
            pc: self.pc,
            fault,
        }
    }

    fn try_step(&mut self, hw: &mut dyn Hardware) -> VResult<()> {
        // The step after a `sync` moves past it
        if self.synced {
            self.synced = false;
            self.pc += 1;
        }

        if self.interrupts_enabled && !self.interrupts.is_empty() {
            self.dispatch_interrupts(hw)?;
        }

        loop {
            match self.execute(hw)? {
                Step::Advance => self.pc += 1,
                Step::Goto(address) => self.pc = address,
                Step::Stay => {}
                Step::Free => {
                    self.pc += 1;
                    continue;
                }
            }
            return Ok(());
        }
    }

    /// Every queued interrupt with a handler gets its own frame, each one
    /// returning into the handler entered before it.
    fn dispatch_interrupts(&mut self, hw: &mut dyn Hardware) -> VResult<()> {
        for interrupt in self.interrupts.take() {
            let handler = match hw.module(&interrupt.source) {
                Some(module) => module.handler(),
                None => return Err(Fault::UnknownModule(interrupt.source)),
            };
            let handler = match handler {
                Some(handler) => self.address(&Value::Number(handler))?,
                None => continue,
            };

            self.push_frame(Frame {
                ret_addr: Some(self.pc),
                ..Frame::default()
            })?;
            self.interrupts_enabled = false;

            debug!(
                agent = %self.name,
                source = %interrupt.source,
                handler,
                ret = self.pc,
                "interrupt dispatched"
            );
            self.pc = handler;
        }
        Ok(())
    }

    fn execute(&mut self, hw: &mut dyn Hardware) -> VResult<Step> {
        let program = Arc::clone(&self.program);
        let instruction = program.instructions.get(self.pc).ok_or(Fault::PcOutOfRange {
            len: program.len(),
        })?;

        if instruction.debug.address != self.pc {
            return Err(Fault::CorruptProgram {
                pc: self.pc,
                address: instruction.debug.address,
            });
        }

        if self.tracing {
            let line = instruction.to_string();
            trace!(agent = %self.name, "{}", line);
            self.trace.push(line);
        }

        let step = match instruction.opcode {
            Opcode::Abs => self.ins_unary(hw, instruction, f64::abs)?,
            Opcode::Round => self.ins_unary(hw, instruction, f64::round)?,
            Opcode::Add => self.ins_add(hw, instruction)?,
            Opcode::Sub => self.ins_binary(hw, instruction, |a, b| a - b)?,
            Opcode::Mul => self.ins_binary(hw, instruction, |a, b| a * b)?,
            Opcode::Div => self.ins_binary(hw, instruction, |a, b| a / b)?,
            Opcode::Mod => self.ins_binary(hw, instruction, |a, b| a % b)?,
            Opcode::Max => self.ins_fold(hw, instruction, f64::max)?,
            Opcode::Min => self.ins_fold(hw, instruction, f64::min)?,
            Opcode::Eq => self.ins_compare(hw, instruction, |o| o == Some(Ordering::Equal))?,
            Opcode::Neq => self.ins_compare(hw, instruction, |o| o != Some(Ordering::Equal))?,
            Opcode::Gt => self.ins_compare(hw, instruction, |o| o == Some(Ordering::Greater))?,
            Opcode::Lt => self.ins_compare(hw, instruction, |o| o == Some(Ordering::Less))?,
            Opcode::Gte => self.ins_compare(hw, instruction, |o| {
                matches!(o, Some(Ordering::Greater | Ordering::Equal))
            })?,
            Opcode::Lte => self.ins_compare(hw, instruction, |o| {
                matches!(o, Some(Ordering::Less | Ordering::Equal))
            })?,
            Opcode::And => self.ins_logic(hw, instruction, |a, b| a && b)?,
            Opcode::Or => self.ins_logic(hw, instruction, |a, b| a || b)?,
            Opcode::Not => {
                let value = self.arg(hw, instruction, 0)?;
                self.put(hw, instruction, Value::from_bool(!value.is_truthy()))?
            }
            Opcode::Sin => self.ins_trig(hw, instruction, f64::sin)?,
            Opcode::Cos => self.ins_trig(hw, instruction, f64::cos)?,
            Opcode::Atan => self.ins_atan(hw, instruction)?,
            Opcode::Tuple => {
                let items = (0..instruction.args.len())
                    .map(|i| self.arg(hw, instruction, i))
                    .collect::<VResult<Vec<_>>>()?;
                self.put(hw, instruction, Value::Tuple(items))?
            }
            Opcode::Store => self.ins_store(hw, instruction)?,
            Opcode::Store2 => self.ins_store2(hw, instruction)?,
            Opcode::Jump => Step::Goto(self.address_arg(hw, instruction, 0)?),
            Opcode::If | Opcode::Ifnz => self.ins_if(hw, instruction, true)?,
            Opcode::Ifz => self.ins_if(hw, instruction, false)?,
            Opcode::Call => self.ins_call(hw, instruction)?,
            Opcode::Return => self.ins_return(hw, instruction)?,
            Opcode::Rti => self.ins_rti()?,
            Opcode::IntOn => {
                self.interrupts_enabled = true;
                Step::Advance
            }
            Opcode::IntOff => {
                self.interrupts_enabled = false;
                Step::Advance
            }
            Opcode::SetInt => self.ins_setint(hw, instruction)?,
            Opcode::SetLimit => self.ins_setlimit(hw, instruction)?,
            Opcode::Log => self.ins_log(hw, instruction)?,
            Opcode::Debug => {
                self.tracing = true;
                Step::Free
            }
            Opcode::Sync => {
                self.synced = true;
                Step::Stay
            }
            Opcode::Noop => Step::Advance,
        };

        Ok(step)
    }

    /// Store the result of an instruction if it was assigned somewhere
    fn put(&mut self, hw: &mut dyn Hardware, instruction: &Instruction, value: Value) -> VResult<Step> {
        if let Some(dest) = &instruction.store {
            self.assign(hw, dest, value)?;
        }
        Ok(Step::Advance)
    }

    fn ins_unary(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        op: fn(f64) -> f64,
    ) -> VResult<Step> {
        let a = self.number(hw, instruction, 0)?;
        self.put(hw, instruction, Value::Number(op(a)))
    }

    fn ins_binary(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        op: fn(f64, f64) -> f64,
    ) -> VResult<Step> {
        let a = self.number(hw, instruction, 0)?;
        let b = self.number(hw, instruction, 1)?;
        self.put(hw, instruction, Value::Number(op(a, b)))
    }

    /// Numeric addition, or concatenation when either side is a string
    fn ins_add(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let a = self.arg(hw, instruction, 0)?;
        let b = self.arg(hw, instruction, 1)?;
        let sum = match (&a, &b) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", a, b)),
            _ => Value::Number(a.as_number() + b.as_number()),
        };
        self.put(hw, instruction, sum)
    }

    /// `min`/`max` over all arguments
    fn ins_fold(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        op: fn(f64, f64) -> f64,
    ) -> VResult<Step> {
        let mut acc = self.number(hw, instruction, 0)?;
        for i in 1..instruction.args.len() {
            acc = op(acc, self.number(hw, instruction, i)?);
        }
        self.put(hw, instruction, Value::Number(acc))
    }

    /// Two strings compare as strings, two tuples by equality, anything else as numbers
    fn ins_compare(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        test: fn(Option<Ordering>) -> bool,
    ) -> VResult<Step> {
        let a = self.arg(hw, instruction, 0)?;
        let b = self.arg(hw, instruction, 1)?;
        let ordering = match (&a, &b) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Tuple(_), Value::Tuple(_)) if a == b => Some(Ordering::Equal),
            (Value::Tuple(_), Value::Tuple(_)) => None,
            _ => a.as_number().partial_cmp(&b.as_number()),
        };
        self.put(hw, instruction, Value::from_bool(test(ordering)))
    }

    fn ins_logic(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        op: fn(bool, bool) -> bool,
    ) -> VResult<Step> {
        let a = self.arg(hw, instruction, 0)?.is_truthy();
        let b = self.arg(hw, instruction, 1)?.is_truthy();
        self.put(hw, instruction, Value::from_bool(op(a, b)))
    }

    /// `sin`/`cos angle [scale]`, angle in degrees
    fn ins_trig(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        op: fn(f64) -> f64,
    ) -> VResult<Step> {
        let angle = self.number(hw, instruction, 0)?;
        let scale = match instruction.args.len() {
            1 => 1.0,
            _ => self.number(hw, instruction, 1)?,
        };
        self.put(hw, instruction, Value::Number(op(angle.to_radians()) * scale))
    }

    /// `atan y [x]` in degrees
    fn ins_atan(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let y = self.number(hw, instruction, 0)?;
        let radians = match instruction.args.len() {
            1 => y.atan(),
            _ => y.atan2(self.number(hw, instruction, 1)?),
        };
        self.put(hw, instruction, Value::Number(radians.to_degrees()))
    }

    fn ins_store(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let value = self.arg(hw, instruction, 0)?;
        let dest = destination(instruction)?;
        self.assign(hw, dest, value)?;
        Ok(Step::Advance)
    }

    /// Paired write: composite setter for `sys.velocity`/`sys.heading`,
    /// a 2-tuple anywhere else
    fn ins_store2(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let a = self.number(hw, instruction, 0)?;
        let b = self.number(hw, instruction, 1)?;
        let dest = destination(instruction)?;

        match Place::decode(dest, &self.program)? {
            Place::Register(register) => register.write_pair(hw, a, b)?,
            _ => self.assign(hw, dest, Value::pair(a, b))?,
        }
        Ok(Step::Advance)
    }

    /// `if cond then [else]`. Only the address actually taken is checked.
    fn ins_if(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        when: bool,
    ) -> VResult<Step> {
        let cond = self.arg(hw, instruction, 0)?.is_truthy();
        if cond == when {
            Ok(Step::Goto(self.address_arg(hw, instruction, 1)?))
        } else if instruction.args.len() > 2 {
            Ok(Step::Goto(self.address_arg(hw, instruction, 2)?))
        } else {
            Ok(Step::Advance)
        }
    }

    /// Call a subroutine
    fn ins_call(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let target = self.address_arg(hw, instruction, 0)?;
        let caller = self.frames.len() - 1;

        let args = instruction.args[1..]
            .iter()
            .map(|token| Arg {
                token: token.clone(),
                frame: caller,
            })
            .collect();

        // pc + 1: not to call the subroutine forever
        self.push_frame(Frame {
            args,
            retval: instruction.store.clone(),
            ret_addr: Some(self.pc + 1),
            ..Frame::default()
        })?;

        debug!(agent = %self.name, target, depth = self.frames.len(), "call");
        Ok(Step::Goto(target))
    }

    /// Return from the subroutine, handing the value to the caller if it asked for one
    fn ins_return(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        if self.frames.len() < 2 {
            return Err(Fault::ReturnFromMain);
        }

        // The value is only evaluated when the caller captures it
        let wanted = self.frames.last().map_or(false, |frame| frame.retval.is_some());
        let value = match wanted && !instruction.args.is_empty() {
            true => Some(self.arg(hw, instruction, 0)?),
            false => None,
        };

        let frame = self.pop_frame()?;
        let ret_addr = self.ret_addr(&frame)?;
        if let (Some(value), Some(dest)) = (value, &frame.retval) {
            self.assign(hw, dest, value)?;
        }

        debug!(agent = %self.name, ret_addr, depth = self.frames.len(), "return");
        Ok(Step::Goto(ret_addr))
    }

    /// Return from an interrupt handler
    fn ins_rti(&mut self) -> VResult<Step> {
        let frame = self.pop_frame()?;
        let ret_addr = self.ret_addr(&frame)?;
        self.interrupts_enabled = true;

        debug!(agent = %self.name, ret_addr, "return from interrupt");
        Ok(Step::Goto(ret_addr))
    }

    /// `setint sys.module addr`; a negative address removes the handler
    fn ins_setint(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let handler = self.number(hw, instruction, 1)?;
        let handler = if handler < 0.0 { None } else { Some(handler) };
        let (module, path) = module_path(name_arg(instruction, 0)?);

        hw.module(module)
            .ok_or_else(|| Fault::UnknownModule(module.to_string()))?
            .set_handler(path, handler)?;
        Ok(Step::Advance)
    }

    /// `setlimit sys.module param`
    fn ins_setlimit(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let param = self.arg(hw, instruction, 1)?;
        let (module, path) = module_path(name_arg(instruction, 0)?);

        hw.module(module)
            .ok_or_else(|| Fault::UnknownModule(module.to_string()))?
            .set_sensitivity(path, param)?;
        Ok(Step::Advance)
    }

    fn ins_log(&mut self, hw: &mut dyn Hardware, instruction: &Instruction) -> VResult<Step> {
        let mut line = String::new();
        for i in 0..instruction.args.len() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&self.arg(hw, instruction, i)?.to_string());
        }

        info!(agent = %self.name, "{}", line);
        self.messages.push(line);
        Ok(Step::Free)
    }

    /// Evaluate argument `index` of an instruction in the current frame
    fn arg(&mut self, hw: &mut dyn Hardware, instruction: &Instruction, index: usize) -> VResult<Value> {
        let frame = self.frames.len() - 1;
        self.rval(hw, &instruction.args[index], frame)
    }

    fn number(&mut self, hw: &mut dyn Hardware, instruction: &Instruction, index: usize) -> VResult<f64> {
        Ok(self.arg(hw, instruction, index)?.as_number())
    }

    fn address_arg(
        &mut self,
        hw: &mut dyn Hardware,
        instruction: &Instruction,
        index: usize,
    ) -> VResult<usize> {
        let value = self.arg(hw, instruction, index)?;
        self.address(&value)
    }

    /// A value used as a jump target has to be a whole number inside the program
    fn address(&self, value: &Value) -> VResult<usize> {
        let n = value.as_number();
        let len = self.program.len();
        if n.is_finite() && n.fract() == 0.0 && n >= 0.0 && n < len as f64 {
            Ok(n as usize)
        } else {
            Err(Fault::BadAddress {
                value: value.to_string(),
                len,
            })
        }
    }

    /// Evaluate a token in the context of frame `frame`
    fn rval(&mut self, hw: &mut dyn Hardware, token: &Token, frame: usize) -> VResult<Value> {
        match &token.kind {
            TokenKind::Integer(n) => Ok(Value::Number(*n as f64)),
            TokenKind::Float(n) => Ok(Value::Number(*n)),
            TokenKind::Str(s) => Ok(Value::Str(s.clone())),
            TokenKind::Identifier(path) => self.lookup(hw, path, frame),
            kind => Err(Fault::Unresolved(kind.to_string())),
        }
    }

    fn lookup(&mut self, hw: &mut dyn Hardware, path: &str, frame: usize) -> VResult<Value> {
        if let Some(name) = path.strip_prefix("sys.") {
            let register =
                Register::from_name(name).ok_or_else(|| Fault::UnknownRegister(name.to_string()))?;
            return register.read(hw, &mut self.rng);
        }

        if let Some(name) = path.strip_prefix("user.") {
            return self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| Fault::UndefinedGlobal(name.to_string()));
        }

        if let Some(n) = path.strip_prefix("args.") {
            let arg = n
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.frames[frame].args.get(i))
                .cloned()
                .ok_or_else(|| Fault::Unresolved(path.to_string()))?;
            return self.rval(hw, &arg.token, arg.frame);
        }

        if let Some(address) = self.program.label(path) {
            return Ok(Value::Number(address as f64));
        }

        self.frames[frame]
            .locals
            .get(path)
            .cloned()
            .ok_or_else(|| Fault::Unresolved(path.to_string()))
    }

    /// Write through an lvalue path. Locals go to the innermost frame.
    fn assign(&mut self, hw: &mut dyn Hardware, path: &str, value: Value) -> VResult<()> {
        match Place::decode(path, &self.program)? {
            Place::Register(register) => register.write(hw, value)?,
            Place::Global(name) => {
                self.globals.insert(name.to_string(), value);
            }
            Place::Local(name) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.locals.insert(name.to_string(), value);
                }
            }
        }
        Ok(())
    }

    fn push_frame(&mut self, frame: Frame) -> VResult<()> {
        if self.frames.len() >= self.config.max_frames {
            return Err(Fault::StackOverflow(self.config.max_frames));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame. Main is never popped.
    fn pop_frame(&mut self) -> VResult<Frame> {
        if self.frames.len() < 2 {
            return Err(Fault::ReturnFromMain);
        }
        self.frames.pop().ok_or(Fault::ReturnFromMain)
    }

    fn ret_addr(&self, frame: &Frame) -> VResult<usize> {
        let ret_addr = frame.ret_addr.ok_or(Fault::ReturnFromMain)?;
        self.address(&Value::Number(ret_addr as f64))
    }
}

fn destination(instruction: &Instruction) -> VResult<&str> {
    instruction
        .destination()
        .ok_or_else(|| Fault::Unresolved(format!("destination of {}", instruction)))
}

/// A module path argument, taken literally
fn name_arg(instruction: &Instruction, index: usize) -> VResult<&str> {
    let token = &instruction.args[index];
    token
        .identifier()
        .ok_or_else(|| Fault::UnknownModule(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::testing::{Bench, Sensor};

    fn load(program: &str) -> Vm {
        let config = Config {
            seed: Some(7),
            ..Config::default()
        };
        Vm::load("test", program, config).unwrap()
    }

    fn run_steps(vm: &mut Vm, bench: &mut Bench, steps: usize) {
        for _ in 0..steps {
            vm.step(bench).unwrap();
        }
    }

    #[test]
    fn arithmetic() {
        let mut bench = Bench::default();
        let mut vm = load("A = add 2 3\nB = gt 5 3\nC = gt 3 5\nD = 7 % 4\nE = div 1 4");
        run_steps(&mut vm, &mut bench, 5);

        assert_eq!(vm.local("A"), Some(&Value::Number(5.0)));
        assert_eq!(vm.local("B"), Some(&Value::Number(1.0)));
        assert_eq!(vm.local("C"), Some(&Value::Number(0.0)));
        assert_eq!(vm.local("D"), Some(&Value::Number(3.0)));
        assert_eq!(vm.local("E"), Some(&Value::Number(0.25)));
    }

    #[test]
    fn strings() {
        let mut bench = Bench::default();
        let mut vm = load("A = add \"hp \" 40\nB = eq \"a\" \"a\"\nC = lt \"abc\" \"abd\"");
        run_steps(&mut vm, &mut bench, 3);

        assert_eq!(vm.local("A"), Some(&Value::from("hp 40")));
        assert_eq!(vm.local("B"), Some(&Value::Number(1.0)));
        assert_eq!(vm.local("C"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn trig_in_degrees() {
        let mut bench = Bench::default();
        let mut vm = load("A = cos 60 10\nB = sin 90\nC = atan 1 1\nD = max 3 9 4\nE = min 3 -2");
        run_steps(&mut vm, &mut bench, 5);

        let a = vm.local("A").unwrap().as_number();
        assert!((a - 5.0).abs() < 1e-9);
        assert_eq!(vm.local("B"), Some(&Value::Number(1.0)));
        assert!((vm.local("C").unwrap().as_number() - 45.0).abs() < 1e-9);
        assert_eq!(vm.local("D"), Some(&Value::Number(9.0)));
        assert_eq!(vm.local("E"), Some(&Value::Number(-2.0)));
    }

    #[test]
    fn self_loop() {
        let mut bench = Bench::default();
        let mut vm = load("Main: jump Main");
        run_steps(&mut vm, &mut bench, 3);
        assert_eq!(vm.pc(), 0);
    }

    #[test]
    fn branches() {
        let mut bench = Bench::default();
        let program = "if 0 Yes No\nYes: x = 1\nNo: y = 2\nifz 0 Done\nnoop\nDone: ifnz 1 9999";
        let mut vm = load(program);

        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.pc(), 2);
        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(vm.pc(), 5);

        let err = vm.step(&mut bench).unwrap_err();
        assert!(matches!(err.fault, Fault::BadAddress { .. }));
    }

    #[test]
    fn computed_jump() {
        let mut bench = Bench::default();
        let mut vm = load("t = add Base 2\njump t\nBase: noop\nnoop\nlast = 1");
        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(vm.pc(), 4);
    }

    #[test]
    fn call_and_return() {
        let mut bench = Bench::default();
        let program = "call Sub 7\nnoop\nSub: store args.1 user.X\nreturn";
        let mut vm = load(program);

        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.depth(), 2);
        run_steps(&mut vm, &mut bench, 2);

        assert_eq!(vm.global("X"), Some(&Value::Number(7.0)));
        assert_eq!(vm.pc(), 1);
        assert_eq!(vm.depth(), 1);
    }

    #[test]
    fn return_value_lands_in_caller() {
        let mut bench = Bench::default();
        let program = "r = call Double 21\nnoop\nDouble: v = mul args.1 2\nreturn v";
        let mut vm = load(program);
        run_steps(&mut vm, &mut bench, 3);

        assert_eq!(vm.local("r"), Some(&Value::Number(42.0)));
        assert_eq!(vm.local("v"), None);
    }

    #[test]
    fn arguments_evaluate_in_caller_frame() {
        let mut bench = Bench::default();
        let program = "\
            x = 5
            call Outer x
            jump End
            Outer: x = 100
            call Inner args.1
            return
            Inner: store args.1 user.seen
            return
            End: noop";
        let mut vm = load(program);
        run_steps(&mut vm, &mut bench, 8);

        // `args.1` of Inner is Outer's `args.1`, which is main's `x`
        assert_eq!(vm.global("seen"), Some(&Value::Number(5.0)));
        assert_eq!(vm.pc(), 8);
    }

    #[test]
    fn uncaptured_return_value_is_not_evaluated() {
        let mut bench = Bench::default();
        let mut vm = load("call Sub\nnoop\nSub: return missing");
        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(vm.pc(), 1);

        let mut vm = load("r = call Sub\nnoop\nSub: return missing");
        run_steps(&mut vm, &mut bench, 1);
        assert!(matches!(vm.step(&mut bench).unwrap_err().fault, Fault::Unresolved(_)));
    }

    #[test]
    fn read_only_names() {
        let mut bench = Bench::default();
        let mut vm = load("call Sub 1\nnoop\nSub: args.1 = 2");
        run_steps(&mut vm, &mut bench, 1);
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::NotAssignable(_)
        ));

        let mut vm = load("Top: Top = 3");
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::NotAssignable(_)
        ));

        let mut vm = load("Top: store2 1 2 Top");
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::NotAssignable(_)
        ));
    }

    #[test]
    fn return_from_main() {
        let mut bench = Bench::default();
        let mut vm = load("return");
        let err = vm.step(&mut bench).unwrap_err();
        assert!(matches!(err.fault, Fault::ReturnFromMain));
    }

    #[test]
    fn unresolved_names() {
        let mut bench = Bench::default();
        let mut vm = load("a = b");
        assert!(matches!(vm.step(&mut bench).unwrap_err().fault, Fault::Unresolved(_)));

        let mut vm = load("a = user.score");
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::UndefinedGlobal(_)
        ));

        let mut vm = load("a = sys.shield");
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::UnknownRegister(_)
        ));
    }

    #[test]
    fn crashed_agents_stay_crashed() {
        let mut bench = Bench::default();
        let mut vm = load("jump 9999\nnoop\nnoop");

        let err = vm.step(&mut bench).unwrap_err();
        assert_eq!(err.pc, 0);
        assert!(vm.crashed());
        assert!(matches!(vm.step(&mut bench).unwrap_err().fault, Fault::Crashed));
    }

    #[test]
    fn running_off_the_end() {
        let mut bench = Bench::default();
        let mut vm = load("noop");
        run_steps(&mut vm, &mut bench, 1);
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::PcOutOfRange { len: 1 }
        ));
    }

    #[test]
    fn registers() {
        let mut bench = Bench::default();
        let program = "sys.aim = 90\nsys.fire = 3\nstore2 4 5 sys.velocity\nv = sys.velocity\nx = sys.x";
        let mut vm = load(program);
        run_steps(&mut vm, &mut bench, 5);

        assert_eq!(bench.aim, 90.0);
        assert_eq!(bench.bullet, 3.0);
        assert_eq!(bench.shots, 1);
        assert_eq!(bench.velocity, (4.0, 5.0));
        assert_eq!(vm.local("v"), Some(&Value::pair(4.0, 5.0)));
        assert_eq!(vm.local("x"), Some(&Value::Number(10.0)));
    }

    #[test]
    fn tuples() {
        let mut bench = Bench::default();
        let program = "h = tuple 2 0\nsys.heading = h\np = store2 1 2";
        let mut vm = load(program);
        run_steps(&mut vm, &mut bench, 3);

        assert!((bench.velocity.0 - 2.0).abs() < 1e-9);
        assert!(bench.velocity.1.abs() < 1e-9);
        assert_eq!(vm.local("p"), Some(&Value::pair(1.0, 2.0)));
    }

    #[test]
    fn random_is_seeded() {
        let mut first = load("r = sys.random");
        let mut second = load("r = sys.random");
        run_steps(&mut first, &mut Bench::default(), 1);
        run_steps(&mut second, &mut Bench::default(), 1);

        let r = first.local("r").unwrap().as_number();
        assert!((0.0..1.0).contains(&r));
        assert_eq!(first.local("r"), second.local("r"));
    }

    #[test]
    fn interrupt_dispatch() {
        let mut bench = Bench::default().with_module("wall", Sensor::default());
        let program = "setint sys.wall Bump\ninton\nnoop\nnoop\nBump: user.hit = 1\nrti";
        let mut vm = load(program);

        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(bench.modules["wall"].handler, Some(4.0));
        assert!(vm.interrupts_enabled());

        assert!(vm.raise(&mut bench, "wall").unwrap());
        assert!(!vm.raise(&mut bench, "wall").unwrap());

        // The handler runs instead of the instruction at pc 2
        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.depth(), 2);
        assert!(!vm.interrupts_enabled());
        assert_eq!(vm.pc(), 5);
        assert_eq!(vm.global("hit"), Some(&Value::Number(1.0)));

        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.pc(), 2);
        assert_eq!(vm.depth(), 1);
        assert!(vm.interrupts_enabled());
    }

    #[test]
    fn interrupts_wait_while_disabled() {
        let mut bench = Bench::default().with_module("wall", Sensor::default());
        let mut vm = load("setint sys.wall H\nnoop\nH: rti");

        run_steps(&mut vm, &mut bench, 1);
        vm.raise(&mut bench, "wall").unwrap();
        run_steps(&mut vm, &mut bench, 1);

        assert_eq!(vm.pc(), 2);
        assert_eq!(vm.pending_interrupts().len(), 1);
    }

    #[test]
    fn queued_interrupts_fan_out() {
        let wall = Sensor {
            priority: 0,
            handler: Some(2.0),
            ..Sensor::default()
        };
        let radar = Sensor {
            priority: 5,
            handler: Some(4.0),
            ..Sensor::default()
        };
        let hit = Sensor {
            priority: 1,
            ..Sensor::default()
        };
        let mut bench = Bench::default()
            .with_module("radar", radar)
            .with_module("wall", wall)
            .with_module("hit", hit);
        let mut vm = load("inton\nnoop\nA: noop\nrti\nB: noop\nrti");

        run_steps(&mut vm, &mut bench, 1);
        for source in ["radar", "wall", "hit"] {
            vm.raise(&mut bench, source).unwrap();
        }

        // wall is entered first, radar nests on top of it, hit has no handler
        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.depth(), 3);
        assert_eq!(vm.pc(), 5);
        assert!(vm.pending_interrupts().is_empty());

        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.pc(), 2);
        assert_eq!(vm.depth(), 2);
        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(vm.pc(), 1);
        assert_eq!(vm.depth(), 1);
    }

    #[test]
    fn setlimit_reaches_the_module() {
        let mut bench = Bench::default().with_module("radar", Sensor::default());
        let mut vm = load("setlimit sys.radar.arc 30\nsetint sys.radar -1");
        run_steps(&mut vm, &mut bench, 2);

        assert_eq!(bench.modules["radar"].sensitivity, Some(Value::Number(30.0)));
        assert_eq!(bench.modules["radar"].handler, None);

        let mut vm = load("setlimit sys.shield 1");
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::UnknownModule(_)
        ));
    }

    #[test]
    fn log_is_free() {
        let mut bench = Bench::default();
        let mut vm = load("x = 4\nlog \"x is\" x\nlog \"twice\" x\ny = 1\nnoop");

        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(vm.messages(), ["x is 4", "twice 4"]);
        assert_eq!(vm.local("y"), Some(&Value::Number(1.0)));
        assert_eq!(vm.pc(), 4);
        assert_eq!(vm.take_messages().len(), 2);
        assert!(vm.messages().is_empty());
    }

    #[test]
    fn debug_turns_on_tracing() {
        let mut bench = Bench::default();
        let mut vm = load("noop\ndebug\nx = 1\nnoop");

        run_steps(&mut vm, &mut bench, 2);
        assert_eq!(vm.pc(), 3);
        assert_eq!(vm.trace().len(), 1);
        assert!(vm.trace()[0].starts_with("[2] x = store 1"));

        assert_eq!(vm.take_trace().len(), 1);
        assert!(vm.trace().is_empty());
        run_steps(&mut vm, &mut bench, 1);
        assert_eq!(vm.trace().len(), 1);
    }

    #[test]
    fn sync_ends_the_tick() {
        let mut bench = Bench::default();
        let mut vm = load("Loop: a = 1\nsync\nb = 2\njump Loop");

        assert_eq!(vm.tick(&mut bench).unwrap(), 2);
        assert!(vm.synced());
        assert_eq!(vm.pc(), 1);

        // The next tick moves past the sync
        assert_eq!(vm.tick(&mut bench).unwrap(), 4);
        assert_eq!(vm.pc(), 1);
        assert_eq!(vm.local("b"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn tick_respects_budget_and_energy() {
        let mut bench = Bench::default();
        let mut vm = load("Main: jump Main");
        assert_eq!(vm.tick(&mut bench).unwrap(), 8);

        bench.energy = 0.0;
        assert_eq!(vm.tick(&mut bench).unwrap(), 0);
    }

    #[test]
    fn recursion_is_bounded() {
        let mut bench = Bench::default();
        let config = Config {
            max_frames: 4,
            ..Config::default()
        };
        let mut vm = Vm::load("test", "F: call F", config).unwrap();

        run_steps(&mut vm, &mut bench, 3);
        let err = vm.step(&mut bench).unwrap_err();
        assert!(matches!(err.fault, Fault::StackOverflow(4)));
    }

    #[test]
    fn corrupt_program() {
        let mut bench = Bench::default();
        let mut program = bytecode::compile("noop\nnoop", "test").unwrap();
        program.instructions.swap(0, 1);
        program.instructions[1].debug.address = 1;

        let mut vm = Vm::new("test", program, Config::default());
        assert!(matches!(
            vm.step(&mut bench).unwrap_err().fault,
            Fault::CorruptProgram { pc: 0, address: 1 }
        ));
    }
}
