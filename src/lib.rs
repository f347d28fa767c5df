//! VML is a small register-machine assembly language for programming robots
//! in an arena game. Every robot runs its own [`Vm`], a few instructions per
//! simulation tick, and talks to its chassis through `sys.*` registers.
//!
//! # Example
//!
//! ```text
//! # spin the turret and shoot at anything the radar sees
//!         setint sys.radar Spotted
//!         inton
//! Main:   sys.aim = sys.aim + 5
//!         sync
//!         jump Main
//!
//! Spotted:
//!         d = call Charge sys.range
//!         sys.fire = d
//!         log "fired" d "at" sys.aim
//!         rti
//!
//! Charge: c = div 500 args.1
//!         c = min c 10
//!         return c
//! ```
//!
//! # Statements
//!
//! | Form                      | Compiles to |
//! |---------------------------|-------------|
//! | `Label:`                  | Names the address of the next instruction. |
//! | `opcode args...`          | The instruction. The result, if any, is dropped. |
//! | `dest = opcode args...`   | The instruction, storing its result in `dest`. |
//! | `dest = a op b`           | `op` is one of `== != < > <= >= && \|\| + - * / %`. |
//! | `dest = ! a`              | `not a` |
//! | `dest = a`                | `store a` into `dest`. |
//!
//! # Instructions
//!
//! | Instruction | Usage                      | Brief   |
//! |-------------|----------------------------|---------|
//! | Abs, Round  | ABS _n_                    | Absolute value / nearest integer. |
//! | Add         | ADD _a_ _b_                | Sum, or concatenation if either side is a string. |
//! | Sub, Mul, Div, Mod | SUB _a_ _b_         | Arithmetic. |
//! | Min, Max    | MIN _a_ _b_ ...            | Smallest / largest of all arguments. |
//! | Eq, Neq, Lt, Gt, Lte, Gte | EQ _a_ _b_   | `1` if the comparison holds, else `0`. Two strings compare as strings. |
//! | And, Or, Not | AND _a_ _b_               | Truthiness logic, `1` or `0`. |
//! | Sin, Cos    | SIN _deg_ [_scale_]        | Scaled sine/cosine of an angle in degrees. |
//! | Atan        | ATAN _y_ [_x_]             | Arc tangent in degrees, `atan2` if `x` is given. |
//! | Tuple       | TUPLE _a_ ...              | Build a tuple. |
//! | Store       | STORE _v_ [_dest_]         | Write `v` to the assignment target or to `dest`. |
//! | Store2      | STORE2 _a_ _b_ [_dest_]    | Write a pair. Sets both parts of `sys.velocity` or `sys.heading`. |
//! | Jump        | JUMP _addr_                | Continue at `addr`. |
//! | If, Ifnz    | IF _c_ _then_ [_else_]     | Jump to `then` if `c` is truthy, else to `else` or fall through. |
//! | Ifz         | IFZ _c_ _then_ [_else_]    | Jump to `then` if `c` is falsy. |
//! | Call        | CALL _addr_ _args_...      | Call a subroutine. Arguments are read as `args.1`, `args.2`, ... |
//! | Return      | RETURN [_v_]               | Return to the caller, handing over `v`. |
//! | Rti         | RTI                        | Return from an interrupt handler and enable interrupts. |
//! | IntOn, IntOff | INTON                    | Enable / disable interrupts. |
//! | SetInt      | SETINT _sys.module_ _addr_ | Install an interrupt handler, a negative address removes it. |
//! | SetLimit    | SETLIMIT _sys.module_ _v_  | Set when a module raises its interrupt. |
//! | Log         | LOG _v_ ...                | Print the values. Free: does not use up a step. |
//! | Debug       | DEBUG                      | Start tracing executed instructions. Free. |
//! | Sync        | SYNC                       | End the tick. |
//! | Noop        | NOOP                       | Do nothing. |
//!
//! # Names
//!
//! - `sys.NAME` is a hardware register: `aim`, `energy`, `fire`, `heading`, `look`,
//!   `random`, `range`, `velocity`, `velocity_dx`, `velocity_dy`, `wall`,
//!   `wall_north`, `wall_west`, `wall_south`, `wall_east`, `x` and `y`.
//! - `user.NAME` is a global, shared by every frame.
//! - `args.N` is the `N`th argument of the current call, counting from 1.
//! - A label evaluates to its address, so addresses can be computed.
//! - Anything else is a local of the current frame.
//!
//! # Important notes
//!
//! - Execution starts at address `0`. Returning from there is an error.
//! - Opcodes are case-insensitive, labels and variables are not.
//! - `#` starts a comment that runs to the end of the line.
//! - Any runtime error stops the robot for good.

pub mod bytecode;
pub mod error;
pub mod hardware;
pub mod interrupt;
mod lexer;
pub mod opcode;
pub mod token;
pub mod value;
pub mod vm;

pub use bytecode::{compile, Program};
pub use error::{CompileError, Fault, RuntimeError};
pub use hardware::{Hardware, Module};
pub use value::Value;
pub use vm::{Config, Vm};
