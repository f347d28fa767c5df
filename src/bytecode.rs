//! Bytecode representation and the compiler that produces it

use crate::{
    error::CompileError,
    lexer::Lexer,
    opcode::{ArgType, Opcode},
    token::{Position, Token, TokenKind},
};
use std::{
    collections::{BTreeSet, HashMap},
    fmt, mem,
};
use tracing::debug;

/// Where an instruction came from
#[derive(Debug, Clone, PartialEq)]
pub struct DebugInfo {
    /// Index of the instruction in its program
    pub address: usize,
    /// Labels declared right before the instruction
    pub labels: BTreeSet<String>,
    pub pos: Position,
}

/// One statement of the source, ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Operands, unevaluated
    pub args: Vec<Token>,
    /// Lvalue path receiving the result, from `dest = ...`
    pub store: Option<String>,
    pub debug: DebugInfo,
}

impl Instruction {
    /// Where a `store`/`store2` writes: the assignment target if there is one,
    /// else the argument after the value(s).
    pub fn destination(&self) -> Option<&str> {
        if let Some(store) = &self.store {
            return Some(store);
        }
        let values = match self.opcode {
            Opcode::Store => 1,
            Opcode::Store2 => 2,
            _ => return None,
        };
        self.args.get(values).and_then(Token::identifier)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] ", self.debug.address)?;
        for label in &self.debug.labels {
            write!(f, "{}: ", label)?;
        }
        if let Some(store) = &self.store {
            write!(f, "{} = ", store)?;
        }
        write!(f, "{}", self.opcode)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        write!(f, " ({})", self.debug.pos)
    }
}

/// A compiled agent program. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub name: String,
    /// Array of instructions from top to bottom
    pub instructions: Vec<Instruction>,
    /// Label table which maps a label to the address of the instruction it marks
    pub labels: HashMap<String, usize>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

type CResult<T> = Result<T, CompileError>;

/// Recursive-descent compiler from token stream to `Program`.
///
/// ```text
/// program    := (labelDecl | statement)*
/// labelDecl  := IDENTIFIER ':'
/// statement  := assignment | infixExpr | operation
/// assignment := IDENTIFIER '=' (infixExpr | OPSYM rval* | operation | rval)
/// infixExpr  := rval OPSYM rval rval*
/// operation  := OPCODE rval*
/// rval       := NUMBER | STRING | IDENTIFIER   (not followed by ':' or '=')
/// ```
///
/// Statements are told apart by looking at most two tokens ahead; the
/// compiler never backtracks. The first error aborts compilation.
pub struct Compiler {
    tokens: Vec<Token>,
    cursor: usize,
    program: Program,
    /// Labels waiting for the next instruction
    pending: Vec<(String, Position)>,
}

impl Compiler {
    /// Scan `source` and prepare the compiler
    ///
    /// * `source` program text
    /// * `name` file or agent name used in diagnostics
    pub fn new(source: &str, name: &str) -> CResult<Self> {
        let tokens = Lexer::new(source, name).scan_program()?;
        Ok(Compiler {
            tokens,
            cursor: 0,
            program: Program {
                name: name.to_string(),
                ..Program::default()
            },
            pending: Vec::new(),
        })
    }

    /// Compile the token stream into a `Program`
    pub fn compile(mut self) -> CResult<Program> {
        loop {
            let next = (self.peek(0).kind.clone(), self.peek(1).kind.clone());
            match next {
                (TokenKind::Eof, _) => break,
                (TokenKind::Identifier(_), TokenKind::Colon) => self.label_decl()?,
                (TokenKind::Identifier(_), TokenKind::Assign) => self.assignment()?,
                (TokenKind::Opcode(_), _) => self.operation(None, None)?,
                (lhs, TokenKind::OpSym(_)) if lhs.is_rval() => {
                    let lhs = self.advance();
                    self.infix(lhs, None)?;
                }
                (kind, _) => {
                    let message = format!("unexpected '{}'", kind);
                    return Err(CompileError::new(&self.peek(0).pos, message));
                }
            }
        }

        if let Some((label, pos)) = self.pending.first() {
            let message = format!("label '{}' is not followed by an instruction", label);
            return Err(CompileError::new(pos, message));
        }

        debug!(
            program = %self.program.name,
            instructions = self.program.len(),
            labels = self.program.labels.len(),
            "program compiled"
        );

        Ok(self.program)
    }

    /// `Name:` marks the address of the next instruction
    fn label_decl(&mut self) -> CResult<()> {
        let token = self.advance();
        self.advance(); // ':'

        let name = match token.kind {
            TokenKind::Identifier(name) => name,
            _ => unreachable!("label_decl is only entered on an identifier"),
        };

        let address = self.program.len();
        if let Some(previous) = self.program.labels.get(&name) {
            let message = format!(
                "label '{}' is already defined at address {}, redefined at address {}",
                name, previous, address
            );
            return Err(CompileError::new(&token.pos, message));
        }

        self.program.labels.insert(name.clone(), address);
        self.pending.push((name, token.pos));
        Ok(())
    }

    /// `dest = ...`
    fn assignment(&mut self) -> CResult<()> {
        let dest = self.advance();
        self.advance(); // '='
        let store = dest.identifier().map(str::to_string);

        match self.peek(0).kind.clone() {
            TokenKind::Opcode(_) => self.operation(store, Some(dest.pos)),
            TokenKind::OpSym(sym) => {
                // Prefix form: `x = ! flag`, `x = + a b`
                let opcode = sym.opcode();
                self.advance();
                let args = self.rvals();
                self.emit(opcode, args, store, dest.pos)
            }
            _ if self.is_rval(0) => {
                let lhs = self.advance();
                if let TokenKind::OpSym(_) = self.peek(0).kind {
                    self.infix_at(lhs, store, dest.pos)
                } else {
                    self.emit(Opcode::Store, vec![lhs], store, dest.pos)
                }
            }
            kind => {
                let message = format!("expected an expression after '=', got '{}'", kind);
                Err(CompileError::new(&self.peek(0).pos, message))
            }
        }
    }

    /// `lhs OP rhs ...` without an assignment
    fn infix(&mut self, lhs: Token, store: Option<String>) -> CResult<()> {
        let pos = lhs.pos.clone();
        self.infix_at(lhs, store, pos)
    }

    fn infix_at(&mut self, lhs: Token, store: Option<String>, pos: Position) -> CResult<()> {
        let op = self.advance();
        let opcode = match op.kind {
            TokenKind::OpSym(sym) => sym.opcode(),
            _ => unreachable!("infix is only entered on an operator"),
        };

        if !self.is_rval(0) {
            let message = format!("expected an operand after '{}'", op);
            return Err(CompileError::new(&self.peek(0).pos, message));
        }

        let mut args = vec![lhs];
        args.extend(self.rvals());
        self.emit(opcode, args, store, pos)
    }

    /// `OPCODE rval*`. An assignment passes the position of its destination,
    /// where the statement starts.
    fn operation(&mut self, store: Option<String>, pos: Option<Position>) -> CResult<()> {
        let token = self.advance();
        let opcode = match token.kind {
            TokenKind::Opcode(op) => op,
            _ => unreachable!("operation is only entered on an opcode"),
        };
        let args = self.rvals();
        self.emit(opcode, args, store, pos.unwrap_or(token.pos))
    }

    /// Append one instruction and check it against the instruction table
    fn emit(
        &mut self,
        opcode: Opcode,
        args: Vec<Token>,
        store: Option<String>,
        pos: Position,
    ) -> CResult<()> {
        let instruction = Instruction {
            opcode,
            args,
            store,
            debug: DebugInfo {
                address: self.program.len(),
                labels: mem::take(&mut self.pending)
                    .into_iter()
                    .map(|(label, _)| label)
                    .collect(),
                pos,
            },
        };

        if let Err(err) = opcode.check_arity(instruction.args.len()) {
            let message = format!("{}: {}", err, instruction);
            return Err(CompileError::new(&instruction.debug.pos, message));
        }

        // Destinations and module paths have to be names
        let signature = opcode.signature();
        let slots = signature.required.iter().chain(signature.optional);
        for (arg, slot) in instruction.args.iter().zip(slots) {
            if matches!(slot, ArgType::LValue | ArgType::Module) && arg.identifier().is_none() {
                let message = format!("{} expects a name, got '{}'", opcode, arg);
                return Err(CompileError::new(&arg.pos, message));
            }
        }

        if matches!(opcode, Opcode::Store | Opcode::Store2) && instruction.destination().is_none() {
            let message = format!("{} has no destination: {}", opcode, instruction);
            return Err(CompileError::new(&instruction.debug.pos, message));
        }

        self.program.instructions.push(instruction);
        Ok(())
    }

    /// Consume operands until something that cannot be one
    fn rvals(&mut self) -> Vec<Token> {
        let mut args = Vec::new();
        while self.is_rval(0) {
            args.push(self.advance());
        }
        args
    }

    /// An identifier followed by ':' or '=' starts the next statement
    fn is_rval(&self, offset: usize) -> bool {
        match &self.peek(offset).kind {
            TokenKind::Identifier(_) => !matches!(
                self.peek(offset + 1).kind,
                TokenKind::Colon | TokenKind::Assign
            ),
            kind => kind.is_rval(),
        }
    }

    /// Token `offset` places ahead. Past the end this is the final `Eof`.
    fn peek(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.cursor + offset).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek(0).clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }
}

/// Compile `source` into a program named `name`
pub fn compile(source: &str, name: &str) -> CResult<Program> {
    Compiler::new(source, name)?.compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg_texts(instruction: &Instruction) -> Vec<String> {
        instruction.args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn label_resolution() {
        let program = compile("Main: jump Main", "test.vml").unwrap();
        assert_eq!(program.label("Main"), Some(0));
        assert_eq!(program.len(), 1);

        let jump = &program.instructions[0];
        assert_eq!(jump.opcode, Opcode::Jump);
        assert_eq!(arg_texts(jump), vec!["Main"]);
        assert!(jump.debug.labels.contains("Main"));
    }

    #[test]
    fn addresses_match_indices() {
        let program = compile(
            "a = 1\nLoop:\nb = add a 2\nTop: Again:\nlog a b\njump Loop",
            "test.vml",
        )
        .unwrap();

        for (index, instruction) in program.instructions.iter().enumerate() {
            assert_eq!(instruction.debug.address, index);
        }
        assert_eq!(program.label("Loop"), Some(1));
        assert_eq!(program.label("Top"), Some(2));
        assert_eq!(program.label("Again"), Some(2));
        assert_eq!(program.instructions[2].debug.labels.len(), 2);
    }

    #[test]
    fn duplicate_labels() {
        let err = compile("Foo: noop\nnoop\nFoo: noop", "test.vml").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("address 0"));
        assert!(err.message.contains("address 2"));
    }

    #[test]
    fn trailing_label() {
        let err = compile("noop\nEnd:", "test.vml").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("End"));
    }

    #[test]
    fn arity() {
        assert!(compile("add 1 2", "test.vml").is_ok());
        assert!(compile("log 1 2 3", "test.vml").is_ok());
        assert!(compile("log", "test.vml").is_ok());

        let err = compile("add 1", "test.vml").unwrap_err();
        assert!(err.message.contains("[0] add 1"));
        assert!(compile("add 1 2 3", "test.vml").is_err());
    }

    #[test]
    fn assignment_forms() {
        let program = compile(
            "a = 5\nb = add a 1\nc = a * b\nd = ! c\ne = \"text\"",
            "test.vml",
        )
        .unwrap();
        let ops: Vec<_> = program
            .instructions
            .iter()
            .map(|i| (i.opcode, i.store.clone().unwrap(), arg_texts(i)))
            .collect();

        assert_eq!(ops[0], (Opcode::Store, "a".to_string(), vec!["5".to_string()]));
        assert_eq!(
            ops[1],
            (Opcode::Add, "b".to_string(), vec!["a".to_string(), "1".to_string()])
        );
        assert_eq!(
            ops[2],
            (Opcode::Mul, "c".to_string(), vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(ops[3], (Opcode::Not, "d".to_string(), vec!["c".to_string()]));
        assert_eq!(ops[4].0, Opcode::Store);
    }

    #[test]
    fn bare_infix() {
        let program = compile("x == 1", "test.vml").unwrap();
        assert_eq!(program.instructions[0].opcode, Opcode::Eq);
        assert_eq!(program.instructions[0].store, None);

        assert!(compile("x ==", "test.vml").is_err());
    }

    #[test]
    fn operands_stop_at_next_statement() {
        let program = compile("call Sub 1 x\ny = 2\nSub: return", "test.vml").unwrap();
        assert_eq!(program.len(), 3);
        assert_eq!(arg_texts(&program.instructions[0]), vec!["Sub", "1", "x"]);
        assert_eq!(program.instructions[1].store.as_deref(), Some("y"));
    }

    #[test]
    fn labels_spelled_like_opcodes() {
        let program = compile("call Sub 7\nnoop\nSub: x = sub 9 2\nreturn", "test.vml").unwrap();
        assert_eq!(program.label("Sub"), Some(2));
        assert_eq!(arg_texts(&program.instructions[0]), vec!["Sub", "7"]);
        assert_eq!(program.instructions[2].opcode, Opcode::Sub);

        let program = compile("jump: noop\nJUMP jump", "test.vml").unwrap();
        assert_eq!(program.label("jump"), Some(0));
        assert_eq!(program.instructions[1].opcode, Opcode::Jump);
        assert_eq!(arg_texts(&program.instructions[1]), vec!["jump"]);
    }

    #[test]
    fn store_destination() {
        let program = compile("store 1 user.x\nstore2 1 2 sys.velocity\nv = store2 3 4", "test.vml")
            .unwrap();
        assert_eq!(program.instructions[0].destination(), Some("user.x"));
        assert_eq!(program.instructions[1].destination(), Some("sys.velocity"));
        assert_eq!(program.instructions[2].destination(), Some("v"));

        assert!(compile("store 1", "test.vml").is_err());
        assert!(compile("store 1 2", "test.vml").is_err());
        assert!(compile("setint 3 Handler\nHandler: rti", "test.vml").is_err());
    }

    #[test]
    fn unexpected_tokens() {
        let err = compile("noop\n: noop", "test.vml").unwrap_err();
        assert_eq!((err.line, err.column), (2, 1));
        assert!(compile("x = = 1", "test.vml").is_err());
    }

    #[test]
    fn listing() {
        let program = compile("Main: A = add 2 3", "bot.vml").unwrap();
        assert_eq!(program.to_string(), "[0] Main: A = add 2 3 (bot.vml:1:7)\n");

        let err = compile("noop\n  total = sub 1", "bot.vml").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
    }
}
