//! Control-flow blocks
//!
//! `if`, `while`, `for` and function definitions are collected line by line
//! into a [`Block`] on the [`ShellState`] stack and run when their `end` (or
//! `}`) arrives. Only the top frame receives lines; a frame closed while its
//! parent is still open is folded back into the parent as raw text and parsed
//! again when the parent replays its body.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{multispace0, multispace1},
    combinator::opt,
    sequence::{pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

/// Upper bound on `while` iterations; reaching it ends the loop silently
pub const MAX_WHILE_ITERATIONS: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("else without if")]
    ElseWithoutIf,
    #[error("end without block")]
    EndWithoutBlock,
    #[error("malformed for loop: {0}")]
    MalformedFor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    While,
    For,
    Function,
}

/// A recognised block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opener {
    pub kind: BlockKind,
    /// Condition for if/while, name for a function
    pub condition: String,
    pub loop_var: String,
    /// Unexpanded `for` item list
    pub items: String,
    /// Text after a function's `{` on the header line
    pub first_line: Option<String>,
}

/// Non-opener lines with a meaning to the block machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Else,
    End,
    /// `then`, `do` and a lone `{`
    Filler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub condition: String,
    pub loop_var: String,
    pub items_raw: String,
    /// Expanded `for` items; only filled for a frame opened at top level
    pub items: Vec<String>,
    pub body: Vec<String>,
    pub else_body: Vec<String>,
    pub in_else: bool,
}

impl Block {
    pub fn new(opener: Opener, items: Vec<String>) -> Self {
        let mut block = Block {
            kind: opener.kind,
            condition: opener.condition,
            loop_var: opener.loop_var,
            items_raw: opener.items,
            items,
            body: Vec::new(),
            else_body: Vec::new(),
            in_else: false,
        };
        if let Some(line) = opener.first_line {
            block.push_line(&line);
        }
        block
    }

    /// Function name of a `Function` block
    pub fn name(&self) -> &str {
        &self.condition
    }

    fn target(&mut self) -> &mut Vec<String> {
        if self.in_else {
            &mut self.else_body
        } else {
            &mut self.body
        }
    }

    pub fn push_line(&mut self, line: &str) {
        self.target().push(line.to_string());
    }

    /// Continue the previous line with `sep line`, keeping commands joined by
    /// `&&`/`||` on one line. Right after the header the join extends the
    /// condition instead.
    pub fn extend_last(&mut self, sep: &str, line: &str) {
        let condition_open = !self.in_else
            && self.body.is_empty()
            && matches!(self.kind, BlockKind::If | BlockKind::While);
        if condition_open {
            self.condition = format!("{} {} {}", self.condition, sep, line);
            return;
        }
        match self.target().last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(sep);
                last.push(' ');
                last.push_str(line);
            }
            None => self.push_line(line),
        }
    }

    /// Header line that reopens this block when replayed
    pub fn header(&self) -> String {
        match self.kind {
            BlockKind::If => format!("if {}", self.condition),
            BlockKind::While => format!("while {}", self.condition),
            BlockKind::For => format!("for {} in {}", self.loop_var, self.items_raw),
            BlockKind::Function => format!("function {} {{", self.condition),
        }
    }

    /// The block as raw lines, header through terminator
    pub fn into_lines(self, terminator: &str) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.body.len() + self.else_body.len() + 3);
        lines.push(self.header());
        let has_else = self.in_else || !self.else_body.is_empty();
        lines.extend(self.body);
        if has_else {
            lines.push("else".to_string());
            lines.extend(self.else_body);
        }
        lines.push(terminator.to_string());
        lines
    }
}

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

fn function_header(input: &str) -> IResult<&str, &str> {
    alt((
        preceded(
            pair(tag("function"), multispace1),
            terminated(name, opt(pair(multispace0, tag("()")))),
        ),
        terminated(name, pair(multispace0, tag("()"))),
    ))(input)
}

fn after_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Recognise a block header on a raw (unexpanded) command
pub fn parse_opener(line: &str) -> Result<Option<Opener>, ControlError> {
    let line = line.trim();
    let opener = |kind, condition: &str| Opener {
        kind,
        condition: condition.to_string(),
        loop_var: String::new(),
        items: String::new(),
        first_line: None,
    };

    if let Some(cond) = after_keyword(line, "if") {
        return Ok(Some(opener(BlockKind::If, cond)));
    }
    if let Some(cond) = after_keyword(line, "while") {
        return Ok(Some(opener(BlockKind::While, cond)));
    }
    if let Some(rest) = after_keyword(line, "for") {
        let mut words = rest.splitn(3, char::is_whitespace);
        let var = words.next().unwrap_or("");
        if var.is_empty() || words.next() != Some("in") {
            return Err(ControlError::MalformedFor(line.to_string()));
        }
        let mut block = opener(BlockKind::For, "");
        block.loop_var = var.to_string();
        block.items = words.next().unwrap_or("").trim().to_string();
        return Ok(Some(block));
    }

    if let Ok((rest, fname)) = function_header(line) {
        let rest = rest.trim();
        let first_line = if rest.is_empty() {
            None
        } else if let Some(body) = rest.strip_prefix('{') {
            let body = body.trim();
            (!body.is_empty()).then(|| body.to_string())
        } else {
            return Ok(None);
        };
        let mut block = opener(BlockKind::Function, fname);
        block.first_line = first_line;
        return Ok(Some(block));
    }

    Ok(None)
}

pub fn keyword(line: &str) -> Option<Keyword> {
    match line.trim() {
        "else" => Some(Keyword::Else),
        "end" | "}" => Some(Keyword::End),
        "then" | "do" | "{" => Some(Keyword::Filler),
        _ => None,
    }
}

/// Stack of blocks being collected
#[derive(Debug, Default)]
pub struct ShellState {
    stack: Vec<Block>,
}

impl ShellState {
    pub fn in_block(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, block: Block) {
        self.stack.push(block);
    }

    pub fn top_mut(&mut self) -> Option<&mut Block> {
        self.stack.last_mut()
    }

    pub fn set_else(&mut self) -> Result<(), ControlError> {
        match self.stack.last_mut() {
            Some(block) if block.kind == BlockKind::If => {
                block.in_else = true;
                Ok(())
            }
            _ => Err(ControlError::ElseWithoutIf),
        }
    }

    /// Pop the top frame. Returns the block when it is ready to run, or
    /// `None` when it was folded back into its still-open parent.
    pub fn close(&mut self, terminator: &str) -> Result<Option<Block>, ControlError> {
        let block = self.stack.pop().ok_or(ControlError::EndWithoutBlock)?;
        match self.stack.last_mut() {
            Some(parent) => {
                for line in block.into_lines(terminator) {
                    parent.push_line(&line);
                }
                Ok(None)
            }
            None => Ok(Some(block)),
        }
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }
}
