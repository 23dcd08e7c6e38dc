// src/sandbox/syntax.rs

//! Shell-subset parser for recipe scripts.
//!
//! Recipes declare metadata through top-level variable assignments, with
//! the occasional conditional, loop, or helper command around them. The
//! grammar here covers that surface: scalar and array assignments, simple
//! commands chained with `&&`/`||`/`|`, `if`/`elif`/`else`, `for`, `while`,
//! quoting, parameter expansion (including `:-` defaults and `#`/`%`
//! trims), command substitution, and function definitions. Function bodies
//! are captured verbatim and never executed; build steps live there and
//! are not part of the metadata surface.

use crate::error::{Error, Result};

/// A parsed recipe script
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        name: String,
        value: AssignValue,
    },
    List(CommandList),
    If {
        arms: Vec<IfArm>,
        else_body: Vec<Stmt>,
    },
    For {
        var: String,
        items: Vec<Word>,
        body: Vec<Stmt>,
    },
    While {
        cond: Vec<Stmt>,
        body: Vec<Stmt>,
    },
    FuncDef {
        name: String,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignValue {
    Scalar(Word),
    Array(Vec<Word>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    pub cond: Vec<Stmt>,
    pub body: Vec<Stmt>,
}

/// Commands joined by `&&`, `||`, or `|`
#[derive(Debug, Clone, PartialEq)]
pub struct CommandList {
    pub items: Vec<(Option<ChainOp>, Command)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChainOp {
    And,
    Or,
    Pipe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub negate: bool,
    pub words: Vec<Word>,
}

/// One shell word, a concatenation of parts
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted literal text; subject to field splitting and globbing
    Literal(String),
    SingleQuoted(String),
    /// Inner parts expand but are never split or globbed
    DoubleQuoted(Vec<WordPart>),
    Var {
        name: String,
        op: VarOp,
    },
    CmdSubst(Script),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VarOp {
    None,
    /// `${name:-word}` / `${name-word}`
    Default(Box<Word>),
    /// `${name#pat}` / `${name##pat}`
    TrimPrefix { pattern: Box<Word>, longest: bool },
    /// `${name%pat}` / `${name%%pat}`
    TrimSuffix { pattern: Box<Word>, longest: bool },
}

const KEYWORDS: &[&str] = &["if", "for", "while", "then", "elif", "else", "fi", "do", "done"];

/// Reusable recipe parser
#[derive(Debug, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, source: &str, file: &str) -> Result<Script> {
        let mut cx = Cx::new(source, file);
        let (stmts, _) = parse_stmts(&mut cx, &[])?;
        Ok(Script { stmts })
    }
}

struct Cx<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    file: &'a str,
}

impl<'a> Cx<'a> {
    fn new(source: &str, file: &'a str) -> Cx<'a> {
        Cx {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            file,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn err(&self, reason: impl Into<String>) -> Error {
        Error::RecipeParse {
            file: self.file.to_string(),
            line: self.line,
            reason: reason.into(),
        }
    }

    /// Skip spaces, tabs, and escaped newlines
    fn skip_inline(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') => {
                    self.bump();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    /// Skip statement separators: whitespace, newlines, `;`, `&`, comments
    fn skip_separators(&mut self) {
        loop {
            self.skip_inline();
            match self.peek() {
                Some('\n') | Some(';') | Some('&')
                    if !(self.peek() == Some('&') && self.peek_at(1) == Some('&')) =>
                {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Peek an unquoted identifier-like word without consuming it.
    /// Returns the word and the position just past it.
    fn peek_bare_word(&self) -> Option<(String, usize)> {
        let mut pos = self.pos;
        let first = *self.chars.get(pos)?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }

        let mut word = String::new();
        while let Some(&c) = self.chars.get(pos) {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                pos += 1;
            } else {
                break;
            }
        }

        match self.chars.get(pos) {
            None => Some((word, pos)),
            Some(&c) if " \t\n;#&|()".contains(c) => Some((word, pos)),
            _ => None,
        }
    }
}

fn parse_stmts(cx: &mut Cx, terminators: &[&str]) -> Result<(Vec<Stmt>, String)> {
    let mut stmts = Vec::new();

    loop {
        cx.skip_separators();

        if cx.peek().is_none() {
            if terminators.is_empty() {
                return Ok((stmts, String::new()));
            }
            return Err(cx.err(format!("unexpected end of file, expected {terminators:?}")));
        }

        if let Some((word, end)) = cx.peek_bare_word() {
            if terminators.contains(&word.as_str()) {
                cx.pos = end;
                return Ok((stmts, word));
            }

            match word.as_str() {
                "if" => {
                    cx.pos = end;
                    stmts.push(parse_if(cx)?);
                    continue;
                }
                "for" => {
                    cx.pos = end;
                    stmts.push(parse_for(cx)?);
                    continue;
                }
                "while" => {
                    cx.pos = end;
                    stmts.push(parse_while(cx)?);
                    continue;
                }
                kw if KEYWORDS.contains(&kw) => {
                    return Err(cx.err(format!("unexpected keyword `{kw}`")));
                }
                _ => {}
            }
        }

        stmts.push(parse_plain_stmt(cx)?);
    }
}

fn parse_if(cx: &mut Cx) -> Result<Stmt> {
    let mut arms = Vec::new();
    let mut else_body = Vec::new();

    let (cond, _) = parse_stmts(cx, &["then"])?;
    let (body, mut kw) = parse_stmts(cx, &["fi", "elif", "else"])?;
    arms.push(IfArm { cond, body });

    loop {
        match kw.as_str() {
            "fi" => break,
            "elif" => {
                let (cond, _) = parse_stmts(cx, &["then"])?;
                let (body, next) = parse_stmts(cx, &["fi", "elif", "else"])?;
                arms.push(IfArm { cond, body });
                kw = next;
            }
            "else" => {
                let (body, _) = parse_stmts(cx, &["fi"])?;
                else_body = body;
                break;
            }
            _ => unreachable!(),
        }
    }

    Ok(Stmt::If { arms, else_body })
}

fn parse_for(cx: &mut Cx) -> Result<Stmt> {
    cx.skip_inline();
    let (var, end) = cx
        .peek_bare_word()
        .ok_or_else(|| cx.err("expected variable name after `for`"))?;
    cx.pos = end;

    cx.skip_inline();
    match cx.peek_bare_word() {
        Some((word, end)) if word == "in" => cx.pos = end,
        _ => return Err(cx.err("expected `in` after `for` variable")),
    }

    let mut items = Vec::new();
    loop {
        cx.skip_inline();
        match cx.peek() {
            None | Some('\n') | Some(';') => break,
            _ => {
                let word = parse_word(cx)?;
                if word.parts.is_empty() {
                    break;
                }
                items.push(word);
            }
        }
    }

    expect_keyword(cx, "do")?;
    let (body, _) = parse_stmts(cx, &["done"])?;

    Ok(Stmt::For { var, items, body })
}

fn parse_while(cx: &mut Cx) -> Result<Stmt> {
    let (cond, _) = parse_stmts(cx, &["do"])?;
    let (body, _) = parse_stmts(cx, &["done"])?;
    Ok(Stmt::While { cond, body })
}

fn expect_keyword(cx: &mut Cx, keyword: &str) -> Result<()> {
    cx.skip_separators();
    match cx.peek_bare_word() {
        Some((word, end)) if word == keyword => {
            cx.pos = end;
            Ok(())
        }
        _ => Err(cx.err(format!("expected `{keyword}`"))),
    }
}

fn parse_plain_stmt(cx: &mut Cx) -> Result<Stmt> {
    // `name=value` / `name=(…)`
    if matches!(cx.peek(), Some(c) if c.is_ascii_alphabetic() || c == '_') {
        let start = cx.pos;
        let mut name = String::new();
        while let Some(c) = cx.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                cx.bump();
            } else {
                break;
            }
        }
        if cx.eat('=') {
            let value = parse_assign_value(cx)?;
            return Ok(Stmt::Assign { name, value });
        }
        cx.pos = start;
    }

    // `name() { … }`
    if let Some(stmt) = try_parse_funcdef(cx)? {
        return Ok(stmt);
    }

    parse_list(cx)
}

fn parse_assign_value(cx: &mut Cx) -> Result<AssignValue> {
    if cx.peek() == Some('(') {
        cx.bump();
        let mut elements = Vec::new();
        loop {
            cx.skip_separators();
            match cx.peek() {
                Some(')') => {
                    cx.bump();
                    break;
                }
                None => return Err(cx.err("unterminated array literal")),
                _ => {
                    let word = parse_word(cx)?;
                    if word.parts.is_empty() {
                        return Err(cx.err("unexpected character in array literal"));
                    }
                    elements.push(word);
                }
            }
        }
        return Ok(AssignValue::Array(elements));
    }

    Ok(AssignValue::Scalar(parse_word(cx)?))
}

fn try_parse_funcdef(cx: &mut Cx) -> Result<Option<Stmt>> {
    let start = cx.pos;
    let start_line = cx.line;

    // Function names may contain characters bare words do not (e.g. `-`)
    let mut name = String::new();
    while let Some(c) = cx.peek() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
            name.push(c);
            cx.bump();
        } else {
            break;
        }
    }
    if name.is_empty() {
        cx.pos = start;
        cx.line = start_line;
        return Ok(None);
    }

    cx.skip_inline();
    if !(cx.peek() == Some('(') && cx.peek_at(1) == Some(')')) {
        cx.pos = start;
        cx.line = start_line;
        return Ok(None);
    }
    cx.bump();
    cx.bump();

    cx.skip_separators();
    if !cx.eat('{') {
        return Err(cx.err(format!("expected `{{` after `{name}()`")));
    }

    let body = scan_brace_body(cx)?;
    Ok(Some(Stmt::FuncDef { name, body }))
}

/// Capture a `{ … }` body verbatim, tracking quotes, escapes, comments,
/// and nested braces
fn scan_brace_body(cx: &mut Cx) -> Result<String> {
    let mut body = String::new();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;

    while let Some(c) = cx.bump() {
        match quote {
            Some(q) => {
                if c == '\\' && q == '"' {
                    body.push(c);
                    if let Some(next) = cx.bump() {
                        body.push(next);
                    }
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '\\' => {
                    body.push(c);
                    if let Some(next) = cx.bump() {
                        body.push(next);
                    }
                    continue;
                }
                '#' => {
                    body.push(c);
                    while let Some(n) = cx.peek() {
                        if n == '\n' {
                            break;
                        }
                        body.push(n);
                        cx.bump();
                    }
                    continue;
                }
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(body);
                    }
                }
                _ => {}
            },
        }
        body.push(c);
    }

    Err(cx.err("unterminated function body"))
}

fn parse_list(cx: &mut Cx) -> Result<Stmt> {
    let mut items = Vec::new();
    let mut op = None;

    loop {
        let command = parse_command(cx)?;
        items.push((op, command));

        cx.skip_inline();
        if cx.peek() == Some('&') && cx.peek_at(1) == Some('&') {
            cx.bump();
            cx.bump();
            op = Some(ChainOp::And);
        } else if cx.peek() == Some('|') && cx.peek_at(1) == Some('|') {
            cx.bump();
            cx.bump();
            op = Some(ChainOp::Or);
        } else if cx.peek() == Some('|') {
            cx.bump();
            op = Some(ChainOp::Pipe);
        } else {
            break;
        }
        // Continuations may start on the next line
        cx.skip_separators();
    }

    Ok(Stmt::List(CommandList { items }))
}

fn parse_command(cx: &mut Cx) -> Result<Command> {
    cx.skip_inline();

    let mut negate = false;
    if cx.peek() == Some('!') {
        if let Some(c) = cx.peek_at(1) {
            if c == ' ' || c == '\t' {
                cx.bump();
                cx.skip_inline();
                negate = true;
            }
        }
    }

    let mut words = Vec::new();
    loop {
        cx.skip_inline();
        match cx.peek() {
            None | Some('\n') | Some(';') | Some('&') | Some('|') | Some(')') => break,
            Some('#') => {
                while let Some(c) = cx.peek() {
                    if c == '\n' {
                        break;
                    }
                    cx.bump();
                }
                break;
            }
            Some(c) if c == '<' || c == '>' || (c.is_ascii_digit() && is_redirect(cx)) => {
                consume_redirect(cx)?;
            }
            _ => {
                let word = parse_word(cx)?;
                if word.parts.is_empty() {
                    return Err(cx.err(format!(
                        "unexpected character `{}`",
                        cx.peek().unwrap_or(' ')
                    )));
                }
                words.push(word);
            }
        }
    }

    if words.is_empty() && !negate {
        return Err(cx.err("expected a command"));
    }

    Ok(Command { negate, words })
}

/// At a digit: is this `N>` / `N<` rather than a word starting with a digit?
fn is_redirect(cx: &Cx) -> bool {
    let mut offset = 0;
    while let Some(c) = cx.peek_at(offset) {
        if c.is_ascii_digit() {
            offset += 1;
        } else {
            return c == '>' || c == '<';
        }
    }
    false
}

/// Discard a redirection: stdio is bound to sinks, so targets never matter
fn consume_redirect(cx: &mut Cx) -> Result<()> {
    while matches!(cx.peek(), Some(c) if c.is_ascii_digit()) {
        cx.bump();
    }
    let direction = cx.bump();
    if direction == Some('>') && cx.peek() == Some('>') {
        cx.bump();
    }
    if cx.eat('&') {
        // `>&1` / `>&-` forms carry their target inline
        while matches!(cx.peek(), Some(c) if c.is_ascii_digit() || c == '-') {
            cx.bump();
        }
        return Ok(());
    }
    cx.skip_inline();
    // Target word, discarded
    parse_word(cx)?;
    Ok(())
}

fn parse_word(cx: &mut Cx) -> Result<Word> {
    let mut parts = Vec::new();

    loop {
        match cx.peek() {
            None => break,
            Some(c) if " \t\n;&|()<>".contains(c) => break,
            Some('\'') => {
                cx.bump();
                let mut text = String::new();
                loop {
                    match cx.bump() {
                        Some('\'') => break,
                        Some(c) => text.push(c),
                        None => return Err(cx.err("unterminated single quote")),
                    }
                }
                parts.push(WordPart::SingleQuoted(text));
            }
            Some('"') => {
                cx.bump();
                parts.push(WordPart::DoubleQuoted(parse_double_quoted(cx)?));
            }
            Some('$') => parts.push(parse_dollar(cx)?),
            Some('`') => parts.push(parse_backtick(cx)?),
            Some('\\') => {
                cx.bump();
                match cx.bump() {
                    Some('\n') => {}
                    Some(c) => push_literal(&mut parts, c),
                    None => push_literal(&mut parts, '\\'),
                }
            }
            Some(c) => {
                cx.bump();
                push_literal(&mut parts, c);
            }
        }
    }

    Ok(Word { parts })
}

fn push_literal(parts: &mut Vec<WordPart>, c: char) {
    if let Some(WordPart::Literal(text)) = parts.last_mut() {
        text.push(c);
    } else {
        parts.push(WordPart::Literal(c.to_string()));
    }
}

fn parse_double_quoted(cx: &mut Cx) -> Result<Vec<WordPart>> {
    let mut parts = Vec::new();

    loop {
        match cx.peek() {
            None => return Err(cx.err("unterminated double quote")),
            Some('"') => {
                cx.bump();
                break;
            }
            Some('\\') => {
                cx.bump();
                match cx.bump() {
                    Some(c) if "\"\\$`".contains(c) => push_literal(&mut parts, c),
                    Some('\n') => {}
                    Some(c) => {
                        push_literal(&mut parts, '\\');
                        push_literal(&mut parts, c);
                    }
                    None => return Err(cx.err("unterminated double quote")),
                }
            }
            Some('$') => parts.push(parse_dollar(cx)?),
            Some('`') => parts.push(parse_backtick(cx)?),
            Some(c) => {
                cx.bump();
                push_literal(&mut parts, c);
            }
        }
    }

    Ok(parts)
}

fn parse_dollar(cx: &mut Cx) -> Result<WordPart> {
    cx.bump(); // `$`

    match cx.peek() {
        Some('(') if cx.peek_at(1) == Some('(') => {
            // Arithmetic is outside the metadata surface; expands empty
            cx.bump();
            cx.bump();
            let mut depth = 2usize;
            while let Some(c) = cx.bump() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(WordPart::Literal(String::new()));
                        }
                    }
                    _ => {}
                }
            }
            Err(cx.err("unterminated arithmetic expansion"))
        }
        Some('(') => {
            cx.bump();
            let content = scan_balanced(cx, '(', ')')?;
            let script = Parser.parse(&content, cx.file)?;
            Ok(WordPart::CmdSubst(script))
        }
        Some('{') => {
            cx.bump();
            let content = scan_balanced(cx, '{', '}')?;
            parse_braced_expansion(cx, &content)
        }
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            let mut name = String::new();
            while let Some(c) = cx.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    cx.bump();
                } else {
                    break;
                }
            }
            Ok(WordPart::Var {
                name,
                op: VarOp::None,
            })
        }
        Some('?') => {
            cx.bump();
            Ok(WordPart::Var {
                name: "?".to_string(),
                op: VarOp::None,
            })
        }
        Some(c) if "@*#!$0123456789-".contains(c) => {
            // Positional and special parameters are empty in a recipe
            cx.bump();
            Ok(WordPart::Literal(String::new()))
        }
        _ => Ok(WordPart::Literal("$".to_string())),
    }
}

fn parse_backtick(cx: &mut Cx) -> Result<WordPart> {
    cx.bump(); // opening backtick
    let mut content = String::new();
    loop {
        match cx.bump() {
            Some('\\') => match cx.bump() {
                Some(c) if c == '`' || c == '\\' || c == '$' => content.push(c),
                Some(c) => {
                    content.push('\\');
                    content.push(c);
                }
                None => return Err(cx.err("unterminated command substitution")),
            },
            Some('`') => break,
            Some(c) => content.push(c),
            None => return Err(cx.err("unterminated command substitution")),
        }
    }
    let script = Parser.parse(&content, cx.file)?;
    Ok(WordPart::CmdSubst(script))
}

/// Consume until the matching close delimiter, respecting quotes, escapes,
/// and nesting; the close delimiter is consumed but not returned
fn scan_balanced(cx: &mut Cx, open: char, close: char) -> Result<String> {
    let mut content = String::new();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;

    while let Some(c) = cx.bump() {
        match quote {
            Some(q) => {
                if c == '\\' && q == '"' {
                    content.push(c);
                    if let Some(next) = cx.bump() {
                        content.push(next);
                    }
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '\\' {
                    content.push(c);
                    if let Some(next) = cx.bump() {
                        content.push(next);
                    }
                    continue;
                }
                if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(content);
                    }
                }
            }
        }
        content.push(c);
    }

    Err(cx.err(format!("unterminated `{open}…{close}`")))
}

/// Interpret the content of a `${…}` expansion
fn parse_braced_expansion(cx: &Cx, content: &str) -> Result<WordPart> {
    let name_len = content
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    let name: String = content.chars().take(name_len).collect();
    let rest: String = content.chars().skip(name_len).collect();

    if name.is_empty() {
        return Err(cx.err(format!("bad substitution: ${{{content}}}")));
    }

    let op = if rest.is_empty() {
        VarOp::None
    } else if let Some(arg) = rest.strip_prefix(":-").or_else(|| rest.strip_prefix('-')) {
        VarOp::Default(Box::new(parse_sub_word(cx, arg)?))
    } else if let Some(arg) = rest.strip_prefix("##") {
        VarOp::TrimPrefix {
            pattern: Box::new(parse_sub_word(cx, arg)?),
            longest: true,
        }
    } else if let Some(arg) = rest.strip_prefix('#') {
        VarOp::TrimPrefix {
            pattern: Box::new(parse_sub_word(cx, arg)?),
            longest: false,
        }
    } else if let Some(arg) = rest.strip_prefix("%%") {
        VarOp::TrimSuffix {
            pattern: Box::new(parse_sub_word(cx, arg)?),
            longest: true,
        }
    } else if let Some(arg) = rest.strip_prefix('%') {
        VarOp::TrimSuffix {
            pattern: Box::new(parse_sub_word(cx, arg)?),
            longest: false,
        }
    } else {
        return Err(cx.err(format!("bad substitution: ${{{content}}}")));
    };

    Ok(WordPart::Var { name, op })
}

/// Parse an operand inside `${…}` as a standalone word
fn parse_sub_word(cx: &Cx, text: &str) -> Result<Word> {
    let mut sub = Cx::new(text, cx.file);
    let word = parse_word(&mut sub)?;
    if sub.peek().is_some() {
        return Err(cx.err(format!("bad substitution operand: {text}")));
    }
    Ok(word)
}
