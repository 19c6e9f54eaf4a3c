//! Minimal kernel source scanner for the host runtime.
//!
//! Only what the host runtime needs is recognised: comment stripping, bracket
//! balance, `__kernel void name(params)` declarations and `-D` options.

use std::collections::HashMap;

/// A `__kernel` function found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDecl {
    pub name: String,
    pub arg_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Punct(char),
}

/// Replaces comments with whitespace, keeping line structure.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            let mut ident = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else if c.is_whitespace() {
            chars.next();
        } else {
            tokens.push(Token::Punct(c));
            chars.next();
        }
    }
    tokens
}

/// Checks bracket balance, reporting the first problem as a compiler-style line.
fn check_balance(source: &str) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (line_no, line) in source.lines().enumerate() {
        for c in line.chars() {
            match c {
                '(' | '{' | '[' => stack.push((c, line_no + 1)),
                ')' | '}' | ']' => {
                    let open = match c {
                        ')' => '(',
                        '}' => '{',
                        _ => '[',
                    };
                    match stack.pop() {
                        Some((o, _)) if o == open => {}
                        _ => {
                            return Err(format!(
                                "<source>:{}: error: unexpected '{}'",
                                line_no + 1,
                                c
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    match stack.pop() {
        Some((open, line)) => Err(format!(
            "<source>:{}: error: '{}' is never closed",
            line, open
        )),
        None => Ok(()),
    }
}

/// Counts top-level comma separated parameters between `tokens[start]` (the
/// opening parenthesis) and its matching close.
fn count_params(tokens: &[Token], start: usize) -> Option<u32> {
    let mut depth = 0usize;
    let mut count = 0u32;
    let mut seen_any = false;
    let mut only_void = true;

    for token in &tokens[start..] {
        match token {
            Token::Punct('(') => {
                depth += 1;
                if depth > 1 {
                    seen_any = true;
                    only_void = false;
                }
            }
            Token::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    if !seen_any || only_void {
                        return Some(0);
                    }
                    return Some(count + 1);
                }
            }
            Token::Punct(',') if depth == 1 => count += 1,
            Token::Ident(id) => {
                seen_any = true;
                if id != "void" {
                    only_void = false;
                }
            }
            Token::Punct(_) => {
                seen_any = true;
                only_void = false;
            }
        }
    }
    None
}

/// Finds every `__kernel void name(...)` declaration.
pub fn scan_kernels(source: &str) -> Result<Vec<KernelDecl>, String> {
    let source = strip_comments(source);
    check_balance(&source)?;

    let tokens = tokenize(&source);
    let mut kernels = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let is_kernel_kw = matches!(&tokens[i], Token::Ident(id) if id == "__kernel" || id == "kernel");
        if !is_kernel_kw {
            i += 1;
            continue;
        }

        // skip attributes such as __attribute__((reqd_work_group_size(...)))
        let mut j = i + 1;
        while let Some(Token::Ident(id)) = tokens.get(j) {
            if id == "void" {
                break;
            }
            if id == "__attribute__" {
                let mut depth = 0usize;
                j += 1;
                while let Some(t) = tokens.get(j) {
                    match t {
                        Token::Punct('(') => depth += 1,
                        Token::Punct(')') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
            }
            j += 1;
        }

        let name = match (tokens.get(j), tokens.get(j + 1), tokens.get(j + 2)) {
            (Some(Token::Ident(v)), Some(Token::Ident(name)), Some(Token::Punct('(')))
                if v == "void" =>
            {
                name.clone()
            }
            _ => {
                return Err(
                    "<source>: error: kernel functions must be declared as '__kernel void name(...)'"
                        .to_string(),
                );
            }
        };

        let arg_count = count_params(&tokens, j + 2)
            .ok_or_else(|| format!("<source>: error: unterminated parameter list in '{}'", name))?;

        kernels.push(KernelDecl { name, arg_count });
        i = j + 3;
    }

    Ok(kernels)
}

/// Extracts `-DNAME=VALUE`, `-D NAME=VALUE` and `-DNAME` macro definitions.
pub fn parse_defines(options: &str) -> HashMap<String, String> {
    let mut defines = HashMap::new();
    let mut parts = options.split_whitespace();

    while let Some(part) = parts.next() {
        let Some(rest) = part.strip_prefix("-D") else {
            continue;
        };
        let def = if rest.is_empty() {
            match parts.next() {
                Some(next) => next,
                None => break,
            }
        } else {
            rest
        };
        match def.split_once('=') {
            Some((name, value)) => defines.insert(name.to_string(), value.to_string()),
            None => defines.insert(def.to_string(), "1".to_string()),
        };
    }
    defines
}
