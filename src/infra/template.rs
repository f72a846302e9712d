//! # Command Template Module / 命令模板模块
//!
//! Command templates are shell-like strings with `{placeholder}` slots, e.g.
//! `{python} -m pip install torch=={framework} -f {cpu_index_url}`.
//! Rendering splits the template with `shlex`, expands `~` and `$VARS` with
//! `shellexpand`, then fills placeholders. A token that is exactly one
//! list-valued placeholder is spliced into several arguments. `{{` and `}}`
//! produce literal braces.
//!
//! 命令模板是带有 `{placeholder}` 占位符的类 shell 字符串。
//! 渲染时先用 `shlex` 切分，再用 `shellexpand` 展开 `~` 和 `$VARS`，最后填充占位符。
//! 恰好由一个列表型占位符构成的 token 会被展开为多个参数。

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unbalanced quotes")]
    UnbalancedQuotes,
    #[error("renders to an empty command")]
    Empty,
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("environment expansion failed: {0}")]
    Expand(String),
}

/// Value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    One(String),
    Many(Vec<String>),
}

/// Placeholder bindings for one render.
/// 一次渲染使用的占位符绑定。
#[derive(Debug, Clone, Default)]
pub struct TemplateVars(BTreeMap<&'static str, TemplateValue>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<String>) -> &mut Self {
        self.0.insert(name, TemplateValue::One(value.into()));
        self
    }

    pub fn set_many(&mut self, name: &'static str, values: Vec<String>) -> &mut Self {
        self.0.insert(name, TemplateValue::Many(values));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.0.get(name)
    }
}

enum Piece<'a> {
    Literal(String),
    Slot(&'a str),
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn pieces(template: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < template.len() {
        let rest = &template[i..];
        if rest.starts_with("{{") {
            literal.push('{');
            i += 2;
        } else if rest.starts_with("}}") {
            literal.push('}');
            i += 2;
        } else if bytes[i] == b'{' {
            let name_len = rest[1..].chars().take_while(|c| is_ident(*c)).count();
            if name_len > 0 && rest[1 + name_len..].starts_with('}') {
                if !literal.is_empty() {
                    out.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                out.push(Piece::Slot(&rest[1..1 + name_len]));
                i += name_len + 2;
            } else {
                literal.push('{');
                i += 1;
            }
        } else {
            // Multi-byte characters are copied whole.
            let ch = rest.chars().next().unwrap_or_default();
            literal.push(ch);
            i += ch.len_utf8();
        }
    }
    if !literal.is_empty() {
        out.push(Piece::Literal(literal));
    }
    out
}

/// Lists the placeholder names a template references, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    pieces(template)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Slot(name) => Some(name.to_string()),
            Piece::Literal(_) => None,
        })
        .collect()
}

/// Checks a template parses and only references `known` placeholders.
pub fn check(template: &str, known: &[&str]) -> Result<(), TemplateError> {
    shlex::split(template).ok_or(TemplateError::UnbalancedQuotes)?;
    match placeholders(template).into_iter().find(|p| !known.contains(&p.as_str())) {
        Some(unknown) => Err(TemplateError::UnknownPlaceholder(unknown)),
        None => Ok(()),
    }
}

/// Fills placeholders in a plain string (no splitting); list values are space-joined.
pub fn render_str(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::new();
    for piece in pieces(template) {
        match piece {
            Piece::Literal(text) => out.push_str(&text),
            Piece::Slot(name) => match vars.get(name) {
                Some(TemplateValue::One(value)) => out.push_str(value),
                Some(TemplateValue::Many(values)) => out.push_str(&values.join(" ")),
                None => return Err(TemplateError::UnknownPlaceholder(name.to_string())),
            },
        }
    }
    Ok(out)
}

/// Renders a command template into an argv vector.
/// 将命令模板渲染为 argv 向量。
pub fn render_command(template: &str, vars: &TemplateVars) -> Result<Vec<String>, TemplateError> {
    let tokens = shlex::split(template).ok_or(TemplateError::UnbalancedQuotes)?;
    let mut argv = Vec::with_capacity(tokens.len());

    for token in tokens {
        let expanded = shellexpand::full(&token)
            .map_err(|e| TemplateError::Expand(e.to_string()))?
            .into_owned();

        let slots = pieces(&expanded);
        if let [Piece::Slot(name)] = slots.as_slice() {
            if let Some(TemplateValue::Many(values)) = vars.get(name) {
                argv.extend(values.iter().cloned());
                continue;
            }
        }
        argv.push(render_str(&expanded, vars)?);
    }

    if argv.is_empty() {
        return Err(TemplateError::Empty);
    }
    Ok(argv)
}
