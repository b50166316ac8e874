use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One JSON Patch (RFC 6902) operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

impl fmt::Display for PatchOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchOpKind::Add => "add",
            PatchOpKind::Remove => "remove",
            PatchOpKind::Replace => "replace",
            PatchOpKind::Move => "move",
            PatchOpKind::Copy => "copy",
            PatchOpKind::Test => "test",
        };
        f.write_str(name)
    }
}

impl PatchOperation {
    pub fn kind(&self) -> PatchOpKind {
        match self {
            PatchOperation::Add { .. } => PatchOpKind::Add,
            PatchOperation::Remove { .. } => PatchOpKind::Remove,
            PatchOperation::Replace { .. } => PatchOpKind::Replace,
            PatchOperation::Move { .. } => PatchOpKind::Move,
            PatchOperation::Copy { .. } => PatchOpKind::Copy,
            PatchOperation::Test { .. } => PatchOpKind::Test,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Move { path, .. }
            | PatchOperation::Copy { path, .. }
            | PatchOperation::Test { path, .. } => path,
        }
    }
}

/// A rejected batch: which op failed, where, and why.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("patch op #{index} ({op}) at '{path}' failed: {kind}")]
pub struct PatchError {
    pub index: usize,
    pub op: PatchOpKind,
    pub path: String,
    pub kind: PatchErrorKind,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchErrorKind {
    /// A `test` op did not hold. This is a precondition, not a structural fault.
    #[error("test failed: expected {expected}")]
    TestFailed {
        expected: Value,
        actual: Option<Value>,
    },
    #[error("path not found")]
    PathNotFound,
    #[error("invalid JSON pointer: {0}")]
    InvalidPointer(String),
    #[error("invalid array index '{0}'")]
    InvalidIndex(String),
    #[error("target parent is neither an object nor an array")]
    NotAContainer,
    #[error("cannot move a value into one of its own descendants")]
    MoveIntoDescendant,
}

impl PatchError {
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self.kind, PatchErrorKind::TestFailed { .. })
    }
}

type OpResult<T> = Result<T, (String, PatchErrorKind)>;

/// Apply `ops` in order to a copy of `state`.
///
/// All-or-nothing: the first failing op aborts the batch and `state` is never touched.
pub fn apply_patches(state: &Value, ops: &[PatchOperation]) -> Result<Value, PatchError> {
    let mut working = state.clone();
    for (index, op) in ops.iter().enumerate() {
        apply_operation(&mut working, op).map_err(|(path, kind)| PatchError {
            index,
            op: op.kind(),
            path,
            kind,
        })?;
    }
    Ok(working)
}

fn apply_operation(doc: &mut Value, op: &PatchOperation) -> OpResult<()> {
    match op {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOperation::Replace { path, value } => {
            let tokens = parse_pointer(path)?;
            let slot = lookup_mut(doc, &tokens).ok_or_else(|| not_found(path))?;
            *slot = value.clone();
            Ok(())
        }
        PatchOperation::Move { from, path } => {
            if from == path {
                return Ok(());
            }
            if path.starts_with(&format!("{from}/")) {
                return Err((path.clone(), PatchErrorKind::MoveIntoDescendant));
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOperation::Copy { from, path } => {
            let tokens = parse_pointer(from)?;
            let value = lookup(doc, &tokens).cloned().ok_or_else(|| not_found(from))?;
            add(doc, path, value)
        }
        PatchOperation::Test { path, value } => {
            let tokens = parse_pointer(path)?;
            let actual = lookup(doc, &tokens);
            if actual == Some(value) {
                Ok(())
            } else {
                Err((
                    path.clone(),
                    PatchErrorKind::TestFailed {
                        expected: value.clone(),
                        actual: actual.cloned(),
                    },
                ))
            }
        }
    }
}

fn add(doc: &mut Value, path: &str, value: Value) -> OpResult<()> {
    let mut tokens = parse_pointer(path)?;
    let Some(last) = tokens.pop() else {
        *doc = value;
        return Ok(());
    };
    let parent = lookup_mut(doc, &tokens).ok_or_else(|| not_found(path))?;
    match parent {
        Value::Object(map) => {
            map.insert(last, value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(&last)
                .ok_or_else(|| (path.to_string(), PatchErrorKind::InvalidIndex(last.clone())))?;
            if index > items.len() {
                return Err((path.to_string(), PatchErrorKind::InvalidIndex(last)));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err((path.to_string(), PatchErrorKind::NotAContainer)),
    }
}

fn remove(doc: &mut Value, path: &str) -> OpResult<Value> {
    let mut tokens = parse_pointer(path)?;
    let Some(last) = tokens.pop() else {
        return Err((
            path.to_string(),
            PatchErrorKind::InvalidPointer("cannot remove the document root".to_string()),
        ));
    };
    let parent = lookup_mut(doc, &tokens).ok_or_else(|| not_found(path))?;
    match parent {
        Value::Object(map) => map.remove(&last).ok_or_else(|| not_found(path)),
        Value::Array(items) => {
            let index = parse_index(&last)
                .ok_or_else(|| (path.to_string(), PatchErrorKind::InvalidIndex(last.clone())))?;
            if index >= items.len() {
                return Err(not_found(path));
            }
            Ok(items.remove(index))
        }
        _ => Err((path.to_string(), PatchErrorKind::NotAContainer)),
    }
}

fn lookup<'a>(doc: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    tokens.iter().try_fold(doc, |current, token| match current {
        Value::Object(map) => map.get(token),
        Value::Array(items) => parse_index(token).and_then(|index| items.get(index)),
        _ => None,
    })
}

fn lookup_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    tokens.iter().try_fold(doc, |current, token| match current {
        Value::Object(map) => map.get_mut(token),
        Value::Array(items) => parse_index(token).and_then(move |index| items.get_mut(index)),
        _ => None,
    })
}

/// Split an RFC 6901 pointer into unescaped reference tokens.
fn parse_pointer(path: &str) -> OpResult<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err((
            path.to_string(),
            PatchErrorKind::InvalidPointer("pointer must start with '/'".to_string()),
        ));
    };
    rest.split('/')
        .map(|token| {
            unescape_token(token).ok_or_else(|| {
                (
                    path.to_string(),
                    PatchErrorKind::InvalidPointer(format!("bad escape in '{token}'")),
                )
            })
        })
        .collect()
}

fn unescape_token(token: &str) -> Option<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return None,
        }
    }
    Some(out)
}

fn parse_index(token: &str) -> Option<usize> {
    let canonical = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if canonical {
        token.parse().ok()
    } else {
        None
    }
}

fn not_found(path: &str) -> (String, PatchErrorKind) {
    (path.to_string(), PatchErrorKind::PathNotFound)
}
