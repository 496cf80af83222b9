//! Cache key templates.
//!
//! A template such as `data/district_%(dist_id)s.json` names the file a
//! memoized result lives in. Placeholders are resolved against the arguments
//! of the call being memoized, bound to the declared [`Signature`] the same
//! way a function call binds them: positionals in declaration order, then
//! keywords by name, then defaults for whatever is left.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TemplateError;

/// Name of the implicit parameter every template may reference.
///
/// It is bound to the root directory of the memoization context.
pub const SELF_PARAM: &str = "self";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// Parses `%(name)s` placeholders, `%%` being a literal percent sign.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let malformed = |offset: usize, reason: &str| TemplateError::Malformed {
            template: source.to_string(),
            offset,
            reason: reason.to_string(),
        };

        let mut segments = vec![];
        let mut literal = String::new();
        let mut chars = source.char_indices();

        while let Some((offset, c)) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some((_, '%')) => literal.push('%'),
                Some((_, '(')) => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ')')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(malformed(offset, "unterminated placeholder")),
                        }
                    }
                    if name.is_empty() {
                        return Err(malformed(offset, "empty placeholder name"));
                    }
                    match chars.next() {
                        Some((_, 's')) => (),
                        Some((_, c)) => {
                            return Err(malformed(offset, &format!("unsupported conversion '{c}'")))
                        }
                        None => return Err(malformed(offset, "missing conversion")),
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                _ => return Err(malformed(offset, "expected '(' or '%' after '%'")),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Fails if a placeholder can never be resolved by calls to `signature`.
    pub fn check(&self, signature: &Signature) -> Result<(), TemplateError> {
        match self
            .placeholders()
            .find(|name| *name != SELF_PARAM && !signature.contains(name))
        {
            Some(name) => Err(TemplateError::UnknownPlaceholder {
                template: self.source.clone(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn resolve(&self, bindings: &Bindings) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(name) => {
                    let value =
                        bindings
                            .get(name)
                            .ok_or_else(|| TemplateError::UnknownPlaceholder {
                                template: self.source.clone(),
                                name: name.clone(),
                            })?;
                    out.push_str(&render(value));
                }
            }
        }
        Ok(out)
    }
}

impl FromStr for KeyTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolves `template` for a single call, see [`Signature::bind`].
///
/// [`SELF_PARAM`] is bound to `root`, as a memoized call binds it to the
/// root of its context.
pub fn resolve(
    template: &str,
    root: &Path,
    signature: &Signature,
    args: &Args,
) -> Result<String, TemplateError> {
    let template = KeyTemplate::parse(template)?;
    template.check(signature)?;
    let bindings = signature.bind(args)?.with_root(root);
    template.resolve(&bindings)
}

#[derive(Debug, Clone, PartialEq)]
struct Param {
    name: String,
    default: Option<Value>,
}

/// Declared parameters of a memoized operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn bind(&self, args: &Args) -> Result<Bindings, TemplateError> {
        if args.positional.len() > self.params.len() {
            return Err(TemplateError::TooManyArguments {
                expected: self.params.len(),
                got: args.positional.len(),
            });
        }

        let mut values = BTreeMap::new();
        for (param, value) in self.params.iter().zip(&args.positional) {
            values.insert(param.name.clone(), value.clone());
        }

        for (name, value) in &args.keyword {
            if !self.contains(name) {
                return Err(TemplateError::UnknownArgument { name: name.clone() });
            }
            if values.insert(name.clone(), value.clone()).is_some() {
                return Err(TemplateError::DuplicateArgument { name: name.clone() });
            }
        }

        for param in &self.params {
            if values.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    values.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(TemplateError::MissingArgument {
                        name: param.name.clone(),
                    })
                }
            }
        }

        Ok(Bindings { values })
    }
}

/// Arguments of one call, before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }
}

/// Parameter name to value mapping of one bound call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_as<T>(&self, name: &str) -> Result<T, TemplateError>
    where
        T: DeserializeOwned,
    {
        let value = self
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::MissingArgument {
                name: name.to_string(),
            })?;
        serde_json::from_value(value).map_err(|e| TemplateError::ArgumentType {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Binds [`SELF_PARAM`] unless the signature declared it explicitly.
    pub(crate) fn with_self(mut self, value: Value) -> Self {
        self.values.entry(SELF_PARAM.to_string()).or_insert(value);
        self
    }

    pub(crate) fn with_root(self, root: &Path) -> Self {
        self.with_self(Value::from(root.display().to_string()))
    }
}
