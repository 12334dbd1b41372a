//! Field value generators.
//!
//! Workloads bind generated values into their prepared statements through
//! a named registry. Each profile carries a default generator per field;
//! the user may override any of them with `--field <table>.<column>=<fn>(args)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::driver::Value;

/// A (table, column) pair identifying a generated field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub table: String,
    pub column: String,
}

impl Field {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// One argument of a generator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorArg {
    Int(u64),
    Str(String),
}

/// A named generator invocation, e.g. `book(5,10)` or `sequence(user)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSpec {
    pub name: String,
    pub args: Vec<GeneratorArg>,
}

impl GeneratorSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    pub fn with_args(name: &str, args: &[u64]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().copied().map(GeneratorArg::Int).collect(),
        }
    }

    /// Parses `<fn>`, `<fn>()` or `<fn>(a,b,...)`. Numeric arguments
    /// become `Int`, everything else `Str`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        let Some(open) = trimmed.find('(') else {
            if trimmed.is_empty() {
                return Err("empty generator".to_string());
            }
            return Ok(Self::named(trimmed));
        };

        if !trimmed.ends_with(')') {
            return Err(format!("unbalanced parentheses in '{}'", trimmed));
        }

        let name = &trimmed[..open];
        if name.is_empty() {
            return Err(format!("missing generator name in '{}'", trimmed));
        }

        let inner = &trimmed[open + 1..trimmed.len() - 1];
        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|a| {
                    let arg = a.trim();
                    if arg.is_empty() {
                        return Err(format!("empty argument in '{}'", trimmed));
                    }
                    Ok(arg
                        .parse::<u64>()
                        .map(GeneratorArg::Int)
                        .unwrap_or_else(|_| GeneratorArg::Str(arg.to_string())))
                })
                .collect::<Result<Vec<GeneratorArg>, String>>()?
        };

        Ok(Self {
            name: name.to_string(),
            args,
        })
    }
}

/// Parses a `--field <table>.<column>=<fn>(args)` override.
pub fn parse_field_override(input: &str) -> Result<(Field, GeneratorSpec), String> {
    let (target, spec) = input
        .split_once('=')
        .ok_or_else(|| format!("expected <table>.<column>=<fn>(args), got '{}'", input))?;
    let (table, column) = target
        .split_once('.')
        .ok_or_else(|| format!("expected <table>.<column> before '=', got '{}'", target))?;
    if table.is_empty() || column.is_empty() {
        return Err(format!("expected <table>.<column> before '=', got '{}'", target));
    }
    Ok((Field::new(table, column), GeneratorSpec::parse(spec)?))
}

/// Produces values for one field. Instances are per-thread; they are not
/// shared across workers.
pub trait FieldGenerator: Send {
    fn generate(&mut self) -> Value;
}

struct RandomString {
    min: usize,
    max: usize,
}

impl FieldGenerator for RandomString {
    fn generate(&mut self) -> Value {
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(self.min..=self.max);
        let text: String = (0..len)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect();
        Value::Text(text)
    }
}

struct BookText {
    min_words: usize,
    max_words: usize,
}

impl FieldGenerator for BookText {
    fn generate(&mut self) -> Value {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(self.min_words..=self.max_words);
        let words: Vec<&str> = (0..count)
            .map(|_| BOOK_WORDS[rng.gen_range(0..BOOK_WORDS.len())])
            .collect();
        Value::Text(words.join(" "))
    }
}

struct Choice {
    list: &'static [&'static str],
}

impl FieldGenerator for Choice {
    fn generate(&mut self) -> Value {
        let mut rng = rand::thread_rng();
        Value::Text(self.list[rng.gen_range(0..self.list.len())].to_string())
    }
}

/// Monotonic counter rendered as `<prefix><n>`. The counter is shared by
/// every runner generating the same field, so values stay unique and
/// increasing per column for the whole run.
struct Sequence {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl FieldGenerator for Sequence {
    fn generate(&mut self) -> Value {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Value::Text(format!("{}{}", self.prefix, n))
    }
}

const BOOK_WORDS: &[&str] = &[
    "call", "me", "ishmael", "some", "years", "ago", "never", "mind", "how", "long", "precisely",
    "having", "little", "or", "no", "money", "in", "my", "purse", "and", "nothing", "particular",
    "to", "interest", "on", "shore", "i", "thought", "would", "sail", "about", "a", "see", "the",
    "watery", "part", "of", "world", "it", "is", "way", "have", "driving", "off", "spleen",
    "regulating", "circulation", "whenever", "find", "myself", "growing", "grim", "mouth",
];

const FIRST_NAMES: &[&str] = &[
    "james", "mary", "robert", "patricia", "john", "jennifer", "michael", "linda", "david",
    "elizabeth", "william", "barbara", "richard", "susan", "joseph", "jessica", "thomas", "sarah",
];

const LAST_NAMES: &[&str] = &[
    "smith", "johnson", "williams", "brown", "jones", "garcia", "miller", "davis", "rodriguez",
    "martinez", "hernandez", "lopez", "gonzalez", "wilson", "anderson", "taylor",
];

const CITIES: &[&str] = &[
    "tokyo", "delhi", "shanghai", "dhaka", "saopaulo", "cairo", "mexicocity", "beijing", "mumbai",
    "osaka", "chongqing", "karachi", "kinshasa", "lagos", "istanbul", "buenosaires",
];

/// One entry of the generator catalog, surfaced by the `fields` command.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

const CATALOG: &[FieldDescriptor] = &[
    FieldDescriptor {
        name: "random",
        description: "random alphanumeric string, args: (min_len, max_len), default (20, 40)",
    },
    FieldDescriptor {
        name: "book",
        description: "words sampled from book text, args: (min_words, max_words), default (5, 10)",
    },
    FieldDescriptor {
        name: "sequence",
        description: "monotonic per-column counter with an optional prefix, e.g. sequence(user)",
    },
    FieldDescriptor {
        name: "firstname",
        description: "a first name",
    },
    FieldDescriptor {
        name: "lastname",
        description: "a last name",
    },
    FieldDescriptor {
        name: "city",
        description: "a city name",
    },
];

/// Returns the catalog of available generator functions.
pub fn field_catalog() -> &'static [FieldDescriptor] {
    CATALOG
}

fn build(
    spec: &GeneratorSpec,
    sequence_counter: Arc<AtomicU64>,
) -> Result<Box<dyn FieldGenerator>, String> {
    fn range_args(spec: &GeneratorSpec, default: (u64, u64)) -> Result<(usize, usize), String> {
        let ints = spec
            .args
            .iter()
            .map(|arg| match arg {
                GeneratorArg::Int(n) => Ok(*n),
                GeneratorArg::Str(s) => Err(format!(
                    "generator '{}' expects numeric arguments, got '{}'",
                    spec.name, s
                )),
            })
            .collect::<Result<Vec<u64>, String>>()?;
        let (min, max) = match ints.as_slice() {
            [] => default,
            [min, max] => (*min, *max),
            _ => {
                return Err(format!(
                    "generator '{}' takes 0 or 2 arguments",
                    spec.name
                ));
            }
        };
        if min > max {
            return Err(format!(
                "generator '{}': min {} exceeds max {}",
                spec.name, min, max
            ));
        }
        Ok((min as usize, max as usize))
    }

    match spec.name.as_str() {
        "random" => {
            let (min, max) = range_args(spec, (20, 40))?;
            Ok(Box::new(RandomString { min, max }))
        }
        "book" => {
            let (min_words, max_words) = range_args(spec, (5, 10))?;
            Ok(Box::new(BookText {
                min_words,
                max_words,
            }))
        }
        "sequence" => {
            let prefix = match spec.args.as_slice() {
                [] => String::new(),
                [GeneratorArg::Str(s)] => s.clone(),
                [GeneratorArg::Int(n)] => n.to_string(),
                _ => {
                    return Err("generator 'sequence' takes at most one argument".to_string());
                }
            };
            Ok(Box::new(Sequence {
                prefix,
                counter: sequence_counter,
            }))
        }
        "firstname" => Ok(Box::new(Choice { list: FIRST_NAMES })),
        "lastname" => Ok(Box::new(Choice { list: LAST_NAMES })),
        "city" => Ok(Box::new(Choice { list: CITIES })),
        other => Err(format!("unknown field generator '{}'", other)),
    }
}

/// Per-run field generator registry: profile defaults plus user overrides.
///
/// Sequence counters are keyed by field and shared across every runner
/// resolving that field.
#[derive(Default)]
pub struct FieldRegistry {
    defaults: HashMap<Field, GeneratorSpec>,
    overrides: HashMap<Field, GeneratorSpec>,
    sequences: Mutex<HashMap<Field, Arc<AtomicU64>>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile-declared default for a field.
    pub fn set_default(&mut self, field: Field, spec: GeneratorSpec) {
        self.defaults.insert(field, spec);
    }

    /// Registers a user override. The spec is validated eagerly so that
    /// bad input fails before any thread starts.
    pub fn set_override(&mut self, field: Field, spec: GeneratorSpec) -> Result<(), String> {
        build(&spec, Arc::new(AtomicU64::new(0)))?;
        self.overrides.insert(field, spec);
        Ok(())
    }

    /// Instantiates the generator for a field: override, then profile
    /// default, then a plain `random`.
    pub fn resolve(&self, field: &Field) -> Result<Box<dyn FieldGenerator>, String> {
        let spec = self
            .overrides
            .get(field)
            .or_else(|| self.defaults.get(field))
            .cloned()
            .unwrap_or_else(|| GeneratorSpec::named("random"));
        let counter = if spec.name == "sequence" {
            Arc::clone(
                self.sequences
                    .lock()
                    .entry(field.clone())
                    .or_default(),
            )
        } else {
            Arc::new(AtomicU64::new(0))
        };
        build(&spec, counter).map_err(|e| format!("field {}: {}", field, e))
    }
}
