//! Compaction option shortcuts for schema DDL.
//!
//! Accepts either a shortcut of the form `<strategy>(,<arg>)*` or a full
//! CQL map literal. Shortcuts:
//! - `stcs[,min_threshold,max_threshold]` - SizeTieredCompactionStrategy
//! - `lcs[,sstable_size_in_mb[,fanout_size]]` - LeveledCompactionStrategy
//! - `twcs[,window_size,window_unit]` - TimeWindowCompactionStrategy
//! - `ucs[,scaling_parameters...]` - UnifiedCompactionStrategy
//!
//! Anything that does not start with a known shortcut is passed through as
//! a raw CQL map literal with double quotes normalized to single quotes.

/// Error type for compaction shortcut parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for CompactionParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to parse compaction option '{}': {}",
            self.input, self.message
        )
    }
}

impl std::error::Error for CompactionParseError {}

const TWCS_WINDOW_UNITS: [&str; 3] = ["MINUTES", "HOURS", "DAYS"];

/// A resolved compaction option, ready for rendering into DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOption {
    /// A known strategy class with its option map.
    Strategy {
        class: &'static str,
        options: Vec<(String, String)>,
    },
    /// Raw CQL map literal supplied by the user.
    Raw(String),
}

impl CompactionOption {
    /// Parses a compaction shortcut or raw map literal.
    pub fn parse(input: &str) -> Result<Self, CompactionParseError> {
        let trimmed = input.trim();
        let mut parts = trimmed.split(',');
        let head = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match head {
            "stcs" => Self::parse_stcs(trimmed, &args),
            "lcs" => Self::parse_lcs(trimmed, &args),
            "twcs" => Self::parse_twcs(trimmed, &args),
            "ucs" => Ok(Self::parse_ucs(&args)),
            _ => Ok(CompactionOption::Raw(trimmed.replace('"', "'"))),
        }
    }

    fn parse_stcs(input: &str, args: &[&str]) -> Result<Self, CompactionParseError> {
        let options = match args {
            [] => Vec::new(),
            [min, max] => vec![
                ("min_threshold".to_string(), min.to_string()),
                ("max_threshold".to_string(), max.to_string()),
            ],
            _ => {
                return Err(error(input, "stcs takes 0 or 2 arguments"));
            }
        };
        Ok(CompactionOption::Strategy {
            class: "SizeTieredCompactionStrategy",
            options,
        })
    }

    fn parse_lcs(input: &str, args: &[&str]) -> Result<Self, CompactionParseError> {
        let options = match args {
            [] => Vec::new(),
            [size] => vec![("sstable_size_in_mb".to_string(), size.to_string())],
            [size, fanout] => vec![
                ("sstable_size_in_mb".to_string(), size.to_string()),
                ("fanout_size".to_string(), fanout.to_string()),
            ],
            _ => {
                return Err(error(input, "lcs takes 0, 1 or 2 arguments"));
            }
        };
        Ok(CompactionOption::Strategy {
            class: "LeveledCompactionStrategy",
            options,
        })
    }

    fn parse_twcs(input: &str, args: &[&str]) -> Result<Self, CompactionParseError> {
        let options = match args {
            [] => Vec::new(),
            [size, unit] => {
                let unit = unit.to_uppercase();
                if !TWCS_WINDOW_UNITS.contains(&unit.as_str()) {
                    return Err(error(
                        input,
                        "twcs window unit must be MINUTES, HOURS or DAYS",
                    ));
                }
                vec![
                    ("compaction_window_size".to_string(), size.to_string()),
                    ("compaction_window_unit".to_string(), unit),
                ]
            }
            _ => {
                return Err(error(input, "twcs takes 0 or 2 arguments"));
            }
        };
        Ok(CompactionOption::Strategy {
            class: "TimeWindowCompactionStrategy",
            options,
        })
    }

    fn parse_ucs(args: &[&str]) -> Self {
        let options = if args.is_empty() {
            Vec::new()
        } else {
            vec![("scaling_parameters".to_string(), args.join(","))]
        };
        CompactionOption::Strategy {
            class: "UnifiedCompactionStrategy",
            options,
        }
    }

    /// Renders the option as a CQL map literal.
    pub fn to_cql(&self) -> String {
        match self {
            CompactionOption::Strategy { class, options } => {
                let mut out = format!("{{'class': '{}'", class);
                for (key, value) in options {
                    out.push_str(&format!(", '{}': '{}'", key, value));
                }
                out.push('}');
                out
            }
            CompactionOption::Raw(literal) => literal.clone(),
        }
    }
}

fn error(input: &str, message: &str) -> CompactionParseError {
    CompactionParseError {
        input: input.to_string(),
        message: message.to_string(),
    }
}
