use indexmap::IndexMap;

use crate::core::error::RunnerError;
use crate::core::job::{Invocation, JobRecord};

/// Leading tokens that only name the interpreter and are dropped on decode.
pub const INTERPRETERS: [&str; 2] = ["python", "python3"];
pub const DEFAULT_INTERPRETER: &str = "python";
pub const SCRIPT_EXTENSION: &str = ".py";
const OPTION_PREFIX: &str = "--";

/// Display forms of a job, as used in listings and commit messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub invocation: String,
    pub script: String,
    pub args: String,
    pub kwargs: String,
}

pub fn decode(command: &str) -> Result<JobRecord, RunnerError> {
    let tokens = shell_words::split(command).map_err(|err| RunnerError::MalformedCommand {
        message: format!("{err} in '{command}'"),
    })?;

    let mut tokens = tokens.into_iter().peekable();
    if tokens
        .peek()
        .is_some_and(|first| INTERPRETERS.contains(&first.as_str()))
    {
        tokens.next();
    }

    let program = match tokens.next() {
        Some(script) => strip_extension(&script).to_string(),
        None => {
            return Err(RunnerError::MalformedCommand {
                message: "empty command".to_string(),
            })
        }
    };

    let mut positional_args = Vec::new();
    let mut named_options = IndexMap::new();

    while let Some(token) = tokens.next() {
        if !token.starts_with(OPTION_PREFIX) {
            positional_args.push(token);
            continue;
        }
        let option = &token[OPTION_PREFIX.len()..];

        let (key, value) = match option.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => match tokens.next() {
                Some(value) => (option.to_string(), value),
                None => {
                    return Err(RunnerError::MalformedCommand {
                        message: format!("option '{token}' has no value"),
                    })
                }
            },
        };

        if key.is_empty() {
            return Err(RunnerError::MalformedCommand {
                message: format!("option '{token}' has no name"),
            });
        }
        named_options.insert(key, value);
    }

    Ok(JobRecord::new(program, positional_args, named_options))
}

pub fn encode(record: &JobRecord) -> EncodedCommand {
    let script = script_name(&record.program);
    let args = shell_words::join(&record.positional_args);
    let kwargs = shell_words::join(option_tokens(record));
    let quoted_script = shell_words::quote(&script);

    let invocation = [
        DEFAULT_INTERPRETER,
        quoted_script.as_ref(),
        args.as_str(),
        kwargs.as_str(),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ");

    EncodedCommand {
        invocation,
        script,
        args,
        kwargs,
    }
}

/// Builds the argv for running `record` under `interpreter`.
pub fn to_invocation(record: &JobRecord, interpreter: &str) -> Invocation {
    let mut args =
        Vec::with_capacity(1 + record.positional_args.len() + record.named_options.len());
    args.push(script_name(&record.program));
    args.extend(record.positional_args.iter().cloned());
    args.extend(option_tokens(record));

    Invocation {
        program: interpreter.to_string(),
        args,
    }
}

fn option_tokens(record: &JobRecord) -> impl Iterator<Item = String> + '_ {
    record
        .named_options
        .iter()
        .map(|(key, value)| format!("{OPTION_PREFIX}{key}={value}"))
}

fn script_name(program: &str) -> String {
    format!("{}{SCRIPT_EXTENSION}", strip_extension(program))
}

fn strip_extension(script: &str) -> &str {
    script.strip_suffix(SCRIPT_EXTENSION).unwrap_or(script)
}
