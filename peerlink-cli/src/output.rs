use serde::Serialize;

use crate::error::Error;

/// Output format for CLI responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err(Error::invalid_parameter(format!(
                "Unknown output format: {}. Use 'json' or 'text'",
                s
            ))),
        }
    }
}

/// Wrapper for consistent CLI output
#[derive(Debug, Serialize)]
struct SuccessEnvelope<'a, T: Serialize> {
    status: &'static str,
    data: &'a T,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    status: &'static str,
    error: &'a str,
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        format!(
            "{{\"status\":\"error\",\"error\":\"Serialization failed: {}\"}}",
            e
        )
    })
}

/// Print a successful result. Text mode prints the line produced by `text`.
pub fn print_success<T: Serialize>(format: OutputFormat, data: &T, text: impl FnOnce() -> String) {
    match format {
        OutputFormat::Json => {
            let envelope = SuccessEnvelope {
                status: "success",
                data,
            };
            println!("{}", to_pretty_json(&envelope));
        }
        OutputFormat::Text => println!("{}", text()),
    }
}

/// Print an error in the chosen format
pub fn print_error(format: OutputFormat, error: &str) {
    match format {
        OutputFormat::Json => {
            let envelope = ErrorEnvelope {
                status: "error",
                error,
            };
            eprintln!("{}", to_pretty_json(&envelope));
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", error);
        }
    }
}
