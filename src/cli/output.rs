use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::error::{ErrorCode, Result, StoreError, StructuredError};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable formatted output with colors (default)
    #[default]
    Human,
    /// Pretty-printed JSON
    Json,
}

impl OutputFormat {
    #[must_use]
    pub const fn from_machine_flag(machine: bool) -> Self {
        if machine { Self::Json } else { Self::Human }
    }

    #[must_use]
    pub const fn is_machine_readable(&self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Envelope for every JSON response.
#[derive(Serialize)]
pub struct MachineResponse<T> {
    pub status: MachineStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Ok,
    Error {
        code: ErrorCode,
        numeric_code: u16,
        message: String,
        suggestion: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
        recoverable: bool,
        category: String,
    },
}

impl From<StructuredError> for MachineStatus {
    fn from(err: StructuredError) -> Self {
        Self::Error {
            code: err.code,
            numeric_code: err.numeric_code,
            message: err.message,
            suggestion: err.suggestion,
            context: err.context,
            recoverable: err.recoverable,
            category: err.category,
        }
    }
}

pub fn machine_ok<T: Serialize>(data: T) -> MachineResponse<T> {
    MachineResponse {
        status: MachineStatus::Ok,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data,
    }
}

pub fn machine_error(err: &StoreError) -> MachineResponse<serde_json::Value> {
    MachineResponse {
        status: err.to_structured().into(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data: serde_json::Value::Null,
    }
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}

/// Emit `data` as a JSON envelope, or render it for humans.
pub fn emit<T: Serialize>(
    format: OutputFormat,
    data: &T,
    human: impl FnOnce(&T) -> HumanLayout,
) -> Result<()> {
    match format {
        OutputFormat::Json => emit_json(&machine_ok(data)),
        OutputFormat::Human => {
            println!("{}", human(data).build());
            Ok(())
        }
    }
}

pub struct HumanLayout {
    lines: Vec<String>,
    key_width: usize,
}

impl Default for HumanLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayout {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Vec::new(),
            key_width: 22,
        }
    }

    pub fn title(&mut self, text: &str) -> &mut Self {
        self.lines.push(text.bold().to_string());
        self.lines.push(String::new());
        self
    }

    pub fn section(&mut self, text: &str) -> &mut Self {
        self.lines.push(text.bold().to_string());
        self.lines.push("-".repeat(text.len().max(3)));
        self
    }

    pub fn kv(&mut self, key: &str, value: impl std::fmt::Display) -> &mut Self {
        let key = format!("{key:width$}", width = self.key_width);
        self.lines.push(format!("{} {value}", key.dimmed()));
        self
    }

    pub fn bullet(&mut self, text: &str) -> &mut Self {
        self.lines.push(format!("- {text}"));
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    #[must_use]
    pub fn build(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_flag_selects_json() {
        assert_eq!(OutputFormat::from_machine_flag(true), OutputFormat::Json);
        assert_eq!(OutputFormat::from_machine_flag(false), OutputFormat::Human);
        assert!(OutputFormat::Json.is_machine_readable());
    }

    #[test]
    fn ok_envelope_serializes_status_and_data() {
        let value = serde_json::to_value(machine_ok(serde_json::json!({ "n": 1 }))).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["data"]["n"], 1);
        assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn error_envelope_carries_structured_fields() {
        let err = StoreError::NotFound("transaction 9".into());
        let value = serde_json::to_value(machine_error(&err)).unwrap();
        let status = &value["status"]["error"];
        assert_eq!(status["code"], "NOT_FOUND");
        assert_eq!(status["numeric_code"], 905);
        assert_eq!(status["recoverable"], true);
    }

    #[test]
    fn layout_joins_lines() {
        colored::control::set_override(false);
        let mut layout = HumanLayout::new();
        layout.title("Store").kv("messages", 3).bullet("x");
        let text = layout.build();
        assert!(text.starts_with("Store\n"));
        assert!(text.contains("messages"));
        assert!(text.ends_with("- x"));
    }
}
