//! Argument binding for built-in operations.
//!
//! Preset arguments arrive as raw TOML. They may be a positional array
//! (`crop = [200, 100, [10, 10]]`), a table of named arguments
//! (`crop = { width = 200, height = 100 }`) or, for operations whose first
//! parameter is enough, a bare scalar (`frame = 4`). [`Args`] binds either
//! shape onto an operation's parameter list and offers typed accessors that
//! report errors against the operation name.

use super::PipelineError;
use crate::imaging::{Color, FontOptions, ParamError, Point};
use std::collections::HashMap;

pub(super) struct Args<'a> {
    operation: &'a str,
    values: HashMap<&'static str, &'a toml::Value>,
}

impl<'a> Args<'a> {
    pub(super) fn bind(
        operation: &'a str,
        params: &[&'static str],
        raw: &'a toml::Value,
    ) -> Result<Self, PipelineError> {
        let mut values = HashMap::new();
        match raw {
            toml::Value::Array(items) => {
                if items.len() > params.len() {
                    return Err(invalid(
                        operation,
                        format!("takes at most {} arguments, got {}", params.len(), items.len()),
                    ));
                }
                values.extend(params.iter().copied().zip(items));
            }
            toml::Value::Table(table) => {
                for (key, value) in table {
                    let param = params
                        .iter()
                        .find(|p| **p == key.as_str())
                        .ok_or_else(|| invalid(operation, format!("unknown argument {key:?}")))?;
                    values.insert(*param, value);
                }
            }
            scalar => {
                if let Some(first) = params.first() {
                    values.insert(*first, scalar);
                }
            }
        }
        Ok(Self { operation, values })
    }

    fn error(&self, message: impl Into<String>) -> PipelineError {
        invalid(self.operation, message.into())
    }

    pub(super) fn param_error(&self, err: ParamError) -> PipelineError {
        self.error(err.0)
    }

    fn get(&self, name: &str) -> Option<&'a toml::Value> {
        self.values.get(name).copied()
    }

    fn require(&self, name: &str) -> Result<&'a toml::Value, PipelineError> {
        self.get(name)
            .ok_or_else(|| self.error(format!("missing required argument {name:?}")))
    }

    fn as_int(&self, name: &str, value: &toml::Value) -> Result<i64, PipelineError> {
        value
            .as_integer()
            .ok_or_else(|| self.error(format!("{name} must be an integer, got {value}")))
    }

    pub(super) fn int(&self, name: &str) -> Result<i64, PipelineError> {
        self.as_int(name, self.require(name)?)
    }

    pub(super) fn int_or(&self, name: &str, default: i64) -> Result<i64, PipelineError> {
        match self.get(name) {
            Some(value) => self.as_int(name, value),
            None => Ok(default),
        }
    }

    pub(super) fn string(&self, name: &str) -> Result<&'a str, PipelineError> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| self.error(format!("{name} must be a string, got {value}")))
    }

    pub(super) fn string_or(&self, name: &str, default: &'a str) -> Result<&'a str, PipelineError> {
        match self.get(name) {
            Some(_) => self.string(name),
            None => Ok(default),
        }
    }

    /// A `[x, y]` coordinate pair, defaulting to the origin.
    pub(super) fn point(&self, name: &str) -> Result<Point, PipelineError> {
        let Some(value) = self.get(name) else {
            return Ok(Point::ORIGIN);
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.error(format!("{name} must be an array of two elements")))?;
        let coords = items
            .iter()
            .map(|item| self.as_int(name, item))
            .collect::<Result<Vec<_>, _>>()?;
        Point::from_pair(&coords).map_err(|e| self.param_error(e))
    }

    /// The `{ size, color, angle }` table of `text`.
    pub(super) fn font_options(&self, name: &str) -> Result<FontOptions, PipelineError> {
        let mut options = FontOptions::default();
        let Some(value) = self.get(name) else {
            return Ok(options);
        };
        let table = value
            .as_table()
            .ok_or_else(|| self.error(format!("{name} must be a table")))?;
        for (key, value) in table {
            match key.as_str() {
                "size" => {
                    let size = self.number(key, value)?;
                    if size <= 0.0 {
                        return Err(self.error(format!("font size must be positive, got {size}")));
                    }
                    options.size = size;
                }
                "color" => {
                    let hex = value
                        .as_str()
                        .ok_or_else(|| self.error("font color must be a string"))?;
                    options.color = Color::parse(hex, 100).map_err(|e| self.param_error(e))?;
                }
                "angle" => options.angle = self.number(key, value)?,
                other => return Err(self.error(format!("unknown font option {other:?}"))),
            }
        }
        Ok(options)
    }

    fn number(&self, name: &str, value: &toml::Value) -> Result<f32, PipelineError> {
        match value {
            toml::Value::Integer(i) => Ok(*i as f32),
            toml::Value::Float(f) => Ok(*f as f32),
            other => Err(self.error(format!("{name} must be a number, got {other}"))),
        }
    }
}

fn invalid(operation: &str, message: String) -> PipelineError {
    PipelineError::InvalidArgument {
        operation: operation.to_string(),
        message,
    }
}
