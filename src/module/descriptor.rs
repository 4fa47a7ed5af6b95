//! `ModuleDescriptor`: the declared metadata of a module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

fn default_version() -> String {
    "0.0.1".to_string()
}

// ── Contracts ─────────────────────────────────────────────────────────

/// A declared parameter with its default and optional range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub default: Value,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: String,
}

impl ParamSpec {
    /// Check `value` against the declared range. Non-numeric values and
    /// unbounded specs always pass.
    pub fn in_range(&self, value: &Value) -> bool {
        match value.as_f64() {
            Some(v) => {
                self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max)
            }
            None => true,
        }
    }
}

/// A declared input or output object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub description: String,
}

// ── Descriptor ────────────────────────────────────────────────────────

/// Everything a module declares about itself: identity, time unit,
/// parameters, object contracts, children and required packages.
///
/// A descriptor with non-empty `children` is a module group. Groups are
/// replaced by their children during expansion and never run themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub time_unit: Option<String>,
    pub parameters: Vec<ParamSpec>,
    pub inputs: Vec<ObjectSpec>,
    pub outputs: Vec<ObjectSpec>,
    pub children: Vec<String>,
    pub packages: Vec<String>,
    pub path: Option<PathBuf>,
    pub description: String,
}

/// On-disk form of a descriptor. Parameter defaults are plain JSON.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default, alias = "timeunit")]
    time_unit: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParam>,
    #[serde(default)]
    inputs: Vec<ObjectSpec>,
    #[serde(default)]
    outputs: Vec<ObjectSpec>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParam {
    name: String,
    #[serde(default)]
    default: serde_json::Value,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    description: String,
}

impl ModuleDescriptor {
    /// Start a descriptor for `name` with no contracts.
    pub fn new(name: impl Into<String>) -> Self {
        ModuleDescriptor {
            name: name.into(),
            version: default_version(),
            time_unit: None,
            parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            children: Vec::new(),
            packages: Vec::new(),
            path: None,
            description: String::new(),
        }
    }

    /// Parse a JSON metadata block for the module registered as `key`.
    ///
    /// Fails with `Parse` on malformed input and `NameMismatch` when the
    /// declared name differs from `key`.
    pub fn from_json(key: &str, raw: &str) -> EngineResult<Self> {
        let raw: RawDescriptor = serde_json::from_str(raw).map_err(|e| EngineError::Parse {
            module: key.to_string(),
            message: e.to_string(),
        })?;
        if raw.name != key {
            return Err(EngineError::NameMismatch {
                registered: key.to_string(),
                declared: raw.name,
            });
        }
        Ok(ModuleDescriptor {
            name: raw.name,
            version: raw.version,
            time_unit: raw.time_unit,
            parameters: raw
                .parameters
                .into_iter()
                .map(|p| ParamSpec {
                    name: p.name,
                    default: Value::from_json(&p.default),
                    min: p.min,
                    max: p.max,
                    description: p.description,
                })
                .collect(),
            inputs: raw.inputs,
            outputs: raw.outputs,
            children: raw.children,
            packages: raw.packages,
            path: raw.path,
            description: raw.description,
        })
    }

    // ── Builder ───────────────────────────────────────────────────

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn time_unit(mut self, unit: impl Into<String>) -> Self {
        self.time_unit = Some(unit.into());
        self
    }

    /// Declare an unbounded parameter.
    pub fn param(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            default: default.into(),
            min: None,
            max: None,
            description: String::new(),
        });
        self
    }

    /// Declare a numeric parameter constrained to `[min, max]`.
    pub fn bounded_param(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
        min: f64,
        max: f64,
    ) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            default: default.into(),
            min: Some(min),
            max: Some(max),
            description: String::new(),
        });
        self
    }

    pub fn input(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.inputs.push(ObjectSpec {
            name: name.into(),
            class: class.into(),
            description: String::new(),
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.outputs.push(ObjectSpec {
            name: name.into(),
            class: class.into(),
            description: String::new(),
        });
        self
    }

    pub fn child(mut self, name: impl Into<String>) -> Self {
        self.children.push(name.into());
        self
    }

    pub fn package(mut self, name: impl Into<String>) -> Self {
        self.packages.push(name.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    // ── Queries ───────────────────────────────────────────────────

    /// `true` for a module group.
    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|o| o.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    pub fn declares_input(&self, object: &str) -> bool {
        self.inputs.iter().any(|o| o.name == object)
    }

    pub fn declares_output(&self, object: &str) -> bool {
        self.outputs.iter().any(|o| o.name == object)
    }

    /// Check the declared contracts for internal consistency: non-empty
    /// names, no duplicates, and sane parameter ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("module name is empty".to_string());
        }
        check_unique("parameter", self.parameters.iter().map(|p| p.name.as_str()))?;
        check_unique("input", self.input_names())?;
        check_unique("output", self.output_names())?;
        for p in &self.parameters {
            if let (Some(min), Some(max)) = (p.min, p.max) {
                if min > max {
                    return Err(format!(
                        "parameter '{}' has min {} greater than max {}",
                        p.name, min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(format!("{} with an empty name", kind));
        }
        if !seen.insert(name) {
            return Err(format!("{} '{}' is declared twice", kind, name));
        }
    }
    Ok(())
}
