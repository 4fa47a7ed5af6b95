//! Contract diagnostics: unmet inputs, unused outputs, undeclared use,
//! unused parameters and missing packages.
//!
//! Diagnostics never abort a run. A missing input may be supplied by user
//! data at run start, or may only fail later when the object is read.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::module::ModuleDescriptor;
use crate::state::ObjectUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A declared input with no producer and no supplied value.
    UnmetInputObject { object: String },
    /// A declared output no other module consumes.
    UnusedOutput { object: String },
    /// An object read by the module's logic but never declared.
    UndeclaredUse { object: String },
    /// An object written by the module's logic but not declared as output.
    UndeclaredOutput { object: String },
    /// A declared parameter the module never read.
    UnusedParameter { param: String },
    /// A required package that is neither a module nor available.
    MissingPackage { package: String },
}

/// One finding about one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub module: String,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self.kind {
            DiagnosticKind::UnusedOutput { .. } | DiagnosticKind::UnusedParameter { .. } => {
                Severity::Info
            }
            _ => Severity::Warning,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = &self.module;
        match &self.kind {
            DiagnosticKind::UnmetInputObject { object } => {
                write!(f, "{}: input '{}' has no producer and was not supplied", m, object)
            }
            DiagnosticKind::UnusedOutput { object } => {
                write!(f, "{}: output '{}' is not consumed by any module", m, object)
            }
            DiagnosticKind::UndeclaredUse { object } => {
                write!(f, "{}: reads '{}' without declaring it as an input", m, object)
            }
            DiagnosticKind::UndeclaredOutput { object } => {
                write!(f, "{}: writes '{}' without declaring it as an output", m, object)
            }
            DiagnosticKind::UnusedParameter { param } => {
                write!(f, "{}: parameter '{}' is never used", m, param)
            }
            DiagnosticKind::MissingPackage { package } => {
                write!(f, "{}: required package '{}' is not available", m, package)
            }
        }
    }
}

/// What the diagnostics are checked against.
#[derive(Debug, Clone, Default)]
pub struct DiagnoseContext<'a> {
    /// Objects supplied by the caller before the run.
    pub supplied: IndexSet<String>,
    /// Packages known to be present besides the modules themselves.
    pub available_packages: &'a [String],
    /// Per-module usage recorded during a run. Without it the undeclared
    /// use and unused parameter checks are skipped.
    pub usage: Option<&'a IndexMap<String, ObjectUsage>>,
}

/// Check `descriptors` against each other and against `ctx`.
///
/// Results are grouped by module in descriptor order.
pub fn diagnose(descriptors: &[ModuleDescriptor], ctx: &DiagnoseContext<'_>) -> Vec<Diagnostic> {
    let module_names: IndexSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
    let mut out = Vec::new();

    for d in descriptors {
        let mut push = |kind| {
            out.push(Diagnostic {
                module: d.name.clone(),
                kind,
            })
        };

        for input in d.input_names() {
            let produced = descriptors.iter().any(|p| p.declares_output(input));
            if !produced && !ctx.supplied.contains(input) {
                push(DiagnosticKind::UnmetInputObject {
                    object: input.to_string(),
                });
            }
        }

        for output in d.output_names() {
            let consumed = descriptors
                .iter()
                .any(|c| c.name != d.name && c.declares_input(output));
            if !consumed {
                push(DiagnosticKind::UnusedOutput {
                    object: output.to_string(),
                });
            }
        }

        for package in &d.packages {
            if !module_names.contains(package.as_str())
                && !ctx.available_packages.iter().any(|p| p == package)
            {
                push(DiagnosticKind::MissingPackage {
                    package: package.clone(),
                });
            }
        }

        if let Some(usage) = ctx.usage {
            let empty = ObjectUsage::default();
            let used = usage.get(&d.name).unwrap_or(&empty);
            for object in &used.reads {
                if !d.declares_input(object) && !d.declares_output(object) {
                    push(DiagnosticKind::UndeclaredUse {
                        object: object.clone(),
                    });
                }
            }
            for object in &used.writes {
                if !d.declares_output(object) {
                    push(DiagnosticKind::UndeclaredOutput {
                        object: object.clone(),
                    });
                }
            }
            for p in &d.parameters {
                if !used.params.contains(&p.name) {
                    push(DiagnosticKind::UnusedParameter {
                        param: p.name.clone(),
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(diags: &[Diagnostic], module: &str) -> Vec<DiagnosticKind> {
        diags
            .iter()
            .filter(|d| d.module == module)
            .map(|d| d.kind.clone())
            .collect()
    }

    #[test]
    fn test_unmet_input_and_unused_output() {
        let ds = [
            ModuleDescriptor::new("gen").output("map", "").output("log", ""),
            ModuleDescriptor::new("use").input("map", "").input("climate", ""),
        ];
        let diags = diagnose(&ds, &DiagnoseContext::default());
        assert_eq!(
            kinds(&diags, "use"),
            vec![DiagnosticKind::UnmetInputObject {
                object: "climate".into()
            }]
        );
        assert_eq!(
            kinds(&diags, "gen"),
            vec![DiagnosticKind::UnusedOutput { object: "log".into() }]
        );
        assert_eq!(diags[0].severity(), Severity::Info);
    }

    #[test]
    fn test_supplied_objects_satisfy_inputs() {
        let ds = [ModuleDescriptor::new("use").input("climate", "")];
        let ctx = DiagnoseContext {
            supplied: ["climate".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(diagnose(&ds, &ctx).is_empty());
    }

    #[test]
    fn test_missing_package() {
        let ds = [
            ModuleDescriptor::new("base"),
            ModuleDescriptor::new("app")
                .package("base")
                .package("stats")
                .package("gdal"),
        ];
        let available = vec!["stats".to_string()];
        let ctx = DiagnoseContext {
            available_packages: &available,
            ..Default::default()
        };
        let diags = diagnose(&ds, &ctx);
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].kind,
            DiagnosticKind::MissingPackage {
                package: "gdal".into()
            }
        );
        assert_eq!(diags[0].severity(), Severity::Warning);
    }

    #[test]
    fn test_usage_checks() {
        let ds = [ModuleDescriptor::new("fire")
            .input("fuel", "")
            .output("burned", "")
            .param("rate", 1.0)
            .param("unused", 2.0)];
        let mut usage = IndexMap::new();
        let mut fire = ObjectUsage::default();
        fire.reads.insert("fuel".into());
        fire.reads.insert("wind".into());
        fire.writes.insert("burned".into());
        fire.writes.insert("smoke".into());
        fire.params.insert("rate".into());
        usage.insert("fire".to_string(), fire);

        let ctx = DiagnoseContext {
            supplied: ["fuel".to_string()].into_iter().collect(),
            usage: Some(&usage),
            ..Default::default()
        };
        let diags = diagnose(&ds, &ctx);
        assert_eq!(
            kinds(&diags, "fire"),
            vec![
                DiagnosticKind::UnusedOutput {
                    object: "burned".into()
                },
                DiagnosticKind::UndeclaredUse {
                    object: "wind".into()
                },
                DiagnosticKind::UndeclaredOutput {
                    object: "smoke".into()
                },
                DiagnosticKind::UnusedParameter {
                    param: "unused".into()
                },
            ]
        );
        assert!(diags[1].to_string().contains("reads 'wind'"));
    }
}
