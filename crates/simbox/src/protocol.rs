//! Wire types exchanged between the host page and the sandbox.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping from control name to its current numeric value.
///
/// Replaced wholesale on every `params` message; the host always sends the
/// full set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, f64>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Initial values taken from the descriptors' `value` fields.
    pub fn from_controls(controls: &[ControlDescriptor]) -> Self {
        controls
            .iter()
            .map(|control| (control.name.clone(), control.value))
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, (name, value)) in self.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// A named, bounded numeric parameter exposed to the end user.
///
/// Passed through opaquely; `shape_issues` exists for tooling only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Number of decimals shown next to the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
}

/// Why a control descriptor breaks its own invariants.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlIssue {
    ValueOutOfBounds { name: String, min: f64, max: f64, value: f64 },
    NonPositiveStep { name: String, step: f64 },
    PrecisionTooLarge { name: String, precision: u8 },
    DuplicateName { name: String },
}

impl fmt::Display for ControlIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfBounds { name, min, max, value } => {
                write!(f, "control '{name}': value {value} is outside [{min}, {max}]")
            }
            Self::NonPositiveStep { name, step } => {
                write!(f, "control '{name}': step {step} must be greater than zero")
            }
            Self::PrecisionTooLarge { name, precision } => {
                write!(f, "control '{name}': precision {precision} is above 10")
            }
            Self::DuplicateName { name } => write!(f, "control '{name}' is declared twice"),
        }
    }
}

impl ControlDescriptor {
    pub fn shape_issues(&self) -> Vec<ControlIssue> {
        let mut issues = Vec::new();
        if !(self.min <= self.value && self.value <= self.max) {
            issues.push(ControlIssue::ValueOutOfBounds {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
                value: self.value,
            });
        }
        if !(self.step > 0.0) {
            issues.push(ControlIssue::NonPositiveStep {
                name: self.name.clone(),
                step: self.step,
            });
        }
        if let Some(precision) = self.precision.filter(|precision| *precision > 10) {
            issues.push(ControlIssue::PrecisionTooLarge {
                name: self.name.clone(),
                precision,
            });
        }
        issues
    }
}

/// Shape issues of a whole control list, including duplicate names.
pub fn control_issues(controls: &[ControlDescriptor]) -> Vec<ControlIssue> {
    let mut seen = std::collections::BTreeSet::new();
    let mut issues = Vec::new();
    for control in controls {
        if !seen.insert(control.name.as_str()) {
            issues.push(ControlIssue::DuplicateName {
                name: control.name.clone(),
            });
        }
        issues.extend(control.shape_issues());
    }
    issues
}

/// Payload of an `init` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub code: String,
    #[serde(rename = "uiInputs", default)]
    pub ui_inputs: Vec<ControlDescriptor>,
    #[serde(default)]
    pub params: ParameterSet,
}

/// Messages the host page posts into the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    /// New program, controls and initial parameters.
    Init(InitMessage),
    /// Parameter-only update.
    Params { params: ParameterSet },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Params { .. } => "params",
            Self::Unknown => "unknown",
        }
    }
}

/// Response of the external generation service, as consumed by tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedProgram {
    #[serde(rename = "uiInputs")]
    pub ui_inputs: Vec<ControlDescriptor>,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl GeneratedProgram {
    pub fn into_init(self) -> InitMessage {
        InitMessage {
            params: ParameterSet::from_controls(&self.ui_inputs),
            code: self.code,
            ui_inputs: self.ui_inputs,
        }
    }
}
