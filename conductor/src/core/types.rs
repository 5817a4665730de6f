//! Shared deterministic types for the orchestrator.
//!
//! These types define stable contracts between the lifecycle components. They
//! do not depend on external state and must remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the process runs inside a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerMode {
    On,
    Off,
}

impl ContainerMode {
    pub fn from_marker(present: bool) -> Self {
        if present { Self::On } else { Self::Off }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named step of the lifecycle that can abort its branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    FindConfig,
    GenerateConfig,
    EditConfig,
    ValidateConfig,
    LoadConfig,
    DeriveWorkspace,
    Bootstrap,
    PrepareWorkflowDir,
    PrepareImports,
    RunAction,
    WaitForReady,
    ExecuteCommand,
}

/// Error class a stage failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Discovery,
    Validation,
    Load,
    Derivation,
    Preparation,
    Run,
    Synchronization,
    Bootstrap,
    Command,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FindConfig => "find-config",
            Self::GenerateConfig => "generate-config",
            Self::EditConfig => "edit-config",
            Self::ValidateConfig => "validate-config",
            Self::LoadConfig => "load-config",
            Self::DeriveWorkspace => "derive-workspace",
            Self::Bootstrap => "bootstrap",
            Self::PrepareWorkflowDir => "prepare-workflow-dir",
            Self::PrepareImports => "prepare-imports",
            Self::RunAction => "run-action",
            Self::WaitForReady => "wait-for-ready",
            Self::ExecuteCommand => "execute-command",
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            Self::FindConfig | Self::GenerateConfig | Self::EditConfig => ErrorClass::Discovery,
            Self::ValidateConfig => ErrorClass::Validation,
            Self::LoadConfig => ErrorClass::Load,
            Self::DeriveWorkspace => ErrorClass::Derivation,
            Self::Bootstrap => ErrorClass::Bootstrap,
            Self::PrepareWorkflowDir | Self::PrepareImports => ErrorClass::Preparation,
            Self::RunAction => ErrorClass::Run,
            Self::WaitForReady => ErrorClass::Synchronization,
            Self::ExecuteCommand => ErrorClass::Command,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
