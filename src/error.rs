//! Error types for capremap.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which end of a flow an address or subnet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Server,
    Client,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Server => write!(f, "server"),
            Side::Client => write!(f, "client"),
        }
    }
}

/// Pipeline step that invoked an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Tagging,
    Inspection,
    /// Zero-based index into the pair table.
    Rewrite { rule: usize },
    MacRewrite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Tagging => write!(f, "directionality tagging"),
            Stage::Inspection => write!(f, "pair classification"),
            Stage::Rewrite { rule } => write!(f, "IP rewrite of rule #{}", rule),
            Stage::MacRewrite => write!(f, "MAC rewrite"),
        }
    }
}

/// Failure of a single external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("cannot run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Exit {
        tool: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum RemapError {
    #[error("Invalid subnet {value:?}: {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("Invalid MAC address {value:?}: use a format like 00:11:22:33:44:55")]
    InvalidMac { value: String },

    #[error("Server subnet {server} overlaps client subnet {client}")]
    TargetSubnetsOverlap { server: String, client: String },

    #[error("Capture file not found: {}", .0.display())]
    CaptureNotFound(PathBuf),

    #[error("{side} subnet exhausted: {available} usable addresses, {needed} needed")]
    SubnetExhausted {
        side: Side,
        available: u128,
        needed: usize,
    },

    #[error("Observed {side} address {addr} lies inside target subnet {subnet}")]
    TargetOverlap {
        side: Side,
        addr: IpAddr,
        subnet: String,
    },

    #[error("Observed {side} address {addr} does not match the family of target subnet {subnet}")]
    FamilyMismatch {
        side: Side,
        addr: IpAddr,
        subnet: String,
    },

    #[error("Address {addr} is a server in one pair and a client in another; it cannot be rewritten into both subnets")]
    RoleConflict { addr: IpAddr },

    #[error("{stage} failed: {source}")]
    ToolFailed {
        stage: Stage,
        #[source]
        source: ToolError,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemapError {
    pub(crate) fn tool(stage: Stage, source: ToolError) -> Self {
        RemapError::ToolFailed { stage, source }
    }

    /// Short tag naming the error class, used in the CLI's failure line.
    pub fn kind(&self) -> &'static str {
        match self {
            RemapError::InvalidSubnet { .. }
            | RemapError::InvalidMac { .. }
            | RemapError::TargetSubnetsOverlap { .. }
            | RemapError::CaptureNotFound(_)
            | RemapError::RoleConflict { .. } => "configuration",
            RemapError::SubnetExhausted { .. } => "subnet exhaustion",
            RemapError::TargetOverlap { .. } | RemapError::FamilyMismatch { .. } => "target conflict",
            RemapError::ToolFailed { .. } => "external tool",
            RemapError::Io(_) | RemapError::Json(_) => "io",
        }
    }
}

/// Result type alias for capremap operations.
pub type Result<T> = std::result::Result<T, RemapError>;
