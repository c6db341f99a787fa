//
// kernel_spec.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// From the Jupyter documentation for [Kernel Specs](https://jupyter-client.readthedocs.io/en/stable/kernels.html#kernel-specs).
#[derive(Serialize, Deserialize)]
pub struct KernelSpec {
    /// List of command line arguments to be used to start the kernel
    pub argv: Vec<String>,

    // The kernel name as it should be displayed in the UI
    pub display_name: String,

    // The kernel's language
    pub language: String,

    // Environment variables to set for the kernel
    #[serde(default)]
    pub env: serde_json::Map<String, Value>,

    // How the kernel prefers to be interrupted, if it says
    #[serde(default)]
    pub interrupt_mode: Option<String>,
}

impl KernelSpec {
    /// Read a kernelspec from a `kernel.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read kernelspec {}", path.as_ref().display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid kernelspec {}", path.as_ref().display()))
    }
}
