//! # CRD Generator
//!
//! Prints the Oz CustomResourceDefinitions as one multi-document YAML stream:
//!
//! ```bash
//! crdgen | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use oz_controller::crd::{ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate};

fn main() -> Result<()> {
    let crds = [
        ExecAccessTemplate::crd(),
        PodAccessTemplate::crd(),
        ExecAccessRequest::crd(),
        PodAccessRequest::crd(),
    ];

    for crd in &crds {
        let yaml = serde_yaml::to_string(crd).context("Failed to serialize CRD to YAML")?;
        println!("---");
        print!("{yaml}");
    }
    Ok(())
}
