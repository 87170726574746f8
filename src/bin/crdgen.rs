//! # CRD Generator
//!
//! Prints the `AgentConfig` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/agentconfig.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use arca_controller::crd::AgentConfig;
use kube::core::CustomResourceExt;

fn main() {
    let crd = AgentConfig::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
