//! # CRD Generator
//!
//! Prints the `APIcast` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/apicast.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use apicast_controller::crd::APIcast;
use kube::core::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&APIcast::crd()) {
        Ok(yaml) => {
            println!("# This file is auto-generated by crdgen");
            println!("# DO NOT EDIT THIS FILE MANUALLY");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
