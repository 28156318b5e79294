//! # CRD Generator
//!
//! Prints the `PostgresqlInstance` CustomResourceDefinition as YAML.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p crds --bin crdgen > config/crd/postgresqlinstance.yaml
//! cargo run -p crds --bin crdgen | kubectl apply -f -
//! ```

use crds::PostgresqlInstance;
use kube::CustomResourceExt;

fn main() {
    let crd = PostgresqlInstance::crd();

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
