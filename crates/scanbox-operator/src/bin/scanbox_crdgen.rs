//! Prints the scanbox custom resource definitions as a YAML stream.

use anyhow::Context as _;
use std::io::{self, Write};

use kube::CustomResourceExt;
use scanbox_operator::crd::{Scan, ScanTemplate};

fn main() -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    for crd in [Scan::crd(), ScanTemplate::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("serialize CRD {name}"))?;
        writeln!(out, "---").context("write CRD separator to stdout")?;
        out.write_all(yaml.as_bytes())
            .with_context(|| format!("write CRD {name} to stdout"))?;
    }
    Ok(())
}
