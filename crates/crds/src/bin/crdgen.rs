//! CRD manifest generator
//!
//! Prints every SDN CustomResourceDefinition as a multi-document YAML
//! stream, ready for `kubectl apply -f -`.

use crds::{NetworkNode, NodeGroup, NodeGroupToPoolMapping, PortChannel, Switch, SwitchPort};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        Switch::crd(),
        SwitchPort::crd(),
        PortChannel::crd(),
        NetworkNode::crd(),
        NodeGroup::crd(),
        NodeGroupToPoolMapping::crd(),
    ];

    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
