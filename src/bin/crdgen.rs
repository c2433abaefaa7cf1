use kube::CustomResourceExt;
use service_operator::crd::{InfraResource, ServiceInstance};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ServiceInstance::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&InfraResource::crd())?);
    Ok(())
}
