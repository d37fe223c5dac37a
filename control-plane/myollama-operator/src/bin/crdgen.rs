use kube::core::CustomResourceExt;
use myollama_operator::crd::MyOllama;

fn main() -> anyhow::Result<()> {
    let crd = MyOllama::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
