pub fn run() -> anyhow::Result<()> {
    println!("vpsie-autoscaler {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
