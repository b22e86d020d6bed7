use pbdl::{datasets::Index, Config};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = Config::load()?;
    let index = Index::load(&config);
    for name in index.names() {
        let Some(entry) = index.get(&name) else { continue };
        let place = if index.local.contains_key(&name) {
            "local"
        } else {
            "global"
        };
        println!(
            "{name:<40} {place:<7} {:<24} {}",
            entry.pde.as_deref().unwrap_or("-"),
            entry.fields_scheme.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
