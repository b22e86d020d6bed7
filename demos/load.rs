use pbdl::datasets::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "transonic-cylinder-flow-tiny".to_string());

    let mut loader = Dataloader::open(
        &name,
        DatasetOptions {
            time_steps: Some(10),
            normalize_data: Some(NormStrategy::Std),
            normalize_const: Some(NormStrategy::MeanStd),
            ..Default::default()
        },
        LoaderOptions {
            batch_size: 8,
            shuffle: true,
            seed: Some(0),
            ..Default::default()
        },
    )?;
    println!("{}", loader.dataset().info());

    let batches = loader.len();
    for (i, batch) in loader.iter().enumerate() {
        let batch = batch?;
        if i == 0 || i + 1 == batches {
            println!(
                "batch {i}/{batches}: input {:?} target {:?}",
                batch.input.shape(),
                batch.target.shape()
            );
        }
    }
    Ok(())
}
