use std::env;

use bovw::*;

fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

fn main() -> BowResult<()> {
    init_logging();

    let path = env::args().nth(1).unwrap_or_else(|| "demos/bovw.yaml".to_string());
    let config = PipelineConfig::from_file(&path)?;
    println!("Config {}: {:#?}", path, config);

    let (train, test) = config.load_datasets()?;
    let out = Pipeline::new(&config)?.run(&train, &test)?;

    println!("\nVocabulary = {:#?}", out.vocabulary);
    println!("Classes: {:?}", out.labels.classes());
    println!(
        "Train features: {:?}, test features: {:?}",
        out.train.matrix.shape(),
        out.test.matrix.shape()
    );

    if let Some(dir) = &config.output_dir {
        out.save(dir)?;
        println!("Saved to {}", dir.display());
    }
    Ok(())
}
