use clap::Parser;
use retro_overlay::materialize::ProxyRegistry;
use retro_overlay::{CapturedPage, PageHost, Pipeline, WebDriverPage};
use std::path::Path;

mod args;
use args::{Args, is_web_input, output_path};

const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        ::log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = Pipeline::builder();
    if let Some(path) = &args.config {
        builder = builder.with_config_file(path)?;
    }
    builder = builder.with_env_overrides();
    if let Some(strategy) = args.strategy {
        builder = builder.with_strategy(strategy.into());
    }
    if let Some(cache_file) = &args.cache_file {
        builder = builder.with_cache_file(cache_file);
    }
    if args.offline {
        builder = builder.offline();
    } else if builder.config().llm.api_key.is_none() {
        return Err("OPENAI_API_KEY is not set. Export it or pass --offline to use the local filter".into());
    }
    let pipeline = builder.build()?;

    let page = capture_input(&args.input).await?;
    let previous_html = match &args.previous {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };

    ::log::info!(
        "Simplifying {} for intent '{}' ({:?} strategy)",
        page.url,
        args.intent,
        pipeline.strategy()
    );
    let start_time = std::time::Instant::now();
    let mut registry = ProxyRegistry::new();
    let output = pipeline
        .run(&page, &args.intent, &previous_html, &mut registry)
        .await;

    let path = output_path(&args.input, args.output.as_deref());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &output.html)?;

    ::log::info!(
        "Kept {} of {} candidate elements in {:.2} seconds",
        output.selected.len(),
        output.candidate_count,
        start_time.elapsed().as_secs_f64()
    );
    println!("Simplified page written to {}", path.display());
    Ok(())
}

/// Read the input file, or capture the URL in a WebDriver session
async fn capture_input(input: &str) -> Result<CapturedPage, Box<dyn std::error::Error>> {
    if !is_web_input(input) {
        let html = std::fs::read_to_string(input)?;
        let absolute = std::fs::canonicalize(Path::new(input))?;
        return Ok(CapturedPage::new(&format!("file://{}", absolute.display()), &html));
    }

    println!("Note: capturing web pages requires a WebDriver server (e.g., ChromeDriver).");
    println!(
        "Set WEBDRIVER_URL environment variable if not using the default {}",
        DEFAULT_WEBDRIVER_URL
    );
    let webdriver_url =
        std::env::var("WEBDRIVER_URL").unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string());

    let mut page = WebDriverPage::open(&webdriver_url, input).await?;
    let captured = page.capture().await;
    if let Err(e) = page.close().await {
        ::log::warn!("Failed to close WebDriver session: {}", e);
    }
    Ok(captured?)
}
