use clap::{Parser, ValueEnum};
use retro_overlay::GenerationStrategy;
use retro_overlay::utils::sanitize_filename;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "retro-overlay")]
#[command(about = "Builds a simplified, intent-focused version of a web page")]
#[command(version)]
pub struct Args {
    /// HTML file to simplify, or an http(s) URL captured through WebDriver
    pub input: String,

    /// What the user wants to do on the page
    pub intent: String,

    /// Output file (default: output/simplified_<name>.html)
    #[arg(short, long)]
    pub output: Option<String>,

    /// How the simplified document is produced
    #[arg(short, long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Never call the language model; use the local filter only
    #[arg(long)]
    pub offline: bool,

    /// Previously generated document to patch (patch strategy)
    #[arg(long)]
    pub previous: Option<String>,

    /// JSON file persisting model answers between runs
    #[arg(long)]
    pub cache_file: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Assemble,
    Patch,
    Rewrite,
}

impl From<StrategyArg> for GenerationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Assemble => GenerationStrategy::Assemble,
            StrategyArg::Patch => GenerationStrategy::Patch,
            StrategyArg::Rewrite => GenerationStrategy::Rewrite,
        }
    }
}

pub fn is_web_input(input: &str) -> bool {
    url::Url::parse(input).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Where the simplified document is written
pub fn output_path(input: &str, output: Option<&str>) -> PathBuf {
    if let Some(output) = output {
        let path = PathBuf::from(output);
        return if path.extension().is_some_and(|ext| ext == "html") {
            path
        } else {
            PathBuf::from(format!("{}.html", output))
        };
    }

    let stem = if is_web_input(input) {
        sanitize_filename(input.trim_end_matches('/'))
    } else {
        Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string())
    };
    Path::new("output").join(format!("simplified_{}.html", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path("pages/shop.html", None),
            PathBuf::from("output/simplified_shop.html")
        );
        assert_eq!(
            output_path("https://example.com/a/", None),
            PathBuf::from("output/simplified_example.com_a.html")
        );
        assert_eq!(output_path("x.html", Some("out/result")), PathBuf::from("out/result.html"));
        assert_eq!(output_path("x.html", Some("out/r.html")), PathBuf::from("out/r.html"));
    }

    #[test]
    fn test_web_input_detection() {
        assert!(is_web_input("https://example.com"));
        assert!(!is_web_input("page.html"));
        assert!(!is_web_input("file:///tmp/page.html"));
    }
}
