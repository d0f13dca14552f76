use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use seqgen::{continuation, BudgetMode, CandleModel, GeneratorConfig, PromptFamily};

const USAGE: &str = "Usage: seqgen [--config FILE] [--model FILE] [--tokenizer FILE] \
[--family llama|qwen|mistral] [--max-tokens N] [--budget generated|total] PROMPT...";

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    model: Option<PathBuf>,
    tokenizer: Option<PathBuf>,
    family: Option<PromptFamily>,
    max_tokens: Option<usize>,
    budget: Option<BudgetMode>,
    prompts: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{} requires a value\n{}", flag, USAGE))
        };

        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
            "--model" => parsed.model = Some(PathBuf::from(value("--model")?)),
            "--tokenizer" => parsed.tokenizer = Some(PathBuf::from(value("--tokenizer")?)),
            "--family" => {
                parsed.family = Some(value("--family")?.parse().map_err(anyhow::Error::msg)?)
            }
            "--max-tokens" => {
                let raw = value("--max-tokens")?;
                parsed.max_tokens = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid --max-tokens '{}'", raw))?,
                );
            }
            "--budget" => {
                parsed.budget = Some(value("--budget")?.parse().map_err(anyhow::Error::msg)?)
            }
            "-h" | "--help" => bail!("{}", USAGE),
            flag if flag.starts_with("--") => bail!("Unknown flag '{}'\n{}", flag, USAGE),
            _ => parsed.prompts.push(arg),
        }
    }

    Ok(parsed)
}

fn build_config(args: &CliArgs) -> Result<GeneratorConfig> {
    let mut config = match (&args.config, &args.model) {
        (Some(path), _) => GeneratorConfig::load(path)?,
        (None, Some(model)) => GeneratorConfig::for_model(model.clone()),
        (None, None) => bail!("Either --config or --model is required\n{}", USAGE),
    };

    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if args.tokenizer.is_some() {
        config.tokenizer_path = args.tokenizer.clone();
    }
    if args.family.is_some() {
        config.family = args.family;
    }
    if args.max_tokens.is_some() {
        config.max_tokens = args.max_tokens;
    }
    if let Some(budget) = args.budget {
        config.budget = budget;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.prompts.is_empty() {
        bail!("At least one prompt is required\n{}", USAGE);
    }

    let config = build_config(&args)?;
    let model = CandleModel::load(&config)?;

    let mut generator = continuation(model, config.max_tokens).with_budget_mode(config.budget);
    info!(prompts = args.prompts.len(), max_tokens = ?config.max_tokens, "Generating");

    let completions = generator.generate(args.prompts)?;
    for text in completions.into_vec() {
        println!("{}", text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_and_prompts_are_split() {
        let parsed = parse_args(args(&[
            "--model",
            "m.gguf",
            "--max-tokens",
            "16",
            "--budget",
            "total",
            "first prompt",
            "second prompt",
        ]))
        .expect("parse args");

        assert_eq!(parsed.model, Some(PathBuf::from("m.gguf")));
        assert_eq!(parsed.max_tokens, Some(16));
        assert_eq!(parsed.budget, Some(BudgetMode::Total));
        assert_eq!(parsed.prompts, vec!["first prompt", "second prompt"]);
    }

    #[test]
    fn bad_flags_are_reported() {
        assert!(parse_args(args(&["--max-tokens"])).is_err());
        assert!(parse_args(args(&["--max-tokens", "many"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
    }

    #[test]
    fn cli_overrides_reach_the_config() {
        let parsed = parse_args(args(&["--model", "qwen2.5.gguf", "--max-tokens", "4", "hi"]))
            .expect("parse args");
        let config = build_config(&parsed).expect("build config");

        assert_eq!(config.max_tokens, Some(4));
        assert_eq!(config.resolved_family(), PromptFamily::Qwen);

        let zero = parse_args(args(&["--model", "m.gguf", "--max-tokens", "0", "hi"]))
            .expect("parse args");
        assert!(build_config(&zero).is_err());
    }
}
