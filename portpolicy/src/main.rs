use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use portpolicy::{
    publish_redirects, ConfigLoader, ConfigValidator, L4Policy, LabelSet, MemoryBackend,
    PolicyContext, PolicyRepository, SelectorCache,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "portpolicy")]
#[command(about = "Compute L4/L7 port policy for an identity")]
struct Args {
    /// Policy file path
    #[arg(long, short = 'c', global = true, env = "PORTPOLICY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the computed policy model for an identity
    Compute {
        /// Identity labels, e.g. k8s:app=web (repeat or comma-separate)
        #[arg(long, short = 'i', value_delimiter = ',')]
        identity: Vec<String>,

        #[arg(long, short = 'd', value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Compute a policy and publish its redirects to an in-memory backend
    Redirects {
        #[arg(long, short = 'i', value_delimiter = ',')]
        identity: Vec<String>,

        #[arg(long)]
        pretty: bool,
    },
    /// Check a policy file without computing anything
    Validate,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DirectionArg {
    Ingress,
    Egress,
    Both,
}

#[derive(Serialize)]
struct ComputeOutput<'a> {
    revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingress: Option<&'a [portpolicy::PolicyRule]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    egress: Option<&'a [portpolicy::PolicyRule]>,
    has_generic_redirect: bool,
    has_named_parser_redirect: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::load_or_default(args.config.clone())?;

    // Initialize logging
    let env_filter = if args.verbose || config.common.verbose {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
    } else {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    ConfigValidator::validate(&config).context("invalid policy file")?;

    match args.command {
        Command::Validate => {
            println!("ok: {} rules, {} secrets", config.rules.len(), config.secrets.len());
        }
        Command::Compute {
            identity,
            direction,
            pretty,
        } => {
            let policy = compute(&config, &identity)?;
            let model = policy.model()?;
            let output = ComputeOutput {
                revision: policy.revision(),
                ingress: (direction != DirectionArg::Egress).then_some(model.ingress.as_slice()),
                egress: (direction != DirectionArg::Ingress).then_some(model.egress.as_slice()),
                has_generic_redirect: policy.has_generic_redirect(),
                has_named_parser_redirect: policy.has_named_parser_redirect(),
            };
            print_json(&output, pretty)?;
        }
        Command::Redirects { identity, pretty } => {
            let policy = compute(&config, &identity)?;
            let backend = MemoryBackend::new();
            publish_redirects(&backend, None, &policy, config.publish_timeout()).await?;
            print_json(&portpolicy::backend::redirects(&policy)?, pretty)?;
        }
    }

    Ok(())
}

fn compute(config: &portpolicy::Config, identity: &[String]) -> anyhow::Result<std::sync::Arc<L4Policy>> {
    let identity = LabelSet::parse(identity).context("invalid identity label")?;
    let rules = config.to_rules()?;
    let secrets = config.secret_store()?;
    let selectors = SelectorCache::new();
    let ctx = PolicyContext::new(&selectors, &secrets);

    let repository = PolicyRepository::new();
    let policy = repository
        .regenerate(&identity.to_string(), &ctx, &rules, &identity)
        .with_context(|| format!("policy computation failed for {}", identity))?;
    Ok(policy)
}

fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}
