use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::Context as _;
use gateway_tester::{DEFAULT_REGION, ProbeCfg, probe, resolve_endpoint};

const USAGE: &str = "\
Usage: gateway-tester <gateway> <jwt_token> [aws_region]
  <gateway>     AgentCore gateway ARN or HTTP(S) MCP endpoint URL
  <jwt_token>   Bearer token accepted by the gateway's authorizer
  [aws_region]  Region used when the ARN does not carry one (default: us-west-2)

  -t, --timeout <SECS>  HTTP timeout in seconds (default: 30)
      --keep-going      Continue with tool listing even if session initialization fails
  -h, --help            Show this help

Example:
  gateway-tester arn:aws:bedrock-agentcore:us-west-2:123456789012:gateway/GATEWAY123 eyJraWQ... us-west-2";

#[derive(Debug, Default)]
struct Args {
    positionals: Vec<String>,
    timeout: u64,
    keep_going: bool,
    show_usage: bool,
}

struct Invocation {
    endpoint: String,
    jwt_token: String,
    timeout: Duration,
    keep_going: bool,
}

fn parse_cli(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut args = Args {
        timeout: 30,
        ..Default::default()
    };

    let mut it = raw.into_iter();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-t" | "--timeout" => {
                let value = it.next().context("missing value for --timeout")?;
                args.timeout = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --timeout: {value}"))?;
            }
            "--keep-going" => args.keep_going = true,
            "-h" | "--help" => args.show_usage = true,
            flag if flag.starts_with('-') => anyhow::bail!("unexpected flag: {flag}"),
            _ => args.positionals.push(arg),
        }
    }

    Ok(args)
}

fn args_to_invocation(args: Args) -> anyhow::Result<Invocation> {
    let mut it = args.positionals.into_iter();

    let (Some(gateway), Some(jwt_token)) = (it.next(), it.next()) else {
        anyhow::bail!("missing required arguments");
    };

    let region = it.next().unwrap_or_else(|| DEFAULT_REGION.to_owned());

    if it.next().is_some() {
        anyhow::bail!("too many arguments");
    }

    Ok(Invocation {
        endpoint: resolve_endpoint(&gateway, &region)?,
        jwt_token,
        timeout: Duration::from_secs(args.timeout),
        keep_going: args.keep_going,
    })
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("GATEWAY_TESTER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

struct StdoutSink;

impl fmt::Write for StdoutSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        print!("{s}");
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let invocation = parse_cli(env::args().skip(1))
        .and_then(|args| {
            if args.show_usage {
                println!("{USAGE}");
                std::process::exit(0);
            }
            args_to_invocation(args)
        })
        .unwrap_or_else(|e| {
            eprintln!("{e:#}");
            println!("{USAGE}");
            std::process::exit(1);
        });

    init_logging();

    let cfg = ProbeCfg {
        endpoint: invocation.endpoint,
        bearer_token: invocation.jwt_token,
        timeout: Some(invocation.timeout),
        keep_going: invocation.keep_going,
    };

    let mut out = StdoutSink;

    match probe(&mut out, cfg).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
