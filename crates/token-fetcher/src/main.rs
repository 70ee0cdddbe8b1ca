use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::Context as _;
use token_fetcher::{
    DEFAULT_AUTHORITY_BASE, DEFAULT_SCOPES, ExchangeError, RopcRequest, acquire_token, authority_url,
    write_failure_report,
};

const USAGE: &str = "\
Usage: token-fetcher <tenant_id> <client_id> <username> <password> [scope]
  -t, --timeout <SECS>  HTTP timeout in seconds (default: 30)
  -h, --help            Show this help

Example:
  token-fetcher \\
    12345678-1234-1234-1234-123456789012 \\
    87654321-4321-4321-4321-210987654321 \\
    user@example.com \\
    MyPassword123!

Entra ID App Registration setup:
  1. Go to Azure Portal > App Registrations
  2. Create or select your application
  3. Note the Application (client) ID and Directory (tenant) ID
  4. Go to Authentication > Advanced settings
  5. Enable 'Allow public client flows' (for ROPC)

⚠️  The ROPC flow is for testing only. Use the Authorization Code flow for production.";

#[derive(Debug, Default)]
struct Args {
    positionals: Vec<String>,
    timeout: u64,
    show_usage: bool,
}

struct Invocation {
    tenant_id: String,
    client_id: String,
    username: String,
    password: String,
    scope: Option<String>,
    timeout: Duration,
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
            "-h" | "--help" => args.show_usage = true,
            flag if flag.starts_with('-') => anyhow::bail!("unexpected flag: {flag}"),
            _ => args.positionals.push(arg),
        }
    }

    Ok(args)
}

fn args_to_invocation(args: Args) -> anyhow::Result<Invocation> {
    let mut it = args.positionals.into_iter();

    let (Some(tenant_id), Some(client_id), Some(username), Some(password)) =
        (it.next(), it.next(), it.next(), it.next())
    else {
        anyhow::bail!("missing required arguments");
    };

    let scope = it.next();

    if it.next().is_some() {
        anyhow::bail!("too many arguments");
    }

    Ok(Invocation {
        tenant_id,
        client_id,
        username,
        password,
        scope,
        timeout: Duration::from_secs(args.timeout),
    })
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("TOKEN_FETCHER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

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

    match exchange(invocation).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

async fn exchange(invocation: Invocation) -> anyhow::Result<()> {
    println!("🔐 Authenticating with Entra ID...");
    println!("   Tenant: {}", invocation.tenant_id);
    println!("   Client: {}", invocation.client_id);
    println!("   User: {}", invocation.username);
    println!();

    let client = reqwest::Client::builder()
        .timeout(invocation.timeout)
        .build()
        .context("failed to create HTTP client")?;

    let authority = authority_url(DEFAULT_AUTHORITY_BASE, &invocation.tenant_id);

    let request = RopcRequest {
        client_id: invocation.client_id,
        username: invocation.username,
        password: invocation.password,
        scopes: match invocation.scope {
            Some(scope) => vec![scope],
            None => DEFAULT_SCOPES.iter().map(|scope| (*scope).to_owned()).collect(),
        },
    };

    let mut out = StdoutSink;

    match acquire_token(&mut out, &client, &authority, &request).await {
        Ok(_token) => {
            println!();
            println!("💡 Copy the token above to use with gateway-tester");
            println!();
            Ok(())
        }
        Err(ExchangeError::Rejected(rejection)) => {
            write_failure_report(&mut out, &rejection).context("failed to write the failure report")?;
            anyhow::bail!("the identity provider rejected the token request");
        }
        Err(e) => Err(anyhow::Error::new(e).context("token exchange failed")),
    }
}
