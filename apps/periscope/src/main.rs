//! `periscope serve` runs the proxy service; `periscope open` drives one
//! headless relay session and prints where it landed.

use ps_core::NavigationFailure;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use ps_ipc::NavigationIntent;
use ps_net::url::TargetUrl;
use ps_proxy::PipelineOutcome;
use ps_proxy::ProxyConfig;
use ps_proxy::ProxyPipeline;
use ps_relay::LoadedPage;
use ps_relay::NavigationRelay;
use ps_relay::PageContent;
use ps_relay::PageLoader;
use ps_relay::ServiceLoader;
use ps_relay::Surface;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  periscope serve [--config PATH] [--port N]
  periscope open <address or search text> [--timeout-secs N] [--config PATH] [--service URL]";

/// Slack on top of the fetch timeout so the fetcher reports its own deadline first.
const SETTLE_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Serve {
        config: Option<PathBuf>,
        port: Option<u16>,
    },
    Open {
        input: String,
        timeout: Option<Duration>,
        config: Option<PathBuf>,
        service: Option<String>,
    },
    Help,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("periscope: {message}\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(failure) = run(command) {
        error!("{failure}");
        eprintln!("periscope: {failure}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> PeriscopeResult<()> {
    match command {
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
        Command::Serve { config, port } => serve(config, port),
        Command::Open {
            input,
            timeout,
            config,
            service,
        } => open(&input, timeout, config, service),
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
    let mut args = args.into_iter();
    let Some(subcommand) = args.next() else {
        return Ok(Command::Help);
    };

    let mut config = None;
    let mut port = None;
    let mut timeout = None;
    let mut service = None;
    let mut words = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(flag_value(&mut args, "--config")?)),
            "--port" => {
                let value = flag_value(&mut args, "--port")?;
                port = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port `{value}`"))?,
                );
            }
            "--timeout-secs" => {
                let value = flag_value(&mut args, "--timeout-secs")?;
                let secs = value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| format!("invalid timeout `{value}`"))?;
                timeout = Some(Duration::from_secs(secs));
            }
            "--service" => service = Some(flag_value(&mut args, "--service")?),
            "-h" | "--help" => return Ok(Command::Help),
            flag if flag.starts_with("--") => return Err(format!("unknown option `{flag}`")),
            _ => words.push(arg),
        }
    }

    match subcommand.as_str() {
        "serve" => {
            if let Some(extra) = words.first() {
                return Err(format!("unexpected argument `{extra}`"));
            }
            if timeout.is_some() || service.is_some() {
                return Err("`serve` accepts only --config and --port".to_owned());
            }
            Ok(Command::Serve { config, port })
        }
        "open" => {
            if words.is_empty() {
                return Err("`open` needs an address or search text".to_owned());
            }
            if port.is_some() {
                return Err("`open` does not accept --port".to_owned());
            }
            Ok(Command::Open {
                input: words.join(" "),
                timeout,
                config,
                service,
            })
        }
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => Err(format!("unknown command `{other}`")),
    }
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("missing value after {flag}"))
}

fn serve(config_path: Option<PathBuf>, port: Option<u16>) -> PeriscopeResult<()> {
    let mut config = ProxyConfig::load(config_path.as_deref())?;
    if let Some(port) = port {
        config.bind_port = port;
    }

    let handle = ps_proxy::start(config)?;
    println!("periscope proxy listening on http://{}/proxy", handle.local_addr());
    handle.wait();
    Ok(())
}

fn open(
    input: &str,
    timeout: Option<Duration>,
    config_path: Option<PathBuf>,
    service: Option<String>,
) -> PeriscopeResult<()> {
    let config = ProxyConfig::load(config_path.as_deref())?;
    let timeout = timeout.unwrap_or_else(|| config.fetch_timeout() + SETTLE_SLACK);

    let loader: Arc<dyn PageLoader> = match service {
        Some(endpoint) => {
            let endpoint = TargetUrl::parse(&endpoint)?;
            Arc::new(ServiceLoader::new(endpoint, timeout)?)
        }
        None => Arc::new(InProcessLoader::new(ProxyPipeline::new(&config)?)),
    };

    let mut relay = NavigationRelay::new(loader, config.normalizer());
    let tab_id = relay.open_tab();
    let started = relay.submit_address(tab_id, input)?;

    if started.is_some() && !relay.wait_until_settled(tab_id, timeout) {
        return Err(PeriscopeError::new(
            "relay.settle_timeout",
            format!("no result within {}s", timeout.as_secs()),
        ));
    }

    let Some(tab) = relay.tab(tab_id) else {
        return Err(PeriscopeError::new("relay.tab_unknown", "tab vanished"));
    };

    if let Some(url) = tab.committed_url() {
        println!("url:   {url}");
    }
    if let Some(title) = tab.title() {
        println!("title: {title}");
    }

    match tab.surface() {
        Surface::Content(PageContent::Html(html)) => {
            println!("html:  {} bytes", html.len());
            Ok(())
        }
        Surface::Content(PageContent::Binary {
            content_type,
            bytes,
        }) => {
            println!(
                "body:  {} bytes ({})",
                bytes.len(),
                content_type.as_deref().unwrap_or("unknown type")
            );
            Ok(())
        }
        Surface::Error(message) => Err(PeriscopeError::new("relay.navigation_failed", message)),
        Surface::Blank | Surface::Loading => match tab.last_error() {
            Some(message) => Err(PeriscopeError::new("relay.navigation_failed", message)),
            None => Ok(()),
        },
    }
}

/// Runs the proxy pipeline on the relay's worker thread, no service hop.
struct InProcessLoader(ProxyPipeline);

impl InProcessLoader {
    fn new(pipeline: ProxyPipeline) -> Self {
        Self(pipeline)
    }
}

impl PageLoader for InProcessLoader {
    fn load(&self, intent: &NavigationIntent) -> Result<LoadedPage, NavigationFailure> {
        outcome_to_page(self.0.run(intent.clone().into_fetch_request()))
    }
}

fn outcome_to_page(outcome: PipelineOutcome) -> Result<LoadedPage, NavigationFailure> {
    match outcome {
        PipelineOutcome::Document {
            html,
            final_url,
            title,
            degraded,
        } => Ok(LoadedPage {
            final_url,
            title,
            content: PageContent::Html(html),
            degraded,
        }),
        PipelineOutcome::Passthrough {
            body,
            content_type,
            final_url,
        } => Ok(LoadedPage {
            final_url,
            title: None,
            content: PageContent::Binary {
                content_type,
                bytes: body,
            },
            degraded: false,
        }),
        PipelineOutcome::Failed(failure) => Err(failure),
    }
}
