#![allow(clippy::result_large_err)]

use anyhow::Context;
use chrono::{DateTime, Utc};
use launchpad::app::{LaunchpadApp, StartOutcome};
use launchpad::config::{LaunchpadConfig, StackConfig};
use launchpad::orchestrator::{StartRequest, StopReport};
use launchpad::readiness::ProfileResolver;
use launchpad::status::{diagnostics, read_log, Level, LogFilter, LogQuery, MASTER_LOG_FILE};
use launchpad::telemetry;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const EXIT_FAILURE: u8 = 1;
const EXIT_STRUCTURAL: u8 = 2;

enum CliCommand {
    Start(StartArgs),
    Stop,
    Restart(StartArgs),
    HealthCheck,
    Profiles,
    Validate { stacks: Vec<String> },
    Logs { filter: LogFilter, summary: bool },
    Help,
}

#[derive(Default)]
struct StartArgs {
    profile: Option<String>,
    force: bool,
    dev_mode: bool,
}

struct Cli {
    stack_path: Option<String>,
    command: CliCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    let Cli {
        stack_path,
        command,
    } = parse_cli_args(std::env::args().skip(1))?;

    let code = match command {
        CliCommand::Help => {
            print_help();
            0
        }
        CliCommand::Validate { stacks } => run_validate_command(&stacks),
        CliCommand::Logs { filter, summary } => {
            let config = load_config(stack_path)?;
            run_logs_command(Path::new(&config.log_dir), filter, summary)?
        }
        CliCommand::Profiles => {
            let config = load_config(stack_path)?;
            let stack = config
                .load_stack()
                .context("failed to load stack declaration")?;
            print_profiles(&stack);
            0
        }
        CliCommand::Start(args) => {
            let app = initialise_app(stack_path)?;
            let request = args.into_request(&app);
            match app.start_until_signal(request).await {
                Ok(outcome) => report_start(outcome),
                Err(err) => report_start_error(err)?,
            }
        }
        CliCommand::Restart(args) => {
            let app = initialise_app(stack_path)?;
            let request = args.into_request(&app);
            match app.restart(request).await {
                Ok((report, outcome)) => {
                    print_stop_report(&report);
                    report_start(outcome)
                }
                Err(err) => report_start_error(err)?,
            }
        }
        CliCommand::Stop => {
            let app = initialise_app(stack_path)?;
            let report = app.orchestrator().stop().await;
            print_stop_report(&report);
            0
        }
        CliCommand::HealthCheck => {
            let app = initialise_app(stack_path)?;
            let results = app.orchestrator().health_check().await;
            let width = results.keys().map(String::len).max().unwrap_or(0);
            for (name, health) in &results {
                let verdict = if health.healthy { "healthy" } else { "unhealthy" };
                match &health.detail {
                    Some(detail) => println!("{name:<width$}  {verdict:<9}  {}  ({detail})", health.check),
                    None => println!("{name:<width$}  {verdict:<9}  {}", health.check),
                }
            }
            0
        }
    };

    Ok(ExitCode::from(code))
}

impl StartArgs {
    fn into_request(self, app: &LaunchpadApp) -> StartRequest {
        let profile = self
            .profile
            .unwrap_or_else(|| app.orchestrator().default_profile().to_string());
        StartRequest::new(profile)
            .with_force(self.force)
            .with_dev_mode(self.dev_mode)
    }
}

fn load_config(stack_path: Option<String>) -> anyhow::Result<LaunchpadConfig> {
    let mut config = LaunchpadConfig::load().context("failed to load configuration")?;
    if let Some(path) = stack_path {
        config.stack_path = Some(path);
    }
    Ok(config)
}

fn initialise_app(stack_path: Option<String>) -> anyhow::Result<LaunchpadApp> {
    let config = load_config(stack_path)?;
    LaunchpadApp::initialise(config).context("failed to construct application")
}

fn report_start(outcome: StartOutcome) -> u8 {
    println!("{}", outcome.summary);
    if let Some(report) = outcome.teardown.as_ref() {
        print_stop_report(report);
    }
    outcome.summary.exit_code()
}

/// Structural errors map to their own exit code; anything else is fatal.
fn report_start_error(err: launchpad::error::Error) -> anyhow::Result<u8> {
    if let Some(structural) = err.structural() {
        eprintln!("error: {structural}");
        return Ok(EXIT_STRUCTURAL);
    }
    Err(err).context("startup failed")
}

fn print_stop_report(report: &StopReport) {
    if report.interrupted_run {
        println!("interrupted the in-flight startup run");
    }
    println!("stopped {} service(s): {}", report.stopped.len(), report.stopped.join(", "));
    for (service, error) in &report.errors {
        println!("  {service}: {error}");
    }
}

fn print_profiles(stack: &StackConfig) {
    let resolver = ProfileResolver::new(stack);
    for profile in resolver.profiles() {
        let marker = if profile.name == stack.defaults.default_profile {
            " (default)"
        } else {
            ""
        };
        println!("{}{marker}", profile.name);
        if let Some(description) = profile.description.as_deref() {
            println!("  {description}");
        }
        match resolver.resolve(&profile.name) {
            Ok(services) => {
                let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
                println!("  services: {}", names.join(", "));
            }
            Err(err) => println!("  error: {err}"),
        }
    }
}

fn run_validate_command(stacks: &[String]) -> u8 {
    let mut code = 0;

    for stack in stacks {
        let path = PathBuf::from(stack);
        let config = match StackConfig::from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}: {err}", path.display());
                code = code.max(EXIT_FAILURE);
                continue;
            }
        };

        let resolver = ProfileResolver::new(&config);
        let mut structural = false;
        for profile in resolver.profile_names() {
            if let Err(err) = resolver.resolve(profile) {
                eprintln!("{}: profile `{profile}`: {err}", path.display());
                structural = true;
            }
        }
        if let Err(err) = resolver.graph().full_order() {
            eprintln!("{}: {err}", path.display());
            structural = true;
        }

        if structural {
            code = EXIT_STRUCTURAL;
        } else {
            println!("validated {}", path.display());
        }
    }

    code
}

fn run_logs_command(log_dir: &Path, filter: LogFilter, summary: bool) -> anyhow::Result<u8> {
    let master = log_dir.join(MASTER_LOG_FILE);
    let entries = read_log(&master)
        .with_context(|| format!("failed to read {}", master.display()))?;
    let query = LogQuery::new(entries, filter);

    if summary {
        println!("{:<24} {:>6} {:>8} {:>6} {:>8}", "component", "info", "warnings", "errors", "success");
        for (component, counts) in diagnostics(query.iter()) {
            println!(
                "{component:<24} {:>6} {:>8} {:>6} {:>8}",
                counts.info, counts.warnings, counts.errors, counts.successes
            );
        }
    } else {
        for entry in &query {
            println!("{}", entry.to_line());
        }
    }

    Ok(0)
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut stack_path = None;

    let command = loop {
        let Some(arg) = args.next() else {
            break CliCommand::Help;
        };

        match arg.as_str() {
            "-s" | "--stack" => {
                if stack_path.is_some() {
                    anyhow::bail!("stack path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                stack_path = Some(value);
            }
            "-h" | "--help" | "help" => break CliCommand::Help,
            "start" => break CliCommand::Start(parse_start_args(args.by_ref())?),
            "restart" => break CliCommand::Restart(parse_start_args(args.by_ref())?),
            "stop" => break no_extra_args(CliCommand::Stop, args.by_ref())?,
            "health-check" => break no_extra_args(CliCommand::HealthCheck, args.by_ref())?,
            "profiles" => break no_extra_args(CliCommand::Profiles, args.by_ref())?,
            "validate" => {
                let stacks: Vec<String> = args.by_ref().collect();
                if stacks.is_empty() {
                    anyhow::bail!("launchpad validate requires at least one stack path");
                }
                break CliCommand::Validate { stacks };
            }
            "logs" => break parse_logs_args(args.by_ref())?,
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    };

    Ok(Cli {
        stack_path,
        command,
    })
}

fn parse_start_args(args: &mut impl Iterator<Item = String>) -> anyhow::Result<StartArgs> {
    let mut parsed = StartArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-p" | "--profile" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected profile name after {arg}"))?;
                parsed.profile = Some(value);
            }
            "-f" | "--force" => parsed.force = true,
            "-d" | "--dev-mode" => parsed.dev_mode = true,
            other => anyhow::bail!("unrecognised start argument `{other}`"),
        }
    }

    Ok(parsed)
}

fn parse_logs_args(args: &mut impl Iterator<Item = String>) -> anyhow::Result<CliCommand> {
    let mut filter = LogFilter::all();
    let mut summary = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--level" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected level after --level"))?;
                let level: Level = value.parse().map_err(anyhow::Error::msg)?;
                filter = filter.with_level(level);
            }
            "--component" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected component after --component"))?;
                filter = filter.with_component(value);
            }
            "--since" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected RFC 3339 timestamp after --since"))?;
                let since = DateTime::parse_from_rfc3339(&value)
                    .with_context(|| format!("invalid --since timestamp `{value}`"))?
                    .with_timezone(&Utc);
                filter = filter.since(since);
            }
            "--summary" => summary = true,
            other => anyhow::bail!("unrecognised logs argument `{other}`"),
        }
    }

    Ok(CliCommand::Logs { filter, summary })
}

fn no_extra_args(
    command: CliCommand,
    args: &mut impl Iterator<Item = String>,
) -> anyhow::Result<CliCommand> {
    match args.next() {
        Some(extra) => anyhow::bail!("unexpected argument `{extra}`"),
        None => Ok(command),
    }
}

fn print_help() {
    println!(
        "\
Usage: launchpad [--stack <PATH>] <COMMAND>

Commands:
  start [--profile <NAME>] [--force] [--dev-mode]
                          Build, start and probe the profile's services
  stop                    Stop services in reverse startup order
  restart [--profile <NAME>] [--force] [--dev-mode]
                          Stop, then start again
  health-check            Probe every service once without changing state
  profiles                List profiles and the services they resolve to
  validate <STACK>...     Validate stack declaration files
  logs [--level <LEVEL>]... [--component <NAME>]... [--since <RFC3339>] [--summary]
                          Query the master log

Options:
  -s, --stack <PATH>      Stack declaration (defaults to the built-in stack)
  -h, --help              Print this help message

Exit status: 0 on success (including degraded runs), 2 on structural errors,
1 on other failures.
"
    );
}
