use chassis_tester::config::{DEFAULT_HOST, DEFAULT_PORT};
use chassis_tester::console::restore_terminal;
use chassis_tester::*;
use clap::{App, Arg, ArgMatches};
use colored::*;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing::{error, Level};

#[tokio::main]
async fn main() {
    let matches = App::new("chassis-tester")
        .version("0.1.0")
        .author("Vehicle Integration Team")
        .about("Drive-by-wire chassis validation harness")
        .arg(
            Arg::with_name("level")
                .short("l")
                .long("level")
                .value_name("LEVEL")
                .help("Highest test tier to run: 1 static, 2 low speed, 3 high dynamic [default: 1]")
                .takes_value(true)
                .possible_values(&["1", "2", "3"]),
        )
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Vehicle bridge host address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Vehicle bridge port")
                .takes_value(true)
                .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|_| "Port must be a number".to_string())),
        )
        .arg(
            Arg::with_name("sim")
                .long("sim")
                .help("Run against the in-process simulated vehicle"),
        )
        .arg(
            Arg::with_name("takeover-after")
                .long("takeover-after")
                .value_name("SECS")
                .help("Simulated driver takeover this many seconds after engagement (with --sim)")
                .takes_value(true)
                .validator(|v| v.parse::<f64>().map(|_| ()).map_err(|_| "Expected seconds".to_string())),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON run configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Report format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log harness internals to stderr"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::INFO } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Configuration error:".bright_red(), e);
            process::exit(2);
        }
    };

    let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
    let bus: Arc<dyn CommandBus> = if matches.is_present("sim") {
        let sim_config = SimConfig {
            takeover_after_secs: matches.value_of("takeover-after").and_then(|v| v.parse().ok()),
            ..SimConfig::default()
        };
        Arc::new(SimulatedVehicle::spawn(sim_config, cache.clone()))
    } else {
        match TcpBus::connect(&config.endpoint(), cache.clone()).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                error!(error = %e, "could not reach the vehicle");
                eprintln!("{} {}", "Connection failed:".bright_red(), e);
                process::exit(1);
            }
        }
    };

    let input = match TerminalInput::new().map_err(|e| HarnessError::Terminal(e.to_string())) {
        Ok(input) => input,
        Err(e) => {
            bus.close();
            error!(error = %e, "operator terminal unavailable");
            eprintln!("{} {}", "Startup failed:".bright_red(), e);
            process::exit(1);
        }
    };

    let mut orchestrator = Orchestrator::with_standard_suite(config);
    let report = orchestrator
        .run(Harness {
            bus,
            cache,
            input: Box::new(input),
            sink: Arc::new(TerminalSink::new()),
        })
        .await;
    restore_terminal();

    match matches.value_of("format") {
        Some("json") => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} {}", "Report serialization failed:".bright_red(), e),
        },
        _ => print_report(&report),
    }
}

fn build_config(matches: &ArgMatches<'_>) -> HarnessResult<HarnessConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => HarnessConfig::load(Path::new(path))?,
        None => HarnessConfig::default(),
    };

    if let Some(level) = matches.value_of("level") {
        config.level = level
            .parse()
            .map_err(|_| HarnessError::Config(format!("invalid level {level}")))?;
    }
    if let Some(host) = matches.value_of("host") {
        config.host = host.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        config.port = port
            .parse()
            .map_err(|_| HarnessError::Config(format!("invalid port {port}")))?;
    }
    if config.host.is_empty() {
        config.host = DEFAULT_HOST.to_string();
    }
    if config.port == 0 {
        config.port = DEFAULT_PORT;
    }

    config.validate()?;
    Ok(config)
}

fn print_report(report: &SuiteReport) {
    println!();
    println!("{}", "Test Summary".bright_blue().bold());
    println!("{}", "=".repeat(72));

    for record in &report.results {
        let status = if record.verdict.pass {
            "PASS".bright_green().bold()
        } else {
            "FAIL".bright_red().bold()
        };
        println!(
            "{:>3}  L{}  {:<48} {}  {:>6}ms",
            record.index,
            record.tier.level(),
            record.name,
            status,
            record.duration_ms
        );
        if !record.verdict.pass {
            println!("          {}", record.verdict.detail.dimmed());
        }
    }
    for name in &report.skipped {
        println!("  -   --  {:<48} {}", name, "SKIPPED".yellow());
    }

    println!("{}", "-".repeat(72));
    let outcome = match &report.outcome {
        SuiteOutcome::Completed => "COMPLETED".bright_green(),
        SuiteOutcome::Aborted => "ABORTED".bright_red(),
        SuiteOutcome::Faulted(reason) => format!("FAULTED ({reason})").bright_red(),
    };
    println!(
        "{} {}   {} {}   {} {}   {} {}",
        "Outcome:".bright_white(),
        outcome,
        "Passed:".bright_white(),
        report.passed().to_string().bright_green(),
        "Failed:".bright_white(),
        report.failed().to_string().bright_red(),
        "Commands:".bright_white(),
        report.commands_sent
    );
    if let Some(cause) = report.abort_cause.filter(|c| *c != AbortCause::Finalization) {
        println!("{} {:?}", "Abort cause:".bright_white(), cause);
    }
}
