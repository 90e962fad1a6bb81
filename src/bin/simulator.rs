use chassis_tester::config::DEFAULT_PORT;
use chassis_tester::protocol::{decode_command, encode_feedback};
use chassis_tester::sim::{SimConfig, VehicleModel, SIM_STEP};
use clap::{App, Arg};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const FEEDBACK_BROADCAST_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("chassis-sim")
        .version("0.1.0")
        .about("Simulated drive-by-wire chassis speaking the harness line protocol")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Listen port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("takeover-after")
                .long("takeover-after")
                .value_name("SECS")
                .help("Simulated driver takeover this many seconds after engagement")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-accel")
                .long("no-accel")
                .help("Omit instantaneous acceleration from feedback frames"),
        )
        .arg(
            Arg::with_name("no-error-codes")
                .long("no-error-codes")
                .help("Omit error codes from feedback frames"),
        )
        .get_matches();

    let port = match matches.value_of("port") {
        Some(p) => p.parse::<u16>()?,
        None => DEFAULT_PORT,
    };
    let takeover_after_secs = match matches.value_of("takeover-after") {
        Some(s) => Some(s.parse::<f64>()?),
        None => None,
    };
    let config = SimConfig {
        takeover_after_secs,
        report_acceleration: !matches.is_present("no-accel"),
        report_error_codes: !matches.is_present("no-error-codes"),
    };

    println!("Simulated Drive-by-Wire Chassis");
    println!("===============================");

    let model = Arc::new(Mutex::new(VehicleModel::new(config)));
    let (feedback_tx, _) = broadcast::channel(FEEDBACK_BROADCAST_BUFFER_SIZE);

    let tcp_model = Arc::clone(&model);
    let tcp_feedback_tx = feedback_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_model, tcp_feedback_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(SIM_STEP);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let frame = {
            let mut model_guard = model.lock().await;
            model_guard.step(SIM_STEP.as_secs_f64());
            model_guard.feedback()
        };

        match encode_feedback(&frame) {
            // No receivers just means no client is connected
            Ok(line) => {
                let _ = feedback_tx.send(line);
            }
            Err(e) => {
                error!("Failed to encode feedback: {}", e);
                break;
            }
        }
    }

    tcp_server.abort();
    println!("Chassis simulator stopped");

    Ok(())
}

async fn start_tcp_server(
    port: u16,
    model: Arc<Mutex<VehicleModel>>,
    feedback_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New client connected: {}", addr);
                let client_model = Arc::clone(&model);
                let client_feedback_rx = feedback_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_model, client_feedback_rx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    model: Arc<Mutex<VehicleModel>>,
    mut feedback_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);

    let feedback_task = tokio::spawn(async move {
        loop {
            match feedback_rx.recv().await {
                Ok(mut line) => {
                    line.push('\n');
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        warn!("Failed to send feedback: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagging, skipped {} frames", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match decode_command(trimmed) {
                    Ok(command) => {
                        let seq = command.header.sequence_num;
                        model.lock().await.apply_command(command);
                        debug!(seq, "applied control command");
                    }
                    Err(e) => {
                        error!("Failed to parse command: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    feedback_task.abort();
    Ok(())
}
