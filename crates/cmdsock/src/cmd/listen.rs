use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use cmdsock_server::{CommandEvent, CommandServer, ServerConfig};
use tracing::{info, warn};

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{server_error, CliError, CliResult, SUCCESS};
use crate::output::{print_command, OutputFormat, Received};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = ServerConfig::new(&args.path);
    if let Some(timeout) = &args.write_timeout {
        config = config.with_write_timeout(Some(parse_duration(timeout)?));
    }

    let server = CommandServer::start(config).map_err(|err| server_error("bind failed", err))?;
    info!(path = %args.path.display(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel::<CommandEvent>();
    let echo = args.echo.then(|| server.broadcaster());
    server.on_command(move |ev| {
        if let Some(broadcaster) = &echo {
            if let Err(err) = broadcaster.send_command(ev.command_id, &ev.payload) {
                warn!(error = %err, "echo broadcast failed");
            }
        }
        let _ = tx.send(ev.clone());
    });
    server.on_all_clients_disconnected(|| info!("all clients disconnected"));

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let source = event.client_id.to_string();
        print_command(
            &Received {
                command_id: event.command_id,
                payload: &event.payload,
                source: &source,
            },
            format,
        );
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    server.shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
