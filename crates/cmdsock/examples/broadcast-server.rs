//! Broadcast server: every command a client sends is re-broadcast to all
//! connected clients.
//!
//! Run with:
//!   cargo run --example broadcast-server
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/cmdsock-broadcast-<pid>/cmd.sock \
//!     --command 5 --data hello --wait

use std::fs;
use std::sync::mpsc;

use cmdsock::CommandServer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("cmdsock-broadcast-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("cmd.sock");

    let server = CommandServer::start_at(&sock_path)?;
    eprintln!("Listening on {}", server.path().display());

    let broadcaster = server.broadcaster();
    server.on_command(move |ev| {
        eprintln!(
            "{} sent command {} ({} bytes)",
            ev.client_id,
            ev.command_id,
            ev.payload.len()
        );
        match broadcaster.send_command(ev.command_id, &ev.payload) {
            Ok(report) => eprintln!("  relayed to {} client(s)", report.delivered),
            Err(err) => eprintln!("  relay failed: {err}"),
        }
    });

    // Stop once the last client leaves.
    let (done_tx, done_rx) = mpsc::channel();
    server.on_all_clients_disconnected(move || {
        let _ = done_tx.send(());
    });
    done_rx.recv()?;

    eprintln!("All clients gone; shutting down");
    server.shutdown();
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
