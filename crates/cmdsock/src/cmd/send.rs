use std::fs;

use cmdsock_frame::FrameConfig;
use cmdsock_server::CommandClient;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{server_error, CliResult, SUCCESS};
use crate::output::{print_command, OutputFormat, Received};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let config = FrameConfig {
        read_timeout: Some(wait_timeout),
        write_timeout: Some(wait_timeout),
        ..FrameConfig::default()
    };
    let mut client = CommandClient::connect_with_config(&args.path, config)
        .map_err(|err| server_error("connect failed", err))?;

    client
        .send_command(args.command, &payload)
        .map_err(|err| server_error("send failed", err))?;

    if args.wait {
        let frame = client
            .recv()
            .map_err(|err| server_error("receive failed", err))?;
        print_command(
            &Received {
                command_id: frame.command_id,
                payload: &frame.payload,
                source: "server",
            },
            format,
        );
    }

    client
        .close()
        .map_err(|err| server_error("close failed", err))?;
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}
