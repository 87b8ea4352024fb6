use chordring_node::command::Command;
use chordring_node::{ChordNode, Config};
use log::{error, info};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let node = ChordNode::from_config(&config);
    if config.bootstrap.is_none() {
        node.create_group();
    }

    let listener = match node.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Chord node {} listening on {}", node.info.id, node.info.address);

    let server_node = node.clone();
    let mut server = tokio::spawn(async move { server_node.run(listener).await });

    let mut departed_cleanly = true;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            finished = &mut server => {
                return match finished {
                    Ok(Ok(())) => ExitCode::SUCCESS,
                    Ok(Err(e)) => {
                        error!("{}", e);
                        ExitCode::FAILURE
                    }
                    Err(e) => {
                        error!("Server task failed: {}", e);
                        ExitCode::FAILURE
                    }
                };
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // stdin closed; keep serving until the node leaves
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read command: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match line.parse::<Command>() {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                let executed = command.execute(&node).await;
                if !executed.output.is_empty() {
                    println!("{}", executed.output);
                }
                if executed.stop {
                    departed_cleanly = !executed.failed;
                    break;
                }
            }
        }
    }

    match server.await {
        Ok(Ok(())) if departed_cleanly => ExitCode::SUCCESS,
        Ok(Ok(())) => ExitCode::FAILURE,
        Ok(Err(e)) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Server task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
