//! Local node parallel process executor.
//!
//! Starts `-n` copies of a program on this node and tells each one its rank,
//! the group size and the address list through the environment.
use std::net::TcpListener;
use std::process::{Child, Command, ExitCode};
use clap::Parser;
use log::{error, info};
use smpi_base::Result;
use smpi_runtime::{CONN_LIST_VAR, RANK_VAR, SIZE_VAR};

const DEFAULT_PROC_COUNT: usize = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of processes to spawn on this node
    #[arg(short = 'n', long)]
    proc_count: Option<usize>,

    /// Address the processes listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// First port to use; free ports are picked when not given
    #[arg(long)]
    base_port: Option<u16>,

    /// Binary to run
    binary: String,

    /// Arguments to binary
    args: Vec<String>,
}

/// Pick one address per rank.
fn conn_list(host: &str, count: usize, base_port: Option<u16>) -> Result<Vec<String>> {
    match base_port {
        Some(base) => Ok((0..count)
            .map(|i| format!("{host}:{}", usize::from(base) + i))
            .collect()),
        None => {
            // Hold every listener until all ports are known so none repeats
            let listeners = (0..count)
                .map(|_| TcpListener::bind((host, 0)))
                .collect::<std::io::Result<Vec<_>>>()?;
            listeners
                .iter()
                .map(|l| -> Result<String> { Ok(l.local_addr()?.to_string()) })
                .collect()
        }
    }
}

fn spawn(args: &Args, rank: usize, size: usize, peers: &str) -> Result<Child> {
    info!("starting process {}", rank);
    let child = Command::new(&args.binary)
        .args(&args.args)
        .env(RANK_VAR, rank.to_string())
        .env(SIZE_VAR, size.to_string())
        .env(CONN_LIST_VAR, peers)
        .spawn()?;
    Ok(child)
}

fn run(args: &Args) -> Result<bool> {
    let proc_count = args.proc_count.unwrap_or(DEFAULT_PROC_COUNT);
    let peers = conn_list(&args.host, proc_count, args.base_port)?.join(",");
    let mut children = vec![];
    for rank in 0..proc_count {
        match spawn(args, rank, proc_count, &peers) {
            Ok(child) => children.push(child),
            Err(err) => {
                error!("failed to spawn process {}: {}", rank, err);
                for child in children.iter_mut() {
                    let _ = child.kill();
                }
                return Err(err);
            }
        }
    }

    // Wait for all children
    let mut success = true;
    for (rank, child) in children.iter_mut().enumerate() {
        let status = child.wait()?;
        info!("child process {} completed with {}", rank, status);
        success &= status.success();
    }
    Ok(success)
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{}", err);
            eprintln!("smpi-exec: {err}");
            ExitCode::from(2)
        }
    }
}
