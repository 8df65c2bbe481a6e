use std::env;
use std::io::Write;
use std::path::PathBuf;

use tools::{load_config, read_snapshot_lines, replay, validate_snapshot_text};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = real_main().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn real_main() -> Result<(), String> {
    let mut args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(usage());
    }

    let cmd = args[1].clone();
    args.drain(0..2);

    match cmd.as_str() {
        "replay" => cmd_replay(args).await,
        "validate" => cmd_validate(args),
        _ => Err(usage()),
    }
}

async fn cmd_replay(args: Vec<String>) -> Result<(), String> {
    // firemap replay <snapshots.jsonl> [--config FILE] [--summary]
    let mut input: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut summary = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a value".to_string());
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--summary" => summary = true,
            s if s.starts_with('-') => {
                return Err(format!("unknown arg: {s}\n\n{}", usage()));
            }
            s => {
                if input.is_some() {
                    return Err(format!("unexpected arg: {s}\n\n{}", usage()));
                }
                input = Some(PathBuf::from(s));
            }
        }
        i += 1;
    }

    let input = input.ok_or_else(usage)?;
    let config = load_config(config_path.as_deref())?;
    let snapshots = read_snapshot_lines(&input)?;
    info!(snapshots = snapshots.len(), "replaying {input:?}");

    let outcome = replay(&config, snapshots).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if summary {
        let text = serde_json::to_string_pretty(&outcome).map_err(|e| format!("encode: {e}"))?;
        writeln!(out, "{text}").map_err(|e| format!("write: {e}"))?;
    } else {
        for event in &outcome.events {
            let line = serde_json::to_string(event).map_err(|e| format!("encode: {e}"))?;
            writeln!(out, "{line}").map_err(|e| format!("write: {e}"))?;
        }
    }
    Ok(())
}

fn cmd_validate(args: Vec<String>) -> Result<(), String> {
    // firemap validate <snapshot.json>
    if args.len() != 1 {
        return Err(usage());
    }
    let path = PathBuf::from(&args[0]);
    let text = std::fs::read_to_string(&path).map_err(|e| format!("read {path:?}: {e}"))?;
    let report = validate_snapshot_text(&text)?;

    let text = serde_json::to_string_pretty(&report).map_err(|e| format!("encode: {e}"))?;
    println!("{text}");
    if !report.rejected.is_empty() {
        return Err(format!("{} invalid record(s)", report.rejected.len()));
    }
    Ok(())
}

fn usage() -> String {
    let exe = env::args().next().unwrap_or_else(|| "firemap".to_string());
    format!(
        "Usage:\n  {exe} replay <snapshots.jsonl> [--config FILE] [--summary]\n  {exe} validate <snapshot.json>\n\nNotes:\n- Each line of a replay file is one full snapshot: an object keyed by record id.\n- `replay` prints marker events as JSON lines; `--summary` prints final markers and metrics instead.\n- FIREMAP_ORIGIN_LAT, FIREMAP_ORIGIN_LON, FIREMAP_SCALE and FIREMAP_CLUSTER_RADIUS override the config file.\n- Log verbosity follows RUST_LOG.\n"
    )
}
