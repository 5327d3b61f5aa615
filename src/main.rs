use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use rustpmemkv::{
    BufferSelector, Direction, DurabilityMode, LoggedCommand, PolicyKind, TierConfig, TierHandle,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rustpmemkv")]
#[command(about = "Persistent-memory key-value tier, driven by commands on stdin")]
struct Cli {
    /// Directory holding the pool image and the AOF (volatile when omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// sync, async or none
    #[arg(long, default_value = "sync")]
    durability: DurabilityMode,

    /// lru or random (allkeys-lru / allkeys-random also accepted)
    #[arg(long, default_value = "lru")]
    policy: PolicyKind,

    #[arg(long)]
    max_entries: Option<usize>,

    #[arg(long, default_value_t = 16)]
    evict_batch: usize,

    #[arg(long, default_value_t = 64)]
    victim_flush_threshold: usize,

    /// Log flush period in milliseconds
    #[arg(long, default_value_t = 1000)]
    flush_interval_ms: u64,

    #[arg(long, default_value_t = 0)]
    read_latency_ns: u64,

    #[arg(long, default_value_t = 0)]
    write_latency_ns: u64,

    /// Seed for the random eviction policy
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn config(&self) -> TierConfig {
        let mut config = match &self.data_dir {
            Some(dir) => TierConfig::in_dir(dir),
            None => TierConfig::new(),
        }
        .durability(self.durability)
        .eviction_policy(self.policy)
        .evict_batch_size(self.evict_batch)
        .victim_flush_threshold(self.victim_flush_threshold)
        .log_flush_interval(Duration::from_millis(self.flush_interval_ms))
        .latency(
            Duration::from_nanos(self.read_latency_ns),
            Duration::from_nanos(self.write_latency_ns),
        );
        if let Some(max) = self.max_entries {
            config = config.max_entries(max);
        }
        if let Some(seed) = self.seed {
            config = config.random_seed(seed);
        }
        config
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    Set(String, String),
    Get(String),
    Del(String),
    Append(LoggedCommand),
    Switch,
    Clear,
    FlushLog,
    Evict,
    EvictBatch(usize),
    FlushVictims,
    Status,
    PbList(BufferSelector),
    Entries(Direction),
    Victims,
    Dram,
    Compact,
}

fn parse_line(line: &str) -> Result<Option<ShellCommand>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((name, args)) = words.split_first() else {
        return Ok(None);
    };
    let command = match (name.to_ascii_lowercase().as_str(), args) {
        ("set", [key, value]) => ShellCommand::Set(key.to_string(), value.to_string()),
        ("get", [key]) => ShellCommand::Get(key.to_string()),
        ("del", [key]) => ShellCommand::Del(key.to_string()),
        ("append", ["set", key, value]) => ShellCommand::Append(LoggedCommand::Set {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }),
        ("append", ["del", key]) => ShellCommand::Append(LoggedCommand::Del {
            key: key.as_bytes().to_vec(),
        }),
        ("switch", []) => ShellCommand::Switch,
        ("clear", []) => ShellCommand::Clear,
        ("flush-log", []) => ShellCommand::FlushLog,
        ("evict", []) => ShellCommand::Evict,
        ("evict-batch", [count]) => ShellCommand::EvictBatch(
            count
                .parse()
                .with_context(|| format!("invalid batch size '{}'", count))?,
        ),
        ("flush-victims", []) => ShellCommand::FlushVictims,
        ("status", []) => ShellCommand::Status,
        ("pb-list", []) | ("pb-list", ["current"]) => {
            ShellCommand::PbList(BufferSelector::Current)
        }
        ("pb-list", ["other"]) => ShellCommand::PbList(BufferSelector::Other),
        ("entries", []) => ShellCommand::Entries(Direction::Forward),
        ("entries", ["reverse"]) => ShellCommand::Entries(Direction::Backward),
        ("victims", []) => ShellCommand::Victims,
        ("dram", []) => ShellCommand::Dram,
        ("compact", []) => ShellCommand::Compact,
        (other, _) => bail!("unknown command or wrong arguments: {}", other),
    };
    Ok(Some(command))
}

fn show(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn show_command(command: &LoggedCommand) -> String {
    match command {
        LoggedCommand::Set { key, value } => format!("SET {} {}", show(key), show(value)),
        LoggedCommand::Del { key } => format!("DEL {}", show(key)),
    }
}

async fn execute(tier: &TierHandle, command: ShellCommand) -> Result<()> {
    match command {
        ShellCommand::Set(key, value) => {
            tier.set(key.as_bytes(), value.as_bytes()).await?;
            println!("OK");
        }
        ShellCommand::Get(key) => match tier.get(key.as_bytes()).await? {
            Some(value) => println!("{}", show(&value)),
            None => println!("(nil)"),
        },
        ShellCommand::Del(key) => println!("{}", u8::from(tier.del(key.as_bytes()).await?)),
        ShellCommand::Append(command) => {
            tier.append_command(&command).await?;
            println!("OK");
        }
        ShellCommand::Switch => println!("current buffer: {}", tier.switch_buffers().await?),
        ShellCommand::Clear => {
            let freed = tier.lock().await.clear_current_buffer()?;
            println!("cleared {} commands", freed);
        }
        ShellCommand::FlushLog => println!("flushed {} commands", tier.flush_log().await?),
        ShellCommand::Evict => match tier.evict_one().await? {
            Some(key) => println!("evicted {}", show(&key)),
            None => println!("entry store is empty"),
        },
        ShellCommand::EvictBatch(count) => {
            println!("evicted {} entries", tier.evict_batch(count).await?)
        }
        ShellCommand::FlushVictims => {
            println!("flushed {} victims", tier.flush_victims().await?)
        }
        ShellCommand::Status => {
            let status = tier.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        ShellCommand::PbList(which) => {
            let commands = tier.buffer_commands(which).await?;
            if commands.is_empty() {
                println!("(empty)");
            }
            for command in &commands {
                println!("{}", show_command(command));
            }
        }
        ShellCommand::Entries(direction) => {
            for (key, value) in tier.lock().await.entries(direction)? {
                println!("{} => {}", show(&key), show(&value));
            }
        }
        ShellCommand::Victims => {
            for key in tier.lock().await.victim_keys()? {
                println!("{}", show(&key));
            }
        }
        ShellCommand::Dram => {
            let pairs = tier.lock().await.dump();
            if pairs.is_empty() {
                println!("(empty)");
            }
            for (key, value) in &pairs {
                println!("{} => {}", show(key), show(value));
            }
        }
        ShellCommand::Compact => {
            let written = tier.lock().await.compact_aof()?;
            println!("AOF rewritten with {} records", written);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate().map_err(|e| anyhow!(e))?;
    let flush_interval = config.log_flush_interval;

    let tier = TierHandle::open(config)
        .await
        .context("failed to open the persistent tier")?;
    let flusher = tier.spawn_log_flusher(flush_interval);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("ERR {}", err);
                continue;
            }
        };
        if let Err(err) = execute(&tier, command).await {
            eprintln!("ERR {}", err);
        }
    }

    flusher.shutdown().await?;
    tier.lock().await.checkpoint()?;
    Ok(())
}
