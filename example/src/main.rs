mod battle_service;
mod match_service;
mod protocol;

use crate::battle_service::BattleService;
use crate::match_service::MatchService;
use clap::Parser;
use relayrt::prelude::*;
use relayrt::utils::logger::LoggerConfig;
use std::process::ExitCode;

#[derive(Parser, Debug, Clone, Copy)]
#[command(
    name = "server",
    about = "rock-paper-scissors-lizard-spock server on the relayrt runtime"
)]
struct Args {
    /// TCP port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match LoggerConfig::from_env().init() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let engine = Engine::new();
    engine.start()?;

    let mut defer = DeferStack::new();
    {
        let engine = engine.clone();
        defer.push(move || {
            if let Err(err) = engine.stop() {
                tracing::error!(error = %err, "failed to stop engine");
            }
        });
    }

    let battle_count = battle_count();
    tracing::info!(battle_count, "starting battle runners");

    let match_runner = engine
        .create_runner_builder("match")?
        .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
        .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
        .with_service(move || Ok(Box::new(MatchService::new(battle_count)) as BoxedService))
        .build_thread_runner()?;
    match_runner.start()?;
    push_stop(&mut defer, match_runner);

    for index in 0..battle_count {
        let battle_runner = engine
            .create_runner_builder(format!("battle:{index}"))?
            .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(BattleService::new()) as BoxedService))
            .build_thread_runner()?;
        battle_runner.start()?;
        push_stop(&mut defer, battle_runner);
    }

    let port = args.port;
    let mut main_runner = engine
        .create_runner_builder("main")?
        .with_service(move || {
            Ok(Box::new(ConfigService::new(FlatJson::new().set("port", port))) as BoxedService)
        })
        .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
        .with_service(|| Ok(Box::new(SignalService::new()) as BoxedService))
        .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
        .with_service(|| Ok(Box::new(TcpServerService::new()) as BoxedService))
        .with_service(|| Ok(Box::new(SocketRouterService::new("match")) as BoxedService))
        .build_runner()?;

    match main_runner.run() {
        // SIGINT is a clean exit
        Err(err) if err.code() == code::INTERRUPTED => Ok(()),
        other => other,
    }
}

fn push_stop(defer: &mut DeferStack, runner: ThreadRunner) {
    defer.push(move || match runner.stop() {
        Ok(()) => {}
        Err(err) if err.code() == code::NOT_RUNNING => {}
        Err(err) => {
            tracing::error!(runner = %runner.name(), error = %err, "failed to stop runner");
        }
    });
}

/// Leave headroom for the main and match runners; always at least one.
fn battle_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}
