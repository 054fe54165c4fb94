// Spoof a simulated device's location from the command line

use clap::{Arg, ArgMatches, Command};
use fakeloc::{
    SpoofingCoordinator, SpoofingState,
    platform::simulated::SimulatedDevice,
    presets,
    service::{ServiceCommand, ServiceExit, ServiceHost},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod common;

fn coordinate_args(command: Command) -> Command {
    command
        .arg(Arg::new("latitude").required(true).allow_negative_numbers(true))
        .arg(Arg::new("longitude").required(true).allow_negative_numbers(true))
        .arg(
            Arg::new("accuracy")
                .long("accuracy")
                .value_name("METERS")
                .help("Accuracy radius of the reported fix"),
        )
        .arg(
            Arg::new("label")
                .long("label")
                .value_name("NAME")
                .help("Display label for the position"),
        )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let matches = Command::new("fakeloc")
        .about("Report a chosen location from a simulated device")
        .arg(
            Arg::new("profile")
                .long("profile")
                .value_name("PATH")
                .help("Path to the device profile plist"),
        )
        .arg(
            Arg::new("about")
                .long("about")
                .help("Show about information")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(coordinate_args(
            Command::new("set").about("Spoof the location until ctrl-c"),
        ))
        .subcommand(
            Command::new("preset")
                .about("Spoof a preset city until ctrl-c")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(Command::new("presets").about("List the preset cities"))
        .subcommand(Command::new("clear").about("Stop spoofing"))
        .subcommand(Command::new("status").about("Show preconditions and the reported location"))
        .subcommand(coordinate_args(
            Command::new("service").about("Keep the location alive from the background service"),
        ))
        .get_matches();

    if matches.get_flag("about") {
        println!("fakeloc - Reports a chosen location through location services");
        println!("Version {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let device = match common::get_device(matches.get_one::<String>("profile")) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    let result = match matches.subcommand() {
        Some(("set", sub)) => match common::get_coordinate(sub) {
            Ok(c) => spoof(device, c).await,
            Err(e) => Err(e),
        },
        Some(("preset", sub)) => {
            let name = sub.get_one::<String>("name").map(String::as_str).unwrap_or("");
            match presets::find(name) {
                Some(c) => spoof(device, c).await,
                None => Err(format!("No preset named `{name}`, see `fakeloc presets`")),
            }
        }
        Some(("presets", _)) => {
            for c in presets::all() {
                println!("{c}");
            }
            Ok(())
        }
        Some(("clear", _)) => {
            let mut coordinator = SpoofingCoordinator::from_platform(device);
            coordinator.stop_spoofing();
            println!("Location cleared!");
            Ok(())
        }
        Some(("status", _)) => status(device).await,
        Some(("service", sub)) => run_service(device, sub).await,
        _ => Err("Invalid usage, pass -h for help".to_string()),
    };

    if let Err(e) = result {
        eprintln!("{e}");
    }
}

async fn spoof(device: Arc<SimulatedDevice>, coordinate: fakeloc::Coordinate) -> Result<(), String> {
    spoof_until(device, coordinate, tokio::signal::ctrl_c()).await
}

/// Spoofs until `done` resolves, releasing the fix whichever way it resolves
async fn spoof_until(
    device: Arc<SimulatedDevice>,
    coordinate: fakeloc::Coordinate,
    done: impl Future<Output = std::io::Result<()>>,
) -> Result<(), String> {
    let mut coordinator = SpoofingCoordinator::from_platform(device);
    let mut states = coordinator.subscribe();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state {
                SpoofingState::Active(c) => println!("Spoofing {c}"),
                SpoofingState::Error(message) => eprintln!("Error: {message}"),
                SpoofingState::Inactive => println!("Spoofing stopped"),
            }
        }
    });

    let outcome = match coordinator.start_spoofing(coordinate) {
        Ok(()) => {
            if let Ok(Some(fix)) = coordinator.current_location().await {
                println!(
                    "Location services now report {}, {} (±{}m)",
                    fix.latitude, fix.longitude, fix.accuracy
                );
            }
            println!("Press ctrl-c to stop");
            let waited = done.await;
            coordinator.stop_spoofing();
            waited.map_err(|e| format!("Unable to wait for ctrl-c: {e}"))
        }
        Err(e) => Err(format!("Unable to spoof location: {e}")),
    };

    drop(coordinator);
    let _ = watcher.await;
    outcome
}

async fn status(device: Arc<SimulatedDevice>) -> Result<(), String> {
    let coordinator = SpoofingCoordinator::from_platform(device.clone());
    let profile = device.profile();
    println!("API level:              {}", profile.api_level);
    println!("Package:                {}", profile.package_name);
    println!(
        "Mock permission:        {}",
        coordinator.has_mock_location_permission()
    );
    println!(
        "Mock provider enabled:  {}",
        coordinator.is_mock_location_enabled()
    );
    println!("State:                  {}", coordinator.state());
    match coordinator.current_location().await {
        Ok(Some(fix)) => println!("Reported location:      {}, {}", fix.latitude, fix.longitude),
        Ok(None) => println!("Reported location:      unknown"),
        Err(e) => println!("Reported location:      {e}"),
    }
    Ok(())
}

async fn run_service(device: Arc<SimulatedDevice>, matches: &ArgMatches) -> Result<(), String> {
    let coordinate = common::get_coordinate(matches)?;
    let coordinator = SpoofingCoordinator::from_platform(device.clone());
    let mut host = ServiceHost::new(coordinator.injector().clone(), device.clone());

    host.deliver(ServiceCommand::Start(coordinate))
        .map_err(|e| format!("Unable to start service: {e}"))?;

    let waited = tokio::select! {
        exit = host.join() => {
            return match exit {
                Some(ServiceExit::Failed(e)) => Err(format!("Service failed: {e}")),
                other => Err(format!("Service ended early: {other:?}")),
            };
        }
        r = tokio::signal::ctrl_c() => r,
    };

    host.deliver(ServiceCommand::Stop)
        .map_err(|e| format!("Unable to stop service: {e}"))?;
    let exit = host.join().await;
    waited.map_err(|e| format!("Unable to wait for ctrl-c: {e}"))?;
    match exit {
        Some(ServiceExit::Stopped) => {
            println!("Service stopped after {} injection(s)", device.injections().len());
            Ok(())
        }
        other => Err(format!("Service ended unexpectedly: {other:?}")),
    }
}
