// Common functions between subcommands

use std::sync::Arc;

use clap::ArgMatches;
use fakeloc::{Coordinate, platform::simulated::SimulatedDevice, profile::DeviceProfile};
use tracing::debug;

/// Builds the simulated device from `--profile`, then `FAKELOC_PROFILE`, then defaults
pub fn get_device(profile: Option<&String>) -> Result<Arc<SimulatedDevice>, String> {
    let path = match profile {
        Some(p) => Some(p.to_owned()),
        None => std::env::var("FAKELOC_PROFILE").ok(),
    };

    let profile = match path {
        Some(path) => match DeviceProfile::read_from_file(&path) {
            Ok(p) => p,
            Err(e) => {
                return Err(format!("Unable to read device profile {path}: {e:?}"));
            }
        },
        None => DeviceProfile::default(),
    };
    debug!("Simulating {} at API level {}", profile.package_name, profile.api_level);
    Ok(Arc::new(SimulatedDevice::new(profile)))
}

/// Reads the `latitude`, `longitude`, `accuracy` and `label` arguments
pub fn get_coordinate(matches: &ArgMatches) -> Result<Coordinate, String> {
    let float = |name: &str| -> Result<Option<f64>, String> {
        match matches.get_one::<String>(name) {
            Some(v) => v
                .parse::<f64>()
                .map(Some)
                .map_err(|e| format!("Invalid {name} `{v}`: {e}")),
            None => Ok(None),
        }
    };

    let latitude = float("latitude")?.ok_or("No latitude passed! Pass -h for help")?;
    let longitude = float("longitude")?.ok_or("No longitude passed! Pass -h for help")?;
    let accuracy = float("accuracy")?
        .map(|a| a as f32)
        .unwrap_or(fakeloc::coordinate::DEFAULT_ACCURACY);

    let coordinate = Coordinate::with_accuracy(latitude, longitude, accuracy)
        .map_err(|e| format!("{e}"))?;
    Ok(match matches.get_one::<String>("label") {
        Some(label) => coordinate.labeled(label.as_str()),
        None => coordinate,
    })
}
