//! Tracing bootstrap shared by binaries and tests.

use crate::config::LoggingSettings;
use crate::{ProbeWireError, ProbeWireResult};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins over `settings.filter` when set. Calling this more than once
/// is harmless: the second installation is reported and ignored.
pub fn init_tracing(settings: &LoggingSettings) -> ProbeWireResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| ProbeWireError::config(format!("Invalid log filter: {e}")))?;

    let installed = if settings.json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    if let Err(e) = installed {
        tracing::debug!("tracing subscriber already installed: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_ok() {
        let settings = LoggingSettings::default();
        assert!(init_tracing(&settings).is_ok());
        assert!(init_tracing(&settings).is_ok());
    }
}
