//! Logger setup for provisioning scripts
//!
//! The library only logs through the `log` facade. Binaries that embed it can
//! call [`init`] once at startup; `RUST_LOG` still refines the level.

use log::LevelFilter;

/// Map a `-v` count to a level: warn, info, debug, then trace
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install an `env_logger` at the level for `verbose`/`quiet`.
///
/// Calling it again is harmless: the first logger stays installed.
pub fn init(verbose: u8, quiet: bool) {
    let installed = env_logger::Builder::new()
        .filter_level(level_for(verbose, quiet))
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
    if installed.is_err() {
        log::debug!("Logger already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_ladder() {
        assert_eq!(level_for(0, false), LevelFilter::Warn);
        assert_eq!(level_for(1, false), LevelFilter::Info);
        assert_eq!(level_for(2, false), LevelFilter::Debug);
        assert_eq!(level_for(7, false), LevelFilter::Trace);
        assert_eq!(level_for(3, true), LevelFilter::Error);
    }

    #[test]
    fn test_init_twice() {
        init(1, false);
        init(2, false);
    }
}
